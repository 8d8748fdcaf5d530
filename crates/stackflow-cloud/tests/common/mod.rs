use async_trait::async_trait;
use serde_json::Value;
use stackflow_cloud::{
    CloudError, ConvergenceTarget, FloatingIpInfo, GatewayInfo, L3Provider, LiveResource,
    PortForwarding, PortInfo, ResourceProvider, ResourceType, Result, RouterInfo, Scope,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered log of provider calls shared by every fake in a test.
#[derive(Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Index of the first entry starting with `prefix`.
    pub fn first(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e.starts_with(prefix))
            .unwrap_or_else(|| panic!("no journal entry starting with {prefix}"))
    }

    /// Index of the last entry starting with `prefix`.
    pub fn last(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .rposition(|e| e.starts_with(prefix))
            .unwrap_or_else(|| panic!("no journal entry starting with {prefix}"))
    }

    #[allow(dead_code)]
    pub fn contains(&self, prefix: &str) -> bool {
        self.entries().iter().any(|e| e.starts_with(prefix))
    }
}

/// In-memory provider for one resource type.
///
/// Journal entries look like `create:subnet:<name>:start`,
/// `delete:port:<id>:end` and `list:network`.
pub struct FakeProvider {
    resource_type: ResourceType,
    journal: Arc<Journal>,
    delay: Duration,
    live: Mutex<Vec<LiveResource>>,
    created: Mutex<Vec<Value>>,
    counter: AtomicUsize,
    fail: HashSet<String>,
    panic_on: HashSet<String>,
    fail_list: bool,
    convergence: Option<ConvergenceTarget>,
    statuses: Vec<String>,
    reads: Mutex<HashMap<String, usize>>,
    server_ports: bool,
}

#[allow(dead_code)]
impl FakeProvider {
    pub fn new(resource_type: ResourceType, journal: Arc<Journal>) -> Self {
        Self {
            resource_type,
            journal,
            delay: Duration::from_millis(100),
            live: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            fail: HashSet::new(),
            panic_on: HashSet::new(),
            fail_list: false,
            convergence: None,
            statuses: Vec::new(),
            reads: Mutex::new(HashMap::new()),
            server_ports: false,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_live(self, ids: &[&str]) -> Self {
        *self.live.lock().unwrap() = ids
            .iter()
            .map(|id| LiveResource::new(*id).with_field("name", format!("{id}-name")))
            .collect();
        self
    }

    /// Fail `delete` of this id, or `create` of a payload with this name.
    pub fn failing(mut self, id_or_name: &str) -> Self {
        self.fail.insert(id_or_name.to_string());
        self
    }

    pub fn panicking(mut self, id_or_name: &str) -> Self {
        self.panic_on.insert(id_or_name.to_string());
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    /// Converge through `statuses`; the last one repeats.
    pub fn converging(mut self, target: ConvergenceTarget, statuses: &[&str]) -> Self {
        self.convergence = Some(target);
        self.statuses = statuses.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Resolve references to servers to the server's port, `<id>-port`.
    pub fn resolving_server_ports(mut self) -> Self {
        self.server_ports = true;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn created(&self) -> Vec<Value> {
        self.created.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> Vec<String> {
        self.live.lock().unwrap().iter().map(|r| r.id.clone()).collect()
    }

    pub fn status_reads(&self, id: &str) -> usize {
        self.reads.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    fn tag(&self) -> &str {
        self.resource_type.as_str()
    }
}

#[async_trait]
impl ResourceProvider for FakeProvider {
    async fn create(&self, payload: &Value) -> Result<String> {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unnamed")
            .to_string();
        self.journal.push(format!("create:{}:{}:start", self.tag(), name));
        tokio::time::sleep(self.delay).await;

        if self.panic_on.contains(&name) {
            panic!("provider blew up creating {name}");
        }
        if self.fail.contains(&name) {
            self.journal.push(format!("create:{}:{}:failed", self.tag(), name));
            return Err(CloudError::ApiError(format!("quota exceeded for {name}")));
        }

        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let id = format!("{}-{}", self.tag(), n);
        self.created.lock().unwrap().push(payload.clone());
        self.live
            .lock()
            .unwrap()
            .push(LiveResource::new(&id).with_field("name", &name));
        self.journal.push(format!("create:{}:{}:end", self.tag(), name));
        Ok(id)
    }

    async fn list(&self) -> Result<Vec<LiveResource>> {
        self.journal.push(format!("list:{}", self.tag()));
        if self.fail_list {
            return Err(CloudError::ApiError("503 service unavailable".into()));
        }
        Ok(self.live.lock().unwrap().clone())
    }

    async fn delete(&self, resource: &LiveResource) -> Result<()> {
        self.journal
            .push(format!("delete:{}:{}:start", self.tag(), resource.id));
        tokio::time::sleep(self.delay).await;

        if self.panic_on.contains(&resource.id) {
            panic!("provider blew up deleting {}", resource.id);
        }
        if self.fail.contains(&resource.id) {
            return Err(CloudError::ApiError(format!(
                "409 conflict deleting {}",
                resource.id
            )));
        }

        self.live.lock().unwrap().retain(|r| r.id != resource.id);
        self.journal
            .push(format!("delete:{}:{}:end", self.tag(), resource.id));
        Ok(())
    }

    async fn status(&self, id: &str) -> Result<String> {
        let read = {
            let mut reads = self.reads.lock().unwrap();
            let count = reads.entry(id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let status = self
            .statuses
            .get(read - 1)
            .or(self.statuses.last())
            .cloned()
            .unwrap_or_else(|| "ACTIVE".to_string());
        Ok(status)
    }

    fn convergence(&self) -> Option<ConvergenceTarget> {
        self.convergence.clone()
    }

    async fn resolve_reference(&self, dependency_type: &ResourceType, output: &str) -> Result<String> {
        if self.server_ports && *dependency_type == ResourceType::SERVER {
            self.journal
                .push(format!("resolve:{}:{}", self.tag(), output));
            return Ok(format!("{output}-port"));
        }
        Ok(output.to_string())
    }
}

/// Layer-3 state held by [`FakeL3`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct L3State {
    pub routers: BTreeMap<String, Option<GatewayInfo>>,
    pub fips: BTreeMap<String, FipState>,
    /// port id -> QoS policy
    pub port_qos: BTreeMap<String, Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FipState {
    pub port: Option<String>,
    pub fixed_ip: Option<String>,
    pub fip_port: String,
    pub network: String,
    pub address: String,
    pub router: Option<String>,
    pub forwardings: Vec<PortForwarding>,
}

/// In-memory router/floating IP backend.
///
/// Failures are injected per `<operation>:<id>` key, e.g.
/// `clear_gateway:r2` or `disassociate:f3`. Hangs use the same keys.
pub struct FakeL3 {
    state: Mutex<L3State>,
    fail: Mutex<HashSet<String>>,
    hang: Mutex<HashSet<String>>,
    router_statuses: Mutex<HashMap<String, VecDeque<String>>>,
    calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl FakeL3 {
    pub fn new(state: L3State) -> Self {
        Self {
            state: Mutex::new(state),
            fail: Mutex::new(HashSet::new()),
            hang: Mutex::new(HashSet::new()),
            router_statuses: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_on(&self, key: &str) {
        self.fail.lock().unwrap().insert(key.to_string());
    }

    /// The call never returns.
    pub fn hang_on(&self, key: &str) {
        self.hang.lock().unwrap().insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.fail.lock().unwrap().clear();
    }

    /// Statuses returned by the next `router_status` reads; `ACTIVE`
    /// afterwards.
    pub fn script_router_status(&self, router_id: &str, statuses: &[&str]) {
        self.router_statuses.lock().unwrap().insert(
            router_id.to_string(),
            statuses.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn state(&self) -> L3State {
        self.state.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn record(&self, op: &str, id: &str) -> Result<()> {
        let key = format!("{op}:{id}");
        self.calls.lock().unwrap().push(key.clone());
        let hangs = self.hang.lock().unwrap().contains(&key);
        if hangs {
            std::future::pending::<()>().await;
        }
        if self.fail.lock().unwrap().contains(&key) {
            return Err(CloudError::ApiError(format!("{key} rejected")));
        }
        Ok(())
    }

    fn with_fip<T>(&self, fip_id: &str, f: impl FnOnce(&mut FipState) -> T) -> Result<T> {
        let mut state = self.state.lock().unwrap();
        let fip = state
            .fips
            .get_mut(fip_id)
            .ok_or_else(|| CloudError::ResourceNotFound(fip_id.to_string()))?;
        Ok(f(fip))
    }
}

/// Two routers with two and one floating IPs, plus one unattached floating
/// IP. Every router has a gateway and every floating IP a forwarding rule.
#[allow(dead_code)]
pub fn sample_l3() -> L3State {
    let mut state = L3State::default();
    for router in ["r1", "r2"] {
        state.routers.insert(
            router.to_string(),
            Some(GatewayInfo {
                network_id: "ext-net".into(),
                enable_snat: Some(true),
                external_fixed_ips: vec![],
                qos_policy_id: None,
            }),
        );
    }

    let fips = [
        ("f1", Some("r1"), Some("q-gold")),
        ("f2", Some("r1"), None),
        ("f3", Some("r2"), Some("q-silver")),
        ("f4", None, None),
    ];
    for (i, (id, router, qos)) in fips.into_iter().enumerate() {
        let fip_port = format!("fp-{id}");
        state
            .port_qos
            .insert(fip_port.clone(), qos.map(str::to_string));
        state.fips.insert(
            id.to_string(),
            FipState {
                port: Some(format!("vm-port-{id}")),
                fixed_ip: Some(format!("10.0.0.{}", i + 10)),
                fip_port,
                network: "ext-net".into(),
                address: format!("203.0.113.{}", i + 10),
                router: router.map(str::to_string),
                forwardings: vec![PortForwarding {
                    id: format!("pf-{id}"),
                    protocol: "tcp".into(),
                    internal_ip_address: format!("10.0.0.{}", i + 10),
                    internal_port: 22,
                    internal_port_id: format!("vm-port-{id}"),
                    external_port: 2200 + i as u16,
                }],
            },
        );
    }
    state
}

#[async_trait]
impl L3Provider for FakeL3 {
    async fn list_routers(&self, _scope: &Scope) -> Result<Vec<RouterInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .routers
            .iter()
            .map(|(id, gateway)| RouterInfo {
                id: id.clone(),
                gateway: gateway.clone(),
            })
            .collect())
    }

    async fn list_router_floating_ips(&self, router_id: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .fips
            .iter()
            .filter(|(_, f)| f.router.as_deref() == Some(router_id))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn list_floating_ips(&self, _scope: &Scope) -> Result<Vec<FloatingIpInfo>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .fips
            .iter()
            .map(|(id, f)| FloatingIpInfo {
                id: id.clone(),
                port_id: f.port.clone(),
                fixed_ip_address: f.fixed_ip.clone(),
                floating_network_id: f.network.clone(),
                floating_ip_address: f.address.clone(),
                router_id: f.router.clone(),
            })
            .collect())
    }

    async fn list_port_forwardings(&self, fip_id: &str) -> Result<Vec<PortForwarding>> {
        self.with_fip(fip_id, |f| f.forwardings.clone())
    }

    async fn floating_ip_port(&self, fip_id: &str) -> Result<PortInfo> {
        let port = self.with_fip(fip_id, |f| f.fip_port.clone())?;
        let qos = self
            .state
            .lock()
            .unwrap()
            .port_qos
            .get(&port)
            .cloned()
            .flatten();
        Ok(PortInfo {
            id: port,
            qos_policy_id: qos,
        })
    }

    async fn delete_port_forwarding(&self, fip_id: &str, forwarding_id: &str) -> Result<()> {
        self.record("delete_pf", fip_id).await?;
        self.with_fip(fip_id, |f| f.forwardings.retain(|r| r.id != forwarding_id))
    }

    async fn disassociate_floating_ip(&self, fip_id: &str) -> Result<()> {
        self.record("disassociate", fip_id).await?;
        self.with_fip(fip_id, |f| {
            f.port = None;
            f.fixed_ip = None;
        })
    }

    async fn clear_port_qos(&self, port_id: &str) -> Result<()> {
        self.record("clear_qos", port_id).await?;
        self.state
            .lock()
            .unwrap()
            .port_qos
            .insert(port_id.to_string(), None);
        Ok(())
    }

    async fn clear_router_gateway(&self, router_id: &str, _network_id: &str) -> Result<()> {
        self.record("clear_gateway", router_id).await?;
        self.state
            .lock()
            .unwrap()
            .routers
            .insert(router_id.to_string(), None);
        Ok(())
    }

    async fn router_status(&self, router_id: &str) -> Result<String> {
        self.record("router_status", router_id).await?;
        let next = self
            .router_statuses
            .lock()
            .unwrap()
            .get_mut(router_id)
            .and_then(VecDeque::pop_front);
        Ok(next.unwrap_or_else(|| "ACTIVE".to_string()))
    }

    async fn set_router_gateway(&self, router_id: &str, gateway: &GatewayInfo) -> Result<()> {
        self.record("set_gateway", router_id).await?;
        self.state
            .lock()
            .unwrap()
            .routers
            .insert(router_id.to_string(), Some(gateway.clone()));
        Ok(())
    }

    async fn associate_floating_ip(
        &self,
        fip_id: &str,
        port_id: &str,
        fixed_ip: Option<&str>,
    ) -> Result<()> {
        self.record("associate", fip_id).await?;
        self.with_fip(fip_id, |f| {
            f.port = Some(port_id.to_string());
            f.fixed_ip = fixed_ip.map(str::to_string);
        })
    }

    async fn set_port_qos(&self, port_id: &str, qos_policy_id: &str) -> Result<()> {
        self.record("set_qos", port_id).await?;
        self.state
            .lock()
            .unwrap()
            .port_qos
            .insert(port_id.to_string(), Some(qos_policy_id.to_string()));
        Ok(())
    }

    async fn create_port_forwarding(&self, fip_id: &str, rule: &PortForwarding) -> Result<()> {
        self.record("create_pf", fip_id).await?;
        self.with_fip(fip_id, |f| f.forwardings.push(rule.clone()))
    }
}
