//! Reversible teardown of router groups
//!
//! A router group is a router together with the floating IPs routed through
//! it. The workflow captures a [`Snapshot`], tears each group down
//! (port-forwardings, associations and QoS first, then the external
//! gateway) and restores it from the snapshot once the router is `ACTIVE`
//! again.
//!
//! Groups are independent: they run concurrently and a failure in one never
//! stops another. Floating IPs without a router form their own group, which
//! is handled before the router groups.

use crate::error::{CloudError, Result};
use crate::poller::{wait_for_status, ConvergenceTarget, PollConfig};
use crate::snapshot::{
    FipRecord, GatewayInfo, PortForwarding, RouterRecord, Scope, Snapshot,
};
use async_trait::async_trait;
use futures_util::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A router as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterInfo {
    pub id: String,
    pub gateway: Option<GatewayInfo>,
}

/// A floating IP as listed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIpInfo {
    pub id: String,
    pub port_id: Option<String>,
    pub fixed_ip_address: Option<String>,
    pub floating_network_id: String,
    pub floating_ip_address: String,
    pub router_id: Option<String>,
}

/// The floating IP's own port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub id: String,
    pub qos_policy_id: Option<String>,
}

/// Layer-3 operations the recovery workflow needs.
#[async_trait]
pub trait L3Provider: Send + Sync {
    async fn list_routers(&self, scope: &Scope) -> Result<Vec<RouterInfo>>;

    /// IDs of the floating IPs routed through `router_id`
    async fn list_router_floating_ips(&self, router_id: &str) -> Result<Vec<String>>;

    async fn list_floating_ips(&self, scope: &Scope) -> Result<Vec<FloatingIpInfo>>;

    async fn list_port_forwardings(&self, fip_id: &str) -> Result<Vec<PortForwarding>>;

    async fn floating_ip_port(&self, fip_id: &str) -> Result<PortInfo>;

    async fn delete_port_forwarding(&self, fip_id: &str, forwarding_id: &str) -> Result<()>;

    async fn disassociate_floating_ip(&self, fip_id: &str) -> Result<()>;

    async fn clear_port_qos(&self, port_id: &str) -> Result<()>;

    async fn clear_router_gateway(&self, router_id: &str, network_id: &str) -> Result<()>;

    async fn router_status(&self, router_id: &str) -> Result<String>;

    async fn set_router_gateway(&self, router_id: &str, gateway: &GatewayInfo) -> Result<()>;

    async fn associate_floating_ip(
        &self,
        fip_id: &str,
        port_id: &str,
        fixed_ip: Option<&str>,
    ) -> Result<()>;

    async fn set_port_qos(&self, port_id: &str, qos_policy_id: &str) -> Result<()>;

    async fn create_port_forwarding(&self, fip_id: &str, rule: &PortForwarding) -> Result<()>;
}

/// Scan the provider and build a [`Snapshot`] of `scope`.
pub async fn capture(provider: &dyn L3Provider, scope: &Scope) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();

    let routers = provider.list_routers(scope).await?;
    let router_fips = try_join_all(
        routers
            .iter()
            .map(|router| provider.list_router_floating_ips(&router.id)),
    )
    .await?;
    for (router, floating_ips) in routers.into_iter().zip(router_fips) {
        snapshot.routers.insert(
            router.id,
            RouterRecord {
                gateway: router.gateway,
                floating_ips,
            },
        );
    }

    let fips = provider.list_floating_ips(scope).await?;
    let details = try_join_all(fips.iter().map(|fip| async move {
        let forwardings = provider.list_port_forwardings(&fip.id).await?;
        let port = provider.floating_ip_port(&fip.id).await?;
        Ok::<_, CloudError>((forwardings, port))
    }))
    .await?;
    for (fip, (port_forwardings, port)) in fips.into_iter().zip(details) {
        snapshot.floating_ips.insert(
            fip.id,
            FipRecord {
                port: fip.port_id.filter(|p| !p.is_empty()),
                fip_port: port.id,
                fixed_ip: fip.fixed_ip_address,
                qos_policy: port.qos_policy_id.filter(|q| !q.is_empty()),
                floating_network: fip.floating_network_id,
                floating_ip_address: fip.floating_ip_address,
                router: fip.router_id.filter(|r| !r.is_empty()),
                port_forwardings,
            },
        );
    }

    info!(
        scope = %scope,
        routers = snapshot.routers.len(),
        floating_ips = snapshot.floating_ips.len(),
        port_forwardings = snapshot.port_forwarding_count(),
        "Captured snapshot"
    );
    Ok(snapshot)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryMode {
    /// Tear down, then restore
    Cycle,
    /// Restore from the snapshot without tearing anything down
    RestoreOnly,
}

impl std::fmt::Display for RecoveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryMode::Cycle => write!(f, "cycle"),
            RecoveryMode::RestoreOnly => write!(f, "restore-only"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOptions {
    pub mode: RecoveryMode,
    /// Only this router's group; unattached floating IPs are then left alone
    pub router: Option<String>,
}

impl RecoveryOptions {
    pub fn cycle() -> Self {
        Self {
            mode: RecoveryMode::Cycle,
            router: None,
        }
    }

    pub fn restore_only() -> Self {
        Self {
            mode: RecoveryMode::RestoreOnly,
            router: None,
        }
    }

    pub fn for_router(mut self, router_id: impl Into<String>) -> Self {
        self.router = Some(router_id.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryConfig {
    /// Bound on a whole recovery run; no provider call or router wait
    /// outlives it
    pub run_timeout: Duration,
    /// How long to wait for a router to become `ACTIVE`
    pub router_active: PollConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(30 * 60),
            router_active: PollConfig::new(Duration::from_secs(10), Duration::from_secs(300)),
        }
    }
}

/// Terminal state of one group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupState {
    Restored,
    TeardownFailed,
    RestoreFailed,
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupState::Restored => write!(f, "restored"),
            GroupState::TeardownFailed => write!(f, "teardown failed"),
            GroupState::RestoreFailed => write!(f, "restore failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReport {
    /// `None` for the group of floating IPs without a router
    pub router_id: Option<String>,
    pub state: GroupState,
    pub floating_ips: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl GroupReport {
    fn label(&self) -> &str {
        self.router_id.as_deref().unwrap_or("(unattached floating IPs)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub mode: RecoveryMode,
    pub groups: Vec<GroupReport>,
    pub duration_ms: u64,
}

impl RecoveryReport {
    pub fn is_success(&self) -> bool {
        self.groups.iter().all(|g| g.state == GroupState::Restored)
    }

    pub fn get(&self, router_id: &str) -> Option<&GroupReport> {
        self.groups
            .iter()
            .find(|g| g.router_id.as_deref() == Some(router_id))
    }
}

impl std::fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let restored = self
            .groups
            .iter()
            .filter(|g| g.state == GroupState::Restored)
            .count();
        writeln!(
            f,
            "{} recovery: {}/{} groups restored",
            self.mode,
            restored,
            self.groups.len()
        )?;
        for group in &self.groups {
            writeln!(
                f,
                "  {:<40} {:>3} floating IPs  {}",
                group.label(),
                group.floating_ips,
                group.state
            )?;
            for error in &group.errors {
                writeln!(f, "    ✗ {}", error)?;
            }
        }
        Ok(())
    }
}

/// Drives teardown and restore of the groups in a snapshot.
pub struct RecoveryWorkflow {
    provider: Arc<dyn L3Provider>,
    config: RecoveryConfig,
    cancel: CancellationToken,
}

impl RecoveryWorkflow {
    pub fn new(provider: Arc<dyn L3Provider>, config: RecoveryConfig) -> Self {
        Self {
            provider,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn capture(&self, scope: &Scope) -> Result<Snapshot> {
        capture(self.provider.as_ref(), scope).await
    }

    /// Process every selected group of `snapshot`.
    ///
    /// A router filter that is not part of the snapshot yields an empty
    /// report.
    pub async fn run(&self, snapshot: &Snapshot, options: &RecoveryOptions) -> RecoveryReport {
        let start = Instant::now();
        let deadline = start + self.config.run_timeout;
        let mut groups = Vec::new();

        let routers: Vec<(&String, &RouterRecord)> = match &options.router {
            Some(router_id) => match snapshot.routers.get_key_value(router_id) {
                Some(entry) => vec![entry],
                None => {
                    warn!(router = %router_id, "Router is not part of the snapshot");
                    Vec::new()
                }
            },
            None => snapshot.routers.iter().collect(),
        };

        if options.router.is_none() {
            for fip_id in snapshot.orphaned_floating_ips() {
                warn!(fip = %fip_id, "Router of floating IP is not part of the snapshot, handling it as unattached");
            }
            let unattached = snapshot.unattached_floating_ips();
            if !unattached.is_empty() {
                info!(count = unattached.len(), "Processing floating IPs without a router");
                groups.push(self.run_unattached(&unattached, options.mode, deadline).await);
            }
        }

        let results = join_all(routers.into_iter().map(|(router_id, record)| {
            self.run_group(router_id, record, snapshot, options.mode, deadline)
        }))
        .await;
        groups.extend(results);

        let report = RecoveryReport {
            mode: options.mode,
            groups,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            groups = report.groups.len(),
            success = report.is_success(),
            "Recovery finished"
        );
        report
    }

    async fn run_unattached(
        &self,
        fips: &[(&str, &FipRecord)],
        mode: RecoveryMode,
        deadline: Instant,
    ) -> GroupReport {
        let mut report = GroupReport {
            router_id: None,
            state: GroupState::Restored,
            floating_ips: fips.len(),
            errors: Vec::new(),
        };

        if mode == RecoveryMode::Cycle {
            report.errors = self.teardown_fips(fips, deadline).await;
            if !report.errors.is_empty() {
                report.state = GroupState::TeardownFailed;
                return report;
            }
        }

        report.errors = self.restore_fips(fips, deadline).await;
        if !report.errors.is_empty() {
            report.state = GroupState::RestoreFailed;
        }
        report
    }

    async fn run_group(
        &self,
        router_id: &str,
        record: &RouterRecord,
        snapshot: &Snapshot,
        mode: RecoveryMode,
        deadline: Instant,
    ) -> GroupReport {
        let fips = snapshot.router_floating_ips(router_id);
        let mut report = GroupReport {
            router_id: Some(router_id.to_string()),
            state: GroupState::Restored,
            floating_ips: fips.len(),
            errors: Vec::new(),
        };

        if mode == RecoveryMode::Cycle {
            info!(router = %router_id, floating_ips = fips.len(), "Tearing down router group");
            report.errors = self.teardown_group(router_id, record, &fips, deadline).await;
            if !report.errors.is_empty() {
                warn!(router = %router_id, errors = report.errors.len(), "Teardown failed, skipping restore");
                report.state = GroupState::TeardownFailed;
                return report;
            }
        }

        info!(router = %router_id, "Restoring router group");
        report.errors = self.restore_group(router_id, record, &fips, deadline).await;
        if report.errors.is_empty() {
            info!(router = %router_id, "Router group restored");
        } else {
            warn!(router = %router_id, errors = report.errors.len(), "Restore failed");
            report.state = GroupState::RestoreFailed;
        }
        report
    }

    async fn teardown_group(
        &self,
        router_id: &str,
        record: &RouterRecord,
        fips: &[(&str, &FipRecord)],
        deadline: Instant,
    ) -> Vec<String> {
        let errors = self.teardown_fips(fips, deadline).await;
        if !errors.is_empty() {
            return errors;
        }

        match &record.gateway {
            Some(gateway) => match self
                .bounded(
                    deadline,
                    "clear router gateway",
                    self.provider
                        .clear_router_gateway(router_id, &gateway.network_id),
                )
                .await
            {
                Ok(()) => {
                    debug!(router = %router_id, "Cleared router gateway");
                    Vec::new()
                }
                Err(e) => vec![format!("router {} clear gateway: {}", router_id, e)],
            },
            None => {
                debug!(router = %router_id, "Router has no gateway");
                Vec::new()
            }
        }
    }

    async fn teardown_fips(&self, fips: &[(&str, &FipRecord)], deadline: Instant) -> Vec<String> {
        join_all(fips.iter().map(|(id, fip)| self.teardown_fip(id, fip, deadline)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Remove everything attached to one floating IP. The first failing
    /// step ends the floating IP's teardown.
    async fn teardown_fip(&self, fip_id: &str, fip: &FipRecord, deadline: Instant) -> Option<String> {
        let result: Result<()> = async {
            for rule in &fip.port_forwardings {
                self.bounded(
                    deadline,
                    "delete port forwarding",
                    self.provider.delete_port_forwarding(fip_id, &rule.id),
                )
                .await?;
            }
            if fip.port.is_some() {
                self.bounded(
                    deadline,
                    "disassociate",
                    self.provider.disassociate_floating_ip(fip_id),
                )
                .await?;
            }
            self.bounded(
                deadline,
                "clear QoS",
                self.provider.clear_port_qos(&fip.fip_port),
            )
            .await
        }
        .await;

        match result {
            Ok(()) => {
                debug!(fip = %fip_id, "Floating IP torn down");
                None
            }
            Err(e) => {
                warn!(fip = %fip_id, "Floating IP teardown failed: {}", e);
                Some(format!("floating IP {} teardown: {}", fip_id, e))
            }
        }
    }

    async fn restore_group(
        &self,
        router_id: &str,
        record: &RouterRecord,
        fips: &[(&str, &FipRecord)],
        deadline: Instant,
    ) -> Vec<String> {
        if let Err(e) = self.wait_router_active(router_id, deadline).await {
            return vec![e];
        }

        if let Some(gateway) = &record.gateway {
            let set_gateway = self.bounded(
                deadline,
                "set router gateway",
                self.provider.set_router_gateway(router_id, gateway),
            );
            if let Err(e) = set_gateway.await {
                return vec![format!("router {} set gateway: {}", router_id, e)];
            }
            debug!(router = %router_id, network = %gateway.network_id, "Restored router gateway");
        }

        if let Err(e) = self.wait_router_active(router_id, deadline).await {
            return vec![e];
        }

        self.restore_fips(fips, deadline).await
    }

    async fn restore_fips(&self, fips: &[(&str, &FipRecord)], deadline: Instant) -> Vec<String> {
        join_all(fips.iter().map(|(id, fip)| self.restore_fip(id, fip, deadline)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Re-apply association, QoS and port-forwardings of one floating IP.
    async fn restore_fip(&self, fip_id: &str, fip: &FipRecord, deadline: Instant) -> Option<String> {
        let result: Result<()> = async {
            if let Some(port) = &fip.port {
                self.bounded(
                    deadline,
                    "associate",
                    self.provider
                        .associate_floating_ip(fip_id, port, fip.fixed_ip.as_deref()),
                )
                .await?;
            }
            if let Some(qos) = &fip.qos_policy {
                self.bounded(
                    deadline,
                    "set QoS",
                    self.provider.set_port_qos(&fip.fip_port, qos),
                )
                .await?;
            }
            for rule in &fip.port_forwardings {
                self.bounded(
                    deadline,
                    "create port forwarding",
                    self.provider.create_port_forwarding(fip_id, rule),
                )
                .await?;
            }
            Ok::<(), CloudError>(())
        }
        .await;

        match result {
            Ok(()) => {
                debug!(fip = %fip_id, "Floating IP restored");
                None
            }
            Err(e) => {
                warn!(fip = %fip_id, "Floating IP restore failed: {}", e);
                Some(format!("floating IP {} restore: {}", fip_id, e))
            }
        }
    }

    /// Await one provider call, bounded by the run deadline and the token.
    async fn bounded<T>(
        &self,
        deadline: Instant,
        operation: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CloudError::Cancelled(operation.to_string())),
            result = tokio::time::timeout_at(deadline, call) => result
                .unwrap_or_else(|_| Err(CloudError::Timeout(operation.to_string()))),
        }
    }

    async fn wait_router_active(
        &self,
        router_id: &str,
        deadline: Instant,
    ) -> std::result::Result<(), String> {
        let target = ConvergenceTarget::new(["ACTIVE"], []);
        let remaining = deadline.saturating_duration_since(Instant::now());
        let config = PollConfig::new(
            self.config.router_active.interval,
            self.config.router_active.timeout.min(remaining),
        );
        let outcome = wait_for_status(
            config,
            &target,
            Some(&self.cancel),
            router_id,
            || self.provider.router_status(router_id),
        )
        .await
        .map_err(|e| format!("router {} status: {}", router_id, e))?;

        if outcome.is_converged() {
            Ok(())
        } else {
            Err(format!("router {} not ACTIVE: {}", router_id, outcome))
        }
    }
}
