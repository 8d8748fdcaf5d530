//! Resource types and the static dependency catalog

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Category of cloud object (network, router, ...).
///
/// Opaque and stable; used as a map key throughout a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceType(Cow<'static, str>);

impl ResourceType {
    pub const SECURITY_GROUP: ResourceType = ResourceType::from_static("security_group");
    pub const QOS_POLICY: ResourceType = ResourceType::from_static("qos_policy");
    pub const ROUTER: ResourceType = ResourceType::from_static("router");
    pub const VOLUME: ResourceType = ResourceType::from_static("volume");
    pub const SECURITY_GROUP_RULE: ResourceType = ResourceType::from_static("security_group_rule");
    pub const BANDWIDTH_LIMIT_RULE: ResourceType =
        ResourceType::from_static("bandwidth_limit_rule");
    pub const DSCP_MARKING_RULE: ResourceType = ResourceType::from_static("dscp_marking_rule");
    pub const MINIMUM_BANDWIDTH_RULE: ResourceType =
        ResourceType::from_static("minimum_bandwidth_rule");
    pub const NETWORK: ResourceType = ResourceType::from_static("network");
    pub const SUBNET: ResourceType = ResourceType::from_static("subnet");
    pub const PORT: ResourceType = ResourceType::from_static("port");
    pub const ROUTER_INTERFACE: ResourceType = ResourceType::from_static("router_interface");
    pub const ROUTER_GATEWAY: ResourceType = ResourceType::from_static("router_gateway");
    pub const ROUTER_ROUTE: ResourceType = ResourceType::from_static("router_route");
    pub const SNAPSHOT: ResourceType = ResourceType::from_static("snapshot");
    pub const SERVER: ResourceType = ResourceType::from_static("server");
    pub const FLOATING_IP: ResourceType = ResourceType::from_static("floatingip");
    pub const FIREWALL_RULE: ResourceType = ResourceType::from_static("firewall_rule");
    pub const FIREWALL_POLICY: ResourceType = ResourceType::from_static("firewall_policy");
    pub const FIREWALL: ResourceType = ResourceType::from_static("firewall");
    pub const VPC_CONNECTION: ResourceType = ResourceType::from_static("vpc_connection");

    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ResourceType {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// One depends-on edge of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// The type being depended on
    pub resource_type: ResourceType,

    /// Whether the dependent holds back deletion of `resource_type`.
    ///
    /// A non-blocking dependent neither counts toward nor signals the
    /// dependency's delete barrier. Creation ordering ignores this flag.
    pub blocking: bool,
}

impl Dependency {
    pub fn blocking(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            blocking: true,
        }
    }

    pub fn non_blocking(resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            blocking: false,
        }
    }
}

/// Catalog entry: a resource type and what it depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub resource_type: ResourceType,
    pub depends_on: Vec<Dependency>,
}

/// Static mapping from resource type to the types it depends on.
///
/// Declaration order is significant: it is the fixed ordering used when
/// reporting, so that reports read the same from run to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCatalog {
    entries: Vec<CatalogEntry>,
}

impl DependencyCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style declaration; every edge is blocking.
    pub fn with(mut self, resource_type: ResourceType, depends_on: &[ResourceType]) -> Self {
        self.declare(
            resource_type,
            depends_on.iter().cloned().map(Dependency::blocking).collect(),
        );
        self
    }

    pub fn declare(&mut self, resource_type: ResourceType, depends_on: Vec<Dependency>) {
        self.entries.push(CatalogEntry {
            resource_type,
            depends_on,
        });
    }

    /// Mark the edge `dependent → dependency` as non-blocking for deletion.
    ///
    /// Returns `false` when no such edge is declared.
    pub fn set_non_blocking(
        &mut self,
        dependent: &ResourceType,
        dependency: &ResourceType,
    ) -> bool {
        let edge = self
            .entries
            .iter_mut()
            .filter(|e| &e.resource_type == dependent)
            .flat_map(|e| e.depends_on.iter_mut())
            .find(|d| &d.resource_type == dependency);

        match edge {
            Some(edge) => {
                edge.blocking = false;
                true
            }
            None => false,
        }
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn types(&self) -> impl Iterator<Item = &ResourceType> {
        self.entries.iter().map(|e| &e.resource_type)
    }

    pub fn get(&self, resource_type: &ResourceType) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|e| &e.resource_type == resource_type)
    }

    pub fn contains(&self, resource_type: &ResourceType) -> bool {
        self.get(resource_type).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The network/compute/storage catalog managed by default.
pub fn default_catalog() -> DependencyCatalog {
    use ResourceType as T;

    DependencyCatalog::new()
        .with(T::SECURITY_GROUP, &[])
        .with(T::QOS_POLICY, &[])
        .with(T::ROUTER, &[])
        .with(T::VOLUME, &[])
        .with(T::SECURITY_GROUP_RULE, &[T::SECURITY_GROUP])
        .with(T::BANDWIDTH_LIMIT_RULE, &[T::QOS_POLICY])
        .with(T::DSCP_MARKING_RULE, &[T::QOS_POLICY])
        .with(T::MINIMUM_BANDWIDTH_RULE, &[T::QOS_POLICY])
        .with(T::NETWORK, &[T::QOS_POLICY])
        .with(T::SUBNET, &[T::NETWORK])
        .with(T::PORT, &[T::SUBNET, T::SECURITY_GROUP, T::QOS_POLICY])
        .with(T::ROUTER_INTERFACE, &[T::ROUTER, T::PORT])
        .with(T::ROUTER_GATEWAY, &[T::ROUTER, T::PORT])
        .with(T::ROUTER_ROUTE, &[T::ROUTER_INTERFACE, T::ROUTER_GATEWAY])
        .with(T::SNAPSHOT, &[T::VOLUME])
        .with(T::SERVER, &[T::SECURITY_GROUP, T::PORT, T::VOLUME])
        .with(
            T::FLOATING_IP,
            &[T::SERVER, T::ROUTER_GATEWAY, T::ROUTER_INTERFACE],
        )
        .with(T::FIREWALL_RULE, &[T::PORT])
        .with(T::FIREWALL_POLICY, &[T::FIREWALL_RULE])
        .with(T::FIREWALL, &[T::FIREWALL_POLICY, T::ROUTER])
        .with(
            T::VPC_CONNECTION,
            &[T::ROUTER_INTERFACE, T::ROUTER_GATEWAY, T::FIREWALL],
        )
}
