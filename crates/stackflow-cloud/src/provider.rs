//! Resource provider trait and the per-type registry

use crate::catalog::ResourceType;
use crate::error::{CloudError, Result};
use crate::graph::TypeGraph;
use crate::poller::ConvergenceTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Lifecycle operations for one resource type.
///
/// Implementations wrap the control-plane endpoints for their type: building
/// request bodies, authenticating and parsing responses all happen behind
/// this trait. The orchestrators only decide when and how concurrently these
/// calls are made.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Create a resource from `payload` and return its provider id
    async fn create(&self, payload: &serde_json::Value) -> Result<String>;

    /// List every live resource of this type in the current scope
    async fn list(&self) -> Result<Vec<LiveResource>>;

    /// Delete one live resource
    async fn delete(&self, resource: &LiveResource) -> Result<()>;

    /// Read the current provider-side status of a resource
    async fn status(&self, id: &str) -> Result<String>;

    /// Terminal statuses to wait for after `create`.
    ///
    /// `None` means the create call is synchronous and no polling happens.
    fn convergence(&self) -> Option<ConvergenceTarget> {
        None
    }

    /// Turn the output of a dependency into the value this type expects.
    ///
    /// For example, a floating IP referencing a server needs the server's
    /// primary port, not the server id.
    async fn resolve_reference(
        &self,
        _dependency_type: &ResourceType,
        output: &str,
    ) -> Result<String> {
        Ok(output.to_string())
    }
}

/// One live resource as returned by [`ResourceProvider::list`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveResource {
    /// Provider-specific resource ID
    pub id: String,

    /// Owning parent, for sub-resources addressed through their parent
    /// (a router interface through its router, a QoS rule through its
    /// policy, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Fields reported back when the operation succeeds
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl LiveResource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            parent_id: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// Explicit resource type → provider mapping.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ResourceType, Arc<dyn ResourceProvider>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.providers.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("types", &types)
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        resource_type: ResourceType,
        provider: Arc<dyn ResourceProvider>,
    ) -> &mut Self {
        self.providers.insert(resource_type, provider);
        self
    }

    pub fn with(mut self, resource_type: ResourceType, provider: Arc<dyn ResourceProvider>) -> Self {
        self.register(resource_type, provider);
        self
    }

    pub fn get(&self, resource_type: &ResourceType) -> Result<&Arc<dyn ResourceProvider>> {
        self.providers
            .get(resource_type)
            .ok_or_else(|| CloudError::ProviderNotFound(resource_type.clone()))
    }

    pub fn contains(&self, resource_type: &ResourceType) -> bool {
        self.providers.contains_key(resource_type)
    }

    /// Every type in `graph` must have a provider.
    pub fn validate(&self, graph: &TypeGraph) -> Result<()> {
        for resource_type in graph.types() {
            self.get(resource_type)?;
        }
        Ok(())
    }
}
