//! Declared resource instances awaiting creation

use crate::catalog::ResourceType;
use crate::error::Result;
use crate::payload::PropertyPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A property that must be filled with another instance's output before
/// this instance can be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedRef {
    /// Key of the referenced instance in the same run
    pub dependency: String,
    /// Where the resolved value goes in the payload
    pub path: PropertyPath,
}

/// One resource to create.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstance {
    /// Unique key within the run
    pub key: String,

    pub resource_type: ResourceType,

    /// Request payload; referenced properties hold placeholders until
    /// resolution
    #[serde(default)]
    pub properties: Value,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_refs: Vec<UnresolvedRef>,
}

impl ResourceInstance {
    pub fn new(key: impl Into<String>, resource_type: ResourceType, properties: Value) -> Self {
        Self {
            key: key.into(),
            resource_type,
            properties,
            unresolved_refs: Vec::new(),
        }
    }

    /// Add a reference to `dependency`, written at `path` once resolved.
    pub fn with_ref(mut self, dependency: impl Into<String>, path: &str) -> Result<Self> {
        self.unresolved_refs.push(UnresolvedRef {
            dependency: dependency.into(),
            path: PropertyPath::parse(path)?,
        });
        Ok(self)
    }

    /// Keys of every instance this one waits for, without duplicates.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for r in &self.unresolved_refs {
            if !keys.contains(&r.dependency.as_str()) {
                keys.push(&r.dependency);
            }
        }
        keys
    }
}
