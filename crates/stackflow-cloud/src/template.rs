//! Declarative YAML templates
//!
//! ```yaml
//! resources:
//!   net:
//!     type: network
//!     properties:
//!       name: app-net
//!   subnet:
//!     type: subnet
//!     properties:
//!       network_id: net        # names another key, resolved at creation
//!       cidr: 10.0.0.0/24
//! ```

use crate::catalog::{DependencyCatalog, ResourceType};
use crate::error::{CloudError, Result};
use crate::graph::TypeGraph;
use crate::instance::ResourceInstance;
use crate::payload::PropertyPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Properties of each type that may hold a reference to another resource.
/// `*` stands for every index of an array.
pub fn reference_paths(resource_type: &ResourceType) -> &'static [&'static str] {
    match resource_type.as_str() {
        "subnet" => &["network_id"],
        "port" => &["network_id", "fixed_ips/*/subnet_id"],
        "router_interface" => &["router_id", "subnet_id"],
        "router_gateway" => &["router_id"],
        "floatingip" => &["port_id"],
        "server" => &["networks/*/uuid"],
        "firewall" => &["router_id"],
        _ => &[],
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,

    #[serde(default)]
    pub properties: Value,
}

/// A parsed template. Keys are the instance keys of the creation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default)]
    pub resources: BTreeMap<String, TemplateResource>,
}

impl Template {
    pub fn from_yaml(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&source)
    }

    /// Turn every resource into a [`ResourceInstance`], extracting
    /// references along the way.
    ///
    /// A string at a reference path that names another key becomes an
    /// unresolved reference and is cleared to `null` in the payload. Any
    /// other value is left alone, so literal provider ids pass through.
    ///
    /// A resource without a `name` property is named after its key.
    pub fn instances(&self, catalog: &DependencyCatalog) -> Result<Vec<ResourceInstance>> {
        let mut instances = Vec::with_capacity(self.resources.len());

        for (key, resource) in &self.resources {
            if !catalog.contains(&resource.resource_type) {
                return Err(CloudError::UnknownResourceType(
                    resource.resource_type.clone(),
                ));
            }

            let mut properties = resource.properties.clone();
            if properties.is_null() {
                properties = Value::Object(Default::default());
            }
            if let Value::Object(map) = &mut properties {
                map.entry("name")
                    .or_insert_with(|| Value::String(key.clone()));
            }

            let mut instance = ResourceInstance::new(
                key.clone(),
                resource.resource_type.clone(),
                properties,
            );

            for pattern in reference_paths(&resource.resource_type) {
                let segments: Vec<&str> = pattern.split('/').collect();
                let mut concrete = Vec::new();
                expand(&instance.properties, &segments, &mut Vec::new(), &mut concrete);

                for path in concrete {
                    let path = PropertyPath::parse(&path)?;
                    let dependency = match path.get(&instance.properties) {
                        Some(Value::String(s)) if s != key && self.resources.contains_key(s) => {
                            s.clone()
                        }
                        _ => continue,
                    };
                    path.set(&mut instance.properties, Value::Null)?;
                    instance.unresolved_refs.push(crate::instance::UnresolvedRef {
                        dependency,
                        path,
                    });
                }
            }

            instances.push(instance);
        }

        Ok(instances)
    }
}

/// Expand a pattern into the concrete paths present in `doc`.
fn expand(doc: &Value, pattern: &[&str], prefix: &mut Vec<String>, out: &mut Vec<String>) {
    match pattern.split_first() {
        None => out.push(prefix.join("/")),
        Some((&"*", rest)) => {
            if let Value::Array(items) = doc {
                for (i, item) in items.iter().enumerate() {
                    prefix.push(i.to_string());
                    expand(item, rest, prefix, out);
                    prefix.pop();
                }
            }
        }
        Some((field, rest)) => {
            if let Some(child) = doc.get(*field) {
                prefix.push((*field).to_string());
                expand(child, rest, prefix, out);
                prefix.pop();
            }
        }
    }
}

/// Instances grouped by type, in creation order.
#[derive(Debug, Clone)]
pub struct CreationPlan {
    pub groups: Vec<(ResourceType, Vec<ResourceInstance>)>,
}

impl CreationPlan {
    pub fn new(graph: &TypeGraph, instances: &[ResourceInstance]) -> Self {
        let groups = graph
            .creation_order()
            .into_iter()
            .filter_map(|resource_type| {
                let members: Vec<ResourceInstance> = instances
                    .iter()
                    .filter(|i| &i.resource_type == resource_type)
                    .cloned()
                    .collect();
                (!members.is_empty()).then(|| (resource_type.clone(), members))
            })
            .collect();
        Self { groups }
    }

    pub fn instance_count(&self) -> usize {
        self.groups.iter().map(|(_, members)| members.len()).sum()
    }
}

impl std::fmt::Display for CreationPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (resource_type, members) in &self.groups {
            writeln!(f, "{}:", resource_type)?;
            for instance in members {
                write!(f, "  {}", instance.key)?;
                if !instance.unresolved_refs.is_empty() {
                    let refs: Vec<String> = instance
                        .unresolved_refs
                        .iter()
                        .map(|r| format!("{} <- {}", r.path, r.dependency))
                        .collect();
                    write!(f, " ({})", refs.join(", "))?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
