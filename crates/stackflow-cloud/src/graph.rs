//! Type graph built from the dependency catalog

use crate::barrier::Barrier;
use crate::catalog::{DependencyCatalog, ResourceType};
use crate::error::{CloudError, Result};
use std::collections::{HashMap, VecDeque};

/// One resource type with its edges and barriers.
///
/// Edges are indices into [`TypeGraph::nodes`].
#[derive(Debug)]
pub struct TypeNode {
    pub resource_type: ResourceType,

    /// Types this type depends on (forward edges)
    pub depends_on: Vec<usize>,

    /// Types depending on this type (backward edges)
    pub depended_on_by: Vec<usize>,

    /// Subset of `depends_on` whose delete barrier this type signals
    pub blocking_dependencies: Vec<usize>,

    /// Released once every dependency finished creating
    pub create_barrier: Barrier,

    /// Released once every blocking dependent finished deleting
    pub delete_barrier: Barrier,
}

/// Cross-linked DAG of resource types.
///
/// Built once per orchestration run: the barriers inside each node are
/// consumed by that run.
#[derive(Debug)]
pub struct TypeGraph {
    nodes: Vec<TypeNode>,
    index: HashMap<ResourceType, usize>,
    topo_order: Vec<usize>,
}

impl TypeGraph {
    /// Build the graph, failing fast on any configuration error.
    pub fn build(catalog: &DependencyCatalog) -> Result<Self> {
        let mut index = HashMap::with_capacity(catalog.len());
        for (i, entry) in catalog.entries().iter().enumerate() {
            if index.insert(entry.resource_type.clone(), i).is_some() {
                return Err(CloudError::DuplicateType(entry.resource_type.clone()));
            }
        }

        let mut depends_on: Vec<Vec<usize>> = vec![Vec::new(); catalog.len()];
        let mut blocking: Vec<Vec<usize>> = vec![Vec::new(); catalog.len()];
        let mut depended_on_by: Vec<Vec<usize>> = vec![Vec::new(); catalog.len()];
        let mut delete_capacity = vec![0usize; catalog.len()];

        for (i, entry) in catalog.entries().iter().enumerate() {
            for dep in &entry.depends_on {
                let j = *index.get(&dep.resource_type).ok_or_else(|| {
                    CloudError::UnknownDependency {
                        dependent: entry.resource_type.clone(),
                        dependency: dep.resource_type.clone(),
                    }
                })?;
                if j == i {
                    return Err(CloudError::CircularDependency(format!(
                        "{} depends on itself",
                        entry.resource_type
                    )));
                }
                // Repeated edges collapse into one
                if depends_on[i].contains(&j) {
                    continue;
                }
                depends_on[i].push(j);
                depended_on_by[j].push(i);
                if dep.blocking {
                    blocking[i].push(j);
                    delete_capacity[j] += 1;
                }
            }
        }

        let topo_order = topological_order(&depends_on, &depended_on_by).map_err(|stuck| {
            let names: Vec<&str> = stuck
                .iter()
                .map(|&i| catalog.entries()[i].resource_type.as_str())
                .collect();
            CloudError::CircularDependency(names.join(", "))
        })?;

        let nodes = catalog
            .entries()
            .iter()
            .enumerate()
            .map(|(i, entry)| TypeNode {
                resource_type: entry.resource_type.clone(),
                create_barrier: Barrier::new(depends_on[i].len()),
                delete_barrier: Barrier::new(delete_capacity[i]),
                depends_on: std::mem::take(&mut depends_on[i]),
                depended_on_by: std::mem::take(&mut depended_on_by[i]),
                blocking_dependencies: std::mem::take(&mut blocking[i]),
            })
            .collect();

        Ok(Self {
            nodes,
            index,
            topo_order,
        })
    }

    pub fn nodes(&self) -> &[TypeNode] {
        &self.nodes
    }

    pub fn node(&self, i: usize) -> &TypeNode {
        &self.nodes[i]
    }

    pub fn index_of(&self, resource_type: &ResourceType) -> Option<usize> {
        self.index.get(resource_type).copied()
    }

    pub fn get(&self, resource_type: &ResourceType) -> Option<&TypeNode> {
        self.index_of(resource_type).map(|i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Types in catalog declaration order.
    pub fn types(&self) -> impl Iterator<Item = &ResourceType> {
        self.nodes.iter().map(|n| &n.resource_type)
    }

    /// One valid creation order (dependencies first).
    pub fn creation_order(&self) -> Vec<&ResourceType> {
        self.topo_order
            .iter()
            .map(|&i| &self.nodes[i].resource_type)
            .collect()
    }

    /// One valid deletion order (dependents first).
    pub fn deletion_order(&self) -> Vec<&ResourceType> {
        self.topo_order
            .iter()
            .rev()
            .map(|&i| &self.nodes[i].resource_type)
            .collect()
    }

    pub fn dependencies_of(&self, resource_type: &ResourceType) -> Vec<&ResourceType> {
        self.get(resource_type)
            .map(|n| {
                n.depends_on
                    .iter()
                    .map(|&j| &self.nodes[j].resource_type)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn dependents_of(&self, resource_type: &ResourceType) -> Vec<&ResourceType> {
        self.get(resource_type)
            .map(|n| {
                n.depended_on_by
                    .iter()
                    .map(|&j| &self.nodes[j].resource_type)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Kahn's algorithm. Ties are broken by declaration order so the result is
/// stable. On a cycle, returns the nodes that could not be ordered.
fn topological_order(
    depends_on: &[Vec<usize>],
    depended_on_by: &[Vec<usize>],
) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let mut remaining: Vec<usize> = depends_on.iter().map(Vec::len).collect();
    let mut ready: VecDeque<usize> = (0..depends_on.len())
        .filter(|&i| remaining[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(depends_on.len());

    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &dependent in &depended_on_by[i] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }

    if order.len() == depends_on.len() {
        Ok(order)
    } else {
        Err((0..depends_on.len()).filter(|&i| remaining[i] > 0).collect())
    }
}
