//! Execution ordering over shared-schema dependencies
//!
//! A service that migrates against a schema owned by another service depends on
//! that owner. The plan is a stable topological order: owners first, otherwise
//! the configured table order.

use crate::{Error, Result, ServiceCatalog, ServiceDescriptor};
use std::collections::{BTreeSet, HashMap};

/// Dependency graph between services, keyed by table position
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Node names in table order
    nodes: Vec<String>,
    /// owner -> dependents (owner must finish migrating first)
    edges: HashMap<usize, Vec<usize>>,
    /// dependent -> owners
    reverse_edges: HashMap<usize, Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph for the given services; owners outside the set are ignored
    pub fn from_services(services: &[&ServiceDescriptor]) -> Self {
        let nodes: Vec<String> = services.iter().map(|s| s.name.clone()).collect();
        let index: HashMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut edges: HashMap<usize, Vec<usize>> = HashMap::new();
        let mut reverse_edges: HashMap<usize, Vec<usize>> = HashMap::new();

        for (node, service) in services.iter().enumerate() {
            for owner in service.schemas.iter().filter_map(|s| s.shared_from.as_deref()) {
                let Some(&owner) = index.get(owner) else {
                    continue;
                };
                let dependents = edges.entry(owner).or_default();
                if !dependents.contains(&node) {
                    dependents.push(node);
                    reverse_edges.entry(node).or_default().push(owner);
                }
            }
        }

        Self {
            nodes,
            edges,
            reverse_edges,
        }
    }

    /// Kahn's algorithm, always taking the earliest ready node in table order
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: Vec<usize> = (0..self.nodes.len())
            .map(|node| self.reverse_edges.get(&node).map_or(0, Vec::len))
            .collect();

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| node)
            .collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(node) = ready.pop_first() {
            result.push(self.nodes[node].clone());

            for &dependent in self.edges.get(&node).map(Vec::as_slice).unwrap_or(&[]) {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if result.len() != self.nodes.len() {
            return Err(Error::Plan("Circular dependency detected".to_string()));
        }

        Ok(result)
    }

    /// Owners of a service within the graph
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        let Some(node) = self.nodes.iter().position(|n| n == name) else {
            return Vec::new();
        };
        self.reverse_edges
            .get(&node)
            .map(|owners| owners.iter().map(|&o| self.nodes[o].as_str()).collect())
            .unwrap_or_default()
    }

    /// Connected components: services linked through shared schemas
    fn components(&self) -> Vec<usize> {
        let mut parent: Vec<usize> = (0..self.nodes.len()).collect();

        fn find(parent: &mut [usize], mut node: usize) -> usize {
            while parent[node] != node {
                parent[node] = parent[parent[node]];
                node = parent[node];
            }
            node
        }

        for (&owner, dependents) in &self.edges {
            for &dependent in dependents {
                let a = find(&mut parent, owner);
                let b = find(&mut parent, dependent);
                if a != b {
                    parent[a.max(b)] = a.min(b);
                }
            }
        }

        (0..self.nodes.len()).map(|n| find(&mut parent, n)).collect()
    }
}

/// Ordered set of services for one run
#[derive(Debug, Clone)]
pub struct RunPlan {
    services: Vec<ServiceDescriptor>,
    lanes: Vec<Vec<String>>,
    graph: DependencyGraph,
}

impl RunPlan {
    /// Build a plan over the catalog; an empty selection means every service
    pub fn build(catalog: &ServiceCatalog, selection: &[String]) -> Result<Self> {
        for name in selection {
            if catalog.get(name).is_none() {
                return Err(Error::Plan(format!(
                    "unknown service '{}' (known: {})",
                    name,
                    catalog.names().join(", ")
                )));
            }
        }

        let selected: Vec<&ServiceDescriptor> = catalog
            .iter()
            .filter(|s| selection.is_empty() || selection.contains(&s.name))
            .collect();

        let graph = DependencyGraph::from_services(&selected);
        let order = graph.topological_sort()?;

        let services: Vec<ServiceDescriptor> = order
            .iter()
            .filter_map(|name| catalog.get(name).cloned())
            .collect();

        let components = graph.components();
        let mut lanes: Vec<(usize, Vec<String>)> = Vec::new();
        for name in &order {
            let Some(node) = graph.nodes.iter().position(|n| n == name) else {
                continue;
            };
            let root = components[node];
            match lanes.iter_mut().find(|(r, _)| *r == root) {
                Some((_, lane)) => lane.push(name.clone()),
                None => lanes.push((root, vec![name.clone()])),
            }
        }

        Ok(Self {
            services,
            lanes: lanes.into_iter().map(|(_, lane)| lane).collect(),
            graph,
        })
    }

    /// Services in execution order
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Service names in execution order
    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    /// Look up a planned service
    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Number of planned services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True when nothing is planned
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Whether a service is part of the plan
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Groups of services that must run one after another; lanes are independent
    pub fn lanes(&self) -> &[Vec<String>] {
        &self.lanes
    }

    /// Planned owners a service waits for
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        self.graph.dependencies_of(name)
    }
}
