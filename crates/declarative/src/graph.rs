//! Resource graph construction
//!
//! Edges come from explicit `depends_on` plus every resource referenced
//! from a property value. The graph is checked for unknown references and
//! cycles up front, so nothing downstream has to.

use crate::error::{Error, Result};
use crate::resource::Resource;
use crate::types::ResourceId;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

static NO_EDGES: BTreeSet<ResourceId> = BTreeSet::new();

/// Immutable, acyclic graph of desired resources
#[derive(Debug, Clone, Default)]
pub struct Graph {
    /// Resources in declaration order
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
    dependencies: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
    dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>>,
}

impl Graph {
    /// Build a graph from declarations
    ///
    /// Fails on duplicate ids, references to undeclared resources and
    /// cycles (naming every member of the first cycle found).
    pub fn build(resources: Vec<Resource>) -> Result<Self> {
        let mut index = HashMap::with_capacity(resources.len());
        for (position, resource) in resources.iter().enumerate() {
            if index.insert(resource.id.clone(), position).is_some() {
                return Err(Error::DuplicateResource(resource.id.clone()));
            }
        }

        let mut dependencies: BTreeMap<ResourceId, BTreeSet<ResourceId>> = BTreeMap::new();
        let mut dependents: BTreeMap<ResourceId, BTreeSet<ResourceId>> = BTreeMap::new();
        for resource in &resources {
            let deps = resource.dependencies();
            for dep in &deps {
                if !index.contains_key(dep) {
                    return Err(Error::UnknownReference {
                        from: resource.id.clone(),
                        to: dep.clone(),
                    });
                }
                if dep == &resource.id {
                    return Err(Error::Cycle {
                        members: vec![resource.id.clone()],
                    });
                }
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(resource.id.clone());
            }
            dependencies.insert(resource.id.clone(), deps);
        }

        let graph = Self {
            resources,
            index,
            dependencies,
            dependents,
        };
        graph.check_acyclic()?;

        log::debug!(
            "Built resource graph: {} resources, {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<()> {
        let mut dag: DiGraph<usize, ()> = DiGraph::with_capacity(self.len(), self.edge_count());
        let nodes: Vec<NodeIndex> = (0..self.len()).map(|i| dag.add_node(i)).collect();
        for (id, deps) in &self.dependencies {
            let to = nodes[self.index[id]];
            for dep in deps {
                dag.add_edge(nodes[self.index[dep]], to, ());
            }
        }

        let cycle = tarjan_scc(&dag)
            .into_iter()
            .filter(|component| component.len() > 1)
            .min_by_key(|component| component.iter().map(|n| dag[*n]).min());

        match cycle {
            None => Ok(()),
            Some(component) => {
                let mut positions: Vec<usize> = component.iter().map(|n| dag[*n]).collect();
                positions.sort_unstable();
                Err(Error::Cycle {
                    members: positions
                        .into_iter()
                        .map(|p| self.resources[p].id.clone())
                        .collect(),
                })
            }
        }
    }

    /// Resources in declaration order
    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).map(|&i| &self.resources[i])
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }

    /// Direct dependencies of a resource
    pub fn dependencies(&self, id: &ResourceId) -> &BTreeSet<ResourceId> {
        self.dependencies.get(id).unwrap_or(&NO_EDGES)
    }

    /// Resources that directly depend on `id`
    pub fn dependents(&self, id: &ResourceId) -> &BTreeSet<ResourceId> {
        self.dependents.get(id).unwrap_or(&NO_EDGES)
    }

    /// Every resource that depends on `id`, directly or not
    pub fn transitive_dependents(&self, id: &ResourceId) -> BTreeSet<ResourceId> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<&ResourceId> = self.dependents(id).iter().collect();
        while let Some(next) = queue.pop_front() {
            if seen.insert(next.clone()) {
                queue.extend(self.dependents(next));
            }
        }
        seen
    }

    /// Resources ordered so that dependencies come first
    ///
    /// Ties keep declaration order.
    pub fn topological_order(&self) -> Vec<&Resource> {
        let mut in_degree: Vec<usize> = self
            .resources
            .iter()
            .map(|r| self.dependencies(&r.id).len())
            .collect();
        let mut ready: VecDeque<usize> = (0..self.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.len());

        while let Some(i) = ready.pop_front() {
            let resource = &self.resources[i];
            order.push(resource);
            let mut released: Vec<usize> = Vec::new();
            for dependent in self.dependents(&resource.id) {
                let j = self.index[dependent];
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    released.push(j);
                }
            }
            released.sort_unstable();
            ready.extend(released);
        }
        order
    }
}
