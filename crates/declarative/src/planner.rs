//! Execution planner - orders a changeset into waves
//!
//! Every change expands into one or two steps (a replacement is a create
//! of the same id plus either a delete of the old instance or, when the new
//! instance comes first, a retire of it). Steps are linked by ordering edges and
//! layered with Kahn's algorithm: each wave holds the steps whose
//! predecessors have all been scheduled in earlier waves, so the members
//! of a wave can run concurrently.

use crate::diff::ChangeSet;
use crate::error::{Error, Result};
use crate::graph::Graph;
use crate::policy::PolicyTable;
use crate::state::Snapshot;
use crate::types::{Action, ReplaceStrategy, ResourceId};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Provider operation a step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
    /// Delete superseded instances while keeping the current one
    Retire,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Retire => "retire",
        })
    }
}

/// Identity of a step: one operation on one resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct StepKey {
    pub resource_id: ResourceId,
    pub operation: Operation,
}

impl StepKey {
    pub fn new(resource_id: ResourceId, operation: Operation) -> Self {
        Self {
            resource_id,
            operation,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operation, self.resource_id)
    }
}

/// A single provider operation in the plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub resource_id: ResourceId,
    pub operation: Operation,
    /// Change this step belongs to
    pub action: Action,
    /// Steps that must complete before this one starts
    pub after: Vec<StepKey>,
}

impl Step {
    fn new(resource_id: ResourceId, operation: Operation, action: Action) -> Self {
        Self {
            resource_id,
            operation,
            action,
            after: Vec::new(),
        }
    }

    pub fn key(&self) -> StepKey {
        StepKey::new(self.resource_id.clone(), self.operation)
    }

    /// Whether this step is one half of a replacement
    pub fn is_replacement(&self) -> bool {
        self.action == Action::Replace
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_replacement(), self.operation) {
            (_, Operation::Retire) | (true, Operation::Delete) => {
                write!(f, "delete {} (replaced)", self.resource_id)
            }
            (true, _) => write!(f, "create {} (replacement)", self.resource_id),
            _ => write!(f, "{} {}", self.operation, self.resource_id),
        }
    }
}

/// Ordered waves of steps
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Plan {
    pub waves: Vec<Vec<Step>>,
}

impl Plan {
    /// Order a changeset into waves
    ///
    /// `graph` supplies the desired dependency edges, `snapshot` the edges
    /// recorded at the last apply (used to order deletions).
    pub fn build(
        changes: &ChangeSet,
        graph: &Graph,
        snapshot: &Snapshot,
        policies: &PolicyTable,
    ) -> Result<Self> {
        let strategies = replace_strategies(changes, graph, policies);

        let mut steps: Vec<Step> = Vec::new();
        for change in changes.pending() {
            let id = change.resource_id.clone();
            match change.action {
                Action::Create => steps.push(Step::new(id, Operation::Create, Action::Create)),
                Action::Update => steps.push(Step::new(id, Operation::Update, Action::Update)),
                Action::Delete => steps.push(Step::new(id, Operation::Delete, Action::Delete)),
                Action::Replace => {
                    let old = match strategies.get(&id) {
                        Some(ReplaceStrategy::CreateBeforeDelete) => Operation::Retire,
                        _ => Operation::Delete,
                    };
                    steps.push(Step::new(id.clone(), Operation::Create, Action::Replace));
                    steps.push(Step::new(id, old, Action::Replace));
                }
                Action::NoOp => {}
            }

            // Leftovers of an earlier replacement; deletes and replacements
            // already take them along.
            if !change.deposed.is_empty() {
                match change.action {
                    Action::NoOp => steps.push(Step::new(
                        change.resource_id.clone(),
                        Operation::Retire,
                        Action::Replace,
                    )),
                    Action::Update => steps.push(Step::new(
                        change.resource_id.clone(),
                        Operation::Retire,
                        Action::Update,
                    )),
                    _ => {}
                }
            }
        }

        let present: BTreeSet<StepKey> = steps.iter().map(Step::key).collect();
        let has = |id: &ResourceId, operation: Operation| {
            present.contains(&StepKey::new(id.clone(), operation))
        };

        for step in &mut steps {
            let id = step.resource_id.clone();
            let mut after = BTreeSet::new();

            match step.operation {
                Operation::Create | Operation::Update => {
                    for dep in graph.dependencies(&id) {
                        for op in [Operation::Create, Operation::Update] {
                            if has(dep, op) {
                                after.insert(StepKey::new(dep.clone(), op));
                            }
                        }
                    }
                    if step.is_replacement()
                        && strategies.get(&id) == Some(&ReplaceStrategy::DeleteBeforeCreate)
                    {
                        after.insert(StepKey::new(id.clone(), Operation::Delete));
                    }
                }
                Operation::Delete | Operation::Retire => {
                    let retire = step.operation == Operation::Retire;
                    // Dependents must stop using the old instance first,
                    // unless it goes away before its replacement exists.
                    let wait_for_users = retire
                        || strategies.get(&id) != Some(&ReplaceStrategy::DeleteBeforeCreate);
                    for dependent in snapshot.dependents(&id) {
                        if dependent == &id {
                            continue;
                        }
                        let mut ops = vec![Operation::Delete];
                        if wait_for_users {
                            ops.extend([Operation::Retire, Operation::Create, Operation::Update]);
                        }
                        for op in ops {
                            if has(dependent, op) {
                                after.insert(StepKey::new(dependent.clone(), op));
                            }
                        }
                    }
                    // Only superseded instances go; the current one stays
                    if retire {
                        for op in [Operation::Create, Operation::Update] {
                            if has(&id, op) {
                                after.insert(StepKey::new(id.clone(), op));
                            }
                        }
                    }
                }
            }

            step.after = after.into_iter().collect();
        }

        let plan = Self {
            waves: layer(steps)?,
        };
        log::debug!(
            "Planned {} steps in {} waves",
            plan.step_count(),
            plan.waves.len()
        );
        Ok(plan)
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub fn step_count(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    /// All steps, wave by wave
    pub fn steps(&self) -> impl Iterator<Item = &Step> {
        self.waves.iter().flatten()
    }

    /// Index of the wave holding a step
    pub fn wave_of(&self, key: &StepKey) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|s| &s.key() == key))
    }
}

/// Replace strategy per replaced resource
///
/// A create-before-delete resource forces the same strategy onto every
/// replaced dependency; otherwise its new instance would wait on a
/// dependency that waits for the old instance to be gone.
fn replace_strategies(
    changes: &ChangeSet,
    graph: &Graph,
    policies: &PolicyTable,
) -> HashMap<ResourceId, ReplaceStrategy> {
    let mut strategies: HashMap<ResourceId, ReplaceStrategy> = changes
        .pending()
        .filter(|c| c.action == Action::Replace)
        .map(|c| {
            (
                c.resource_id.clone(),
                policies.strategy(&c.resource_id.kind),
            )
        })
        .collect();

    loop {
        let forced: Vec<ResourceId> = strategies
            .iter()
            .filter(|(_, s)| **s == ReplaceStrategy::CreateBeforeDelete)
            .flat_map(|(id, _)| graph.dependencies(id))
            .filter(|dep| strategies.get(*dep) == Some(&ReplaceStrategy::DeleteBeforeCreate))
            .cloned()
            .collect();
        if forced.is_empty() {
            return strategies;
        }
        for id in forced {
            log::debug!("Replacing {id} create-before-delete to match a dependent");
            strategies.insert(id, ReplaceStrategy::CreateBeforeDelete);
        }
    }
}

/// Kahn's algorithm, one layer per wave
fn layer(steps: Vec<Step>) -> Result<Vec<Vec<Step>>> {
    let index: HashMap<StepKey, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.key(), i))
        .collect();

    let mut in_degree: Vec<usize> = steps.iter().map(|s| s.after.len()).collect();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, step) in steps.iter().enumerate() {
        for key in &step.after {
            if let Some(&j) = index.get(key) {
                successors[j].push(i);
            }
        }
    }

    let mut ready: Vec<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut layers: Vec<Vec<usize>> = Vec::new();
    let mut scheduled = 0;

    while !ready.is_empty() {
        let mut next = Vec::new();
        for &i in &ready {
            for &j in &successors[i] {
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    next.push(j);
                }
            }
        }
        next.sort_unstable();
        scheduled += ready.len();
        layers.push(std::mem::replace(&mut ready, next));
    }

    if scheduled < steps.len() {
        let remaining = steps
            .iter()
            .zip(&in_degree)
            .filter(|(_, degree)| **degree > 0)
            .map(|(s, _)| s.to_string())
            .collect();
        return Err(Error::UnresolvableGraph { remaining });
    }

    let mut slots: Vec<Option<Step>> = steps.into_iter().map(Some).collect();
    Ok(layers
        .into_iter()
        .map(|layer| layer.into_iter().filter_map(|i| slots[i].take()).collect())
        .collect())
}
