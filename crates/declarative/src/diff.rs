//! Diff computation between the desired graph and the last-applied state

use crate::error::ResolveError;
use crate::graph::Graph;
use crate::policy::PolicyTable;
use crate::resource::Resource;
use crate::state::{LiveResource, Snapshot};
use crate::types::{Action, ResourceId};
use crate::value::OutputRef;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::{BTreeSet, HashMap};

/// Difference in a single property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub name: String,
    /// Value recorded in state, if any
    pub before: Option<Json>,
    /// Desired value; `None` when removed or not known until apply
    pub after: Option<Json>,
    /// Desired value depends on an output that will only exist after apply
    pub unknown: bool,
    /// Changing this property forces a replacement
    pub immutable: bool,
}

/// Planned action for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub resource_id: ResourceId,
    pub action: Action,
    /// Human-readable cause
    pub reason: String,
    /// Property-level differences (update/replace only)
    #[serde(default)]
    pub properties: Vec<PropertyChange>,
    /// Superseded instances left over from an earlier replacement
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deposed: Vec<String>,
}

impl Change {
    fn new(resource_id: ResourceId, action: Action, reason: impl Into<String>) -> Self {
        Self {
            resource_id,
            action,
            reason: reason.into(),
            properties: Vec::new(),
            deposed: Vec::new(),
        }
    }

    /// Whether this change needs any provider call
    pub fn is_pending(&self) -> bool {
        self.action.is_change() || !self.deposed.is_empty()
    }
}

/// Per-resource actions moving current state to desired state
///
/// Desired resources come first in dependency order, followed by
/// deletions of resources no longer declared.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<Change>,
}

impl ChangeSet {
    pub fn get(&self, id: &ResourceId) -> Option<&Change> {
        self.changes.iter().find(|c| &c.resource_id == id)
    }

    /// Action decided for a resource
    pub fn action(&self, id: &ResourceId) -> Option<Action> {
        self.get(id).map(|c| c.action)
    }

    /// Changes that need provider calls
    pub fn pending(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.is_pending())
    }

    pub fn has_changes(&self) -> bool {
        self.pending().next().is_some()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_changes(&self.changes)
    }
}

/// Compute the changeset for a desired graph against a snapshot
pub fn compute_changes(graph: &Graph, snapshot: &Snapshot, policies: &PolicyTable) -> ChangeSet {
    let mut actions: HashMap<ResourceId, Action> = HashMap::with_capacity(graph.len());
    let mut changes = Vec::with_capacity(graph.len() + snapshot.len());

    for resource in graph.topological_order() {
        let change = match snapshot.get(&resource.id) {
            None => Change::new(resource.id.clone(), Action::Create, "not in state"),
            Some(live) => {
                let mut change = diff_resource(resource, live, snapshot, &actions, policies);
                if !live.deposed.is_empty() {
                    if change.action == Action::NoOp {
                        change.reason = format!(
                            "{} superseded instance(s) awaiting deletion",
                            live.deposed.len()
                        );
                    }
                    change.deposed.clone_from(&live.deposed);
                }
                change
            }
        };
        actions.insert(resource.id.clone(), change.action);
        changes.push(change);
    }

    for live in snapshot.iter() {
        if !graph.contains(&live.id) {
            let mut change = Change::new(
                live.id.clone(),
                Action::Delete,
                "removed from configuration",
            );
            change.deposed.clone_from(&live.deposed);
            changes.push(change);
        }
    }

    let changeset = ChangeSet { changes };
    let summary = changeset.summary();
    log::debug!(
        "Computed changes: {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
        summary.creates,
        summary.updates,
        summary.replaces,
        summary.deletes,
        summary.unchanged
    );
    changeset
}

/// Changeset deleting everything recorded in state
pub fn compute_destroy(snapshot: &Snapshot) -> ChangeSet {
    compute_changes(&Graph::default(), snapshot, &PolicyTable::default())
}

fn diff_resource(
    resource: &Resource,
    live: &LiveResource,
    snapshot: &Snapshot,
    actions: &HashMap<ResourceId, Action>,
    policies: &PolicyTable,
) -> Change {
    // References resolve against state only when the target keeps its
    // outputs: unchanged targets fully, updated targets only for `id`.
    let lookup = |r: &OutputRef| -> Result<Option<Json>, ResolveError> {
        let stable = match actions.get(&r.resource) {
            Some(Action::NoOp) => true,
            Some(Action::Update) => r.path.len() == 1 && r.attribute() == "id",
            _ => false,
        };
        Ok(stable
            .then(|| snapshot.outputs(&r.resource))
            .flatten()
            .and_then(|outputs| r.lookup(outputs).ok()))
    };

    let names: BTreeSet<&String> = resource
        .properties
        .keys()
        .chain(live.properties.keys())
        .collect();

    let mut properties = Vec::new();
    for name in names {
        let before = live.properties.get(name.as_str());
        let (after, unknown) = match resource.properties.get(name.as_str()) {
            Some(value) => match value.resolve_with(&lookup) {
                Ok(Some(resolved)) => (Some(resolved), false),
                _ => (None, true),
            },
            None => (None, false),
        };

        if !unknown && after.as_ref() == before {
            continue;
        }
        properties.push(PropertyChange {
            name: name.clone(),
            before: before.cloned(),
            after,
            unknown,
            immutable: policies.is_immutable(resource.kind(), name),
        });
    }

    if properties.is_empty() {
        return Change::new(resource.id.clone(), Action::NoOp, "up to date");
    }

    let forcing: Vec<&str> = properties
        .iter()
        .filter(|p| p.immutable)
        .map(|p| p.name.as_str())
        .collect();
    let (action, reason) = if forcing.is_empty() {
        let changed: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
        (Action::Update, format!("changed {}", changed.join(", ")))
    } else {
        (
            Action::Replace,
            format!("{} forces replacement", forcing.join(", ")),
        )
    };

    Change {
        resource_id: resource.id.clone(),
        action,
        reason,
        properties,
        deposed: Vec::new(),
    }
}

/// Diff summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub creates: usize,
    pub updates: usize,
    pub replaces: usize,
    pub deletes: usize,
    pub unchanged: usize,
    /// Resources with superseded instances to delete
    pub retires: usize,
}

impl DiffSummary {
    /// Create a summary from a list of changes
    pub fn from_changes(changes: &[Change]) -> Self {
        let mut summary = Self::default();
        for change in changes {
            match change.action {
                Action::Create => summary.creates += 1,
                Action::Update => summary.updates += 1,
                Action::Replace => summary.replaces += 1,
                Action::Delete => summary.deletes += 1,
                Action::NoOp => summary.unchanged += 1,
            }
            if !change.deposed.is_empty() {
                summary.retires += 1;
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0 || self.retires > 0
    }
}

/// Group changes by resource kind
pub fn group_by_kind(changes: &[Change]) -> std::collections::BTreeMap<&str, Vec<&Change>> {
    let mut groups: std::collections::BTreeMap<&str, Vec<&Change>> =
        std::collections::BTreeMap::new();
    for change in changes {
        groups
            .entry(change.resource_id.kind.as_str())
            .or_default()
            .push(change);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::KindPolicy;
    use crate::types::Attributes;
    use crate::value::Value;
    use chrono::Utc;
    use serde_json::json;

    fn id(kind: &str, name: &str) -> ResourceId {
        ResourceId::new(kind, name)
    }

    fn attrs(pairs: &[(&str, Json)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn live(id: ResourceId, properties: Attributes, outputs: Attributes) -> LiveResource {
        LiveResource {
            id,
            provider_id: "p-1".into(),
            properties,
            outputs,
            depends_on: BTreeSet::new(),
            applied_at: Utc::now(),
            deposed: Vec::new(),
        }
    }

    fn desired() -> Graph {
        Graph::build(vec![
            Resource::new("vpc", "main").with_property("cidr_block", "10.0.0.0/16"),
            Resource::new("subnet", "a")
                .with_property("vpc_id", Value::reference(id("vpc", "main"), "id"))
                .with_property("cidr_block", "10.0.1.0/24"),
            Resource::new("cluster", "app").with_property("name", "app"),
        ])
        .unwrap()
    }

    fn applied() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.insert(live(
            id("vpc", "main"),
            attrs(&[("cidr_block", json!("10.0.0.0/16"))]),
            attrs(&[("id", json!("vpc-1")), ("cidr_block", json!("10.0.0.0/16"))]),
        ));
        snapshot.insert(live(
            id("subnet", "a"),
            attrs(&[
                ("vpc_id", json!("vpc-1")),
                ("cidr_block", json!("10.0.1.0/24")),
            ]),
            attrs(&[("id", json!("subnet-1"))]),
        ));
        snapshot.insert(live(
            id("cluster", "app"),
            attrs(&[("name", json!("app"))]),
            attrs(&[("id", json!("cluster-1"))]),
        ));
        snapshot
    }

    fn policies() -> PolicyTable {
        PolicyTable::new()
            .with_kind("vpc", KindPolicy::immutable(["cidr_block"]))
            .with_kind("subnet", KindPolicy::immutable(["vpc_id", "cidr_block"]))
    }

    #[test]
    fn test_empty_snapshot_creates_everything() {
        let changes = compute_changes(&desired(), &Snapshot::new(), &policies());
        assert!(changes.changes.iter().all(|c| c.action == Action::Create));
        assert_eq!(changes.summary().creates, 3);
    }

    #[test]
    fn test_applied_state_is_all_noop() {
        let changes = compute_changes(&desired(), &applied(), &policies());
        assert!(!changes.has_changes());
        assert_eq!(changes.summary().unchanged, 3);
    }

    #[test]
    fn test_immutable_change_replaces_only_that_resource() {
        let graph = Graph::build(vec![
            Resource::new("vpc", "main").with_property("cidr_block", "10.0.0.0/16"),
            Resource::new("subnet", "a")
                .with_property("vpc_id", Value::reference(id("vpc", "main"), "id"))
                .with_property("cidr_block", "10.0.9.0/24"),
            Resource::new("cluster", "app").with_property("name", "app"),
        ])
        .unwrap();

        let changes = compute_changes(&graph, &applied(), &policies());
        let pending: Vec<_> = changes.pending().collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].resource_id, id("subnet", "a"));
        assert_eq!(pending[0].action, Action::Replace);
        assert_eq!(pending[0].reason, "cidr_block forces replacement");
    }

    #[test]
    fn test_mutable_change_updates() {
        let graph = Graph::build(vec![
            Resource::new("vpc", "main").with_property("cidr_block", "10.0.0.0/16"),
            Resource::new("subnet", "a")
                .with_property("vpc_id", Value::reference(id("vpc", "main"), "id"))
                .with_property("cidr_block", "10.0.1.0/24"),
            Resource::new("cluster", "app")
                .with_property("name", "app")
                .with_property("insights", true),
        ])
        .unwrap();

        let changes = compute_changes(&graph, &applied(), &policies());
        let change = changes.get(&id("cluster", "app")).unwrap();
        assert_eq!(change.action, Action::Update);
        assert_eq!(change.properties[0].before, None);
        assert_eq!(change.properties[0].after, Some(json!(true)));
    }

    #[test]
    fn test_replaced_dependency_cascades_through_references() {
        let graph = Graph::build(vec![
            Resource::new("vpc", "main").with_property("cidr_block", "10.1.0.0/16"),
            Resource::new("subnet", "a")
                .with_property("vpc_id", Value::reference(id("vpc", "main"), "id"))
                .with_property("cidr_block", "10.0.1.0/24"),
            Resource::new("cluster", "app").with_property("name", "app"),
        ])
        .unwrap();

        let changes = compute_changes(&graph, &applied(), &policies());
        assert_eq!(changes.action(&id("vpc", "main")), Some(Action::Replace));

        let subnet = changes.get(&id("subnet", "a")).unwrap();
        assert_eq!(subnet.action, Action::Replace);
        assert!(subnet.properties[0].unknown);
        assert_eq!(changes.action(&id("cluster", "app")), Some(Action::NoOp));
    }

    #[test]
    fn test_updated_dependency_keeps_id_known() {
        let mut snapshot = applied();
        let vpc = snapshot.resources.get_mut(&id("vpc", "main")).unwrap();
        vpc.properties.insert("tags".into(), json!({"env": "dev"}));

        let changes = compute_changes(&desired(), &snapshot, &policies());
        assert_eq!(changes.action(&id("vpc", "main")), Some(Action::Update));
        assert_eq!(changes.action(&id("subnet", "a")), Some(Action::NoOp));
    }

    #[test]
    fn test_undeclared_resources_are_deleted() {
        let mut snapshot = applied();
        snapshot.insert(live(id("service", "old"), Attributes::new(), Attributes::new()));

        let changes = compute_changes(&desired(), &snapshot, &policies());
        let change = changes.get(&id("service", "old")).unwrap();
        assert_eq!(change.action, Action::Delete);
        assert_eq!(change.reason, "removed from configuration");
    }

    #[test]
    fn test_superseded_instances_keep_the_plan_pending() {
        let mut snapshot = applied();
        let mut vpc = snapshot.get(&id("vpc", "main")).cloned().unwrap();
        vpc.deposed.push("vpc-0".into());
        snapshot.insert(vpc);

        let changes = compute_changes(&desired(), &snapshot, &policies());
        let change = changes.get(&id("vpc", "main")).unwrap();
        assert_eq!(change.action, Action::NoOp);
        assert_eq!(change.deposed, vec!["vpc-0".to_string()]);
        assert_eq!(change.reason, "1 superseded instance(s) awaiting deletion");
        assert!(changes.has_changes());
        assert_eq!(changes.pending().count(), 1);
        assert_eq!(changes.summary().retires, 1);
    }

    #[test]
    fn test_destroy_deletes_everything() {
        let changes = compute_destroy(&applied());
        assert_eq!(changes.summary().deletes, 3);
        assert_eq!(changes.summary().total(), 3);
    }

    #[test]
    fn test_group_by_kind() {
        let changes = compute_changes(&desired(), &Snapshot::new(), &policies());
        let groups = group_by_kind(&changes.changes);
        assert_eq!(groups.len(), 3);
        assert_eq!(groups["subnet"].len(), 1);
    }
}
