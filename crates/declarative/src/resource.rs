//! Desired resource declarations
//!
//! A Resource is an immutable description of something the provider should
//! make exist: its kind, its name, a property bag and the resources it
//! depends on. It never talks to the provider itself; the executor turns it
//! into a [`LiveResource`](crate::state::LiveResource) once applied.

use crate::types::ResourceId;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Declared property bag
pub type Properties = BTreeMap<String, Value>;

/// A desired resource
///
/// # Example
///
/// ```
/// use declarative::{Resource, ResourceId, Value};
///
/// let subnet = Resource::new("subnet", "public_a")
///     .with_property("cidr_block", "10.0.1.0/24")
///     .with_property("vpc_id", Value::reference(ResourceId::new("vpc", "main"), "id"));
///
/// assert!(subnet.dependencies().contains(&ResourceId::new("vpc", "main")));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    #[serde(default)]
    pub properties: Properties,
    /// Explicit dependencies, in addition to the ones implied by references
    #[serde(default)]
    pub depends_on: BTreeSet<ResourceId>,
}

impl Resource {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(kind, name),
            properties: Properties::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Resource kind (e.g. "vpc", "load_balancer")
    pub fn kind(&self) -> &str {
        &self.id.kind
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_dependency(mut self, id: ResourceId) -> Self {
        self.depends_on.insert(id);
        self
    }

    /// Resources referenced from property values
    pub fn references(&self) -> BTreeSet<ResourceId> {
        self.properties
            .values()
            .flat_map(Value::references)
            .map(|r| r.resource.clone())
            .collect()
    }

    /// Explicit and implicit dependencies
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        let mut deps = self.references();
        deps.extend(self.depends_on.iter().cloned());
        deps
    }
}
