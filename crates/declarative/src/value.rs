//! Property values with deferred references
//!
//! A property either holds a known JSON value or refers to an output of
//! another resource that only exists once that resource has been applied.
//! References are resolved as late as possible: by the differ against the
//! last-applied state, and by the executor right before dispatch.

use crate::error::ResolveError;
use crate::types::{Attributes, ResourceId};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::fmt;

/// Reference to an output attribute of another resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub resource: ResourceId,
    /// Attribute path; segments address object keys or array indices
    pub path: Vec<String>,
}

impl OutputRef {
    pub fn new(resource: ResourceId, attribute: &str) -> Self {
        Self {
            resource,
            path: attribute.split('.').map(str::to_string).collect(),
        }
    }

    /// Top-level attribute this reference reads
    pub fn attribute(&self) -> &str {
        self.path.first().map_or("", String::as_str)
    }

    /// Look the referenced value up in the target's outputs
    pub fn lookup(&self, outputs: &Attributes) -> Result<Json, ResolveError> {
        let missing = || ResolveError::MissingAttribute {
            resource: self.resource.clone(),
            attribute: self.path.join("."),
        };

        let (first, rest) = self.path.split_first().ok_or_else(missing)?;
        let mut current = outputs.get(first).ok_or_else(missing)?;
        for segment in rest {
            current = match current {
                Json::Object(map) => map.get(segment),
                Json::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(missing)?;
        }
        Ok(current.clone())
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.path.join("."))
    }
}

/// Piece of a string template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Fragment {
    Literal(String),
    Ref(OutputRef),
}

/// A property value, possibly waiting on another resource's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Literal value
    Known(Json),
    /// Whole value taken from another resource's output
    Pending(OutputRef),
    /// List containing at least one reference
    List(Vec<Value>),
    /// Map containing at least one reference
    Map(BTreeMap<String, Value>),
    /// String with embedded references
    Template(Vec<Fragment>),
}

impl Value {
    pub fn reference(resource: ResourceId, attribute: &str) -> Self {
        Self::Pending(OutputRef::new(resource, attribute))
    }

    /// Whether the value can be resolved without any outputs
    pub fn is_known(&self) -> bool {
        match self {
            Self::Known(_) => true,
            Self::Pending(_) => false,
            Self::List(items) => items.iter().all(Self::is_known),
            Self::Map(map) => map.values().all(Self::is_known),
            Self::Template(fragments) => fragments
                .iter()
                .all(|f| matches!(f, Fragment::Literal(_))),
        }
    }

    /// Every output reference contained in this value
    pub fn references(&self) -> Vec<&OutputRef> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a OutputRef>) {
        match self {
            Self::Known(_) => {}
            Self::Pending(r) => out.push(r),
            Self::List(items) => items.iter().for_each(|v| v.collect_references(out)),
            Self::Map(map) => map.values().for_each(|v| v.collect_references(out)),
            Self::Template(fragments) => {
                for fragment in fragments {
                    if let Fragment::Ref(r) = fragment {
                        out.push(r);
                    }
                }
            }
        }
    }

    /// Resolve with a lookup that may report a reference as not yet known.
    ///
    /// Returns `Ok(None)` when any reference inside is unknown.
    pub fn resolve_with<F>(&self, lookup: &F) -> Result<Option<Json>, ResolveError>
    where
        F: Fn(&OutputRef) -> Result<Option<Json>, ResolveError>,
    {
        match self {
            Self::Known(v) => Ok(Some(v.clone())),
            Self::Pending(r) => lookup(r),
            Self::List(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    match item.resolve_with(lookup)? {
                        Some(v) => resolved.push(v),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Json::Array(resolved)))
            }
            Self::Map(map) => {
                let mut resolved = serde_json::Map::new();
                for (key, item) in map {
                    match item.resolve_with(lookup)? {
                        Some(v) => {
                            resolved.insert(key.clone(), v);
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some(Json::Object(resolved)))
            }
            Self::Template(fragments) => {
                let mut rendered = String::new();
                for fragment in fragments {
                    match fragment {
                        Fragment::Literal(s) => rendered.push_str(s),
                        Fragment::Ref(r) => match lookup(r)? {
                            Some(v) => rendered.push_str(&render(&v)),
                            None => return Ok(None),
                        },
                    }
                }
                Ok(Some(Json::String(rendered)))
            }
        }
    }

    /// Resolve against the outputs of already-applied resources
    pub fn resolve<'a, F>(&self, outputs: &F) -> Result<Json, ResolveError>
    where
        F: Fn(&ResourceId) -> Option<&'a Attributes>,
    {
        let lookup = |r: &OutputRef| match outputs(&r.resource) {
            Some(attrs) => r.lookup(attrs).map(Some),
            None => Err(ResolveError::MissingOutputs(r.resource.clone())),
        };
        // The lookup never reports unknown, so None cannot surface here
        self.resolve_with(&lookup)
            .map(|v| v.unwrap_or(Json::Null))
    }
}

/// Render a JSON value for string interpolation
fn render(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<Json> for Value {
    fn from(value: Json) -> Self {
        Self::Known(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Known(Json::String(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Known(Json::String(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Known(Json::from(value))
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Known(Json::Bool(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vpc() -> ResourceId {
        ResourceId::new("vpc", "main")
    }

    fn vpc_outputs() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("id".into(), json!("vpc-123"));
        attrs.insert("subnets".into(), json!([{"id": "subnet-a"}, {"id": "subnet-b"}]));
        attrs
    }

    #[test]
    fn lookup_walks_nested_paths() {
        let outputs = vpc_outputs();
        let r = OutputRef::new(vpc(), "subnets.1.id");
        assert_eq!(r.lookup(&outputs).unwrap(), json!("subnet-b"));

        let r = OutputRef::new(vpc(), "subnets.7.id");
        assert!(matches!(
            r.lookup(&outputs),
            Err(ResolveError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn resolve_template_and_containers() {
        let outputs = vpc_outputs();
        let value = Value::Map(BTreeMap::from([
            (
                "name".to_string(),
                Value::Template(vec![
                    Fragment::Literal("net-".into()),
                    Fragment::Ref(OutputRef::new(vpc(), "id")),
                ]),
            ),
            (
                "ids".to_string(),
                Value::List(vec![Value::reference(vpc(), "id"), Value::from(7)]),
            ),
        ]));

        let resolved = value
            .resolve(&|id: &ResourceId| (id == &vpc()).then_some(&outputs))
            .unwrap();
        assert_eq!(resolved, json!({"name": "net-vpc-123", "ids": ["vpc-123", 7]}));
    }

    #[test]
    fn resolve_fails_without_outputs() {
        let value = Value::reference(vpc(), "id");
        let err = value.resolve(&|_: &ResourceId| None).unwrap_err();
        assert_eq!(err, ResolveError::MissingOutputs(vpc()));
    }

    #[test]
    fn unknown_reference_makes_value_unknown() {
        let value = Value::List(vec![Value::from("a"), Value::reference(vpc(), "id")]);
        let resolved = value.resolve_with(&|_: &OutputRef| Ok(None)).unwrap();
        assert_eq!(resolved, None);
        assert!(!value.is_known());
        assert_eq!(value.references().len(), 1);
    }
}
