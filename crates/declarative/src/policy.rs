//! Per-kind change policy
//!
//! Which properties force a replacement, and in which order the two
//! halves of a replacement run, is specific to each resource kind and
//! comes from configuration.

use crate::types::ReplaceStrategy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Policy for a single resource kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindPolicy {
    /// Properties that cannot be changed in place
    #[serde(default)]
    pub immutable: BTreeSet<String>,
    /// Replacement ordering; falls back to the table default
    #[serde(default)]
    pub replace: Option<ReplaceStrategy>,
}

impl KindPolicy {
    pub fn immutable<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            immutable: properties.into_iter().map(Into::into).collect(),
            replace: None,
        }
    }

    pub fn with_strategy(mut self, strategy: ReplaceStrategy) -> Self {
        self.replace = Some(strategy);
        self
    }
}

/// Policies for every configured kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Strategy for kinds that don't set one
    #[serde(default)]
    pub default_strategy: ReplaceStrategy,
    #[serde(default)]
    pub kinds: BTreeMap<String, KindPolicy>,
}

impl PolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(mut self, kind: impl Into<String>, policy: KindPolicy) -> Self {
        self.kinds.insert(kind.into(), policy);
        self
    }

    /// Whether changing `property` on a `kind` forces replacement
    pub fn is_immutable(&self, kind: &str, property: &str) -> bool {
        self.kinds
            .get(kind)
            .is_some_and(|p| p.immutable.contains(property))
    }

    /// Replacement ordering for a kind
    pub fn strategy(&self, kind: &str) -> ReplaceStrategy {
        self.kinds
            .get(kind)
            .and_then(|p| p.replace)
            .unwrap_or(self.default_strategy)
    }
}
