//! Core types for declarative resource graphs

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Resolved attributes: applied properties or provider outputs
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Address of a resource: `kind.name`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ResourceId {
    pub kind: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('.') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() => {
                Ok(Self::new(kind, name))
            }
            _ => Err(format!("invalid resource address `{s}` (expected kind.name)")),
        }
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for ResourceId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Action the differ decided for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    Replace,
    Delete,
    NoOp,
}

impl Action {
    /// Whether the action requires provider calls
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Replace => "Replace",
            Self::Delete => "Delete",
            Self::NoOp => "NoOp",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Ordering of the two halves of a replacement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaceStrategy {
    /// Remove the old instance, then create the new one
    #[default]
    DeleteBeforeCreate,
    /// Bring the new instance up first, retire the old one afterwards
    CreateBeforeDelete,
}

/// What the executor does when a resource fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Skip dependents of the failed resource, keep going elsewhere
    #[default]
    Continue,
    /// Cancel in-flight and queued work immediately
    FailFast,
}

/// Result of applying a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApplyResult {
    /// No changes needed
    NoChange,
    /// Resource was created
    Created,
    /// Resource was updated in place
    Updated,
    /// Resource was replaced
    Replaced,
    /// Resource was deleted
    Deleted,
    /// Apply failed
    Failed { error: String },
    /// Apply was skipped
    Skipped { reason: String },
}

impl ApplyResult {
    /// Check if the result represents success (no failure)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Check if the result represents a change
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            Self::Created | Self::Updated | Self::Replaced | Self::Deleted
        )
    }

    /// Result of a successful action
    pub fn for_action(action: Action) -> Self {
        match action {
            Action::Create => Self::Created,
            Action::Update => Self::Updated,
            Action::Replace => Self::Replaced,
            Action::Delete => Self::Deleted,
            Action::NoOp => Self::NoChange,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::NoChange => "NoOp",
            Self::Created => "Created",
            Self::Updated => "Updated",
            Self::Replaced => "Replaced",
            Self::Deleted => "Deleted",
            Self::Failed { .. } => "Failed",
            Self::Skipped { .. } => "Skipped",
        }
    }
}

/// Summary of execution results
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub created: usize,
    pub updated: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_change: usize,
    /// Final result per resource
    pub results: BTreeMap<ResourceId, ApplyResult>,
}

impl ExecuteSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.replaced + self.deleted
    }

    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.skipped + self.failed + self.no_change
    }

    /// Result recorded for a resource
    pub fn result(&self, id: &ResourceId) -> Option<&ApplyResult> {
        self.results.get(id)
    }

    /// Record the final result of a resource
    pub fn add_result(&mut self, id: ResourceId, result: ApplyResult) {
        match &result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created => self.created += 1,
            ApplyResult::Updated => self.updated += 1,
            ApplyResult::Replaced => self.replaced += 1,
            ApplyResult::Deleted => self.deleted += 1,
            ApplyResult::Failed { .. } => self.failed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
        self.results.insert(id, result);
    }
}

/// Options for execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Don't call the provider, mark every step skipped
    pub dry_run: bool,
    /// Size of the worker pool (max provider calls in flight)
    pub jobs: usize,
    /// Reaction to a failed resource
    pub failure_policy: FailurePolicy,
    /// Retry policy for transient provider errors
    pub retry: RetryConfig,
    /// Verbose output
    pub verbose: bool,
}

/// Default worker pool size
pub const DEFAULT_JOBS: usize = 10;

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            jobs: DEFAULT_JOBS,
            failure_policy: FailurePolicy::Continue,
            retry: RetryConfig::default(),
            verbose: false,
        }
    }
}
