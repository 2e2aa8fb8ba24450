//! Error types for graph construction, planning and state handling.
//!
//! Graph and state errors are fatal and abort a run before any provider
//! call is made. Provider errors are per-resource: the executor records
//! them in the run summary and keeps going on unaffected branches.

use crate::types::ResourceId;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors raised by the engine
#[derive(Error, Debug)]
pub enum Error {
    /// The dependency graph contains a cycle
    #[error("dependency cycle between {{{}}}", join_ids(members))]
    Cycle { members: Vec<ResourceId> },

    /// Wave extraction stalled before every step was scheduled
    #[error("cannot order plan: stalled on {}", remaining.join(", "))]
    UnresolvableGraph { remaining: Vec<String> },

    /// Two declarations share the same id
    #[error("resource {0} is declared more than once")]
    DuplicateResource(ResourceId),

    /// A dependency or reference names an undeclared resource
    #[error("{from} references undeclared resource {to}")]
    UnknownReference { from: ResourceId, to: ResourceId },

    /// The persisted state cannot be trusted
    #[error("state file {} is corrupt: {reason}", .path.display())]
    StateCorruption { path: PathBuf, reason: String },

    /// Another run holds the state lock
    #[error("state is locked by another run ({})", .0.display())]
    StateLocked(PathBuf),

    /// Worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    WorkerPool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;

fn join_ids(ids: &[ResourceId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Categories of provider errors, used for retry and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Throttling, timeouts, network hiccups (retryable)
    Transient,
    /// The remote object does not exist
    NotFound,
    /// The remote object is in a conflicting state
    Conflict,
    /// Credentials lack permission
    Permission,
    /// The provider rejected the properties
    Invalid,
    /// The call observed the cancellation token
    Cancelled,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Whether this error category is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Short label for status lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::NotFound => "not found",
            Self::Conflict => "conflict",
            Self::Permission => "permission denied",
            Self::Invalid => "invalid",
            Self::Cancelled => "cancelled",
            Self::Other => "error",
        }
    }
}

/// Error returned by a provider for a single resource operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}: {message}", .category.label())]
pub struct ProviderError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ProviderError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Invalid, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCategory::Cancelled, "operation cancelled")
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Other, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

impl From<std::io::Error> for ProviderError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                Self::new(ErrorCategory::Permission, err.to_string())
            }
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted => {
                Self::transient(err.to_string())
            }
            _ => Self::other(err.to_string()),
        }
    }
}

/// A property value could not be resolved to a concrete value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The referenced resource has no recorded outputs
    #[error("outputs of {0} are not available")]
    MissingOutputs(ResourceId),

    /// The referenced attribute does not exist on the outputs
    #[error("{resource} has no output attribute `{attribute}`")]
    MissingAttribute {
        resource: ResourceId,
        attribute: String,
    },
}

impl From<ResolveError> for ProviderError {
    fn from(err: ResolveError) -> Self {
        Self::invalid(err.to_string())
    }
}
