//! # Declarative
//!
//! A dependency-aware planner and applier for declared infrastructure.
//!
//! This crate takes a set of declared resources, compares them with the
//! state recorded by the last apply, and converges real infrastructure
//! through a [`Provider`] by running the required operations in
//! dependency order.
//!
//! ## Core Concepts
//!
//! - **Resource**: A declared `kind.name` with properties that may reference
//!   outputs of other resources
//! - **Graph**: Validated dependency graph (no duplicates, unknown references or cycles)
//! - **ChangeSet**: Per-resource action (create, update, replace, delete, no-op)
//! - **Plan**: Ordered waves of steps; everything in a wave may run concurrently
//! - **Executor**: Runs waves on a bounded worker pool and persists each result
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     compute_changes, execute, ExecuteOptions, Graph, MemoryStateStore,
//!     NoProgress, Plan, PolicyTable, Resource, ResourceId, StateStore, Value,
//! };
//!
//! let graph = Graph::build(vec![
//!     Resource::new("vpc", "main").with_property("cidr_block", "10.0.0.0/16"),
//!     Resource::new("subnet", "a")
//!         .with_property("vpc_id", Value::reference(ResourceId::new("vpc", "main"), "id")),
//! ])?;
//!
//! let store = MemoryStateStore::new();
//! let snapshot = store.load()?;
//! let policies = PolicyTable::new();
//! let changes = compute_changes(&graph, &snapshot, &policies);
//! let plan = Plan::build(&changes, &graph, &snapshot, &policies)?;
//!
//! let summary = execute(
//!     &plan, &graph, &snapshot, &my_provider, &store,
//!     &ExecuteOptions::default(), &mut NoProgress,
//! )?;
//! ```
//!
//! ## Extension Traits
//!
//! - [`Provider`]: Creates, reads, updates and deletes real resources
//! - [`StateStore`]: Persists the record of what was applied
//! - [`ProgressCallback`]: Receives progress updates
//!
//! This allows the crate to be used without hard dependencies on
//! a specific cloud API, storage backend or UI.

pub mod context;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod planner;
pub mod policy;
pub mod provider;
pub mod refresh;
pub mod resource;
pub mod retry;
pub mod state;
pub mod types;
pub mod value;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use context::{ApplyContext, CancelToken, NoProgress, ProgressCallback};
pub use diff::{
    Change, ChangeSet, DiffSummary, PropertyChange, compute_changes, compute_destroy,
    group_by_kind,
};
pub use error::{Error, ErrorCategory, ProviderError, ResolveError, Result};
pub use executor::execute;
pub use graph::Graph;
pub use planner::{Operation, Plan, Step, StepKey};
pub use policy::{KindPolicy, PolicyTable};
pub use provider::{Created, Provider};
pub use refresh::{RefreshReport, refresh};
pub use resource::{Properties, Resource};
pub use retry::RetryConfig;
pub use state::{
    FileStateStore, LiveResource, MemoryStateStore, STATE_VERSION, Snapshot, StateLock, StateStore,
};
pub use types::{
    Action, ApplyResult, Attributes, DEFAULT_JOBS, ExecuteOptions, ExecuteSummary, FailurePolicy,
    ReplaceStrategy, ResourceId,
};
pub use value::{Fragment, OutputRef, Value};
