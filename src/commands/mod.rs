// Planning commands
pub mod graph;
pub mod plan;

// Commands that change infrastructure
pub mod apply;

// State inspection and repair
pub mod state;

/// Exit code when a plan has pending changes
pub const EXIT_CHANGES_PENDING: i32 = 2;

/// Exit code when at least one resource failed
pub const EXIT_FAILED: i32 = 1;
