//! Execution engine for rigging
//!
//! The engine orchestrates:
//! 1. Loading - Configuration, state and provider for a project
//! 2. Diffing - Compare declared resources with recorded state
//! 3. Executing - Apply the plan with progress and a final summary

pub mod differ;
pub mod executor;

use anyhow::{Context as AnyhowContext, Result};
use declarative::{
    Action, ChangeSet, FileStateStore, Graph, Provider, ResourceId, Snapshot, StateStore, refresh,
};
use std::path::Path;

use crate::Context;
use crate::config::Config;
use crate::paths;
use crate::provider;
use crate::ui;

/// Everything a command needs to plan or apply one configuration
pub struct Project {
    pub config: Config,
    pub graph: Graph,
    pub store: FileStateStore,
    pub provider: Box<dyn Provider>,
}

impl Project {
    /// Load configuration, build the graph and open state
    pub fn load(ctx: &Context) -> Result<Self> {
        let config = Config::load(&ctx.config, &ctx.vars)?;
        let graph = Graph::build(config.resources.clone())
            .with_context(|| format!("Invalid resource graph in {}", ctx.config.display()))?;

        let state_path = paths::state_file(&ctx.config, ctx.state.as_deref());
        let provider = provider::from_settings(&config.provider, &paths::local_cloud_dir(&state_path))?;
        log::debug!(
            "Project {}: {} resources, {} edges, state {}",
            ctx.config.display(),
            graph.len(),
            graph.edge_count(),
            state_path.display()
        );

        Ok(Self {
            config,
            graph,
            store: FileStateStore::new(state_path),
            provider,
        })
    }

    pub fn state_path(&self) -> &Path {
        self.store.path()
    }

    /// Recorded state, optionally reconciled with the provider first
    ///
    /// Also returns the resources the refresh found deleted.
    pub fn snapshot(&self, refresh_first: bool) -> Result<(Snapshot, Vec<ResourceId>)> {
        let snapshot = self
            .store
            .load()
            .with_context(|| format!("Could not load state {}", self.state_path().display()))?;
        if !refresh_first || snapshot.is_empty() {
            return Ok((snapshot, Vec::new()));
        }

        let (refreshed, report) = refresh(&snapshot, self.provider.as_ref(), &self.graph);
        if report.is_clean() {
            ui::dim(&format!("Refreshed {}, no drift", ui::count(snapshot.len(), "resource")));
        }
        for id in &report.missing {
            ui::warn(&format!("{id} no longer exists and will be re-created"));
        }
        for id in &report.orphaned {
            ui::warn(&format!("{id} no longer exists; its record will be dropped"));
        }
        for id in &report.drifted {
            ui::warn(&format!("{id} changed outside rigging"));
        }
        for (id, err) in &report.errors {
            ui::warn(&format!("Could not refresh {id}: {err}"));
        }
        Ok((refreshed, report.missing))
    }
}

/// Explain re-creations caused by out-of-band deletes
pub fn mark_drifted(changes: &mut ChangeSet, missing: &[ResourceId]) {
    for change in &mut changes.changes {
        if change.action == Action::Create && missing.contains(&change.resource_id) {
            change.reason = DRIFT_DELETED.to_string();
        }
    }
}

const DRIFT_DELETED: &str = "drifted: deleted outside of rigging";
