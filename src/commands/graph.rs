//! `rigging graph` - show the planned waves

use anyhow::Result;
use declarative::{Plan, compute_changes};

use crate::Context;
use crate::engine::Project;
use crate::engine::differ::display_plan;
use crate::ui;

pub fn run(ctx: &Context) -> Result<i32> {
    let project = Project::load(ctx)?;
    let (snapshot, _) = project.snapshot(false)?;

    let changes = compute_changes(&project.graph, &snapshot, &project.config.policies);
    let plan = Plan::build(&changes, &project.graph, &snapshot, &project.config.policies)?;

    ui::header("Execution waves");
    ui::kv("resources", &project.graph.len().to_string());
    ui::kv("dependencies", &project.graph.edge_count().to_string());
    ui::kv("steps", &plan.step_count().to_string());
    display_plan(&plan);
    Ok(0)
}
