//! `rigging plan` - preview what apply would change

use anyhow::Result;
use declarative::{Plan, compute_changes};

use super::EXIT_CHANGES_PENDING;
use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::{Project, mark_drifted};
use crate::engine::differ::display_changes;
use crate::ui;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<i32> {
    let project = Project::load(ctx)?;
    let (snapshot, missing) = project.snapshot(args.refresh)?;

    let mut changes = compute_changes(&project.graph, &snapshot, &project.config.policies);
    mark_drifted(&mut changes, &missing);
    // Fails on replacement orderings that cannot be satisfied
    let plan = Plan::build(&changes, &project.graph, &snapshot, &project.config.policies)?;

    display_changes(&changes);
    if !changes.has_changes() {
        return Ok(0);
    }

    if !ctx.quiet {
        println!();
        ui::info(&format!(
            "{} in {}; run `rigging apply` to execute",
            ui::count(plan.step_count(), "step"),
            ui::count(plan.waves.len(), "wave")
        ));
    }
    Ok(EXIT_CHANGES_PENDING)
}
