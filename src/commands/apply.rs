//! `rigging apply` and `rigging destroy`

use anyhow::Result;
use declarative::{ExecuteSummary, Graph, Plan, compute_changes, compute_destroy};

use super::EXIT_FAILED;
use crate::Context;
use crate::cli::{ApplyArgs, DestroyArgs, ExecArgs};
use crate::engine::{Project, mark_drifted};
use crate::engine::executor::{RunOptions, run};

fn run_options(ctx: &Context, project: &Project, exec: &ExecArgs, dry_run: bool) -> RunOptions {
    RunOptions {
        dry_run,
        jobs: exec.jobs.unwrap_or_else(|| project.config.jobs()).max(1),
        yes: exec.yes,
        fail_fast: exec.fail_fast,
        verbose: ctx.verbose > 0,
        quiet: ctx.quiet,
    }
}

fn exit_code(summary: Option<&ExecuteSummary>) -> i32 {
    match summary {
        Some(summary) if !summary.is_success() => EXIT_FAILED,
        _ => 0,
    }
}

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<i32> {
    let project = Project::load(ctx)?;
    let _lock = project.store.lock()?;
    let (snapshot, missing) = project.snapshot(args.refresh)?;

    let policies = &project.config.policies;
    let mut changes = compute_changes(&project.graph, &snapshot, policies);
    mark_drifted(&mut changes, &missing);
    let plan = Plan::build(&changes, &project.graph, &snapshot, policies)?;

    let opts = run_options(ctx, &project, &args.exec, args.dry_run);
    let summary = run(&project, &project.graph, &changes, &plan, &snapshot, &opts)?;
    Ok(exit_code(summary.as_ref()))
}

pub fn destroy(ctx: &Context, args: &DestroyArgs) -> Result<i32> {
    let project = Project::load(ctx)?;
    let _lock = project.store.lock()?;
    let (snapshot, _) = project.snapshot(false)?;

    let empty = Graph::default();
    let changes = compute_destroy(&snapshot);
    let plan = Plan::build(&changes, &empty, &snapshot, &project.config.policies)?;

    let opts = run_options(ctx, &project, &args.exec, false);
    let summary = run(&project, &empty, &changes, &plan, &snapshot, &opts)?;
    Ok(exit_code(summary.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ApplyResult, ResourceId};

    #[test]
    fn test_exit_code() {
        assert_eq!(exit_code(None), 0);

        let mut summary = ExecuteSummary::default();
        summary.add_result(ResourceId::new("vpc", "main"), ApplyResult::Created);
        assert_eq!(exit_code(Some(&summary)), 0);

        summary.add_result(
            ResourceId::new("subnet", "a"),
            ApplyResult::Failed {
                error: "conflict: rejected".into(),
            },
        );
        assert_eq!(exit_code(Some(&summary)), EXIT_FAILED);
    }
}
