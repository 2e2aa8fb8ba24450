//! Execution engine - rigging-side executor with UI integration

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{
    ApplyResult, ChangeSet, ExecuteOptions, ExecuteSummary, FailurePolicy, Graph, Plan, RetryConfig,
    Snapshot, execute,
};

use super::Project;
use super::differ::display_changes;
use crate::progress::ApplyProgress;

/// Options for a CLI run (includes `yes` for confirmation skip)
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Don't call the provider, just report
    pub dry_run: bool,
    /// Number of parallel jobs
    pub jobs: usize,
    /// Skip confirmation prompts
    pub yes: bool,
    /// Stop everything on the first failure
    pub fail_fast: bool,
    /// Verbose output
    pub verbose: bool,
    /// Only report failures
    pub quiet: bool,
}

/// Show the changes, confirm, then execute the plan
///
/// `graph` is the desired graph; destroy passes an empty one.
///
/// Returns `None` when there was nothing to do or the user declined.
pub fn run(
    project: &Project,
    graph: &Graph,
    changes: &ChangeSet,
    plan: &Plan,
    snapshot: &Snapshot,
    opts: &RunOptions,
) -> Result<Option<ExecuteSummary>> {
    display_changes(changes);
    if !changes.has_changes() {
        return Ok(None);
    }

    if !opts.yes && !opts.dry_run && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(None);
    }

    let exec_opts = ExecuteOptions {
        dry_run: opts.dry_run,
        jobs: opts.jobs,
        failure_policy: if opts.fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::Continue
        },
        retry: RetryConfig::default(),
        verbose: opts.verbose,
    };

    println!();
    println!(
        "  {} Applying {} steps in {} waves ({} parallel)...",
        "→".cyan(),
        plan.step_count(),
        plan.waves.len(),
        opts.jobs
    );

    let mut progress = ApplyProgress::new(plan.step_count(), opts.quiet);
    let result = execute(
        plan,
        graph,
        snapshot,
        project.provider.as_ref(),
        &project.store,
        &exec_opts,
        &mut progress,
    );
    progress.finish();
    let summary = result.context("Failed to run plan")?;

    if opts.dry_run {
        println!();
        println!("  {} Dry run - no changes made", "ℹ".blue());
    } else {
        print_summary(&summary);
    }
    Ok(Some(summary))
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Apply these changes?")
        .default(false)
        .interact()
        .context("Confirmation needs an interactive terminal (use --yes)")?;

    Ok(confirmed)
}

/// Print final summary
fn print_summary(summary: &ExecuteSummary) {
    println!();
    if summary.is_success() {
        println!("  {} Apply complete!", "✓".green().bold());
    } else {
        println!("  {} Apply finished with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} resources created", summary.created);
    }
    if summary.updated > 0 {
        println!("    • {} resources updated", summary.updated);
    }
    if summary.replaced > 0 {
        println!("    • {} resources replaced", summary.replaced);
    }
    if summary.deleted > 0 {
        println!("    • {} resources deleted", summary.deleted);
    }
    if summary.skipped > 0 {
        println!("    • {} resources skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "resources".red());
        for (id, result) in &summary.results {
            if let ApplyResult::Failed { error } = result {
                println!("      {} {}: {}", "✗".red(), id, error);
            }
        }
    }
}
