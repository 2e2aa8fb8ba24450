use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG;

#[derive(Parser)]
#[command(name = "rigging")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Plan and apply declared infrastructure in dependency order", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file (TOML, or JSON by extension)
    #[arg(short, long, global = true, env = "RIGGING_CONFIG", default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    /// State file [default: .rigging/state.json next to the config]
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Set a configuration variable (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", global = true, value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show what apply would change (exit code 2 when changes are pending)
    Plan(PlanArgs),

    /// Converge infrastructure to the configuration
    Apply(ApplyArgs),

    /// Delete every resource recorded in state
    Destroy(DestroyArgs),

    /// Show the planned waves
    Graph,

    /// Inspect or repair recorded state
    #[command(subcommand)]
    State(StateCommand),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Plan / Apply / Destroy
// ============================================================================

#[derive(Args)]
pub struct PlanArgs {
    /// Read every recorded resource back from the provider first
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Args)]
pub struct ExecArgs {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Maximum provider calls in flight [default: settings.jobs or 10]
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Cancel everything on the first failure
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub exec: ExecArgs,

    /// Read every recorded resource back from the provider first
    #[arg(long)]
    pub refresh: bool,

    /// Plan and report without calling the provider
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct DestroyArgs {
    #[command(flatten)]
    pub exec: ExecArgs,
}

// ============================================================================
// State
// ============================================================================

#[derive(Subcommand)]
pub enum StateCommand {
    /// List recorded resources
    List,

    /// Show a recorded resource
    Show {
        /// Resource address (kind.name)
        id: String,
    },

    /// Forget a resource without deleting it
    Rm {
        /// Resource address (kind.name)
        id: String,
    },
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got `{raw}`")),
    }
}
