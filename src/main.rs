mod cli;
mod commands;
mod config;
mod engine;
mod paths;
mod progress;
mod provider;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use std::io;
use std::path::PathBuf;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Configuration file
    pub config: PathBuf,
    /// Explicit state file, if any
    pub state: Option<PathBuf>,
    /// `--var` overrides, in command-line order
    pub vars: Vec<(String, String)>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: paths::expand(&cli.config.to_string_lossy()),
        state: cli.state,
        vars: cli.vars,
    };

    let code = match cli.command {
        Command::Plan(args) => commands::plan::run(&ctx, &args)?,
        Command::Apply(args) => commands::apply::apply(&ctx, &args)?,
        Command::Destroy(args) => commands::apply::destroy(&ctx, &args)?,
        Command::Graph => commands::graph::run(&ctx)?,
        Command::State(cmd) => commands::state::run(&ctx, &cmd)?,
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "rigging", &mut io::stdout());
            0
        }
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
