//! Progress indicators for rigging CLI.

use colored::Colorize;
use declarative::{ApplyResult, ProgressCallback, Step};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::ui;

/// Create a progress bar with rigging's style
pub fn bar(len: u64, prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb
}

/// Reports executor progress on a bar, with one line per finished step
pub struct ApplyProgress {
    bar: ProgressBar,
    quiet: bool,
}

impl ApplyProgress {
    pub fn new(steps: usize, quiet: bool) -> Self {
        let bar = bar(steps as u64, "Applying");
        if quiet {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { bar, quiet }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_wave_start(&mut self, index: usize, total: usize, steps: usize) {
        self.bar
            .set_message(format!("wave {}/{} ({})", index + 1, total, ui::count(steps, "step")));
    }

    fn on_step_complete(&mut self, step: &Step, result: &ApplyResult) {
        self.bar.inc(1);
        if self.quiet && result.is_success() {
            return;
        }
        let line = format!(
            "  {} {:<40} {}",
            ui::result_symbol(result),
            step.to_string(),
            ui::result_detail(result).dimmed()
        );
        if self.quiet {
            // a hidden bar swallows println
            println!("{line}");
        } else {
            self.bar.println(line);
        }
    }

    fn on_wave_complete(&mut self, index: usize) {
        log::debug!("Wave {} complete", index + 1);
    }
}
