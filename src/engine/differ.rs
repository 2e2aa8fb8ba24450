//! Changeset and plan display

use colored::Colorize;
use declarative::{Action, Change, ChangeSet, Plan, PropertyChange, group_by_kind};
use serde_json::Value as Json;

use crate::ui;

const RULE: &str = "─────────────────────────────────────────────────────";

/// Display a changeset in a user-friendly format
pub fn display_changes(changes: &ChangeSet) {
    let pending: Vec<Change> = changes.pending().cloned().collect();
    if pending.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!("┌─ {} {}", "Planned Changes".bold(), RULE);
    println!("│");

    for (kind, kind_changes) in group_by_kind(&pending) {
        println!("│ {}", kind.bold());
        for change in kind_changes {
            println!(
                "│   {} {:<36} {}",
                ui::action_symbol(change.action),
                change.resource_id.to_string(),
                change.reason.dimmed()
            );
            if matches!(change.action, Action::Update | Action::Replace) {
                for property in &change.properties {
                    println!("│       {}", describe_property(property));
                }
            }
        }
        println!("│");
    }

    let summary = changes.summary();
    println!("├{RULE}");
    println!(
        "│ Summary: {} to create, {} to update, {} to replace, {} to delete",
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.replaces.to_string().magenta(),
        summary.deletes.to_string().red()
    );
    if summary.retires > 0 {
        println!(
            "│          {} with superseded instances to delete",
            ui::count(summary.retires, "resource")
        );
    }
    println!("└{RULE}");
}

/// One line per changed property: `name: before → after`
fn describe_property(property: &PropertyChange) -> String {
    let before = property
        .before
        .as_ref()
        .map_or_else(|| "(none)".to_string(), render);
    let after = match (&property.after, property.unknown) {
        (_, true) => "(known after apply)".to_string(),
        (Some(value), false) => render(value),
        (None, false) => "(removed)".to_string(),
    };
    let line = format!("{}: {} → {}", property.name, before, after);
    if property.immutable {
        format!("{} {}", line, "# forces replacement".red())
    } else {
        line
    }
}

fn render(value: &Json) -> String {
    let text = value.to_string();
    if text.chars().count() > 60 {
        let short: String = text.chars().take(57).collect();
        format!("{short}...")
    } else {
        text
    }
}

/// Display the plan's waves
pub fn display_plan(plan: &Plan) {
    if plan.is_empty() {
        println!();
        println!("  {} Nothing to do", "✓".green());
        return;
    }

    for (index, wave) in plan.waves.iter().enumerate() {
        println!();
        println!(
            "{} {}",
            format!("Wave {}", index + 1).cyan().bold(),
            format!("({})", ui::count(wave.len(), "step")).dimmed()
        );
        for step in wave {
            let after = if step.after.is_empty() {
                String::new()
            } else {
                let keys: Vec<String> = step.after.iter().map(ToString::to_string).collect();
                format!("after {}", keys.join(", "))
            };
            println!(
                "  {} {:<44} {}",
                ui::action_symbol(step.action),
                step.to_string(),
                after.dimmed()
            );
        }
    }
}
