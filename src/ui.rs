use colored::{ColoredString, Colorize};
use declarative::{Action, ApplyResult};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Action and result markers
// ============================================================================

/// Plan marker for an action
pub fn action_symbol(action: Action) -> ColoredString {
    match action {
        Action::Create => "+".green(),
        Action::Update => "~".yellow(),
        Action::Replace => "±".magenta(),
        Action::Delete => "-".red(),
        Action::NoOp => "○".dimmed(),
    }
}

/// Apply marker for a result
pub fn result_symbol(result: &ApplyResult) -> ColoredString {
    match result {
        ApplyResult::NoChange => "○".dimmed(),
        ApplyResult::Created
        | ApplyResult::Updated
        | ApplyResult::Replaced
        | ApplyResult::Deleted => "✓".green(),
        ApplyResult::Failed { .. } => "✗".red(),
        ApplyResult::Skipped { .. } => "⊘".yellow(),
    }
}

/// One-line description of a result, e.g. `Created` or `Failed: conflict`
pub fn result_detail(result: &ApplyResult) -> String {
    match result {
        ApplyResult::Failed { error } => format!("{}: {}", result.label(), error),
        ApplyResult::Skipped { reason } => format!("{} ({})", result.label(), reason),
        _ => result.label().to_string(),
    }
}

/// Pluralize a count: `1 resource`, `3 resources`
pub fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count() {
        assert_eq!(count(0, "change"), "0 changes");
        assert_eq!(count(1, "change"), "1 change");
        assert_eq!(count(12, "wave"), "12 waves");
    }

    #[test]
    fn test_result_detail() {
        assert_eq!(result_detail(&ApplyResult::Created), "Created");
        assert_eq!(
            result_detail(&ApplyResult::Failed {
                error: "conflict: rejected".into()
            }),
            "Failed: conflict: rejected"
        );
        assert_eq!(
            result_detail(&ApplyResult::Skipped {
                reason: "dry run".into()
            }),
            "Skipped (dry run)"
        );
    }
}
