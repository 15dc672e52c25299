use colored::Colorize;
use lcm_engine::{ConfigurationReport, OperationOutcome, OutcomeKind, ReportSummary, RunStatus};

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
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
// Reports
// ============================================================================

/// One-line summary, e.g. "3 resources: 2 ok (1 changed), 1 failed"
pub fn format_summary(summary: &ReportSummary) -> String {
    let mut parts = vec![format!("{} ok", summary.succeeded)];
    if summary.changed > 0 {
        parts[0].push_str(&format!(" ({} changed)", summary.changed));
    }
    if summary.skipped > 0 {
        parts.push(format!("{} skipped", summary.skipped));
    }
    if summary.failed > 0 {
        parts.push(format!("{} failed", summary.failed));
    }

    let total = summary.total();
    let noun = if total == 1 { "resource" } else { "resources" };
    format!("{total} {noun}: {}", parts.join(", "))
}

fn outcome_line(outcome: &OperationOutcome) {
    let marker = match outcome.kind {
        OutcomeKind::Success if outcome.in_desired_state == Some(false) => "≠".yellow(),
        OutcomeKind::Success => "✓".green(),
        OutcomeKind::Skipped => "-".dimmed(),
        OutcomeKind::Failed => "✗".red(),
    };
    println!("  {} {} {}", marker, outcome.key, outcome.call.to_string().dimmed());
    if let Some(error) = &outcome.error {
        println!("      {}", error.detail.red());
    }
}

/// Human-readable rendering of a report
pub fn print_report(report: &ConfigurationReport) {
    let title = match &report.configuration {
        Some(name) => format!("{} ({name})", report.operation),
        None => report.operation.to_string(),
    };
    header(&title);

    for outcome in &report.outcomes {
        outcome_line(outcome);
    }

    println!();
    let summary = format_summary(&report.summary());
    match report.status {
        RunStatus::Completed | RunStatus::RolledBack => success(&summary),
        RunStatus::Cancelled => warn(&format!("Cancelled: {summary}")),
        RunStatus::Failed => error(&summary),
    }

    if let Some(in_desired_state) = report.in_desired_state {
        kv("In desired state", if in_desired_state { "yes" } else { "no" });
    }
    if report.reboot_required {
        if report.reboot_node_if_needed {
            warn("A reboot is required to finish this configuration");
        } else {
            dim("A reboot is required; automatic reboot is disabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_summary_all_ok() {
        let summary = ReportSummary {
            succeeded: 3,
            ..Default::default()
        };
        assert_eq!(format_summary(&summary), "3 resources: 3 ok");
    }

    #[test]
    fn test_format_summary_mixed() {
        let summary = ReportSummary {
            succeeded: 2,
            changed: 1,
            skipped: 1,
            failed: 1,
        };
        assert_eq!(
            format_summary(&summary),
            "4 resources: 2 ok (1 changed), 1 skipped, 1 failed"
        );
    }

    #[test]
    fn test_format_summary_single() {
        let summary = ReportSummary {
            failed: 1,
            ..Default::default()
        };
        assert_eq!(format_summary(&summary), "1 resource: 0 ok, 1 failed");
    }
}
