//! Human-readable status output

use std::fmt::Write;

use moveswap_core::{CoordinatorState, MessageLevel, StatusReport};
use owo_colors::OwoColorize;

pub fn render(report: &StatusReport) -> String {
    let mut out = String::new();

    let state = match report.state {
        CoordinatorState::Loaded => report.state.green().to_string(),
        CoordinatorState::Injecting => report.state.yellow().to_string(),
        CoordinatorState::NoRegion => report.state.dimmed().to_string(),
    };
    let _ = writeln!(out, "Process: {}", report.process);
    let _ = writeln!(out, "Agent:   {}", state);
    if let Some(version) = &report.agent_version {
        let version = if report.version_matches {
            version.green().to_string()
        } else {
            version.red().to_string()
        };
        let _ = writeln!(out, "Version: {}", version);
    }
    if report.region_loaded {
        let _ = writeln!(out, "Locked:  {}", report.locked_in);
    }
    if report.busy {
        let _ = writeln!(
            out,
            "Importing: {} queued, {}%",
            report.queued, report.progress
        );
    }

    for (slot, selection) in report.selections.iter().enumerate() {
        if selection.is_empty() {
            let _ = writeln!(out, "Slot {}: {}", slot, "-".dimmed());
        } else {
            let _ = writeln!(
                out,
                "Slot {}: {} ({} bytes, type {})",
                slot,
                selection.name.bold(),
                selection.size,
                selection.type_id
            );
        }
    }

    for failure in &report.import_failures {
        let _ = writeln!(
            out,
            "{} {} into slot {}: {}",
            "import failed:".red(),
            failure.payload,
            failure.slot,
            failure.code
        );
    }
    if let Some(error) = &report.injection_error {
        let _ = writeln!(out, "{} {}", "injection failed:".red(), error);
    }

    for message in &report.messages {
        let level = match message.level {
            MessageLevel::Tip => message.level.cyan().to_string(),
            MessageLevel::Warning => message.level.yellow().to_string(),
            MessageLevel::Error => message.level.red().to_string(),
        };
        let _ = writeln!(out, "[{}] {}", level, message.key);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use moveswap_core::{ProcessStatus, Selection};

    #[test]
    fn test_render_not_attached() {
        let text = render(&StatusReport::default().with_messages());
        assert!(text.contains("not attached"));
        assert!(text.contains("no_region"));
        assert!(text.contains("process.game_not_attached"));
    }

    #[test]
    fn test_render_selections() {
        let report = StatusReport {
            process: ProcessStatus::Attached,
            state: CoordinatorState::Loaded,
            region_loaded: true,
            version_matches: true,
            agent_version: Some("1.0".to_string()),
            selections: vec![
                Selection {
                    size: 120_000,
                    type_id: 12,
                    name: "lili".to_string(),
                },
                Selection::default(),
            ],
            ..Default::default()
        }
        .with_messages();

        let text = render(&report);
        assert!(text.contains("lili"));
        assert!(text.contains("120000 bytes, type 12"));
        assert!(text.contains("Slot 1:"));
        assert!(text.contains("status.loaded"));
    }
}
