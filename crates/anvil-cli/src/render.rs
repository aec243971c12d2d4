use std::io::{IsTerminal, Write};
use std::time::SystemTime;

use anvil_core::models::{
    CheckStatus, CheckUpdate, InstalledTool, ProgressEvent, TaskRecord, TaskStatus,
};
use crossterm::style::{Attribute, Color, Stylize, style};
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::error::CliResult;

/// Line-oriented terminal output. Colour is dropped when stdout is not a tty
/// or `NO_COLOR` is set.
#[derive(Clone, Copy)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn detect() -> Self {
        let color = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
        Self { color }
    }

    #[cfg(test)]
    pub fn plain() -> Self {
        Self { color: false }
    }

    fn paint(&self, text: impl Into<String>, color: Color) -> String {
        let text = text.into();
        if self.color {
            style(text).with(color).to_string()
        } else {
            text
        }
    }

    fn bold(&self, text: impl Into<String>) -> String {
        let text = text.into();
        if self.color {
            style(text).attribute(Attribute::Bold).to_string()
        } else {
            text
        }
    }

    pub fn line(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{text}");
    }

    pub fn task_event_line(&self, label: &str, event: &ProgressEvent) -> String {
        let label = self.bold(format!("{label:<24}"));
        if let Some(output) = &event.appended_output {
            return format!("{label} {}", self.paint(format!("| {output}"), Color::DarkGrey));
        }

        let percent = (event.progress * 100.0).round() as u32;
        let status = match event.status {
            TaskStatus::Pending => self.paint("pending", Color::DarkGrey),
            TaskStatus::Running => self.paint("running", Color::Blue),
            TaskStatus::Completed => self.paint("completed", Color::Green),
            TaskStatus::Failed => self.paint("failed", Color::Red),
            TaskStatus::Cancelled => self.paint("cancelled", Color::Yellow),
        };
        format!("{label} {status:<9} {percent:>3}% {}", event.stage)
    }

    pub fn task_summary_line(&self, record: &TaskRecord) -> String {
        let elapsed = match (record.started_at, record.ended_at) {
            (Some(started), Some(ended)) => ended
                .duration_since(started)
                .map(|duration| format!(" in {:.1}s", duration.as_secs_f64()))
                .unwrap_or_default(),
            _ => String::new(),
        };
        let (icon, color) = match record.status {
            TaskStatus::Completed => ("✔", Color::Green),
            TaskStatus::Failed => ("✖", Color::Red),
            TaskStatus::Cancelled => ("-", Color::Yellow),
            TaskStatus::Pending | TaskStatus::Running => ("…", Color::Blue),
        };

        let mut line = format!(
            "{} {} {}{elapsed}",
            self.paint(icon, color),
            self.bold(record.target.to_string()),
            record.status.as_str(),
        );
        if let Some(error) = &record.error {
            line.push_str(&format!(": {error}"));
        }
        line
    }

    pub fn check_lines(&self, update: &CheckUpdate) -> Vec<String> {
        let (icon, color) = match update.status {
            CheckStatus::Checking => ("…", Color::Blue),
            CheckStatus::Ok => ("✔", Color::Green),
            CheckStatus::Warning => ("!", Color::Yellow),
            CheckStatus::Error => ("✖", Color::Red),
        };

        let mut lines = vec![format!(
            "{} {} {}",
            self.paint(icon, color),
            self.bold(format!("{:<18}", update.name)),
            update.message
        )];
        lines.extend(update.details.iter().map(|detail| format!("    {detail}")));
        lines.extend(
            update
                .suggestions
                .iter()
                .map(|suggestion| format!("    {}", self.paint(format!("hint: {suggestion}"), Color::Cyan))),
        );
        lines
    }

    pub fn error_line(&self, message: &str) -> String {
        format!("{} {message}", self.paint("error:", Color::Red))
    }
}

#[derive(Debug, Serialize)]
struct ListEntry<'a> {
    name: &'a str,
    build_type: &'a str,
    version: Option<&'a str>,
    installed_at: String,
}

pub fn installed_json(tools: &[InstalledTool]) -> CliResult<String> {
    let entries: Vec<ListEntry<'_>> = tools
        .iter()
        .map(|tool| ListEntry {
            name: &tool.name,
            build_type: &tool.build_type,
            version: tool.version.as_deref(),
            installed_at: format_time(tool.installed_at),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&entries)?)
}

pub fn installed_table(tools: &[InstalledTool]) -> Vec<String> {
    if tools.is_empty() {
        return vec!["no tools installed".to_string()];
    }

    tools
        .iter()
        .map(|tool| {
            format!(
                "{:<20} {:<10} {:<12} {}",
                tool.name,
                tool.build_type,
                tool.version.as_deref().unwrap_or("-"),
                format_time(tool.installed_at)
            )
        })
        .collect()
}

fn format_time(value: SystemTime) -> String {
    OffsetDateTime::from(value)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anvil_core::models::TaskId;
    use std::time::{Duration, UNIX_EPOCH};

    fn installed(name: &str) -> InstalledTool {
        InstalledTool {
            name: name.to_string(),
            build_type: "release".to_string(),
            version: Some("1.2.3".to_string()),
            installed_at: UNIX_EPOCH + Duration::from_secs(86_400),
        }
    }

    #[test]
    fn output_events_render_as_indented_lines() {
        let renderer = Renderer::plain();
        let event = ProgressEvent {
            task_id: TaskId::from("task-1-0"),
            status: TaskStatus::Running,
            progress: 0.4,
            stage: "build".to_string(),
            appended_output: Some("compiling".to_string()),
        };
        let line = renderer.task_event_line("fd (release)", &event);
        assert!(line.starts_with("fd (release)"));
        assert!(line.ends_with("| compiling"));
    }

    #[test]
    fn status_events_show_percentage_and_stage() {
        let renderer = Renderer::plain();
        let event = ProgressEvent {
            task_id: TaskId::from("task-1-0"),
            status: TaskStatus::Running,
            progress: 0.4,
            stage: "build".to_string(),
            appended_output: None,
        };
        let line = renderer.task_event_line("fd", &event);
        assert!(line.contains("running"));
        assert!(line.contains(" 40% build"));
    }

    #[test]
    fn check_lines_include_suggestions() {
        let renderer = Renderer::plain();
        let update = CheckUpdate {
            check_index: 0,
            name: "Git".to_string(),
            status: CheckStatus::Error,
            message: "git not found".to_string(),
            details: Vec::new(),
            suggestions: vec!["install git".to_string()],
        };
        let lines = renderer.check_lines(&update);
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("hint: install git"));
    }

    #[test]
    fn json_listing_uses_rfc3339_times() {
        let json = installed_json(&[installed("fd")]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0]["name"], "fd");
        assert_eq!(parsed[0]["installed_at"], "1970-01-02T00:00:00Z");
    }

    #[test]
    fn empty_table_says_so() {
        assert_eq!(installed_table(&[]), vec!["no tools installed"]);
    }
}
