//! Text summary builder for CLI output.
//!
//! This module formats human-readable lines for a finished session in text mode.

use crate::model::SessionStatus;
use crate::orchestrator::SessionReport;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary from a session report.
pub(crate) fn build_text_summary(report: &SessionReport) -> TextSummary {
    let mut lines = Vec::new();

    lines.push(format!("File: {}", report.file_name.as_deref().unwrap_or("-")));
    if let Some(task_id) = report.task_id.as_ref() {
        lines.push(format!("Task: {task_id}"));
    }

    match (report.status, report.inferred_schema.as_ref()) {
        (SessionStatus::Succeeded, Some(schema)) if schema.is_empty() => {
            lines.push("No columns inferred.".to_string());
        }
        (SessionStatus::Succeeded, Some(schema)) => {
            let width = schema
                .keys()
                .map(|c| c.chars().count())
                .chain(std::iter::once("Column".len()))
                .max()
                .unwrap_or(0);
            lines.push(format!("{:<width$}  {:<10}  Override", "Column", "Inferred"));
            for (column, inferred) in schema {
                let over = report
                    .overrides
                    .get(column)
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "-".to_string());
                lines.push(format!("{column:<width$}  {inferred:<10}  {over}"));
            }
        }
        _ => {
            lines.push(format!(
                "Failed: {}",
                report.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    TextSummary { lines }
}
