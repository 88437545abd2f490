//! Output formatting utilities for MCP tools.
//!
//! Renders a [`QueryResult`] as an ASCII table (MySQL CLI style) or a
//! Markdown table.

use crate::models::QueryResult;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

/// Output format for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// ASCII table format (like MySQL CLI)
    Table,
    /// Markdown table format
    Markdown,
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(arr) => serde_json::to_string(arr).unwrap_or_default(),
        JsonValue::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

fn affected_summary(result: &QueryResult) -> Option<String> {
    let affected = result.rows_affected?;
    let noun = if affected == 1 { "row" } else { "rows" };
    Some(format!(
        "Query OK, {} {} affected ({:.2} sec)",
        affected,
        noun,
        result.execution_time_ms as f64 / 1000.0
    ))
}

pub fn format_as_table(result: &QueryResult) -> String {
    if let Some(summary) = affected_summary(result) {
        return summary;
    }
    if result.columns.is_empty() {
        return "Empty set".to_string();
    }

    let columns = &result.columns;
    let mut widths: Vec<usize> = columns.iter().map(|c| c.name.width()).collect();
    for row in &result.rows {
        for (i, col) in columns.iter().enumerate() {
            if let Some(value) = row.get(&col.name) {
                widths[i] = widths[i].max(format_value(value).width());
            }
        }
    }

    let mut output = String::new();
    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!("| {} ", pad_center(&col.name, *w)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in &result.rows {
        let row_str: String = columns
            .iter()
            .zip(&widths)
            .map(|(col, w)| {
                let value = row.get(&col.name).unwrap_or(&JsonValue::Null);
                let formatted = format_value(value);
                // Right-align numbers, left-align others
                if value.is_number() {
                    format!("| {} ", pad_left(&formatted, *w))
                } else {
                    format!("| {} ", pad_right(&formatted, *w))
                }
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&separator);

    let row_count = result.row_count();
    let row_text = if row_count == 1 { "row" } else { "rows" };
    let truncated_text = if result.truncated { " (truncated)" } else { "" };
    output.push_str(&format!(
        "{} {} in set{} ({:.2} sec)\n",
        row_count,
        row_text,
        truncated_text,
        result.execution_time_ms as f64 / 1000.0
    ));

    output
}

pub fn format_as_markdown(result: &QueryResult) -> String {
    if let Some(summary) = affected_summary(result) {
        return format!("*{}*", summary);
    }
    if result.columns.is_empty() {
        return "*Empty set*".to_string();
    }

    let mut output = String::new();
    let header: String = result
        .columns
        .iter()
        .map(|c| format!("| {} ", escape_markdown(&c.name)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);

    let sep: String = result.columns.iter().map(|_| "|---").collect::<String>() + "|\n";
    output.push_str(&sep);

    for row in &result.rows {
        let row_str: String = result
            .columns
            .iter()
            .map(|col| {
                let value = row.get(&col.name).unwrap_or(&JsonValue::Null);
                format!("| {} ", escape_markdown(&format_value(value)))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    let truncated_text = if result.truncated {
        " *(truncated)*"
    } else {
        ""
    };
    output.push_str(&format!("\n*{} rows*{}", result.row_count(), truncated_text));

    output
}

/// `{:^w$}` pads by char count; these pad by display width.
fn pad_center(s: &str, width: usize) -> String {
    let fill = width.saturating_sub(s.width());
    let left = fill / 2;
    format!("{}{}{}", " ".repeat(left), s, " ".repeat(fill - left))
}

fn pad_left(s: &str, width: usize) -> String {
    format!("{}{}", " ".repeat(width.saturating_sub(s.width())), s)
}

fn pad_right(s: &str, width: usize) -> String {
    format!("{}{}", s, " ".repeat(width.saturating_sub(s.width())))
}

fn escape_markdown(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}
