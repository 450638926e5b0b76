//! Conversational rendering of a [`QueryResult`].
//!
//! Small results are listed in full; larger ones show a preview followed by
//! `... and K more results`. Every non-empty answer ends with the execution
//! time.

use serde_json::Value;
use std::fmt::Write as _;

use crate::models::{QueryResult, Row};

/// Reply used verbatim when a query returns no rows.
pub const NO_DATA_MESSAGE: &str =
    "I ran the query, but no data was found matching your question.";

/// Rendered in place of missing or null cells.
pub const MISSING_VALUE: &str = "N/A";

#[derive(Debug, Clone, Copy)]
pub struct ResultFormatter {
    /// Results with at most this many rows are listed in full.
    pub full_listing_max_rows: usize,
    /// Rows shown when a result is too large to list in full.
    pub preview_rows: usize,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self {
            full_listing_max_rows: 10,
            preview_rows: 5,
        }
    }
}

impl ResultFormatter {
    pub fn format(
        &self,
        result: &QueryResult,
        explanation: &str,
        execution_time_seconds: f64,
    ) -> String {
        if result.is_empty() {
            return NO_DATA_MESSAGE.to_string();
        }
        let total = result.rows.len();

        let mut out = String::new();
        let explanation = explanation.trim();
        if !explanation.is_empty() {
            out.push_str(explanation);
            out.push_str("\n\n");
        }

        let shown = if total <= self.full_listing_max_rows {
            if total == 1 {
                out.push_str("I found 1 result:\n");
            } else {
                let _ = writeln!(out, "I found {} results:", total);
            }
            total
        } else {
            let _ = writeln!(
                out,
                "I found {} results. Here are the first {}:",
                total, self.preview_rows
            );
            self.preview_rows.min(total)
        };

        for (i, row) in result.rows.iter().take(shown).enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, render_row(row, &result.columns));
        }

        if shown < total {
            let _ = writeln!(out, "... and {} more results", total - shown);
        }

        let _ = write!(
            out,
            "\n(Query executed in {:.2} seconds)",
            execution_time_seconds
        );

        out
    }
}

/// `col: val | col: val`, in column order. Falls back to the row's own keys
/// when the backend reported no column list.
fn render_row(row: &Row, columns: &[String]) -> String {
    let cells: Vec<String> = if columns.is_empty() {
        row.iter()
            .map(|(name, value)| format!("{}: {}", name, render_value(Some(value))))
            .collect()
    } else {
        columns
            .iter()
            .map(|name| format!("{}: {}", name, render_value(row.get(name))))
            .collect()
    };
    cells.join(" | ")
}

fn render_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => MISSING_VALUE.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
