//! Grounding prompt for the translation step.
//!
//! The prompt is assembled from fixed sections:
//!
//! ```text
//! preamble → data sources → rules → output format → worked examples
//!          → recent conversation → question
//! ```
//!
//! Size is bounded: schema text stops at `max_schema_chars` (whole tables are
//! omitted, never cut mid-line), at most `history_turns` turns are included,
//! each turn is truncated to `max_turn_chars` and the question to
//! `max_question_chars`. Building never fails.

use serde_json::json;
use std::fmt::Write as _;

use crate::catalog::{render_source_header, render_table, RenderOptions, SchemaCatalog};
use crate::models::{ConversationTurn, DataSourceSchema};

/// Value of `preferredSourceId` that lets the translator choose the source.
pub const AUTO_SOURCE: &str = "auto";

#[derive(Debug, Clone, Copy)]
pub struct PromptLimits {
    pub history_turns: usize,
    pub max_turn_chars: usize,
    pub max_question_chars: usize,
    pub max_schema_chars: usize,
    pub max_examples_per_source: usize,
    pub render: RenderOptions,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            history_turns: 3,
            max_turn_chars: 500,
            max_question_chars: 2_000,
            max_schema_chars: 12_000,
            max_examples_per_source: 2,
            render: RenderOptions::default(),
        }
    }
}

pub struct PromptBuilder<'a> {
    catalog: &'a SchemaCatalog,
    limits: PromptLimits,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(catalog: &'a SchemaCatalog, limits: PromptLimits) -> Self {
        Self { catalog, limits }
    }

    pub fn build(
        &self,
        question: &str,
        preferred_source: &str,
        history: &[ConversationTurn],
    ) -> String {
        let scope = if preferred_source == AUTO_SOURCE {
            None
        } else {
            Some(preferred_source)
        };
        let sources = self.catalog.scoped(scope);
        let pinned = scope.filter(|id| self.catalog.contains(id));

        let mut prompt = String::from(
            "You translate business questions into read-only queries against the data \
             sources described below.\n\n",
        );

        prompt.push_str("# Data sources\n\n");
        prompt.push_str(&self.render_schema(&sources));

        prompt.push_str("# Rules\n");
        prompt.push_str(
            "- Produce exactly one read-only statement starting with SELECT, SHOW, DESCRIBE or EXPLAIN.\n",
        );
        prompt.push_str("- Never modify data or schema.\n");
        prompt.push_str("- Use only the tables and columns listed above.\n");
        match pinned {
            Some(id) => {
                let _ = writeln!(
                    prompt,
                    "- The user selected data source `{}`; set dataSourceId to it.",
                    id
                );
            }
            None => prompt
                .push_str("- Choose the single data source best able to answer the question.\n"),
        }
        prompt.push_str(
            "- Set confidence between 0 and 1 to reflect how sure you are the query answers the question.\n\n",
        );

        prompt.push_str("# Output format\n");
        prompt.push_str("Reply with a single JSON object and nothing else.\n");
        prompt.push_str("On success:\n");
        prompt.push_str(
            r#"{"success": true, "query": "<query>", "dataSourceId": "<source id>", "explanation": "<one sentence>", "confidence": <0..1>}"#,
        );
        prompt.push_str("\nIf the question cannot be answered from these sources:\n");
        prompt.push_str(r#"{"success": false, "error": "<reason>"}"#);
        prompt.push_str("\n\n");

        let examples = self.render_examples(&sources);
        if !examples.is_empty() {
            prompt.push_str("# Examples\n");
            prompt.push_str(&examples);
            prompt.push('\n');
        }

        let history = self.render_history(history);
        if !history.is_empty() {
            prompt.push_str("# Conversation so far\n");
            prompt.push_str(&history);
            prompt.push('\n');
        }

        prompt.push_str("# Question\n");
        prompt.push_str(&truncate_chars(question.trim(), self.limits.max_question_chars));
        prompt.push('\n');

        prompt
    }

    fn render_schema(&self, sources: &[&DataSourceSchema]) -> String {
        let budget = self.limits.max_schema_chars;
        let mut out = String::new();
        let mut omitted = 0usize;

        for source in sources {
            out.push_str(&render_source_header(source));
            for table in &source.tables {
                let text = render_table(table, &self.limits.render);
                if out.len() + text.len() > budget {
                    omitted += 1;
                    continue;
                }
                out.push_str(&text);
            }
            out.push('\n');
        }

        if omitted > 0 {
            let _ = writeln!(out, "({} tables omitted for brevity)\n", omitted);
        }
        out
    }

    fn render_examples(&self, sources: &[&DataSourceSchema]) -> String {
        let mut out = String::new();
        for source in sources {
            for example in source
                .examples
                .iter()
                .take(self.limits.max_examples_per_source)
            {
                let reply = json!({
                    "success": true,
                    "query": example.query,
                    "dataSourceId": source.id,
                    "explanation": format!("Answers: {}", example.question),
                    "confidence": 0.95,
                });
                let _ = writeln!(out, "Question: {}\nReply: {}", example.question, reply);
            }
        }
        out
    }

    fn render_history(&self, history: &[ConversationTurn]) -> String {
        let skip = history.len().saturating_sub(self.limits.history_turns);
        history[skip..]
            .iter()
            .map(|turn| {
                format!(
                    "{}: {}\n",
                    turn.role.as_str(),
                    truncate_chars(turn.content.trim(), self.limits.max_turn_chars)
                )
            })
            .collect()
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn turn(role: Role, content: &str) -> ConversationTurn {
        ConversationTurn {
            role,
            content: content.to_string(),
            timestamp: None,
        }
    }

    #[test]
    fn test_auto_renders_every_source() {
        let catalog = SchemaCatalog::builtin().unwrap();
        let prompt = PromptBuilder::new(&catalog, PromptLimits::default()).build(
            "How many templates do we have?",
            AUTO_SOURCE,
            &[],
        );
        for id in ["warehouse", "application_db", "crm", "analytics"] {
            assert!(prompt.contains(&format!("`{}`", id)), "missing {}", id);
        }
        assert!(prompt.contains("Choose the single data source"));
        assert!(prompt.ends_with("# Question\nHow many templates do we have?\n"));
        assert!(!prompt.contains("# Conversation so far"));
    }

    #[test]
    fn test_preferred_source_scopes_schema_and_examples() {
        let catalog = SchemaCatalog::builtin().unwrap();
        let prompt = PromptBuilder::new(&catalog, PromptLimits::default()).build(
            "open tickets?",
            "application_db",
            &[],
        );
        assert!(prompt.contains("Table templates"));
        assert!(!prompt.contains("Table customers"));
        assert!(prompt.contains("set dataSourceId to it"));
        assert!(prompt.contains(r#""dataSourceId":"application_db""#));
        assert!(!prompt.contains(r#""dataSourceId":"warehouse""#));
        assert!(prompt.contains(
            "Sample query: SELECT category, COUNT(*) FROM templates GROUP BY category\n"
        ));
        assert!(!prompt.contains("FROM customers GROUP BY region"));
    }

    #[test]
    fn test_only_last_three_turns() {
        let catalog = SchemaCatalog::builtin().unwrap();
        let history = vec![
            turn(Role::User, "first"),
            turn(Role::Assistant, "second"),
            turn(Role::User, "third"),
            turn(Role::Assistant, "fourth"),
        ];
        let prompt = PromptBuilder::new(&catalog, PromptLimits::default()).build(
            "and now?",
            AUTO_SOURCE,
            &history,
        );
        assert!(!prompt.contains("user: first"));
        assert!(prompt.contains("assistant: second\nuser: third\nassistant: fourth\n"));
    }

    #[test]
    fn test_schema_budget_omits_tables() {
        let catalog = SchemaCatalog::builtin().unwrap();
        let limits = PromptLimits {
            max_schema_chars: 400,
            ..PromptLimits::default()
        };
        let tight = PromptBuilder::new(&catalog, limits).build("q", AUTO_SOURCE, &[]);
        let roomy = PromptBuilder::new(&catalog, PromptLimits::default()).build("q", AUTO_SOURCE, &[]);
        assert!(tight.contains("tables omitted for brevity"));
        assert!(tight.len() < roomy.len());
    }

    #[test]
    fn test_long_turns_truncated() {
        let catalog = SchemaCatalog::builtin().unwrap();
        let limits = PromptLimits {
            max_turn_chars: 10,
            ..PromptLimits::default()
        };
        let history = vec![turn(Role::User, &"x".repeat(50))];
        let prompt = PromptBuilder::new(&catalog, limits).build("q", AUTO_SOURCE, &history);
        assert!(prompt.contains(&format!("user: {}…\n", "x".repeat(10))));
    }

    #[test]
    fn test_long_question_truncated() {
        let catalog = SchemaCatalog::builtin().unwrap();
        let limits = PromptLimits {
            max_question_chars: 20,
            ..PromptLimits::default()
        };
        let question = format!("  {}  ", "é".repeat(100));
        let prompt = PromptBuilder::new(&catalog, limits).build(&question, AUTO_SOURCE, &[]);
        assert!(prompt.ends_with(&format!("# Question\n{}…\n", "é".repeat(20))));
    }
}
