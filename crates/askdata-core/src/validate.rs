//! Read-only safety gate for candidate queries.
//!
//! The check is pattern based, not a parser. A query is safe only if:
//!
//! 1. it starts with `SELECT`, `SHOW`, `DESCRIBE` or `EXPLAIN`;
//! 2. no denylisted construct appears anywhere in its body;
//! 3. it is a single statement (nothing follows a `;` except more `;`).
//!
//! All patterns are case-insensitive and run against text already passed
//! through [`sanitize`](crate::sanitize::sanitize). The denylist over-rejects:
//! `SELECT * FROM backdrop table` fails just like a real `DROP TABLE`.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

static READ_ONLY_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(select|show|describe|explain)\b").expect("static regex")
});

/// `(label, pattern)`. Two-word phrases have no leading word boundary so
/// that any occurrence of e.g. `drop table` is caught.
static DENYLIST: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("DROP TABLE", r"(?i)drop\s+table\b"),
        ("DELETE FROM", r"(?i)delete\s+from\b"),
        ("TRUNCATE TABLE", r"(?i)truncate\s+table\b"),
        ("ALTER TABLE", r"(?i)alter\s+table\b"),
        ("CREATE TABLE", r"(?i)create\s+table\b"),
        ("INSERT INTO", r"(?i)insert\s+into\b"),
        ("UPDATE ... SET", r"(?i)\bupdate\s+\S+\s+set\b"),
        ("GRANT", r"(?i)\bgrant\b"),
        ("REVOKE", r"(?i)\brevoke\b"),
        ("EXEC", r"(?i)\bexec(ute)?\b"),
    ]
    .into_iter()
    .map(|(label, pattern)| (label, Regex::new(pattern).expect("static regex")))
    .collect()
});

/// Why a query failed the safety gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    Empty,
    NotReadOnly,
    Denylisted { construct: &'static str },
    MultipleStatements,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Empty => write!(f, "query is empty"),
            Violation::NotReadOnly => write!(
                f,
                "query must start with SELECT, SHOW, DESCRIBE or EXPLAIN"
            ),
            Violation::Denylisted { construct } => {
                write!(f, "query contains a forbidden construct ({})", construct)
            }
            Violation::MultipleStatements => write!(f, "only a single statement is allowed"),
        }
    }
}

/// Stateless read-only policy. Cheap to construct; the patterns are
/// compiled once per process.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryValidator;

impl QueryValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn is_safe(&self, query: &str) -> bool {
        self.check(query).is_ok()
    }

    /// Evaluate the policy in order and report the first violated rule.
    pub fn check(&self, query: &str) -> Result<(), Violation> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(Violation::Empty);
        }

        if !READ_ONLY_ANCHOR.is_match(trimmed) {
            return Err(Violation::NotReadOnly);
        }

        if let Some((label, _)) = DENYLIST.iter().find(|(_, re)| re.is_match(trimmed)) {
            return Err(Violation::Denylisted { construct: label });
        }

        if has_trailing_statement(trimmed) {
            return Err(Violation::MultipleStatements);
        }

        Ok(())
    }
}

fn has_trailing_statement(query: &str) -> bool {
    match query.find(';') {
        Some(pos) => query[pos..].chars().any(|c| c != ';' && !c.is_whitespace()),
        None => false,
    }
}
