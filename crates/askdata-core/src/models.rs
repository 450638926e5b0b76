//! Core data types shared across the translation → validation → dispatch
//! pipeline.
//!
//! Everything here is created per request and dropped once the response is
//! sent, except [`DataSourceSchema`] which is loaded once into the
//! [`SchemaCatalog`](crate::catalog::SchemaCatalog). None of these types carry
//! credentials.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Description of one queryable backend and its tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceSchema {
    pub id: String,
    pub display_name: String,
    pub description: String,
    #[serde(default)]
    pub tables: Vec<TableSchema>,
    /// Question → query pairs shown to the translator as worked examples.
    #[serde(default)]
    pub examples: Vec<WorkedExample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkedExample {
    pub question: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    /// Example queries against this table, listed under the table in prompts.
    #[serde(default)]
    pub sample_queries: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub description: String,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Speaker of a [`ConversationTurn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One message of the caller-owned conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// Opaque client timestamp; only the order of turns matters here.
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Typed reply of the translation collaborator.
///
/// Matches the JSON object the collaborator is instructed to emit. A
/// `success == true` result always has a non-empty `query` and
/// `data_source_id` once it leaves the translation gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Bounded to `[0.0, 1.0]` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A single result row: column name → scalar or opaque JSON value.
pub type Row = serde_json::Map<String, Value>;

/// Rows returned by a backend executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub execution_time_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_query_id: Option<String>,
}

impl QueryResult {
    /// Build a result whose `row_count` always equals `rows.len()`.
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let row_count = rows.len();
        Self {
            rows,
            columns,
            row_count,
            execution_time_seconds: 0.0,
            backend_query_id: None,
        }
    }

    pub fn with_query_id(mut self, id: impl Into<String>) -> Self {
        self.backend_query_id = Some(id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
