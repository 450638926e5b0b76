//! HTTP backend executor.
//!
//! Forwards the validated query to a remote query service:
//!
//! ```text
//! POST <url>
//! Authorization: Bearer <token>        (only when token_env is set)
//! { "query": "SELECT ..." }
//!
//! 200 OK
//! { "data": [...], "columns": [...], "rowCount": 3, "executionTime": 0.12, "queryId": "..." }
//! ```
//!
//! A service that cannot be reached is `Unavailable`. A non-2xx status, a
//! body without `data`, or a body carrying a top-level `error` is an
//! `Execution` failure, never an empty result.
//! The remote `rowCount` and `executionTime` are informational only, the
//! dispatcher recomputes both.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use askdata_core::backend::{Backend, BackendError};
use askdata_core::models::{QueryResult, Row};

pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutorReply {
    data: Vec<Row>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    query_id: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpBackend {
    /// `token_env` names an environment variable holding a bearer token.
    /// It must be set when given.
    pub fn new(url: &str, token_env: Option<&str>, timeout: Duration) -> Result<Self> {
        let token = match token_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| anyhow::anyhow!("{} environment variable not set", var))?,
            ),
            None => None,
        };

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            token,
        })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn kind(&self) -> &str {
        "http"
    }

    async fn execute(&self, query: &str) -> Result<QueryResult, BackendError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "query": query }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(BackendError::Execution(format!(
                "{}: {}",
                status,
                body_text.trim()
            )));
        }

        let reply: ExecutorReply = response
            .json()
            .await
            .map_err(|e| BackendError::Execution(format!("invalid executor response: {}", e)))?;

        if let Some(error) = reply.error.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
            return Err(BackendError::Execution(error.to_string()));
        }

        let columns = if reply.columns.is_empty() {
            reply
                .data
                .first()
                .map(|r| r.keys().cloned().collect())
                .unwrap_or_default()
        } else {
            reply.columns
        };

        let mut result = QueryResult::new(columns, reply.data);
        result.backend_query_id = reply.query_id;
        Ok(result)
    }
}
