//! Backend dispatch: data source id → [`Backend`] executor.
//!
//! [`BackendRegistry`] replaces per-source branching with a lookup table.
//! Resolution of a requested source id:
//!
//! | Requested id | Result |
//! |--------------|--------|
//! | has a registered backend | that backend |
//! | known to the catalog, no backend | `BackendUnavailable` |
//! | unknown, fallback enabled | the default source's backend |
//! | unknown, fallback disabled | `BackendUnavailable` |
//!
//! The fallback absorbs mistakes in the translator's source detection.
//! Every call is wrapped in a timeout and timed end to end.

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use askdata_core::backend::{Backend, BackendError};
use askdata_core::models::QueryResult;

use crate::backend_http::HttpBackend;
use crate::backend_sqlite::SqliteBackend;
use crate::config::{BackendConfig, Config};

/// A result together with the source id that actually served it.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub source_id: String,
    pub result: QueryResult,
}

/// Registered backend, as listed by `GET /sources` and `askdata sources`.
#[derive(Debug, Clone, Serialize)]
pub struct BackendInfo {
    pub id: String,
    pub kind: String,
    pub is_default: bool,
}

pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn Backend>>,
    known_sources: HashSet<String>,
    default_source: String,
    fallback_to_default: bool,
    timeout: Duration,
}

impl BackendRegistry {
    /// Create an empty registry.
    ///
    /// `known_sources` are the catalog's source ids; requests for those are
    /// never redirected to the default backend.
    pub fn new(
        known_sources: impl IntoIterator<Item = String>,
        default_source: impl Into<String>,
        fallback_to_default: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            backends: BTreeMap::new(),
            known_sources: known_sources.into_iter().collect(),
            default_source: default_source.into(),
            fallback_to_default,
            timeout,
        }
    }

    /// Build a registry with every backend declared under `[backends]`.
    ///
    /// A backend whose credentials are missing from the environment is
    /// skipped with a warning; requests for it report `BackendUnavailable`.
    pub fn from_config(config: &Config, known_sources: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut registry = Self::new(
            known_sources,
            config.policy.default_source.clone(),
            config.policy.fallback_to_default,
            Duration::from_secs(config.execution.timeout_secs),
        );

        for (id, backend_cfg) in &config.backends {
            let backend: Arc<dyn Backend> = match backend_cfg {
                BackendConfig::Sqlite { path } => Arc::new(
                    SqliteBackend::open(path)?.with_max_rows(config.execution.max_rows),
                ),
                BackendConfig::Http { url, token_env } => {
                    match HttpBackend::new(url, token_env.as_deref(), registry.timeout) {
                        Ok(b) => Arc::new(b),
                        Err(e) => {
                            tracing::warn!(source = %id, error = %e, "skipping backend");
                            continue;
                        }
                    }
                }
            };
            registry.register(id.clone(), backend);
        }

        if !registry.backends.contains_key(&registry.default_source) {
            tracing::warn!(
                default_source = %registry.default_source,
                "no backend configured for the default source"
            );
        }

        Ok(registry)
    }

    /// Register (or replace) the executor for `source_id`.
    pub fn register(&mut self, source_id: impl Into<String>, backend: Arc<dyn Backend>) {
        let source_id = source_id.into();
        self.known_sources.insert(source_id.clone());
        self.backends.insert(source_id, backend);
    }

    pub fn default_source(&self) -> &str {
        &self.default_source
    }

    pub fn describe(&self) -> Vec<BackendInfo> {
        self.backends
            .iter()
            .map(|(id, b)| BackendInfo {
                id: id.clone(),
                kind: b.kind().to_string(),
                is_default: *id == self.default_source,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Source id that will serve a request for `source_id`.
    pub fn resolve(&self, source_id: &str) -> Result<String, BackendError> {
        if self.backends.contains_key(source_id) {
            return Ok(source_id.to_string());
        }
        if self.known_sources.contains(source_id) {
            return Err(BackendError::Unavailable(format!(
                "no backend configured for data source '{}'",
                source_id
            )));
        }
        if self.fallback_to_default {
            if self.backends.contains_key(&self.default_source) {
                tracing::info!(
                    requested = %source_id,
                    fallback = %self.default_source,
                    "unknown data source, using default backend"
                );
                return Ok(self.default_source.clone());
            }
            return Err(BackendError::Unavailable(format!(
                "no backend configured for default data source '{}'",
                self.default_source
            )));
        }
        Err(BackendError::Unavailable(format!(
            "unknown data source '{}'",
            source_id
        )))
    }

    /// Execute `query` on the backend resolved for `source_id`.
    pub async fn execute(&self, source_id: &str, query: &str) -> Result<Dispatched, BackendError> {
        let resolved = self.resolve(source_id)?;
        let backend = self
            .backends
            .get(&resolved)
            .ok_or_else(|| BackendError::Unavailable(format!("backend '{}' vanished", resolved)))?;

        let started = Instant::now();
        let mut result = match tokio::time::timeout(self.timeout, backend.execute(query)).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                return Err(BackendError::Unavailable(format!(
                    "backend '{}' timed out after {:.1}s",
                    resolved,
                    self.timeout.as_secs_f64()
                )))
            }
        };
        result.execution_time_seconds = started.elapsed().as_secs_f64();
        result.row_count = result.rows.len();

        Ok(Dispatched {
            source_id: resolved,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use askdata_core::models::Row;
    use serde_json::json;

    struct Fixed {
        label: &'static str,
    }

    #[async_trait]
    impl Backend for Fixed {
        fn kind(&self) -> &str {
            "fixed"
        }
        async fn execute(&self, _query: &str) -> Result<QueryResult, BackendError> {
            let mut row = Row::new();
            row.insert("served_by".into(), json!(self.label));
            let mut result = QueryResult::new(vec!["served_by".into()], vec![row]);
            result.row_count = 99;
            Ok(result)
        }
    }

    struct Hanging;

    #[async_trait]
    impl Backend for Hanging {
        fn kind(&self) -> &str {
            "hanging"
        }
        async fn execute(&self, _query: &str) -> Result<QueryResult, BackendError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(QueryResult::default())
        }
    }

    fn registry(fallback: bool) -> BackendRegistry {
        let known = ["warehouse", "application_db", "crm"].map(String::from);
        let mut r = BackendRegistry::new(known, "warehouse", fallback, Duration::from_secs(2));
        r.register("warehouse", Arc::new(Fixed { label: "warehouse" }));
        r.register("application_db", Arc::new(Fixed { label: "app" }));
        r
    }

    #[tokio::test]
    async fn test_dispatches_by_source_id() {
        let d = registry(true).execute("application_db", "SELECT 1").await.unwrap();
        assert_eq!(d.source_id, "application_db");
        assert_eq!(d.result.rows[0]["served_by"], json!("app"));
        // row_count is recomputed from rows
        assert_eq!(d.result.row_count, 1);
        assert!(d.result.execution_time_seconds >= 0.0);
    }

    #[tokio::test]
    async fn test_unknown_source_falls_back_to_default() {
        let d = registry(true).execute("snowflake_prod", "SELECT 1").await.unwrap();
        assert_eq!(d.source_id, "warehouse");
    }

    #[tokio::test]
    async fn test_unknown_source_without_fallback() {
        let err = registry(false).execute("nope", "SELECT 1").await.unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_known_but_unconfigured_source_is_unavailable() {
        let err = registry(true).execute("crm", "SELECT 1").await.unwrap_err();
        assert_eq!(
            err,
            BackendError::Unavailable("no backend configured for data source 'crm'".into())
        );
    }

    #[tokio::test]
    async fn test_timeout_is_unavailable() {
        let mut r = BackendRegistry::new(Vec::<String>::new(), "slow", true, Duration::from_millis(50));
        r.register("slow", Arc::new(Hanging));
        let err = r.execute("slow", "SELECT 1").await.unwrap_err();
        match err {
            BackendError::Unavailable(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_describe_marks_default() {
        let infos = registry(true).describe();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().any(|i| i.id == "warehouse" && i.is_default));
        assert!(infos.iter().any(|i| i.id == "application_db" && !i.is_default));
    }
}
