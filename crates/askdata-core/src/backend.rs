//! Backend executor capability.
//!
//! Every data source (warehouse, application database, CRM, analytics store,
//! ...) is reached through one [`Backend`] implementation. The dispatcher only
//! sees this trait, so adding a backend never touches dispatch logic.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::QueryResult;

/// Failure of a backend call. An empty result is *not* an error; a fault
/// must never be reported as zero rows.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Not configured, unreachable, or timed out.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// The backend was reached but rejected or failed the query.
    #[error("query failed: {0}")]
    Execution(String),
}

/// A query executor for one data source.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use askdata_core::backend::{Backend, BackendError};
/// use askdata_core::models::QueryResult;
///
/// struct Empty;
///
/// #[async_trait]
/// impl Backend for Empty {
///     fn kind(&self) -> &str { "empty" }
///
///     async fn execute(&self, _query: &str) -> Result<QueryResult, BackendError> {
///         Ok(QueryResult::new(vec![], vec![]))
///     }
/// }
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short implementation label, e.g. `"sqlite"` or `"http"`.
    fn kind(&self) -> &str;

    /// Run an already validated, read-only query.
    ///
    /// Implementations fill `rows`, `columns`, `row_count` and optionally
    /// `backend_query_id`; execution time is measured by the dispatcher.
    async fn execute(&self, query: &str) -> Result<QueryResult, BackendError>;
}
