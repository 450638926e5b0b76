//! # askdata core
//!
//! Runtime-free logic for askdata: the data model, schema catalog, prompt
//! grounding, query sanitizer and read-only validator, confidence gate,
//! result formatter, and the [`Backend`](backend::Backend) trait.
//!
//! This crate contains no tokio, sqlx, HTTP client or filesystem access
//! beyond loading a catalog file. The `askdata` crate wires these pieces to
//! the translation service, concrete backends and the HTTP server.

pub mod backend;
pub mod catalog;
pub mod format;
pub mod gate;
pub mod models;
pub mod prompt;
pub mod sanitize;
pub mod validate;

pub use backend::{Backend, BackendError};
pub use catalog::SchemaCatalog;
pub use format::ResultFormatter;
pub use gate::ConfidenceGate;
pub use models::{ConversationTurn, QueryResult, Role, Row, TranslationResult};
pub use prompt::{PromptBuilder, PromptLimits, AUTO_SOURCE};
pub use sanitize::sanitize;
pub use validate::{QueryValidator, Violation};
