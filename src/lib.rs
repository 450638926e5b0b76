//! # askdata
//!
//! Ask questions of your data in plain English.
//!
//! askdata turns a question into a read-only query with an external
//! translation model, checks that query against a conservative safety
//! gate, runs it on the right backend and answers with a short,
//! human-readable summary of the rows.
//!
//! ## Architecture
//!
//! ```text
//!  question ─▶ PromptBuilder ─▶ TranslationGateway ─▶ sanitize ─▶ QueryValidator
//!                   ▲                  │ (LLM)                          │
//!             SchemaCatalog            ▼                                ▼
//!                              ConfidenceGate ◀─────────────────────────┘
//!                                      │
//!                                      ▼
//!                              BackendRegistry ─▶ sqlite / http / custom
//!                                      │
//!                                      ▼
//!                              ResultFormatter ─▶ response
//! ```
//!
//! The pure stages live in the `askdata-core` crate; this crate adds the
//! translation client, backend executors, orchestration, rate limiting,
//! the HTTP server and the CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! askdata check "SELECT * FROM orders -- all"
//! askdata catalog --source application_db
//! askdata ask "How many templates do we have?"
//! askdata serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`translate`] | Translation gateway and translator clients |
//! | [`backend_sqlite`] | Read-only SQLite executor |
//! | [`backend_http`] | Remote query service executor |
//! | [`dispatch`] | Source id → backend registry |
//! | [`pipeline`] | End-to-end request orchestration |
//! | [`rate_limit`] | Per-client request limiter |
//! | [`server`] | HTTP server |
//! | [`sources`] | Source listing |

pub mod backend_http;
pub mod backend_sqlite;
pub mod config;
pub mod dispatch;
pub mod pipeline;
pub mod rate_limit;
pub mod server;
pub mod sources;
pub mod translate;

pub use askdata_core as core;
