//! TOML configuration parsing and validation.
//!
//! Every section is optional; [`Config::minimal`] is the all-defaults
//! configuration. [`load_config`] parses a file and rejects invalid values.
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:7341"
//!
//! [translation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [policy]
//! confidence_threshold = 0.7
//! default_source = "warehouse"
//!
//! [backends.application_db]
//! kind = "sqlite"
//! path = "./data/app.sqlite"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use askdata_core::catalog::RenderOptions;
use askdata_core::prompt::PromptLimits;
use askdata_core::ResultFormatter;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub format: FormatConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    /// Backend executors keyed by data source id.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranslationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: f64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            temperature: 0.0,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl TranslationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Backend used when the translator names an unknown source.
    #[serde(default = "default_source")]
    pub default_source: String,
    #[serde(default = "default_true")]
    pub fallback_to_default: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            default_source: default_source(),
            fallback_to_default: true,
        }
    }
}

fn default_confidence_threshold() -> f64 {
    askdata_core::gate::DEFAULT_CONFIDENCE_THRESHOLD
}
fn default_source() -> String {
    "warehouse".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct PromptConfig {
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    #[serde(default = "default_max_turn_chars")]
    pub max_turn_chars: usize,
    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,
    #[serde(default = "default_max_columns")]
    pub max_columns_per_table: usize,
    #[serde(default = "default_max_examples")]
    pub max_examples_per_column: usize,
    #[serde(default = "default_max_schema_chars")]
    pub max_schema_chars: usize,
    /// Worked examples shown per source.
    #[serde(default = "default_max_examples_per_source")]
    pub max_examples_per_source: usize,
    /// `sampleQueries` listed under each table.
    #[serde(default = "default_max_sample_queries")]
    pub max_sample_queries_per_table: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            max_turn_chars: default_max_turn_chars(),
            max_question_chars: default_max_question_chars(),
            max_columns_per_table: default_max_columns(),
            max_examples_per_column: default_max_examples(),
            max_schema_chars: default_max_schema_chars(),
            max_examples_per_source: default_max_examples_per_source(),
            max_sample_queries_per_table: default_max_sample_queries(),
        }
    }
}

fn default_history_turns() -> usize {
    3
}
fn default_max_turn_chars() -> usize {
    500
}
fn default_max_question_chars() -> usize {
    2_000
}
fn default_max_columns() -> usize {
    12
}
fn default_max_examples() -> usize {
    3
}
fn default_max_schema_chars() -> usize {
    12_000
}
fn default_max_examples_per_source() -> usize {
    2
}
fn default_max_sample_queries() -> usize {
    2
}

impl PromptConfig {
    pub fn limits(&self) -> PromptLimits {
        PromptLimits {
            history_turns: self.history_turns,
            max_turn_chars: self.max_turn_chars,
            max_question_chars: self.max_question_chars,
            max_schema_chars: self.max_schema_chars,
            max_examples_per_source: self.max_examples_per_source,
            render: RenderOptions {
                max_columns_per_table: self.max_columns_per_table,
                max_examples_per_column: self.max_examples_per_column,
                max_sample_queries_per_table: self.max_sample_queries_per_table,
            },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Larger SQLite results fail instead of being loaded.
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_rows: default_max_rows(),
        }
    }
}

fn default_max_rows() -> usize {
    crate::backend_sqlite::DEFAULT_MAX_ROWS
}

#[derive(Debug, Deserialize, Clone)]
pub struct FormatConfig {
    #[serde(default = "default_full_listing")]
    pub full_listing_max_rows: usize,
    #[serde(default = "default_preview_rows")]
    pub preview_rows: usize,
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            full_listing_max_rows: default_full_listing(),
            preview_rows: default_preview_rows(),
        }
    }
}

fn default_full_listing() -> usize {
    10
}
fn default_preview_rows() -> usize {
    5
}

impl FormatConfig {
    pub fn formatter(&self) -> ResultFormatter {
        ResultFormatter {
            full_listing_max_rows: self.full_listing_max_rows,
            preview_rows: self.preview_rows,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_tracked_clients")]
    pub max_tracked_clients: usize,
    /// Key clients by the `x-client-id` header instead of the peer IP.
    /// Only safe behind a proxy that sets the header itself.
    #[serde(default)]
    pub trust_client_id_header: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            max_tracked_clients: default_max_tracked_clients(),
            trust_client_id_header: false,
        }
    }
}

fn default_max_requests() -> u32 {
    30
}
fn default_window_secs() -> u64 {
    60
}
fn default_max_tracked_clients() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    /// TOML catalog file; the built-in catalog is used when unset.
    pub path: Option<PathBuf>,
}

/// One backend executor, tagged by `kind`.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    Sqlite {
        path: PathBuf,
    },
    Http {
        url: String,
        /// Environment variable holding a bearer token, if the endpoint needs one.
        #[serde(default)]
        token_env: Option<String>,
    },
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Sqlite { .. } => "sqlite",
            BackendConfig::Http { .. } => "http",
        }
    }
}

impl Config {
    /// All-defaults configuration for commands that can run without a file.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content).with_context(|| format!("Invalid config file: {}", path.display()))
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Policy
    if !(0.0..=1.0).contains(&config.policy.confidence_threshold) {
        anyhow::bail!("policy.confidence_threshold must be in [0.0, 1.0]");
    }
    if config.policy.default_source.trim().is_empty() {
        anyhow::bail!("policy.default_source must not be empty");
    }

    // Translation
    match config.translation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown translation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.translation.timeout_secs == 0 {
        anyhow::bail!("translation.timeout_secs must be > 0");
    }
    if config.execution.timeout_secs == 0 {
        anyhow::bail!("execution.timeout_secs must be > 0");
    }
    if config.execution.max_rows == 0 {
        anyhow::bail!("execution.max_rows must be > 0");
    }

    // Prompt
    if config.prompt.history_turns > 20 {
        anyhow::bail!("prompt.history_turns must be <= 20");
    }
    if config.prompt.max_schema_chars == 0 {
        anyhow::bail!("prompt.max_schema_chars must be > 0");
    }

    // Format
    if config.format.preview_rows == 0 {
        anyhow::bail!("format.preview_rows must be > 0");
    }
    if config.format.preview_rows > config.format.full_listing_max_rows {
        anyhow::bail!("format.preview_rows must be <= format.full_listing_max_rows");
    }

    // Rate limiting
    if config.rate_limit.enabled {
        if config.rate_limit.max_requests == 0 {
            anyhow::bail!("rate_limit.max_requests must be > 0");
        }
        if config.rate_limit.window_secs == 0 {
            anyhow::bail!("rate_limit.window_secs must be > 0");
        }
        if config.rate_limit.max_tracked_clients == 0 {
            anyhow::bail!("rate_limit.max_tracked_clients must be > 0");
        }
    }

    // Backends
    for (id, backend) in &config.backends {
        match backend {
            BackendConfig::Sqlite { path } if path.as_os_str().is_empty() => {
                anyhow::bail!("backends.{}.path must not be empty", id)
            }
            BackendConfig::Http { url, .. }
                if !(url.starts_with("http://") || url.starts_with("https://")) =>
            {
                anyhow::bail!("backends.{}.url must be an http(s) URL", id)
            }
            _ => {}
        }
    }

    Ok(())
}
