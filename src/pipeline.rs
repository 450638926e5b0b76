//! Request pipeline: question → prompt → translation → sanitize → validate →
//! confidence gate → dispatch → format.
//!
//! [`Pipeline::answer`] is the only entry point. Apart from an empty
//! message ([`InvalidInput`]), every outcome is a [`PipelineOutcome`]:
//! either an answer or a conversational rejection tagged with its
//! [`RejectionKind`]. Rejections never reach a backend, and a validation
//! rejection never echoes the offending query back to the user.
//!
//! ```text
//! translate ──ParseFailure/Unavailable/Declined──▶ Rejected
//!     │
//! sanitize → validate ──Violation──▶ Rejected (audit-logged)
//!     │
//! confidence gate ──below threshold──▶ Rejected (clarification)
//!     │
//! dispatch ──BackendError──▶ Rejected (apology)
//!     │
//! format ──▶ Answered
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use askdata_core::backend::BackendError;
use askdata_core::models::{ConversationTurn, TranslationResult};
use askdata_core::prompt::{PromptBuilder, PromptLimits, AUTO_SOURCE};
use askdata_core::{sanitize, ConfidenceGate, QueryValidator, ResultFormatter, SchemaCatalog};

use crate::config::Config;
use crate::dispatch::BackendRegistry;
use crate::translate::{create_translator, TranslationGateway, TranslationOutcome};

pub const PARSE_FAILURE_MESSAGE: &str =
    "Sorry, I couldn't understand how to answer that. Could you rephrase your question?";

pub const UNAVAILABLE_MESSAGE: &str =
    "The query assistant is temporarily unavailable. Please try again in a moment.";

pub const SECURITY_REFUSAL_MESSAGE: &str = "I can't run that query. For security reasons only \
     read-only queries (SELECT, SHOW, DESCRIBE, EXPLAIN) are allowed.";

/// A chat request as posted to `/chat`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    /// Source id or `"auto"`. Empty means `"auto"`.
    #[serde(default)]
    pub data_source: String,
    #[serde(default)]
    pub message_history: Vec<ConversationTurn>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data_source: AUTO_SOURCE.to_string(),
            message_history: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.data_source = source.into();
        self
    }

    pub fn with_history(mut self, history: Vec<ConversationTurn>) -> Self {
        self.message_history = history;
        self
    }

    fn preferred_source(&self) -> &str {
        match self.data_source.trim() {
            "" => AUTO_SOURCE,
            s => s,
        }
    }
}

/// The only request-level failure: nothing to translate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("message must be a non-empty string")]
pub struct InvalidInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    TranslationParseFailure,
    TranslationUnavailable,
    TranslationDeclined,
    ValidationRejected,
    LowConfidence,
    BackendUnavailable,
    BackendExecutionFailure,
}

impl RejectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::TranslationParseFailure => "translation_parse_failure",
            RejectionKind::TranslationUnavailable => "translation_unavailable",
            RejectionKind::TranslationDeclined => "translation_declined",
            RejectionKind::ValidationRejected => "validation_rejected",
            RejectionKind::LowConfidence => "low_confidence",
            RejectionKind::BackendUnavailable => "backend_unavailable",
            RejectionKind::BackendExecutionFailure => "backend_execution_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub response: String,
    /// The executed (sanitized) query.
    pub query: String,
    pub data_source: String,
    pub execution_time: f64,
    pub row_count: usize,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    #[serde(skip)]
    pub kind: RejectionKind,
    pub response: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Serializes directly to the `/chat` response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PipelineOutcome {
    Answered(Answer),
    Rejected(Rejection),
}

impl PipelineOutcome {
    pub fn response(&self) -> &str {
        match self {
            PipelineOutcome::Answered(a) => &a.response,
            PipelineOutcome::Rejected(r) => &r.response,
        }
    }

    pub fn rejection_kind(&self) -> Option<RejectionKind> {
        match self {
            PipelineOutcome::Answered(_) => None,
            PipelineOutcome::Rejected(r) => Some(r.kind),
        }
    }
}

/// Verdict of the safety gate on a single query, without executing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryCheck {
    pub sanitized: String,
    pub safe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Sanitize `raw` and run it through the validator.
pub fn check_query(validator: &QueryValidator, raw: &str) -> QueryCheck {
    let sanitized = sanitize(raw);
    let reason = validator.check(&sanitized).err().map(|v| v.to_string());
    QueryCheck {
        safe: reason.is_none(),
        sanitized,
        reason,
    }
}

/// Short SHA-256 fingerprint used to correlate audit log lines without
/// writing the query itself at `warn`.
pub fn query_fingerprint(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    hex::encode(&digest[..8])
}

/// The catalog named by `[catalog].path`, or the built-in one.
pub fn load_catalog(config: &Config) -> Result<SchemaCatalog> {
    match &config.catalog.path {
        Some(path) => SchemaCatalog::load(path),
        None => SchemaCatalog::builtin().context("Failed to load built-in catalog"),
    }
}

pub struct Pipeline {
    catalog: Arc<SchemaCatalog>,
    limits: PromptLimits,
    gateway: TranslationGateway,
    validator: QueryValidator,
    gate: ConfidenceGate,
    dispatcher: BackendRegistry,
    formatter: ResultFormatter,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        gateway: TranslationGateway,
        dispatcher: BackendRegistry,
    ) -> Self {
        Self {
            catalog,
            limits: PromptLimits::default(),
            gateway,
            validator: QueryValidator::new(),
            gate: ConfidenceGate::default(),
            dispatcher,
            formatter: ResultFormatter::default(),
        }
    }

    pub fn with_limits(mut self, limits: PromptLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_gate(mut self, gate: ConfidenceGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn with_formatter(mut self, formatter: ResultFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    /// Assemble the pipeline described by `config`: catalog, translator,
    /// backends and policy.
    pub fn from_config(config: &Config) -> Result<Self> {
        let catalog = load_catalog(config)?;
        if !config.translation.is_enabled() {
            tracing::warn!("translation is disabled; every question gets the retry-later reply");
        }
        let translator = create_translator(&config.translation)?;
        let gateway = TranslationGateway::new(
            translator,
            Duration::from_secs(config.translation.timeout_secs),
        );
        let known = catalog.describe().iter().map(|s| s.id.clone());
        let dispatcher = BackendRegistry::from_config(config, known)?;
        if dispatcher.is_empty() {
            tracing::warn!("no backends configured; every query will report the backend unavailable");
        }

        Ok(Self::new(Arc::new(catalog), gateway, dispatcher)
            .with_limits(config.prompt.limits())
            .with_gate(ConfidenceGate::new(config.policy.confidence_threshold))
            .with_formatter(config.format.formatter()))
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn dispatcher(&self) -> &BackendRegistry {
        &self.dispatcher
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    pub fn translator_name(&self) -> &str {
        self.gateway.translator_name()
    }

    /// Run one request through every stage.
    pub async fn answer(&self, request: &ChatRequest) -> Result<PipelineOutcome, InvalidInput> {
        let question = request.message.trim();
        if question.is_empty() {
            return Err(InvalidInput);
        }

        let preferred = request.preferred_source();
        let source_hint = if preferred == AUTO_SOURCE {
            self.dispatcher.default_source()
        } else {
            preferred
        };

        let prompt = PromptBuilder::new(&self.catalog, self.limits).build(
            question,
            preferred,
            &request.message_history,
        );
        tracing::debug!(prompt_chars = prompt.len(), preferred, "built prompt");

        let translation = match self.gateway.translate(&prompt, source_hint).await {
            TranslationOutcome::Translated(t) => t,
            TranslationOutcome::ParseFailure(detail) => {
                tracing::info!(%detail, "translation reply could not be parsed");
                return Ok(reject(
                    RejectionKind::TranslationParseFailure,
                    PARSE_FAILURE_MESSAGE.to_string(),
                    "translation parse failure".to_string(),
                ));
            }
            TranslationOutcome::Unavailable(detail) => {
                tracing::warn!(
                    translator = self.gateway.translator_name(),
                    %detail,
                    "translation unavailable"
                );
                return Ok(reject(
                    RejectionKind::TranslationUnavailable,
                    UNAVAILABLE_MESSAGE.to_string(),
                    detail,
                ));
            }
        };

        if !translation.success {
            let error = translation.error.clone().unwrap_or_default();
            tracing::info!(%error, "translator declined the question");
            return Ok(reject(
                RejectionKind::TranslationDeclined,
                format!("I couldn't turn that into a query: {}", error),
                error,
            ));
        }

        Ok(self.execute_translation(translation).await)
    }

    /// Stages after translation. `translation` is a successful one, so the
    /// query and data source are present.
    async fn execute_translation(&self, translation: TranslationResult) -> PipelineOutcome {
        let data_source = translation.data_source_id.clone().unwrap_or_default();
        let confidence = translation.confidence;
        let query = sanitize(translation.query.as_deref().unwrap_or_default());

        if let Err(violation) = self.validator.check(&query) {
            tracing::warn!(
                data_source = %data_source,
                fingerprint = %query_fingerprint(&query),
                %violation,
                "rejected unsafe query"
            );
            tracing::debug!(query = %query, "rejected query text");
            return PipelineOutcome::Rejected(Rejection {
                kind: RejectionKind::ValidationRejected,
                response: SECURITY_REFUSAL_MESSAGE.to_string(),
                error: format!("query rejected by safety policy: {}", violation),
                query: None,
                data_source: Some(data_source),
                confidence,
            });
        }

        if !self.gate.should_execute(confidence) {
            let score = confidence.unwrap_or_default();
            let percent = self.gate.blocked_percent(score);
            tracing::info!(
                confidence = score,
                threshold = self.gate.threshold(),
                "confidence below threshold"
            );
            let mut response = format!(
                "I'm not confident I understood your question (confidence: {}%).",
                percent
            );
            if let Some(explanation) = translation.explanation.as_deref().map(str::trim) {
                if !explanation.is_empty() {
                    response.push_str(&format!(" My interpretation: {}", explanation));
                }
            }
            response.push_str(" Could you rephrase it or add more detail?");
            return PipelineOutcome::Rejected(Rejection {
                kind: RejectionKind::LowConfidence,
                response,
                error: format!("low confidence ({}%)", percent),
                query: Some(query),
                data_source: Some(data_source),
                confidence,
            });
        }

        match self.dispatcher.execute(&data_source, &query).await {
            Ok(dispatched) => {
                let result = dispatched.result;
                tracing::info!(
                    data_source = %dispatched.source_id,
                    rows = result.row_count,
                    seconds = result.execution_time_seconds,
                    "query executed"
                );
                let response = self.formatter.format(
                    &result,
                    translation.explanation.as_deref().unwrap_or_default(),
                    result.execution_time_seconds,
                );
                PipelineOutcome::Answered(Answer {
                    response,
                    query,
                    data_source: dispatched.source_id,
                    execution_time: result.execution_time_seconds,
                    row_count: result.row_count,
                    confidence,
                })
            }
            Err(err) => {
                tracing::warn!(data_source = %data_source, error = %err, "backend call failed");
                let (kind, response) = match &err {
                    BackendError::Unavailable(detail) => (
                        RejectionKind::BackendUnavailable,
                        format!(
                            "Sorry, I couldn't reach the {} data source right now ({}). Please try again later.",
                            data_source, detail
                        ),
                    ),
                    BackendError::Execution(detail) => (
                        RejectionKind::BackendExecutionFailure,
                        format!(
                            "Sorry, the query failed on the {} data source: {}",
                            data_source, detail
                        ),
                    ),
                };
                PipelineOutcome::Rejected(Rejection {
                    kind,
                    response,
                    error: err.to_string(),
                    query: Some(query),
                    data_source: Some(data_source),
                    confidence,
                })
            }
        }
    }
}

fn reject(kind: RejectionKind, response: String, error: String) -> PipelineOutcome {
    PipelineOutcome::Rejected(Rejection {
        kind,
        response,
        error,
        query: None,
        data_source: None,
        confidence: None,
    })
}
