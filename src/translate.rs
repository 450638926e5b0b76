//! Translation gateway: natural-language question → candidate query.
//!
//! The translation itself is done by an external, probabilistic collaborator
//! behind the [`Translator`] trait. [`TranslationGateway`] adds what this
//! crate is responsible for:
//!
//! - a hard timeout around the call (surfaced as `Unavailable`);
//! - stripping a surrounding Markdown code fence from the reply;
//! - decoding the JSON into a [`TranslationResult`] and normalizing it.
//!
//! Malformed replies are an expected outcome, not an error: they come back
//! as [`TranslationOutcome::ParseFailure`]. No retries happen here.
//!
//! # Providers
//!
//! | Config Value | Translator |
//! |-------------|------------|
//! | `"disabled"` | [`DisabledTranslator`] |
//! | `"openai"` | [`OpenAiTranslator`] (any OpenAI-compatible chat completions endpoint) |

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use askdata_core::models::TranslationResult;

use crate::config::TranslationConfig;

/// The external translation collaborator.
///
/// Receives the full grounding prompt and returns free text that should
/// contain one JSON object shaped like [`TranslationResult`], optionally
/// inside a fenced code block. Any error is treated as the collaborator
/// being unavailable.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Identifier used in logs (e.g. the model name).
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Tagged result of one translation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum TranslationOutcome {
    /// The reply decoded. `success` may still be `false` if the translator
    /// declined the question.
    Translated(TranslationResult),
    /// The reply was not a JSON object of the expected shape.
    ParseFailure(String),
    /// The collaborator could not be reached or timed out.
    Unavailable(String),
}

pub struct TranslationGateway {
    translator: Arc<dyn Translator>,
    timeout: Duration,
}

impl TranslationGateway {
    pub fn new(translator: Arc<dyn Translator>, timeout: Duration) -> Self {
        Self {
            translator,
            timeout,
        }
    }

    pub fn translator_name(&self) -> &str {
        self.translator.name()
    }

    /// Run the collaborator on `prompt` and decode its reply.
    ///
    /// `source_hint` fills in `dataSourceId` when a successful reply omits
    /// it (the user's selected source, or the default source for `auto`).
    pub async fn translate(&self, prompt: &str, source_hint: &str) -> TranslationOutcome {
        match tokio::time::timeout(self.timeout, self.translator.complete(prompt)).await {
            Err(_) => TranslationOutcome::Unavailable(format!(
                "translation timed out after {:.1}s",
                self.timeout.as_secs_f64()
            )),
            Ok(Err(e)) => TranslationOutcome::Unavailable(e.to_string()),
            Ok(Ok(raw)) => parse_reply(&raw, source_hint),
        }
    }
}

/// Decode a raw collaborator reply.
pub fn parse_reply(raw: &str, source_hint: &str) -> TranslationOutcome {
    let body = strip_code_fences(raw);
    match serde_json::from_str::<TranslationResult>(body) {
        Ok(result) => normalize(result, source_hint),
        Err(e) => TranslationOutcome::ParseFailure(format!("invalid translation JSON: {}", e)),
    }
}

/// Enforce the invariants a successful translation must satisfy.
fn normalize(mut result: TranslationResult, source_hint: &str) -> TranslationOutcome {
    result.confidence = result
        .confidence
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0));

    if !result.success {
        if result.error.as_deref().map_or(true, |e| e.trim().is_empty()) {
            result.error = Some("The question could not be translated into a query.".to_string());
        }
        return TranslationOutcome::Translated(result);
    }

    let query = result.query.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return TranslationOutcome::ParseFailure("successful translation without a query".into());
    }
    result.query = Some(query.to_string());

    let source = result
        .data_source_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(source_hint)
        .to_string();
    result.data_source_id = Some(source);

    TranslationOutcome::Translated(result)
}

/// Remove a surrounding ```` ``` ```` / ```` ```json ```` fence, if present.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let (tag, after_tag) = rest.split_once('\n').unwrap_or(("", rest));
    let body = if tag.trim().chars().all(|c| c.is_ascii_alphanumeric()) {
        after_tag
    } else {
        rest
    };

    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

// ============ Disabled Translator ============

/// Always fails; used when `translation.provider = "disabled"`.
pub struct DisabledTranslator;

#[async_trait]
impl Translator for DisabledTranslator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _prompt: &str) -> Result<String> {
        bail!("translation provider is disabled")
    }
}

// ============ OpenAI-compatible Translator ============

/// Calls an OpenAI-compatible `POST /v1/chat/completions` endpoint.
///
/// The API key is read from the environment variable named by
/// `translation.api_key_env` when the translator is created.
pub struct OpenAiTranslator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f64,
    api_key: String,
}

impl OpenAiTranslator {
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;

        // The gateway enforces the overall deadline; this only guards the socket.
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
        })
    }
}

#[async_trait]
impl Translator for OpenAiTranslator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                { "role": "user", "content": prompt }
            ],
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("translation API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

/// Extract `choices[0].message.content` from a chat completions response.
fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}

/// Create the translator selected by configuration.
pub fn create_translator(config: &TranslationConfig) -> Result<Arc<dyn Translator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledTranslator)),
        "openai" => Ok(Arc::new(OpenAiTranslator::new(config)?)),
        other => bail!("Unknown translation provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Canned(&'static str);

    #[async_trait]
    impl Translator for Canned {
        fn name(&self) -> &str {
            "canned"
        }
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Slow;

    #[async_trait]
    impl Translator for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        async fn complete(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("{}".to_string())
        }
    }

    fn gateway(t: impl Translator + 'static, timeout_ms: u64) -> TranslationGateway {
        TranslationGateway::new(Arc::new(t), Duration::from_millis(timeout_ms))
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```\n"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fences("```{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn test_parse_fenced_success() {
        let raw = "```json\n{\"success\":true,\"query\":\" SELECT COUNT(*) FROM templates \",\"dataSourceId\":\"application_db\",\"confidence\":0.95}\n```";
        match parse_reply(raw, "warehouse") {
            TranslationOutcome::Translated(t) => {
                assert!(t.success);
                assert_eq!(t.query.as_deref(), Some("SELECT COUNT(*) FROM templates"));
                assert_eq!(t.data_source_id.as_deref(), Some("application_db"));
                assert_eq!(t.confidence, Some(0.95));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_non_json_is_parse_failure() {
        assert!(matches!(
            parse_reply("Sorry, I can't help with that.", "warehouse"),
            TranslationOutcome::ParseFailure(_)
        ));
        assert!(matches!(
            parse_reply("[1, 2, 3]", "warehouse"),
            TranslationOutcome::ParseFailure(_)
        ));
    }

    #[test]
    fn test_success_without_query_is_parse_failure() {
        assert!(matches!(
            parse_reply(r#"{"success":true,"query":"  "}"#, "warehouse"),
            TranslationOutcome::ParseFailure(_)
        ));
    }

    #[test]
    fn test_missing_source_uses_hint() {
        match parse_reply(r#"{"success":true,"query":"SELECT * FROM customers","confidence":0.4}"#, "warehouse") {
            TranslationOutcome::Translated(t) => {
                assert_eq!(t.data_source_id.as_deref(), Some("warehouse"));
                assert_eq!(t.confidence, Some(0.4));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_confidence_clamped() {
        match parse_reply(r#"{"success":true,"query":"SELECT 1","confidence":95}"#, "w") {
            TranslationOutcome::Translated(t) => assert_eq!(t.confidence, Some(1.0)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_declined_gets_default_error() {
        match parse_reply(r#"{"success":false}"#, "w") {
            TranslationOutcome::Translated(t) => {
                assert!(!t.success);
                assert!(t.error.unwrap().contains("could not be translated"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_parse_chat_response() {
        let body = json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"success\":false}" } }]
        });
        assert_eq!(parse_chat_response(&body).unwrap(), "{\"success\":false}");
        assert!(parse_chat_response(&json!({ "choices": [] })).is_err());
    }

    #[tokio::test]
    async fn test_gateway_decodes_reply() {
        let gw = gateway(
            Canned(r#"{"success":true,"query":"SELECT 1","dataSourceId":"crm"}"#),
            1_000,
        );
        let outcome = gw.translate("prompt", "warehouse").await;
        assert!(matches!(outcome, TranslationOutcome::Translated(ref t) if t.success));
    }

    #[tokio::test]
    async fn test_gateway_timeout_is_unavailable() {
        let gw = gateway(Slow, 50);
        match gw.translate("prompt", "warehouse").await {
            TranslationOutcome::Unavailable(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_translator_is_unavailable() {
        let gw = gateway(DisabledTranslator, 1_000);
        match gw.translate("prompt", "warehouse").await {
            TranslationOutcome::Unavailable(msg) => assert!(msg.contains("disabled")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
