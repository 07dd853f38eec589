// =============================================================================
// LLM decision client — OpenAI-compatible chat completions with a strict
// single-decision JSON schema and a silent heuristic fallback
// =============================================================================
//
// Every failure at this boundary (timeout, HTTP status, malformed JSON,
// shape violation, symbol outside the candidate set) returns `None`: the
// model is an optional advisor, and the caller falls through to the rule
// baseline without surfacing an error.
// =============================================================================

pub mod prompt;

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::engine::ExternalDecision;
use crate::engine::LOT_SIZE;
use crate::features::context::AgentContext;
use crate::store::registry::AgentManifest;
use crate::types::{ActionKind, DecisionSource};

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// "json_schema" (strict) or "json_object" for models without schema
    /// binding.
    pub response_format: String,
    pub timeout_ms: u64,
    pub max_output_tokens: u32,
    pub token_saver: bool,
}

impl LlmConfig {
    pub fn from_runtime(cfg: &RuntimeConfig) -> Self {
        Self {
            enabled: cfg.llm_enabled,
            api_key: cfg.openai_api_key.clone(),
            base_url: cfg.openai_base_url.clone(),
            model: cfg.openai_model.clone(),
            response_format: cfg.openai_response_format.clone(),
            timeout_ms: cfg.llm_timeout_ms,
            max_output_tokens: cfg.llm_max_output_tokens,
            token_saver: cfg.llm_token_saver,
        }
    }
}

pub struct LlmDecisionClient {
    config: LlmConfig,
    http: reqwest::Client,
}

// -----------------------------------------------------------------------------
// Wire types
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    reasoning_content: Option<String>,
}

/// Shape the model must return.
#[derive(Debug, Deserialize)]
struct RawDecisionEnvelope {
    decisions: Vec<RawDecision>,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    action: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    quantity_shares: f64,
    #[serde(default)]
    reasoning: String,
}

impl LlmDecisionClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.api_key.is_some()
    }

    /// Ask the model for one decision. `None` means "use the heuristic".
    pub async fn decide(
        &self,
        ctx: &AgentContext,
        manifest: &AgentManifest,
    ) -> Option<ExternalDecision> {
        if !self.is_enabled() {
            return None;
        }
        let api_key = self.config.api_key.as_ref()?;

        let system_prompt = prompt::build_system_prompt(manifest);
        let input_prompt = prompt::build_user_prompt(ctx, self.config.token_saver);
        let candidate_symbols: Vec<String> =
            ctx.candidates.iter().map(|c| c.symbol.clone()).collect();

        let body = json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": input_prompt},
            ],
            "max_tokens": self.config.max_output_tokens,
            "temperature": 0.2,
            "response_format": response_format(&self.config.response_format, &candidate_symbols),
        });

        let url = format!("{}/chat/completions", self.config.base_url);
        let result = self
            .http
            .post(&url)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(trader_id = %ctx.trader_id, error = %e, "llm request failed, falling back");
                return None;
            }
        };
        let status = resp.status();
        if !status.is_success() {
            warn!(trader_id = %ctx.trader_id, status = %status, "llm non-2xx, falling back");
            return None;
        }
        let parsed: ChatCompletionResponse = match resp.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(trader_id = %ctx.trader_id, error = %e, "llm body unparseable, falling back");
                return None;
            }
        };

        let choice = parsed.choices.into_iter().next()?;
        let content = choice.message.content;
        let cot_trace = choice.message.reasoning_content.unwrap_or_default();

        match normalize_content(
            &content,
            &candidate_symbols,
            prompt::reasoning_limit(self.config.token_saver),
        ) {
            Some(normalized) => {
                debug!(
                    trader_id = %ctx.trader_id,
                    action = %normalized.action,
                    symbol = %normalized.symbol,
                    "llm decision accepted"
                );
                Some(ExternalDecision {
                    source: DecisionSource::LlmOpenai,
                    action: normalized.action,
                    symbol: normalized.symbol,
                    quantity: normalized.quantity,
                    confidence: normalized.confidence,
                    reasoning: normalized.reasoning,
                    raw_json: serde_json::from_str(&content)
                        .unwrap_or(serde_json::Value::String(content)),
                    system_prompt,
                    input_prompt,
                    cot_trace,
                    readiness_reasons: Vec::new(),
                })
            }
            None => {
                warn!(trader_id = %ctx.trader_id, "llm answer rejected, falling back");
                None
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Response format
// -----------------------------------------------------------------------------

/// Strict single-decision schema, or the plain JSON-object fallback for
/// models that cannot bind a schema.
fn response_format(kind: &str, candidate_symbols: &[String]) -> serde_json::Value {
    if kind == "json_object" {
        return json!({"type": "json_object"});
    }
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "trade_decision",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "decisions": {
                        "type": "array",
                        "minItems": 1,
                        "maxItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "action": {"type": "string", "enum": ["buy", "sell", "hold"]},
                                "symbol": {"type": "string", "enum": candidate_symbols},
                                "confidence": {"type": "number", "minimum": 0.51, "maximum": 0.95},
                                "quantity_shares": {"type": "number", "minimum": 0},
                                "reasoning": {"type": "string"},
                            },
                            "required": ["action", "symbol", "confidence", "quantity_shares", "reasoning"],
                            "additionalProperties": false,
                        },
                    },
                },
                "required": ["decisions"],
                "additionalProperties": false,
            },
        },
    })
}

// -----------------------------------------------------------------------------
// Normalization
// -----------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
struct NormalizedDecision {
    action: ActionKind,
    symbol: String,
    quantity: f64,
    confidence: f64,
    reasoning: String,
}

/// Defensive parse + normalization of the model's content. `None` on any
/// shape violation or a symbol outside the candidate set.
fn normalize_content(
    content: &str,
    candidate_symbols: &[String],
    reasoning_limit: usize,
) -> Option<NormalizedDecision> {
    let envelope: RawDecisionEnvelope = serde_json::from_str(content.trim()).ok()?;
    if envelope.decisions.len() != 1 {
        return None;
    }
    let raw = &envelope.decisions[0];

    let action = ActionKind::parse_lenient(&raw.action);

    let symbol = if raw.symbol.trim().is_empty() {
        candidate_symbols.first()?.clone()
    } else {
        let s = raw.symbol.trim().to_string();
        if !candidate_symbols.contains(&s) {
            return None;
        }
        s
    };

    let confidence = if raw.confidence.is_finite() {
        raw.confidence.clamp(0.51, 0.95)
    } else {
        0.51
    };

    let lot = LOT_SIZE as f64;
    let quantity = match action {
        ActionKind::Hold => 0.0,
        _ => {
            let floored = (raw.quantity_shares.max(0.0) / lot).floor() * lot;
            floored.max(lot)
        }
    };

    let reasoning: String = raw.reasoning.trim().chars().take(reasoning_limit).collect();

    Some(NormalizedDecision {
        action,
        symbol,
        quantity,
        confidence,
        reasoning,
    })
}

// =============================================================================
// Tests
// =============================================================================
