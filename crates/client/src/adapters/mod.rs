mod anthropic;
mod mistral;
mod openai;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use switchyard_common::config::{DefaultsConfig, ProviderConfig};
use switchyard_common::types::{Message, Usage, MAX_CONTENT_DEPTH};
use switchyard_common::{LlmError, TransportKind};

use crate::provider::InvokeOptions;

pub use anthropic::AnthropicAdapter;
pub use mistral::MistralAdapter;
pub use openai::OpenAiAdapter;

/// Plumbing shared by every adapter: credential, HTTP client lifecycle,
/// default resolution and the request/response envelope handling.
pub(crate) struct AdapterCore {
    name: String,
    config: Arc<ProviderConfig>,
    model: String,
    api_key: String,
    /// Last layer of request defaults, from `[defaults]` in config.toml.
    defaults: DefaultsConfig,
    /// `None` once the adapter has been closed. Guarded by std Mutex because
    /// it is only held long enough to clone the client handle.
    http: Mutex<Option<reqwest::Client>>,
}

impl AdapterCore {
    /// Resolve the credential and build the HTTP client. Fails fast when the
    /// key is required but missing or empty.
    pub(crate) fn new(
        name: &str,
        config: Arc<ProviderConfig>,
        model: &str,
    ) -> Result<Self, LlmError> {
        let settings = &config.provider;

        let api_key = match std::env::var(&settings.api_key_env) {
            Ok(key) if !key.is_empty() => key,
            _ if !settings.api_key_required => String::new(),
            _ => {
                return Err(LlmError::Config(format!(
                    "Missing environment variable '{}' for provider '{}'. Set it to your API key.",
                    settings.api_key_env, name
                )));
            }
        };

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Config(format!("Failed to build HTTP client: {}", e)))?;

        tracing::debug!(provider = name, model, "Adapter created");

        Ok(Self {
            name: name.to_string(),
            config,
            model: model.to_string(),
            api_key,
            defaults: DefaultsConfig::default(),
            http: Mutex::new(Some(http)),
        })
    }

    pub(crate) fn set_defaults(&mut self, defaults: DefaultsConfig) {
        self.defaults = defaults;
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn model(&self) -> &str {
        &self.model
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn validate(&self) -> bool {
        !self.api_key.is_empty() || !self.config.provider.api_key_required
    }

    pub(crate) fn close(&self) {
        let released = self
            .http
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_some() {
            tracing::debug!(provider = %self.name, "HTTP client released");
        }
    }

    /// Per-call value, then model metadata, then `[defaults]`.
    pub(crate) fn max_tokens(&self, options: &InvokeOptions) -> u32 {
        options
            .max_tokens
            .or_else(|| {
                self.config
                    .models
                    .get(&self.model)
                    .map(|meta| meta.max_output_tokens)
            })
            .unwrap_or(self.defaults.max_tokens)
    }

    /// Per-call value, then the provider's default, then `[defaults]`.
    pub(crate) fn temperature(&self, options: &InvokeOptions) -> f64 {
        options
            .temperature
            .or(self.config.provider.default_temperature)
            .unwrap_or(self.defaults.temperature)
    }

    /// Reject content nested deeper than `MAX_CONTENT_DEPTH`.
    pub(crate) fn check_depth(&self, messages: &[Message]) -> Result<(), LlmError> {
        for (index, msg) in messages.iter().enumerate() {
            if msg.content.depth() > MAX_CONTENT_DEPTH {
                return Err(LlmError::InvalidRequest {
                    provider: self.name.clone(),
                    detail: format!(
                        "message {} nests content more than {} levels deep",
                        index, MAX_CONTENT_DEPTH
                    ),
                });
            }
        }
        Ok(())
    }

    /// POST a JSON body and return the decoded JSON payload of a 2xx reply.
    pub(crate) async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        headers: HeaderMap,
        body: &B,
    ) -> Result<Value, LlmError> {
        let http = self
            .http
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| LlmError::Closed {
                provider: self.name.clone(),
            })?;

        let url = format!(
            "{}{}",
            self.config.provider.base_url.trim_end_matches('/'),
            path
        );
        let start = std::time::Instant::now();

        let response = http
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let latency = start.elapsed().as_secs_f64();
        metrics::histogram!("llm.api.latency", "provider" => self.name.clone(), "model" => self.model.clone())
            .record(latency);

        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response
                .bytes()
                .await
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .unwrap_or_default();
            metrics::counter!("llm.api.errors", "provider" => self.name.clone()).increment(1);
            return Err(LlmError::Api {
                provider: self.name.clone(),
                status: status.as_u16(),
                body,
                retry_after,
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_slice(&bytes).map_err(|e| LlmError::Parse {
            provider: self.name.clone(),
            raw: String::from_utf8_lossy(&bytes).into_owned(),
            source: e,
        })
    }

    /// Deserialize the typed wire response out of the raw payload.
    pub(crate) fn decode<'de, T: Deserialize<'de>>(&self, raw: &'de Value) -> Result<T, LlmError> {
        T::deserialize(raw).map_err(|e| LlmError::Parse {
            provider: self.name.clone(),
            raw: raw.to_string(),
            source: e,
        })
    }

    pub(crate) fn record_usage(&self, usage: &Usage) {
        metrics::counter!("llm.api.input_tokens", "provider" => self.name.clone())
            .increment(usage.input_tokens);
        metrics::counter!("llm.api.output_tokens", "provider" => self.name.clone())
            .increment(usage.output_tokens);
    }

    fn transport_error(&self, err: reqwest::Error) -> LlmError {
        let kind = if err.is_timeout() {
            TransportKind::Timeout
        } else if err.is_connect() {
            TransportKind::Connect
        } else {
            TransportKind::Other
        };
        LlmError::Transport {
            provider: self.name.clone(),
            kind,
            message: err.to_string(),
        }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<f64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
}

/// Tool-call arguments as they arrive on the wire: already structured, or a
/// JSON-encoded string still to be parsed. Decided once by serde.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ToolArguments {
    Parsed(Map<String, Value>),
    Encoded(String),
}

impl ToolArguments {
    pub(crate) fn resolve(self, provider: &str) -> Result<Map<String, Value>, LlmError> {
        match self {
            Self::Parsed(map) => Ok(map),
            Self::Encoded(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(_) => Err(LlmError::parse_custom(
                    provider,
                    raw,
                    "tool call arguments must be a JSON object",
                )),
                Err(e) => Err(LlmError::Parse {
                    provider: provider.to_string(),
                    raw,
                    source: e,
                }),
            },
        }
    }
}

/// Newline-join fragments; `None` when there were none.
pub(crate) fn join_fragments(parts: Vec<String>) -> Option<String> {
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Merge caller-provided extra fields into a serialized request body.
pub(crate) fn merge_extra(body: &mut Value, extra: &Map<String, Value>) {
    if let Value::Object(map) = body {
        for (key, value) in extra {
            map.insert(key.clone(), value.clone());
        }
    }
}
