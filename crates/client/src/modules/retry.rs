use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use switchyard_common::types::{LlmResponse, Message, Tool};
use switchyard_common::LlmError;

use crate::provider::{InvokeFuture, InvokeOptions, LlmProvider};

/// Upper bound accepted for `max_wait_seconds` (one day).
pub const MAX_WAIT_CEILING_SECONDS: f64 = 86_400.0;

/// Settings from `[modules.retry]`.
#[derive(Clone, Debug, Deserialize)]
pub struct RetrySettings {
    /// Attempts after the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: f64,
    /// Cap on the exponential part and on any `Retry-After` value.
    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: f64,
    #[serde(default = "default_retryable_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_seconds: default_backoff_base_seconds(),
            max_wait_seconds: default_max_wait_seconds(),
            retryable_status_codes: default_retryable_status_codes(),
        }
    }
}

impl RetrySettings {
    fn validate(&self) -> Result<(), LlmError> {
        let mut errors = Vec::new();
        if self.max_retries == 0 {
            errors.push("max_retries must be > 0");
        }
        if !(self.backoff_base_seconds > 0.0 && self.backoff_base_seconds.is_finite()) {
            errors.push("backoff_base_seconds must be > 0");
        }
        if !(self.max_wait_seconds > 0.0 && self.max_wait_seconds <= MAX_WAIT_CEILING_SECONDS) {
            errors.push("max_wait_seconds must be > 0 and at most 86400");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::Config(format!(
                "Invalid [modules.retry] settings: {}",
                errors.join("; ")
            )))
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_seconds() -> f64 {
    1.0
}

fn default_max_wait_seconds() -> f64 {
    60.0
}

fn default_retryable_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 529]
}

/// Re-issues calls that failed transiently, with capped exponential backoff
/// plus jitter between attempts.
pub struct RetryModule {
    inner: Box<dyn LlmProvider>,
    settings: RetrySettings,
}

impl RetryModule {
    pub fn new(inner: Box<dyn LlmProvider>, settings: RetrySettings) -> Result<Self, LlmError> {
        settings.validate()?;
        Ok(Self { inner, settings })
    }

    /// Wait before retry number `attempt + 1`. A positive `Retry-After`
    /// replaces the computed backoff; zero or absent falls back to it.
    fn delay(&self, attempt: u32, err: &LlmError) -> Duration {
        let max_wait = self.settings.max_wait_seconds;

        if let LlmError::Api {
            retry_after: Some(secs),
            ..
        } = err
        {
            if *secs > 0.0 {
                return saturating_secs(secs.min(max_wait));
            }
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let backoff = (self.settings.backoff_base_seconds * 2f64.powi(exponent)).min(max_wait);
        let jitter = rand::thread_rng().gen_range(0.0..backoff);
        saturating_secs(backoff + jitter)
    }

    async fn run(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse, LlmError> {
        let mut attempt: u32 = 0;

        loop {
            let err = match self.inner.invoke(messages, tools, options).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if !err.is_transient(&self.settings.retryable_status_codes) {
                return Err(err);
            }

            if attempt >= self.settings.max_retries {
                tracing::error!(
                    provider = %self.inner.name(),
                    retries = self.settings.max_retries,
                    error = %err,
                    "All retries exhausted"
                );
                return Err(err);
            }

            let wait = self.delay(attempt, &err);
            attempt += 1;
            tracing::warn!(
                provider = %self.inner.name(),
                attempt,
                max_retries = self.settings.max_retries,
                wait_secs = wait.as_secs_f64(),
                error = %err,
                "Transient failure, retrying"
            );
            metrics::counter!("llm.retry.attempts", "provider" => self.inner.name().to_string())
                .increment(1);

            tokio::time::sleep(wait).await;
        }
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

impl LlmProvider for RetryModule {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn validate_config(&self) -> bool {
        self.inner.validate_config()
    }

    fn invoke<'a>(
        &'a self,
        messages: &'a [Message],
        tools: Option<&'a [Tool]>,
        options: &'a InvokeOptions,
    ) -> InvokeFuture<'a> {
        Box::pin(self.run(messages, tools, options))
    }

    fn close(&self) {
        self.inner.close();
    }
}
