use std::sync::Arc;

use serde::Deserialize;

use switchyard_common::types::{LlmResponse, Message, Tool};
use switchyard_common::LlmError;

use crate::provider::{InvokeFuture, InvokeOptions, LlmProvider, ProviderFactory};

/// Longest fallback chain accepted at construction.
pub const MAX_FALLBACK_CHAIN: usize = 10;

/// Settings from `[modules.fallback]`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FallbackSettings {
    /// Provider names tried in order after the primary fails.
    #[serde(default)]
    pub chain: Vec<String>,
}

/// On any failure of the wrapped provider, walks an ordered chain of
/// alternates, building each one only when it is reached.
pub struct FallbackModule {
    inner: Box<dyn LlmProvider>,
    chain: Vec<String>,
    factory: Arc<dyn ProviderFactory>,
}

impl FallbackModule {
    pub fn new(
        inner: Box<dyn LlmProvider>,
        settings: FallbackSettings,
        factory: Arc<dyn ProviderFactory>,
    ) -> Result<Self, LlmError> {
        if settings.chain.len() > MAX_FALLBACK_CHAIN {
            return Err(LlmError::Config(format!(
                "Invalid [modules.fallback] settings: chain has {} providers (max {})",
                settings.chain.len(),
                MAX_FALLBACK_CHAIN
            )));
        }
        Ok(Self {
            inner,
            chain: settings.chain,
            factory,
        })
    }

    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    async fn run(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse, LlmError> {
        let primary_error = match self.inner.invoke(messages, tools, options).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };

        if self.chain.is_empty() {
            return Err(primary_error);
        }

        tracing::warn!(
            provider = %self.inner.name(),
            error = %primary_error,
            chain_len = self.chain.len(),
            "Primary provider failed, walking fallback chain"
        );

        for (position, name) in self.chain.iter().enumerate() {
            metrics::counter!("llm.fallback.switches", "provider" => name.clone()).increment(1);

            let provider = match self.factory.create(name) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(
                        fallback = %name,
                        position,
                        error = %e,
                        "Fallback provider could not be built"
                    );
                    continue;
                }
            };

            let result = provider.invoke(messages, tools, options).await;
            provider.close();

            match result {
                Ok(response) => {
                    tracing::info!(
                        from = %self.inner.name(),
                        to = %name,
                        position,
                        "Fallback provider succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(
                        fallback = %name,
                        position,
                        error = %e,
                        "Fallback provider failed"
                    );
                }
            }
        }

        tracing::error!(
            provider = %self.inner.name(),
            error = %primary_error,
            "Fallback chain exhausted"
        );
        Err(primary_error)
    }
}

impl LlmProvider for FallbackModule {
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
