use std::future::Future;
use std::pin::Pin;

use serde_json::{Map, Value};

use switchyard_common::types::{LlmResponse, Message, Tool};
use switchyard_common::LlmError;

/// Boxed future returned by `LlmProvider::invoke`.
pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = Result<LlmResponse, LlmError>> + Send + 'a>>;

/// Per-call overrides. Unset fields fall back to adapter/config defaults.
#[derive(Clone, Debug, Default)]
pub struct InvokeOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    /// "auto", "none", "required"/"any", or a tool name.
    pub tool_choice: Option<String>,
    /// Extra top-level fields merged into the request body.
    pub extra: Map<String, Value>,
}

impl InvokeOptions {
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_tool_choice(mut self, choice: impl Into<String>) -> Self {
        self.tool_choice = Some(choice.into());
        self
    }
}

/// The provider invocation contract.
///
/// Implemented by every adapter and by every module wrapping one, so a
/// module stack is substitutable for a bare adapter. Object-safe: stacks
/// are held as `Box<dyn LlmProvider>`.
pub trait LlmProvider: Send + Sync {
    /// Provider identity (e.g. "anthropic"), not the model.
    fn name(&self) -> &str;

    fn model_name(&self) -> &str;

    /// Cheap local precondition check; never touches the network.
    fn validate_config(&self) -> bool;

    fn invoke<'a>(
        &'a self,
        messages: &'a [Message],
        tools: Option<&'a [Tool]>,
        options: &'a InvokeOptions,
    ) -> InvokeFuture<'a>;

    /// Release held resources. Idempotent.
    fn close(&self);
}

/// Builds providers by name on demand (used by fallback chains).
pub trait ProviderFactory: Send + Sync {
    fn create(&self, provider: &str) -> Result<Box<dyn LlmProvider>, LlmError>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&str) -> Result<Box<dyn LlmProvider>, LlmError> + Send + Sync,
{
    fn create(&self, provider: &str) -> Result<Box<dyn LlmProvider>, LlmError> {
        self(provider)
    }
}
