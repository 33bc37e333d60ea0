use std::sync::Arc;

use serde_json::Value;

use switchyard_common::config::{DefaultsConfig, ProviderConfig};
use switchyard_common::types::{LlmResponse, Message, StopReason, Tool};
use switchyard_common::LlmError;

use super::openai::OpenAiAdapter;
use crate::provider::{InvokeFuture, InvokeOptions, LlmProvider};

/// Mistral speaks the chat-completions dialect with two differences: it
/// calls the forced-tool mode `"any"`, and it reports context exhaustion as
/// `model_length`.
pub struct MistralAdapter {
    inner: OpenAiAdapter,
}

impl MistralAdapter {
    pub fn new(config: Arc<ProviderConfig>, model: &str) -> Result<Self, LlmError> {
        Ok(Self {
            inner: OpenAiAdapter::named_or(config, model, "mistral")?,
        })
    }

    pub fn with_defaults(self, defaults: DefaultsConfig) -> Self {
        Self {
            inner: self.inner.with_defaults(defaults),
        }
    }

    fn build_request_body(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<Value, LlmError> {
        let mut body = self.inner.build_request_body(messages, tools, options)?;
        if body.get("tool_choice").and_then(Value::as_str) == Some("required") {
            body["tool_choice"] = Value::from("any");
        }
        Ok(body)
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.inner.core().check_depth(messages)?;
        let body = self.build_request_body(messages, tools, options)?;
        self.inner.complete(body, map_stop_reason).await
    }
}

fn map_stop_reason(raw: String) -> StopReason {
    match raw.as_str() {
        "model_length" => StopReason::MaxTokens,
        _ => super::openai::map_stop_reason(raw),
    }
}

impl LlmProvider for MistralAdapter {
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
        Box::pin(self.send(messages, tools, options))
    }

    fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::provider_config;

    fn adapter(name: &str) -> MistralAdapter {
        std::env::set_var("SWY_TEST_MISTRAL_KEY", "m-test");
        let config = provider_config(name, "mistral", "http://localhost:1", "SWY_TEST_MISTRAL_KEY");
        MistralAdapter::new(config, "test-model").unwrap()
    }

    #[test]
    fn test_default_identity() {
        assert_eq!(adapter("").name(), "mistral");
        assert_eq!(adapter("mistral").model_name(), "test-model");
    }

    #[test]
    fn test_required_tool_choice_becomes_any() {
        let options = InvokeOptions::default().with_tool_choice("required");
        let body = adapter("mistral")
            .build_request_body(&[Message::user("hi")], None, &options)
            .unwrap();
        assert_eq!(body["tool_choice"], "any");

        let options = InvokeOptions::default().with_tool_choice("auto");
        let body = adapter("mistral")
            .build_request_body(&[Message::user("hi")], None, &options)
            .unwrap();
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn test_stop_reasons() {
        assert_eq!(map_stop_reason("model_length".into()), StopReason::MaxTokens);
        assert_eq!(map_stop_reason("length".into()), StopReason::MaxTokens);
        assert_eq!(map_stop_reason("tool_calls".into()), StopReason::ToolUse);
        assert_eq!(map_stop_reason("error".into()), StopReason::Other("error".into()));
    }
}
