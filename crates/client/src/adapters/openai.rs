use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchyard_common::config::{DefaultsConfig, ProviderConfig};
use switchyard_common::types::{
    ContentBlock, LlmResponse, Message, MessageContent, Role, StopReason, Tool, ToolCall, Usage,
};
use switchyard_common::LlmError;

use super::{merge_extra, AdapterCore, ToolArguments};
use crate::provider::{InvokeFuture, InvokeOptions, LlmProvider};

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ChatTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    /// Serialized as `null` for assistant turns that only call tools.
    content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ChatImageUrl },
}

#[derive(Debug, Serialize)]
struct ChatImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    r#type: &'static str,
    function: ChatToolCallFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct ChatTool<'a> {
    r#type: &'static str,
    function: ChatFunction<'a>,
}

#[derive(Serialize)]
struct ChatFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ChatResponse {
    model: String,
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    /// Some compatible servers send `null` on a normal finish.
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
    /// DeepSeek-style reasoning output.
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ChatResponseToolCall>>,
}

#[derive(Deserialize)]
struct ChatResponseToolCall {
    id: String,
    function: ChatResponseFunction,
}

#[derive(Deserialize)]
struct ChatResponseFunction {
    name: String,
    arguments: ToolArguments,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens_details: Option<CompletionTokensDetails>,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Deserialize)]
struct CompletionTokensDetails {
    #[serde(default)]
    reasoning_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

fn to_wire_messages(messages: &[Message]) -> Vec<ChatMessage> {
    let mut wire = Vec::with_capacity(messages.len());

    for msg in messages {
        match (&msg.role, &msg.content) {
            // One tool message per result; anything else in a tool turn is dropped.
            (Role::Tool, MessageContent::Blocks(blocks)) => {
                for block in blocks {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } = block
                    {
                        wire.push(ChatMessage {
                            role: "tool",
                            content: Some(ChatContent::Text(content.joined_text(" "))),
                            tool_calls: None,
                            tool_call_id: Some(tool_use_id.clone()),
                        });
                    }
                }
            }
            (role, MessageContent::Text(text)) => wire.push(ChatMessage {
                role: role.as_str(),
                content: Some(ChatContent::Text(text.clone())),
                tool_calls: None,
                tool_call_id: None,
            }),
            (role, MessageContent::Blocks(blocks)) => wire.push(block_message(*role, blocks)),
        }
    }

    wire
}

fn block_message(role: Role, blocks: &[ContentBlock]) -> ChatMessage {
    let tool_calls: Vec<ChatToolCall> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse {
                id,
                name,
                arguments,
            } => Some(ChatToolCall {
                id: id.clone(),
                r#type: "function",
                function: ChatToolCallFunction {
                    name: name.clone(),
                    arguments: Value::Object(arguments.clone()).to_string(),
                },
            }),
            _ => None,
        })
        .collect();

    if !tool_calls.is_empty() {
        let texts: Vec<&str> = blocks
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        let content = if texts.is_empty() {
            None
        } else {
            Some(ChatContent::Text(texts.join(" ")))
        };
        return ChatMessage {
            role: "assistant",
            content,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        };
    }

    let parts: Vec<ChatContentPart> = blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(ChatContentPart::Text { text: text.clone() }),
            ContentBlock::Image { source, media_type } => Some(ChatContentPart::ImageUrl {
                image_url: ChatImageUrl {
                    url: format!("data:{};base64,{}", media_type, source),
                },
            }),
            _ => None,
        })
        .collect();

    let content = if parts.is_empty() {
        ChatContent::Text(String::new())
    } else {
        ChatContent::Parts(parts)
    };

    ChatMessage {
        role: role.as_str(),
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
    }
}

pub(crate) fn map_stop_reason(raw: String) -> StopReason {
    match raw.as_str() {
        "stop" => StopReason::EndTurn,
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::MaxTokens,
        _ => StopReason::Other(raw),
    }
}

fn from_wire_response(
    provider: &str,
    resp: ChatResponse,
    raw: Value,
    map_stop: fn(String) -> StopReason,
) -> Result<LlmResponse, LlmError> {
    let Some(choice) = resp.choices.into_iter().next() else {
        return Err(LlmError::parse_custom(
            provider,
            raw.to_string(),
            "response has an empty choices array",
        ));
    };

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            Ok(ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments.resolve(provider)?,
            })
        })
        .collect::<Result<Vec<_>, LlmError>>()?;

    let usage = Usage {
        input_tokens: resp.usage.prompt_tokens,
        output_tokens: resp.usage.completion_tokens,
        total_tokens: resp
            .usage
            .total_tokens
            .unwrap_or(resp.usage.prompt_tokens.saturating_add(resp.usage.completion_tokens)),
        cache_read_tokens: resp
            .usage
            .prompt_tokens_details
            .and_then(|d| d.cached_tokens),
        cache_write_tokens: None,
        reasoning_tokens: resp
            .usage
            .completion_tokens_details
            .and_then(|d| d.reasoning_tokens),
    };

    Ok(LlmResponse {
        content: choice.message.content,
        tool_calls,
        usage,
        model: resp.model,
        stop_reason: choice.finish_reason.map_or(StopReason::EndTurn, map_stop),
        thinking: choice.message.reasoning_content,
        raw,
    })
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Adapter for the OpenAI Chat Completions API and the many servers that
/// speak it (Groq, Ollama, DeepSeek, Together, vLLM, ...). The provider
/// identity comes from the config, so each compatible backend keeps its own
/// name and rate-limit bucket.
pub struct OpenAiAdapter {
    core: AdapterCore,
}

impl OpenAiAdapter {
    pub fn new(config: Arc<ProviderConfig>, model: &str) -> Result<Self, LlmError> {
        Self::named_or(config, model, "openai")
    }

    /// Build with `fallback_name` as identity when the config carries none.
    pub(crate) fn named_or(
        config: Arc<ProviderConfig>,
        model: &str,
        fallback_name: &str,
    ) -> Result<Self, LlmError> {
        let name = if config.name.is_empty() {
            fallback_name.to_string()
        } else {
            config.name.clone()
        };
        Ok(Self {
            core: AdapterCore::new(&name, config, model)?,
        })
    }

    pub fn with_defaults(mut self, defaults: DefaultsConfig) -> Self {
        self.core.set_defaults(defaults);
        self
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        if !self.core.api_key().is_empty() {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", self.core.api_key()))
                .map_err(|_| LlmError::Config("API key is not a valid header value".into()))?;
            headers.insert(AUTHORIZATION, bearer);
        }
        Ok(headers)
    }

    pub(crate) fn core(&self) -> &AdapterCore {
        &self.core
    }

    /// Translate a universal request into a chat-completions body.
    pub(crate) fn build_request_body(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<Value, LlmError> {
        let wire_tools = tools
            .unwrap_or_default()
            .iter()
            .map(|t| ChatTool {
                r#type: "function",
                function: ChatFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();

        let request = ChatRequest {
            model: self.core.model(),
            messages: to_wire_messages(messages),
            max_tokens: self.core.max_tokens(options),
            temperature: self.core.temperature(options),
            tools: wire_tools,
            tool_choice: options.tool_choice.as_deref(),
        };

        let mut body = serde_json::to_value(&request).map_err(|e| LlmError::InvalidRequest {
            provider: self.core.name().to_string(),
            detail: e.to_string(),
        })?;
        merge_extra(&mut body, &options.extra);
        Ok(body)
    }

    /// Post a prepared body and parse the reply with the given stop table.
    pub(crate) async fn complete(
        &self,
        body: Value,
        map_stop: fn(String) -> StopReason,
    ) -> Result<LlmResponse, LlmError> {
        let raw = self
            .core
            .post_json(CHAT_COMPLETIONS_PATH, self.headers()?, &body)
            .await?;
        let parsed: ChatResponse = self.core.decode(&raw)?;
        let response = from_wire_response(self.core.name(), parsed, raw, map_stop)?;

        self.core.record_usage(&response.usage);
        Ok(response)
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.core.check_depth(messages)?;
        let body = self.build_request_body(messages, tools, options)?;
        self.complete(body, map_stop_reason).await
    }
}

impl LlmProvider for OpenAiAdapter {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn model_name(&self) -> &str {
        self.core.model()
    }

    fn validate_config(&self) -> bool {
        self.core.validate()
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
        self.core.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
