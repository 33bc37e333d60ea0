use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use switchyard_common::config::{DefaultsConfig, ProviderConfig};
use switchyard_common::types::{
    ContentBlock, LlmResponse, Message, MessageContent, Role, StopReason, Tool, ToolCall, Usage,
};
use switchyard_common::LlmError;

use super::{join_fragments, merge_extra, AdapterCore, ToolArguments};
use crate::provider::{InvokeFuture, InvokeOptions, LlmProvider};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MESSAGES_PATH: &str = "/v1/messages";

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: AnthropicContent,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text {
        text: String,
    },
    Image {
        source: AnthropicImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: AnthropicContent,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct AnthropicImageSource {
    #[serde(rename = "type")]
    kind: String,
    media_type: String,
    data: String,
}

#[derive(Serialize)]
struct AnthropicTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a Value,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicResponseBlock>,
    model: String,
    stop_reason: String,
    usage: AnthropicUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: ToolArguments,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// Conversion helpers
// ---------------------------------------------------------------------------

/// Pull system messages out into one newline-joined string, in order.
fn split_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system_parts = Vec::new();
    let mut remaining = Vec::new();

    for msg in messages {
        if msg.role == Role::System {
            system_parts.push(msg.content.joined_text("\n"));
        } else {
            remaining.push(msg);
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    (system, remaining)
}

fn to_wire_block(block: &ContentBlock) -> AnthropicContentBlock {
    match block {
        ContentBlock::Text { text } => AnthropicContentBlock::Text { text: text.clone() },
        ContentBlock::Image { source, media_type } => AnthropicContentBlock::Image {
            source: AnthropicImageSource {
                kind: "base64".into(),
                media_type: media_type.clone(),
                data: source.clone(),
            },
        },
        ContentBlock::ToolUse {
            id,
            name,
            arguments,
        } => AnthropicContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: Value::Object(arguments.clone()),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
        } => AnthropicContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: to_wire_content(content),
        },
    }
}

fn to_wire_content(content: &MessageContent) -> AnthropicContent {
    match content {
        MessageContent::Text(text) => AnthropicContent::Text(text.clone()),
        MessageContent::Blocks(blocks) => {
            AnthropicContent::Blocks(blocks.iter().map(to_wire_block).collect())
        }
    }
}

fn to_wire_message(msg: &Message) -> AnthropicMessage {
    // Anthropic has no tool role; tool results travel in user turns.
    let role = match msg.role {
        Role::Assistant => "assistant",
        Role::User | Role::Tool | Role::System => "user",
    };

    AnthropicMessage {
        role,
        content: to_wire_content(&msg.content),
    }
}

fn to_wire_tool_choice(choice: &str) -> Value {
    match choice {
        "auto" => json!({"type": "auto"}),
        "any" | "required" => json!({"type": "any"}),
        "none" => json!({"type": "none"}),
        name => json!({"type": "tool", "name": name}),
    }
}

fn map_stop_reason(raw: String) -> StopReason {
    match raw.as_str() {
        "end_turn" => StopReason::EndTurn,
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::Other(raw),
    }
}

fn from_wire_response(
    provider: &str,
    resp: AnthropicResponse,
    raw: Value,
) -> Result<LlmResponse, LlmError> {
    let mut text_parts = Vec::new();
    let mut thinking_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in resp.content {
        match block {
            AnthropicResponseBlock::Text { text } => text_parts.push(text),
            AnthropicResponseBlock::Thinking { thinking } => thinking_parts.push(thinking),
            AnthropicResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input.resolve(provider)?,
                });
            }
            AnthropicResponseBlock::Unsupported => {}
        }
    }

    let usage = Usage {
        input_tokens: resp.usage.input_tokens,
        output_tokens: resp.usage.output_tokens,
        total_tokens: resp.usage.input_tokens.saturating_add(resp.usage.output_tokens),
        cache_read_tokens: resp.usage.cache_read_input_tokens,
        cache_write_tokens: resp.usage.cache_creation_input_tokens,
        reasoning_tokens: None,
    };

    Ok(LlmResponse {
        content: join_fragments(text_parts),
        tool_calls,
        usage,
        model: resp.model,
        stop_reason: map_stop_reason(resp.stop_reason),
        thinking: join_fragments(thinking_parts),
        raw,
    })
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Adapter for the Anthropic Messages API.
pub struct AnthropicAdapter {
    core: AdapterCore,
}

impl AnthropicAdapter {
    pub fn new(config: Arc<ProviderConfig>, model: &str) -> Result<Self, LlmError> {
        let name = if config.name.is_empty() {
            "anthropic".to_string()
        } else {
            config.name.clone()
        };
        Ok(Self {
            core: AdapterCore::new(&name, config, model)?,
        })
    }

    /// Use `defaults` where neither the call, the model nor the provider
    /// sets a value.
    pub fn with_defaults(mut self, defaults: DefaultsConfig) -> Self {
        self.core.set_defaults(defaults);
        self
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        if !self.core.api_key().is_empty() {
            let key = HeaderValue::from_str(self.core.api_key())
                .map_err(|_| LlmError::Config("API key is not a valid header value".into()))?;
            headers.insert("x-api-key", key);
        }
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        Ok(headers)
    }

    /// Translate a universal request into the Messages API body.
    fn build_request_body(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<Value, LlmError> {
        let (system, remaining) = split_system(messages);

        let wire_tools = tools
            .unwrap_or_default()
            .iter()
            .map(|t| AnthropicTool {
                name: &t.name,
                description: &t.description,
                input_schema: &t.parameters,
            })
            .collect();

        let request = AnthropicRequest {
            model: self.core.model(),
            max_tokens: self.core.max_tokens(options),
            temperature: self.core.temperature(options),
            system,
            messages: remaining.into_iter().map(to_wire_message).collect(),
            tools: wire_tools,
            tool_choice: options.tool_choice.as_deref().map(to_wire_tool_choice),
        };

        let mut body = serde_json::to_value(&request).map_err(|e| LlmError::InvalidRequest {
            provider: self.core.name().to_string(),
            detail: e.to_string(),
        })?;
        merge_extra(&mut body, &options.extra);
        Ok(body)
    }

    async fn send(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse, LlmError> {
        self.core.check_depth(messages)?;
        let body = self.build_request_body(messages, tools, options)?;

        let raw = self.core.post_json(MESSAGES_PATH, self.headers()?, &body).await?;
        let parsed: AnthropicResponse = self.core.decode(&raw)?;
        let response = from_wire_response(self.core.name(), parsed, raw)?;

        self.core.record_usage(&response.usage);
        Ok(response)
    }
}

impl LlmProvider for AnthropicAdapter {
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
