use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Deepest tool-result nesting an adapter will translate.
pub const MAX_CONTENT_DEPTH: usize = 8;

/// Conversation role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A message in the conversation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn new(role: Role, content: impl Into<MessageContent>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text.into())
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text.into())
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text.into())
    }

    /// A `tool`-role message carrying tool results.
    pub fn tool_results(blocks: Vec<ContentBlock>) -> Self {
        Self::new(Role::Tool, blocks)
    }
}

/// Message (or tool-result) content: a raw string or an ordered list of blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Text of the top-level text blocks (or the raw string), joined by `sep`.
    pub fn joined_text(&self, sep: &str) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(sep),
        }
    }

    /// Nesting depth: 0 for a string, 1 for a flat block list. The walk
    /// stops below `MAX_CONTENT_DEPTH`, so anything deeper reports
    /// `MAX_CONTENT_DEPTH + 1`.
    pub fn depth(&self) -> usize {
        self.depth_within(MAX_CONTENT_DEPTH)
    }

    /// Depth if it is at most `limit`, otherwise `limit + 1`.
    fn depth_within(&self, limit: usize) -> usize {
        match self {
            Self::Text(_) => 0,
            Self::Blocks(_) if limit == 0 => 1,
            Self::Blocks(blocks) => {
                1 + blocks
                    .iter()
                    .map(|b| b.depth_within(limit - 1))
                    .max()
                    .unwrap_or(0)
            }
        }
    }
}

impl From<String> for MessageContent {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for MessageContent {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<Vec<ContentBlock>> for MessageContent {
    fn from(blocks: Vec<ContentBlock>) -> Self {
        Self::Blocks(blocks)
    }
}

/// One unit of message content, discriminated on `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        /// Base64 payload.
        source: String,
        media_type: String,
    },
    ToolUse {
        id: String,
        name: String,
        arguments: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: String,
        content: MessageContent,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<MessageContent>) -> Self {
        Self::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
        }
    }

    /// Nesting depth contributed by tool-result content, capped like
    /// `MessageContent::depth`.
    pub fn depth(&self) -> usize {
        self.depth_within(MAX_CONTENT_DEPTH)
    }

    fn depth_within(&self, limit: usize) -> usize {
        match self {
            Self::ToolResult { content, .. } => content.depth_within(limit),
            _ => 0,
        }
    }
}

/// A tool definition sent to the LLM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON schema, passed through untouched.
    pub parameters: Value,
}

/// A tool invocation requested by the model. Arguments are always parsed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_content_block_tagged_serialization() {
        let block = ContentBlock::ToolUse {
            id: "toolu_1".into(),
            name: "search".into(),
            arguments: json!({"q": "rust"}).as_object().cloned().unwrap(),
        };
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["arguments"]["q"], "rust");

        let back: ContentBlock = serde_json::from_value(value).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_nested_tool_result_deserializes() {
        let json = json!({
            "role": "tool",
            "content": [{
                "type": "tool_result",
                "tool_use_id": "toolu_1",
                "content": [
                    {"type": "text", "text": "outer"},
                    {"type": "tool_result", "tool_use_id": "toolu_0", "content": "inner"}
                ]
            }]
        });

        let msg: Message = serde_json::from_value(json).unwrap();
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.content.depth(), 2);
    }

    #[test]
    fn test_string_content_has_zero_depth() {
        assert_eq!(Message::user("hi").content.depth(), 0);
        let flat = MessageContent::Blocks(vec![ContentBlock::text("a")]);
        assert_eq!(flat.depth(), 1);
    }

    #[test]
    fn test_depth_walk_stops_past_the_cap() {
        let mut content = MessageContent::from("leaf");
        for i in 0..1_000 {
            content = MessageContent::Blocks(vec![ContentBlock::tool_result(format!("t{i}"), content)]);
        }
        assert_eq!(content.depth(), MAX_CONTENT_DEPTH + 1);

        let mut at_cap = MessageContent::from("leaf");
        for i in 0..MAX_CONTENT_DEPTH {
            at_cap = MessageContent::Blocks(vec![ContentBlock::tool_result(format!("t{i}"), at_cap)]);
        }
        assert_eq!(at_cap.depth(), MAX_CONTENT_DEPTH);
    }

    #[test]
    fn test_joined_text_skips_non_text_blocks() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::text("a"),
            ContentBlock::Image {
                source: "AAAA".into(),
                media_type: "image/png".into(),
            },
            ContentBlock::text("b"),
        ]);
        assert_eq!(content.joined_text(" "), "a b");
    }

    #[test]
    fn test_unknown_role_rejected() {
        let result = serde_json::from_value::<Message>(json!({"role": "narrator", "content": "x"}));
        assert!(result.is_err());
    }
}
