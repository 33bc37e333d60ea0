use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ToolCall;

/// Token usage from a single API call.
///
/// Optional counters stay `None` when the provider did not report them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
}

/// Why the LLM stopped generating.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    /// A provider value with no normalized equivalent, kept verbatim.
    Other(String),
}

impl StopReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::StopSequence => "stop_sequence",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for StopReason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "end_turn" => Self::EndTurn,
            "tool_use" => Self::ToolUse,
            "max_tokens" => Self::MaxTokens,
            "stop_sequence" => Self::StopSequence,
            _ => Self::Other(value),
        }
    }
}

impl From<StopReason> for String {
    fn from(reason: StopReason) -> Self {
        reason.as_str().to_string()
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized response from an LLM API call.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub model: String,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Provider payload as received. Debugging aid only.
    #[serde(default)]
    pub raw: Value,
}

// `raw` is deliberately left out so responses can be logged with `?`.
impl fmt::Debug for LlmResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmResponse")
            .field("content", &self.content)
            .field("tool_calls", &self.tool_calls)
            .field("usage", &self.usage)
            .field("model", &self.model)
            .field("stop_reason", &self.stop_reason)
            .field("thinking", &self.thinking)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stop_reason_passthrough() {
        assert_eq!(StopReason::from("tool_use".to_string()), StopReason::ToolUse);
        let odd = StopReason::from("content_filter".to_string());
        assert_eq!(odd, StopReason::Other("content_filter".into()));
        assert_eq!(odd.as_str(), "content_filter");
    }

    #[test]
    fn test_usage_optional_fields_absent() {
        let usage: Usage =
            serde_json::from_value(json!({"input_tokens": 3, "output_tokens": 4, "total_tokens": 7}))
                .unwrap();
        assert_eq!(usage.cache_read_tokens, None);
        assert_eq!(usage.reasoning_tokens, None);

        let json = serde_json::to_value(&usage).unwrap();
        assert!(json.get("cache_write_tokens").is_none());
    }

    #[test]
    fn test_debug_omits_raw_payload() {
        let response = LlmResponse {
            content: Some("hi".into()),
            tool_calls: vec![],
            usage: Usage::default(),
            model: "m".into(),
            stop_reason: StopReason::EndTurn,
            thinking: None,
            raw: json!({"secret": "do-not-print"}),
        };
        let rendered = format!("{response:?}");
        assert!(rendered.contains("hi"));
        assert!(!rendered.contains("do-not-print"));
    }
}
