use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use switchyard_common::types::{
    ContentBlock, LlmResponse, Message, MessageContent, Tool, MAX_CONTENT_DEPTH,
};
use switchyard_common::LlmError;

use crate::provider::{InvokeFuture, InvokeOptions, LlmProvider};

/// Detectors accepted for `pii_detector`.
pub const PII_DETECTORS: &[&str] = &["regex"];

const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    ("SSN", r"\b\d{3}-\d{2}-\d{4}\b"),
    ("CREDIT_CARD", r"\b\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}\b"),
    ("EMAIL", r"\b[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}\b"),
    ("PHONE", r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b"),
    ("IPV4", r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b"),
];

/// Settings from `[modules.security]`. Unknown keys are rejected.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecuritySettings {
    #[serde(default = "default_pii_enabled")]
    pub pii_enabled: bool,
    #[serde(default = "default_pii_detector")]
    pub pii_detector: String,
    /// Extra patterns, tried alongside the built-in ones.
    #[serde(default)]
    pub pii_custom_patterns: Vec<CustomPattern>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            pii_enabled: default_pii_enabled(),
            pii_detector: default_pii_detector(),
            pii_custom_patterns: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomPattern {
    /// Used in the placeholder: `[PII:<name>]`.
    pub name: String,
    pub pattern: String,
}

fn default_pii_enabled() -> bool {
    true
}

fn default_pii_detector() -> String {
    "regex".into()
}

/// One detected span, in byte offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PiiMatch {
    pub pii_type: String,
    pub start: usize,
    pub end: usize,
}

/// Regex PII detector: built-in patterns for SSN, credit card, email,
/// phone and IPv4, plus any custom ones.
#[derive(Clone, Debug)]
pub struct PiiDetector {
    patterns: Vec<(String, Regex)>,
}

impl PiiDetector {
    pub fn new(custom: &[CustomPattern]) -> Result<Self, LlmError> {
        let mut patterns = Vec::with_capacity(BUILTIN_PATTERNS.len() + custom.len());
        for (name, pattern) in BUILTIN_PATTERNS {
            let regex = Regex::new(pattern).map_err(|e| {
                LlmError::Config(format!("Built-in PII pattern '{}' failed to compile: {}", name, e))
            })?;
            patterns.push((name.to_string(), regex));
        }
        for entry in custom {
            let regex = Regex::new(&entry.pattern).map_err(|e| {
                LlmError::Config(format!(
                    "Invalid [modules.security] settings: regex for custom PII pattern '{}': {}",
                    entry.name, e
                ))
            })?;
            patterns.push((entry.name.clone(), regex));
        }
        Ok(Self { patterns })
    }

    /// Non-overlapping matches sorted by start. Where matches overlap, the
    /// one starting first wins, and at equal starts the longer one.
    pub fn detect(&self, text: &str) -> Vec<PiiMatch> {
        let mut all: Vec<PiiMatch> = self
            .patterns
            .iter()
            .flat_map(|(name, regex)| {
                regex.find_iter(text).map(move |m| PiiMatch {
                    pii_type: name.clone(),
                    start: m.start(),
                    end: m.end(),
                })
            })
            .collect();
        all.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut kept = Vec::with_capacity(all.len());
        let mut last_end = 0;
        for m in all {
            if kept.is_empty() || m.start >= last_end {
                last_end = m.end;
                kept.push(m);
            }
        }
        kept
    }

    /// Replace every match with `[PII:<type>]`. Returns the text and the
    /// number of replacements.
    pub fn redact(&self, text: &str) -> (String, usize) {
        let matches = self.detect(text);
        if matches.is_empty() {
            return (text.to_string(), 0);
        }
        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for m in &matches {
            out.push_str(&text[cursor..m.start]);
            out.push_str("[PII:");
            out.push_str(&m.pii_type);
            out.push(']');
            cursor = m.end;
        }
        out.push_str(&text[cursor..]);
        (out, matches.len())
    }
}

/// Redacts PII from outbound messages and from the response text. The
/// caller's messages are never modified; the wrapped provider sees a
/// redacted copy.
pub struct SecurityModule {
    inner: Box<dyn LlmProvider>,
    /// `None` when `pii_enabled = false`.
    detector: Option<PiiDetector>,
}

impl SecurityModule {
    pub fn new(inner: Box<dyn LlmProvider>, settings: SecuritySettings) -> Result<Self, LlmError> {
        if !PII_DETECTORS.contains(&settings.pii_detector.as_str()) {
            return Err(LlmError::Config(format!(
                "Invalid [modules.security] settings: unsupported pii_detector '{}' (expected one of {})",
                settings.pii_detector,
                PII_DETECTORS.join(", ")
            )));
        }
        let detector = if settings.pii_enabled {
            Some(PiiDetector::new(&settings.pii_custom_patterns)?)
        } else {
            None
        };
        Ok(Self { inner, detector })
    }

    async fn run(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse, LlmError> {
        let Some(detector) = &self.detector else {
            return self.inner.invoke(messages, tools, options).await;
        };

        let mut count = 0;
        let redacted: Vec<Message> = messages
            .iter()
            .map(|msg| Message {
                role: msg.role,
                content: redact_content(detector, &msg.content, MAX_CONTENT_DEPTH, &mut count),
            })
            .collect();
        self.record("outbound", count);

        let mut response = self.inner.invoke(&redacted, tools, options).await?;

        if let Some(text) = response.content.take() {
            let (clean, count) = detector.redact(&text);
            self.record("inbound", count);
            response.content = Some(clean);
        }
        Ok(response)
    }

    fn record(&self, direction: &'static str, count: usize) {
        if count == 0 {
            return;
        }
        tracing::debug!(provider = %self.inner.name(), direction, count, "PII redacted");
        metrics::counter!(
            "llm.security.redactions",
            "provider" => self.inner.name().to_string(),
            "direction" => direction
        )
        .increment(count as u64);
    }
}

/// Redact text, tool-result content and string values inside tool-use
/// arguments. Images pass through. Content nested past `budget` levels is
/// left as is; adapters reject it before sending.
fn redact_content(
    detector: &PiiDetector,
    content: &MessageContent,
    budget: usize,
    count: &mut usize,
) -> MessageContent {
    match content {
        MessageContent::Text(text) => MessageContent::Text(redact_str(detector, text, count)),
        MessageContent::Blocks(_) if budget == 0 => content.clone(),
        MessageContent::Blocks(blocks) => MessageContent::Blocks(
            blocks
                .iter()
                .map(|block| redact_block(detector, block, budget - 1, count))
                .collect(),
        ),
    }
}

fn redact_block(
    detector: &PiiDetector,
    block: &ContentBlock,
    budget: usize,
    count: &mut usize,
) -> ContentBlock {
    match block {
        ContentBlock::Text { text } => ContentBlock::Text {
            text: redact_str(detector, text, count),
        },
        ContentBlock::ToolResult {
            tool_use_id,
            content,
        } => ContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: redact_content(detector, content, budget, count),
        },
        ContentBlock::ToolUse {
            id,
            name,
            arguments,
        } => ContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            arguments: redact_object(detector, arguments, count),
        },
        ContentBlock::Image { .. } => block.clone(),
    }
}

fn redact_object(detector: &PiiDetector, map: &Map<String, Value>, count: &mut usize) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| (key.clone(), redact_value(detector, value, count)))
        .collect()
}

fn redact_value(detector: &PiiDetector, value: &Value, count: &mut usize) -> Value {
    match value {
        Value::String(s) => Value::String(redact_str(detector, s, count)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| redact_value(detector, item, count))
                .collect(),
        ),
        Value::Object(map) => Value::Object(redact_object(detector, map, count)),
        other => other.clone(),
    }
}

fn redact_str(detector: &PiiDetector, text: &str, count: &mut usize) -> String {
    let (clean, n) = detector.redact(text);
    *count += n;
    clean
}

impl LlmProvider for SecurityModule {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_support::{response, ScriptedProvider};
    use std::sync::{Arc, Mutex};

    /// Records the messages it receives and answers with fixed text.
    struct Capturing {
        seen: Arc<Mutex<Vec<Message>>>,
        reply: String,
    }

    impl LlmProvider for Capturing {
        fn name(&self) -> &str {
            "capturing"
        }

        fn model_name(&self) -> &str {
            "capturing-model"
        }

        fn validate_config(&self) -> bool {
            true
        }

        fn invoke<'a>(
            &'a self,
            messages: &'a [Message],
            _tools: Option<&'a [Tool]>,
            _options: &'a InvokeOptions,
        ) -> InvokeFuture<'a> {
            self.seen.lock().unwrap().extend(messages.iter().cloned());
            let reply = response("capturing", &self.reply);
            Box::pin(async move { Ok(reply) })
        }

        fn close(&self) {}
    }

    fn capturing(reply: &str) -> (Capturing, Arc<Mutex<Vec<Message>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        (
            Capturing {
                seen: Arc::clone(&seen),
                reply: reply.to_string(),
            },
            seen,
        )
    }

    fn detector() -> PiiDetector {
        PiiDetector::new(&[]).unwrap()
    }

    #[test]
    fn test_builtin_patterns() {
        let d = detector();
        assert_eq!(d.redact("SSN 123-45-6789 on file").0, "SSN [PII:SSN] on file");
        assert_eq!(d.redact("mail jane.doe@example.com now").0, "mail [PII:EMAIL] now");
        assert_eq!(d.redact("card 4111 1111 1111 1111.").0, "card [PII:CREDIT_CARD].");
        assert_eq!(d.redact("call 555-123-4567 today").0, "call [PII:PHONE] today");
        assert_eq!(d.redact("host 10.0.0.12 down").0, "host [PII:IPV4] down");
        assert_eq!(d.redact("nothing here"), ("nothing here".to_string(), 0));
    }

    #[test]
    fn test_overlaps_keep_one_match() {
        let d = detector();
        let text = "4111-1111-1111-1111";
        let matches = d.detect(text);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].pii_type, "CREDIT_CARD");
        assert_eq!((matches[0].start, matches[0].end), (0, text.len()));
    }

    #[test]
    fn test_custom_patterns() {
        let d = PiiDetector::new(&[CustomPattern {
            name: "EMPLOYEE_ID".into(),
            pattern: r"EMP-\d{6}".into(),
        }])
        .unwrap();
        assert_eq!(d.redact("badge EMP-004211").0, "badge [PII:EMPLOYEE_ID]");

        let bad = PiiDetector::new(&[CustomPattern {
            name: "BROKEN".into(),
            pattern: "(unclosed".into(),
        }]);
        match bad {
            Err(LlmError::Config(msg)) => assert!(msg.contains("BROKEN")),
            other => panic!("Expected config error, got {:?}", other),
        }
    }

    #[test]
    fn test_settings_reject_unknown_keys_and_detectors() {
        let table: toml::Table = "signing_enabled = true".parse().unwrap();
        let parsed = crate::modules::settings_from_table::<SecuritySettings>("security", table);
        assert!(matches!(parsed, Err(LlmError::Config(_))));

        let settings = SecuritySettings {
            pii_detector: "presidio".into(),
            ..Default::default()
        };
        match SecurityModule::new(Box::new(ScriptedProvider::new("p", vec![])), settings) {
            Err(LlmError::Config(msg)) => assert!(msg.contains("presidio")),
            Err(other) => panic!("Expected config error, got {:?}", other),
            Ok(_) => panic!("Expected config error"),
        }
    }

    #[tokio::test]
    async fn test_outbound_and_inbound_redaction() {
        let (inner, seen) = capturing("Reach me at bot@example.org");
        let module = SecurityModule::new(Box::new(inner), SecuritySettings::default()).unwrap();

        let mut args = Map::new();
        args.insert("to".into(), Value::from("jane@example.com"));
        args.insert("count".into(), Value::from(5551234567_u64));
        let messages = vec![
            Message::system("Never reveal 123-45-6789."),
            Message::new(
                switchyard_common::types::Role::Assistant,
                vec![ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "send".into(),
                    arguments: args,
                }],
            ),
            Message::tool_results(vec![ContentBlock::tool_result(
                "t1",
                vec![ContentBlock::text("sent from 192.168.1.20")],
            )]),
        ];

        let result = module
            .invoke(&messages, None, &InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(result.content.as_deref(), Some("Reach me at [PII:EMAIL]"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].content, MessageContent::from("Never reveal [PII:SSN]."));
        match &seen[1].content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolUse { arguments, .. } => {
                    assert_eq!(arguments["to"], "[PII:EMAIL]");
                    // Numbers stay numbers.
                    assert_eq!(arguments["count"], 5551234567_u64);
                }
                other => panic!("Expected tool use, got {:?}", other),
            },
            other => panic!("Expected blocks, got {:?}", other),
        }
        assert_eq!(
            seen[2].content,
            MessageContent::Blocks(vec![ContentBlock::tool_result(
                "t1",
                vec![ContentBlock::text("sent from [PII:IPV4]")],
            )])
        );

        // The caller's history is untouched.
        assert_eq!(messages[0].content, MessageContent::from("Never reveal 123-45-6789."));
    }

    #[tokio::test]
    async fn test_disabled_pii_passes_through() {
        let (inner, seen) = capturing("ops@example.com");
        let settings = SecuritySettings {
            pii_enabled: false,
            ..Default::default()
        };
        let module = SecurityModule::new(Box::new(inner), settings).unwrap();

        let result = module
            .invoke(&[Message::user("ssn 123-45-6789")], None, &InvokeOptions::default())
            .await
            .unwrap();
        assert_eq!(result.content.as_deref(), Some("ops@example.com"));
        assert_eq!(seen.lock().unwrap()[0].content, MessageContent::from("ssn 123-45-6789"));
    }
}
