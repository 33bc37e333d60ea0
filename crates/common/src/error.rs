use thiserror::Error;

/// Transport-level failure category (below HTTP).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    /// Connection could not be established.
    Connect,
    /// Request or connect timed out.
    Timeout,
    /// Anything else reported by the HTTP client (body decode, redirect loop, ...).
    Other,
}

/// Top-level error type for provider calls.
#[derive(Debug, Error)]
pub enum LlmError {
    // --- Never recovered by any module ---
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("[{provider}] invalid request: {detail}")]
    InvalidRequest { provider: String, detail: String },

    #[error("[{provider}] failed to parse response data: {source}")]
    Parse {
        provider: String,
        /// The unparsed input exactly as received.
        raw: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("[{provider}] adapter is closed")]
    Closed { provider: String },

    // --- Conditionally retryable ---
    #[error("[{provider}] API error {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        /// Raw response body, lossily decoded.
        body: String,
        /// Seconds from a `Retry-After` header, when the provider sent one.
        retry_after: Option<f64>,
    },

    #[error("[{provider}] transport error ({kind:?}): {message}")]
    Transport {
        provider: String,
        kind: TransportKind,
        message: String,
    },
}

impl LlmError {
    /// Build a parse error with a custom message (for structural problems
    /// that serde itself did not flag, e.g. an empty `choices` array).
    pub fn parse_custom(provider: &str, raw: impl Into<String>, message: &str) -> Self {
        Self::Parse {
            provider: provider.to_string(),
            raw: raw.into(),
            source: <serde_json::Error as serde::de::Error>::custom(message),
        }
    }

    /// Provider identity the error came from, if it has one.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::Config(_) => None,
            Self::InvalidRequest { provider, .. }
            | Self::Parse { provider, .. }
            | Self::Closed { provider }
            | Self::Api { provider, .. }
            | Self::Transport { provider, .. } => Some(provider),
        }
    }

    /// HTTP status for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error may succeed on a later attempt, given the set of
    /// status codes the caller treats as transient.
    pub fn is_transient(&self, retryable_status_codes: &[u16]) -> bool {
        match self {
            Self::Api { status, .. } => retryable_status_codes.contains(status),
            Self::Transport { kind, .. } => {
                matches!(kind, TransportKind::Connect | TransportKind::Timeout)
            }
            _ => false,
        }
    }
}

/// Result type alias for provider operations.
pub type Result<T> = std::result::Result<T, LlmError>;
