use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;

use switchyard_common::types::{LlmResponse, Message, Tool};
use switchyard_common::LlmError;

use crate::provider::{InvokeFuture, InvokeOptions, LlmProvider};

/// Request-level token bucket. Starts full; each acquisition takes one token.
pub struct TokenBucket {
    capacity: f64,
    /// Tokens per second.
    refill_rate: f64,
    /// Uses std::sync::Mutex because it is never held across an await.
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Tokens currently available, after accounting for elapsed time.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Take one token, sleeping while the bucket is empty. Returns the total
    /// seconds spent waiting (0.0 when a token was available immediately).
    ///
    /// Dropping the future mid-wait leaves the bucket untouched.
    pub async fn acquire(&self) -> f64 {
        let mut waited = 0.0;

        loop {
            let wait = {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return waited;
                }
                (1.0 - state.tokens) / self.refill_rate
            };

            // Another waiter may take the token first; the loop re-checks.
            tokio::time::sleep(Duration::from_secs_f64(wait)).await;
            waited += wait;
        }
    }
}

/// Buckets keyed by provider identity. The first caller to ask for a
/// provider's bucket fixes its parameters; later callers share it.
#[derive(Default)]
pub struct BucketRegistry {
    buckets: Mutex<HashMap<String, Arc<TokenBucket>>>,
}

impl BucketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<BucketRegistry> {
        static GLOBAL: OnceLock<Arc<BucketRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(BucketRegistry::new())))
    }

    pub fn get_or_create(&self, provider: &str, capacity: u32, refill_rate: f64) -> Arc<TokenBucket> {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets.entry(provider.to_string()).or_insert_with(|| {
            tracing::debug!(provider, capacity, refill_rate, "Token bucket created");
            Arc::new(TokenBucket::new(capacity, refill_rate))
        });
        Arc::clone(bucket)
    }

    pub fn get(&self, provider: &str) -> Option<Arc<TokenBucket>> {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned()
    }

    /// Drop every bucket. Modules already holding one keep using it.
    pub fn clear(&self) {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Settings from `[modules.rate_limit]`.
#[derive(Clone, Debug, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
    /// Bucket size; defaults to `requests_per_minute`.
    #[serde(default)]
    pub burst_capacity: Option<u32>,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst_capacity: None,
        }
    }
}

impl RateLimitSettings {
    fn capacity(&self) -> u32 {
        self.burst_capacity.unwrap_or(self.requests_per_minute)
    }

    fn validate(&self) -> Result<(), LlmError> {
        let mut errors = Vec::new();
        if self.requests_per_minute == 0 {
            errors.push("requests_per_minute must be > 0");
        }
        if self.capacity() < 1 {
            errors.push("burst_capacity must be >= 1");
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LlmError::Config(format!(
                "Invalid [modules.rate_limit] settings: {}",
                errors.join("; ")
            )))
        }
    }
}

fn default_requests_per_minute() -> u32 {
    60
}

/// Throttles calls through the bucket shared by every module wrapping the
/// same provider identity. Never fails a call.
pub struct RateLimitModule {
    inner: Box<dyn LlmProvider>,
    bucket: Arc<TokenBucket>,
}

impl RateLimitModule {
    pub fn new(
        inner: Box<dyn LlmProvider>,
        settings: RateLimitSettings,
        registry: &BucketRegistry,
    ) -> Result<Self, LlmError> {
        settings.validate()?;
        let refill_rate = f64::from(settings.requests_per_minute) / 60.0;
        let bucket = registry.get_or_create(inner.name(), settings.capacity(), refill_rate);
        Ok(Self { inner, bucket })
    }

    async fn run(
        &self,
        messages: &[Message],
        tools: Option<&[Tool]>,
        options: &InvokeOptions,
    ) -> Result<LlmResponse, LlmError> {
        let waited = self.bucket.acquire().await;
        if waited > 0.0 {
            tracing::warn!(
                provider = %self.inner.name(),
                wait_secs = waited,
                "Rate limited, waited for token"
            );
            metrics::counter!("llm.rate_limit.waits", "provider" => self.inner.name().to_string())
                .increment(1);
        }
        self.inner.invoke(messages, tools, options).await
    }
}

impl LlmProvider for RateLimitModule {
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
