//! Token-bucket rate limiting for model calls and internal API calls.
//!
//! Grounded on the original `rate_limiter.py`: one bucket per model name
//! and one bucket per external API, refilled continuously at a fixed
//! rate and drained by `acquire`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use lucy_domain::Error;
use parking_lot::Mutex;

/// A continuously-refilling token bucket.
///
/// `rate` tokens are added per second, capped at `capacity`. `acquire`
/// suspends the caller (cooperatively, via `tokio::time::sleep`) until
/// enough tokens are available or `timeout` elapses.
pub struct TokenBucket {
    rate: f64,
    capacity: f64,
    inner: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate: f64, capacity: f64) -> Self {
        Self {
            rate,
            capacity,
            inner: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Tokens currently available, after refilling.
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.inner.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Acquire `tokens` from the bucket, waiting up to `timeout` for
    /// enough to accumulate. Returns `Error::RateLimited` on timeout.
    pub async fn acquire(&self, tokens: f64, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        loop {
            let wait = {
                let mut state = self.inner.lock();
                self.refill(&mut state);
                if state.tokens >= tokens {
                    state.tokens -= tokens;
                    return Ok(());
                }
                let deficit = tokens - state.tokens;
                Duration::from_secs_f64((deficit / self.rate).max(0.0))
            };

            if Instant::now() + wait > deadline {
                return Err(Error::RateLimited {
                    resource: "token_bucket".into(),
                });
            }
            tokio::time::sleep(wait.min(Duration::from_millis(250))).await;
        }
    }
}

/// Static rate settings for a named resource (model or API), keyed by a
/// prefix match against the resource name.
#[derive(Debug, Clone, Copy)]
pub struct BucketLimit {
    pub rate_per_sec: f64,
    pub capacity: f64,
}

fn default_model_limits() -> Vec<(&'static str, BucketLimit)> {
    vec![
        (
            "gpt-4",
            BucketLimit {
                rate_per_sec: 5.0,
                capacity: 20.0,
            },
        ),
        (
            "claude",
            BucketLimit {
                rate_per_sec: 5.0,
                capacity: 20.0,
            },
        ),
        (
            "gemini",
            BucketLimit {
                rate_per_sec: 8.0,
                capacity: 30.0,
            },
        ),
    ]
}

fn default_api_limits() -> Vec<(&'static str, BucketLimit)> {
    vec![
        (
            "calendar",
            BucketLimit {
                rate_per_sec: 2.0,
                capacity: 10.0,
            },
        ),
        (
            "gmail",
            BucketLimit {
                rate_per_sec: 2.0,
                capacity: 10.0,
            },
        ),
        (
            "slack",
            BucketLimit {
                rate_per_sec: 3.0,
                capacity: 15.0,
            },
        ),
    ]
}

const DEFAULT_LIMIT: BucketLimit = BucketLimit {
    rate_per_sec: 1.0,
    capacity: 5.0,
};

/// Registry of per-model and per-API token buckets, lazily created on
/// first use and looked up by longest-prefix match against a static
/// (overridable) table.
pub struct RateLimiter {
    model_table: Vec<(String, BucketLimit)>,
    api_table: Vec<(String, BucketLimit)>,
    model_buckets: Mutex<HashMap<String, std::sync::Arc<TokenBucket>>>,
    api_buckets: Mutex<HashMap<String, std::sync::Arc<TokenBucket>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(HashMap::new(), HashMap::new())
    }
}

impl RateLimiter {
    pub fn new(
        model_overrides: HashMap<String, BucketLimit>,
        api_overrides: HashMap<String, BucketLimit>,
    ) -> Self {
        // Overrides are checked first so a prefix configured explicitly
        // always wins over the built-in table.
        let mut model_table: Vec<(String, BucketLimit)> = model_overrides.into_iter().collect();
        model_table.extend(
            default_model_limits()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v)),
        );

        let mut api_table: Vec<(String, BucketLimit)> = api_overrides.into_iter().collect();
        api_table.extend(
            default_api_limits()
                .into_iter()
                .map(|(k, v)| (k.to_string(), v)),
        );

        Self {
            model_table,
            api_table,
            model_buckets: Mutex::new(HashMap::new()),
            api_buckets: Mutex::new(HashMap::new()),
        }
    }

    fn lookup_limit(table: &[(String, BucketLimit)], name: &str) -> BucketLimit {
        table
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix.as_str()))
            .map(|(_, limit)| *limit)
            .unwrap_or(DEFAULT_LIMIT)
    }

    fn get_or_create(
        buckets: &Mutex<HashMap<String, std::sync::Arc<TokenBucket>>>,
        table: &[(String, BucketLimit)],
        name: &str,
    ) -> std::sync::Arc<TokenBucket> {
        let mut guard = buckets.lock();
        if let Some(b) = guard.get(name) {
            return b.clone();
        }
        let limit = Self::lookup_limit(table, name);
        let bucket = std::sync::Arc::new(TokenBucket::new(limit.rate_per_sec, limit.capacity));
        guard.insert(name.to_owned(), bucket.clone());
        bucket
    }

    pub async fn acquire_model(&self, model: &str, timeout: Duration) -> Result<(), Error> {
        let bucket = Self::get_or_create(&self.model_buckets, &self.model_table, model);
        bucket.acquire(1.0, timeout).await
    }

    pub async fn acquire_api(&self, api: &str, timeout: Duration) -> Result<(), Error> {
        let bucket = Self::get_or_create(&self.api_buckets, &self.api_table, api);
        bucket.acquire(1.0, timeout).await
    }

    /// Infer the external API a tool call touches, by scanning an
    /// `actions` array of tool parameters for known API name substrings.
    pub fn classify_api_from_tool(tool_name: &str, action_names: &[&str]) -> Option<&'static str> {
        const KNOWN_APIS: &[&str] = &["calendar", "gmail", "slack", "drive", "sheets"];
        let haystacks: Vec<&str> = std::iter::once(tool_name)
            .chain(action_names.iter().copied())
            .collect();
        for api in KNOWN_APIS {
            if haystacks.iter().any(|h| h.to_lowercase().contains(api)) {
                return Some(api);
            }
        }
        None
    }

    /// Snapshot of current availability, for `/health` style reporting.
    pub fn metrics(&self) -> HashMap<String, f64> {
        let mut out = HashMap::new();
        for (name, bucket) in self.model_buckets.lock().iter() {
            out.insert(format!("model:{name}"), bucket.available_tokens());
        }
        for (name, bucket) in self.api_buckets.lock().iter() {
            out.insert(format!("api:{name}"), bucket.available_tokens());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bucket_acquires_immediately_when_tokens_available() {
        let bucket = TokenBucket::new(10.0, 10.0);
        bucket.acquire(5.0, Duration::from_secs(1)).await.unwrap();
        assert!(bucket.available_tokens() < 5.1);
    }

    #[tokio::test]
    async fn bucket_refills_over_time() {
        let bucket = TokenBucket::new(100.0, 10.0);
        bucket.acquire(10.0, Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(bucket.available_tokens() > 0.0);
    }

    #[tokio::test]
    async fn bucket_times_out_when_starved() {
        let bucket = TokenBucket::new(0.001, 1.0);
        bucket.acquire(1.0, Duration::from_secs(1)).await.unwrap();
        let result = bucket.acquire(1.0, Duration::from_millis(50)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn rate_limiter_model_prefix_match() {
        let limiter = RateLimiter::default();
        limiter
            .acquire_model("gpt-4o-mini", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(limiter.metrics().contains_key("model:gpt-4o-mini"));
    }

    #[tokio::test]
    async fn rate_limiter_unknown_model_gets_default() {
        let limiter = RateLimiter::default();
        limiter
            .acquire_model("some-unlisted-model", Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[test]
    fn classify_api_from_tool_name() {
        assert_eq!(
            RateLimiter::classify_api_from_tool("calendar_create_event", &[]),
            Some("calendar")
        );
        assert_eq!(
            RateLimiter::classify_api_from_tool("composio_multi_execute", &["gmail_send"]),
            Some("gmail")
        );
        assert_eq!(
            RateLimiter::classify_api_from_tool("read_file", &[]),
            None
        );
    }

    #[test]
    fn overrides_take_precedence() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "claude".to_string(),
            BucketLimit {
                rate_per_sec: 1.0,
                capacity: 1.0,
            },
        );
        let limiter = RateLimiter::new(overrides, HashMap::new());
        let limit = RateLimiter::lookup_limit(&limiter.model_table, "claude-sonnet");
        assert_eq!(limit.capacity, 1.0);
    }
}
