use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-name overrides for circuit breakers and rate limiters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Keyed by breaker name (e.g. a provider id or internal API name).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BreakerOverrides {
    #[serde(default)]
    pub overrides: HashMap<String, BreakerOverride>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerOverride {
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub recovery_timeout_secs: Option<u64>,
    #[serde(default)]
    pub half_open_max_calls: Option<u32>,
    #[serde(default)]
    pub minimum_calls: Option<u32>,
}

/// Keyed by model name or API name prefix.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitOverrides {
    #[serde(default)]
    pub model_limits: HashMap<String, BucketLimit>,
    #[serde(default)]
    pub api_limits: HashMap<String, BucketLimit>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketLimit {
    pub rate_per_sec: f64,
    pub capacity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_empty() {
        assert!(BreakerOverrides::default().overrides.is_empty());
        assert!(RateLimitOverrides::default().model_limits.is_empty());
    }

    #[test]
    fn deserialize_breaker_override() {
        let json = r#"{"overrides": {"anthropic": {"failure_threshold": 3}}}"#;
        let parsed: BreakerOverrides = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.overrides.get("anthropic").unwrap().failure_threshold,
            Some(3)
        );
    }
}
