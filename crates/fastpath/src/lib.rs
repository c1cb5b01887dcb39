//! Zero-I/O fast path for trivial chat turns (greetings, status checks,
//! help requests) that don't warrant a full model round trip.
//!
//! `FastPathEvaluator::evaluate` is a pure function: no locks, no
//! allocation beyond the returned string, no clock reads beyond what
//! the caller does around it. It must stay well under a millisecond.

use std::sync::atomic::{AtomicUsize, Ordering};

use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastPathCategory {
    Greeting,
    Status,
    Help,
}

#[derive(Debug, Clone)]
pub struct FastPathMatch {
    pub category: FastPathCategory,
    pub response: String,
}

fn greeting_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(hi|hello|hey|good morning|good afternoon|good evening|yo|sup)[!.\s]*$").unwrap()
    })
}

fn status_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(are you (there|up|online)|you (there|up)|status\??|ping|still (there|working)\??)[!.\s]*$").unwrap()
    })
}

fn help_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(help|what can you do\??|how do (i|you) use (you|this)\??|commands\??)[!.\s]*$").unwrap()
    })
}

const GREETING_POOL: &[&str] = &[
    "Hey! What can I help with?",
    "Hi there — what's on the agenda?",
    "Hello! What would you like to get done?",
];

const STATUS_POOL: &[&str] = &[
    "Still here and ready.",
    "Yep, online and listening.",
    "All good on my end.",
];

const HELP_POOL: &[&str] = &[
    "I can look things up, draft messages, manage your calendar, and run background tasks — just tell me what you need.",
    "Ask me to do something concrete — schedule a meeting, send an email, summarize a doc — and I'll take it from there.",
];

/// Pure pattern matcher over the most common trivial chat messages.
/// Holds no state except a rotation counter for response variety.
pub struct FastPathEvaluator {
    rotation: AtomicUsize,
}

impl Default for FastPathEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl FastPathEvaluator {
    pub fn new() -> Self {
        Self {
            rotation: AtomicUsize::new(0),
        }
    }

    fn pick(&self, pool: &[&str]) -> String {
        let idx = self.rotation.fetch_add(1, Ordering::Relaxed) % pool.len();
        pool[idx].to_string()
    }

    /// Returns `Some` only for messages that unambiguously match a
    /// known trivial category; any other input falls through to the
    /// full orchestrator.
    pub fn evaluate(&self, message: &str) -> Option<FastPathMatch> {
        let trimmed = message.trim();
        if trimmed.is_empty() || trimmed.len() > 64 {
            return None;
        }
        if greeting_re().is_match(trimmed) {
            return Some(FastPathMatch {
                category: FastPathCategory::Greeting,
                response: self.pick(GREETING_POOL),
            });
        }
        if status_re().is_match(trimmed) {
            return Some(FastPathMatch {
                category: FastPathCategory::Status,
                response: self.pick(STATUS_POOL),
            });
        }
        if help_re().is_match(trimmed) {
            return Some(FastPathMatch {
                category: FastPathCategory::Help,
                response: self.pick(HELP_POOL),
            });
        }
        None
    }
}
