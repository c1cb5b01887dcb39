/// Shared error type used across all Lucy crates.
///
/// Variants map onto the external error taxonomy (retryable, auth,
/// invalid_params, unknown_tool, circuit_open, rate_limited, timeout,
/// fatal) — `kind()` projects any variant onto one of those tags for
/// logging and for the JSON shape returned to callers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    /// A transient failure the caller may retry (e.g. a 5xx from a model
    /// provider). Distinct from `Provider` because retryability is the
    /// caller-relevant fact, not which provider failed.
    #[error("retryable: {0}")]
    Retryable(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("circuit open: {name} (retry after {retry_after_secs}s)")]
    CircuitOpen { name: String, retry_after_secs: u64 },

    #[error("rate limited: {resource}")]
    RateLimited { resource: String },

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("{0}")]
    Other(String),
}

/// The external taxonomy tag for a given error, used for metrics labels
/// and the JSON `kind` field returned to clients/tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Auth,
    InvalidParams,
    UnknownTool,
    CircuitOpen,
    RateLimited,
    Timeout,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::Auth => "auth",
            ErrorKind::InvalidParams => "invalid_params",
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Fatal => "fatal",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Retryable(_) | Error::Http(_) | Error::Provider { .. } | Error::Io(_) => {
                ErrorKind::Retryable
            }
            Error::Auth(_) => ErrorKind::Auth,
            Error::InvalidParams(_) | Error::Json(_) => ErrorKind::InvalidParams,
            Error::UnknownTool(_) => ErrorKind::UnknownTool,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Config(_) | Error::Fatal(_) | Error::Other(_) => ErrorKind::Fatal,
        }
    }

    /// True if this error should never be shown verbatim to an end user.
    pub fn is_internal_only(&self) -> bool {
        matches!(self, Error::Config(_) | Error::Io(_) | Error::Json(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_open_kind() {
        let err = Error::CircuitOpen {
            name: "anthropic".into(),
            retry_after_secs: 30,
        };
        assert_eq!(err.kind().as_str(), "circuit_open");
    }

    #[test]
    fn config_errors_are_internal_only() {
        assert!(Error::Config("bad field".into()).is_internal_only());
        assert!(!Error::Timeout("slow".into()).is_internal_only());
    }

    #[test]
    fn rate_limited_kind() {
        let err = Error::RateLimited {
            resource: "model:gpt-4o".into(),
        };
        assert_eq!(err.kind().as_str(), "rate_limited");
    }
}
