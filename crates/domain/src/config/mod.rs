mod chat;
mod model;
mod overrides;
mod server;
mod tasks;
mod workspace;

pub use chat::*;
pub use model::*;
pub use overrides::*;
pub use server::*;
pub use tasks::*;
pub use workspace::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub env: EnvKind,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub breakers: BreakerOverrides,
    #[serde(default)]
    pub rate_limits: RateLimitOverrides,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.model.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "model.providers".into(),
                message: "no model providers configured".into(),
            });
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, provider) in self.model.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("model.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if !provider.base_url.is_empty()
                && !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("model.providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }
            if !provider.id.is_empty() && !seen_ids.insert(&provider.id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("model.providers[{i}].id"),
                    message: format!("duplicate provider id \"{}\"", provider.id),
                });
            }
        }

        if self.chat.num_workers == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "chat.num_workers".into(),
                message: "num_workers must be greater than 0".into(),
            });
        }

        if self.chat.max_queue_depth_per_tenant > self.chat.max_total_queue_depth {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "chat.max_queue_depth_per_tenant".into(),
                message: "per-tenant depth cannot exceed total queue depth".into(),
            });
        }

        errors
    }

    /// True if any error-severity issue is present.
    pub fn has_fatal_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_provider_warning_promoted_to_error() {
        let cfg = Config::default();
        assert!(!cfg.has_fatal_errors());
        assert!(cfg
            .validate()
            .iter()
            .any(|e| e.field == "model.providers" && e.severity == ConfigSeverity::Warning));
    }

    #[test]
    fn zero_port_is_fatal() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        assert!(cfg.has_fatal_errors());
    }

    #[test]
    fn duplicate_provider_ids_rejected() {
        let mut cfg = Config::default();
        cfg.model.providers = vec![
            ProviderConfig {
                id: "anthropic".into(),
                kind: ProviderKind::Anthropic,
                base_url: "https://api.anthropic.com".into(),
                auth: AuthConfig::default(),
                default_model: None,
            },
            ProviderConfig {
                id: "anthropic".into(),
                kind: ProviderKind::Anthropic,
                base_url: "https://api.anthropic.com".into(),
                auth: AuthConfig::default(),
                default_model: None,
            },
        ];
        assert!(cfg.has_fatal_errors());
    }

    #[test]
    fn per_tenant_depth_over_total_is_fatal() {
        let mut cfg = Config::default();
        cfg.chat.max_queue_depth_per_tenant = 500;
        assert!(cfg.has_fatal_errors());
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = Config::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.server.port, cfg.server.port);
    }
}
