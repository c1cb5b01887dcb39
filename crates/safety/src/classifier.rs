//! Classifies tool calls into `READ`, `WRITE`, or `DESTRUCTIVE` so the
//! confirmation gate knows which ones need a human in the loop.
//!
//! Classification priority, highest first: explicit overrides, the
//! three internal-tool sets, heuristic name patterns, a parameter
//! hint, then a meta-tool prefix rule. Anything left over defaults to
//! `WRITE` — we never auto-execute an action we can't classify.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    Read,
    Write,
    Destructive,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Read => "READ",
            ActionType::Write => "WRITE",
            ActionType::Destructive => "DESTRUCTIVE",
        }
    }
}

fn compile_set(words: &[&str]) -> Vec<Regex> {
    words
        .iter()
        .map(|w| Regex::new(&format!(r"(?i)(?:^|_){w}(?:_|$)")).unwrap())
        .collect()
}

struct PatternLayers {
    destructive: Vec<Regex>,
    write: Vec<Regex>,
    read: Vec<Regex>,
}

fn patterns() -> &'static PatternLayers {
    static LAYERS: std::sync::OnceLock<PatternLayers> = std::sync::OnceLock::new();
    LAYERS.get_or_init(|| PatternLayers {
        destructive: compile_set(&[
            "send", "delete", "remove", "cancel", "revoke", "ban", "unban", "destroy", "purge",
            "forward", "unsubscribe", "archive", "reply_to",
        ]),
        write: compile_set(&[
            "create", "add", "update", "edit", "modify", "set", "patch", "put", "post", "write",
            "generate", "store", "quick_add", "trigger",
        ]),
        read: compile_set(&[
            "list", "get", "fetch", "search", "find", "check", "count", "query", "lookup", "show",
            "retrieve", "view", "export", "download",
        ]),
    })
}

const INTERNAL_READ_TOOLS: &[&str] = &[
    "lucy_list_crons",
    "lucy_list_heartbeats",
    "lucy_search_history",
    "lucy_get_channel_history",
    "lucy_web_search",
    "lucy_read_file",
    "lucy_list_files",
    "META_SEARCH_TOOLS",
    "META_GET_TOOL_SCHEMAS",
    "META_MANAGE_CONNECTIONS",
];

const INTERNAL_WRITE_TOOLS: &[&str] = &[
    "lucy_create_cron",
    "lucy_modify_cron",
    "lucy_run_cron_now",
    "lucy_create_heartbeat",
    "lucy_write_file",
    "lucy_edit_file",
    "lucy_store_api_key",
    "lucy_resolve_custom_integration",
    "lucy_deploy",
    "lucy_generate_pdf",
    "lucy_generate_excel",
    "lucy_generate_docx",
    "lucy_generate_pptx",
    "lucy_generate_image",
];

const INTERNAL_DESTRUCTIVE_TOOLS: &[&str] = &[
    "lucy_delete_cron",
    "lucy_delete_heartbeat",
    "lucy_delete_custom_integration",
    "lucy_send_email",
];

/// The configurable prefix for meta-tools (discovery/orchestration
/// tools from an external integration layer, e.g. Composio-style).
const META_TOOL_PREFIX: &str = "META_";
const META_MULTI_EXECUTE: &str = "META_MULTI_EXECUTE_TOOL";
const META_REMOTE_BASH: &str = "META_REMOTE_BASH_TOOL";
const META_REMOTE_WORKBENCH: &str = "META_REMOTE_WORKBENCH";

/// Classifies tool calls, with a mutable override table populated at
/// startup from wrapper annotations.
#[derive(Default)]
pub struct ActionClassifier {
    overrides: RwLock<HashMap<String, ActionType>>,
}

impl ActionClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_override(&self, tool_name: impl Into<String>, action_type: ActionType) {
        self.overrides.write().insert(tool_name.into(), action_type);
    }

    /// Classify a tool call into its side-effect level.
    pub fn classify(&self, tool_name: &str, parameters: Option<&Value>) -> ActionType {
        let stripped = tool_name.strip_prefix("lucy_custom_").unwrap_or(tool_name);

        {
            let overrides = self.overrides.read();
            if let Some(a) = overrides.get(tool_name) {
                return *a;
            }
            if let Some(a) = overrides.get(stripped) {
                return *a;
            }
        }

        if INTERNAL_READ_TOOLS.contains(&tool_name) {
            return ActionType::Read;
        }
        if INTERNAL_WRITE_TOOLS.contains(&tool_name) {
            return ActionType::Write;
        }
        if INTERNAL_DESTRUCTIVE_TOOLS.contains(&tool_name) {
            return ActionType::Destructive;
        }

        let layers = patterns();
        if layers.destructive.iter().any(|re| re.is_match(stripped)) {
            return ActionType::Destructive;
        }
        if layers.write.iter().any(|re| re.is_match(stripped)) {
            return ActionType::Write;
        }
        if layers.read.iter().any(|re| re.is_match(stripped)) {
            return ActionType::Read;
        }

        if let Some(Value::Object(map)) = parameters {
            if map.contains_key("confirmed") {
                return ActionType::Write;
            }
        }

        if tool_name.starts_with(META_TOOL_PREFIX) {
            return match tool_name {
                META_MULTI_EXECUTE | META_REMOTE_BASH | META_REMOTE_WORKBENCH => ActionType::Write,
                _ => ActionType::Read,
            };
        }

        tracing::info!(tool = tool_name, "action_classifier_defaulting_to_write");
        ActionType::Write
    }

    /// Classify a multi-execute meta-tool call by the highest-risk
    /// classification across its inner actions.
    pub fn classify_multi_execute(&self, actions: &[Value]) -> ActionType {
        let mut highest = ActionType::Read;
        for action in actions {
            let name = match action {
                Value::String(s) => s.clone(),
                Value::Object(map) => map
                    .get("tool_slug")
                    .or_else(|| map.get("action"))
                    .or_else(|| map.get("tool"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                other => other.to_string(),
            };
            match self.classify(&name, None) {
                ActionType::Destructive => return ActionType::Destructive,
                ActionType::Write if highest == ActionType::Read => highest = ActionType::Write,
                _ => {}
            }
        }
        highest
    }
}

pub fn gate_exempt_tools() -> &'static HashSet<&'static str> {
    static SET: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    SET.get_or_init(|| {
        [
            "META_SEARCH_TOOLS",
            "META_GET_TOOL_SCHEMAS",
            "META_MANAGE_CONNECTIONS",
            "lucy_list_crons",
            "lucy_list_heartbeats",
            "lucy_list_files",
            "lucy_read_file",
            "lucy_search_history",
            "lucy_get_channel_history",
            "lucy_web_search",
        ]
        .into_iter()
        .collect()
    })
}

pub fn implicit_consent_tools() -> &'static HashSet<&'static str> {
    static SET: std::sync::OnceLock<HashSet<&'static str>> = std::sync::OnceLock::new();
    SET.get_or_init(|| {
        [
            "lucy_generate_pdf",
            "lucy_generate_excel",
            "lucy_generate_docx",
            "lucy_generate_pptx",
            "lucy_generate_image",
            "lucy_write_file",
            "lucy_edit_file",
            "lucy_deploy",
        ]
        .into_iter()
        .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_send_as_destructive() {
        let c = ActionClassifier::new();
        assert_eq!(c.classify("gmail_send_email", None), ActionType::Destructive);
    }

    #[test]
    fn classifies_create_as_write() {
        let c = ActionClassifier::new();
        assert_eq!(c.classify("googlecalendar_create_event", None), ActionType::Write);
    }

    #[test]
    fn classifies_list_as_read() {
        let c = ActionClassifier::new();
        assert_eq!(c.classify("EVENTS_LIST", None), ActionType::Read);
    }

    #[test]
    fn override_takes_priority() {
        let c = ActionClassifier::new();
        c.register_override("create_checkout", ActionType::Destructive);
        assert_eq!(c.classify("create_checkout", None), ActionType::Destructive);
    }

    #[test]
    fn internal_tool_sets_are_respected() {
        let c = ActionClassifier::new();
        assert_eq!(c.classify("lucy_send_email", None), ActionType::Destructive);
        assert_eq!(c.classify("lucy_read_file", None), ActionType::Read);
        assert_eq!(c.classify("lucy_run_cron_now", None), ActionType::Write);
    }

    #[test]
    fn confirmed_parameter_hints_write() {
        let c = ActionClassifier::new();
        assert_eq!(
            c.classify("unusual_tool_name", Some(&json!({"confirmed": true}))),
            ActionType::Write
        );
    }

    #[test]
    fn meta_discovery_tools_are_read() {
        let c = ActionClassifier::new();
        assert_eq!(c.classify("META_SEARCH_TOOLS", None), ActionType::Read);
    }

    #[test]
    fn meta_multi_execute_defaults_to_write() {
        let c = ActionClassifier::new();
        assert_eq!(c.classify(META_MULTI_EXECUTE, None), ActionType::Write);
    }

    #[test]
    fn unknown_tool_defaults_to_write() {
        let c = ActionClassifier::new();
        assert_eq!(c.classify("flibbertigibbet", None), ActionType::Write);
    }

    #[test]
    fn multi_execute_returns_highest_risk() {
        let c = ActionClassifier::new();
        let actions = vec![json!("list_users"), json!("delete_user"), json!("create_event")];
        assert_eq!(c.classify_multi_execute(&actions), ActionType::Destructive);
    }

    #[test]
    fn lucy_custom_prefix_is_stripped_for_heuristics() {
        let c = ActionClassifier::new();
        assert_eq!(c.classify("lucy_custom_delete_widget", None), ActionType::Destructive);
    }
}
