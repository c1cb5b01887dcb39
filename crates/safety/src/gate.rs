//! Sits between the orchestrator and tool execution: routes WRITE and
//! DESTRUCTIVE tool calls through a human approval step before they run.
//!
//! The pending-action store follows the same shape as the teacher's
//! exec approval store — a `oneshot::channel` per pending action,
//! resolved by an external `approve`/`deny` call — generalized from a
//! single exec-command gate to any tool call, and from Slack Block Kit
//! to a chat-platform-agnostic JSON block format.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::classifier::{gate_exempt_tools, implicit_consent_tools, ActionClassifier, ActionType};

const META_MULTI_EXECUTE: &str = "META_MULTI_EXECUTE_TOOL";

#[derive(Debug)]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: Option<String> },
}

pub struct PendingAction {
    pub id: Uuid,
    pub tool_name: String,
    pub action_type: ActionType,
    pub description: String,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
    pub respond: oneshot::Sender<ApprovalDecision>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingActionInfo {
    pub id: Uuid,
    pub tool_name: String,
    pub tenant_id: String,
    pub created_at: DateTime<Utc>,
}

impl From<&PendingAction> for PendingActionInfo {
    fn from(p: &PendingAction) -> Self {
        Self {
            id: p.id,
            tool_name: p.tool_name.clone(),
            tenant_id: p.tenant_id.clone(),
            created_at: p.created_at,
        }
    }
}

/// Thread-safe store of actions awaiting human approval.
pub struct ApprovalStore {
    pending: RwLock<HashMap<Uuid, PendingAction>>,
    timeout: Duration,
}

impl ApprovalStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn insert(&self, action: PendingAction) -> PendingActionInfo {
        let info = PendingActionInfo::from(&action);
        self.pending.write().insert(action.id, action);
        info
    }

    pub fn approve(&self, id: &Uuid) -> bool {
        if let Some(pending) = self.pending.write().remove(id) {
            let _ = pending.respond.send(ApprovalDecision::Approved);
            return true;
        }
        false
    }

    pub fn deny(&self, id: &Uuid, reason: Option<String>) -> bool {
        if let Some(pending) = self.pending.write().remove(id) {
            let _ = pending.respond.send(ApprovalDecision::Denied { reason });
            return true;
        }
        false
    }

    pub fn remove_expired(&self, id: &Uuid) {
        self.pending.write().remove(id);
    }

    pub fn list_pending(&self) -> Vec<PendingActionInfo> {
        self.pending.read().values().map(PendingActionInfo::from).collect()
    }
}

/// Determine whether a tool call should be gated, and its classified
/// action type.
pub fn should_gate(
    classifier: &ActionClassifier,
    tool_name: &str,
    parameters: Option<&Value>,
    is_cron_execution: bool,
) -> (bool, ActionType) {
    if gate_exempt_tools().contains(tool_name) {
        return (false, ActionType::Read);
    }
    if implicit_consent_tools().contains(tool_name) {
        return (false, ActionType::Write);
    }

    let action_type = if tool_name == META_MULTI_EXECUTE {
        let actions = parameters
            .and_then(|p| p.get("tools").or_else(|| p.get("actions")))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        classifier.classify_multi_execute(&actions)
    } else {
        classifier.classify(tool_name, parameters)
    };

    if action_type == ActionType::Read {
        return (false, action_type);
    }

    if is_cron_execution {
        if action_type == ActionType::Write {
            return (false, action_type);
        }
        tracing::warn!(tool = tool_name, "confirmation_gate_destructive_in_cron");
        return (true, action_type);
    }

    (true, action_type)
}

fn humanize_tool_name(name: &str) -> String {
    for prefix in ["gmail_", "googlecalendar_", "clerk_"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            let service = prefix.trim_end_matches('_').replace("googlecalendar", "Calendar");
            return format!("{service}: {}", title_case(rest));
        }
    }
    title_case(name)
}

fn title_case(name: &str) -> String {
    name.split('_')
        .map(|w| {
            let mut c = w.chars();
            match c.next() {
                Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate to at most `max_chars` characters, never splitting a
/// multibyte UTF-8 char.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

fn summarize_params(params: &Value) -> String {
    let Value::Object(map) = params else {
        return String::new();
    };
    let mut parts = Vec::new();

    if let Some(v) = map.get("recipient_email").and_then(Value::as_str) {
        parts.push(format!("To: {v}"));
    }
    if let Some(v) = map.get("subject").and_then(Value::as_str) {
        parts.push(format!("Subject: {v}"));
    }
    if let Some(v) = map.get("body").and_then(Value::as_str) {
        let body = if v.chars().count() > 100 { format!("{}...", truncate_chars(v, 100)) } else { v.to_string() };
        parts.push(format!("Body: {body}"));
    }
    if !map.contains_key("recipient_email") {
        if let Some(v) = map.get("title").and_then(Value::as_str) {
            parts.push(format!("Title: {v}"));
        }
    }
    if let Some(v) = map.get("start_datetime").and_then(Value::as_str) {
        parts.push(format!("When: {v}"));
    }
    if let Some(Value::Array(attendees)) = map.get("attendees") {
        let names: Vec<&str> = attendees.iter().filter_map(Value::as_str).collect();
        if !names.is_empty() {
            parts.push(format!("With: {}", names.join(", ")));
        }
    }

    if parts.is_empty() {
        const SKIP: &[&str] = &["api_key", "token", "secret", "password", "confirmed"];
        for (key, val) in map.iter().take(8) {
            if SKIP.contains(&key.as_str()) || parts.len() >= 3 {
                continue;
            }
            let mut val_str = val.to_string();
            if val_str.chars().count() > 80 {
                val_str = truncate_chars(&val_str, 80);
                val_str.push_str("...");
            }
            parts.push(format!("{key}: {val_str}"));
        }
    }

    if parts.is_empty() {
        String::new()
    } else {
        format!("Details:\n{}", parts.iter().map(|p| format!("  - {p}")).collect::<Vec<_>>().join("\n"))
    }
}

pub fn format_confirmation_message(tool_name: &str, parameters: &Value, action_type: ActionType) -> String {
    let stripped = tool_name.strip_prefix("lucy_custom_").unwrap_or(tool_name);
    let summary = summarize_params(parameters);
    let humanized = humanize_tool_name(stripped);

    match action_type {
        ActionType::Destructive => format!(
            "Destructive action — cannot be undone\nAction: `{humanized}`\n{summary}\nThis will execute immediately and may not be reversible."
        ),
        ActionType::Write => format!("Action requires confirmation\nAction: `{humanized}`\n{summary}"),
        ActionType::Read => format!("Action: `{humanized}`"),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GatedResult {
    pub status: &'static str,
    pub action_id: Uuid,
    pub action_type: &'static str,
    pub severity: &'static str,
    pub description: String,
    pub message: String,
    pub blocks: Vec<Value>,
}

/// Build the pending action and the agent-facing result describing it.
pub fn create_gated_result(
    store: &ApprovalStore,
    tool_name: &str,
    parameters: &Value,
    action_type: ActionType,
    tenant_id: &str,
) -> (GatedResult, oneshot::Receiver<ApprovalDecision>) {
    let description = format_confirmation_message(tool_name, parameters, action_type);
    let (tx, rx) = oneshot::channel();
    let id = Uuid::new_v4();

    store.insert(PendingAction {
        id,
        tool_name: tool_name.to_string(),
        action_type,
        description: description.clone(),
        tenant_id: tenant_id.to_string(),
        created_at: Utc::now(),
        respond: tx,
    });

    let severity = if action_type == ActionType::Destructive { "destructive" } else { "write" };

    let result = GatedResult {
        status: "pending_approval",
        action_id: id,
        action_type: action_type.as_str(),
        severity,
        description: description.clone(),
        message: "This action requires user confirmation before execution. Present an approval \
                  prompt with Approve and Cancel controls, including the action_id so the pending \
                  action can be resolved. Do not proceed until the user approves."
            .to_string(),
        blocks: build_approval_blocks(id, &description, severity),
    };

    (result, rx)
}

fn build_approval_blocks(action_id: Uuid, description: &str, severity: &str) -> Vec<Value> {
    let mut blocks = vec![
        json!({
            "type": "section",
            "text": { "type": "markdown", "text": description },
        }),
        json!({
            "type": "actions",
            "elements": [
                {
                    "type": "button",
                    "text": "Approve",
                    "style": "primary",
                    "action": "approve",
                    "value": action_id.to_string(),
                },
                {
                    "type": "button",
                    "text": "Cancel",
                    "style": "danger",
                    "action": "cancel",
                    "value": action_id.to_string(),
                },
            ],
        }),
    ];

    if severity == "destructive" {
        blocks.insert(
            0,
            json!({
                "type": "context",
                "elements": [{ "type": "markdown", "text": "This action requires your explicit approval" }],
            }),
        );
    }

    blocks
}

pub fn empty_params() -> Value {
    Value::Object(Map::new())
}
