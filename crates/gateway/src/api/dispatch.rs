//! `POST /chat/events` — chat-platform event ingress.
//!
//! Grounded on `inbound()`'s shape (dedupe -> tenant resolution ->
//! fast path -> enqueue) but collapsed onto the externally-specified
//! route and generalized away from any one chat platform's envelope.
//! Six steps: dedupe the event, resolve the tenant (the caller already
//! did; this just trusts `tenant_id`), try the fast path, classify a
//! model-tier route, decide background vs inline, then either spawn a
//! background task or enqueue through the priority queue.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use lucy_domain::config::RoleConfig;
use lucy_queue::{classify_priority, QueuedRequest};
use lucy_tasks::should_run_as_background_task;

use crate::state::{spawn_background_turn, AppState};

#[derive(Debug, Deserialize)]
pub struct InboundChatEvent {
    pub event_id: String,
    pub tenant_id: String,
    pub thread_key: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DispatchResponse {
    Duplicate,
    FastPath { text: String },
    Queued { priority: &'static str },
    Background { task_id: String },
    Error { message: String },
}

/// Model-tier route classification. No original module covers this —
/// it's synthesized from the conventions `classify_priority` and
/// `should_run_as_background_task` already assume upstream: a
/// `"fast"`/`"default"`/`"code"`/`"frontier"` string driving both queue
/// priority and the background-task decision.
fn classify_route_tier(message: &str) -> &'static str {
    let trimmed = message.trim();
    let word_count = trimmed.split_whitespace().count();
    let looks_like_code = ["```", "fn ", "def ", "class ", "SELECT ", "import "]
        .iter()
        .any(|marker| trimmed.contains(marker));

    if trimmed.len() < 20 {
        "fast"
    } else if looks_like_code {
        "code"
    } else if word_count > 60 {
        "frontier"
    } else {
        "default"
    }
}

fn resolve_model(config: &lucy_domain::Config, tier: &str) -> String {
    let lookup = |role: &str| -> Option<RoleConfig> { config.model.roles.get(role).cloned() };
    lookup(tier)
        .or_else(|| lookup("default"))
        .map(|r| r.model)
        .unwrap_or_default()
}

pub async fn dispatch(State(state): State<AppState>, Json(event): Json<InboundChatEvent>) -> impl IntoResponse {
    if state.dedupe.check_and_insert(&event.event_id) {
        return (StatusCode::OK, Json(DispatchResponse::Duplicate)).into_response();
    }

    if let Some(hit) = state.fast_path.evaluate(&event.message) {
        return (StatusCode::OK, Json(DispatchResponse::FastPath { text: hit.response })).into_response();
    }

    let tier = classify_route_tier(&event.message);
    let model = resolve_model(&state.config, tier);

    if should_run_as_background_task(&event.message, tier) {
        return match spawn_background_turn(&state, &event.tenant_id, &event.thread_key, &event.message, &model, tier) {
            Ok(task) => (StatusCode::ACCEPTED, Json(DispatchResponse::Background { task_id: task.task_id.clone() })).into_response(),
            Err(err) => (StatusCode::TOO_MANY_REQUESTS, Json(DispatchResponse::Error { message: err.to_string() })).into_response(),
        };
    }

    let priority = classify_priority(&event.message, tier);
    let payload = serde_json::json!({
        "thread_key": event.thread_key,
        "message": event.message,
        "model": model,
        "intent": tier,
    });
    let request = QueuedRequest {
        id: event.event_id.clone(),
        tenant_id: event.tenant_id.clone(),
        priority,
        enqueue_time: std::time::Instant::now(),
        payload,
    };

    match state.queue.enqueue(request) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(DispatchResponse::Queued { priority: priority_label(priority) }),
        )
            .into_response(),
        Err(err) => (StatusCode::TOO_MANY_REQUESTS, Json(DispatchResponse::Error { message: err.to_string() })).into_response(),
    }
}

fn priority_label(priority: lucy_queue::Priority) -> &'static str {
    match priority {
        lucy_queue::Priority::High => "high",
        lucy_queue::Priority::Normal => "normal",
        lucy_queue::Priority::Low => "low",
    }
}

/// Periodic sweep of stale dedupe entries, driven by
/// `workspace.sweep_interval_secs` rather than relying only on the
/// lazy cleanup triggered by `check_and_insert`.
pub async fn run_dedupe_sweeper(state: AppState) {
    let interval = std::time::Duration::from_secs(state.config.workspace.sweep_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        state.dedupe.sweep();
    }
}

/// Keeps every known tenant's capability index from going stale between
/// turns, rebuilding it from the internal tool catalog every 240s. A
/// turn's own retrieval step already rebuilds an empty or stale index on
/// demand, so this only matters for tenants that have gone quiet.
pub async fn run_index_refresher(state: AppState) {
    let tools: Vec<(String, Option<String>, String)> = crate::agent::internal_tool_catalog()
        .into_iter()
        .map(|t| (t.name, t.app, t.description))
        .collect();
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(240));
    loop {
        ticker.tick().await;
        for tenant in state.workspace.list_tenants().await.unwrap_or_default() {
            let index = state.index.get(&tenant);
            if index.is_stale() || index.debug_stats().0 == 0 {
                index.add_tools(&tools);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_routes_fast() {
        assert_eq!(classify_route_tier("hi there"), "fast");
    }

    #[test]
    fn code_marker_routes_code() {
        assert_eq!(classify_route_tier("can you fix this: ```fn broken() {}```"), "code");
    }

    #[test]
    fn long_message_routes_frontier() {
        let long_message = "please ".repeat(65);
        assert_eq!(classify_route_tier(&long_message), "frontier");
    }

    #[test]
    fn mid_length_message_routes_default() {
        assert_eq!(classify_route_tier("can you help me draft a reply to this email thread"), "default");
    }
}
