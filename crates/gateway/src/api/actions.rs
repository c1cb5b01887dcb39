//! `POST /actions/:id/approve` and `POST /actions/:id/deny` — the
//! callback the confirmation gate's `pending_approval` result asks a
//! caller to hit once a human has decided. Resolves the `ApprovalStore`
//! entry (for anything polling `list_pending`) and, if the turn it
//! gated is still parked, resumes or drops it.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use lucy_orchestrator::{ResumeRequest, TurnOutcome};
use lucy_workspace::ACTIVITY_LOG_KEY;

use crate::agent::PendingResume;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct DenyBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn approve_action(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    state.approvals.approve(&id);

    let Some(resume) = state.resumes.take(&id) else {
        return (StatusCode::NOT_FOUND, Json(serde_json::json!({ "status": "not_found" }))).into_response();
    };

    let tenant_id = resume.tenant_id.clone();
    let thread_key = resume.thread_key.clone();
    let tool_catalog = resume.tool_catalog.clone();
    let system_prompt = resume.system_prompt.clone();
    let model = resume.model.clone();
    let mode = resume.mode;
    let user_message = resume.user_message.clone();
    let intent = resume.intent.clone();
    let escalation_model = resume.escalation_model.clone();

    let outcome = state
        .orchestrator
        .resume(ResumeRequest {
            tenant_id: resume.tenant_id,
            system_prompt: resume.system_prompt,
            messages: resume.messages,
            tool_catalog: resume.tool_catalog,
            connected_apps: resume.connected_apps,
            model: resume.model,
            mode: resume.mode,
            remaining_turns: resume.remaining_turns,
            user_message: resume.user_message,
            intent: resume.intent,
            escalation_model: resume.escalation_model,
            approved_call: resume.approved_call,
        })
        .await;

    let text = match outcome {
        Ok(result) => match result.outcome {
            TurnOutcome::Completed { text } => text,
            TurnOutcome::Aborted { reason } => format!("error: {reason}"),
            TurnOutcome::PendingApproval(gated) => {
                // The resumed turn asked for another confirmation (e.g.
                // a second destructive call) — park it the same way the
                // first one was.
                if let Some(call) = result.gated_call {
                    state.resumes.register(
                        gated.action_id,
                        PendingResume {
                            tenant_id: tenant_id.clone(),
                            thread_key: thread_key.clone(),
                            system_prompt,
                            messages: result.messages,
                            tool_catalog,
                            connected_apps: Vec::new(),
                            model,
                            mode,
                            remaining_turns: resume.remaining_turns.saturating_sub(1).max(1),
                            user_message,
                            intent,
                            escalation_model,
                            approved_call: call,
                        },
                    );
                }
                gated.message
            }
        },
        Err(err) => format!("error: {err}"),
    };

    let entry = format!("[{thread_key}] {text}");
    if let Err(err) = state.workspace.append(&tenant_id, ACTIVITY_LOG_KEY, &entry).await {
        tracing::warn!(tenant_id = %tenant_id, error = %err, "failed to append activity log");
    }

    (StatusCode::OK, Json(serde_json::json!({ "status": "approved" }))).into_response()
}

pub async fn deny_action(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<DenyBody>,
) -> impl IntoResponse {
    let reason = body.reason;
    state.approvals.deny(&id, reason.clone());

    if let Some(resume) = state.resumes.take(&id) {
        let suffix = reason.map(|r| format!(" ({r})")).unwrap_or_default();
        let entry = format!("[{}] Action was cancelled.{suffix}", resume.thread_key);
        if let Err(err) = state.workspace.append(&resume.tenant_id, ACTIVITY_LOG_KEY, &entry).await {
            tracing::warn!(tenant_id = %resume.tenant_id, error = %err, "failed to append activity log");
        }
    }

    (StatusCode::OK, Json(serde_json::json!({ "status": "denied" }))).into_response()
}
