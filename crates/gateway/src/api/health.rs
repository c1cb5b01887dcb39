//! Ambient health and metrics endpoints, grounded on the teacher's
//! `/v1/health` and `/v1/metrics` conventions (thin axum handlers
//! reading off `AppState`) extended with the externally-specified
//! response shapes: `/health`, `/metrics`, `/health/slo`,
//! `/health/index`, `/health/db`.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "lucy" }))
}

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let circuit_breakers: Vec<_> = state
        .breakers
        .all_snapshots()
        .into_iter()
        .map(|s| {
            serde_json::json!({
                "name": s.name,
                "state": breaker_state_str(s.state),
                "failure_count": s.failure_count,
                "total_calls": s.total_calls,
            })
        })
        .collect();

    let queue = state.queue.metrics();

    Json(serde_json::json!({
        "uptime_seconds": state.uptime_secs(),
        "counters": snapshot.counters,
        "labeled_counters": snapshot.labeled_counters,
        "histograms": {
            "tool_latency_ms": snapshot.tool_latency_ms,
            "llm_turn_latency_ms": snapshot.llm_turn_latency_ms,
            "task_latency_ms": snapshot.task_latency_ms,
            "tool_retrieval_latency_ms": snapshot.tool_retrieval_latency_ms,
        },
        "circuit_breakers": circuit_breakers,
        "queue": {
            "total_depth": queue.total_depth,
            "total_enqueued": queue.total_enqueued,
            "busy_workers": queue.busy_workers,
        },
        "rate_limit_buckets": state.rate_limiter.metrics(),
    }))
}

fn breaker_state_str(state: lucy_breaker::BreakerState) -> &'static str {
    match state {
        lucy_breaker::BreakerState::Closed => "closed",
        lucy_breaker::BreakerState::Open => "open",
        lucy_breaker::BreakerState::HalfOpen => "half_open",
    }
}

/// Evaluates the six named SLOs from `lucy_metrics::slo` against the
/// current metrics snapshot and logs a structured `slo_breach` line per
/// failure, as the spec's SLOEvaluator requires.
pub async fn health_slo(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.snapshot();
    let report = lucy_metrics::SloEvaluator::new().evaluate(&snapshot);

    for failure in report.failing() {
        tracing::warn!(
            slo = failure.name,
            observed = ?failure.observed,
            threshold = failure.threshold,
            message = %failure.message,
            "slo_breach"
        );
    }

    let slos: Vec<_> = report
        .results
        .iter()
        .map(|r| {
            let target = lucy_metrics::slo::slo_targets().into_iter().find(|t| t.name == r.name);
            serde_json::json!({
                "name": r.name,
                "description": target.as_ref().map(|t| t.description).unwrap_or(""),
                "threshold": r.threshold,
                "direction": target.as_ref().map(|t| match t.direction {
                    lucy_metrics::slo::Direction::AtLeast => "min",
                    lucy_metrics::slo::Direction::AtMost => "max",
                }).unwrap_or("max"),
                "measured": r.observed,
                "status": if r.passing { "PASS" } else { "FAIL" },
                "message": r.message,
            })
        })
        .collect();

    let overall = if report.all_passing() { "PASS" } else { "FAIL" };

    Json(serde_json::json!({
        "overall": overall,
        "total_tasks": snapshot.task_completed_count,
        "total_tool_calls": snapshot.tool_call_count,
        "uptime_seconds": state.uptime_secs(),
        "slos": slos,
    }))
}

pub async fn health_index(State(state): State<AppState>) -> impl IntoResponse {
    let tenants = state.workspace.list_tenants().await.unwrap_or_default();
    let per_workspace: Vec<_> = tenants
        .iter()
        .map(|tenant_id| {
            let idx = state.index.get(tenant_id);
            let (record_count, avg_doc_len) = idx.debug_stats();
            serde_json::json!({
                "workspace_id": tenant_id,
                "total_tools": record_count,
                "avg_doc_len": avg_doc_len,
                "stale": idx.is_stale(),
            })
        })
        .collect();

    Json(serde_json::json!({
        "workspaces": tenants.len(),
        "total_tools": state.index.total_indexed_tools(),
        "per_workspace": per_workspace,
    }))
}

pub async fn health_db(State(state): State<AppState>) -> impl IntoResponse {
    match state.workspace.list_tenants().await {
        Ok(_) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "error", "message": err.to_string() })),
        ),
    }
}
