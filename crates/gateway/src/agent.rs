//! Adapters wiring `AgentOrchestrator` into the three places a turn can
//! start from: an inbound chat event (via the request queue), a
//! scheduled cron fire, and a background task spawned for a heavy
//! request. Each adapter just builds a `TurnRequest` and translates the
//! `TurnOutcome` into whatever shape its caller expects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use lucy_domain::{Error, Result};
use lucy_orchestrator::{
    AgentOrchestrator, ChatMessage, ExecutionMode, ResumeRequest, ToolCall, ToolDefinition, TurnOutcome, TurnRequest,
};
use lucy_queue::{QueuedRequest, RequestHandler};
use lucy_tasks::{BackgroundHandler, CancelToken, ChatPoster};
use lucy_workspace::{ACTIVITY_LOG_KEY, WorkspaceStore};
use serde::Deserialize;
use uuid::Uuid;

pub const SYSTEM_PROMPT: &str =
    "You are Lucy, an AI coworker. Use the tools available to you to get things done; \
     only ask the user for clarification when you genuinely can't proceed without it.";

pub fn internal_tool_catalog() -> Vec<ToolDefinition> {
    let empty_object = serde_json::json!({ "type": "object", "properties": {} });
    vec![
        ToolDefinition {
            name: "lucy_list_crons".into(),
            app: None,
            description: "List this workspace's scheduled jobs.".into(),
            parameters: empty_object.clone(),
        },
        ToolDefinition {
            name: "lucy_create_cron".into(),
            app: None,
            description: "Schedule a new cron job.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "cron": {"type": "string"},
                    "title": {"type": "string"},
                    "description": {"type": "string"}
                },
                "required": ["path", "cron", "title", "description"]
            }),
        },
        ToolDefinition {
            name: "lucy_modify_cron".into(),
            app: None,
            description: "Change an existing scheduled job's cron expression, title, or description.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "cron": {"type": "string"},
                    "title": {"type": "string"},
                    "description": {"type": "string"}
                },
                "required": ["path", "cron", "title", "description"]
            }),
        },
        ToolDefinition {
            name: "lucy_delete_cron".into(),
            app: None,
            description: "Delete a scheduled job.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "lucy_run_cron_now".into(),
            app: None,
            description: "Run an existing scheduled job immediately, out of its normal schedule.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "lucy_read_file".into(),
            app: None,
            description: "Read a file from this workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "lucy_write_file".into(),
            app: None,
            description: "Write a file in this workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: "lucy_list_files".into(),
            app: None,
            description: "List files under a path prefix in this workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}}
            }),
        },
        ToolDefinition {
            name: "META_SEARCH_TOOLS".into(),
            app: None,
            description: "Search the capability index for a tool matching a query.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "connected_apps": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["query"]
            }),
        },
    ]
}

fn outcome_to_text(outcome: TurnOutcome) -> Result<String> {
    match outcome {
        TurnOutcome::Completed { text } => Ok(text),
        TurnOutcome::PendingApproval(gated) => Ok(gated.message),
        TurnOutcome::Aborted { reason } => Err(Error::Fatal(reason)),
    }
}

/// Everything needed to resume a turn that paused at the confirmation
/// gate, captured at the moment it gates so an `approve`/`deny` call
/// arriving later can continue it.
pub struct PendingResume {
    pub tenant_id: String,
    pub thread_key: String,
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tool_catalog: Vec<ToolDefinition>,
    pub connected_apps: Vec<String>,
    pub model: String,
    pub mode: ExecutionMode,
    pub remaining_turns: u32,
    pub user_message: String,
    pub intent: String,
    pub escalation_model: Option<String>,
    pub approved_call: ToolCall,
}

/// Pending resumable turns, keyed by the `PendingAction` id the
/// confirmation gate generated for them.
#[derive(Default)]
pub struct ResumeStore {
    pending: parking_lot::Mutex<HashMap<Uuid, PendingResume>>,
}

impl ResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, action_id: Uuid, resume: PendingResume) {
        self.pending.lock().insert(action_id, resume);
    }

    pub fn take(&self, action_id: &Uuid) -> Option<PendingResume> {
        self.pending.lock().remove(action_id)
    }
}

/// Runs a cron job's instruction through the agent loop in
/// `ExecutionMode::Cron`, which auto-approves writes but still gates
/// destructive actions.
pub struct CronOrchestratorRunner {
    orchestrator: Arc<AgentOrchestrator>,
    model: String,
    resumes: Arc<ResumeStore>,
}

impl CronOrchestratorRunner {
    pub fn new(orchestrator: Arc<AgentOrchestrator>, model: String, resumes: Arc<ResumeStore>) -> Self {
        Self { orchestrator, model, resumes }
    }
}

#[async_trait]
impl lucy_schedule::CronRunner for CronOrchestratorRunner {
    async fn run_job(&self, tenant_id: &str, job: &lucy_schedule::CronJob, instruction: String) -> Result<String> {
        let thread_key = format!("cron:{}", job.path);
        let intent = thread_key.clone();
        let tool_catalog = internal_tool_catalog();
        let req = TurnRequest {
            tenant_id: tenant_id.to_string(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            messages: vec![ChatMessage::user(instruction.clone())],
            tool_catalog: tool_catalog.clone(),
            connected_apps: Vec::new(),
            model: self.model.clone(),
            mode: ExecutionMode::Cron,
            max_turns: lucy_orchestrator::BACKGROUND_MAX_TURNS,
            user_message: instruction.clone(),
            intent: intent.clone(),
            // Cron already runs at the frontier tier, so there's nothing
            // stronger to escalate to.
            escalation_model: None,
        };
        let result = self.orchestrator.run(req).await?;

        if let TurnOutcome::PendingApproval(ref gated) = result.outcome {
            // Cron auto-approves WRITE actions; only a DESTRUCTIVE call
            // reaches the gate here, and there's no human watching a
            // cron fire to approve it inline — park it the same way an
            // interactive gate would, so an operator can still approve
            // it out of band.
            if let Some(call) = result.gated_call.clone() {
                self.resumes.register(
                    gated.action_id,
                    PendingResume {
                        tenant_id: tenant_id.to_string(),
                        thread_key: thread_key.clone(),
                        system_prompt: SYSTEM_PROMPT.to_string(),
                        messages: result.messages.clone(),
                        tool_catalog,
                        connected_apps: Vec::new(),
                        model: self.model.clone(),
                        mode: ExecutionMode::Cron,
                        remaining_turns: lucy_orchestrator::BACKGROUND_MAX_TURNS.saturating_sub(result.turns_used).max(1),
                        user_message: instruction,
                        intent,
                        escalation_model: None,
                        approved_call: call,
                    },
                );
            }
        }

        outcome_to_text(result.outcome)
    }
}

/// Inbound chat payload as enqueued by the dispatch handler.
#[derive(Debug, Deserialize)]
pub struct ChatTurnPayload {
    pub thread_key: String,
    pub message: String,
    pub model: String,
    pub intent: String,
}

/// Drains the priority queue, running each request through the agent
/// loop and appending the outcome to the tenant's activity log. Queue
/// requests carry no reply channel — delivery back to the originating
/// chat platform is out of this crate's scope, matching the original
/// request queue's fire-and-forget worker design.
pub struct QueueOrchestratorHandler<S: WorkspaceStore> {
    orchestrator: Arc<AgentOrchestrator>,
    workspace: Arc<S>,
    resumes: Arc<ResumeStore>,
    frontier_model: String,
}

impl<S: WorkspaceStore> QueueOrchestratorHandler<S> {
    pub fn new(orchestrator: Arc<AgentOrchestrator>, workspace: Arc<S>, resumes: Arc<ResumeStore>, frontier_model: String) -> Self {
        Self { orchestrator, workspace, resumes, frontier_model }
    }
}

#[async_trait]
impl<S: WorkspaceStore> RequestHandler for QueueOrchestratorHandler<S> {
    async fn handle(&self, request: QueuedRequest) {
        let payload: ChatTurnPayload = match serde_json::from_value(request.payload) {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(tenant_id = %request.tenant_id, error = %err, "malformed queued chat payload");
                return;
            }
        };

        let tool_catalog = internal_tool_catalog();
        let max_turns = lucy_orchestrator::DEFAULT_MAX_TURNS;
        let req = TurnRequest {
            tenant_id: request.tenant_id.clone(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            messages: vec![ChatMessage::user(payload.message.clone())],
            tool_catalog: tool_catalog.clone(),
            connected_apps: Vec::new(),
            model: payload.model.clone(),
            mode: ExecutionMode::Interactive,
            max_turns,
            user_message: payload.message.clone(),
            intent: payload.intent.clone(),
            escalation_model: Some(self.frontier_model.clone()),
        };

        let outcome = match self.orchestrator.run(req).await {
            Ok(result) => {
                if let TurnOutcome::PendingApproval(ref gated) = result.outcome {
                    if let Some(call) = result.gated_call.clone() {
                        self.resumes.register(
                            gated.action_id,
                            PendingResume {
                                tenant_id: request.tenant_id.clone(),
                                thread_key: payload.thread_key.clone(),
                                system_prompt: SYSTEM_PROMPT.to_string(),
                                messages: result.messages.clone(),
                                tool_catalog,
                                connected_apps: Vec::new(),
                                model: payload.model.clone(),
                                mode: ExecutionMode::Interactive,
                                remaining_turns: max_turns.saturating_sub(result.turns_used).max(1),
                                user_message: payload.message.clone(),
                                intent: payload.intent.clone(),
                                escalation_model: Some(self.frontier_model.clone()),
                                approved_call: call,
                            },
                        );
                    }
                }
                outcome_to_text(result.outcome).unwrap_or_else(|err| format!("error: {err}"))
            }
            Err(err) => format!("error: {err}"),
        };

        let entry = format!("[{}] {}", payload.thread_key, outcome);
        if let Err(err) = self.workspace.append(&request.tenant_id, ACTIVITY_LOG_KEY, &entry).await {
            tracing::warn!(tenant_id = %request.tenant_id, error = %err, "failed to append activity log");
        }
    }
}

/// Posts a background task's acknowledgement/result/failure messages by
/// appending them to the tenant's activity log, since this crate has no
/// real chat-platform client — a production deployment would swap this
/// for an adapter over the actual chat SDK without `lucy-tasks` needing
/// to know the difference.
pub struct WorkspaceChatPoster<S: WorkspaceStore> {
    workspace: Arc<S>,
    tenant_id: String,
}

impl<S: WorkspaceStore> WorkspaceChatPoster<S> {
    pub fn new(workspace: Arc<S>, tenant_id: String) -> Self {
        Self { workspace, tenant_id }
    }
}

#[async_trait]
impl<S: WorkspaceStore> ChatPoster for WorkspaceChatPoster<S> {
    async fn post_message(&self, thread_key: &str, text: &str) -> Result<String> {
        let msg_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
        let entry = format!("[{thread_key}] ({msg_id}) {text}");
        self.workspace.append(&self.tenant_id, ACTIVITY_LOG_KEY, &entry).await?;
        Ok(msg_id)
    }
}

/// Background-task wrapper for requests classified as heavy
/// (`should_run_as_background_task`). The cancel token is checked
/// cooperatively before the run starts; `AgentOrchestrator::run` has no
/// internal cancellation point, so a cancel requested mid-run still
/// lets the current turn finish.
pub struct BackgroundOrchestratorRunner {
    orchestrator: Arc<AgentOrchestrator>,
    tenant_id: String,
    system_prompt: String,
    message: String,
    model: String,
    intent: String,
    frontier_model: String,
}

impl BackgroundOrchestratorRunner {
    pub fn new(
        orchestrator: Arc<AgentOrchestrator>,
        tenant_id: String,
        message: String,
        model: String,
        intent: String,
        frontier_model: String,
    ) -> Self {
        Self { orchestrator, tenant_id, system_prompt: SYSTEM_PROMPT.to_string(), message, model, intent, frontier_model }
    }
}

#[async_trait]
impl BackgroundHandler for BackgroundOrchestratorRunner {
    async fn run(&self, cancel: CancelToken) -> std::result::Result<String, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Fatal("cancelled before start".into()));
        }
        let req = TurnRequest {
            tenant_id: self.tenant_id.clone(),
            system_prompt: self.system_prompt.clone(),
            messages: vec![ChatMessage::user(self.message.clone())],
            tool_catalog: internal_tool_catalog(),
            connected_apps: Vec::new(),
            model: self.model.clone(),
            mode: ExecutionMode::Interactive,
            max_turns: lucy_orchestrator::BACKGROUND_MAX_TURNS,
            user_message: self.message.clone(),
            intent: self.intent.clone(),
            escalation_model: Some(self.frontier_model.clone()),
        };
        let result = self.orchestrator.run(req).await?;
        outcome_to_text(result.outcome)
    }
}
