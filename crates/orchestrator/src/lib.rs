//! The agent turn loop: the part of Lucy that actually talks to a
//! model, decides which tools to call, and dispatches them.
//!
//! Grounded on the shape of the original `core/agent.py` loop — bounded
//! turns, context trimming, loop detection via a call signature, a
//! one-shot "you do have access" correction on the first turn — built
//! on top of the rate limiter, circuit breaker, retrieval index, and
//! confirmation gate crates the way the teacher's `turn.rs` composes
//! its own collaborators. Unlike `turn.rs`, which dispatches tool calls
//! concurrently with `join_all`, tool calls here run one at a time in
//! the order the model requested them — callers depend on seeing
//! side effects happen in the order they were issued.

pub mod pipeline;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lucy_breaker::CircuitBreakerRegistry;
use lucy_domain::{Error, Result};
use lucy_limits::RateLimiter;
use lucy_metrics::{MetricsCollector, TimedHistogram};
use lucy_retrieval::CapabilityIndex;
use lucy_safety::{create_gated_result, should_gate, ActionClassifier, ApprovalStore, GatedResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Turns spent on an interactive chat request before giving up.
pub const DEFAULT_MAX_TURNS: u32 = 8;
/// Turns allowed for a background/cron-triggered task, which tends to
/// need more steps to finish unattended.
pub const BACKGROUND_MAX_TURNS: u32 = 24;

const TOOL_RESULT_MAX_CHARS: usize = 12_000;
const MAX_PAYLOAD_CHARS: usize = 120_000;
const TRIMMED_TOOL_RESULT_CHARS: usize = 200;

const RETRIEVAL_TOP_K: usize = 8;
const RETRIEVAL_TOP_K_EXPANDED: usize = 20;
const LOW_SCORE_THRESHOLD: f64 = 0.05;

const LOOP_REPEAT_THRESHOLD: u32 = 3;

const MODEL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const API_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(15);

const META_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const INTEGRATION_TOOL_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(20);

/// Whether this turn is answering a chat message or running unattended
/// as a scheduled job. Drives `is_cron_execution` through to the
/// confirmation gate, which auto-approves writes (but not destructive
/// actions) for cron-triggered runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Interactive,
    Cron,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into(), tool_call_id: None, tool_calls: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into(), tool_call_id: None, tool_calls: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into(), tool_call_id: None, tool_calls: None }
    }

    pub fn assistant_with_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.unwrap_or_default(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub app: Option<String>,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// Seam to the model provider. Kept deliberately narrow — one call per
/// turn, no streaming — so this crate can be tested without a live
/// provider and swapped onto a different one without touching the loop.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<LlmResponse>;
}

/// Seam to whatever actually runs a tool (a Composio-style action
/// executor, a custom integration, an internal Lucy tool).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tenant_id: &str, tool_name: &str, arguments: &Value) -> Result<Value>;
}

/// Everything the turn loop needs from the rest of the crate graph.
/// Bundled so `AgentOrchestrator::new` takes one argument instead of
/// eight, and so a caller can build it once per process and clone the
/// `Arc`s into each request.
pub struct OrchestratorDeps {
    pub llm: Arc<dyn LlmClient>,
    pub tools: Arc<dyn ToolExecutor>,
    pub classifier: Arc<ActionClassifier>,
    pub approvals: Arc<ApprovalStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub index: Arc<CapabilityIndex>,
    pub metrics: Arc<MetricsCollector>,
    pub supervisor_client: Arc<dyn lucy_supervisor::LlmClient>,
}

pub struct TurnRequest {
    pub tenant_id: String,
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub tool_catalog: Vec<ToolDefinition>,
    pub connected_apps: Vec<String>,
    pub model: String,
    pub mode: ExecutionMode,
    pub max_turns: u32,
    /// The request that kicked this run off, used for retrieval when
    /// no user message is yet in `messages`, for supervisor prompts,
    /// and for the planner.
    pub user_message: String,
    pub intent: String,
    /// The model to swap to if the supervisor decides to `Escalate`. `None`
    /// (or equal to `model`) makes escalation a no-op — the caller is
    /// already at its highest tier.
    pub escalation_model: Option<String>,
}

#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Completed { text: String },
    PendingApproval(GatedResult),
    Aborted { reason: String },
}

pub struct TurnResult {
    pub outcome: TurnOutcome,
    pub messages: Vec<ChatMessage>,
    pub turns_used: u32,
    /// Set only when `outcome` is `PendingApproval` — the tool call that
    /// was gated, so a caller holding the approval decision can resume
    /// the turn via [`AgentOrchestrator::resume`] without having to
    /// re-derive it from `messages`.
    pub gated_call: Option<ToolCall>,
}

/// Everything [`AgentOrchestrator::resume`] needs to replay an approved
/// tool call and continue the turn it was gated from.
pub struct ResumeRequest {
    pub tenant_id: String,
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

pub struct AgentOrchestrator {
    deps: OrchestratorDeps,
}

impl AgentOrchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self { deps }
    }

    pub async fn run(&self, mut req: TurnRequest) -> Result<TurnResult> {
        let tool_catalog_names: Vec<String> = req.tool_catalog.iter().map(|t| t.name.clone()).collect();
        let mut plan = lucy_supervisor::create_plan(
            self.deps.supervisor_client.as_ref(),
            &req.user_message,
            &tool_catalog_names,
            &req.intent,
            &req.model,
        )
        .await;

        let mut repeat_counts: HashMap<String, u32> = HashMap::new();
        let mut turn_reports: Vec<lucy_supervisor::TurnReport> = Vec::new();
        let mut corrected_no_access = false;
        let started_at = Instant::now();
        let mut last_supervisor_check = Instant::now();

        for turn in 0..req.max_turns {
            let query = last_user_text(&req.messages).unwrap_or_else(|| req.user_message.clone());
            let tools = self.retrieve_tools(&req.tenant_id, &query, &req.tool_catalog, &req.connected_apps);

            let response = self.call_llm(&req.system_prompt, &req.messages, &tools, &req.model).await?;

            if response.tool_calls.is_empty() {
                let text = response.content.unwrap_or_default();

                if turn == 0 && !corrected_no_access && claims_no_access(&text) {
                    corrected_no_access = true;
                    req.messages.push(ChatMessage::assistant(text));
                    req.messages.push(ChatMessage::user(
                        "You do have access to the connected tools listed above. Try again using \
                         them before concluding you can't help with this.",
                    ));
                    continue;
                }

                return self.finish(req, turn, text);
            }

            let signature = call_signature(&response.tool_calls);
            let repeats = repeat_counts.entry(signature).or_insert(0);
            *repeats += 1;
            if *repeats >= LOOP_REPEAT_THRESHOLD {
                self.deps.metrics.tool_loop_detected();
                return self.finish(
                    req,
                    turn,
                    "I noticed I was repeating the same action, so I stopped here rather than loop.".to_string(),
                );
            }

            req.messages
                .push(ChatMessage::assistant_with_tool_calls(response.content.clone(), response.tool_calls.clone()));

            let mut gated: Option<GatedResult> = None;
            let mut gated_call: Option<ToolCall> = None;
            for call in &response.tool_calls {
                let (should_gate_call, action_type) = should_gate(
                    &self.deps.classifier,
                    &call.name,
                    Some(&call.arguments),
                    req.mode == ExecutionMode::Cron,
                );

                if should_gate_call {
                    // The approval decision is resolved out-of-band, by a
                    // later request calling `ApprovalStore::approve`/`deny`
                    // (e.g. from a button click) — not by this call
                    // waiting on the receiver. We hand the pending action
                    // back to the caller and drop the receiver; dropping it
                    // is harmless, `approve`/`deny` already ignore a failed
                    // send if nobody is listening.
                    let (result, _rx) =
                        create_gated_result(&self.deps.approvals, &call.name, &call.arguments, action_type, &req.tenant_id);
                    req.messages
                        .push(ChatMessage::tool_result(call.id.clone(), serde_json::to_string(&result)?));
                    gated = Some(result);
                    gated_call = Some(call.clone());
                    break;
                }

                let result_text = self.dispatch_tool(&req.tenant_id, call).await;

                turn_reports.extend(lucy_supervisor::build_turn_report(
                    turn,
                    &[lucy_supervisor::ToolCallOutcome {
                        tool_name: &call.name,
                        arguments_summary: &serde_json::to_string(&call.arguments).unwrap_or_default(),
                        result: &result_text,
                    }],
                ));

                req.messages.push(ChatMessage::tool_result(call.id.clone(), result_text));
            }

            if let Some(result) = gated {
                return Ok(TurnResult {
                    outcome: TurnOutcome::PendingApproval(result),
                    messages: req.messages,
                    turns_used: turn + 1,
                    gated_call,
                });
            }

            trim_messages(&mut req.messages);

            if lucy_supervisor::should_check(turn, last_supervisor_check, Instant::now()) {
                last_supervisor_check = Instant::now();
                let response_len = req.messages.last().map(|m| m.content.len()).unwrap_or(0);
                let assessment = lucy_supervisor::evaluate_progress(
                    self.deps.supervisor_client.as_ref(),
                    plan.as_ref(),
                    &turn_reports,
                    &req.user_message,
                    started_at.elapsed(),
                    &req.model,
                    response_len,
                    &req.intent,
                )
                .await;

                match assessment.decision {
                    lucy_supervisor::SupervisorDecision::Continue => {}
                    lucy_supervisor::SupervisorDecision::Abort => {
                        let reason = if assessment.guidance.is_empty() {
                            "task judged unrecoverable by the supervisor".to_string()
                        } else {
                            assessment.guidance
                        };
                        req.messages.push(ChatMessage::assistant(
                            "I wasn't able to get this done, so I'm stopping here rather than keep trying.",
                        ));
                        return Ok(TurnResult {
                            outcome: TurnOutcome::Aborted { reason },
                            messages: req.messages,
                            turns_used: turn + 1,
                            gated_call: None,
                        });
                    }
                    lucy_supervisor::SupervisorDecision::AskUser => {
                        let text = if assessment.guidance.is_empty() {
                            "I need a bit more information before I can continue — could you clarify what you'd like me to do?".to_string()
                        } else {
                            assessment.guidance
                        };
                        return self.finish(req, turn, text);
                    }
                    lucy_supervisor::SupervisorDecision::Escalate => {
                        match &req.escalation_model {
                            Some(stronger) if stronger != &req.model => {
                                self.deps.metrics.supervisor_escalated();
                                req.messages.push(ChatMessage::user(format!(
                                    "[guidance] Escalating from {} to {stronger} to get this done.{}",
                                    req.model,
                                    if assessment.guidance.is_empty() {
                                        String::new()
                                    } else {
                                        format!(" {}", assessment.guidance)
                                    }
                                )));
                                req.model = stronger.clone();
                            }
                            _ => {
                                // Already at (or with no known) stronger tier — an
                                // escalation request has nothing to swap to, so it
                                // degrades to the same guidance nudge as `Intervene`.
                                if !assessment.guidance.is_empty() {
                                    req.messages.push(ChatMessage::user(format!("[guidance] {}", assessment.guidance)));
                                }
                            }
                        }
                    }
                    lucy_supervisor::SupervisorDecision::Replan => {
                        let tool_catalog_names: Vec<String> =
                            req.tool_catalog.iter().map(|t| t.name.clone()).collect();
                        plan = lucy_supervisor::create_plan(
                            self.deps.supervisor_client.as_ref(),
                            &req.user_message,
                            &tool_catalog_names,
                            &req.intent,
                            &req.model,
                        )
                        .await;
                        let note = if assessment.guidance.is_empty() {
                            "Replanning — the previous approach wasn't working.".to_string()
                        } else {
                            format!("Replanning: {}", assessment.guidance)
                        };
                        req.messages.push(ChatMessage::user(format!("[guidance] {note}")));
                    }
                    lucy_supervisor::SupervisorDecision::Intervene => {
                        if !assessment.guidance.is_empty() {
                            req.messages.push(ChatMessage::user(format!("[guidance] {}", assessment.guidance)));
                        }
                    }
                }
            }
        }

        self.finish(
            req,
            req.max_turns.saturating_sub(1),
            "I've made several attempts but wasn't able to finish this within my turn budget.".to_string(),
        )
    }

    fn finish(&self, mut req: TurnRequest, turn: u32, raw_text: String) -> Result<TurnResult> {
        let processed = pipeline::process_output(&raw_text);
        let text = if processed.text.trim().is_empty() {
            self.deps.metrics.no_text_fallback();
            pick_apology()
        } else {
            processed.text
        };
        req.messages.push(ChatMessage::assistant(text.clone()));
        self.deps.metrics.task_completed();
        Ok(TurnResult {
            outcome: TurnOutcome::Completed { text },
            messages: req.messages,
            turns_used: turn + 1,
            gated_call: None,
        })
    }

    /// Resumes a turn that was paused at the confirmation gate: executes
    /// the now-approved tool call, replaces its `pending_approval`
    /// placeholder result with the real outcome, and continues the loop
    /// with whatever turn budget is left.
    pub async fn resume(&self, resume: ResumeRequest) -> Result<TurnResult> {
        let result_text = self.dispatch_tool(&resume.tenant_id, &resume.approved_call).await;

        let mut messages = resume.messages;
        if let Some(entry) = messages
            .iter_mut()
            .rev()
            .find(|m| m.tool_call_id.as_deref() == Some(resume.approved_call.id.as_str()))
        {
            entry.content = result_text;
        }

        self.run(TurnRequest {
            tenant_id: resume.tenant_id,
            system_prompt: resume.system_prompt,
            messages,
            tool_catalog: resume.tool_catalog,
            connected_apps: resume.connected_apps,
            model: resume.model,
            mode: resume.mode,
            max_turns: resume.remaining_turns.max(1),
            user_message: resume.user_message,
            intent: resume.intent,
            escalation_model: resume.escalation_model,
        })
        .await
    }

    async fn dispatch_tool(&self, tenant_id: &str, call: &ToolCall) -> String {
        if let Some(api) = RateLimiter::classify_api_from_tool(&call.name, &[]) {
            if let Err(err) = self.deps.rate_limiter.acquire_api(api, API_ACQUIRE_TIMEOUT).await {
                return error_result(&err);
            }
        }

        let breaker = self.deps.breakers.get(&call.name);
        let tools = self.deps.tools.clone();
        let tenant_id = tenant_id.to_string();
        let tool_name = call.name.clone();
        let arguments = call.arguments.clone();
        let timeout = tool_timeout_for(&call.name);

        let outcome = self
            .deps
            .metrics
            .timed(TimedHistogram::ToolLatency, || async {
                tokio::time::timeout(
                    timeout,
                    breaker.call(move || async move { tools.execute(&tenant_id, &tool_name, &arguments).await }),
                )
                .await
            })
            .await;

        match outcome {
            Ok(Ok(value)) => {
                self.deps.metrics.tool_called(&call.name);
                serialize_result(&value)
            }
            Ok(Err(Error::UnknownTool(name))) => {
                self.deps.metrics.unknown_tool_called(&name);
                error_result(&Error::UnknownTool(name))
            }
            Ok(Err(err)) => {
                self.deps.metrics.tool_called(&call.name);
                self.deps.metrics.tool_error(&call.name);
                error_result(&err)
            }
            Err(_) => {
                self.deps.metrics.tool_called(&call.name);
                self.deps.metrics.tool_error(&call.name);
                format!("{{\"error\":\"{} timed out after {}s\"}}", call.name, timeout.as_secs())
            }
        }
    }

    async fn call_llm(
        &self,
        system_prompt: &str,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model: &str,
    ) -> Result<LlmResponse> {
        self.deps.rate_limiter.acquire_model(model, MODEL_ACQUIRE_TIMEOUT).await?;

        let breaker = self.deps.breakers.get("llm");
        let llm = self.deps.llm.clone();
        let system_prompt = system_prompt.to_string();
        let messages = messages.to_vec();
        let tools = tools.to_vec();
        let model = model.to_string();

        self.deps.metrics.inc("llm_turn_total");
        self.deps
            .metrics
            .timed(TimedHistogram::LlmTurnLatency, move || async move {
                breaker
                    .call(move || async move { llm.chat(&system_prompt, &messages, &tools, &model).await })
                    .await
            })
            .await
    }

    fn retrieve_tools(
        &self,
        tenant_id: &str,
        query: &str,
        catalog: &[ToolDefinition],
        connected_apps: &[String],
    ) -> Vec<ToolDefinition> {
        if catalog.is_empty() {
            return Vec::new();
        }

        let start = Instant::now();
        let index = self.deps.index.get(tenant_id);
        if index.debug_stats().0 == 0 || index.is_stale() {
            let records: Vec<(String, Option<String>, String)> =
                catalog.iter().map(|t| (t.name.clone(), t.app.clone(), t.description.clone())).collect();
            index.add_tools(&records);
        }
        let mut results = index.retrieve(query, RETRIEVAL_TOP_K, connected_apps, true);
        let top_score = results.first().map(|r| r.score).unwrap_or(0.0);
        if top_score < LOW_SCORE_THRESHOLD {
            results = index.retrieve(query, RETRIEVAL_TOP_K_EXPANDED, connected_apps, true);
        }
        self.deps
            .metrics
            .record_tool_retrieval_latency(start.elapsed().as_secs_f64() * 1000.0);

        let by_name: HashMap<&str, &ToolDefinition> = catalog.iter().map(|t| (t.name.as_str(), t)).collect();
        let selected: Vec<ToolDefinition> = results
            .iter()
            .filter_map(|r| by_name.get(r.name.as_str()).copied().cloned())
            .collect();

        if selected.is_empty() {
            catalog.to_vec()
        } else {
            selected
        }
    }
}

fn error_result(err: &Error) -> String {
    format!("{{\"error\":\"{}\"}}", err.kind().as_str())
}

fn tool_timeout_for(tool_name: &str) -> Duration {
    if tool_name.starts_with("META_") {
        META_TOOL_TIMEOUT
    } else if RateLimiter::classify_api_from_tool(tool_name, &[]).is_some() || tool_name.starts_with("lucy_custom_") {
        INTEGRATION_TOOL_TIMEOUT
    } else {
        DEFAULT_TOOL_TIMEOUT
    }
}

fn serialize_result(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    };
    if text.chars().count() > TOOL_RESULT_MAX_CHARS {
        let truncated: String = text.chars().take(TOOL_RESULT_MAX_CHARS).collect();
        format!("{truncated}...(truncated)")
    } else {
        text
    }
}

const NO_ACCESS_PHRASES: &[&str] = &[
    "don't have access",
    "do not have access",
    "not connected",
    "need to connect",
    "no access to",
];

fn claims_no_access(text: &str) -> bool {
    let lower = text.to_lowercase();
    NO_ACCESS_PHRASES.iter().any(|p| lower.contains(p))
}

/// Drawn from when a turn ends with nothing to say, rather than
/// emitting the same hardcoded line every time.
const APOLOGY_POOL: &[&str] = &[
    "I wasn't able to put together a response for that one — mind trying again?",
    "Something didn't come together on my end there. Could you rephrase or give me a bit more detail?",
    "I got stuck partway through and don't have a good answer to give you yet.",
];

static APOLOGY_ROTATION: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn pick_apology() -> String {
    let idx = APOLOGY_ROTATION.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % APOLOGY_POOL.len();
    APOLOGY_POOL[idx].to_string()
}

/// Canonical signature for a turn's tool calls: name plus JSON-encoded
/// arguments (object keys sort lexically by default), one call per
/// part, parts sorted and joined so that two turns making the same set
/// of calls in a different order are still recognized as a repeat.
fn call_signature(calls: &[ToolCall]) -> String {
    let mut parts: Vec<String> = calls
        .iter()
        .map(|c| format!("{}:{}", c.name, serde_json::to_string(&c.arguments).unwrap_or_default()))
        .collect();
    parts.sort();
    parts.join("||")
}

fn last_user_text(messages: &[ChatMessage]) -> Option<String> {
    messages.iter().rev().find(|m| m.role == ChatRole::User).map(|m| m.content.clone())
}

/// Compress the older half of tool-result messages down to a short
/// marker once the conversation's total character count crosses
/// `MAX_PAYLOAD_CHARS`, keeping the most recent tool results (and every
/// non-tool message) untouched so the model doesn't lose short-term
/// context to make room for results it already acted on.
fn trim_messages(messages: &mut [ChatMessage]) {
    let total: usize = messages.iter().map(|m| m.content.len()).sum();
    if total <= MAX_PAYLOAD_CHARS {
        return;
    }

    let tool_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.role == ChatRole::Tool)
        .map(|(i, _)| i)
        .collect();
    let keep_from = tool_indices.len() / 2;

    for idx in tool_indices.into_iter().take(keep_from) {
        let msg = &mut messages[idx];
        if msg.content.chars().count() > TRIMMED_TOOL_RESULT_CHARS {
            let truncated: String = msg.content.chars().take(TRIMMED_TOOL_RESULT_CHARS).collect();
            msg.content = format!("{truncated} (trimmed)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedLlm {
        responses: Mutex<Vec<LlmResponse>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn chat(&self, _: &str, _: &[ChatMessage], _: &[ToolDefinition], _: &str) -> Result<LlmResponse> {
            let mut guard = self.responses.lock();
            if guard.is_empty() {
                Ok(LlmResponse { content: Some("done".into()), tool_calls: vec![] })
            } else {
                Ok(guard.remove(0))
            }
        }
    }

    struct EchoTools {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ToolExecutor for EchoTools {
        async fn execute(&self, _tenant_id: &str, tool_name: &str, arguments: &Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::json!({ "tool": tool_name, "echo": arguments }))
        }
    }

    struct SupervisorStub;

    #[async_trait]
    impl lucy_supervisor::LlmClient for SupervisorStub {
        async fn complete(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String> {
            Ok("C".to_string())
        }
    }

    fn deps(llm: ScriptedLlm, tools: EchoTools) -> OrchestratorDeps {
        OrchestratorDeps {
            llm: Arc::new(llm),
            tools: Arc::new(tools),
            classifier: Arc::new(ActionClassifier::new()),
            approvals: Arc::new(ApprovalStore::new(Duration::from_secs(300))),
            rate_limiter: Arc::new(RateLimiter::default()),
            breakers: Arc::new(CircuitBreakerRegistry::default()),
            index: Arc::new(CapabilityIndex::new()),
            metrics: Arc::new(MetricsCollector::new()),
            supervisor_client: Arc::new(SupervisorStub),
        }
    }

    fn base_request() -> TurnRequest {
        TurnRequest {
            tenant_id: "tenant-1".into(),
            system_prompt: "You are Lucy.".into(),
            messages: vec![ChatMessage::user("hi")],
            tool_catalog: vec![],
            connected_apps: vec![],
            model: "claude-fast".into(),
            mode: ExecutionMode::Interactive,
            max_turns: DEFAULT_MAX_TURNS,
            user_message: "hi".into(),
            intent: "greeting".into(),
            escalation_model: None,
        }
    }

    #[tokio::test]
    async fn completes_immediately_when_model_returns_no_tool_calls() {
        let orchestrator = AgentOrchestrator::new(deps(
            ScriptedLlm { responses: Mutex::new(vec![]) },
            EchoTools { calls: AtomicU32::new(0) },
        ));
        let result = orchestrator.run(base_request()).await.unwrap();
        assert!(matches!(result.outcome, TurnOutcome::Completed { .. }));
        assert_eq!(result.turns_used, 1);
    }

    #[tokio::test]
    async fn executes_a_read_tool_call_and_returns_final_text() {
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![
                LlmResponse {
                    content: None,
                    tool_calls: vec![ToolCall { id: "c1".into(), name: "lucy_list_crons".into(), arguments: serde_json::json!({}) }],
                },
                LlmResponse { content: Some("Here is your list.".into()), tool_calls: vec![] },
            ]),
        };
        let tools = EchoTools { calls: AtomicU32::new(0) };
        let orchestrator = AgentOrchestrator::new(deps(llm, tools));
        let mut req = base_request();
        req.tool_catalog = vec![ToolDefinition {
            name: "lucy_list_crons".into(),
            app: None,
            description: "list scheduled jobs".into(),
            parameters: serde_json::json!({}),
        }];

        let result = orchestrator.run(req).await.unwrap();
        match result.outcome {
            TurnOutcome::Completed { text } => assert!(text.contains("Here is your list")),
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(result.messages.iter().any(|m| m.role == ChatRole::Tool));
    }

    #[tokio::test]
    async fn write_tool_call_is_gated_for_interactive_requests() {
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![LlmResponse {
                content: None,
                tool_calls: vec![ToolCall {
                    id: "c1".into(),
                    name: "create_event".into(),
                    arguments: serde_json::json!({"title": "Sync"}),
                }],
            }]),
        };
        let orchestrator = AgentOrchestrator::new(deps(llm, EchoTools { calls: AtomicU32::new(0) }));
        let mut req = base_request();
        req.tool_catalog = vec![ToolDefinition {
            name: "create_event".into(),
            app: Some("calendar".into()),
            description: "create a calendar event".into(),
            parameters: serde_json::json!({}),
        }];

        let result = orchestrator.run(req).await.unwrap();
        assert!(matches!(result.outcome, TurnOutcome::PendingApproval(_)));
    }

    #[tokio::test]
    async fn cron_execution_auto_approves_write_tool_calls() {
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![
                LlmResponse {
                    content: None,
                    tool_calls: vec![ToolCall {
                        id: "c1".into(),
                        name: "create_event".into(),
                        arguments: serde_json::json!({"title": "Sync"}),
                    }],
                },
                LlmResponse { content: Some("Created it.".into()), tool_calls: vec![] },
            ]),
        };
        let tools = EchoTools { calls: AtomicU32::new(0) };
        let orchestrator = AgentOrchestrator::new(deps(llm, tools));
        let mut req = base_request();
        req.mode = ExecutionMode::Cron;
        req.tool_catalog = vec![ToolDefinition {
            name: "create_event".into(),
            app: Some("calendar".into()),
            description: "create a calendar event".into(),
            parameters: serde_json::json!({}),
        }];

        let result = orchestrator.run(req).await.unwrap();
        assert!(matches!(result.outcome, TurnOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn loop_detection_breaks_after_three_identical_calls() {
        let repeated = LlmResponse {
            content: None,
            tool_calls: vec![ToolCall { id: "c1".into(), name: "lucy_web_search".into(), arguments: serde_json::json!({"q": "x"}) }],
        };
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![repeated.clone(), repeated.clone(), repeated, LlmResponse::default()]),
        };
        let orchestrator = AgentOrchestrator::new(deps(llm, EchoTools { calls: AtomicU32::new(0) }));
        let mut req = base_request();
        req.tool_catalog = vec![ToolDefinition {
            name: "lucy_web_search".into(),
            app: None,
            description: "search the web".into(),
            parameters: serde_json::json!({}),
        }];

        let result = orchestrator.run(req).await.unwrap();
        match result.outcome {
            TurnOutcome::Completed { text } => assert!(text.to_lowercase().contains("repeating")),
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(result.turns_used <= 3);
    }

    #[tokio::test]
    async fn false_no_access_claim_is_corrected_once_on_first_turn() {
        let llm = ScriptedLlm {
            responses: Mutex::new(vec![
                LlmResponse { content: Some("I don't have access to your calendar.".into()), tool_calls: vec![] },
                LlmResponse { content: Some("Found it, here you go.".into()), tool_calls: vec![] },
            ]),
        };
        let orchestrator = AgentOrchestrator::new(deps(llm, EchoTools { calls: AtomicU32::new(0) }));
        let result = orchestrator.run(base_request()).await.unwrap();
        match result.outcome {
            TurnOutcome::Completed { text } => assert!(text.contains("Found it")),
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(result.turns_used, 2);
    }

    #[test]
    fn call_signature_is_order_independent() {
        let a = vec![
            ToolCall { id: "1".into(), name: "b".into(), arguments: serde_json::json!({"x": 1}) },
            ToolCall { id: "2".into(), name: "a".into(), arguments: serde_json::json!({"y": 2}) },
        ];
        let b = vec![a[1].clone(), a[0].clone()];
        assert_eq!(call_signature(&a), call_signature(&b));
    }

    #[test]
    fn serialize_result_truncates_long_output() {
        let value = serde_json::json!("x".repeat(TOOL_RESULT_MAX_CHARS + 50));
        let text = serialize_result(&value);
        assert!(text.ends_with("...(truncated)"));
    }

    #[test]
    fn trim_messages_compresses_older_tool_results_once_over_budget() {
        let mut messages = vec![ChatMessage::user("start")];
        for i in 0..10 {
            messages.push(ChatMessage::tool_result(format!("t{i}"), "x".repeat(30_000)));
        }
        trim_messages(&mut messages);
        let tool_msgs: Vec<&ChatMessage> = messages.iter().filter(|m| m.role == ChatRole::Tool).collect();
        assert!(tool_msgs[0].content.ends_with("(trimmed)"));
        assert!(!tool_msgs[tool_msgs.len() - 1].content.ends_with("(trimmed)"));
    }

    #[test]
    fn trim_messages_is_a_no_op_under_budget() {
        let mut messages = vec![ChatMessage::user("hi"), ChatMessage::tool_result("t1", "small result")];
        trim_messages(&mut messages);
        assert_eq!(messages[1].content, "small result");
    }

    #[test]
    fn claims_no_access_matches_known_phrases() {
        assert!(claims_no_access("Sorry, I don't have access to Gmail."));
        assert!(claims_no_access("You need to connect Slack first."));
        assert!(!claims_no_access("Here is your report."));
    }

    #[test]
    fn tool_timeout_tiers_match_tool_kind() {
        assert_eq!(tool_timeout_for("META_SEARCH_TOOLS"), META_TOOL_TIMEOUT);
        assert_eq!(tool_timeout_for("gmail_send_email"), INTEGRATION_TOOL_TIMEOUT);
        assert_eq!(tool_timeout_for("lucy_list_crons"), DEFAULT_TOOL_TIMEOUT);
    }
}
