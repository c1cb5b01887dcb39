//! Cheap progress monitor for the agent loop — replaces fixed timeouts
//! with a periodic LLM classification of whether the run is on track.
//!
//! Ported from the original supervisor: a planner that front-loads a
//! step list for complex requests, and a checkpoint evaluator that
//! reads a compact summary of recent turns and returns one of six
//! single-letter decisions. Both calls go through an injected
//! `LlmClient` so this crate never talks to a model provider directly.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use lucy_domain::Error;

pub const CHECK_INTERVAL_TURNS: u32 = 3;
pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);

const COMPLEX_INTENTS: &[&str] = &["data", "document", "code", "code_reasoning", "tool_use", "research", "monitoring"];
const SIMPLE_INTENTS: &[&str] = &["greeting", "fast", "follow_up", "status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorDecision {
    Continue,
    Intervene,
    Replan,
    Escalate,
    AskUser,
    Abort,
}

#[derive(Debug, Clone)]
pub struct PlanStep {
    pub number: usize,
    pub description: String,
    pub expected_tools: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TaskPlan {
    pub goal: String,
    pub steps: Vec<PlanStep>,
    pub success_criteria: String,
}

impl TaskPlan {
    pub fn to_prompt_text(&self) -> String {
        let mut lines = vec![format!("Goal: {}", self.goal)];
        for step in &self.steps {
            let hint = if step.expected_tools.is_empty() {
                String::new()
            } else {
                format!(" (using: {})", step.expected_tools.join(", "))
            };
            lines.push(format!("  {}. {}{}", step.number, step.description, hint));
        }
        if !self.success_criteria.is_empty() {
            lines.push(format!("Success: {}", self.success_criteria));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct TurnReport {
    pub turn: u32,
    pub tool_name: String,
    pub tool_args_summary: String,
    pub result_preview: String,
    pub had_error: bool,
    pub error_summary: String,
}

#[derive(Debug, Clone)]
pub struct SupervisorResult {
    pub decision: SupervisorDecision,
    pub guidance: String,
}

impl SupervisorResult {
    fn continue_with_no_guidance() -> Self {
        Self {
            decision: SupervisorDecision::Continue,
            guidance: String::new(),
        }
    }
}

/// Seam to the LLM provider; injected so this crate carries no HTTP
/// dependency of its own.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<String, Error>;
}

fn needs_plan(intent: &str, message: &str) -> bool {
    if SIMPLE_INTENTS.contains(&intent) {
        return false;
    }
    let word_count = message.split_whitespace().count();
    if COMPLEX_INTENTS.contains(&intent) {
        return word_count > 8;
    }
    word_count > 15
}

/// Generate a short execution plan for complex tasks. Returns `None`
/// for simple tasks, on parse failure, or if the LLM call fails.
pub async fn create_plan(
    client: &dyn LlmClient,
    user_message: &str,
    available_tools: &[String],
    intent: &str,
    model: &str,
) -> Option<TaskPlan> {
    if !needs_plan(intent, user_message) {
        return None;
    }

    let truncated: String = user_message.chars().take(300).collect();
    let tools_str = available_tools.iter().take(30).cloned().collect::<Vec<_>>().join(", ");
    let prompt = format!(
        "You are a task planner. Create a brief execution plan.\n\n\
         USER REQUEST: {truncated}\n\
         AVAILABLE TOOLS: {tools_str}\n\n\
         Output a plan with 2-6 numbered steps. Each step should be one \
         concrete action. Keep it terse, one line per step.\n\
         Format:\n\
         GOAL: <one sentence>\n\
         1. <step> [tool: <tool_name>]\n\
         2. <step> [tool: <tool_name>]\n\
         ...\n\
         SUCCESS: <what the final output should contain>"
    );

    match client.complete(&prompt, 400, 0.3).await {
        Ok(text) => parse_plan(&text),
        Err(err) => {
            tracing::warn!(error = %err, model, "plan_creation_failed");
            None
        }
    }
}

fn parse_plan(text: &str) -> Option<TaskPlan> {
    if text.trim().len() < 10 {
        return None;
    }

    let mut goal = String::new();
    let mut success = String::new();
    let mut steps = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        let upper = line.to_uppercase();

        if upper.starts_with("GOAL:") {
            goal = line[5..].trim().to_string();
            continue;
        }
        if upper.starts_with("SUCCESS:") {
            success = line[8..].trim().to_string();
            continue;
        }

        let first_four: String = line.chars().take(4).collect();
        if line.starts_with(|c: char| c.is_ascii_digit()) && first_four.contains('.') {
            let dot_idx = line.find('.').unwrap();
            let mut desc = line[dot_idx + 1..].trim().to_string();
            let mut tools = Vec::new();
            if let Some(bracket_start) = desc.to_lowercase().find("[tool:") {
                let tool_part = desc[bracket_start + 6..].trim_end_matches(']').trim().to_string();
                tools = tool_part.split(',').map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
                desc = desc[..bracket_start].trim().to_string();
            }
            steps.push(PlanStep {
                number: steps.len() + 1,
                description: desc,
                expected_tools: tools,
            });
        }
    }

    if steps.is_empty() {
        return None;
    }

    Some(TaskPlan {
        goal: if goal.is_empty() { "Complete the user's request".to_string() } else { goal },
        steps,
        success_criteria: success,
    })
}

/// Whether a supervisor checkpoint should run before this turn.
pub fn should_check(turn: u32, last_check: Instant, now: Instant) -> bool {
    if turn < 2 {
        return false;
    }
    let since_last = now.saturating_duration_since(last_check);
    if since_last >= CHECK_INTERVAL {
        return true;
    }
    turn > 0 && turn % CHECK_INTERVAL_TURNS == 0
}

/// Evaluate progress and decide the next supervisor action.
#[allow(clippy::too_many_arguments)]
pub async fn evaluate_progress(
    client: &dyn LlmClient,
    plan: Option<&TaskPlan>,
    turn_reports: &[TurnReport],
    user_message: &str,
    elapsed: Duration,
    current_model: &str,
    response_text_length: usize,
    intent: &str,
) -> SupervisorResult {
    let plan_text = plan.map(TaskPlan::to_prompt_text).unwrap_or_else(|| "No plan (simple task)".to_string());

    let recent: Vec<&TurnReport> = turn_reports.iter().rev().take(3).rev().collect();
    let recent_text = if recent.is_empty() {
        "  (no tools called yet)".to_string()
    } else {
        recent
            .iter()
            .map(|r| {
                let status = if r.had_error {
                    format!("ERROR: {}", r.error_summary)
                } else {
                    r.result_preview.chars().take(80).collect()
                };
                format!("  Turn {}: {} -> {}", r.turn, r.tool_name, status)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let error_count = turn_reports.iter().filter(|r| r.had_error).count();
    let consecutive_errors = turn_reports.iter().rev().take_while(|r| r.had_error).count();

    let intent_hint = if intent == "monitoring" {
        "\nIMPORTANT: This is a MONITORING/ALERTING request. The agent should be creating a \
         recurring monitor for instant alerts or a scheduled report, not just fetching data once. \
         If it is only fetching data, choose I and instruct it to set up monitoring.\n"
    } else {
        ""
    };

    let truncated: String = user_message.chars().take(150).collect();
    let prompt = format!(
        "You are a task supervisor. Evaluate this agent's progress and decide what should happen next.\n\n\
         USER REQUEST: {truncated}\n\
         INTENT: {intent}\n\
         {intent_hint}\
         PLAN:\n{plan_text}\n\
         TURN: {turn_count}\n\
         ELAPSED: {elapsed_s}s\n\
         RECENT ACTIONS:\n{recent_text}\n\
         TOTAL ERRORS: {error_count} (consecutive: {consecutive_errors})\n\
         RESPONSE SO FAR: {response_text_length} chars\n\
         MODEL: {current_model}\n\n\
         Reply with EXACTLY one letter, then optionally a brief reason on the same line:\n\
         C = continue (agent is making progress)\n\
         I = intervene (inject guidance to correct course)\n\
         R = replan (current plan is wrong, needs new approach)\n\
         E = escalate (switch to a stronger model)\n\
         A = ask user (need clarification)\n\
         X = abort (task is impossible, stop gracefully)\n\n\
         IMPORTANT: Only choose I/R/E/A/X if there is a clear problem. If the agent is making \
         progress, choose C.",
        turn_count = turn_reports.len(),
        elapsed_s = elapsed.as_secs(),
    );

    match client.complete(&prompt, 100, 0.1).await {
        Ok(text) => parse_decision(&text),
        Err(err) => {
            tracing::warn!(error = %err, "supervisor_check_failed");
            SupervisorResult::continue_with_no_guidance()
        }
    }
}

fn parse_decision(text: &str) -> SupervisorResult {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return SupervisorResult::continue_with_no_guidance();
    }

    let mut chars = trimmed.chars();
    let first = chars.next().unwrap().to_ascii_uppercase();
    let guidance = chars.as_str().trim().trim_start_matches(['=', ':', '—', '-', '–']).trim().to_string();

    let decision = match first {
        'C' => SupervisorDecision::Continue,
        'I' => SupervisorDecision::Intervene,
        'R' => SupervisorDecision::Replan,
        'E' => SupervisorDecision::Escalate,
        'A' => SupervisorDecision::AskUser,
        'X' => SupervisorDecision::Abort,
        _ => SupervisorDecision::Continue,
    };

    SupervisorResult { decision, guidance }
}

/// A tool call paired with its serialized result, as observed by a turn.
pub struct ToolCallOutcome<'a> {
    pub tool_name: &'a str,
    pub arguments_summary: &'a str,
    pub result: &'a str,
}

pub fn build_turn_report(turn: u32, outcomes: &[ToolCallOutcome<'_>]) -> Vec<TurnReport> {
    outcomes
        .iter()
        .map(|outcome| {
            let mut args = outcome.arguments_summary.to_string();
            if args.chars().count() > 80 {
                args = args.chars().take(77).collect::<String>() + "...";
            }

            let preview: String = outcome.result.chars().take(100).collect();
            let lower_head: String = outcome.result.chars().take(500).collect::<String>().to_lowercase();

            let mut had_error = false;
            let mut error_summary = String::new();

            if lower_head.contains("\"error\"") {
                had_error = true;
                if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(outcome.result) {
                    if let Some(err_val) = parsed.get("error") {
                        let s = err_val.to_string();
                        error_summary = s.chars().take(120).collect();
                    }
                }
            }
            if lower_head.contains("traceback") || lower_head.contains("exception") {
                had_error = true;
                if error_summary.is_empty() {
                    error_summary = outcome.result.chars().take(120).collect();
                }
            }

            TurnReport {
                turn,
                tool_name: outcome.tool_name.to_string(),
                tool_args_summary: args,
                result_preview: preview,
                had_error,
                error_summary,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedClient(&'static str);

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn complete(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String, Error> {
            Ok(self.0.to_string())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _prompt: &str, _max_tokens: u32, _temperature: f32) -> Result<String, Error> {
            Err(Error::Fatal("provider down".into()))
        }
    }

    #[test]
    fn needs_plan_skips_simple_intents() {
        assert!(!needs_plan("greeting", "a very long message ".repeat(5).as_str()));
    }

    #[test]
    fn needs_plan_requires_length_for_complex_intents() {
        assert!(!needs_plan("research", "short one"));
        assert!(!needs_plan("research", "please research our top competitors now"));
        assert!(needs_plan(
            "research",
            "please research our top three competitors thoroughly and summarize findings"
        ));
    }

    #[test]
    fn needs_plan_falls_back_to_word_count() {
        let long_message = "word ".repeat(16);
        assert!(needs_plan("other", long_message.trim()));
    }

    #[tokio::test]
    async fn create_plan_returns_none_for_simple_task() {
        let client = ScriptedClient("GOAL: x\n1. do thing\nSUCCESS: y");
        let plan = create_plan(&client, "hi", &[], "greeting", "fast-model").await;
        assert!(plan.is_none());
    }

    #[tokio::test]
    async fn create_plan_parses_steps() {
        let client = ScriptedClient(
            "GOAL: Research competitors\n1. Search the web [tool: lucy_web_search]\n2. Summarize findings\nSUCCESS: A report",
        );
        let plan = create_plan(
            &client,
            "please research our top three competitors thoroughly",
            &["lucy_web_search".to_string()],
            "research",
            "fast-model",
        )
        .await
        .unwrap();
        assert_eq!(plan.goal, "Research competitors");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].expected_tools, vec!["lucy_web_search".to_string()]);
    }

    #[tokio::test]
    async fn create_plan_returns_none_on_provider_failure() {
        let client = FailingClient;
        let plan = create_plan(
            &client,
            "please research our top three competitors thoroughly",
            &[],
            "research",
            "fast-model",
        )
        .await;
        assert!(plan.is_none());
    }

    #[test]
    fn should_check_requires_minimum_turn() {
        let now = Instant::now();
        assert!(!should_check(1, now, now));
    }

    #[test]
    fn should_check_fires_on_interval_turns() {
        let now = Instant::now();
        assert!(should_check(3, now, now));
        assert!(!should_check(4, now, now));
    }

    #[test]
    fn should_check_fires_after_time_elapsed() {
        let last = Instant::now();
        let now = last + CHECK_INTERVAL;
        assert!(should_check(2, last, now));
    }

    #[tokio::test]
    async fn evaluate_progress_parses_continue() {
        let client = ScriptedClient("C");
        let result = evaluate_progress(&client, None, &[], "hi", Duration::from_secs(5), "fast-model", 0, "").await;
        assert_eq!(result.decision, SupervisorDecision::Continue);
    }

    #[tokio::test]
    async fn evaluate_progress_parses_intervene_with_guidance() {
        let client = ScriptedClient("I - try using the calendar tool instead");
        let result = evaluate_progress(&client, None, &[], "hi", Duration::from_secs(5), "fast-model", 0, "").await;
        assert_eq!(result.decision, SupervisorDecision::Intervene);
        assert!(result.guidance.contains("calendar"));
    }

    #[tokio::test]
    async fn evaluate_progress_defaults_to_continue_on_failure() {
        let client = FailingClient;
        let result = evaluate_progress(&client, None, &[], "hi", Duration::from_secs(5), "fast-model", 0, "").await;
        assert_eq!(result.decision, SupervisorDecision::Continue);
    }

    #[test]
    fn build_turn_report_detects_json_error() {
        let outcomes = vec![ToolCallOutcome {
            tool_name: "lucy_send_email",
            arguments_summary: "{}",
            result: r#"{"error": "rate limited"}"#,
        }];
        let reports = build_turn_report(1, &outcomes);
        assert!(reports[0].had_error);
        assert_eq!(reports[0].error_summary, "\"rate limited\"");
    }

    #[test]
    fn build_turn_report_handles_clean_result() {
        let outcomes = vec![ToolCallOutcome {
            tool_name: "lucy_list_crons",
            arguments_summary: "{}",
            result: r#"{"crons": []}"#,
        }];
        let reports = build_turn_report(1, &outcomes);
        assert!(!reports[0].had_error);
    }
}
