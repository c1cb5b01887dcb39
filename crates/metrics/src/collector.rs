use std::collections::HashMap;
use std::time::Instant;

use parking_lot::Mutex;
use serde_json::Value;

use crate::histogram::Histogram;

/// The four named latency histograms tracked throughout a turn.
#[derive(Debug, Default)]
struct Histograms {
    tool_latency_ms: Histogram,
    llm_turn_latency_ms: Histogram,
    task_latency_ms: Histogram,
    tool_retrieval_latency_ms: Histogram,
}

#[derive(Default)]
struct State {
    counters: HashMap<String, u64>,
    labeled_counters: HashMap<(String, String), u64>,
    histograms: Histograms,
}

/// Central counter/histogram store for the gateway.
///
/// Grounded on the original `MetricsCollector`: plain counters, labeled
/// counters, and four fixed histograms, all guarded by a single lock
/// since writes are short and infrequent enough that lock contention is
/// never the bottleneck.
#[derive(Default)]
pub struct MetricsCollector {
    state: Mutex<State>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, name: &str) {
        *self.state.lock().counters.entry(name.to_owned()).or_insert(0) += 1;
    }

    pub fn inc_by(&self, name: &str, amount: u64) {
        *self.state.lock().counters.entry(name.to_owned()).or_insert(0) += amount;
    }

    pub fn inc_labeled(&self, name: &str, label: &str) {
        *self
            .state
            .lock()
            .labeled_counters
            .entry((name.to_owned(), label.to_owned()))
            .or_insert(0) += 1;
    }

    pub fn record_tool_latency(&self, ms: f64) {
        self.state.lock().histograms.tool_latency_ms.record(ms);
    }

    pub fn record_llm_turn_latency(&self, ms: f64) {
        self.state.lock().histograms.llm_turn_latency_ms.record(ms);
    }

    pub fn record_task_latency(&self, ms: f64) {
        self.state.lock().histograms.task_latency_ms.record(ms);
    }

    pub fn record_tool_retrieval_latency(&self, ms: f64) {
        self.state
            .lock()
            .histograms
            .tool_retrieval_latency_ms
            .record(ms);
    }

    // ── Semantic helpers, named after the events they represent ──────

    pub fn tool_called(&self, tool_name: &str) {
        self.inc("tool_calls_total");
        self.inc_labeled("tool_called", tool_name);
    }

    pub fn tool_error(&self, tool_name: &str) {
        self.inc("tool_errors_total");
        self.inc_labeled("tool_errors_by_type", tool_name);
    }

    pub fn tool_loop_detected(&self) {
        self.inc("tool_loops_total");
    }

    pub fn unknown_tool_called(&self, tool_name: &str) {
        self.inc("unknown_tool_calls_total");
        self.inc_labeled("unknown_tool_names", tool_name);
    }

    pub fn no_text_fallback(&self) {
        self.inc("no_text_fallbacks_total");
    }

    pub fn calendar_fallback(&self) {
        self.inc("calendar_fallbacks_total");
    }

    pub fn task_completed(&self) {
        self.inc("tasks_total");
        self.inc_labeled("tasks_total", "completed");
    }

    pub fn supervisor_escalated(&self) {
        self.inc("supervisor_escalated_total");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let mut counters = HashMap::new();
        for (k, v) in state.counters.iter() {
            counters.insert(k.clone(), *v);
        }
        let mut labeled_counters: HashMap<String, HashMap<String, u64>> = HashMap::new();
        for ((name, label), count) in state.labeled_counters.iter() {
            labeled_counters
                .entry(name.clone())
                .or_default()
                .insert(label.clone(), *count);
        }
        MetricsSnapshot {
            counters,
            labeled_counters,
            tool_latency_ms: state.histograms.tool_latency_ms.to_dict(),
            llm_turn_latency_ms: state.histograms.llm_turn_latency_ms.to_dict(),
            task_latency_ms: state.histograms.task_latency_ms.to_dict(),
            tool_retrieval_latency_ms: state.histograms.tool_retrieval_latency_ms.to_dict(),
            tool_call_count: *state.counters.get("tool_calls_total").unwrap_or(&0),
            task_completed_count: *state.counters.get("tasks_total").unwrap_or(&0),
            tool_retrieval_sample_count: state.histograms.tool_retrieval_latency_ms.count(),
        }
    }

    pub fn reset_all(&self) {
        *self.state.lock() = State::default();
    }

    /// Measure an async block's wall-clock time and record it against
    /// one of the four named histograms.
    pub async fn timed<F, Fut, T>(&self, which: TimedHistogram, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let start = Instant::now();
        let result = f().await;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match which {
            TimedHistogram::ToolLatency => self.record_tool_latency(elapsed_ms),
            TimedHistogram::LlmTurnLatency => self.record_llm_turn_latency(elapsed_ms),
            TimedHistogram::TaskLatency => self.record_task_latency(elapsed_ms),
            TimedHistogram::ToolRetrievalLatency => self.record_tool_retrieval_latency(elapsed_ms),
        }
        result
    }
}

#[derive(Debug, Clone, Copy)]
pub enum TimedHistogram {
    ToolLatency,
    LlmTurnLatency,
    TaskLatency,
    ToolRetrievalLatency,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub labeled_counters: HashMap<String, HashMap<String, u64>>,
    pub tool_latency_ms: Value,
    pub llm_turn_latency_ms: Value,
    pub task_latency_ms: Value,
    pub tool_retrieval_latency_ms: Value,
    pub tool_call_count: u64,
    pub task_completed_count: u64,
    pub tool_retrieval_sample_count: u64,
}
