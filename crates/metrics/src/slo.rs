use crate::collector::MetricsSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    AtLeast,
    AtMost,
}

#[derive(Debug, Clone)]
pub struct SloTarget {
    pub name: &'static str,
    pub description: &'static str,
    pub threshold: f64,
    pub direction: Direction,
    pub unit: &'static str,
}

pub fn slo_targets() -> Vec<SloTarget> {
    vec![
        SloTarget {
            name: "tool_success_rate",
            description: "tool calls that did not error",
            threshold: 99.0,
            direction: Direction::AtLeast,
            unit: "%",
        },
        SloTarget {
            name: "no_text_fallback_rate",
            description: "turns that fell back to a canned response",
            threshold: 0.5,
            direction: Direction::AtMost,
            unit: "%",
        },
        SloTarget {
            name: "unknown_tool_rate",
            description: "tool calls naming a tool the orchestrator doesn't recognize",
            threshold: 0.1,
            direction: Direction::AtMost,
            unit: "%",
        },
        SloTarget {
            name: "tool_p95_latency_ms",
            description: "95th percentile tool call latency",
            threshold: 8000.0,
            direction: Direction::AtMost,
            unit: "ms",
        },
        SloTarget {
            name: "tool_retrieval_p95_ms",
            description: "95th percentile capability retrieval latency",
            threshold: 500.0,
            direction: Direction::AtMost,
            unit: "ms",
        },
        SloTarget {
            name: "task_p95_latency_ms",
            description: "95th percentile background task latency",
            threshold: 30000.0,
            direction: Direction::AtMost,
            unit: "ms",
        },
    ]
}

#[derive(Debug, Clone)]
pub struct SloResult {
    pub name: &'static str,
    pub passing: bool,
    pub observed: Option<f64>,
    pub threshold: f64,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct SloReport {
    pub results: Vec<SloResult>,
}

impl SloReport {
    pub fn all_passing(&self) -> bool {
        self.results.iter().all(|r| r.passing)
    }

    pub fn failing(&self) -> Vec<&SloResult> {
        self.results.iter().filter(|r| !r.passing).collect()
    }
}

const MIN_TOOL_CALLS: u64 = 10;
const MIN_TASK_COMPLETIONS: u64 = 5;
const MIN_HISTOGRAM_SAMPLES: u64 = 5;

/// Evaluates SLO targets against a metrics snapshot, gated on a minimum
/// sample count per target — with too few samples an SLO is reported
/// passing ("insufficient data") rather than failing, since a handful
/// of cold-start calls shouldn't page anyone.
pub struct SloEvaluator;

impl Default for SloEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl SloEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> SloReport {
        let mut results = Vec::new();
        for target in slo_targets() {
            results.push(self.evaluate_one(&target, snapshot));
        }
        SloReport { results }
    }

    fn evaluate_one(&self, target: &SloTarget, snapshot: &MetricsSnapshot) -> SloResult {
        let (sample_count, observed) = match target.name {
            "tool_success_rate" => {
                let total = snapshot.tool_call_count;
                let errors = *snapshot
                    .counters
                    .get("tool_errors_total")
                    .unwrap_or(&0);
                let rate = if total == 0 {
                    None
                } else {
                    Some(100.0 * (total - errors.min(total)) as f64 / total as f64)
                };
                (total, rate)
            }
            "no_text_fallback_rate" => {
                let total = snapshot.tool_call_count.max(
                    *snapshot.counters.get("llm_turn_total").unwrap_or(&0),
                );
                let fallbacks = *snapshot.counters.get("no_text_fallbacks_total").unwrap_or(&0);
                let rate = if total == 0 {
                    None
                } else {
                    Some(100.0 * fallbacks as f64 / total as f64)
                };
                (total, rate)
            }
            "unknown_tool_rate" => {
                let total = snapshot.tool_call_count;
                let unknown = *snapshot
                    .counters
                    .get("unknown_tool_calls_total")
                    .unwrap_or(&0);
                let rate = if total == 0 {
                    None
                } else {
                    Some(100.0 * unknown as f64 / total as f64)
                };
                (total, rate)
            }
            "tool_p95_latency_ms" => (
                snapshot.tool_call_count,
                snapshot.tool_latency_ms.get("p95").and_then(|v| v.as_f64()),
            ),
            "tool_retrieval_p95_ms" => (
                snapshot.tool_retrieval_sample_count,
                snapshot
                    .tool_retrieval_latency_ms
                    .get("p95")
                    .and_then(|v| v.as_f64()),
            ),
            "task_p95_latency_ms" => (
                snapshot.task_completed_count,
                snapshot.task_latency_ms.get("p95").and_then(|v| v.as_f64()),
            ),
            _ => (0, None),
        };

        let minimum_samples = match target.name {
            "task_p95_latency_ms" => MIN_TASK_COMPLETIONS,
            "tool_retrieval_p95_ms" => MIN_HISTOGRAM_SAMPLES,
            _ => MIN_TOOL_CALLS,
        };

        if sample_count < minimum_samples {
            return SloResult {
                name: target.name,
                passing: true,
                observed: None,
                threshold: target.threshold,
                message: "insufficient data".into(),
            };
        }

        let observed_value = observed.unwrap_or(0.0);
        let passing = match target.direction {
            Direction::AtLeast => observed_value >= target.threshold,
            Direction::AtMost => observed_value <= target.threshold,
        };

        SloResult {
            name: target.name,
            passing,
            observed,
            threshold: target.threshold,
            message: format!(
                "{:.2}{} (threshold {:.2}{})",
                observed_value, target.unit, target.threshold, target.unit
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MetricsCollector;

    #[test]
    fn insufficient_data_passes_by_default() {
        let collector = MetricsCollector::new();
        let report = SloEvaluator::new().evaluate(&collector.snapshot());
        assert!(report.all_passing());
    }

    #[test]
    fn breach_is_reported_once_enough_samples_exist() {
        let collector = MetricsCollector::new();
        for _ in 0..20 {
            collector.tool_called("x");
            collector.tool_error("x");
        }
        let report = SloEvaluator::new().evaluate(&collector.snapshot());
        let result = report
            .results
            .iter()
            .find(|r| r.name == "tool_success_rate")
            .unwrap();
        assert!(!result.passing);
    }

    #[test]
    fn healthy_success_rate_passes() {
        let collector = MetricsCollector::new();
        for _ in 0..20 {
            collector.tool_called("x");
        }
        let report = SloEvaluator::new().evaluate(&collector.snapshot());
        let result = report
            .results
            .iter()
            .find(|r| r.name == "tool_success_rate")
            .unwrap();
        assert!(result.passing);
    }
}
