use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Background task manager configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Maximum number of background tasks a single tenant may have active
    /// at once. Clamped to `1..=20`.
    #[serde(default = "default_max_background_tasks")]
    pub max_background_tasks: usize,
    /// Hard wall-clock ceiling for a single background task, in seconds.
    #[serde(default = "default_max_task_duration_secs")]
    pub max_task_duration_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_background_tasks: default_max_background_tasks(),
            max_task_duration_secs: default_max_task_duration_secs(),
        }
    }
}

impl TaskConfig {
    /// Clamp `max_background_tasks` to the allowed range `1..=20`.
    pub fn clamped(&self) -> Self {
        Self {
            max_background_tasks: self.max_background_tasks.clamp(1, 20),
            max_task_duration_secs: self.max_task_duration_secs,
        }
    }
}

fn default_max_background_tasks() -> usize {
    5
}
fn default_max_task_duration_secs() -> u64 {
    14_400
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = TaskConfig::default();
        assert_eq!(cfg.max_background_tasks, 5);
        assert_eq!(cfg.max_task_duration_secs, 14_400);
    }

    #[test]
    fn clamp_below_min() {
        let cfg = TaskConfig {
            max_background_tasks: 0,
            max_task_duration_secs: 100,
        };
        assert_eq!(cfg.clamped().max_background_tasks, 1);
    }

    #[test]
    fn clamp_above_max() {
        let cfg = TaskConfig {
            max_background_tasks: 100,
            max_task_duration_secs: 100,
        };
        assert_eq!(cfg.clamped().max_background_tasks, 20);
    }

    #[test]
    fn deserialize_missing_field_uses_default() {
        let cfg: TaskConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.max_background_tasks, 5);
    }
}
