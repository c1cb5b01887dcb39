//! Background task manager for long-running agent work.
//!
//! A chat turn that would otherwise block a thread for minutes runs
//! instead as a tokio task the caller doesn't have to wait on: the
//! thread stays responsive to new messages while the task posts its
//! own completion (or failure) back through the handler it was given.
//!
//! Grounded on the same state machine as the original task manager:
//! `Pending -> Acknowledged -> Working -> {Completed, Failed, Cancelled}`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lucy_domain::Error;
use parking_lot::Mutex;
use regex::Regex;

pub const MAX_BACKGROUND_TASKS_PER_WORKSPACE: usize = 5;
pub const MAX_TASK_DURATION: Duration = Duration::from_secs(14_400);
const MAX_RETAINED_COMPLETED_TASKS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Acknowledged,
    Working,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Acknowledged => "acknowledged",
            TaskState::Working => "working",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    fn is_active(&self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Acknowledged | TaskState::Working)
    }

    fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Cancelled)
    }
}

/// Cancellation signal shared between the manager and a running task.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A long-running unit of work handed to the task manager.
#[async_trait]
pub trait BackgroundHandler: Send + Sync {
    async fn run(&self, cancel: CancelToken) -> Result<String, Error>;
}

/// The chat-platform posting contract a background task needs — posting
/// the initial acknowledgement and, later, the result or failure message
/// to the same thread. The chat SDK itself lives outside this crate;
/// this seam is the only thing `TaskManager` needs from it.
#[async_trait]
pub trait ChatPoster: Send + Sync {
    /// Posts `text` to `thread_key`, returning an id the caller can use
    /// to track or update it later (the `progress_anchor`).
    async fn post_message(&self, thread_key: &str, text: &str) -> Result<String, Error>;
}

const ACK_POOL: &[&str] = &[
    "On it — this one needs a bit more digging, I'll follow up here when it's done.",
    "Got it, this is going to take a few minutes. I'll post the result in this thread.",
    "Working on this in the background, I'll report back shortly.",
];

const SAFETY_NET_POOL: &[&str] = &[
    "This one ran long and hit its time limit before finishing — sorry about that.",
    "I wasn't able to finish this within the time I'm allowed to spend on a single task.",
];

const ERROR_POOL: &[&str] = &[
    "Something went wrong partway through this one and I couldn't finish it.",
    "I ran into a problem working on this and had to stop.",
];

static POOL_ROTATION: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

fn pick(pool: &[&str]) -> &'static str {
    let idx = POOL_ROTATION.fetch_add(1, Ordering::Relaxed) % pool.len();
    pool[idx]
}

pub struct BackgroundTask {
    pub task_id: String,
    pub workspace_id: String,
    pub thread_key: String,
    pub description: String,
    pub state: Mutex<TaskState>,
    pub started_at: Instant,
    pub completed_at: Mutex<Option<Instant>>,
    pub result: Mutex<Option<String>>,
    pub error: Mutex<Option<String>>,
    pub progress_anchor_msg_id: Mutex<Option<String>>,
    cancel: CancelToken,
    join: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl BackgroundTask {
    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub fn elapsed(&self) -> Duration {
        match *self.completed_at.lock() {
            Some(end) => end.saturating_duration_since(self.started_at),
            None => self.started_at.elapsed(),
        }
    }
}

/// Detects heavy, compound requests (e.g. "research X and write a report")
/// that are worth backgrounding; a plain "research X" finishes fast enough
/// on its own and backgrounding it would just add ack/progress overhead.
fn heavy_compound_re() -> &'static Regex {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(?:comprehensive\s+(?:research|report|analysis|audit)|deep\s+dive|thorough\s+(?:analysis|investigation|review)|(?:research|analyze|investigate).*(?:and|then|also|plus).*(?:create|write|build|generate)|competitive\s+analysis|full\s+audit)",
        )
        .unwrap()
    })
}

/// Only frontier-tier requests carrying a compound heavy signal qualify;
/// everything else runs synchronously.
pub fn should_run_as_background_task(message: &str, route_tier: &str) -> bool {
    route_tier == "frontier" && heavy_compound_re().is_match(message)
}

/// Manages background tasks across all workspaces.
pub struct TaskManager {
    tasks: Arc<Mutex<HashMap<String, Arc<BackgroundTask>>>>,
    workspace_counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            workspace_counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn start_task(
        &self,
        workspace_id: &str,
        thread_key: &str,
        description: &str,
        handler: Arc<dyn BackgroundHandler>,
        chat: Arc<dyn ChatPoster>,
    ) -> Result<Arc<BackgroundTask>, Error> {
        {
            let counts = self.workspace_counts.lock();
            let current = counts.get(workspace_id).copied().unwrap_or(0);
            if current >= MAX_BACKGROUND_TASKS_PER_WORKSPACE {
                return Err(Error::RateLimited {
                    resource: format!("background_tasks:{}", workspace_id),
                });
            }
        }

        let task_id = format!("task_{}", uuid::Uuid::new_v4().simple());
        let cancel = CancelToken::new();
        let task = Arc::new(BackgroundTask {
            task_id: task_id.clone(),
            workspace_id: workspace_id.to_string(),
            thread_key: thread_key.to_string(),
            description: description.to_string(),
            state: Mutex::new(TaskState::Acknowledged),
            started_at: Instant::now(),
            completed_at: Mutex::new(None),
            result: Mutex::new(None),
            error: Mutex::new(None),
            progress_anchor_msg_id: Mutex::new(None),
            cancel: cancel.clone(),
            join: Mutex::new(None),
        });

        self.workspace_counts
            .lock()
            .entry(workspace_id.to_string())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        self.tasks.lock().insert(task_id.clone(), task.clone());

        let run_task = task.clone();
        let counts_ref = self.workspace_counts.clone();
        let tasks_ref = self.tasks.clone();
        let workspace_id_owned = workspace_id.to_string();
        let thread_key_owned = thread_key.to_string();

        let handle = tokio::spawn(async move {
            if let Ok(msg_id) = chat.post_message(&thread_key_owned, pick(ACK_POOL)).await {
                *run_task.progress_anchor_msg_id.lock() = Some(msg_id);
            }

            *run_task.state.lock() = TaskState::Working;

            let outcome = tokio::time::timeout(MAX_TASK_DURATION, handler.run(cancel.clone())).await;

            match outcome {
                Ok(Ok(result)) => {
                    let _ = chat.post_message(&thread_key_owned, &result).await;
                    *run_task.result.lock() = Some(result);
                    *run_task.state.lock() = TaskState::Completed;
                    tracing::info!(task_id = %run_task.task_id, workspace_id = %workspace_id_owned, elapsed_s = run_task.elapsed().as_secs_f64(), "background_task_completed");
                }
                Ok(Err(err)) => {
                    let _ = chat.post_message(&thread_key_owned, pick(ERROR_POOL)).await;
                    *run_task.error.lock() = Some(err.to_string());
                    *run_task.state.lock() = TaskState::Failed;
                    tracing::error!(task_id = %run_task.task_id, error = %err, "background_task_failed");
                }
                Err(_elapsed) => {
                    let _ = chat.post_message(&thread_key_owned, pick(SAFETY_NET_POOL)).await;
                    *run_task.error.lock() = Some(format!(
                        "task hit {}h safety limit",
                        MAX_TASK_DURATION.as_secs() / 3600
                    ));
                    *run_task.state.lock() = TaskState::Failed;
                    tracing::error!(task_id = %run_task.task_id, duration_limit_s = MAX_TASK_DURATION.as_secs(), "background_task_safety_net");
                }
            }
            *run_task.completed_at.lock() = Some(Instant::now());

            let mut counts = counts_ref.lock();
            let entry = counts.entry(workspace_id_owned).or_insert(0);
            *entry = entry.saturating_sub(1);
            drop(counts);

            Self::cleanup_old_tasks(&tasks_ref);
        });

        *task.join.lock() = Some(handle);
        Ok(task)
    }

    pub fn cancel_task(&self, task_id: &str) -> bool {
        let tasks = self.tasks.lock();
        let Some(task) = tasks.get(task_id) else {
            return false;
        };
        if !task.state().is_active() {
            return false;
        }
        task.cancel.cancel();
        *task.state.lock() = TaskState::Cancelled;
        *task.completed_at.lock() = Some(Instant::now());
        true
    }

    pub fn get_task(&self, task_id: &str) -> Option<Arc<BackgroundTask>> {
        self.tasks.lock().get(task_id).cloned()
    }

    pub fn get_active_for_thread(&self, thread_key: &str) -> Option<Arc<BackgroundTask>> {
        self.tasks
            .lock()
            .values()
            .find(|t| t.thread_key == thread_key && t.state().is_active())
            .cloned()
    }

    pub fn get_workspace_tasks(&self, workspace_id: &str, active_only: bool) -> Vec<Arc<BackgroundTask>> {
        self.tasks
            .lock()
            .values()
            .filter(|t| t.workspace_id == workspace_id)
            .filter(|t| !active_only || t.state().is_active())
            .cloned()
            .collect()
    }

    fn cleanup_old_tasks(tasks: &Arc<Mutex<HashMap<String, Arc<BackgroundTask>>>>) {
        let mut guard = tasks.lock();
        let mut completed: Vec<(String, Instant)> = guard
            .iter()
            .filter(|(_, t)| t.state().is_terminal())
            .map(|(id, t)| (id.clone(), t.completed_at.lock().unwrap_or(t.started_at)))
            .collect();
        if completed.len() <= MAX_RETAINED_COMPLETED_TASKS {
            return;
        }
        completed.sort_by_key(|(_, completed_at)| *completed_at);
        let overflow = completed.len() - MAX_RETAINED_COMPLETED_TASKS;
        for (id, _) in completed.into_iter().take(overflow) {
            guard.remove(&id);
        }
    }

    pub fn metrics(&self) -> TaskManagerMetrics {
        let tasks = self.tasks.lock();
        let mut by_state: HashMap<&'static str, usize> = HashMap::new();
        for task in tasks.values() {
            *by_state.entry(task.state().as_str()).or_insert(0) += 1;
        }
        TaskManagerMetrics {
            total_tasks: tasks.len(),
            by_state,
            workspace_counts: self.workspace_counts.lock().clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskManagerMetrics {
    pub total_tasks: usize,
    pub by_state: HashMap<&'static str, usize>,
    pub workspace_counts: HashMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler(String);

    #[async_trait]
    impl BackgroundHandler for EchoHandler {
        async fn run(&self, _cancel: CancelToken) -> Result<String, Error> {
            Ok(self.0.clone())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl BackgroundHandler for FailingHandler {
        async fn run(&self, _cancel: CancelToken) -> Result<String, Error> {
            Err(Error::Fatal("boom".into()))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl BackgroundHandler for SlowHandler {
        async fn run(&self, cancel: CancelToken) -> Result<String, Error> {
            loop {
                if cancel.is_cancelled() {
                    return Err(Error::Fatal("cancelled".into()));
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    }

    struct RecordingChatPoster {
        posted: Mutex<Vec<(String, String)>>,
    }

    impl RecordingChatPoster {
        fn new() -> Arc<Self> {
            Arc::new(Self { posted: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ChatPoster for RecordingChatPoster {
        async fn post_message(&self, thread_key: &str, text: &str) -> Result<String, Error> {
            self.posted.lock().push((thread_key.to_string(), text.to_string()));
            Ok(format!("msg_{}", uuid::Uuid::new_v4().simple()))
        }
    }

    fn chat() -> Arc<dyn ChatPoster> {
        RecordingChatPoster::new()
    }

    #[test]
    fn classifies_heavy_frontier_requests_as_background() {
        assert!(should_run_as_background_task(
            "research competitor pricing and then create a report",
            "frontier"
        ));
    }

    #[test]
    fn simple_requests_are_not_backgrounded() {
        assert!(!should_run_as_background_task("research competitor pricing", "frontier"));
    }

    #[test]
    fn non_frontier_tier_never_backgrounds() {
        assert!(!should_run_as_background_task(
            "comprehensive research report",
            "standard"
        ));
    }

    #[tokio::test]
    async fn start_task_completes_successfully() {
        let manager = TaskManager::new();
        let task = manager
            .start_task("ws1", "thread1", "say hi", Arc::new(EchoHandler("done".into())), chat())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.result.lock().as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn start_task_records_failure() {
        let manager = TaskManager::new();
        let task = manager
            .start_task("ws1", "thread1", "fail", Arc::new(FailingHandler), chat())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.error.lock().is_some());
    }

    #[tokio::test]
    async fn workspace_limit_is_enforced() {
        let manager = TaskManager::new();
        for _ in 0..MAX_BACKGROUND_TASKS_PER_WORKSPACE {
            manager
                .start_task("ws1", "t", "slow", Arc::new(SlowHandler), chat())
                .unwrap();
        }
        let result = manager.start_task("ws1", "t", "slow", Arc::new(SlowHandler), chat());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancel_task_transitions_to_cancelled() {
        let manager = TaskManager::new();
        let task = manager
            .start_task("ws1", "t", "slow", Arc::new(SlowHandler), chat())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.cancel_task(&task.task_id));
        assert_eq!(task.state(), TaskState::Cancelled);
    }

    #[tokio::test]
    async fn get_active_for_thread_finds_running_task() {
        let manager = TaskManager::new();
        manager
            .start_task("ws1", "thread-x", "slow", Arc::new(SlowHandler), chat())
            .unwrap();
        let found = manager.get_active_for_thread("thread-x");
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn metrics_reports_task_counts() {
        let manager = TaskManager::new();
        manager
            .start_task("ws1", "t", "echo", Arc::new(EchoHandler("x".into())), chat())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let metrics = manager.metrics();
        assert_eq!(metrics.total_tasks, 1);
        assert_eq!(metrics.by_state.get("completed"), Some(&1));
    }
}
