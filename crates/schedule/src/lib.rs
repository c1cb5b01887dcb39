//! CronScheduler — the proactivity engine.
//!
//! Discovers per-tenant cron jobs from an injected [`CronJobSource`] and
//! fires them on a 30-second tick. Each job triggers a fresh agent run
//! (via the injected [`CronRunner`]) with the job description plus any
//! accumulated learnings as the instruction. A second, lighter tick
//! drives per-tenant channel-history sync, which needs no agent call.

pub mod cron;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lucy_domain::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

pub use cron::{cron_matches, cron_next, cron_next_n, cron_next_n_tz, cron_next_tz, parse_tz};

const TICK_INTERVAL: Duration = Duration::from_secs(30);
const SYNC_INTERVAL: Duration = Duration::from_secs(600);
const MISFIRE_GRACE: Duration = Duration::from_secs(300);
const MAX_COOLDOWN_MINUTES: u64 = 24 * 60;
const LOG_TAIL_CHARS: usize = 500;

/// What happens when the runner discovers a missed window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissedPolicy {
    /// Drop the missed run silently.
    Skip,
    /// Fire exactly once, no matter how many windows were missed.
    RunOnce,
    /// Fire once for every missed window. Coalesced like the others under
    /// the single-in-flight-instance guarantee, so in practice this only
    /// differs from `RunOnce` once true catch-up batching is added.
    CatchUp,
}

impl Default for MissedPolicy {
    fn default() -> Self {
        Self::RunOnce
    }
}

/// Compute cooldown duration in minutes: 2^(failures - 1), capped at 24h.
pub fn cooldown_minutes(consecutive_failures: u32) -> u64 {
    if consecutive_failures == 0 {
        return 0;
    }
    let exp = (consecutive_failures - 1).min(20);
    let minutes = 1u64.checked_shl(exp).unwrap_or(MAX_COOLDOWN_MINUTES);
    minutes.min(MAX_COOLDOWN_MINUTES)
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryTarget {
    InApp,
    Webhook { url: String },
}

/// A single scheduled job, as read from a tenant's workspace.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CronJob {
    /// Slug-like path identifying the job within its tenant, e.g. `daily-digest`.
    pub path: String,
    /// 5-field cron expression.
    pub cron_expression: String,
    pub title: String,
    pub description: String,
    pub tenant_id: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub delivery_target: Option<DeliveryTarget>,
    #[serde(default)]
    pub missed_policy: MissedPolicy,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl CronJob {
    pub fn job_id(&self) -> String {
        format!("{}:{}", self.tenant_id, self.path)
    }
}

/// Source of truth for which jobs exist and their accumulated execution
/// history. Backed by a workspace's `crons/<path>/task.json` tree.
#[async_trait]
pub trait CronJobSource: Send + Sync {
    async fn list_tenants(&self) -> Result<Vec<String>>;
    async fn list_jobs(&self, tenant_id: &str) -> Result<Vec<CronJob>>;
    async fn read_learnings(&self, tenant_id: &str, job_path: &str) -> Result<Option<String>>;
    async fn append_execution_log(&self, tenant_id: &str, job_path: &str, entry: &str) -> Result<()>;
}

/// Runs a cron job's instruction through the agent loop.
#[async_trait]
pub trait CronRunner: Send + Sync {
    async fn run_job(&self, tenant_id: &str, job: &CronJob, instruction: String) -> Result<String>;
}

/// Lightweight per-tenant channel-history sync; no agent call needed.
/// Implementations own their own since-cursor persistence.
#[async_trait]
pub trait ChannelSync: Send + Sync {
    async fn sync_channel_history(&self, tenant_id: &str) -> Result<usize>;
}

#[derive(Default)]
struct JobRuntimeState {
    next_run_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    cooldown_until: Option<DateTime<Utc>>,
    running: bool,
}

struct Shared {
    job_source: Arc<dyn CronJobSource>,
    runner: Arc<dyn CronRunner>,
    channel_sync: Option<Arc<dyn ChannelSync>>,
    states: Mutex<HashMap<String, JobRuntimeState>>,
}

/// Discovers and fires workspace crons.
pub struct CronScheduler {
    shared: Arc<Shared>,
    tick_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    sync_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CronScheduler {
    pub fn new(
        job_source: Arc<dyn CronJobSource>,
        runner: Arc<dyn CronRunner>,
        channel_sync: Option<Arc<dyn ChannelSync>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                job_source,
                runner,
                channel_sync,
                states: Mutex::new(HashMap::new()),
            }),
            tick_handle: Mutex::new(None),
            sync_handle: Mutex::new(None),
        }
    }

    /// Start the tick loops. Idempotent: calling twice while already
    /// running is a no-op.
    pub fn start(&self) {
        if self.tick_handle.lock().is_some() {
            return;
        }
        let shared = self.shared.clone();
        self.tick_handle.lock().replace(tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                Self::tick(&shared).await;
            }
        }));

        if self.shared.channel_sync.is_some() {
            let shared = self.shared.clone();
            self.sync_handle.lock().replace(tokio::spawn(async move {
                let mut interval = tokio::time::interval(SYNC_INTERVAL);
                loop {
                    interval.tick().await;
                    Self::sync_tick(&shared).await;
                }
            }));
        }

        tracing::info!("cron_scheduler_started");
    }

    pub fn stop(&self) {
        if let Some(handle) = self.tick_handle.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.sync_handle.lock().take() {
            handle.abort();
        }
        tracing::info!("cron_scheduler_stopped");
    }

    /// Whether a job by this path is currently registered for the
    /// tenant, without running it — lets a caller give immediate
    /// feedback before handing a (possibly long) run off elsewhere.
    pub async fn has_job(&self, tenant_id: &str, job_path: &str) -> Result<bool> {
        let jobs = self.shared.job_source.list_jobs(tenant_id).await?;
        Ok(jobs.iter().any(|j| j.path == job_path))
    }

    /// Manually trigger a single job immediately (for testing or an
    /// explicit "run now" request).
    pub async fn trigger_now(&self, tenant_id: &str, job_path: &str) -> Result<bool> {
        let jobs = self.shared.job_source.list_jobs(tenant_id).await?;
        let Some(job) = jobs.into_iter().find(|j| j.path == job_path) else {
            return Ok(false);
        };
        Self::run_job(&self.shared, &job).await;
        Ok(true)
    }

    async fn tick(shared: &Arc<Shared>) {
        let tenants = match shared.job_source.list_tenants().await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "cron_tick_list_tenants_failed");
                return;
            }
        };

        for tenant_id in tenants {
            let jobs = match shared.job_source.list_jobs(&tenant_id).await {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(tenant_id, error = %e, "cron_tick_list_jobs_failed");
                    continue;
                }
            };
            for job in jobs {
                Self::evaluate_job(shared, job).await;
            }
        }
    }

    async fn evaluate_job(shared: &Arc<Shared>, job: CronJob) {
        let job_id = job.job_id();
        let now = Utc::now();

        let decision = {
            let mut states = shared.states.lock();
            let state = states.entry(job_id.clone()).or_default();

            if state.running {
                return;
            }
            if let Some(cooldown_until) = state.cooldown_until {
                if now < cooldown_until {
                    return;
                }
            }

            let tz = parse_tz(&job.timezone);
            let next_run_at = match state.next_run_at {
                Some(t) => t,
                None => {
                    let computed = cron_next_tz(&job.cron_expression, &now, tz).unwrap_or(now);
                    state.next_run_at = Some(computed);
                    computed
                }
            };

            if now < next_run_at {
                None
            } else {
                let overdue = now.signed_duration_since(next_run_at);
                let missed = overdue > chrono::Duration::from_std(MISFIRE_GRACE).unwrap();

                let should_run = match (missed, job.missed_policy) {
                    (false, _) => true,
                    (true, MissedPolicy::Skip) => false,
                    (true, MissedPolicy::RunOnce) => true,
                    (true, MissedPolicy::CatchUp) => true,
                };

                // Coalesce: whether we run once or catch up, we schedule
                // only a single next occurrence per tick (max_concurrency=1).
                state.next_run_at = cron_next_tz(&job.cron_expression, &now, tz);
                if should_run {
                    state.running = true;
                }
                should_run.then_some(())
            }
        };

        if decision.is_some() {
            Self::run_job(shared, &job).await;
            shared.states.lock().entry(job_id).or_default().running = false;
        }
    }

    async fn run_job(shared: &Arc<Shared>, job: &CronJob) {
        let tenant_id = job.tenant_id.clone();
        tracing::info!(tenant_id = %tenant_id, cron_path = %job.path, title = %job.title, "cron_execution_start");
        let start = std::time::Instant::now();

        let learnings = shared
            .job_source
            .read_learnings(&tenant_id, &job.path)
            .await
            .unwrap_or(None);

        let mut instruction = job.description.clone();
        if let Some(learnings) = learnings.filter(|l| !l.is_empty()) {
            instruction.push_str(&format!("\n\n## Accumulated Learnings\n{learnings}"));
        }

        match shared.runner.run_job(&tenant_id, job, instruction).await {
            Ok(response) => {
                let elapsed_ms = start.elapsed().as_millis();
                let tail: String = response.chars().take(LOG_TAIL_CHARS).collect();
                let entry = format!(
                    "\n## {} (elapsed: {elapsed_ms}ms)\n{tail}\n",
                    Utc::now().to_rfc3339()
                );
                let _ = shared
                    .job_source
                    .append_execution_log(&tenant_id, &job.path, &entry)
                    .await;

                let mut states = shared.states.lock();
                let state = states.entry(job.job_id()).or_default();
                state.consecutive_failures = 0;
                state.cooldown_until = None;

                tracing::info!(
                    tenant_id = %tenant_id,
                    cron_path = %job.path,
                    elapsed_ms,
                    response_length = response.len(),
                    "cron_execution_complete"
                );
            }
            Err(e) => {
                let elapsed_ms = start.elapsed().as_millis();
                let message: String = e.to_string().chars().take(300).collect();
                let entry = format!(
                    "\n## {} — FAILED ({elapsed_ms}ms)\n{message}\n",
                    Utc::now().to_rfc3339()
                );
                let _ = shared
                    .job_source
                    .append_execution_log(&tenant_id, &job.path, &entry)
                    .await;

                let mut states = shared.states.lock();
                let state = states.entry(job.job_id()).or_default();
                state.consecutive_failures += 1;
                let cooldown = cooldown_minutes(state.consecutive_failures);
                state.cooldown_until = Some(Utc::now() + chrono::Duration::minutes(cooldown as i64));

                tracing::error!(
                    tenant_id = %tenant_id,
                    cron_path = %job.path,
                    error = %e,
                    elapsed_ms,
                    "cron_execution_failed"
                );
            }
        }
    }

    async fn sync_tick(shared: &Arc<Shared>) {
        let Some(sync) = &shared.channel_sync else {
            return;
        };
        let tenants = match shared.job_source.list_tenants().await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "channel_sync_list_tenants_failed");
                return;
            }
        };
        for tenant_id in tenants {
            match sync.sync_channel_history(&tenant_id).await {
                Ok(count) => {
                    tracing::info!(tenant_id = %tenant_id, messages_synced = count, "channel_sync_complete");
                }
                Err(e) => {
                    tracing::error!(tenant_id = %tenant_id, error = %e, "channel_sync_failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex as AsyncMutex;

    fn make_job(tenant: &str, path: &str, cron_expr: &str) -> CronJob {
        CronJob {
            path: path.to_string(),
            cron_expression: cron_expr.to_string(),
            title: "Test job".to_string(),
            description: "Do the thing".to_string(),
            tenant_id: tenant.to_string(),
            timezone: "UTC".to_string(),
            delivery_target: None,
            missed_policy: MissedPolicy::default(),
        }
    }

    struct FixedSource {
        jobs: Vec<CronJob>,
        logs: AsyncMutex<Vec<String>>,
    }

    #[async_trait]
    impl CronJobSource for FixedSource {
        async fn list_tenants(&self) -> Result<Vec<String>> {
            Ok(vec!["acme".to_string()])
        }
        async fn list_jobs(&self, tenant_id: &str) -> Result<Vec<CronJob>> {
            Ok(self.jobs.iter().filter(|j| j.tenant_id == tenant_id).cloned().collect())
        }
        async fn read_learnings(&self, _tenant_id: &str, _job_path: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn append_execution_log(&self, _tenant_id: &str, _job_path: &str, entry: &str) -> Result<()> {
            self.logs.lock().await.push(entry.to_string());
            Ok(())
        }
    }

    struct CountingRunner {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl CronRunner for CountingRunner {
        async fn run_job(&self, _tenant_id: &str, _job: &CronJob, _instruction: String) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(lucy_domain::Error::Fatal("boom".into()))
            } else {
                Ok("done".into())
            }
        }
    }

    struct CountingSync {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ChannelSync for CountingSync {
        async fn sync_channel_history(&self, _tenant_id: &str) -> Result<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(3)
        }
    }

    #[test]
    fn cooldown_minutes_exponential() {
        assert_eq!(cooldown_minutes(0), 0);
        assert_eq!(cooldown_minutes(1), 1);
        assert_eq!(cooldown_minutes(3), 4);
        assert_eq!(cooldown_minutes(21), 24 * 60);
    }

    #[tokio::test]
    async fn trigger_now_runs_matching_job_and_logs_success() {
        let job = make_job("acme", "daily-digest", "0 9 * * *");
        let source = Arc::new(FixedSource { jobs: vec![job], logs: AsyncMutex::new(Vec::new()) });
        let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail: false });
        let scheduler = CronScheduler::new(source.clone(), runner.clone(), None);

        let fired = scheduler.trigger_now("acme", "daily-digest").await.unwrap();
        assert!(fired);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.logs.lock().await.len(), 1);
        assert!(source.logs.lock().await[0].contains("elapsed"));
    }

    #[tokio::test]
    async fn trigger_now_returns_false_for_unknown_path() {
        let source = Arc::new(FixedSource { jobs: vec![], logs: AsyncMutex::new(Vec::new()) });
        let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail: false });
        let scheduler = CronScheduler::new(source, runner, None);
        assert!(!scheduler.trigger_now("acme", "nope").await.unwrap());
    }

    #[tokio::test]
    async fn has_job_reports_existence_without_running_it() {
        let job = make_job("acme", "daily-digest", "0 9 * * *");
        let source = Arc::new(FixedSource { jobs: vec![job], logs: AsyncMutex::new(Vec::new()) });
        let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail: false });
        let scheduler = CronScheduler::new(source, runner.clone(), None);

        assert!(scheduler.has_job("acme", "daily-digest").await.unwrap());
        assert!(!scheduler.has_job("acme", "nope").await.unwrap());
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_run_is_logged_and_increments_cooldown_state() {
        let job = make_job("acme", "flaky", "0 9 * * *");
        let source = Arc::new(FixedSource { jobs: vec![job.clone()], logs: AsyncMutex::new(Vec::new()) });
        let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail: true });
        let shared = Arc::new(Shared {
            job_source: source.clone(),
            runner: runner.clone(),
            channel_sync: None,
            states: Mutex::new(HashMap::new()),
        });

        CronScheduler::run_job(&shared, &job).await;

        let states = shared.states.lock();
        let state = states.get(&job.job_id()).unwrap();
        assert_eq!(state.consecutive_failures, 1);
        assert!(state.cooldown_until.is_some());
        drop(states);
        assert!(source.logs.lock().await[0].contains("FAILED"));
    }

    #[tokio::test]
    async fn evaluate_job_skips_when_not_yet_due() {
        let job = make_job("acme", "far-future", "0 0 1 1 *"); // once a year
        let source = Arc::new(FixedSource { jobs: vec![job.clone()], logs: AsyncMutex::new(Vec::new()) });
        let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail: false });
        let shared = Arc::new(Shared {
            job_source: source,
            runner: runner.clone(),
            channel_sync: None,
            states: Mutex::new(HashMap::new()),
        });

        CronScheduler::evaluate_job(&shared, job).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn evaluate_job_does_not_reenter_while_running() {
        let job = make_job("acme", "overlap", "0 9 * * *");
        let job_id = job.job_id();
        let source = Arc::new(FixedSource { jobs: vec![job.clone()], logs: AsyncMutex::new(Vec::new()) });
        let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail: false });
        let shared = Arc::new(Shared {
            job_source: source,
            runner: runner.clone(),
            channel_sync: None,
            states: Mutex::new(HashMap::new()),
        });
        shared.states.lock().insert(
            job_id,
            JobRuntimeState {
                next_run_at: Some(Utc::now() - chrono::Duration::minutes(1)),
                running: true,
                ..Default::default()
            },
        );

        CronScheduler::evaluate_job(&shared, job).await;
        assert_eq!(runner.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sync_tick_invokes_channel_sync_for_every_tenant() {
        let source = Arc::new(FixedSource { jobs: vec![], logs: AsyncMutex::new(Vec::new()) });
        let runner = Arc::new(CountingRunner { calls: AtomicU32::new(0), fail: false });
        let sync = Arc::new(CountingSync { calls: AtomicU32::new(0) });
        let shared = Arc::new(Shared {
            job_source: source,
            runner,
            channel_sync: Some(sync.clone()),
            states: Mutex::new(HashMap::new()),
        });

        CronScheduler::sync_tick(&shared).await;
        assert_eq!(sync.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn job_id_combines_tenant_and_path() {
        let job = make_job("acme", "daily-digest", "0 9 * * *");
        assert_eq!(job.job_id(), "acme:daily-digest");
    }
}
