//! Shared application state, assembled once in `main` and cloned (as
//! `Arc`s) into every request handler, the queue workers, the cron
//! scheduler, and the background task manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lucy_breaker::{BreakerConfig, CircuitBreakerRegistry};
use lucy_domain::Config;
use lucy_fastpath::FastPathEvaluator;
use lucy_limits::RateLimiter;
use lucy_metrics::MetricsCollector;
use lucy_orchestrator::{AgentOrchestrator, OrchestratorDeps};
use lucy_queue::RequestQueue;
use lucy_retrieval::CapabilityIndex;
use lucy_safety::{ActionClassifier, ApprovalStore};
use lucy_schedule::CronScheduler;
use lucy_tasks::TaskManager;
use lucy_workspace::{FileStore, MemoryStore, WorkspaceCronSource, WorkspaceStore};
use tokio::sync::Notify;

use crate::agent::{
    BackgroundOrchestratorRunner, CronOrchestratorRunner, QueueOrchestratorHandler, ResumeStore, WorkspaceChatPoster,
};
use crate::llm::HttpLlmClient;
use crate::tools::InternalToolExecutor;

fn breaker_registry(config: &Config) -> CircuitBreakerRegistry {
    let overrides = config
        .breakers
        .overrides
        .iter()
        .map(|(name, o)| {
            let default = BreakerConfig::default();
            let cfg = BreakerConfig {
                failure_threshold: o.failure_threshold.unwrap_or(default.failure_threshold),
                recovery_timeout: o
                    .recovery_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(default.recovery_timeout),
                half_open_max_calls: o.half_open_max_calls.unwrap_or(default.half_open_max_calls),
                minimum_calls: o.minimum_calls.unwrap_or(default.minimum_calls),
            };
            (name.clone(), cfg)
        })
        .collect();
    CircuitBreakerRegistry::new(BreakerConfig::default(), overrides)
}

fn rate_limiter(config: &Config) -> RateLimiter {
    let to_limits = |src: &HashMap<String, lucy_domain::config::BucketLimit>| -> HashMap<String, lucy_limits::BucketLimit> {
        src.iter()
            .map(|(k, v)| (k.clone(), lucy_limits::BucketLimit { rate_per_sec: v.rate_per_sec, capacity: v.capacity }))
            .collect()
    };
    RateLimiter::new(to_limits(&config.rate_limits.model_limits), to_limits(&config.rate_limits.api_limits))
}

/// Dedupe store for inbound chat events: `(event_id -> first_seen)`,
/// swept periodically rather than only on insert.
pub struct DedupeStore {
    seen: parking_lot::Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl DedupeStore {
    pub fn new(ttl: Duration) -> Self {
        Self { seen: parking_lot::Mutex::new(HashMap::new()), ttl }
    }

    /// Returns `true` if `event_id` was already seen within the TTL window.
    pub fn check_and_insert(&self, event_id: &str) -> bool {
        let now = Instant::now();
        let mut guard = self.seen.lock();
        if let Some(seen_at) = guard.get(event_id) {
            if now.duration_since(*seen_at) < self.ttl {
                return true;
            }
        }
        guard.insert(event_id.to_string(), now);
        if guard.len() > 10_000 {
            guard.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);
        }
        false
    }

    /// Drop every entry older than the TTL; driven by a periodic sweeper
    /// rather than relying solely on the lazy cleanup above.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut guard = self.seen.lock();
        guard.retain(|_, seen_at| now.duration_since(*seen_at) < self.ttl);
    }
}

/// Picks between the disk-backed and in-memory `WorkspaceStore` by
/// `env`, without making every caller generic over the store type.
pub enum Store {
    File(Arc<FileStore>),
    Memory(Arc<MemoryStore>),
}

#[async_trait::async_trait]
impl WorkspaceStore for Store {
    async fn get(&self, tenant_id: &str, key: &str) -> lucy_domain::Result<Option<String>> {
        match self {
            Store::File(s) => s.get(tenant_id, key).await,
            Store::Memory(s) => s.get(tenant_id, key).await,
        }
    }
    async fn put(&self, tenant_id: &str, key: &str, value: &str) -> lucy_domain::Result<()> {
        match self {
            Store::File(s) => s.put(tenant_id, key, value).await,
            Store::Memory(s) => s.put(tenant_id, key, value).await,
        }
    }
    async fn append(&self, tenant_id: &str, key: &str, line: &str) -> lucy_domain::Result<()> {
        match self {
            Store::File(s) => s.append(tenant_id, key, line).await,
            Store::Memory(s) => s.append(tenant_id, key, line).await,
        }
    }
    async fn delete(&self, tenant_id: &str, key: &str) -> lucy_domain::Result<()> {
        match self {
            Store::File(s) => s.delete(tenant_id, key).await,
            Store::Memory(s) => s.delete(tenant_id, key).await,
        }
    }
    async fn list(&self, tenant_id: &str, prefix: &str) -> lucy_domain::Result<Vec<String>> {
        match self {
            Store::File(s) => s.list(tenant_id, prefix).await,
            Store::Memory(s) => s.list(tenant_id, prefix).await,
        }
    }
    async fn list_tenants(&self) -> lucy_domain::Result<Vec<String>> {
        match self {
            Store::File(s) => s.list_tenants().await,
            Store::Memory(s) => s.list_tenants().await,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub workspace: Arc<Store>,
    pub index: Arc<CapabilityIndex>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsCollector>,
    pub fast_path: Arc<FastPathEvaluator>,
    pub classifier: Arc<ActionClassifier>,
    pub approvals: Arc<ApprovalStore>,
    pub queue: Arc<RequestQueue>,
    pub tasks: Arc<TaskManager>,
    pub cron: Arc<CronScheduler>,
    pub orchestrator: Arc<AgentOrchestrator>,
    pub dedupe: Arc<DedupeStore>,
    pub resumes: Arc<ResumeStore>,
    /// The highest-tier model configured, used as the escalation target
    /// when the supervisor asks to swap to a stronger model.
    pub frontier_model: String,
    pub started_at: Instant,
    pub shutdown: Arc<Notify>,
}

impl AppState {
    pub fn new(config: Config) -> lucy_domain::Result<Self> {
        let config = Arc::new(config);

        let workspace = Arc::new(match config.env {
            lucy_domain::config::EnvKind::Development => Store::Memory(Arc::new(MemoryStore::new())),
            _ => Store::File(Arc::new(FileStore::new(config.workspace.root.clone()))),
        });

        let index = Arc::new(CapabilityIndex::new());
        let breakers = Arc::new(breaker_registry(&config));
        let rl = Arc::new(rate_limiter(&config));
        let metrics = Arc::new(MetricsCollector::new());
        let fast_path = Arc::new(FastPathEvaluator::new());
        let classifier = Arc::new(ActionClassifier::new());
        let approvals = Arc::new(ApprovalStore::new(Duration::from_secs(300)));

        let llm = Arc::new(HttpLlmClient::new(&config)?);
        let cron_handle: crate::tools::CronHandle = Arc::new(tokio::sync::OnceCell::new());
        let tools = Arc::new(InternalToolExecutor::new(workspace.clone(), index.clone(), cron_handle.clone()));

        let orchestrator = Arc::new(AgentOrchestrator::new(OrchestratorDeps {
            llm: llm.clone(),
            tools,
            classifier: classifier.clone(),
            approvals: approvals.clone(),
            rate_limiter: rl.clone(),
            breakers: breakers.clone(),
            index: index.clone(),
            metrics: metrics.clone(),
            supervisor_client: llm,
        }));

        let resumes = Arc::new(ResumeStore::new());

        let frontier_model = config
            .model
            .roles
            .get("frontier")
            .or_else(|| config.model.roles.get("default"))
            .map(|r| r.model.clone())
            .unwrap_or_default();

        let queue = Arc::new(RequestQueue::new(
            config.chat.num_workers,
            config.chat.max_queue_depth_per_tenant,
            config.chat.max_total_queue_depth,
        ));
        queue.start(Arc::new(QueueOrchestratorHandler::new(
            orchestrator.clone(),
            workspace.clone(),
            resumes.clone(),
            frontier_model.clone(),
        )));

        let tasks = Arc::new(TaskManager::new());

        let cron_source = Arc::new(WorkspaceCronSource::new(workspace.clone()));
        let cron_runner = Arc::new(CronOrchestratorRunner::new(orchestrator.clone(), frontier_model.clone(), resumes.clone()));
        let cron = Arc::new(CronScheduler::new(cron_source, cron_runner, None));
        cron.start();
        let _ = cron_handle.set(cron.clone());

        let dedupe_ttl = Duration::from_secs(config.chat.dedupe_window_secs.max(1));

        Ok(Self {
            config,
            workspace,
            index,
            breakers,
            rate_limiter: rl,
            metrics,
            fast_path,
            classifier,
            approvals,
            queue,
            tasks,
            cron,
            orchestrator,
            dedupe: Arc::new(DedupeStore::new(dedupe_ttl)),
            resumes,
            frontier_model,
            started_at: Instant::now(),
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Cooperative shutdown: stop the queue workers, stop the cron
    /// scheduler, cancel every still-running background task. Tasks are
    /// asked to stop, not killed, matching their cooperative cancel
    /// token.
    pub async fn shutdown(&self) {
        self.queue.stop();
        self.cron.stop();
        for tenant in self.workspace.list_tenants().await.unwrap_or_default() {
            for task in self.tasks.get_workspace_tasks(&tenant, true) {
                self.tasks.cancel_task(&task.task_id);
            }
        }
    }
}

/// Spawns a heavy request as a background task rather than running it
/// inline, returning the handle the caller can poll or cancel.
pub fn spawn_background_turn(
    state: &AppState,
    workspace_id: &str,
    thread_key: &str,
    message: &str,
    model: &str,
    intent: &str,
) -> lucy_domain::Result<Arc<lucy_tasks::BackgroundTask>> {
    let handler = Arc::new(BackgroundOrchestratorRunner::new(
        state.orchestrator.clone(),
        workspace_id.to_string(),
        message.to_string(),
        model.to_string(),
        intent.to_string(),
        state.frontier_model.clone(),
    ));
    let chat = Arc::new(WorkspaceChatPoster::new(state.workspace.clone(), workspace_id.to_string()));
    state.tasks.start_task(workspace_id, thread_key, message, handler, chat)
}
