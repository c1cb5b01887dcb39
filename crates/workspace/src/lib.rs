//! Per-tenant persistent state.
//!
//! The rest of the crate graph treats this as an opaque key-value
//! tree — nobody but this crate knows or cares whether a key lives on
//! disk, in a database, or in memory. The core only ever touches a
//! handful of keys (`skills/<name>/SKILL.md`, `crons/<slug>/task.json`,
//! `crons/<slug>/LEARNINGS.md`, `crons/<slug>/execution.log`,
//! `activity.log`, `sync/last_ts`), all of which are plain text or
//! small JSON documents, which is why the store is a thin string map
//! rather than a typed schema.
//!
//! Two implementations: [`MemoryStore`] for tests and `InMemoryStore`
//! deployments, and [`FileStore`] for the real `workspace_root`-backed
//! deployment, which guards every read/write with the same path-safety
//! checks the skills registry uses for its own tree.

mod file_store;
mod memory_store;

pub use file_store::FileStore;
pub use memory_store::MemoryStore;

use async_trait::async_trait;
use lucy_domain::Result;

/// Opaque per-tenant key-value tree.
///
/// Keys are `/`-separated paths (`crons/daily-digest/task.json`).
/// Values are UTF-8 text; callers that need structure (task.json)
/// serialize/deserialize it themselves.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn get(&self, tenant_id: &str, key: &str) -> Result<Option<String>>;
    async fn put(&self, tenant_id: &str, key: &str, value: &str) -> Result<()>;
    async fn append(&self, tenant_id: &str, key: &str, line: &str) -> Result<()>;
    async fn delete(&self, tenant_id: &str, key: &str) -> Result<()>;
    /// List keys directly under `prefix` (e.g. `crons/` -> `daily-digest`,
    /// `weekly-report`, one entry per immediate child).
    async fn list(&self, tenant_id: &str, prefix: &str) -> Result<Vec<String>>;
    async fn list_tenants(&self) -> Result<Vec<String>>;
}

pub const SKILLS_PREFIX: &str = "skills";
pub const CRONS_PREFIX: &str = "crons";
pub const ACTIVITY_LOG_KEY: &str = "activity.log";
pub const SYNC_LAST_TS_KEY: &str = "sync/last_ts";

pub fn skill_doc_key(name: &str) -> String {
    format!("{SKILLS_PREFIX}/{name}/SKILL.md")
}

pub fn cron_task_key(slug: &str) -> String {
    format!("{CRONS_PREFIX}/{slug}/task.json")
}

pub fn cron_learnings_key(slug: &str) -> String {
    format!("{CRONS_PREFIX}/{slug}/LEARNINGS.md")
}

pub fn cron_execution_log_key(slug: &str) -> String {
    format!("{CRONS_PREFIX}/{slug}/execution.log")
}

/// Adapts any [`WorkspaceStore`] to the cron scheduler's view of job
/// storage, so `lucy-schedule` never has to know what a workspace is.
pub struct WorkspaceCronSource<S: WorkspaceStore> {
    store: std::sync::Arc<S>,
}

impl<S: WorkspaceStore> WorkspaceCronSource<S> {
    pub fn new(store: std::sync::Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: WorkspaceStore> lucy_schedule::CronJobSource for WorkspaceCronSource<S> {
    async fn list_tenants(&self) -> Result<Vec<String>> {
        self.store.list_tenants().await
    }

    async fn list_jobs(&self, tenant_id: &str) -> Result<Vec<lucy_schedule::CronJob>> {
        let slugs = self.store.list(tenant_id, CRONS_PREFIX).await?;
        let mut jobs = Vec::with_capacity(slugs.len());
        for slug in slugs {
            let key = cron_task_key(&slug);
            let Some(raw) = self.store.get(tenant_id, &key).await? else {
                continue;
            };
            match parse_task_json(&raw, tenant_id, &slug) {
                Ok(job) => jobs.push(job),
                Err(err) => {
                    tracing::warn!(tenant_id, slug = %slug, error = %err, "skipping malformed cron task.json");
                }
            }
        }
        Ok(jobs)
    }

    async fn read_learnings(&self, tenant_id: &str, job_path: &str) -> Result<Option<String>> {
        self.store.get(tenant_id, &cron_learnings_key(job_path)).await
    }

    async fn append_execution_log(&self, tenant_id: &str, job_path: &str, entry: &str) -> Result<()> {
        self.store.append(tenant_id, &cron_execution_log_key(job_path), entry).await
    }
}

#[derive(serde::Deserialize)]
struct TaskJson {
    path: String,
    cron: String,
    title: String,
    description: String,
    #[serde(default)]
    timezone: Option<String>,
}

fn parse_task_json(raw: &str, tenant_id: &str, slug: &str) -> Result<lucy_schedule::CronJob> {
    let parsed: TaskJson = serde_json::from_str(raw)?;
    if parsed.path != slug {
        tracing::debug!(slug, stored_path = %parsed.path, "cron task.json path differs from its directory slug");
    }
    Ok(lucy_schedule::CronJob {
        path: parsed.path,
        cron_expression: parsed.cron,
        title: parsed.title,
        description: parsed.description,
        tenant_id: tenant_id.to_string(),
        timezone: parsed.timezone.unwrap_or_else(|| "UTC".to_string()),
        delivery_target: None,
        missed_policy: Default::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lucy_schedule::CronJobSource;

    #[tokio::test]
    async fn cron_source_lists_jobs_from_task_json() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store
            .put(
                "tenant-a",
                &cron_task_key("daily-digest"),
                r#"{"path":"daily-digest","cron":"0 9 * * *","title":"Daily digest","description":"send it"}"#,
            )
            .await
            .unwrap();
        store.put("tenant-a", &cron_learnings_key("daily-digest"), "learned: keep it short").await.unwrap();

        let source = WorkspaceCronSource::new(store);
        let tenants = source.list_tenants().await.unwrap();
        assert_eq!(tenants, vec!["tenant-a".to_string()]);

        let jobs = source.list_jobs("tenant-a").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].cron_expression, "0 9 * * *");

        let learnings = source.read_learnings("tenant-a", "daily-digest").await.unwrap();
        assert_eq!(learnings.as_deref(), Some("learned: keep it short"));
    }

    #[tokio::test]
    async fn cron_source_skips_malformed_task_json() {
        let store = std::sync::Arc::new(MemoryStore::new());
        store.put("tenant-a", &cron_task_key("broken"), "not json").await.unwrap();
        let source = WorkspaceCronSource::new(store);
        let jobs = source.list_jobs("tenant-a").await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn append_execution_log_accumulates_lines() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let source = WorkspaceCronSource::new(store.clone());
        source.append_execution_log("tenant-a", "daily-digest", "run 1 ok").await.unwrap();
        source.append_execution_log("tenant-a", "daily-digest", "run 2 ok").await.unwrap();
        let log = store.get("tenant-a", &cron_execution_log_key("daily-digest")).await.unwrap().unwrap();
        assert_eq!(log.lines().count(), 2);
    }
}
