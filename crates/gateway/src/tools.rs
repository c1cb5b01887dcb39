//! Internal tool executor.
//!
//! Grounded on the internal-tool name sets the confirmation gate
//! classifies against (`lucy_list_crons`, `lucy_read_file`, ...) —
//! this is the thing that actually runs them. Deliberately narrow:
//! Lucy's own cron/workspace bookkeeping tools and a capability search
//! over the retrieval index, nothing that reaches out to a third-party
//! app integration (send_email, generate_pdf, ...). Those internal
//! tools are still classified correctly by `lucy_safety`'s tables —
//! calling one here just returns `unknown_tool` rather than dispatching
//! to an external action runner this workspace doesn't carry.

use std::sync::Arc;

use async_trait::async_trait;
use lucy_domain::{Error, Result};
use lucy_orchestrator::ToolExecutor;
use lucy_retrieval::CapabilityIndex;
use lucy_schedule::CronScheduler;
use lucy_workspace::{cron_execution_log_key, cron_learnings_key, cron_task_key, WorkspaceStore, CRONS_PREFIX};
use serde_json::Value;
use tokio::sync::OnceCell;

/// `CronScheduler` isn't available yet when `InternalToolExecutor` is built
/// (it wraps an orchestrator that wraps this executor), so it's handed over
/// through a cell the caller fills in once construction finishes.
pub type CronHandle = Arc<OnceCell<Arc<CronScheduler>>>;

pub struct InternalToolExecutor<S: WorkspaceStore> {
    workspace: Arc<S>,
    index: Arc<CapabilityIndex>,
    cron: CronHandle,
}

impl<S: WorkspaceStore> InternalToolExecutor<S> {
    pub fn new(workspace: Arc<S>, index: Arc<CapabilityIndex>, cron: CronHandle) -> Self {
        Self { workspace, index, cron }
    }

    async fn list_crons(&self, tenant_id: &str) -> Result<Value> {
        let slugs = self.workspace.list(tenant_id, CRONS_PREFIX).await?;
        let mut jobs = Vec::with_capacity(slugs.len());
        for slug in slugs {
            if let Some(raw) = self.workspace.get(tenant_id, &cron_task_key(&slug)).await? {
                if let Ok(parsed) = serde_json::from_str::<Value>(&raw) {
                    jobs.push(parsed);
                }
            }
        }
        Ok(Value::Array(jobs))
    }

    async fn create_cron(&self, tenant_id: &str, arguments: &Value) -> Result<Value> {
        let slug = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidParams("missing 'path'".into()))?;
        for field in ["cron", "title", "description"] {
            if arguments.get(field).and_then(|v| v.as_str()).is_none() {
                return Err(Error::InvalidParams(format!("missing '{field}'")));
            }
        }
        self.workspace.put(tenant_id, &cron_task_key(slug), &arguments.to_string()).await?;
        Ok(serde_json::json!({ "created": slug }))
    }

    async fn delete_cron(&self, tenant_id: &str, arguments: &Value) -> Result<Value> {
        let slug = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidParams("missing 'path'".into()))?;
        self.workspace.delete(tenant_id, &cron_task_key(slug)).await?;
        self.workspace.delete(tenant_id, &cron_learnings_key(slug)).await?;
        self.workspace.delete(tenant_id, &cron_execution_log_key(slug)).await?;
        Ok(serde_json::json!({ "deleted": slug }))
    }

    /// A job run takes a full agent turn, which can run far longer than
    /// this tool call's own dispatch timeout, so it's fired in the
    /// background: the job's own execution log and activity log entry
    /// (written by `CronOrchestratorRunner`, same as a scheduled fire)
    /// are the source of truth for the outcome, not this call's return.
    async fn run_cron_now(&self, tenant_id: &str, arguments: &Value) -> Result<Value> {
        let slug = arguments
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidParams("missing 'path'".into()))?;
        let Some(cron) = self.cron.get() else {
            return Err(Error::Fatal("cron scheduler not yet initialized".into()));
        };
        if !cron.has_job(tenant_id, slug).await? {
            return Ok(serde_json::json!({ "started": false, "path": slug, "reason": "no such job" }));
        }
        let cron = cron.clone();
        let tenant_id = tenant_id.to_string();
        let slug = slug.to_string();
        tokio::spawn(async move {
            if let Err(err) = cron.trigger_now(&tenant_id, &slug).await {
                tracing::error!(tenant_id, cron_path = %slug, error = %err, "cron_manual_trigger_failed");
            }
        });
        Ok(serde_json::json!({ "started": true, "path": slug }))
    }

    async fn search_tools(&self, tenant_id: &str, arguments: &Value) -> Result<Value> {
        let query = arguments.get("query").and_then(|v| v.as_str()).unwrap_or_default();
        let connected_apps: Vec<String> = arguments
            .get("connected_apps")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let index = self.index.get(tenant_id);
        let results = index.retrieve(query, 10, &connected_apps, true);
        Ok(serde_json::to_value(
            results
                .into_iter()
                .map(|r| serde_json::json!({ "name": r.name, "app": r.app, "description": r.description, "score": r.score }))
                .collect::<Vec<_>>(),
        )?)
    }
}

#[async_trait]
impl<S: WorkspaceStore> ToolExecutor for InternalToolExecutor<S> {
    async fn execute(&self, tenant_id: &str, tool_name: &str, arguments: &Value) -> Result<Value> {
        match tool_name {
            "lucy_list_crons" => self.list_crons(tenant_id).await,
            "lucy_create_cron" | "lucy_modify_cron" => self.create_cron(tenant_id, arguments).await,
            "lucy_delete_cron" => self.delete_cron(tenant_id, arguments).await,
            "lucy_run_cron_now" => self.run_cron_now(tenant_id, arguments).await,
            "lucy_read_file" => {
                let key = arguments.get("path").and_then(|v| v.as_str()).ok_or_else(|| Error::InvalidParams("missing 'path'".into()))?;
                let content = self.workspace.get(tenant_id, key).await?;
                Ok(serde_json::json!({ "content": content }))
            }
            "lucy_write_file" => {
                let key = arguments.get("path").and_then(|v| v.as_str()).ok_or_else(|| Error::InvalidParams("missing 'path'".into()))?;
                let content = arguments.get("content").and_then(|v| v.as_str()).unwrap_or_default();
                self.workspace.put(tenant_id, key, content).await?;
                Ok(serde_json::json!({ "written": key }))
            }
            "lucy_list_files" => {
                let prefix = arguments.get("path").and_then(|v| v.as_str()).unwrap_or("");
                let entries = self.workspace.list(tenant_id, prefix).await?;
                Ok(serde_json::json!({ "entries": entries }))
            }
            "META_SEARCH_TOOLS" => self.search_tools(tenant_id, arguments).await,
            _ => Err(Error::UnknownTool(tool_name.to_string())),
        }
    }
}
