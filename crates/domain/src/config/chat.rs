use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chat intake / dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Window during which a repeated event id is treated as a duplicate.
    #[serde(default = "d_dedupe_window_secs")]
    pub dedupe_window_secs: u64,
    /// Worker pool size for the priority request queue.
    #[serde(default = "d_num_workers")]
    pub num_workers: usize,
    /// Max queued requests per tenant.
    #[serde(default = "d_per_tenant_depth")]
    pub max_queue_depth_per_tenant: usize,
    /// Max queued requests across all tenants.
    #[serde(default = "d_total_depth")]
    pub max_total_queue_depth: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            dedupe_window_secs: d_dedupe_window_secs(),
            num_workers: d_num_workers(),
            max_queue_depth_per_tenant: d_per_tenant_depth(),
            max_total_queue_depth: d_total_depth(),
        }
    }
}

fn d_dedupe_window_secs() -> u64 {
    30
}
fn d_num_workers() -> usize {
    10
}
fn d_per_tenant_depth() -> usize {
    50
}
fn d_total_depth() -> usize {
    200
}
