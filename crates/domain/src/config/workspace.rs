use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace — per-tenant opaque KV tree root
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory holding one subdirectory per tenant.
    #[serde(default = "d_ws_path")]
    pub root: PathBuf,
    /// Interval between sweeps of the dedupe/activity state, in seconds.
    #[serde(default = "d_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: d_ws_path(),
            sweep_interval_secs: d_sweep_secs(),
        }
    }
}

/// Deployment environment, used by the error pipeline to decide how much
/// detail may leak into user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EnvKind {
    #[default]
    Development,
    Staging,
    Production,
}

fn d_ws_path() -> PathBuf {
    PathBuf::from("./workspace")
}
fn d_sweep_secs() -> u64 {
    600
}
