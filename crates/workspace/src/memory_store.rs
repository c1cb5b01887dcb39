use std::collections::HashMap;

use async_trait::async_trait;
use lucy_domain::Result;
use parking_lot::RwLock;

use crate::WorkspaceStore;

/// In-memory `WorkspaceStore`, keyed by `(tenant_id, key)`. Used in
/// tests and for the `development` config profile where nothing needs
/// to survive a restart.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<(String, String), String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceStore for MemoryStore {
    async fn get(&self, tenant_id: &str, key: &str) -> Result<Option<String>> {
        Ok(self.data.read().get(&(tenant_id.to_string(), key.to_string())).cloned())
    }

    async fn put(&self, tenant_id: &str, key: &str, value: &str) -> Result<()> {
        self.data.write().insert((tenant_id.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    async fn append(&self, tenant_id: &str, key: &str, line: &str) -> Result<()> {
        let mut guard = self.data.write();
        let entry = guard.entry((tenant_id.to_string(), key.to_string())).or_default();
        if !entry.is_empty() && !entry.ends_with('\n') {
            entry.push('\n');
        }
        entry.push_str(line);
        entry.push('\n');
        Ok(())
    }

    async fn delete(&self, tenant_id: &str, key: &str) -> Result<()> {
        self.data.write().remove(&(tenant_id.to_string(), key.to_string()));
        Ok(())
    }

    async fn list(&self, tenant_id: &str, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = format!("{}/", prefix.trim_end_matches('/'));
        let guard = self.data.read();
        let mut children: Vec<String> = guard
            .keys()
            .filter(|(t, _)| t == tenant_id)
            .filter_map(|(_, k)| k.strip_prefix(&full_prefix))
            .filter_map(|rest| rest.split('/').next())
            .map(|s| s.to_string())
            .collect();
        children.sort();
        children.dedup();
        Ok(children)
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        let guard = self.data.read();
        let mut tenants: Vec<String> = guard.keys().map(|(t, _)| t.clone()).collect();
        tenants.sort();
        tenants.dedup();
        Ok(tenants)
    }
}
