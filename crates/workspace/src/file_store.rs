use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lucy_domain::{Error, Result};
use tokio::io::AsyncWriteExt;

use crate::WorkspaceStore;

/// `WorkspaceStore` backed by `workspace_root/<tenant_id>/<key>` files
/// on disk, one tree per tenant. Keys map directly onto relative paths,
/// so `crons/daily-digest/task.json` becomes
/// `<root>/<tenant_id>/crons/daily-digest/task.json`.
///
/// Every path is checked the same way the skills registry checks
/// resource reads: reject `..` components and absolute keys up front,
/// then canonicalize and verify the result is still inside the
/// tenant's directory, so a crafted key can't escape onto another
/// tenant's tree or the host filesystem.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn tenant_root(&self, tenant_id: &str) -> PathBuf {
        self.root.join(tenant_id)
    }

    fn resolve(&self, tenant_id: &str, key: &str) -> Result<PathBuf> {
        if key.contains("..") || key.starts_with('/') {
            return Err(Error::Auth(format!("path traversal blocked in workspace key: {key}")));
        }
        Ok(self.tenant_root(tenant_id).join(key))
    }

    /// Verify `path` (which may not exist yet) would land inside
    /// `tenant_id`'s tree once its existing ancestor is canonicalized.
    fn verify_contained(&self, tenant_id: &str, path: &Path) -> Result<()> {
        let tenant_root = self.tenant_root(tenant_id);
        let mut ancestor = path;
        while !ancestor.exists() {
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => break,
            }
        }
        let canonical_ancestor = match ancestor.canonicalize() {
            Ok(p) => p,
            Err(_) => return Ok(()),
        };
        let canonical_root = tenant_root
            .canonicalize()
            .unwrap_or_else(|_| tenant_root.clone());
        if !canonical_ancestor.starts_with(&canonical_root) {
            return Err(Error::Auth("path traversal blocked (symlink escape)".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl WorkspaceStore for FileStore {
    async fn get(&self, tenant_id: &str, key: &str) -> Result<Option<String>> {
        let path = self.resolve(tenant_id, key)?;
        self.verify_contained(tenant_id, &path)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }

    async fn put(&self, tenant_id: &str, key: &str, value: &str) -> Result<()> {
        let path = self.resolve(tenant_id, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.verify_contained(tenant_id, &path)?;
        tokio::fs::write(&path, value).await?;
        Ok(())
    }

    async fn append(&self, tenant_id: &str, key: &str, line: &str) -> Result<()> {
        let path = self.resolve(tenant_id, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        self.verify_contained(tenant_id, &path)?;
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
        file.write_all(line.as_bytes()).await?;
        if !line.ends_with('\n') {
            file.write_all(b"\n").await?;
        }
        Ok(())
    }

    async fn delete(&self, tenant_id: &str, key: &str) -> Result<()> {
        let path = self.resolve(tenant_id, key)?;
        self.verify_contained(tenant_id, &path)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn list(&self, tenant_id: &str, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(tenant_id, prefix)?;
        self.verify_contained(tenant_id, &dir)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::Io(err)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn list_tenants(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Error::Io(err)),
        };
        let mut tenants = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    tenants.push(name.to_string());
                }
            }
        }
        tenants.sort();
        Ok(tenants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put("tenant-a", "activity.log", "hello").await.unwrap();
        assert_eq!(store.get("tenant-a", "activity.log").await.unwrap().as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.get("tenant-a", "missing.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put("tenant-a", "crons/daily-digest/task.json", "{}").await.unwrap();
        assert!(dir.path().join("tenant-a/crons/daily-digest/task.json").is_file());
    }

    #[tokio::test]
    async fn append_adds_newline_terminated_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.append("tenant-a", "activity.log", "one").await.unwrap();
        store.append("tenant-a", "activity.log", "two").await.unwrap();
        let content = store.get("tenant-a", "activity.log").await.unwrap().unwrap();
        assert_eq!(content, "one\ntwo\n");
    }

    #[tokio::test]
    async fn rejects_parent_traversal_in_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let err = store.get("tenant-a", "../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn rejects_absolute_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let err = store.put("tenant-a", "/etc/passwd", "oops").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn list_returns_sorted_immediate_children() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put("tenant-a", "crons/weekly/task.json", "{}").await.unwrap();
        store.put("tenant-a", "crons/daily/task.json", "{}").await.unwrap();
        let children = store.list("tenant-a", "crons").await.unwrap();
        assert_eq!(children, vec!["daily".to_string(), "weekly".to_string()]);
    }

    #[tokio::test]
    async fn list_tenants_reflects_directories_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put("tenant-a", "k", "v").await.unwrap();
        store.put("tenant-b", "k", "v").await.unwrap();
        let tenants = store.list_tenants().await.unwrap();
        assert_eq!(tenants, vec!["tenant-a".to_string(), "tenant-b".to_string()]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put("tenant-a", "x.txt", "y").await.unwrap();
        store.delete("tenant-a", "x.txt").await.unwrap();
        store.delete("tenant-a", "x.txt").await.unwrap();
        assert!(store.get("tenant-a", "x.txt").await.unwrap().is_none());
    }
}
