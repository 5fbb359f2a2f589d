use crate::index::SessionId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorItem {
    pub identifier: SessionId,
    pub title: String,
    pub content: String,
    pub keywords: Vec<String>,
    /// RFC3339 creation date of the session, when known.
    pub date: Option<String>,
}

#[async_trait]
pub trait SystemSearchMirror: Send + Sync {
    async fn upsert(&self, id: &str, item: MirrorItem) -> Result<()>;
    async fn delete(&self, ids: &[SessionId]) -> Result<()>;
}

/// Mirror that drops everything. Default when no OS facility is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMirror;

#[async_trait]
impl SystemSearchMirror for NoopMirror {
    async fn upsert(&self, _id: &str, _item: MirrorItem) -> Result<()> { Ok(()) }
    async fn delete(&self, _ids: &[SessionId]) -> Result<()> { Ok(()) }
}

/// One JSON document per session in a directory that a desktop search
/// crawler (or anything else) can pick up.
pub struct DirectoryMirror {
    root: PathBuf,
}

impl DirectoryMirror {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn item_path(&self, id: &str) -> PathBuf {
        let safe: String = id.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
        self.root.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl SystemSearchMirror for DirectoryMirror {
    async fn upsert(&self, id: &str, item: MirrorItem) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.item_path(id);
        let json = serde_json::to_vec_pretty(&item)?;
        tokio::fs::write(&path, json).await.with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    async fn delete(&self, ids: &[SessionId]) -> Result<()> {
        for id in ids {
            let path = self.item_path(id);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("remove {}", path.display())),
            }
        }
        Ok(())
    }
}
