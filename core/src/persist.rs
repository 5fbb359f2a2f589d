use crate::index::{InvertedIndex, SegmentInfo, SessionId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{create_dir_all, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE: &str = "search_index.json";

/// Everything the engine persists. Written whole on every save.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub inverted_index: InvertedIndex,
    pub session_content: HashMap<SessionId, String>,
    pub session_segments: HashMap<SessionId, Vec<SegmentInfo>>,
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn snapshot(&self) -> PathBuf { self.root.join(SNAPSHOT_FILE) }
    fn snapshot_tmp(&self) -> PathBuf { self.root.join(format!("{SNAPSHOT_FILE}.tmp")) }
}

pub fn encode_snapshot(snapshot: &IndexSnapshot) -> Result<Vec<u8>> {
    serde_json::to_vec(snapshot).context("serialize index snapshot")
}

/// Serialize and replace the snapshot file atomically.
pub fn save_snapshot(paths: &IndexPaths, snapshot: &IndexSnapshot) -> Result<()> {
    let bytes = encode_snapshot(snapshot)?;
    write_snapshot(paths, &bytes)
}

/// Replace the snapshot file with already-encoded bytes (temp + fsync + rename).
pub fn write_snapshot(paths: &IndexPaths, bytes: &[u8]) -> Result<()> {
    create_dir_all(&paths.root).with_context(|| format!("create {}", paths.root.display()))?;
    let tmp = paths.snapshot_tmp();
    {
        let mut f = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp, paths.snapshot()).context("rename snapshot into place")?;
    Ok(())
}

pub fn load_snapshot(paths: &IndexPaths) -> Result<IndexSnapshot> {
    let path = paths.snapshot();
    let f = File::open(&path).with_context(|| format!("open {}", path.display()))?;
    let snapshot = serde_json::from_reader(BufReader::new(f)).with_context(|| format!("parse {}", path.display()))?;
    Ok(snapshot)
}

/// Load the snapshot, or an empty one when it is absent or unreadable.
pub fn load_or_empty(paths: &IndexPaths) -> IndexSnapshot {
    if !paths.snapshot().exists() {
        tracing::info!(path = %paths.snapshot().display(), "no index snapshot, starting empty");
        return IndexSnapshot::default();
    }
    match load_snapshot(paths) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "index snapshot unreadable, starting empty");
            IndexSnapshot::default()
        }
    }
}
