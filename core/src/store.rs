use crate::index::{SegmentId, SegmentInfo, SessionId};
use anyhow::{anyhow, bail, Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: SegmentId,
    /// Seconds from session start.
    pub timestamp: f64,
    pub text: String,
    #[serde(default)]
    pub speaker_id: Option<String>,
}

impl From<&TranscriptSegment> for SegmentInfo {
    fn from(seg: &TranscriptSegment) -> Self {
        SegmentInfo { segment_id: seg.id.clone(), timestamp: seg.timestamp, text: seg.text.clone(), speaker_id: seg.speaker_id.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub id: SessionId,
    #[serde(default)]
    pub title: Option<String>,
    /// RFC3339
    #[serde(default)]
    pub created_at: Option<String>,
}

pub trait SessionStore: Send + Sync {
    fn get_session(&self, id: &str) -> Option<SessionMetadata>;
    fn fetch_all_sessions(&self) -> Result<Vec<SessionMetadata>>;
    fn session_count(&self) -> Result<usize>;
    fn load_transcript(&self, id: &str) -> Result<Vec<TranscriptSegment>>;

    /// Sessions the store holds but cannot read; left out of `fetch_all_sessions` and `session_count`.
    fn unreadable_sessions(&self) -> Vec<SessionId> { Vec::new() }
}

/// In-process store, handy for embedding and tests.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, (SessionMetadata, Vec<TranscriptSegment>)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self { Self::default() }

    pub fn upsert(&self, meta: SessionMetadata, segments: Vec<TranscriptSegment>) {
        self.sessions.write().insert(meta.id.clone(), (meta, segments));
    }

    pub fn remove(&self, id: &str) -> bool { self.sessions.write().remove(id).is_some() }
}

impl SessionStore for MemorySessionStore {
    fn get_session(&self, id: &str) -> Option<SessionMetadata> {
        self.sessions.read().get(id).map(|(m, _)| m.clone())
    }

    fn fetch_all_sessions(&self) -> Result<Vec<SessionMetadata>> {
        let mut all: Vec<SessionMetadata> = self.sessions.read().values().map(|(m, _)| m.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    fn session_count(&self) -> Result<usize> { Ok(self.sessions.read().len()) }

    fn load_transcript(&self, id: &str) -> Result<Vec<TranscriptSegment>> {
        self.sessions
            .read()
            .get(id)
            .map(|(_, segs)| segs.clone())
            .ok_or_else(|| anyhow!("unknown session {id}"))
    }
}

/// On-disk session document: `<dir>/<session-id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFile {
    pub id: SessionId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub segments: Vec<TranscriptSegment>,
}

impl SessionFile {
    fn metadata(&self) -> SessionMetadata {
        SessionMetadata { id: self.id.clone(), title: self.title.clone(), created_at: self.created_at.clone() }
    }
}

/// Directory of JSON session documents, read fresh on every call.
pub struct JsonSessionStore {
    root: PathBuf,
}

impl JsonSessionStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    pub fn root(&self) -> &Path { &self.root }

    fn session_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            bail!("invalid session id {id:?}");
        }
        Ok(self.root.join(format!("{id}.json")))
    }

    fn read_file(path: &Path) -> Result<SessionFile> {
        let f = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let doc = serde_json::from_reader(BufReader::new(f)).with_context(|| format!("parse {}", path.display()))?;
        Ok(doc)
    }

    fn session_files(&self) -> Vec<PathBuf> {
        WalkDir::new(&self.root)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .filter(|p| p.is_file() && p.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect()
    }

    /// Parsed session metadata, plus the ids of files that failed to parse.
    fn scan(&self) -> (Vec<SessionMetadata>, Vec<SessionId>) {
        let mut readable = Vec::new();
        let mut unreadable = Vec::new();
        for path in self.session_files() {
            match Self::read_file(&path) {
                Ok(doc) => readable.push(doc.metadata()),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %format!("{err:#}"), "unreadable session file");
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        unreadable.push(stem.to_string());
                    }
                }
            }
        }
        readable.sort_by(|a, b| a.id.cmp(&b.id));
        unreadable.sort();
        (readable, unreadable)
    }

    /// Write (or replace) a session document.
    pub fn write_session(&self, doc: &SessionFile) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        let path = self.session_path(&doc.id)?;
        let json = serde_json::to_vec_pretty(doc)?;
        fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}

impl SessionStore for JsonSessionStore {
    fn get_session(&self, id: &str) -> Option<SessionMetadata> {
        let path = self.session_path(id).ok()?;
        if !path.is_file() {
            return None;
        }
        match Self::read_file(&path) {
            Ok(doc) => Some(doc.metadata()),
            Err(err) => {
                tracing::warn!(session_id = id, error = %err, "unreadable session file");
                None
            }
        }
    }

    fn fetch_all_sessions(&self) -> Result<Vec<SessionMetadata>> { Ok(self.scan().0) }

    fn session_count(&self) -> Result<usize> { Ok(self.scan().0.len()) }

    fn load_transcript(&self, id: &str) -> Result<Vec<TranscriptSegment>> {
        let path = self.session_path(id)?;
        Ok(Self::read_file(&path)?.segments)
    }

    fn unreadable_sessions(&self) -> Vec<SessionId> { self.scan().1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str) -> SessionFile {
        SessionFile {
            id: id.into(),
            title: Some(format!("Session {id}")),
            created_at: Some("2024-01-01T00:00:00Z".into()),
            segments: vec![TranscriptSegment { id: format!("{id}-0"), timestamp: 0.0, text: text.into(), speaker_id: None }],
        }
    }

    #[test]
    fn json_store_reads_what_it_wrote() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path());
        store.write_session(&doc("a", "budget talk")).unwrap();
        store.write_session(&doc("b", "roadmap")).unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.session_count().unwrap(), 2);
        assert_eq!(store.get_session("a").unwrap().title.as_deref(), Some("Session a"));
        assert!(store.get_session("zzz").is_none());
        assert_eq!(store.load_transcript("b").unwrap()[0].text, "roadmap");
        let ids: Vec<_> = store.fetch_all_sessions().unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn json_store_counts_only_readable_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path());
        store.write_session(&doc("a", "budget talk")).unwrap();
        fs::write(dir.path().join("b.json"), b"{\"id\": \"b\", \"segments\": [").unwrap();

        assert_eq!(store.session_count().unwrap(), 1);
        assert_eq!(store.fetch_all_sessions().unwrap().len(), 1);
        assert_eq!(store.unreadable_sessions(), vec!["b".to_string()]);
        assert!(store.get_session("b").is_none());
    }

    #[test]
    fn json_store_rejects_path_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonSessionStore::new(dir.path());
        assert!(store.load_transcript("../etc/passwd").is_err());
        assert!(store.get_session("a/b").is_none());
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySessionStore::new();
        store.upsert(SessionMetadata { id: "a".into(), title: None, created_at: None }, vec![]);
        assert_eq!(store.session_count().unwrap(), 1);
        assert!(store.remove("a"));
        assert!(store.load_transcript("a").is_err());
    }
}
