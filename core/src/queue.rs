use crate::index::SessionId;
use crate::store::TranscriptSegment;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOperation {
    Index,
    Update,
    Remove,
}

impl fmt::Display for IndexOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexOperation::Index => "index",
            IndexOperation::Update => "update",
            IndexOperation::Remove => "remove",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateQueueEntry {
    pub session_id: SessionId,
    pub operation: IndexOperation,
}

/// A dequeued entry together with the segments captured for it.
#[derive(Debug, Clone)]
pub struct QueuedUpdate {
    pub entry: UpdateQueueEntry,
    pub segments: Vec<TranscriptSegment>,
}

/// FIFO of pending re-index requests. A session is queued at most once;
/// re-enqueuing it only replaces the segments that will be indexed.
#[derive(Debug, Default)]
pub struct UpdateQueue {
    entries: VecDeque<UpdateQueueEntry>,
    segments: HashMap<SessionId, Vec<TranscriptSegment>>,
}

impl UpdateQueue {
    pub fn new() -> Self { Self::default() }

    /// Returns false when the session was already queued and only its content was replaced.
    pub fn push(&mut self, session_id: SessionId, segments: Vec<TranscriptSegment>) -> bool {
        let fresh = self.segments.insert(session_id.clone(), segments).is_none();
        if fresh {
            self.entries.push_back(UpdateQueueEntry { session_id, operation: IndexOperation::Update });
        }
        fresh
    }

    /// Take up to `max` entries from the front.
    pub fn next_batch(&mut self, max: usize) -> Vec<QueuedUpdate> {
        let n = max.max(1).min(self.entries.len());
        self.entries
            .drain(..n)
            .map(|entry| {
                let segments = self.segments.remove(&entry.session_id).unwrap_or_default();
                QueuedUpdate { entry, segments }
            })
            .collect()
    }

    /// Forget any pending update for the session.
    pub fn discard(&mut self, session_id: &str) -> bool {
        let had = self.segments.remove(session_id).is_some();
        if had {
            self.entries.retain(|e| e.session_id != session_id);
        }
        had
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}
