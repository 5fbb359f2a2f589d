use crate::config::EngineConfig;
use crate::index::{IndexedMatch, SegmentInfo, SessionId};
use crate::mirror::{MirrorItem, SystemSearchMirror};
use crate::persist::{encode_snapshot, load_or_empty, write_snapshot, IndexPaths, IndexSnapshot};
use crate::queue::{IndexOperation, UpdateQueue};
use crate::retry::{run_with_backoff, FailedIndexUpdate, FailureLedger};
use crate::scoring::{best_match, extract_snippet, score, token_match_ratio};
use crate::store::{SessionMetadata, SessionStore, TranscriptSegment};
use crate::tokenizer::{sorted_tokens, tokenize};
use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// One ranked hit, either per session (`search`) or per segment (`get_matches_in_session`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMatch {
    pub id: SessionId,
    pub title: Option<String>,
    pub timestamp: f64,
    pub snippet: String,
    pub relevance_score: f64,
    pub segment_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub token_count: usize,
    pub session_count: usize,
    pub segment_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub indexed: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum Outcome {
    Done,
    Skipped,
    Failed,
}

struct Inner {
    config: EngineConfig,
    paths: IndexPaths,
    store: Arc<dyn SessionStore>,
    mirror: Arc<dyn SystemSearchMirror>,
    state: RwLock<IndexSnapshot>,
    writer: tokio::sync::Mutex<()>,
    queue: Mutex<UpdateQueue>,
    timer: Mutex<Option<JoinHandle<()>>>,
    ledger: Mutex<FailureLedger>,
}

#[derive(Clone)]
pub struct TranscriptSearchEngine {
    inner: Arc<Inner>,
}

impl TranscriptSearchEngine {
    /// Build an engine and load whatever snapshot exists under `config.data_dir`.
    /// A missing or corrupt snapshot yields an empty index; repopulating it with
    /// `rebuild_all` is up to the caller.
    pub fn open(config: EngineConfig, store: Arc<dyn SessionStore>, mirror: Arc<dyn SystemSearchMirror>) -> Self {
        let paths = IndexPaths::new(&config.data_dir);
        let snapshot = load_or_empty(&paths);
        tracing::info!(
            path = %paths.snapshot().display(),
            sessions = snapshot.session_content.len(),
            tokens = snapshot.inverted_index.token_count(),
            "transcript index loaded"
        );
        let ledger = FailureLedger::with_capacity(config.ledger_capacity);
        Self {
            inner: Arc::new(Inner {
                config,
                paths,
                store,
                mirror,
                state: RwLock::new(snapshot),
                writer: tokio::sync::Mutex::new(()),
                queue: Mutex::new(UpdateQueue::new()),
                timer: Mutex::new(None),
                ledger: Mutex::new(ledger),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig { &self.inner.config }

    // --- mutations ---

    /// Index a session right away, retrying on failure. Returns true when the
    /// session ended up indexed.
    pub async fn index_transcript(&self, session_id: &str, segments: Vec<TranscriptSegment>) -> bool {
        let _writer = self.inner.writer.lock().await;
        matches!(self.reindex_locked(session_id, IndexOperation::Index, segments).await, Outcome::Done)
    }

    /// Queue a re-index and restart the debounce timer.
    pub async fn update_transcript(&self, session_id: &str, segments: Vec<TranscriptSegment>) {
        let fresh = self.inner.queue.lock().push(session_id.to_string(), segments);
        tracing::debug!(session_id, coalesced = !fresh, "transcript update queued");
        self.schedule_drain();
    }

    /// Drop a session from the index and the mirror. Removing an unknown session is a no-op.
    pub async fn remove_transcript(&self, session_id: &str) -> bool {
        let _writer = self.inner.writer.lock().await;
        if self.inner.queue.lock().discard(session_id) {
            tracing::debug!(session_id, "dropped queued update for removed session");
        }
        self.remove_locked(session_id).await
    }

    /// Cancel the pending debounce and process the whole queue now.
    pub async fn flush_updates(&self) -> BatchReport {
        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }
        self.drain_queue().await
    }

    /// Clear everything and reindex every session the store knows about.
    pub async fn rebuild_all(&self) -> Result<RebuildReport> {
        let _writer = self.inner.writer.lock().await;
        let sessions = self.inner.store.fetch_all_sessions().context("list sessions")?;
        tracing::info!(sessions = sessions.len(), "rebuilding transcript index");
        *self.inner.state.write() = IndexSnapshot::default();

        let mut report = RebuildReport::default();
        for session_id in self.inner.store.unreadable_sessions() {
            tracing::warn!(%session_id, "session unreadable, left out of rebuild");
            report.errors += 1;
        }
        for meta in &sessions {
            match self.inner.store.load_transcript(&meta.id) {
                Ok(segments) => {
                    let item = self.apply_index(meta, &segments);
                    self.sync_mirror(item);
                    report.indexed += 1;
                }
                Err(err) => {
                    tracing::warn!(session_id = %meta.id, error = %format!("{err:#}"), "failed to load transcript during rebuild");
                    report.errors += 1;
                }
            }
        }
        self.persist().await?;
        tracing::info!(indexed = report.indexed, errors = report.errors, "rebuild complete");
        Ok(report)
    }

    /// Replay every ledger entry, oldest first. Entries that fail again are re-recorded.
    pub async fn retry_failed_updates(&self) -> usize {
        let _writer = self.inner.writer.lock().await;
        let failures = self.inner.ledger.lock().take_all();
        let replayed = failures.len();
        tracing::info!(replayed, "retrying failed index updates");
        for failure in failures {
            match failure.operation {
                IndexOperation::Remove => {
                    self.remove_locked(&failure.session_id).await;
                }
                op => {
                    self.reindex_locked(&failure.session_id, op, failure.segments).await;
                }
            }
        }
        replayed
    }

    /// Persist the current index. Failures are logged and reported as false.
    pub async fn save(&self) -> bool {
        let _writer = self.inner.writer.lock().await;
        match self.persist().await {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = %format!("{err:#}"), "failed to save transcript index");
                false
            }
        }
    }

    // --- queries ---

    /// Ranked sessions for `query`, at most `max_results`.
    pub fn search(&self, query: &str) -> Vec<SessionMatch> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Vec::new();
        }
        let radius = self.inner.config.snippet_radius;
        let state = self.inner.state.read();
        let hits = state.inverted_index.query(&tokens);

        let mut results: Vec<SessionMatch> = hits
            .into_iter()
            .filter_map(|(session_id, matches)| {
                // A session carries one record per token, so the hit count is the matched-token count.
                let ratio = token_match_ratio(matches.len().min(tokens.len()), tokens.len());
                let first = matches.into_iter().next()?;
                let segments = state.session_segments.get(&session_id).map(Vec::as_slice).unwrap_or(&[]);
                let m = match best_match(segments, query) {
                    Some((seg, best)) => SessionMatch {
                        id: session_id,
                        title: first.title,
                        timestamp: seg.timestamp,
                        snippet: extract_snippet(&seg.text, query, radius),
                        relevance_score: ratio * best,
                        segment_id: Some(seg.segment_id.clone()),
                    },
                    None => {
                        let content = state.session_content.get(&session_id).map(String::as_str).unwrap_or("");
                        SessionMatch {
                            relevance_score: ratio * score(content, query),
                            snippet: extract_snippet(content, query, radius),
                            id: session_id,
                            title: first.title,
                            timestamp: first.timestamp,
                            segment_id: first.segment_id,
                        }
                    }
                };
                Some(m)
            })
            .collect();
        drop(state);

        results.sort_by(rank_order);
        results.truncate(self.inner.config.max_results);
        results
    }

    /// Every segment of one session that matches `query`, in transcript order.
    pub fn get_matches_in_session(&self, session_id: &str, query: &str) -> Vec<SessionMatch> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Vec::new();
        }
        let radius = self.inner.config.snippet_radius;
        let state = self.inner.state.read();
        let Some(segments) = state.session_segments.get(session_id) else {
            return Vec::new();
        };
        let title = title_of(&state, session_id, &tokens);
        segments
            .iter()
            .filter_map(|seg| {
                let s = score(&seg.text, query);
                (s > 0.0).then(|| SessionMatch {
                    id: session_id.to_string(),
                    title: title.clone(),
                    timestamp: seg.timestamp,
                    snippet: extract_snippet(&seg.text, query, radius),
                    relevance_score: s,
                    segment_id: Some(seg.segment_id.clone()),
                })
            })
            .collect()
    }

    /// True when the number of indexed sessions equals the store's count.
    pub fn verify_index_integrity(&self) -> bool {
        let indexed = self.inner.state.read().session_content.len();
        match self.inner.store.session_count() {
            Ok(expected) => {
                let ok = indexed == expected;
                if ok {
                    tracing::debug!(indexed, "index integrity verified");
                } else {
                    tracing::warn!(indexed, expected, "index out of sync with session store");
                }
                ok
            }
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), "could not count sessions for integrity check");
                false
            }
        }
    }

    pub fn get_index_stats(&self) -> IndexStats {
        let state = self.inner.state.read();
        IndexStats {
            token_count: state.inverted_index.token_count(),
            session_count: state.session_content.len(),
            segment_count: state.session_segments.values().map(Vec::len).sum(),
        }
    }

    pub fn failed_updates(&self) -> Vec<FailedIndexUpdate> { self.inner.ledger.lock().entries() }

    pub fn pending_updates(&self) -> usize { self.inner.queue.lock().len() }

    // --- internals ---

    fn schedule_drain(&self) {
        let engine = self.clone();
        let delay = self.inner.config.debounce;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Processing runs on its own task so a later reschedule cannot abort a batch mid-flight.
            tokio::spawn(async move {
                engine.drain_queue().await;
            });
        });
        if let Some(previous) = self.inner.timer.lock().replace(timer) {
            previous.abort();
        }
    }

    async fn drain_queue(&self) -> BatchReport {
        let _writer = self.inner.writer.lock().await;
        let mut report = BatchReport::default();
        loop {
            let batch = self.inner.queue.lock().next_batch(self.inner.config.batch_size);
            if batch.is_empty() {
                break;
            }
            tracing::debug!(size = batch.len(), "processing update batch");
            for queued in batch {
                match self.reindex_locked(&queued.entry.session_id, queued.entry.operation, queued.segments).await {
                    Outcome::Done => report.processed += 1,
                    Outcome::Skipped => report.skipped += 1,
                    Outcome::Failed => report.failed += 1,
                }
            }
        }
        if report != BatchReport::default() {
            tracing::info!(processed = report.processed, skipped = report.skipped, failed = report.failed, "update queue drained");
        }
        report
    }

    /// Caller must hold the writer lock.
    async fn reindex_locked(&self, session_id: &str, operation: IndexOperation, segments: Vec<TranscriptSegment>) -> Outcome {
        let Some(meta) = self.inner.store.get_session(session_id) else {
            tracing::debug!(session_id, %operation, "session no longer exists, skipping");
            return Outcome::Skipped;
        };

        let (meta_ref, segments_ref) = (&meta, &segments);
        let result = run_with_backoff(&self.inner.config.retry, session_id, |_| async move {
            self.apply_index(meta_ref, segments_ref);
            self.persist().await
        })
        .await;

        // The in-memory index is authoritative even if persisting failed.
        self.sync_mirror(mirror_item(&meta, &segments));

        match result {
            Ok(()) => {
                tracing::debug!(session_id, %operation, segments = segments.len(), "session indexed");
                Outcome::Done
            }
            Err(err) => {
                tracing::error!(session_id, %operation, error = %format!("{err:#}"), "indexing failed after retries");
                self.inner.ledger.lock().record(FailedIndexUpdate::now(session_id.to_string(), operation, segments));
                Outcome::Failed
            }
        }
    }

    /// Caller must hold the writer lock.
    async fn remove_locked(&self, session_id: &str) -> bool {
        let result = run_with_backoff(&self.inner.config.retry, session_id, |_| async move {
            self.apply_remove(session_id);
            self.persist().await
        })
        .await;

        let mirror = self.inner.mirror.clone();
        let ids = vec![session_id.to_string()];
        tokio::spawn(async move {
            if let Err(err) = mirror.delete(&ids).await {
                tracing::warn!(error = %format!("{err:#}"), "mirror delete failed");
            }
        });

        match result {
            Ok(()) => {
                tracing::debug!(session_id, "session removed");
                true
            }
            Err(err) => {
                tracing::error!(session_id, error = %format!("{err:#}"), "removal failed after retries");
                self.inner.ledger.lock().record(FailedIndexUpdate::now(session_id.to_string(), IndexOperation::Remove, Vec::new()));
                false
            }
        }
    }

    /// Replace the session's index entries and caches. Returns the mirror payload.
    fn apply_index(&self, meta: &SessionMetadata, segments: &[TranscriptSegment]) -> MirrorItem {
        let content = join_text(segments);
        let tokens = tokenize(&content);
        let first = segments.first();
        let template = IndexedMatch::new(
            meta.id.clone(),
            meta.title.clone(),
            first.map(|s| s.id.clone()),
            first.map(|s| s.timestamp).unwrap_or(0.0),
        );

        let mut state = self.inner.state.write();
        state.inverted_index.remove(&meta.id);
        state.inverted_index.insert(&tokens, &template);
        state.session_segments.insert(meta.id.clone(), segments.iter().map(SegmentInfo::from).collect());
        state.session_content.insert(meta.id.clone(), content);
        drop(state);

        mirror_item(meta, segments)
    }

    fn apply_remove(&self, session_id: &str) {
        let mut state = self.inner.state.write();
        let removed = state.inverted_index.remove(session_id);
        state.session_content.remove(session_id);
        state.session_segments.remove(session_id);
        tracing::trace!(session_id, removed, "index entries removed");
    }

    /// Caller must hold the writer lock; the snapshot goes through one fixed temp file.
    async fn persist(&self) -> Result<()> {
        let bytes = {
            let state = self.inner.state.read();
            encode_snapshot(&state)?
        };
        let paths = self.inner.paths.clone();
        tokio::task::spawn_blocking(move || write_snapshot(&paths, &bytes))
            .await
            .context("snapshot writer task")??;
        Ok(())
    }

    fn sync_mirror(&self, item: MirrorItem) {
        let mirror = self.inner.mirror.clone();
        tokio::spawn(async move {
            let id = item.identifier.clone();
            if let Err(err) = mirror.upsert(&id, item).await {
                tracing::warn!(session_id = %id, error = %format!("{err:#}"), "mirror upsert failed");
            }
        });
    }
}

fn join_text(segments: &[TranscriptSegment]) -> String {
    segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ")
}

fn mirror_item(meta: &SessionMetadata, segments: &[TranscriptSegment]) -> MirrorItem {
    let content = join_text(segments);
    MirrorItem {
        identifier: meta.id.clone(),
        title: meta.title.clone().unwrap_or_else(|| meta.id.clone()),
        keywords: sorted_tokens(&content),
        content,
        date: meta.created_at.clone(),
    }
}

fn title_of(state: &IndexSnapshot, session_id: &str, tokens: &HashSet<String>) -> Option<String> {
    tokens
        .iter()
        .filter_map(|t| state.inverted_index.get(t))
        .flatten()
        .find(|m| m.session_id == session_id)
        .and_then(|m| m.title.clone())
}

/// Highest score first, then most recent, then session id.
fn rank_order(a: &SessionMatch, b: &SessionMatch) -> Ordering {
    b.relevance_score
        .partial_cmp(&a.relevance_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.timestamp.partial_cmp(&a.timestamp).unwrap_or(Ordering::Equal))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f64, ts: f64) -> SessionMatch {
        SessionMatch { id: id.into(), title: None, timestamp: ts, snippet: String::new(), relevance_score: score, segment_id: None }
    }

    #[test]
    fn rank_order_breaks_ties() {
        let mut v = vec![hit("b", 1.0, 0.0), hit("a", 1.0, 0.0), hit("c", 2.0, 0.0), hit("d", 1.0, 9.0)];
        v.sort_by(rank_order);
        let ids: Vec<_> = v.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "d", "a", "b"]);
    }

    #[test]
    fn mirror_item_falls_back_to_id_for_title() {
        let meta = SessionMetadata { id: "abc".into(), title: None, created_at: Some("2024-05-01T10:00:00Z".into()) };
        let segs = vec![TranscriptSegment { id: "s".into(), timestamp: 0.0, text: "Roadmap roadmap budget".into(), speaker_id: None }];
        let item = mirror_item(&meta, &segs);
        assert_eq!(item.title, "abc");
        assert_eq!(item.keywords, vec!["budget", "roadmap"]);
        assert_eq!(item.date.as_deref(), Some("2024-05-01T10:00:00Z"));
    }
}
