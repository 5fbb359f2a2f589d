use crate::index::SessionId;
use crate::queue::IndexOperation;
use crate::store::TranscriptSegment;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_LEDGER_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, base_delay: DEFAULT_BASE_DELAY }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based): base, 2*base, 4*base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `op` until it succeeds or the policy's attempts are spent.
/// Returns the last error when every attempt failed.
pub async fn run_with_backoff<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> anyhow::Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(err) if attempt < attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(label, attempt, ?delay, error = %err, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedIndexUpdate {
    pub session_id: SessionId,
    pub operation: IndexOperation,
    pub segments: Vec<TranscriptSegment>,
    /// RFC3339, when the final attempt failed.
    pub timestamp: String,
}

impl FailedIndexUpdate {
    pub fn now(session_id: SessionId, operation: IndexOperation, segments: Vec<TranscriptSegment>) -> Self {
        let timestamp = time::OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        Self { session_id, operation, segments, timestamp }
    }
}

/// Bounded ring of updates that exhausted their retries; oldest evicted first.
#[derive(Debug)]
pub struct FailureLedger {
    capacity: usize,
    entries: VecDeque<FailedIndexUpdate>,
}

impl Default for FailureLedger {
    fn default() -> Self { Self::with_capacity(DEFAULT_LEDGER_CAPACITY) }
}

impl FailureLedger {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, entries: VecDeque::with_capacity(capacity) }
    }

    pub fn record(&mut self, failure: FailedIndexUpdate) {
        if self.entries.len() == self.capacity {
            if let Some(evicted) = self.entries.pop_front() {
                tracing::debug!(session_id = %evicted.session_id, "failure ledger full, evicting oldest entry");
            }
        }
        self.entries.push_back(failure);
    }

    /// Empty the ledger, returning entries oldest first.
    pub fn take_all(&mut self) -> Vec<FailedIndexUpdate> { self.entries.drain(..).collect() }

    pub fn entries(&self) -> Vec<FailedIndexUpdate> { self.entries.iter().cloned().collect() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(3), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let out = run_with_backoff(&RetryPolicy::default(), "test", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { if attempt < 3 { Err(anyhow!("busy")) } else { Ok(attempt) } }
        })
        .await
        .unwrap();
        assert_eq!(out, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let res: anyhow::Result<()> = run_with_backoff(&RetryPolicy::default(), "test", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow!("disk busy")) }
        })
        .await;
        assert!(res.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn ledger_evicts_oldest() {
        let mut ledger = FailureLedger::with_capacity(2);
        for id in ["a", "b", "c"] {
            ledger.record(FailedIndexUpdate::now(id.into(), IndexOperation::Update, vec![]));
        }
        let ids: Vec<_> = ledger.take_all().into_iter().map(|f| f.session_id).collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert!(ledger.is_empty());
    }
}
