pub mod config;
pub mod engine;
pub mod index;
pub mod mirror;
pub mod persist;
pub mod queue;
pub mod retry;
pub mod scoring;
pub mod store;
pub mod tokenizer;

pub use config::EngineConfig;
pub use engine::{BatchReport, IndexStats, RebuildReport, SessionMatch, TranscriptSearchEngine};
pub use index::{IndexedMatch, InvertedIndex, SegmentId, SegmentInfo, SessionId};
pub use mirror::{DirectoryMirror, MirrorItem, NoopMirror, SystemSearchMirror};
pub use queue::{IndexOperation, UpdateQueueEntry};
pub use retry::{FailedIndexUpdate, RetryPolicy};
pub use store::{JsonSessionStore, MemorySessionStore, SessionMetadata, SessionStore, TranscriptSegment};
