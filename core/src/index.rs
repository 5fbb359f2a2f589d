use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

pub type SessionId = String;
pub type SegmentId = String;

/// One inverted-index hit. Every token of a session shares the same record,
/// pointing at the session's first segment; segment-level attribution is done
/// at query time from the per-session `SegmentInfo` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedMatch {
    pub session_id: SessionId,
    pub title: Option<String>,
    pub segment_id: Option<SegmentId>,
    pub timestamp: f64,
    pub relevance_score: f64,
}

impl IndexedMatch {
    pub fn new(session_id: impl Into<SessionId>, title: Option<String>, segment_id: Option<SegmentId>, timestamp: f64) -> Self {
        Self { session_id: session_id.into(), title, segment_id, timestamp, relevance_score: 1.0 }
    }
}

// Floats compare by bit pattern so records can live in a HashSet.
impl PartialEq for IndexedMatch {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id
            && self.title == other.title
            && self.segment_id == other.segment_id
            && self.timestamp.to_bits() == other.timestamp.to_bits()
            && self.relevance_score.to_bits() == other.relevance_score.to_bits()
    }
}

impl Eq for IndexedMatch {}

impl Hash for IndexedMatch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.session_id.hash(state);
        self.title.hash(state);
        self.segment_id.hash(state);
        self.timestamp.to_bits().hash(state);
        self.relevance_score.to_bits().hash(state);
    }
}

/// Per-segment data kept alongside the index for scoring and snippets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub segment_id: SegmentId,
    pub timestamp: f64,
    pub text: String,
    pub speaker_id: Option<String>,
}

/// token -> set of matches. No token ever maps to an empty set.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvertedIndex {
    postings: HashMap<String, HashSet<IndexedMatch>>,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    /// Record `template` under every token.
    pub fn insert<'a, I>(&mut self, tokens: I, template: &IndexedMatch)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for token in tokens {
            self.postings.entry(token.clone()).or_default().insert(template.clone());
        }
    }

    /// Drop every match for `session_id` and prune emptied tokens.
    /// Returns how many match records were removed; absent sessions remove nothing.
    pub fn remove(&mut self, session_id: &str) -> usize {
        let mut removed = 0;
        self.postings.retain(|_, matches| {
            let before = matches.len();
            matches.retain(|m| m.session_id != session_id);
            removed += before - matches.len();
            !matches.is_empty()
        });
        removed
    }

    /// Union of the matches for each token, grouped by session.
    pub fn query<'a, I>(&self, tokens: I) -> HashMap<SessionId, Vec<IndexedMatch>>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut grouped: HashMap<SessionId, Vec<IndexedMatch>> = HashMap::new();
        for token in tokens {
            if let Some(matches) = self.postings.get(token) {
                for m in matches {
                    grouped.entry(m.session_id.clone()).or_default().push(m.clone());
                }
            }
        }
        grouped
    }

    pub fn get(&self, token: &str) -> Option<&HashSet<IndexedMatch>> { self.postings.get(token) }

    pub fn token_count(&self) -> usize { self.postings.len() }

    pub fn is_empty(&self) -> bool { self.postings.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(words: &[&str]) -> Vec<String> { words.iter().map(|w| w.to_string()).collect() }

    #[test]
    fn remove_prunes_empty_tokens() {
        let mut idx = InvertedIndex::new();
        idx.insert(&toks(&["budget", "roadmap"]), &IndexedMatch::new("a", None, Some("s1".into()), 0.0));
        idx.insert(&toks(&["roadmap"]), &IndexedMatch::new("b", None, Some("s9".into()), 3.0));

        assert_eq!(idx.remove("a"), 2);
        assert!(idx.get("budget").is_none());
        assert_eq!(idx.get("roadmap").map(|s| s.len()), Some(1));
        assert_eq!(idx.token_count(), 1);
    }

    #[test]
    fn remove_absent_session_is_noop() {
        let mut idx = InvertedIndex::new();
        idx.insert(&toks(&["budget"]), &IndexedMatch::new("a", None, None, 0.0));
        assert_eq!(idx.remove("missing"), 0);
        assert_eq!(idx.remove("a"), 1);
        assert_eq!(idx.remove("a"), 0);
        assert!(idx.is_empty());
    }

    #[test]
    fn identical_matches_collapse() {
        let mut idx = InvertedIndex::new();
        let m = IndexedMatch::new("a", Some("Standup".into()), Some("s1".into()), 1.5);
        idx.insert(&toks(&["budget"]), &m);
        idx.insert(&toks(&["budget"]), &m);
        assert_eq!(idx.get("budget").map(|s| s.len()), Some(1));

        let moved = IndexedMatch::new("a", Some("Standup".into()), Some("s2".into()), 1.5);
        idx.insert(&toks(&["budget"]), &moved);
        assert_eq!(idx.get("budget").map(|s| s.len()), Some(2));
    }

    #[test]
    fn query_groups_by_session() {
        let mut idx = InvertedIndex::new();
        idx.insert(&toks(&["budget", "roadmap"]), &IndexedMatch::new("a", None, None, 0.0));
        idx.insert(&toks(&["hiring"]), &IndexedMatch::new("b", None, None, 0.0));

        let hits = idx.query(&toks(&["budget", "roadmap", "unknown"]));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits["a"].len(), 2);
        assert!(!hits.contains_key("b"));
    }
}
