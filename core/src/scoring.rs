use crate::index::SegmentInfo;
use crate::tokenizer::{normalize, sorted_tokens};
use unicode_normalization::UnicodeNormalization;

pub const DEFAULT_SNIPPET_RADIUS: usize = 75;
/// Characters returned verbatim when no query token occurs in the text.
pub const FALLBACK_SNIPPET_CHARS: usize = 150;

const TOKEN_WEIGHT: f64 = 1.0;
/// Applied to every matched token when the whole query appears in the text,
/// so multi-token phrase hits are counted once per token.
const PHRASE_WEIGHT: f64 = 1.5;

/// Average per-token weight of `query` against `text`; zero for an empty query.
pub fn score(text: &str, query: &str) -> f64 {
    let tokens = sorted_tokens(query);
    if tokens.is_empty() {
        return 0.0;
    }
    let haystack = normalize(text);
    let phrase = normalize(query);
    let phrase = phrase.trim();
    let phrase_hit = !phrase.is_empty() && haystack.contains(phrase);

    let total: f64 = tokens
        .iter()
        .filter(|t| haystack.contains(t.as_str()))
        .map(|_| if phrase_hit { PHRASE_WEIGHT } else { TOKEN_WEIGHT })
        .sum();
    total / tokens.len() as f64
}

/// Highest-scoring segment; on ties the earlier segment wins.
pub fn best_match<'a>(segments: &'a [SegmentInfo], query: &str) -> Option<(&'a SegmentInfo, f64)> {
    let mut best: Option<(&SegmentInfo, f64)> = None;
    for seg in segments {
        let s = score(&seg.text, query);
        match best {
            Some((_, top)) if s <= top => {}
            _ => best = Some((seg, s)),
        }
    }
    best
}

/// Fraction of query tokens that hit the session in the inverted index.
pub fn token_match_ratio(matched: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { matched as f64 / total as f64 }
}

/// Excerpt of `radius` characters on each side of the earliest query token.
pub fn extract_snippet(text: &str, query: &str, radius: usize) -> String {
    let chars: Vec<char> = text.nfc().collect();

    // Lower-case char by char, remembering which source char each lowered char came from.
    let mut lowered = String::with_capacity(text.len());
    let mut origin: Vec<usize> = Vec::with_capacity(chars.len());
    for (i, c) in chars.iter().enumerate() {
        for lc in c.to_lowercase() {
            lowered.push(fold_final_sigma(lc));
            origin.push(i);
        }
    }

    let earliest = sorted_tokens(query)
        .into_iter()
        .filter_map(|t| {
            let t: String = t.chars().map(fold_final_sigma).collect();
            let byte_pos = lowered.find(&t)?;
            let start = lowered[..byte_pos].chars().count();
            let end = start + t.chars().count() - 1;
            Some((origin[start], origin[end] + 1))
        })
        .min_by_key(|&(start, _)| start);

    let Some((hit_start, hit_end)) = earliest else {
        return chars.iter().take(FALLBACK_SNIPPET_CHARS).collect();
    };

    let start = hit_start.saturating_sub(radius);
    let end = (hit_end + radius).min(chars.len());
    let mut snippet = String::new();
    if start > 0 {
        snippet.push_str("...");
    }
    snippet.extend(&chars[start..end]);
    if end < chars.len() {
        snippet.push_str("...");
    }
    snippet
}

// Per-char lowercasing never yields 'ς', whole-string lowercasing does at word ends.
fn fold_final_sigma(c: char) -> char {
    if c == 'ς' { 'σ' } else { c }
}
