use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

/// Word pattern: letters of any script (accented Latin included), combining marks, digits, underscore.
const WORD_PATTERN: &str = r"(?u)[\p{L}\p{M}\p{N}_]+";

/// Tokens shorter than this many characters are dropped.
pub const MIN_TOKEN_CHARS: usize = 2;

lazy_static! {
    static ref RE: Option<Regex> = match Regex::new(WORD_PATTERN) {
        Ok(re) => Some(re),
        Err(err) => {
            tracing::warn!(%err, "word pattern failed to compile, falling back to whitespace splitting");
            None
        }
    };
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            // english
            "a","about","above","after","again","against","all","am","an","and","any","are","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","could","did","do","does","doing","down","during",
            "each","few","for","from","further",
            "had","has","have","having","he","her","here","hers","herself","him","himself","his","how",
            "i","if","in","into","is","it","its","itself",
            "me","more","most","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","our","ours","ourselves","out","over","own",
            "same","she","should","so","some","such",
            "than","that","the","their","theirs","them","themselves","then","there","these","they","this","those","through","to","too",
            "under","until","up","very",
            "was","we","were","what","when","where","which","while","who","whom","why","will","with","would",
            "you","your","yours","yourself","yourselves",
            // spanish
            "al","algo","como","con","cual","cuando","de","del","desde","donde","el","él","ella","ellas","ellos",
            "en","entre","era","es","esa","ese","eso","esta","está","este","esto","fue","ha","hay",
            "la","las","le","les","lo","los","más","me","mi","mis","muy","ni","no","nos","nosotros",
            "o","para","pero","por","porque","qué","que","se","sea","si","sí","sin","sobre","son","su","sus",
            "también","te","tu","tus","un","una","uno","unos","unas","ya","yo","y",
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Canonical form shared by the tokenizer, scorer and snippet extractor: NFC, lower-cased.
pub fn normalize(text: &str) -> String {
    text.nfc().collect::<String>().to_lowercase()
}

fn keep(token: &str) -> bool {
    token.chars().count() >= MIN_TOKEN_CHARS && !is_stopword(token)
}

/// Tokenize text into the set of distinct normalized, non-stopword terms.
pub fn tokenize(text: &str) -> HashSet<String> {
    let normalized = normalize(text);
    match RE.as_ref() {
        Some(re) => re
            .find_iter(&normalized)
            .map(|m| m.as_str())
            .filter(|t| keep(t))
            .map(str::to_string)
            .collect(),
        None => split_whitespace(&normalized),
    }
}

fn split_whitespace(normalized: &str) -> HashSet<String> {
    normalized
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .filter(|t| keep(t))
        .map(str::to_string)
        .collect()
}

/// Tokens in ascending order, for callers that need a stable listing.
pub fn sorted_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = tokenize(text).into_iter().collect();
    tokens.sort();
    tokens
}
