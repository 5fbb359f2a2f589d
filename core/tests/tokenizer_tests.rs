use transcript_core::tokenizer::tokenize;

#[test]
fn it_lowercases_and_keeps_accents() {
    let toks = tokenize("Reunión de PRESUPUESTO con el equipo. Café's menu!");
    assert!(toks.contains("reunión"));
    assert!(toks.contains("presupuesto"));
    assert!(toks.contains("equipo"));
    assert!(toks.contains("café"));
    // Spanish stopwords
    assert!(!toks.contains("de"));
    assert!(!toks.contains("con"));
    assert!(!toks.contains("el"));
}

#[test]
fn it_filters_stopwords() {
    let toks = tokenize("The quick brown fox and the lazy dog");
    assert!(!toks.contains("the"));
    assert!(!toks.contains("and"));
    assert!(toks.contains("quick"));
}

#[test]
fn stopword_only_text_has_no_tokens() {
    assert!(tokenize("the a an").is_empty());
    assert!(tokenize("").is_empty());
}

#[test]
fn short_tokens_are_dropped() {
    let toks = tokenize("x y Q3 ñ ok");
    assert!(toks.contains("q3"));
    assert!(toks.contains("ok"));
    assert!(!toks.contains("x"));
    assert!(!toks.contains("ñ"));
}

#[test]
fn tokenize_is_deterministic() {
    let text = "We discussed the budget for Q3 (01:15)";
    assert_eq!(tokenize(text), tokenize(text));
    let mut words: Vec<_> = tokenize(text).into_iter().collect();
    words.sort();
    assert_eq!(words, vec!["01", "15", "budget", "discussed", "q3"]);
}
