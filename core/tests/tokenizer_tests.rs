use shopsearch_core::tokenizer::{analyze, tokenize};

#[test]
fn it_normalizes_and_stems() {
    let toks = tokenize("Running Runners RUN! The café's menu.");
    let words: Vec<String> = toks.into_iter().map(|(w, _)| w).collect();
    // Stemming to "run" should appear
    assert!(words.contains(&"run".to_string()));
    // Accent folding: café -> cafe
    assert!(words.contains(&"cafe".to_string()));
}

#[test]
fn it_filters_stopwords() {
    let words = analyze("The quick brown fox and the lazy dog");
    assert!(!words.contains(&"the".to_string()));
    assert!(!words.contains(&"and".to_string()));
}

#[test]
fn queries_and_documents_share_terms() {
    // What a shopper types must land on the same terms as the product text.
    let doc = analyze("Printed Women Round Neck T-Shirt");
    let query = analyze("women's printed t-shirts");
    for term in &query {
        assert!(doc.contains(term), "{term} not in {doc:?}");
    }
}
