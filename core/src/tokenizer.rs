use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::UnicodeNormalization;
use std::collections::HashSet;

lazy_static! {
    static ref RE: Regex = Regex::new(r"[A-Za-z0-9_]+").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    // NLTK english list; contractions appear split because punctuation is a separator.
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","ain","all","am","an","and","any","are","aren","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","couldn",
            "d","did","didn","do","does","doesn","doing","don","down","during",
            "each","few","for","from","further",
            "had","hadn","has","hasn","have","haven","having","he","her","here","hers","herself","him","himself","his","how",
            "i","if","in","into","is","isn","it","its","itself",
            "just","ll","m","ma","me","mightn","more","most","mustn","my","myself",
            "needn","no","nor","not","now",
            "o","of","off","on","once","only","or","other","our","ours","ourselves","out","over","own",
            "re","s","same","shan","she","should","shouldn","so","some","such",
            "t","than","that","the","their","theirs","them","themselves","then","there","these","they","this","those","through","to","too",
            "under","until","up","ve","very",
            "was","wasn","we","were","weren","what","when","where","which","while","who","whom","why","will","with","won","wouldn",
            "y","you","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// Fold to ASCII: NFKD decomposition, then drop every non-ASCII code point
/// (combining accents included), so "Café" becomes "Cafe".
pub fn fold_ascii(text: &str) -> String {
    text.nfkd().filter(char::is_ascii).collect()
}

/// Tokenize text into (term, position) using accent folding, lowercase, stopword removal, and stemming.
///
/// Positions count every word-like token, stopwords included.
pub fn tokenize(text: &str) -> Vec<(String, usize)> {
    let normalized = fold_ascii(text).to_lowercase();
    let mut tokens = Vec::new();
    for (pos, mat) in RE.find_iter(&normalized).enumerate() {
        let token = mat.as_str();
        if is_stopword(token) { continue; }
        let stem = STEMMER.stem(token).to_string();
        tokens.push((stem, pos));
    }
    tokens
}

/// Terms only, in order.
pub fn analyze(text: &str) -> Vec<String> {
    tokenize(text).into_iter().map(|(term, _)| term).collect()
}
