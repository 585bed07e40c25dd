//! Ranking functions over the inverted index.
//!
//! Every ranker returns documents sorted by descending score, ties broken by
//! ascending doc id, so results are deterministic.

use crate::embeddings::{cosine, DocVectors, WordVectors};
use crate::index::{InvertedIndex, MatchMode};
use crate::product::Corpus;
use crate::DocId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredDoc {
    pub doc_id: DocId,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingMethod {
    #[default]
    TfIdf,
    Bm25,
    Word2Vec,
    Custom,
}

impl RankingMethod {
    pub const ALL: [RankingMethod; 4] = [Self::TfIdf, Self::Bm25, Self::Custom, Self::Word2Vec];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TfIdf => "tfidf",
            Self::Bm25 => "bm25",
            Self::Word2Vec => "word2vec",
            Self::Custom => "custom",
        }
    }

    /// Unknown names fall back to TF-IDF.
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| {
            tracing::debug!(method = s, "unknown ranking method, using tfidf");
            Self::TfIdf
        })
    }
}

impl FromStr for RankingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tfidf" | "tf-idf" | "tf_idf" => Ok(Self::TfIdf),
            "bm25" => Ok(Self::Bm25),
            "word2vec" | "w2v" => Ok(Self::Word2Vec),
            "custom" => Ok(Self::Custom),
            other => Err(format!("unknown ranking method {other:?}")),
        }
    }
}

impl fmt::Display for RankingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self { Self { k1: 1.5, b: 0.75 } }
}

/// Shopper preferences used by the custom ranker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    pub rating: Option<f32>,
    pub price: Option<f32>,
}

impl Preferences {
    pub fn is_empty(&self) -> bool { self.rating.is_none() && self.price.is_none() }
}

fn sort_scored(scored: &mut [ScoredDoc]) {
    scored.sort_by(|a, b| {
        b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.doc_id.cmp(&b.doc_id))
    });
}

fn distinct(terms: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    terms.iter().map(String::as_str).filter(|t| seen.insert(*t)).collect()
}

// Sparse cosine over the query terms: the query weight of t is idf(t), the
// document weight is tf_norm(t, d) * idf(t).
fn tfidf_cosine(index: &InvertedIndex, terms: &[&str], doc_id: DocId) -> f32 {
    let mut dot = 0.0f32;
    let mut q_norm = 0.0f32;
    let mut d_norm = 0.0f32;
    for term in terms {
        let idf = index.idf(term);
        let d = index.tf_norm(term, doc_id) * idf;
        dot += idf * d;
        q_norm += idf * idf;
        d_norm += d * d;
    }
    if q_norm == 0.0 || d_norm == 0.0 { return 0.0; }
    dot / (q_norm.sqrt() * d_norm.sqrt())
}

pub fn rank_tfidf(index: &InvertedIndex, terms: &[String], mode: MatchMode) -> Vec<ScoredDoc> {
    let unique = distinct(terms);
    let mut scored: Vec<ScoredDoc> = index
        .candidates(terms, mode)
        .into_iter()
        .map(|doc_id| ScoredDoc { doc_id, score: tfidf_cosine(index, &unique, doc_id) })
        .collect();
    sort_scored(&mut scored);
    scored
}

pub fn bm25_score(index: &InvertedIndex, terms: &[&str], doc_id: DocId, params: Bm25Params) -> f32 {
    let avg_len = if index.avg_doc_len > 0.0 { index.avg_doc_len } else { 1.0 };
    let dl = index.doc_len(doc_id) as f32;
    let mut score = 0.0;
    for term in terms {
        let freq = index.raw_tf(term, doc_id) as f32;
        if freq == 0.0 { continue; }
        let numerator = freq * (params.k1 + 1.0);
        let denominator = freq + params.k1 * (1.0 - params.b + params.b * dl / avg_len);
        score += index.idf(term) * numerator / denominator;
    }
    score
}

pub fn rank_bm25(index: &InvertedIndex, terms: &[String], mode: MatchMode, params: Bm25Params) -> Vec<ScoredDoc> {
    let unique = distinct(terms);
    let mut scored: Vec<ScoredDoc> = index
        .candidates(terms, mode)
        .into_iter()
        .map(|doc_id| ScoredDoc { doc_id, score: bm25_score(index, &unique, doc_id, params) })
        .collect();
    sort_scored(&mut scored);
    scored
}

/// Cosine between (rating, price) pairs; missing values count as zero.
pub fn numeric_cosine(query: (f32, f32), doc: (f32, f32)) -> f32 {
    let dot = query.0 * doc.0 + query.1 * doc.1;
    let nq = (query.0 * query.0 + query.1 * query.1).sqrt();
    let nd = (doc.0 * doc.0 + doc.1 * doc.1).sqrt();
    if nq == 0.0 || nd == 0.0 { 0.0 } else { dot / (nq * nd) }
}

/// TF-IDF cosine blended with product metadata.
///
/// Without preferences the text score is boosted by rating: `score * (1 + rating / 10)`,
/// so a 5-star product gains 50%. With a preferred rating or price the score is
/// `0.5 * text + 0.5 * cos((rating, price), (doc rating, doc price))`.
pub fn rank_custom(
    index: &InvertedIndex,
    corpus: &Corpus,
    terms: &[String],
    mode: MatchMode,
    prefs: Preferences,
) -> Vec<ScoredDoc> {
    let unique = distinct(terms);
    let mut scored: Vec<ScoredDoc> = index
        .candidates(terms, mode)
        .into_iter()
        .map(|doc_id| {
            let text = tfidf_cosine(index, &unique, doc_id);
            let product = index.doc(doc_id).and_then(|meta| corpus.get(&meta.pid));
            let rating = product.and_then(|p| p.average_rating);
            let score = if prefs.is_empty() {
                match rating {
                    Some(r) => text * (1.0 + r / 10.0),
                    None => text,
                }
            } else {
                let price = product.and_then(|p| p.selling_price);
                let numeric = numeric_cosine(
                    (prefs.rating.unwrap_or(0.0), prefs.price.unwrap_or(0.0)),
                    (rating.unwrap_or(0.0), price.unwrap_or(0.0)),
                );
                0.5 * text + 0.5 * numeric
            };
            ScoredDoc { doc_id, score }
        })
        .collect();
    sort_scored(&mut scored);
    scored
}

/// Cosine between the mean query word vector and every document vector.
pub fn rank_word2vec(model: &WordVectors, docs: &DocVectors, query: &str) -> Vec<ScoredDoc> {
    let Some(q_vec) = model.text_vector(query) else { return Vec::new() };
    let mut scored: Vec<ScoredDoc> =
        docs.vectors.iter().map(|(&doc_id, d_vec)| ScoredDoc { doc_id, score: cosine(&q_vec, d_vec) }).collect();
    sort_scored(&mut scored);
    scored
}
