//! Product search core: corpus loading, text analysis, the inverted index and
//! its on-disk blob, ranking functions, word vectors and IR evaluation.

pub mod embeddings;
pub mod engine;
pub mod evaluation;
pub mod index;
pub mod metrics;
pub mod persist;
pub mod product;
pub mod rank;
pub mod tokenizer;

pub type TermId = u32;
pub type DocId = u32;

pub use engine::{Hit, SearchEngine, SearchRequest};
pub use index::{BuildOptions, DocMeta, InvertedIndex, MatchMode, Posting};
pub use product::{Corpus, Product};
pub use rank::{Preferences, RankingMethod, ScoredDoc};
