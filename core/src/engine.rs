use crate::embeddings::{DocVectors, WordVectors};
use crate::index::{InvertedIndex, MatchMode};
use crate::persist::{load_checked, IndexPaths};
use crate::product::{Corpus, Product};
use crate::rank::{rank_bm25, rank_custom, rank_tfidf, rank_word2vec, Bm25Params, Preferences, RankingMethod, ScoredDoc};
use crate::tokenizer::analyze;
use anyhow::{bail, Result};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub method: RankingMethod,
    pub top_n: usize,
    pub mode: MatchMode,
    pub preferences: Preferences,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, method: RankingMethod) -> Self {
        Self { query: query.into(), method, top_n: 20, mode: MatchMode::All, preferences: Preferences::default() }
    }

    pub fn top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn preferences(mut self, preferences: Preferences) -> Self {
        self.preferences = preferences;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub pid: String,
    pub score: f32,
}

/// Read-only bundle of the corpus, its index and optional word vectors.
pub struct SearchEngine {
    corpus: Corpus,
    index: InvertedIndex,
    semantic: Option<(WordVectors, DocVectors)>,
    bm25: Bm25Params,
}

impl SearchEngine {
    pub fn new(corpus: Corpus, index: InvertedIndex) -> Result<Self> {
        for product in corpus.iter() {
            if index.doc_id(&product.pid).is_none() {
                bail!("product {} is not in the index; rebuild it from this dataset", product.pid);
            }
        }
        if index.num_docs as usize != corpus.len() {
            tracing::warn!(indexed = index.num_docs, products = corpus.len(), "index and corpus sizes differ");
        }
        Ok(Self { corpus, index, semantic: None, bm25: Bm25Params::default() })
    }

    /// Load the dataset and the prebuilt blob. Either one missing is an error.
    pub fn open(data: &Path, index_dir: &Path) -> Result<Self> {
        let corpus = Corpus::load(data)?;
        let (index, meta) = load_checked(&IndexPaths::new(index_dir))?;
        tracing::info!(num_docs = meta.num_docs, num_terms = meta.num_terms, created_at = %meta.created_at, "index loaded");
        Self::new(corpus, index)
    }

    pub fn with_word_vectors(mut self, model: WordVectors) -> Self {
        let docs = DocVectors::build(&model, &self.corpus, &self.index);
        self.semantic = Some((model, docs));
        self
    }

    pub fn with_bm25_params(mut self, params: Bm25Params) -> Self {
        self.bm25 = params;
        self
    }

    pub fn corpus(&self) -> &Corpus { &self.corpus }

    pub fn index(&self) -> &InvertedIndex { &self.index }

    pub fn has_word_vectors(&self) -> bool { self.semantic.is_some() }

    pub fn product(&self, pid: &str) -> Option<&Product> { self.corpus.get(pid) }

    /// Rank the whole candidate set; `top_n` is applied by [`SearchEngine::search`].
    pub fn rank(&self, req: &SearchRequest) -> Vec<ScoredDoc> {
        let terms = analyze(&req.query);
        if terms.is_empty() {
            return Vec::new();
        }
        match req.method {
            RankingMethod::TfIdf => rank_tfidf(&self.index, &terms, req.mode),
            RankingMethod::Bm25 => rank_bm25(&self.index, &terms, req.mode, self.bm25),
            RankingMethod::Custom => rank_custom(&self.index, &self.corpus, &terms, req.mode, req.preferences),
            RankingMethod::Word2Vec => match &self.semantic {
                Some((model, docs)) => rank_word2vec(model, docs, &req.query),
                None => {
                    tracing::warn!("word vectors not loaded, falling back to tfidf");
                    rank_tfidf(&self.index, &terms, req.mode)
                }
            },
        }
    }

    pub fn search(&self, req: &SearchRequest) -> Vec<Hit> {
        self.rank(req)
            .into_iter()
            .take(req.top_n)
            .filter_map(|s| self.index.doc(s.doc_id).map(|meta| Hit { pid: meta.pid.clone(), score: s.score }))
            .collect()
    }
}
