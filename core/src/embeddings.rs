//! Pretrained word vectors in the word2vec binary format and per-document
//! mean vectors for semantic ranking.

use crate::index::InvertedIndex;
use crate::product::Corpus;
use crate::DocId;
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

const MAX_DIM: usize = 1 << 16;
const PREALLOC_WORDS: usize = 1 << 20;
const PREALLOC_FLOATS: usize = 1 << 24;

#[derive(Debug, Clone, Default)]
pub struct WordVectors {
    dim: usize,
    vocab: HashMap<String, usize>,
    data: Vec<f32>,
}

impl WordVectors {
    /// Load a word2vec `.bin` file (`"<count> <dim>\n"` header, then
    /// `word<space>` followed by `dim` little-endian f32 per entry).
    /// `limit` keeps only the first N words, which are the most frequent ones.
    pub fn load_word2vec_binary(path: &Path, limit: Option<usize>) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening word vectors {}", path.display()))?;
        Self::read_word2vec_binary(BufReader::new(file), limit)
            .with_context(|| format!("reading word vectors {}", path.display()))
    }

    pub fn read_word2vec_binary<R: BufRead>(mut reader: R, limit: Option<usize>) -> Result<Self> {
        let mut header = String::new();
        reader.read_line(&mut header)?;
        let mut parts = header.split_whitespace();
        let (count, dim) = match (parts.next(), parts.next()) {
            (Some(c), Some(d)) => (c.parse::<usize>()?, d.parse::<usize>()?),
            _ => bail!("malformed header {header:?}"),
        };
        if dim == 0 { bail!("vector dimension is zero"); }
        if dim > MAX_DIM { bail!("vector dimension {dim} exceeds {MAX_DIM}"); }
        let wanted = limit.map_or(count, |l| l.min(count));
        let Some(total) = wanted.checked_mul(dim) else { bail!("header {count} x {dim} overflows") };

        // header counts are untrusted; preallocation is capped and the tables grow past it
        let mut vectors = WordVectors {
            dim,
            vocab: HashMap::with_capacity(wanted.min(PREALLOC_WORDS)),
            data: Vec::with_capacity(total.min(PREALLOC_FLOATS)),
        };
        let mut word = Vec::new();
        let mut raw = vec![0u8; dim * 4];
        for _ in 0..wanted {
            word.clear();
            reader.read_until(b' ', &mut word)?;
            if word.last() == Some(&b' ') { word.pop(); }
            // records may be separated by a newline that ends up glued to the next word
            let start = word.iter().position(|b| *b != b'\n').unwrap_or(word.len());
            if start == word.len() { bail!("unexpected end of vocabulary"); }
            reader.read_exact(&mut raw)?;
            let token = String::from_utf8_lossy(&word[start..]).into_owned();
            let values = raw.chunks_exact(4).map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]));
            if !vectors.vocab.contains_key(&token) {
                vectors.vocab.insert(token, vectors.vocab.len());
                vectors.data.extend(values);
            }
        }
        tracing::info!(words = vectors.len(), dim, "word vectors loaded");
        Ok(vectors)
    }

    pub fn from_pairs<I, S>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        let mut vectors = WordVectors::default();
        for (word, vec) in pairs {
            if vectors.dim == 0 { vectors.dim = vec.len(); }
            if vec.len() != vectors.dim || vec.is_empty() {
                bail!("vector length {} does not match dimension {}", vec.len(), vectors.dim);
            }
            vectors.vocab.insert(word.into(), vectors.vocab.len());
            vectors.data.extend(vec);
        }
        Ok(vectors)
    }

    pub fn dim(&self) -> usize { self.dim }

    pub fn len(&self) -> usize { self.vocab.len() }

    pub fn is_empty(&self) -> bool { self.vocab.is_empty() }

    pub fn get(&self, word: &str) -> Option<&[f32]> {
        self.vocab.get(word).map(|&i| &self.data[i * self.dim..(i + 1) * self.dim])
    }

    /// Mean vector of the known lowercase whitespace-separated words.
    pub fn text_vector(&self, text: &str) -> Option<Vec<f32>> {
        let mut sum = vec![0.0f32; self.dim];
        let mut hits = 0usize;
        for word in text.to_lowercase().split_whitespace() {
            if let Some(v) = self.get(word) {
                for (acc, x) in sum.iter_mut().zip(v) { *acc += x; }
                hits += 1;
            }
        }
        if hits == 0 { return None; }
        for x in sum.iter_mut() { *x /= hits as f32; }
        Some(sum)
    }
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na > 0.0 && nb > 0.0 { dot / (na * nb) } else { 0.0 }
}

/// Title + description vectors keyed by doc id; products with no known word are absent.
#[derive(Debug, Clone, Default)]
pub struct DocVectors {
    pub vectors: HashMap<DocId, Vec<f32>>,
}

impl DocVectors {
    pub fn build(model: &WordVectors, corpus: &Corpus, index: &InvertedIndex) -> Self {
        let mut vectors = HashMap::new();
        for product in corpus.iter() {
            let Some(doc_id) = index.doc_id(&product.pid) else { continue };
            let text = match &product.description {
                Some(desc) => format!("{} {}", product.title, desc),
                None => product.title.clone(),
            };
            if let Some(v) = model.text_vector(&text) {
                vectors.insert(doc_id, v);
            }
        }
        tracing::debug!(with_vectors = vectors.len(), total = corpus.len(), "document vectors built");
        DocVectors { vectors }
    }
}
