use crate::product::Corpus;
use crate::{DocId, TermId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocMeta {
    pub pid: String,
    pub title: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    /// Raw occurrence count.
    pub tf: u32,
    /// tf divided by the Euclidean norm of the document's count vector.
    pub tf_norm: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Use smoothed IDF = ln(1 + N/df) instead of ln(N/df)
    pub smoothed_idf: bool,
}

/// How query terms select candidate documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// Every query term must occur in the document.
    #[default]
    All,
    /// At least one query term must occur.
    Any,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InvertedIndex {
    pub dictionary: HashMap<String, TermId>,
    pub df: Vec<u32>,
    pub idf: Vec<f32>,
    pub postings: Vec<Vec<Posting>>, // indexed by term id, each sorted by doc_id
    pub docs: Vec<DocMeta>,          // indexed by doc id
    pub doc_id_map: HashMap<String, DocId>,
    pub doc_lengths: Vec<u32>,
    pub avg_doc_len: f32,
    pub num_docs: u32,
    pub options: BuildOptions,
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    /// Build the index over every product's search text. Doc ids follow corpus order.
    pub fn build(corpus: &Corpus, options: BuildOptions) -> Self {
        let mut index = InvertedIndex { options, ..Self::default() };
        for product in corpus.iter() {
            let doc_id = index.docs.len() as DocId;
            index.doc_id_map.insert(product.pid.clone(), doc_id);
            index.docs.push(DocMeta { pid: product.pid.clone(), title: product.title.clone(), url: product.url.clone() });
            index.ingest(doc_id, &product.search_text());
        }
        index.finish();
        tracing::debug!(num_docs = index.num_docs, num_terms = index.dictionary.len(), "index built");
        index
    }

    fn ingest(&mut self, doc_id: DocId, terms: &[String]) {
        let mut counts: HashMap<TermId, u32> = HashMap::new();
        for term in terms {
            let next_id = self.dictionary.len() as TermId;
            let tid = *self.dictionary.entry(term.clone()).or_insert(next_id);
            if tid == next_id {
                self.df.push(0);
                self.postings.push(Vec::new());
            }
            *counts.entry(tid).or_insert(0) += 1;
        }

        let norm = counts.values().map(|&c| (c as f32) * (c as f32)).sum::<f32>().sqrt();
        for (tid, tf) in counts {
            self.df[tid as usize] += 1;
            let tf_norm = if norm > 0.0 { tf as f32 / norm } else { 0.0 };
            self.postings[tid as usize].push(Posting { doc_id, tf, tf_norm });
        }
        self.doc_lengths.push(terms.len() as u32);
    }

    fn finish(&mut self) {
        self.num_docs = self.docs.len() as u32;
        let n = self.num_docs.max(1) as f32;
        let smoothed = self.options.smoothed_idf;
        self.idf = self
            .df
            .iter()
            .map(|&df_t| {
                let ratio = n / df_t.max(1) as f32;
                if smoothed { (1.0 + ratio).ln() } else { ratio.ln() }
            })
            .collect();
        // Documents are ingested in id order, so postings are already sorted.
        debug_assert!(self.postings.iter().all(|p| p.windows(2).all(|w| w[0].doc_id < w[1].doc_id)));
        let total: u64 = self.doc_lengths.iter().map(|&l| l as u64).sum();
        self.avg_doc_len = if self.num_docs == 0 { 0.0 } else { total as f32 / self.num_docs as f32 };
    }

    pub fn num_terms(&self) -> usize { self.dictionary.len() }

    pub fn term_id(&self, term: &str) -> Option<TermId> { self.dictionary.get(term).copied() }

    pub fn postings(&self, term: &str) -> &[Posting] {
        match self.term_id(term) {
            Some(tid) => &self.postings[tid as usize],
            None => &[],
        }
    }

    fn posting(&self, term: &str, doc_id: DocId) -> Option<&Posting> {
        let plist = self.postings(term);
        plist.binary_search_by_key(&doc_id, |p| p.doc_id).ok().map(|i| &plist[i])
    }

    pub fn tf_norm(&self, term: &str, doc_id: DocId) -> f32 {
        self.posting(term, doc_id).map_or(0.0, |p| p.tf_norm)
    }

    pub fn raw_tf(&self, term: &str, doc_id: DocId) -> u32 {
        self.posting(term, doc_id).map_or(0, |p| p.tf)
    }

    pub fn idf(&self, term: &str) -> f32 {
        self.term_id(term).map_or(0.0, |tid| self.idf[tid as usize])
    }

    pub fn df(&self, term: &str) -> u32 {
        self.term_id(term).map_or(0, |tid| self.df[tid as usize])
    }

    pub fn doc(&self, doc_id: DocId) -> Option<&DocMeta> { self.docs.get(doc_id as usize) }

    pub fn doc_id(&self, pid: &str) -> Option<DocId> { self.doc_id_map.get(pid).copied() }

    pub fn doc_len(&self, doc_id: DocId) -> u32 { self.doc_lengths.get(doc_id as usize).copied().unwrap_or(0) }

    /// Documents matching the query terms under `mode`, in doc id order.
    pub fn candidates(&self, terms: &[String], mode: MatchMode) -> BTreeSet<DocId> {
        if terms.is_empty() { return BTreeSet::new(); }
        match mode {
            MatchMode::All => {
                let mut result: Option<BTreeSet<DocId>> = None;
                for term in terms {
                    let docs: BTreeSet<DocId> = self.postings(term).iter().map(|p| p.doc_id).collect();
                    if docs.is_empty() { return BTreeSet::new(); }
                    result = Some(match result {
                        None => docs,
                        Some(acc) => acc.intersection(&docs).copied().collect(),
                    });
                }
                result.unwrap_or_default()
            }
            MatchMode::Any => terms.iter().flat_map(|t| self.postings(t).iter().map(|p| p.doc_id)).collect(),
        }
    }
}
