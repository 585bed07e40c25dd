//! Offline IR metrics over a ranked list of pids and graded judgments.
//!
//! Relevance grades are non-negative integers; any grade above zero counts as
//! relevant for the set-based metrics, and the grade itself is the NDCG gain.

use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Judgments {
    grades: HashMap<String, u32>,
}

impl Judgments {
    pub fn new() -> Self { Self::default() }

    /// Binary judgments: every listed pid has grade 1.
    pub fn binary<I, S>(relevant: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { grades: relevant.into_iter().map(|p| (p.into(), 1)).collect() }
    }

    pub fn insert(&mut self, pid: impl Into<String>, grade: u32) { self.grades.insert(pid.into(), grade); }

    pub fn grade(&self, pid: &str) -> u32 { self.grades.get(pid).copied().unwrap_or(0) }

    pub fn is_relevant(&self, pid: &str) -> bool { self.grade(pid) > 0 }

    pub fn relevant_count(&self) -> usize { self.grades.values().filter(|&&g| g > 0).count() }

    pub fn len(&self) -> usize { self.grades.len() }

    pub fn is_empty(&self) -> bool { self.grades.is_empty() }
}

fn hits_in_top<S: AsRef<str>>(ranked: &[S], judgments: &Judgments, k: usize) -> usize {
    ranked.iter().take(k).filter(|pid| judgments.is_relevant(pid.as_ref())).count()
}

/// Relevant documents in the top `k` divided by `k`, with `k` capped at the ranking length.
pub fn precision_at_k<S: AsRef<str>>(ranked: &[S], judgments: &Judgments, k: usize) -> f64 {
    let k = k.min(ranked.len());
    if k == 0 { return 0.0; }
    hits_in_top(ranked, judgments, k) as f64 / k as f64
}

/// Relevant documents in the top `k` divided by all relevant documents.
pub fn recall_at_k<S: AsRef<str>>(ranked: &[S], judgments: &Judgments, k: usize) -> f64 {
    let relevant = judgments.relevant_count();
    if relevant == 0 { return 0.0; }
    hits_in_top(ranked, judgments, k) as f64 / relevant as f64
}

pub fn f1_at_k<S: AsRef<str>>(ranked: &[S], judgments: &Judgments, k: usize) -> f64 {
    let p = precision_at_k(ranked, judgments, k);
    let r = recall_at_k(ranked, judgments, k);
    if p + r == 0.0 { 0.0 } else { 2.0 * p * r / (p + r) }
}

/// Mean of the precision values at each relevant position within the top `k`.
pub fn average_precision_at_k<S: AsRef<str>>(ranked: &[S], judgments: &Judgments, k: usize) -> f64 {
    let mut seen = 0usize;
    let mut sum = 0.0;
    for (i, pid) in ranked.iter().take(k).enumerate() {
        if judgments.is_relevant(pid.as_ref()) {
            seen += 1;
            sum += seen as f64 / (i + 1) as f64;
        }
    }
    if seen == 0 { 0.0 } else { sum / seen as f64 }
}

pub fn reciprocal_rank<S: AsRef<str>>(ranked: &[S], judgments: &Judgments) -> f64 {
    ranked
        .iter()
        .position(|pid| judgments.is_relevant(pid.as_ref()))
        .map_or(0.0, |i| 1.0 / (i + 1) as f64)
}

/// Mean over queries of the full-length average precision.
pub fn mean_average_precision<S: AsRef<str>>(runs: &[(Vec<S>, Judgments)]) -> f64 {
    if runs.is_empty() { return 0.0; }
    runs.iter().map(|(r, j)| average_precision_at_k(r, j, r.len())).sum::<f64>() / runs.len() as f64
}

pub fn mean_reciprocal_rank<S: AsRef<str>>(runs: &[(Vec<S>, Judgments)]) -> f64 {
    if runs.is_empty() { return 0.0; }
    runs.iter().map(|(r, j)| reciprocal_rank(r, j)).sum::<f64>() / runs.len() as f64
}

fn discount(position: usize) -> f64 { 1.0 / ((position + 2) as f64).log2() }

/// DCG@k with gain = grade and log2 discount, normalized by the ideal ordering
/// of the judged grades.
pub fn ndcg_at_k<S: AsRef<str>>(ranked: &[S], judgments: &Judgments, k: usize) -> f64 {
    let dcg: f64 = ranked
        .iter()
        .take(k)
        .enumerate()
        .map(|(i, pid)| judgments.grade(pid.as_ref()) as f64 * discount(i))
        .sum();
    let mut ideal: Vec<u32> = judgments.grades.values().copied().filter(|&g| g > 0).collect();
    ideal.sort_unstable_by(|a, b| b.cmp(a));
    let idcg: f64 = ideal.iter().take(k).enumerate().map(|(i, &g)| g as f64 * discount(i)).sum();
    if idcg == 0.0 { 0.0 } else { dcg / idcg }
}
