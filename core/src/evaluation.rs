use crate::engine::{SearchEngine, SearchRequest};
use crate::metrics::{
    average_precision_at_k, f1_at_k, ndcg_at_k, precision_at_k, recall_at_k, reciprocal_rank, Judgments,
};
use crate::rank::RankingMethod;
use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryJudgments {
    pub text: Option<String>,
    pub judgments: Judgments,
}

/// Relevance labels for a set of queries, keyed by query id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundTruth {
    pub queries: BTreeMap<String, QueryJudgments>,
}

/// Split one CSV record. Double quotes group fields and `""` is a literal quote.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match (c, quoted) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', _) => quoted = !quoted,
            (',', false) => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields.into_iter().map(|f| f.trim().to_string()).collect()
}

/// Group physical lines into records; a quoted field may span lines.
/// Yields the 1-based line number each record starts on.
fn csv_records(text: &str) -> Vec<(usize, String)> {
    let mut records = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (i, line) in text.lines().enumerate() {
        let (start, record) = match pending.take() {
            Some((start, mut acc)) => {
                acc.push('\n');
                acc.push_str(line);
                (start, acc)
            }
            None => (i + 1, line.to_string()),
        };
        if record.matches('"').count() % 2 == 1 {
            pending = Some((start, record));
        } else {
            records.push((start, record));
        }
    }
    records.extend(pending);
    records
}

fn column(header: &[String], names: &[&str]) -> Option<usize> {
    header.iter().position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
}

impl GroundTruth {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading ground truth {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing ground truth {}", path.display()))
    }

    /// Parse CSV with a header naming `query_id`, `pid`, `label` and optionally `query`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = csv_records(text).into_iter().filter(|(_, l)| !l.trim().is_empty());
        let (_, header_line) = lines.next().ok_or_else(|| anyhow!("ground truth is empty"))?;
        let header = split_csv_line(header_line.trim_start_matches('\u{feff}'));
        let qid_col = column(&header, &["query_id", "qid"]).ok_or_else(|| anyhow!("missing query_id column"))?;
        let pid_col = column(&header, &["pid", "doc_id"]).ok_or_else(|| anyhow!("missing pid column"))?;
        let label_col = column(&header, &["label", "labels", "relevance"]).ok_or_else(|| anyhow!("missing label column"))?;
        let text_col = column(&header, &["query", "query_text"]);

        let mut truth = GroundTruth::default();
        for (lineno, line) in lines {
            let fields = split_csv_line(&line);
            let get = |col: usize| {
                fields.get(col).map(String::as_str).ok_or_else(|| anyhow!("line {lineno}: missing column {}", col + 1))
            };
            let qid = get(qid_col)?.to_string();
            let pid = get(pid_col)?.to_string();
            let label_raw = get(label_col)?;
            let grade = match label_raw.parse::<f64>() {
                Ok(v) if v >= 0.0 => v.round() as u32,
                _ => bail!("line {lineno}: invalid label {label_raw:?}"),
            };
            let entry = truth.queries.entry(qid).or_default();
            if let Some(col) = text_col {
                let q = get(col)?;
                if entry.text.is_none() && !q.is_empty() {
                    entry.text = Some(q.to_string());
                }
            }
            entry.judgments.insert(pid, grade);
        }
        Ok(truth)
    }

    pub fn len(&self) -> usize { self.queries.len() }

    pub fn is_empty(&self) -> bool { self.queries.is_empty() }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub query_id: String,
    pub query: String,
    pub retrieved: usize,
    pub relevant: usize,
    pub precision: f64,
    pub recall: f64,
    pub average_precision: f64,
    pub f1: f64,
    pub ndcg: f64,
    pub reciprocal_rank: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationReport {
    pub method: RankingMethod,
    pub k: usize,
    pub queries: Vec<QueryReport>,
    pub map: f64,
    pub mrr: f64,
    pub mean_ndcg: f64,
}

/// Run every labelled query through the engine and score the top `k` results.
///
/// MAP and MRR are computed over the full ranked list the engine returns,
/// per-query metrics at `k`.
pub fn evaluate(engine: &SearchEngine, truth: &GroundTruth, method: RankingMethod, k: usize) -> Result<EvaluationReport> {
    let mut queries = Vec::with_capacity(truth.len());
    for (qid, qj) in &truth.queries {
        let text = qj.text.as_deref().ok_or_else(|| anyhow!("query {qid} has no text"))?;
        let req = SearchRequest::new(text, method).top_n(usize::MAX);
        let ranked: Vec<String> = engine.search(&req).into_iter().map(|h| h.pid).collect();
        let j = &qj.judgments;
        queries.push(QueryReport {
            query_id: qid.clone(),
            query: text.to_string(),
            retrieved: ranked.len(),
            relevant: j.relevant_count(),
            precision: precision_at_k(&ranked, j, k),
            recall: recall_at_k(&ranked, j, k),
            average_precision: average_precision_at_k(&ranked, j, ranked.len()),
            f1: f1_at_k(&ranked, j, k),
            ndcg: ndcg_at_k(&ranked, j, k),
            reciprocal_rank: reciprocal_rank(&ranked, j),
        });
    }
    let n = queries.len().max(1) as f64;
    let map = queries.iter().map(|q| q.average_precision).sum::<f64>() / n;
    let mrr = queries.iter().map(|q| q.reciprocal_rank).sum::<f64>() / n;
    let mean_ndcg = queries.iter().map(|q| q.ndcg).sum::<f64>() / n;
    tracing::info!(%method, k, queries = queries.len(), map, mrr, mean_ndcg, "evaluation finished");
    Ok(EvaluationReport { method, k, queries, map, mrr, mean_ndcg })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_quotes_and_commas() {
        assert_eq!(split_csv_line(r#"1,"red, cotton ""shirt""",P1"#), vec!["1", r#"red, cotton "shirt""#, "P1"]);
        assert_eq!(split_csv_line("a,,b"), vec!["a", "", "b"]);
    }

    #[test]
    fn parses_labels_by_header_name() {
        let csv = "pid,query_id,labels,query\nP1,q1,1,red shirt\nP2,q1,0,red shirt\n\nP3,q2,2,\"jeans, blue\"\n";
        let truth = GroundTruth::parse(csv).unwrap();
        assert_eq!(truth.len(), 2);
        let q1 = &truth.queries["q1"];
        assert_eq!(q1.text.as_deref(), Some("red shirt"));
        assert!(q1.judgments.is_relevant("P1"));
        assert!(!q1.judgments.is_relevant("P2"));
        assert_eq!(q1.judgments.len(), 2);
        assert_eq!(truth.queries["q2"].judgments.grade("P3"), 2);
        assert_eq!(truth.queries["q2"].text.as_deref(), Some("jeans, blue"));
    }

    #[test]
    fn quoted_fields_may_span_lines() {
        let csv = "query_id,query,pid,label\nq1,\"red\nshirt\",P1,1\nq1,\"red\nshirt\",P2,0\nq2,jeans,P3,1\n";
        let truth = GroundTruth::parse(csv).unwrap();
        assert_eq!(truth.len(), 2);
        assert_eq!(truth.queries["q1"].text.as_deref(), Some("red\nshirt"));
        assert_eq!(truth.queries["q1"].judgments.len(), 2);
        assert!(truth.queries["q2"].judgments.is_relevant("P3"));
    }

    #[test]
    fn errors_name_the_record_line() {
        let err = GroundTruth::parse("query_id,query,pid,label\nq1,\"a\nb\",P1,1\nq2,x,P2,maybe\n").unwrap_err();
        assert!(format!("{err}").starts_with("line 4:"), "{err}");
    }

    #[test]
    fn rejects_bad_input() {
        assert!(GroundTruth::parse("").is_err());
        assert!(GroundTruth::parse("query_id,pid\nq1,P1\n").is_err());
        assert!(GroundTruth::parse("query_id,pid,label\nq1,P1,yes\n").is_err());
        assert!(GroundTruth::parse("query_id,pid,label\nq1\n").is_err());
    }
}
