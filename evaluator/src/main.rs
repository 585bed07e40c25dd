use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shopsearch_core::embeddings::WordVectors;
use shopsearch_core::evaluation::{evaluate, EvaluationReport, GroundTruth};
use shopsearch_core::{Preferences, RankingMethod, SearchEngine, SearchRequest};
use tracing_subscriber::{fmt, EnvFilter};

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "evaluator")]
#[command(about = "Offline evaluation and side-by-side comparison of ranking methods", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one ranking method against a ground-truth CSV
    Evaluate {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        index: PathBuf,
        /// CSV with query_id, pid, label and optionally query columns
        #[arg(long)]
        judgments: PathBuf,
        #[arg(long, default_value = "tfidf")]
        method: RankingMethod,
        #[arg(long, default_value_t = 10)]
        k: usize,
        /// Also write the report as JSON to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print the top results of every ranking method for a set of queries
    Compare {
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        index: PathBuf,
        /// Query text; repeat for several queries
        #[arg(long = "query", required = true)]
        queries: Vec<String>,
        /// Preferred rating for the custom method
        #[arg(long)]
        rating: Option<f32>,
        /// Preferred price for the custom method
        #[arg(long)]
        price: Option<f32>,
        /// Binary word2vec model
        #[arg(long)]
        word2vec: Option<PathBuf>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 5)]
        top: usize,
        /// Also write the comparison to this text file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate { data, index, judgments, method, k, output } => {
            let engine = SearchEngine::open(&data, &index)?;
            let truth = GroundTruth::load(&judgments)?;
            let report = evaluate(&engine, &truth, method, k)?;
            print!("{}", render_report(&report));
            if let Some(path) = output {
                write_output(&path, &serde_json::to_string_pretty(&report)?)?;
            }
            Ok(())
        }
        Commands::Compare { data, index, queries, rating, price, word2vec, limit, top, output } => {
            let mut engine = SearchEngine::open(&data, &index)?;
            if let Some(path) = word2vec {
                engine = engine.with_word_vectors(WordVectors::load_word2vec_binary(&path, limit)?);
            }
            let text = compare(&engine, &queries, Preferences { rating, price }, top);
            print!("{text}");
            if let Some(path) = output {
                write_output(&path, &text)?;
            }
            Ok(())
        }
    }
}

fn write_output(path: &Path, contents: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "output written");
    Ok(())
}

fn render_report(report: &EvaluationReport) -> String {
    let mut out = String::new();
    let k = report.k;
    let _ = writeln!(out, "method: {}  k: {k}", report.method);
    for q in &report.queries {
        let _ = writeln!(
            out,
            "[{}] {:?}: retrieved={} relevant={} P@{k}={:.4} R@{k}={:.4} F1@{k}={:.4} AP={:.4} NDCG@{k}={:.4} RR={:.4}",
            q.query_id, q.query, q.retrieved, q.relevant, q.precision, q.recall, q.f1, q.average_precision, q.ndcg, q.reciprocal_rank,
        );
    }
    let _ = writeln!(out, "MAP={:.4} MRR={:.4} mean NDCG@{k}={:.4}", report.map, report.mrr, report.mean_ndcg);
    out
}

fn compare(engine: &SearchEngine, queries: &[String], prefs: Preferences, top: usize) -> String {
    let mut out = String::new();
    for query in queries {
        let _ = writeln!(out, "=== {query}");
        for method in RankingMethod::ALL {
            if method == RankingMethod::Word2Vec && !engine.has_word_vectors() {
                let _ = writeln!(out, "--- {method}: skipped, no word vectors loaded");
                continue;
            }
            let req = SearchRequest::new(query.as_str(), method).top_n(top).preferences(prefs);
            let hits = engine.search(&req);
            let _ = writeln!(out, "--- {method} ({} shown)", hits.len());
            for hit in hits {
                let title = engine.product(&hit.pid).map(|p| p.title.as_str()).unwrap_or("");
                let _ = writeln!(out, "{} | {:.4} | {}", hit.pid, hit.score, title);
            }
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopsearch_core::{BuildOptions, Corpus, InvertedIndex, Product};

    fn engine() -> SearchEngine {
        let corpus = Corpus::from_products(vec![
            Product { pid: "P1".into(), title: "Red cotton shirt".into(), average_rating: Some(4.0), ..Default::default() },
            Product { pid: "P2".into(), title: "Blue denim jeans".into(), ..Default::default() },
        ]);
        let index = InvertedIndex::build(&corpus, BuildOptions::default());
        SearchEngine::new(corpus, index).unwrap()
    }

    #[test]
    fn comparison_lists_each_method() {
        let text = compare(&engine(), &["red shirt".to_string()], Preferences::default(), 5);
        assert!(text.starts_with("=== red shirt\n"));
        assert!(text.contains("--- tfidf (1 shown)\nP1 | "));
        assert!(text.contains("--- bm25 (1 shown)"));
        assert!(text.contains("--- custom (1 shown)"));
        assert!(text.contains("--- word2vec: skipped"));
        assert!(text.contains("| Red cotton shirt"));
    }

    #[test]
    fn report_has_summary_line() {
        let truth = GroundTruth::parse("query_id,query,pid,label\nq1,red shirt,P1,1\n").unwrap();
        let report = evaluate(&engine(), &truth, RankingMethod::Bm25, 5).unwrap();
        let text = render_report(&report);
        assert!(text.starts_with("method: bm25  k: 5\n"));
        assert!(text.contains("MAP=1.0000 MRR=1.0000"));
    }
}
