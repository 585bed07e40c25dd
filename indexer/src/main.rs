use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use shopsearch_core::persist::{save_index, save_meta, IndexPaths, MetaFile};
use shopsearch_core::product::load_products;
use shopsearch_core::{BuildOptions, Corpus, InvertedIndex, Product};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build the product index and summarize the dataset", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the index blob from product JSON/JSONL files or a directory of them
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output index directory
        #[arg(long)]
        output: String,
        /// Use smoothed IDF = ln(1 + N/df) instead of ln(N/df)
        #[arg(long, default_value_t = false)]
        smoothed_idf: bool,
    },
    /// Print dataset statistics: brands, categories, prices, ratings, vocabulary
    Explore {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Also write the summary as JSON to this file
        #[arg(long)]
        output: Option<String>,
        /// Number of entries in the top brand/term lists
        #[arg(long, default_value_t = 15)]
        top: usize,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { input, output, smoothed_idf } => build_index(&input, &output, smoothed_idf),
        Commands::Explore { input, output, top } => explore(&input, output.as_deref(), top),
    }
}

fn collect_input_files(input_path: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input_path.is_dir() {
        for entry in WalkDir::new(input_path).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input_path.is_file() {
        files.push(input_path.to_path_buf());
    } else {
        bail!("input {} does not exist", input_path.display());
    }
    if files.is_empty() {
        bail!("no .json or .jsonl files under {}", input_path.display());
    }
    Ok(files)
}

fn load_corpus(input: &str) -> Result<Corpus> {
    let mut products: Vec<Product> = Vec::new();
    for file in collect_input_files(Path::new(input))? {
        let before = products.len();
        products.extend(load_products(&file)?);
        tracing::info!(file = %file.display(), products = products.len() - before, "read input file");
    }
    Ok(Corpus::from_products(products))
}

fn build_index(input: &str, output: &str, smoothed_idf: bool) -> Result<()> {
    let start = Instant::now();
    let corpus = load_corpus(input)?;
    tracing::info!(num_docs = corpus.len(), elapsed_s = start.elapsed().as_secs_f64(), "ingested documents");

    let start = Instant::now();
    let index = InvertedIndex::build(&corpus, BuildOptions { smoothed_idf });
    tracing::info!(num_terms = index.num_terms(), avg_doc_len = index.avg_doc_len, elapsed_s = start.elapsed().as_secs_f64(), "index built");

    let out_paths = IndexPaths::new(output);
    fs::create_dir_all(&out_paths.root)?;
    save_index(&out_paths, &index)?;
    let created_at = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "".into());
    save_meta(&out_paths, &MetaFile::for_index(&index, created_at))?;

    tracing::info!(output, "index build complete");
    Ok(())
}

#[derive(Debug, Serialize)]
struct DatasetSummary {
    n_docs: usize,
    n_brands: usize,
    n_categories: usize,
    avg_price: Option<f64>,
    avg_discount: Option<f64>,
    avg_rating: Option<f64>,
    out_of_stock_ratio: f64,
    avg_token_count: f64,
    top_brands: Vec<(String, usize)>,
    top_terms: Vec<(String, usize)>,
}

fn mean(values: impl Iterator<Item = f32>) -> Option<f64> {
    let (sum, n) = values.fold((0.0f64, 0usize), |(s, n), v| (s + v as f64, n + 1));
    (n > 0).then(|| (sum / n as f64 * 100.0).round() / 100.0)
}

fn top_counts(counts: HashMap<String, usize>, top: usize) -> Vec<(String, usize)> {
    let mut v: Vec<(String, usize)> = counts.into_iter().collect();
    v.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    v.truncate(top);
    v
}

fn summarize(corpus: &Corpus, top: usize) -> DatasetSummary {
    let mut brands: HashMap<String, usize> = HashMap::new();
    let mut categories: HashMap<String, usize> = HashMap::new();
    let mut terms: HashMap<String, usize> = HashMap::new();
    let mut tokens = 0usize;
    for p in corpus.iter() {
        if let Some(b) = &p.brand { *brands.entry(b.clone()).or_insert(0) += 1; }
        if let Some(c) = &p.category { *categories.entry(c.clone()).or_insert(0) += 1; }
        let text = p.search_text();
        tokens += text.len();
        for t in text { *terms.entry(t).or_insert(0) += 1; }
    }
    let n = corpus.len();
    let out_of_stock = corpus.iter().filter(|p| p.out_of_stock).count();
    DatasetSummary {
        n_docs: n,
        n_brands: brands.len(),
        n_categories: categories.len(),
        avg_price: mean(corpus.iter().filter_map(|p| p.selling_price)),
        avg_discount: mean(corpus.iter().filter_map(|p| p.discount)),
        avg_rating: mean(corpus.iter().filter_map(|p| p.average_rating)),
        out_of_stock_ratio: if n == 0 { 0.0 } else { ((out_of_stock as f64 / n as f64) * 1000.0).round() / 1000.0 },
        avg_token_count: if n == 0 { 0.0 } else { tokens as f64 / n as f64 },
        top_brands: top_counts(brands, top),
        top_terms: top_counts(terms, top),
    }
}

fn explore(input: &str, output: Option<&str>, top: usize) -> Result<()> {
    let corpus = load_corpus(input)?;
    let summary = summarize(&corpus, top);
    let json = serde_json::to_string_pretty(&summary)?;
    println!("{json}");
    if let Some(path) = output {
        write_summary(Path::new(path), &json)?;
    }
    Ok(())
}

fn write_summary(path: &Path, json: &str) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!(path = %path.display(), "summary written");
    Ok(())
}
