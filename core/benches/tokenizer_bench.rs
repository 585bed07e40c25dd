use criterion::{criterion_group, criterion_main, Criterion};
use shopsearch_core::rank::{rank_bm25, rank_tfidf, Bm25Params};
use shopsearch_core::tokenizer::{analyze, tokenize};
use shopsearch_core::{BuildOptions, Corpus, InvertedIndex, MatchMode, Product};

const DESCRIPTION: &str = "Yorker trackpants made from 100% rich combed cotton giving it a rich look. \
Designed for comfort and ease of use, with an elastic waistband and two side pockets. \
Machine wash cold, do not bleach, tumble dry low.";

fn synthetic_corpus(n: usize) -> Corpus {
    let colors = ["black", "blue", "red", "grey", "white", "green"];
    let kinds = ["track pants", "t-shirt", "shorts", "jacket", "kurta"];
    Corpus::from_products((0..n).map(|i| Product {
        pid: format!("P{i:06}"),
        title: format!("Solid Men {} {}", colors[i % colors.len()], kinds[i % kinds.len()]),
        description: Some(DESCRIPTION.to_string()),
        ..Default::default()
    }))
}

fn bench_tokenize(c: &mut Criterion) {
    c.bench_function("tokenize_description", |b| b.iter(|| tokenize(DESCRIPTION)));
}

fn bench_rank(c: &mut Criterion) {
    let corpus = synthetic_corpus(5_000);
    let index = InvertedIndex::build(&corpus, BuildOptions::default());
    let terms = analyze("black cotton track pants");
    c.bench_function("rank_tfidf_5k", |b| b.iter(|| rank_tfidf(&index, &terms, MatchMode::All)));
    c.bench_function("rank_bm25_5k", |b| b.iter(|| rank_bm25(&index, &terms, MatchMode::All, Bm25Params::default())));
}

criterion_group!(benches, bench_tokenize, bench_rank);
criterion_main!(benches);
