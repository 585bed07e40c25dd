use shopsearch_core::evaluation::{evaluate, GroundTruth};
use shopsearch_core::persist::{save_index, save_meta, IndexPaths, MetaFile};
use shopsearch_core::{BuildOptions, Corpus, InvertedIndex, RankingMethod, SearchEngine, SearchRequest};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn engine_from_disk(dir: &Path) -> SearchEngine {
    let corpus = Corpus::load(&fixture("products.json")).unwrap();
    let index = InvertedIndex::build(&corpus, BuildOptions::default());
    let paths = IndexPaths::new(dir);
    save_index(&paths, &index).unwrap();
    save_meta(&paths, &MetaFile::for_index(&index, "2024-01-01T00:00:00Z")).unwrap();
    SearchEngine::open(&fixture("products.json"), dir).unwrap()
}

#[test]
fn dataset_fields_are_parsed() {
    let corpus = Corpus::load(&fixture("products.json")).unwrap();
    assert_eq!(corpus.len(), 4);
    let p = corpus.get("TKPFCZ9EA7H5FYZH").unwrap();
    assert_eq!(p.actual_price, Some(2999.0));
    assert_eq!(p.product_details.get("Fabric").map(String::as_str), Some("Cotton Blend"));
    assert_eq!(corpus.get("SHTFWYJ4ZNQWTQHZ").unwrap().average_rating, None);
    assert!(corpus.get("SHTFWYJ4ZNQWTQHZ").unwrap().out_of_stock);
}

#[test]
fn missing_dataset_or_index_is_fatal() {
    let dir = tempdir().unwrap();
    assert!(SearchEngine::open(&fixture("nope.json"), dir.path()).is_err());
    assert!(SearchEngine::open(&fixture("products.json"), dir.path()).is_err());
}

#[test]
fn every_method_finds_the_black_women_pants() {
    let dir = tempdir().unwrap();
    let engine = engine_from_disk(dir.path());
    for method in [RankingMethod::TfIdf, RankingMethod::Bm25, RankingMethod::Custom] {
        let hits = engine.search(&SearchRequest::new("Black track pants for women", method));
        assert_eq!(hits.first().map(|h| h.pid.as_str()), Some("TKPFWYJ8ZHK3G5FB"), "{method}");
    }
}

#[test]
fn evaluation_over_fixture_ground_truth() {
    let dir = tempdir().unwrap();
    let engine = engine_from_disk(dir.path());
    let truth = GroundTruth::load(&fixture("ground_truth.csv")).unwrap();
    let report = evaluate(&engine, &truth, RankingMethod::Bm25, 10).unwrap();
    assert_eq!(report.queries.len(), 2);

    let q1 = &report.queries[0];
    assert_eq!(q1.query_id, "1");
    assert_eq!(q1.reciprocal_rank, 1.0);
    assert!((q1.ndcg - 1.0).abs() < 1e-9);

    // "cotton track pants" matches both cotton track pants and nothing else
    let q2 = &report.queries[1];
    assert_eq!(q2.retrieved, 2);
    assert_eq!(q2.recall, 1.0);
    assert_eq!(q2.precision, 1.0);
    assert!((report.map - 1.0).abs() < 1e-9);
    assert!((report.mrr - 1.0).abs() < 1e-9);
}
