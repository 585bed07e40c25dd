use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use server::rag::{RagConfig, RagGenerator, DISABLED_MESSAGE};
use server::{router, AppState};
use shopsearch_core::persist::{save_index, save_meta, IndexPaths, MetaFile};
use shopsearch_core::{BuildOptions, Corpus, InvertedIndex, SearchEngine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

const BLACK_PANTS: &str = "TKPFWYJ8ZHK3G5FB";
const BLUE_PANTS: &str = "TKPFCZ9EJZV2UVRZ";

fn products_fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../core/tests/fixtures/products.json")
}

fn build_tiny_index(dir: &Path) {
    let corpus = Corpus::load(&products_fixture()).unwrap();
    let index = InvertedIndex::build(&corpus, BuildOptions::default());
    let paths = IndexPaths::new(dir);
    save_index(&paths, &index).unwrap();
    save_meta(&paths, &MetaFile::for_index(&index, "2024-01-01T00:00:00Z")).unwrap();
}

fn app_with(rag: RagConfig) -> Router {
    let dir = tempdir().unwrap();
    build_tiny_index(dir.path());
    let engine = SearchEngine::open(&products_fixture(), dir.path()).unwrap();
    router(AppState::new(engine, RagGenerator::new(rag).unwrap()))
}

fn app() -> Router { app_with(RagConfig::default()) }

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Bytes) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, body)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::get(uri).header("user-agent", "curl/8.4.0").body(Body::empty()).unwrap();
    let (status, body) = send(app, req).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn search_returns_ranked_results() {
    let app = app();
    let (status, json) = get_json(&app, "/search?q=black+track+pants+women&method=bm25&rag=false").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["method"], "bm25");
    assert_eq!(json["total_hits"], 1);
    assert!(json["rag_summary"].is_null());
    let hit = &json["results"][0];
    assert_eq!(hit["pid"], BLACK_PANTS);
    assert_eq!(hit["brand"], "ARBO");
    assert_eq!(hit["detail_url"], format!("/doc/{BLACK_PANTS}"));
    assert!(hit["snippet"].as_str().unwrap().contains("<em>Black</em>"));
}

#[tokio::test]
async fn k_is_clamped_and_unknown_methods_fall_back() {
    let app = app();
    let (_, json) = get_json(&app, "/search?q=track+pants&k=0&method=nonsense&rag=false").await;
    assert_eq!(json["method"], "tfidf");
    assert_eq!(json["total_hits"], 3);
    assert_eq!(json["results"].as_array().unwrap().len(), 1);

    let (_, json) = get_json(&app, "/search?q=the+of&rag=false").await;
    assert_eq!(json["total_hits"], 0);
}

#[tokio::test]
async fn form_search_without_api_key_reports_disabled_rag() {
    let app = app();
    let req = Request::post("/search")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from("search-query=track+pants&ranking-method=custom"))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["method"], "custom");
    assert_eq!(json["results"].as_array().unwrap().len(), 3);
    assert_eq!(json["rag_summary"], DISABLED_MESSAGE);
}

#[tokio::test]
async fn product_detail_records_clicks() {
    let app = app();
    let (status, json) = get_json(&app, &format!("/doc/{BLUE_PANTS}?q=track+pants")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["title"], "Solid Men Blue Track Pants");
    assert_eq!(json["clicks"], 1);
    let (_, json) = get_json(&app, &format!("/doc/{BLUE_PANTS}")).await;
    assert_eq!(json["clicks"], 2);
    get_json(&app, &format!("/doc/{BLACK_PANTS}")).await;

    let (status, _) = get_json(&app, "/doc/NOPE").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, stats) = get_json(&app, "/stats").await;
    let stats = stats.as_array().unwrap();
    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0]["pid"], BLUE_PANTS);
    assert_eq!(stats[0]["count"], 2);
    assert_eq!(stats[1]["count"], 1);
}

#[tokio::test]
async fn dwell_events_feed_the_dashboard() {
    let app = app();
    get_json(&app, "/search?q=track+pants&method=bm25&rag=false").await;
    get_json(&app, "/search?q=Track+Pants&rag=false").await;

    let dwell = |body: Value| {
        Request::post("/dwell").header("content-type", "application/json").body(Body::from(body.to_string())).unwrap()
    };
    assert_eq!(send(&app, dwell(json!({"pid": BLUE_PANTS, "seconds": 12.5}))).await.0, StatusCode::NO_CONTENT);
    assert_eq!(send(&app, dwell(json!({"pid": BLUE_PANTS, "seconds": -1.0}))).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(send(&app, dwell(json!({"pid": "NOPE", "seconds": 3.0}))).await.0, StatusCode::NOT_FOUND);

    let (status, dash) = get_json(&app, "/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dash["total_queries"], 2);
    assert_eq!(dash["total_dwell_events"], 1);
    assert_eq!(dash["top_queries"][0], json!({"key": "track pants", "count": 2}));
    assert_eq!(dash["browsers"][0], json!({"key": "curl", "count": 2}));
    assert_eq!(dash["mean_dwell_s"], 12.5);
}

#[tokio::test]
async fn index_page_and_health() {
    let app = app();
    let (status, body) = send(&app, Request::get("/").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8_lossy(&body).contains("<form id=\"search\">"));
    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

async fn fake_completion(
    State(seen): State<Arc<Mutex<Vec<Value>>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-key") {
        return Err(StatusCode::UNAUTHORIZED);
    }
    seen.lock().push(body);
    Ok(Json(json!({
        "id": "chatcmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "  Go for the ARBO black track pants.\n"}}]
    })))
}

#[tokio::test]
async fn rag_summary_comes_from_the_completion_endpoint() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let stub = Router::new().route("/v1/chat/completions", post(fake_completion)).with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, stub).await.unwrap() });

    let app = app_with(RagConfig {
        api_key: Some("test-key".into()),
        base_url: format!("http://{addr}/v1/"),
        model: "test-model".into(),
        ..Default::default()
    });
    let (_, json) = get_json(&app, "/search?q=black+track+pants+women").await;
    assert_eq!(json["rag_summary"], "Go for the ARBO black track pants.");

    let requests = seen.lock();
    assert_eq!(requests.len(), 1);
    let req = &requests[0];
    assert_eq!(req["model"], "test-model");
    assert_eq!(req["temperature"], 0.5);
    assert_eq!(req["messages"][0]["role"], "system");
    let prompt = req["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.contains(BLACK_PANTS));
    assert!(prompt.contains("black track pants women"));
}

#[tokio::test]
async fn rejected_completion_yields_apology() {
    let seen: Arc<Mutex<Vec<Value>>> = Arc::default();
    let stub = Router::new().route("/chat/completions", post(fake_completion)).with_state(seen);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, stub).await.unwrap() });

    let app = app_with(RagConfig { api_key: Some("wrong".into()), base_url: format!("http://{addr}"), ..Default::default() });
    let (_, json) = get_json(&app, "/search?q=track+pants").await;
    assert_eq!(json["rag_summary"], server::rag::FAILURE_MESSAGE);
}
