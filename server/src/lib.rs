pub mod analytics;
pub mod rag;

use analytics::{AnalyticsData, ClientInfo, Dashboard};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Html,
    routing::{get, post},
    Form, Json, Router,
};
use rag::{RagConfig, RagGenerator};
use serde::{Deserialize, Serialize};
use shopsearch_core::embeddings::WordVectors;
use shopsearch_core::{BuildOptions, Corpus, InvertedIndex, MatchMode, Preferences, Product, RankingMethod, SearchEngine, SearchRequest};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Where the server finds its data and how it prepares the engine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data: PathBuf,
    pub index_dir: PathBuf,
    /// Build the index in memory from `data` instead of loading `index_dir`.
    pub build_index: bool,
    pub word2vec: Option<PathBuf>,
    pub word2vec_limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default)]
    pub mode: Option<MatchMode>,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub price: Option<f32>,
    #[serde(default = "default_rag")]
    pub rag: bool,
}
fn default_k() -> usize { 20 }
fn default_rag() -> bool { true }

/// The search page form.
#[derive(Deserialize)]
pub struct SearchForm {
    #[serde(rename = "search-query")]
    pub query: String,
    #[serde(rename = "ranking-method", default)]
    pub method: Option<String>,
}

impl From<SearchForm> for SearchParams {
    fn from(form: SearchForm) -> Self {
        Self { q: form.query, method: form.method, k: default_k(), mode: None, rating: None, price: None, rag: default_rag() }
    }
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub method: RankingMethod,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
    pub rag_summary: Option<String>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub pid: String,
    pub score: f32,
    pub title: String,
    pub brand: Option<String>,
    pub selling_price: Option<f32>,
    pub actual_price: Option<f32>,
    pub discount: Option<f32>,
    pub average_rating: Option<f32>,
    pub out_of_stock: bool,
    pub detail_url: String,
    pub product_url: Option<String>,
    pub snippet: Option<String>,
}

#[derive(Deserialize)]
pub struct DocParams {
    #[serde(default)]
    pub q: Option<String>,
}

#[derive(Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub clicks: usize,
}

#[derive(Deserialize)]
pub struct DwellParams {
    pub pid: String,
    pub seconds: f64,
}

#[derive(Serialize)]
pub struct ClickStat {
    pub pid: String,
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub count: usize,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub analytics: Arc<AnalyticsData>,
    pub rag: Arc<RagGenerator>,
}

impl AppState {
    pub fn new(engine: SearchEngine, rag: RagGenerator) -> Self {
        Self { engine: Arc::new(engine), analytics: Arc::new(AnalyticsData::new()), rag: Arc::new(rag) }
    }
}

pub fn load_engine(config: &ServerConfig) -> Result<SearchEngine> {
    let engine = if config.build_index {
        let corpus = Corpus::load(&config.data)?;
        let start = Instant::now();
        let index = InvertedIndex::build(&corpus, BuildOptions::default());
        tracing::info!(num_docs = index.num_docs, num_terms = index.num_terms(), elapsed_s = start.elapsed().as_secs_f64(), "index built in memory");
        SearchEngine::new(corpus, index)?
    } else {
        SearchEngine::open(&config.data, &config.index_dir)?
    };

    let Some(path) = &config.word2vec else { return Ok(engine) };
    if !path.is_file() {
        tracing::warn!(path = %path.display(), "word2vec model not found; word2vec ranking falls back to tfidf");
        return Ok(engine);
    }
    match WordVectors::load_word2vec_binary(path, config.word2vec_limit) {
        Ok(model) => Ok(engine.with_word_vectors(model)),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "could not load word2vec model; word2vec ranking falls back to tfidf");
            Ok(engine)
        }
    }
}

pub fn build_app(config: &ServerConfig) -> Result<Router> {
    let engine = load_engine(config)?;
    let rag = RagGenerator::new(RagConfig::from_env())?;
    if !rag.is_enabled() {
        tracing::warn!("no RAG_API_KEY/GROQ_API_KEY set; RAG summaries disabled");
    }
    Ok(router(AppState::new(engine, rag)))
}

fn cors_layer() -> CorsLayer {
    // CORS_ALLOW_ORIGIN is a comma-separated list; unset or unparsable means any origin
    let origins: Vec<_> = std::env::var("CORS_ALLOW_ORIGIN")
        .map(|val| val.split(',').filter_map(|s| s.trim().parse().ok()).collect())
        .unwrap_or_default();
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler).post(search_form_handler))
        .route("/doc/:pid", get(doc_handler))
        .route("/dwell", post(dwell_handler))
        .route("/stats", get(stats_handler))
        .route("/dashboard", get(dashboard_handler))
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

async fn index_page() -> Html<&'static str> { Html(include_str!("../static/index.html")) }

pub async fn search_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Json<SearchResponse> {
    Json(run_search(&state, &headers, params).await)
}

pub async fn search_form_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<SearchForm>,
) -> Json<SearchResponse> {
    Json(run_search(&state, &headers, form.into()).await)
}

async fn run_search(state: &AppState, headers: &HeaderMap, params: SearchParams) -> SearchResponse {
    let start = Instant::now();
    let method = params.method.as_deref().map(RankingMethod::parse_lenient).unwrap_or_default();
    let client = ClientInfo::from_headers(headers);
    state.analytics.record_query(&params.q, method, &client);

    let k = params.k.clamp(1, 100);
    let req = SearchRequest::new(params.q.clone(), method)
        .top_n(k)
        .mode(params.mode.unwrap_or_default())
        .preferences(Preferences { rating: params.rating, price: params.price });
    let engine = &state.engine;
    let scored = engine.rank(&req);
    let total_hits = scored.len();

    let raw_terms: Vec<String> = params.q.split_whitespace().map(|s| s.to_string()).collect();
    let mut products: Vec<&Product> = Vec::new();
    let mut results: Vec<SearchHit> = Vec::new();
    for s in scored.into_iter().take(k) {
        let Some(product) = engine.index().doc(s.doc_id).and_then(|meta| engine.product(&meta.pid)) else { continue };
        results.push(SearchHit {
            pid: product.pid.clone(),
            score: s.score,
            title: product.title.clone(),
            brand: product.brand.clone(),
            selling_price: product.selling_price,
            actual_price: product.actual_price,
            discount: product.discount,
            average_rating: product.average_rating,
            out_of_stock: product.out_of_stock,
            detail_url: format!("/doc/{}", product.pid),
            product_url: product.url.clone(),
            snippet: product.description.as_deref().and_then(|d| snippet_from_text(d, &raw_terms)),
        });
        products.push(product);
    }
    let took_s = start.elapsed().as_secs_f64();
    tracing::info!(query = %params.q, %method, total_hits, took_s, "search served");

    let rag_summary = if params.rag { Some(state.rag.generate(&params.q, &products).await) } else { None };
    SearchResponse { query: params.q, method, took_s, total_hits, results, rag_summary }
}

pub async fn doc_handler(
    State(state): State<AppState>,
    Path(pid): Path<String>,
    Query(params): Query<DocParams>,
) -> Result<Json<ProductDetail>, (StatusCode, String)> {
    let product = state.engine.product(&pid).ok_or_else(|| (StatusCode::NOT_FOUND, format!("unknown product {pid}")))?;
    state.analytics.record_click(&pid, params.q.as_deref());
    Ok(Json(ProductDetail { product: product.clone(), clicks: state.analytics.click_count(&pid) }))
}

pub async fn dwell_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<DwellParams>,
) -> Result<StatusCode, (StatusCode, String)> {
    if !params.seconds.is_finite() || params.seconds < 0.0 {
        return Err((StatusCode::BAD_REQUEST, "seconds must be a non-negative number".into()));
    }
    if state.engine.product(&params.pid).is_none() {
        return Err((StatusCode::NOT_FOUND, format!("unknown product {}", params.pid)));
    }
    state.analytics.record_dwell(&params.pid, params.seconds, &ClientInfo::from_headers(&headers));
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats_handler(State(state): State<AppState>) -> Json<Vec<ClickStat>> {
    let stats = state
        .analytics
        .click_counts()
        .into_iter()
        .filter_map(|c| {
            let p = state.engine.product(&c.key)?;
            Some(ClickStat { pid: c.key, title: p.title.clone(), description: p.description.clone(), url: p.url.clone(), count: c.count })
        })
        .collect();
    Json(stats)
}

pub async fn dashboard_handler(State(state): State<AppState>) -> Json<Dashboard> { Json(state.analytics.dashboard()) }

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// Roughly 300 characters around the first query term, HTML-escaped, with
/// matches wrapped in `<em>`.
fn snippet_from_text(text: &str, raw_terms: &[String]) -> Option<String> {
    if text.trim().is_empty() { return None; }
    let chars: Vec<char> = text.chars().collect();
    let lower = text.to_lowercase();
    let first_idx = raw_terms
        .iter()
        .filter(|t| !t.trim().is_empty())
        .find_map(|t| lower.find(&t.to_lowercase()))
        .map(|byte_idx| lower[..byte_idx].chars().count());
    let (start, end) = match first_idx {
        Some(idx) => (idx.saturating_sub(100), (idx + 200).min(chars.len())),
        None => (0, chars.len().min(200)),
    };
    let snippet: String = chars[start.min(end)..end].iter().collect();
    Some(highlight_terms(&snippet, raw_terms))
}

/// Wrap case-insensitive matches of any term in `<em>` and HTML-escape the
/// rest. Matching runs on the raw text so markup is never matched.
fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    let mut alternatives: Vec<&str> = terms.iter().map(|t| t.trim()).filter(|t| !t.is_empty()).collect();
    // longest first so "pants" wins over "pant"
    alternatives.sort_by(|a, b| b.len().cmp(&a.len()));
    let pattern = alternatives.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    if pattern.is_empty() { return html_escape(snippet); }
    let Ok(pat) = regex::RegexBuilder::new(&pattern).case_insensitive(true).build() else { return html_escape(snippet) };

    let mut out = String::with_capacity(snippet.len() + 16);
    let mut last = 0;
    for m in pat.find_iter(snippet) {
        out.push_str(&html_escape(&snippet[last..m.start()]));
        out.push_str("<em>");
        out.push_str(&html_escape(m.as_str()));
        out.push_str("</em>");
        last = m.end();
    }
    out.push_str(&html_escape(&snippet[last..]));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_highlights_and_escapes() {
        let s = snippet_from_text("Soft <b>cotton</b> track pants", &["Cotton".to_string()]).unwrap();
        assert_eq!(s, "Soft &lt;b&gt;<em>cotton</em>&lt;/b&gt; track pants");
    }

    #[test]
    fn markup_words_in_the_query_do_not_break_escaping() {
        let terms: Vec<String> = ["em", "lt", "amp", "&"].iter().map(|t| t.to_string()).collect();
        let s = snippet_from_text("Tee <b> & emblem", &terms).unwrap();
        assert_eq!(s, "Tee &lt;b&gt; <em>&amp;</em> <em>em</em>bl<em>em</em>");
        let s = snippet_from_text("Stitched pants", &["pant".to_string(), "pants".to_string()]).unwrap();
        assert_eq!(s, "Stitched <em>pants</em>");
    }

    #[test]
    fn snippet_windows_long_text_on_char_boundaries() {
        let text = format!("{}needle{}", "é".repeat(150), "ü".repeat(300));
        let s = snippet_from_text(&text, &["needle".to_string()]).unwrap();
        assert!(s.contains("<em>needle</em>"));
        assert_eq!(s.replace("<em>", "").replace("</em>", "").chars().count(), 300);
        assert!(snippet_from_text("   ", &[]).is_none());
    }

    #[test]
    fn form_maps_to_default_params() {
        let p: SearchParams = SearchForm { query: "red shirt".into(), method: Some("bm25".into()) }.into();
        assert_eq!(p.k, 20);
        assert!(p.rag);
        assert_eq!(p.method.as_deref(), Some("bm25"));
    }
}
