//! In-memory analytics: fact tables for queries, clicks and dwell time, plus
//! the aggregates shown on the dashboard. Nothing is persisted.

use axum::http::HeaderMap;
use parking_lot::RwLock;
use serde::Serialize;
use sha1::{Digest, Sha1};
use shopsearch_core::RankingMethod;
use std::collections::HashMap;
use time::OffsetDateTime;

#[derive(Debug, Clone, Serialize)]
pub struct QueryEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub query: String,
    pub session_id: String,
    pub browser: String,
    pub os: String,
    pub ip_address: String,
    pub ranking_method: RankingMethod,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClickEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub pid: String,
    pub related_query: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DwellEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub pid: String,
    pub seconds: f64,
    pub session_id: String,
}

/// Who sent a request, as far as the headers tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

impl ClientInfo {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim);
        let ip = header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| header("x-real-ip"))
            .unwrap_or("unknown")
            .to_string();
        let user_agent = header("user-agent").unwrap_or("").to_string();
        Self { ip, user_agent }
    }

    /// First 16 hex digits of SHA-1(ip | user agent).
    pub fn session_id(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.ip.as_bytes());
        hasher.update(b"|");
        hasher.update(self.user_agent.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }

    pub fn browser(&self) -> &'static str { browser_name(&self.user_agent) }

    pub fn os(&self) -> &'static str { os_name(&self.user_agent) }
}

pub fn browser_name(ua: &str) -> &'static str {
    if ua.is_empty() {
        "Unknown"
    } else if ua.contains("Edg/") {
        "Edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        "Opera"
    } else if ua.contains("Firefox/") || ua.contains("FxiOS/") {
        "Firefox"
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        "Chrome"
    } else if ua.contains("Safari/") {
        "Safari"
    } else if ua.starts_with("curl/") {
        "curl"
    } else {
        "Other"
    }
}

pub fn os_name(ua: &str) -> &'static str {
    // Android UAs also mention Linux; iOS UAs also mention Mac OS X.
    if ua.contains("Windows") {
        "Windows"
    } else if ua.contains("Android") {
        "Android"
    } else if ua.contains("iPhone") || ua.contains("iPad") {
        "iOS"
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        "macOS"
    } else if ua.contains("Linux") {
        "Linux"
    } else {
        "Unknown"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountEntry {
    pub key: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub total_queries: usize,
    pub total_clicks: usize,
    pub total_dwell_events: usize,
    pub top_queries: Vec<CountEntry>,
    pub ranking_methods: Vec<CountEntry>,
    pub browsers: Vec<CountEntry>,
    pub operating_systems: Vec<CountEntry>,
    pub top_clicked: Vec<CountEntry>,
    pub clicks_per_minute: Vec<CountEntry>,
    pub dwell_histogram: Vec<HistogramBin>,
    pub mean_dwell_s: Option<f64>,
}

const TOP_N: usize = 10;
const DWELL_BINS: usize = 20;

fn ranked_counts<'a>(keys: impl Iterator<Item = &'a str>, limit: Option<usize>) -> Vec<CountEntry> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for k in keys {
        *counts.entry(k).or_insert(0) += 1;
    }
    let mut out: Vec<CountEntry> = counts.into_iter().map(|(key, count)| CountEntry { key: key.to_string(), count }).collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    if let Some(limit) = limit {
        out.truncate(limit);
    }
    out
}

pub fn histogram(values: &[f64], bins: usize) -> Vec<HistogramBin> {
    let (Some(min), Some(max)) = (
        values.iter().copied().reduce(f64::min),
        values.iter().copied().reduce(f64::max),
    ) else {
        return Vec::new();
    };
    if bins == 0 { return Vec::new(); }
    if max == min {
        return vec![HistogramBin { start: min, end: max, count: values.len() }];
    }
    let width = (max - min) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin { start: min + width * i as f64, end: min + width * (i + 1) as f64, count: 0 })
        .collect();
    for v in values {
        let i = (((v - min) / width) as usize).min(bins - 1);
        out[i].count += 1;
    }
    out
}

#[derive(Default)]
pub struct AnalyticsData {
    queries: RwLock<Vec<QueryEvent>>,
    clicks: RwLock<Vec<ClickEvent>>,
    dwell: RwLock<Vec<DwellEvent>>,
}

impl AnalyticsData {
    pub fn new() -> Self { Self::default() }

    pub fn record_query(&self, query: &str, method: RankingMethod, client: &ClientInfo) {
        let event = QueryEvent {
            timestamp: OffsetDateTime::now_utc(),
            query: query.trim().to_string(),
            session_id: client.session_id(),
            browser: client.browser().to_string(),
            os: client.os().to_string(),
            ip_address: client.ip.clone(),
            ranking_method: method,
        };
        tracing::info!(query = %event.query, method = %method, session = %event.session_id, browser = %event.browser, "query logged");
        self.queries.write().push(event);
    }

    pub fn record_click(&self, pid: &str, related_query: Option<&str>) {
        let event = ClickEvent {
            timestamp: OffsetDateTime::now_utc(),
            pid: pid.to_string(),
            related_query: related_query.map(str::trim).filter(|q| !q.is_empty()).map(str::to_string),
        };
        tracing::info!(pid, related_query = ?event.related_query, "click logged");
        self.clicks.write().push(event);
    }

    pub fn record_dwell(&self, pid: &str, seconds: f64, client: &ClientInfo) {
        let event = DwellEvent { timestamp: OffsetDateTime::now_utc(), pid: pid.to_string(), seconds, session_id: client.session_id() };
        tracing::info!(pid, seconds, "dwell time logged");
        self.dwell.write().push(event);
    }

    pub fn queries(&self) -> Vec<QueryEvent> { self.queries.read().clone() }

    pub fn clicks(&self) -> Vec<ClickEvent> { self.clicks.read().clone() }

    /// Clicks per pid, most clicked first.
    pub fn click_counts(&self) -> Vec<CountEntry> {
        let clicks = self.clicks.read();
        ranked_counts(clicks.iter().map(|c| c.pid.as_str()), None)
    }

    pub fn click_count(&self, pid: &str) -> usize { self.clicks.read().iter().filter(|c| c.pid == pid).count() }

    pub fn dashboard(&self) -> Dashboard {
        let queries = self.queries.read();
        let clicks = self.clicks.read();
        let dwell = self.dwell.read();

        let normalized: Vec<String> = queries.iter().map(|q| q.query.to_lowercase()).collect();
        let minute = time::macros::format_description!("[hour]:[minute]");
        let minutes: Vec<String> = clicks.iter().filter_map(|c| c.timestamp.format(&minute).ok()).collect();
        let mut clicks_per_minute = ranked_counts(minutes.iter().map(String::as_str), None);
        clicks_per_minute.sort_by(|a, b| a.key.cmp(&b.key));

        let seconds: Vec<f64> = dwell.iter().map(|d| d.seconds).collect();
        let mean_dwell_s = (!seconds.is_empty()).then(|| seconds.iter().sum::<f64>() / seconds.len() as f64);

        Dashboard {
            total_queries: queries.len(),
            total_clicks: clicks.len(),
            total_dwell_events: dwell.len(),
            top_queries: ranked_counts(normalized.iter().map(String::as_str), Some(TOP_N)),
            ranking_methods: ranked_counts(queries.iter().map(|q| q.ranking_method.as_str()), None),
            browsers: ranked_counts(queries.iter().map(|q| q.browser.as_str()), None),
            operating_systems: ranked_counts(queries.iter().map(|q| q.os.as_str()), None),
            top_clicked: ranked_counts(clicks.iter().map(|c| c.pid.as_str()), Some(TOP_N)),
            clicks_per_minute,
            dwell_histogram: histogram(&seconds, DWELL_BINS),
            mean_dwell_s,
        }
    }
}
