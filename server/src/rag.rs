//! Personal-shopper summaries: the top search results are packed into a
//! prompt and sent to an OpenAI-compatible chat completion endpoint.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use shopsearch_core::Product;
use std::time::Duration;

pub const DISABLED_MESSAGE: &str = "RAG System Disabled: No API Key found.";
pub const FAILURE_MESSAGE: &str = "I'm sorry, I couldn't generate a summary at this moment.";
pub const NO_MATCH_MESSAGE: &str = "I couldn't find any products that perfectly match your request.";

const SYSTEM_MESSAGE: &str = "You are a helpful shopping assistant.";
const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "llama3-8b-8192";
const DESCRIPTION_CHARS: usize = 150;

#[derive(Debug, Clone, PartialEq)]
pub struct RagConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub top_n: usize,
    pub temperature: f32,
    pub timeout_secs: u64,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            top_n: 5,
            temperature: 0.5,
            timeout_secs: 30,
        }
    }
}

fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|n| std::env::var(n).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

impl RagConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: env_any(&["RAG_API_KEY", "GROQ_API_KEY"]),
            base_url: env_any(&["RAG_BASE_URL"]).unwrap_or(defaults.base_url),
            model: env_any(&["RAG_MODEL", "GROQ_MODEL"]).unwrap_or(defaults.model),
            top_n: env_any(&["RAG_TOP_N"]).and_then(|v| v.parse().ok()).unwrap_or(defaults.top_n),
            ..defaults
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

fn or_na<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).filter(|v| !v.is_empty()).unwrap_or_else(|| "N/A".to_string())
}

fn product_line(p: &Product) -> String {
    let details = if p.product_details.is_empty() {
        "N/A".to_string()
    } else {
        p.product_details.iter().map(|(k, v)| format!("{k}: {v}")).collect::<Vec<_>>().join("; ")
    };
    let description: String = p.description.as_deref().unwrap_or("N/A").chars().take(DESCRIPTION_CHARS).collect();
    format!(
        "- {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {} | {}...",
        p.pid,
        p.title,
        or_na(p.selling_price),
        or_na(p.actual_price),
        or_na(p.average_rating),
        or_na(p.brand.as_deref()),
        or_na(p.category.as_deref()),
        or_na(p.seller.as_deref()),
        or_na(p.discount.map(|d| format!("{d}%"))),
        details,
        p.out_of_stock,
        description.replace('\n', " "),
    )
}

pub fn build_prompt(query: &str, products: &[&Product]) -> String {
    let lines: Vec<String> = products.iter().map(|p| product_line(p)).collect();
    format!(
        "You are an expert personal shopper. A customer is looking for fashion products and you \
         have the search engine's top results in front of you.\n\n\
         ## Customer request:\n{query}\n\n\
         ## Retrieved products:\n\
         Format: PID | Title | Selling Price | Actual Price | Rating | Brand | Category | Seller | Discount | Details | Out of Stock | Description\n\
         {products}\n\n\
         ## Instructions:\n\
         1. Analyze the retrieved products against the customer's request.\n\
         2. Recommend the single best product, naming its PID and title.\n\
         3. Explain why it fits, citing price, rating, brand or details.\n\
         4. Mention one alternative if another product is a reasonable choice.\n\
         5. Keep a friendly, helpful tone and be concise.\n\
         6. If no product matches the request, respond exactly with: \"{no_match}\"\n\
         7. Do not recommend products that are out of stock. Answer in plain text without markdown.\n\n\
         ## Recommendation:",
        products = if lines.is_empty() { "(none)".to_string() } else { lines.join("\n") },
        no_match = NO_MATCH_MESSAGE,
    )
}

pub struct RagGenerator {
    client: reqwest::Client,
    config: RagConfig,
}

impl RagGenerator {
    pub fn new(config: RagConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("building LLM http client")?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &RagConfig { &self.config }

    pub fn is_enabled(&self) -> bool { self.config.api_key.is_some() }

    /// Summarize the first `top_n` products for the query. Never fails; errors
    /// are logged and replaced by a fixed apology.
    pub async fn generate(&self, query: &str, products: &[&Product]) -> String {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return DISABLED_MESSAGE.to_string();
        };
        let top = &products[..products.len().min(self.config.top_n)];
        let prompt = build_prompt(query, top);
        match self.complete(api_key, &prompt).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %format!("{err:#}"), model = %self.config.model, "RAG summary failed");
                FAILURE_MESSAGE.to_string()
            }
        }
    }

    async fn complete(&self, api_key: &str, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let req = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: SYSTEM_MESSAGE },
                ChatMessage { role: "user", content: prompt },
            ],
            temperature: self.config.temperature,
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&req)
            .send()
            .await
            .with_context(|| format!("calling {url}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!("chat completion returned {status}: {body}");
        }

        let body: ChatResponse = resp.json().await.context("decoding chat completion")?;
        let text = body.choices.into_iter().next().and_then(|c| c.message.content).unwrap_or_default();
        if text.trim().is_empty() {
            bail!("chat completion had no content");
        }
        Ok(text.trim().to_string())
    }
}
