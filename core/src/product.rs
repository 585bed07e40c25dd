use crate::tokenizer::analyze;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A fashion product as found in the dataset, with prices and ratings parsed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub pid: String,
    pub title: String,
    pub description: Option<String>,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub product_details: BTreeMap<String, String>,
    pub seller: Option<String>,
    pub out_of_stock: bool,
    pub selling_price: Option<f32>,
    pub actual_price: Option<f32>,
    /// Percentage, e.g. 69.0 for "69% off".
    pub discount: Option<f32>,
    pub average_rating: Option<f32>,
    pub url: Option<String>,
    pub images: Vec<String>,
}

// Raw dataset row; numbers arrive as "1,499" or "69% off" strings.
#[derive(Debug, Deserialize)]
struct RawProduct {
    pid: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    sub_category: Option<String>,
    #[serde(default)]
    product_details: Value,
    #[serde(default)]
    seller: Option<String>,
    #[serde(default)]
    out_of_stock: Option<bool>,
    #[serde(default)]
    selling_price: Value,
    #[serde(default)]
    actual_price: Value,
    #[serde(default)]
    discount: Value,
    #[serde(default)]
    average_rating: Value,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    images: Vec<String>,
}

impl From<RawProduct> for Product {
    fn from(raw: RawProduct) -> Self {
        Product {
            pid: raw.pid,
            title: raw.title.unwrap_or_default(),
            description: non_blank(raw.description),
            brand: non_blank(raw.brand),
            category: non_blank(raw.category),
            sub_category: non_blank(raw.sub_category),
            product_details: normalize_product_details(&raw.product_details),
            seller: non_blank(raw.seller),
            out_of_stock: raw.out_of_stock.unwrap_or(false),
            selling_price: parse_numeric(&raw.selling_price),
            actual_price: parse_numeric(&raw.actual_price),
            discount: parse_numeric(&raw.discount),
            average_rating: parse_numeric(&raw.average_rating),
            url: non_blank(raw.url),
            images: raw.images,
        }
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

/// Convert values such as `"1,499"` or `"55% off"` into floats.
pub fn parse_numeric(value: &Value) -> Option<f32> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => {
            let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '.').collect();
            if cleaned.is_empty() { return None; }
            cleaned.parse::<f32>().ok()
        }
        _ => None,
    }
}

/// Product details come either as an object or as a list of one-entry objects.
pub fn normalize_product_details(value: &Value) -> BTreeMap<String, String> {
    let mut merged = BTreeMap::new();
    let mut absorb = |obj: &serde_json::Map<String, Value>| {
        for (k, v) in obj {
            if k.is_empty() { continue; }
            let text = match v {
                Value::String(s) => s.clone(),
                Value::Null => continue,
                other => other.to_string(),
            };
            merged.insert(k.clone(), text);
        }
    };
    match value {
        Value::Object(obj) => absorb(obj),
        Value::Array(items) => {
            for item in items {
                if let Value::Object(obj) = item { absorb(obj); }
            }
        }
        _ => {}
    }
    merged
}

impl Product {
    /// Analyzed terms of every searchable field, in indexing order.
    pub fn search_text(&self) -> Vec<String> {
        let mut parts = analyze(&self.title);
        for field in [&self.description, &self.brand, &self.category, &self.sub_category, &self.seller] {
            if let Some(text) = field {
                parts.extend(analyze(text));
            }
        }
        for value in self.product_details.values() {
            parts.extend(analyze(value));
        }
        parts
    }
}

/// Read products from a JSON array, a single JSON object, or JSON Lines (`.jsonl`).
pub fn load_products(path: &Path) -> Result<Vec<Product>> {
    let file = File::open(path).with_context(|| format!("opening dataset {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() { continue; }
            let raw: RawProduct = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid product", path.display(), lineno + 1))?;
            out.push(raw.into());
        }
        return Ok(out);
    }
    let json: Value = serde_json::from_reader(reader)
        .with_context(|| format!("parsing dataset {}", path.display()))?;
    match json {
        Value::Array(arr) => {
            for v in arr {
                let raw: RawProduct = serde_json::from_value(v)?;
                out.push(raw.into());
            }
        }
        Value::Object(_) => {
            let raw: RawProduct = serde_json::from_value(json)?;
            out.push(raw.into());
        }
        _ => bail!("{}: expected a JSON array or object of products", path.display()),
    }
    Ok(out)
}

/// The product collection in dataset order, addressable by pid.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    products: Vec<Product>,
    by_pid: HashMap<String, usize>,
}

impl Corpus {
    pub fn from_products(products: impl IntoIterator<Item = Product>) -> Self {
        let mut corpus = Corpus::default();
        for product in products {
            if corpus.by_pid.contains_key(&product.pid) {
                tracing::warn!(pid = %product.pid, "duplicate pid, keeping first record");
                continue;
            }
            corpus.by_pid.insert(product.pid.clone(), corpus.products.len());
            corpus.products.push(product);
        }
        corpus
    }

    pub fn load(path: &Path) -> Result<Self> {
        let products = load_products(path)?;
        let corpus = Self::from_products(products);
        tracing::info!(path = %path.display(), products = corpus.len(), "corpus loaded");
        Ok(corpus)
    }

    pub fn get(&self, pid: &str) -> Option<&Product> {
        self.by_pid.get(pid).map(|&i| &self.products[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Product> { self.products.iter() }

    pub fn len(&self) -> usize { self.products.len() }

    pub fn is_empty(&self) -> bool { self.products.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_strings_are_cleaned() {
        assert_eq!(parse_numeric(&json!("1,499")), Some(1499.0));
        assert_eq!(parse_numeric(&json!("69% off")), Some(69.0));
        assert_eq!(parse_numeric(&json!("3.9")), Some(3.9));
        assert_eq!(parse_numeric(&json!(4)), Some(4.0));
        assert_eq!(parse_numeric(&json!("")), None);
        assert_eq!(parse_numeric(&json!("n/a")), None);
        assert_eq!(parse_numeric(&Value::Null), None);
    }

    #[test]
    fn detail_lists_are_merged() {
        let details = normalize_product_details(&json!([
            {"Fabric": "Cotton Blend"},
            {"Pattern": "Solid"},
            {"Pockets": 2}
        ]));
        assert_eq!(details.get("Fabric").map(String::as_str), Some("Cotton Blend"));
        assert_eq!(details.get("Pattern").map(String::as_str), Some("Solid"));
        assert_eq!(details.get("Pockets").map(String::as_str), Some("2"));
        assert!(normalize_product_details(&json!("oops")).is_empty());
    }

    #[test]
    fn raw_row_converts() {
        let raw: RawProduct = serde_json::from_value(json!({
            "pid": "TKPFCZ9EA7H5FYZH",
            "title": "Solid Men Multicolor Track Pants",
            "brand": "York",
            "selling_price": "921",
            "actual_price": "2,999",
            "discount": "69% off",
            "average_rating": "3.9",
            "out_of_stock": false,
            "product_details": [{"Fabric": "Cotton Blend"}],
            "seller": ""
        }))
        .unwrap();
        let p: Product = raw.into();
        assert_eq!(p.actual_price, Some(2999.0));
        assert_eq!(p.discount, Some(69.0));
        assert_eq!(p.seller, None);
        let text = p.search_text();
        assert_eq!(&text[..4], &["solid", "men", "multicolor", "track"]);
        assert!(text.contains(&"york".to_string()));
        assert!(text.contains(&"cotton".to_string()));
    }

    #[test]
    fn duplicate_pids_keep_first() {
        let a = Product { pid: "p1".into(), title: "first".into(), ..Default::default() };
        let b = Product { pid: "p1".into(), title: "second".into(), ..Default::default() };
        let corpus = Corpus::from_products(vec![a, b]);
        assert_eq!(corpus.len(), 1);
        assert_eq!(corpus.get("p1").unwrap().title, "first");
    }
}
