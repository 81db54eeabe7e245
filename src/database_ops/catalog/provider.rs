use std::time::Duration;

use anyhow::Result;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::FetchError;

pub const DEFAULT_API_BASE: &str = "https://dummyjson.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

fn truncate_for_log(mut s: String, max_len: usize) -> String {
    if s.len() > max_len {
        let mut cut = max_len;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push('…');
    }
    s
}

/// Catalog API provider (dummyjson-compatible).
///
/// Endpoints:
/// - GET /products/categories - category listing (`[{slug, name, url}]`)
/// - GET /products/category/{slug}?limit=0 - every product of one category (`{products: [...]}`)
///
/// Each request is a single attempt bounded by the client timeout.
#[derive(Debug, Clone)]
pub struct CatalogProvider {
    base_url: String,
    categories_url: String,
    http: Client,
}

impl CatalogProvider {
    pub fn new(base_url: Option<&str>, timeout_secs: Option<u64>) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        let http = Client::builder()
            .user_agent("catalog-sync/0.1")
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self {
            categories_url: format!("{base_url}/products/categories"),
            base_url,
            http,
        })
    }

    /// Override the category listing endpoint (defaults to `{base}/products/categories`).
    pub fn with_categories_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|s| !s.trim().is_empty()) {
            self.categories_url = url;
        }
        self
    }

    pub fn categories_url(&self) -> &str {
        &self.categories_url
    }

    /// Product listing endpoint for one category, page size unlimited.
    pub fn products_url(&self, slug: &str) -> String {
        format!(
            "{}/products/category/{}?limit=0",
            self.base_url,
            urlencoding::encode(slug)
        )
    }

    pub async fn fetch_categories(&self) -> Result<Value, FetchError> {
        self.fetch_json(&self.categories_url).await
    }

    /// GET `url` and decode the body as JSON. Failures are logged with the URL.
    pub async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        let result = self.get_json(url).await;
        match &result {
            Ok(_) => debug!(url, "fetched"),
            Err(err) => warn!(url, error = %err, "fetch failed"),
        }
        result
    }

    async fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        let resp = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::from_request(url, e))?;
        let status = resp.status();

        if !status.is_success() {
            let body = truncate_for_log(resp.text().await.unwrap_or_default(), 500);
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
                body,
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| FetchError::from_request(url, e))?;
        serde_json::from_slice(&bytes).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }
}
