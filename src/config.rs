use anyhow::{bail, Context, Result};
use url::Url;

use crate::database_ops::catalog::provider::{DEFAULT_API_BASE, DEFAULT_TIMEOUT_SECS};
use crate::database_ops::catalog::{
    CatalogProvider, SyncOptions, CATEGORIES_COLLECTION, MAX_FETCH_CONCURRENCY,
    PRODUCTS_COLLECTION,
};
use crate::util::env as env_util;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://catalog.db";

/// Startup configuration: endpoints, store location and sync tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    pub api_base: String,
    pub categories_url: Option<String>,
    pub database_url: String,
    pub http_timeout_secs: u64,
    pub fetch_concurrency: usize,
    pub categories_collection: String,
    pub products_collection: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            categories_url: None,
            database_url: DEFAULT_DATABASE_URL.to_string(),
            http_timeout_secs: DEFAULT_TIMEOUT_SECS,
            fetch_concurrency: 1,
            categories_collection: CATEGORIES_COLLECTION.to_string(),
            products_collection: PRODUCTS_COLLECTION.to_string(),
        }
    }
}

impl CatalogConfig {
    /// Read `CATALOG_*` variables (after `.env`), falling back to defaults.
    pub fn from_env() -> Result<Self> {
        env_util::init_env();
        Self::from_lookup(|key| match key {
            "CATALOG_DATABASE_URL" => env_util::env_first(&["CATALOG_DATABASE_URL", "DATABASE_URL"]),
            _ => env_util::env_opt(key),
        })
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_num = |key: &str, default: u64| -> Result<u64> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{key} must be a non-negative integer, got {raw:?}")),
                None => Ok(default),
            }
        };

        let config = Self {
            api_base: lookup("CATALOG_API_BASE").unwrap_or(defaults.api_base),
            categories_url: lookup("CATALOG_CATEGORIES_URL"),
            database_url: lookup("CATALOG_DATABASE_URL").unwrap_or(defaults.database_url),
            http_timeout_secs: parse_num("CATALOG_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs)?,
            fetch_concurrency: parse_num("CATALOG_FETCH_CONCURRENCY", 1)?
                .clamp(1, MAX_FETCH_CONCURRENCY as u64) as usize,
            categories_collection: lookup("CATALOG_CATEGORIES_COLLECTION")
                .unwrap_or(defaults.categories_collection),
            products_collection: lookup("CATALOG_PRODUCTS_COLLECTION")
                .unwrap_or(defaults.products_collection),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_api_base(mut self, api_base: &str) -> Result<Self> {
        self.api_base = api_base.to_string();
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("CATALOG_API_BASE", Some(&self.api_base)),
            ("CATALOG_CATEGORIES_URL", self.categories_url.as_ref()),
        ] {
            let Some(value) = value else { continue };
            let url = Url::parse(value).with_context(|| format!("{key} is not a valid URL"))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!("{key} must be an http(s) URL, got {value}");
            }
        }
        if self.http_timeout_secs == 0 {
            bail!("CATALOG_HTTP_TIMEOUT_SECS must be at least 1");
        }
        Ok(())
    }

    pub fn provider(&self) -> Result<CatalogProvider> {
        Ok(
            CatalogProvider::new(Some(&self.api_base), Some(self.http_timeout_secs))?
                .with_categories_url(self.categories_url.clone()),
        )
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            categories_collection: self.categories_collection.clone(),
            products_collection: self.products_collection.clone(),
            fetch_concurrency: self.fetch_concurrency,
        }
    }

    pub fn log_snapshot(&self) {
        let timeout = self.http_timeout_secs.to_string();
        let concurrency = self.fetch_concurrency.to_string();
        env_util::log_snapshot(
            "catalog-sync",
            &[
                ("api_base", self.api_base.as_str()),
                (
                    "categories_url",
                    self.categories_url.as_deref().unwrap_or("<derived>"),
                ),
                ("database_url", self.database_url.as_str()),
                ("http_timeout_secs", timeout.as_str()),
                ("fetch_concurrency", concurrency.as_str()),
            ],
        );
    }
}
