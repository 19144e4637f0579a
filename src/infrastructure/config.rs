//! Application configuration.
//!
//! One explicit JSON file; every field has a default so a missing file or a
//! partially filled one still yields a runnable configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::info;

/// Complete application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database URL, e.g. `sqlite:pricewatch.db`.
    pub database_url: String,

    /// JSON file with the tracked product URLs.
    pub products_file: String,

    pub supplier: SupplierConfig,
    pub crawling: CrawlingConfig,
    pub logging: LoggingConfig,
}

/// The retailer this instance tracks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupplierConfig {
    pub name: String,
    pub website: String,
}

/// Fetch pacing and retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlingConfig {
    /// Minimum delay between product page fetches in seconds.
    pub scrape_delay_secs: u64,

    /// Maximum fetch attempts per URL.
    pub max_retries: u32,

    /// Fixed delay between fetch attempts in seconds.
    pub retry_delay_secs: u64,

    /// Navigation timeout for product page fetches in seconds.
    pub request_timeout_secs: u64,

    /// Timeout for URL health-check probes in seconds.
    pub health_check_timeout_secs: u64,

    /// Fixed delay between health-check probes in seconds.
    pub health_check_delay_secs: u64,

    pub user_agent: String,
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: String,

    /// Enable console output.
    pub console_output: bool,

    /// Enable file output.
    pub file_output: bool,

    /// Directory for log files.
    pub directory: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:pricewatch.db".to_string(),
            products_file: "products.json".to_string(),
            supplier: SupplierConfig::default(),
            crawling: CrawlingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SupplierConfig {
    fn default() -> Self {
        Self {
            name: "Bunnings".to_string(),
            website: "https://www.bunnings.com.au".to_string(),
        }
    }
}

impl Default for CrawlingConfig {
    fn default() -> Self {
        Self {
            scrape_delay_secs: 3,
            max_retries: 3,
            retry_delay_secs: 5,
            request_timeout_secs: 30,
            health_check_timeout_secs: 10,
            health_check_delay_secs: 1,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: true,
            directory: "logs".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file, falling back to defaults when
    /// the file does not exist.
    pub async fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            info!("Config file {} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in config file: {path}"))?;

        info!("Loaded configuration from {}", path);
        Ok(config)
    }

    /// Write the current configuration back out as pretty JSON.
    pub async fn save(&self, path: &str) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config file: {path}"))?;
        Ok(())
    }
}
