//! The collection pipeline.
//!
//! Drives fetch -> extract -> resolve -> store for an ordered list of
//! product URLs, one item at a time. Failures are classified and
//! aggregated per item; nothing a single page does can abort the run.

use anyhow::{Context, Result};
use scraper::Html;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::domain::report::{CollectionReport, ItemOutcome};
use crate::infrastructure::config::{CrawlingConfig, SupplierConfig};
use crate::infrastructure::html_parser::{ExtractedSnapshot, SnapshotExtractor};
use crate::infrastructure::page_fetcher::PageFetcher;
use crate::infrastructure::price_repository::PriceRepository;
use crate::infrastructure::product_repository::{ObservedProduct, ProductRepository};
use crate::infrastructure::rate_limiter::RateLimiter;

/// One tracked product entry in the products file. Only the URL matters to
/// the pipeline; the name is operator documentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductEntry {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProductsFile {
    #[serde(default)]
    products: Vec<ProductEntry>,
}

pub struct Collector {
    fetcher: Arc<dyn PageFetcher>,
    rate_limiter: RateLimiter,
    extractor: SnapshotExtractor,
    products: ProductRepository,
    prices: PriceRepository,
    supplier: SupplierConfig,
    interrupted: Arc<AtomicBool>,
}

impl Collector {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: SnapshotExtractor,
        products: ProductRepository,
        prices: PriceRepository,
        supplier: SupplierConfig,
        crawling: &CrawlingConfig,
    ) -> Self {
        Self {
            fetcher,
            rate_limiter: RateLimiter::new(Duration::from_secs(crawling.scrape_delay_secs)),
            extractor,
            products,
            prices,
            supplier,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between items; lets a ctrl-c finish the current item
    /// cleanly instead of tearing the run down mid-transaction.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// Collect every URL in order, returning the aggregated run report.
    pub async fn collect_products(&mut self, urls: &[String]) -> CollectionReport {
        info!("Starting collection for {} products", urls.len());
        let mut report = CollectionReport::new(urls.len());

        for (index, url) in urls.iter().enumerate() {
            if self.interrupted.load(Ordering::Relaxed) {
                warn!(
                    "Interrupted, stopping after {}/{} items",
                    index,
                    urls.len()
                );
                break;
            }

            info!("Processing product {}/{}", index + 1, urls.len());
            self.rate_limiter.await_turn().await;

            let html = match self.fetcher.fetch_page(url, None).await {
                Ok(html) => html,
                Err(e) => {
                    warn!("Failed to fetch {}: {:#}", url, e);
                    report.record_failure(url, ItemOutcome::FetchFailed, format!("Fetch failed: {e:#}"));
                    continue;
                }
            };

            // Html is parsed and consumed inside this block: the document
            // type is not Send and must not be held across an await.
            let extracted = {
                let document = Html::parse_document(&html);
                self.extractor
                    .extract_snapshot(&document, url, &self.supplier.name)
            };

            let ExtractedSnapshot {
                snapshot,
                degraded_fields,
            } = match extracted {
                Ok(extracted) => extracted,
                Err(e) => {
                    warn!("Failed to extract {}: {}", url, e);
                    report.record_failure(
                        url,
                        ItemOutcome::ExtractionFailed,
                        format!("Extraction failed: {e}"),
                    );
                    continue;
                }
            };

            if !degraded_fields.is_empty() {
                warn!(
                    "Degraded extraction for {}: {} defaulted",
                    url,
                    degraded_fields.join(", ")
                );
            }

            let ambiguous = snapshot.has_ambiguous_sku();
            if ambiguous {
                warn!(
                    "SKU could not be determined for {}; identity resolution is best-effort",
                    url
                );
            }

            match self.store_snapshot(&snapshot).await {
                Ok(()) => {
                    info!("Saved: {} ({})", snapshot.name, snapshot.price);
                    report.record_success(ambiguous);
                }
                Err(e) => {
                    warn!("Failed to store {}: {:#}", url, e);
                    report.record_failure(
                        url,
                        ItemOutcome::StoreFailed,
                        format!("Database save failed: {e:#}"),
                    );
                }
            }
        }

        info!(
            "Collection complete: {}/{} successful ({} ambiguous, {} failed)",
            report.successful, report.total, report.ambiguous, report.failed
        );
        report
    }

    /// Run collection over the URLs in a products JSON file of the form
    /// `{"products": [{"url": "...", "name": "..."}]}`.
    pub async fn collect_from_file(&mut self, path: &str) -> Result<CollectionReport> {
        info!("Loading products from {}", path);
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Product list file not found: {path}"))?;
        let file: ProductsFile = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in {path}"))?;

        let urls: Vec<String> = file.products.into_iter().map(|p| p.url).collect();
        Ok(self.collect_products(&urls).await)
    }

    async fn store_snapshot(&self, snapshot: &crate::domain::ProductSnapshot) -> Result<()> {
        let supplier = self
            .products
            .get_or_create_supplier(&self.supplier.name, &self.supplier.website)
            .await?;

        let identity = self
            .products
            .resolve(
                supplier.id,
                &ObservedProduct {
                    sku: &snapshot.sku,
                    name: &snapshot.name,
                    category: snapshot.category.as_deref(),
                    unit: &snapshot.unit,
                    url: &snapshot.url,
                },
            )
            .await?;

        self.prices
            .append(
                identity.id,
                supplier.id,
                snapshot.price,
                snapshot.in_stock,
                &snapshot.attributes,
                snapshot.captured_at,
            )
            .await?;

        Ok(())
    }
}

/// Write a starter products file for the operator to edit.
pub async fn write_example_products_file(path: &str) -> Result<()> {
    let example = ProductsFile {
        products: vec![
            ProductEntry {
                url: "https://www.bunnings.com.au/ecoply-2400-x-1200mm-9mm-plywood-pine-structural-cd-grade_p0340162".to_string(),
                name: Some("Ecoply 9mm Plywood".to_string()),
            },
            ProductEntry {
                url: "https://www.bunnings.com.au/2440-x-1220mm-3mm-plywood-pine-premium-bc-grade_p0340267".to_string(),
                name: Some("3mm Pine Plywood".to_string()),
            },
        ],
    };
    let content = serde_json::to_string_pretty(&example)?;
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("Failed to write {path}"))?;
    info!("Created example products file: {}", path);
    Ok(())
}
