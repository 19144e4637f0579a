//! URL health checking.
//!
//! Runs on its own cadence, independent of collection: probes every stored
//! product URL and feeds corrections back into the product repository.
//! Redirects self-heal, 404s mark the product discontinued, anything else
//! is reported without mutation. Price history is never deleted.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use url::Url;

use crate::domain::product::ProductIdentity;
use crate::domain::report::{HealthReport, UrlIssue, UrlIssueKind};
use crate::infrastructure::page_fetcher::PageFetcher;
use crate::infrastructure::product_repository::ProductRepository;

pub struct UrlMonitor {
    fetcher: Arc<dyn PageFetcher>,
    products: ProductRepository,
    check_delay: Duration,
}

impl UrlMonitor {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        products: ProductRepository,
        check_delay: Duration,
    ) -> Self {
        Self {
            fetcher,
            products,
            check_delay,
        }
    }

    /// Check every stored product URL and apply corrections.
    pub async fn run_health_check(&self) -> Result<HealthReport> {
        let identities = self.products.find_all().await?;
        info!("Starting URL health check for {} products", identities.len());
        let mut report = HealthReport::new(identities.len());

        for (index, identity) in identities.iter().enumerate() {
            info!(
                "Checking {}/{}: {}",
                index + 1,
                identities.len(),
                identity.name
            );

            match self.fetcher.check_url(&identity.product_url).await {
                Ok(status) => {
                    self.classify_and_apply(identity, &status.final_url, status.status_code, &mut report)
                        .await?;
                }
                Err(e) => {
                    warn!("Error checking {}: {:#}", identity.product_url, e);
                    report.record_issue(UrlIssue {
                        product_id: identity.id,
                        product_name: identity.name.clone(),
                        sku: identity.sku.clone(),
                        kind: UrlIssueKind::Error,
                        detail: format!("{e:#}"),
                    });
                }
            }

            // Spread the probes out; this checker talks to the same host
            // the collector scrapes.
            if index + 1 < identities.len() {
                sleep(self.check_delay).await;
            }
        }

        info!(
            "URL health check complete: {} active, {} redirected, {} not found, {} errors",
            report.active, report.redirected, report.not_found, report.errors
        );
        Ok(report)
    }

    async fn classify_and_apply(
        &self,
        identity: &ProductIdentity,
        final_url: &str,
        status_code: u16,
        report: &mut HealthReport,
    ) -> Result<()> {
        if urls_differ(final_url, &identity.product_url) {
            warn!(
                "URL redirected: {} -> {}",
                identity.product_url, final_url
            );
            // Auto-correct so the next collection run uses the new URL.
            self.products.update_url(identity.id, final_url).await?;
            report.record_issue(UrlIssue {
                product_id: identity.id,
                product_name: identity.name.clone(),
                sku: identity.sku.clone(),
                kind: UrlIssueKind::Redirect,
                detail: format!("{} -> {}", identity.product_url, final_url),
            });
        } else if status_code == 200 {
            report.active += 1;
        } else if status_code == 404 {
            warn!("Product not found (404): {}", identity.product_url);
            self.products.mark_discontinued(identity.id).await?;
            report.record_issue(UrlIssue {
                product_id: identity.id,
                product_name: identity.name.clone(),
                sku: identity.sku.clone(),
                kind: UrlIssueKind::NotFound,
                detail: identity.product_url.clone(),
            });
        } else {
            warn!(
                "Unexpected status {} for {}",
                status_code, identity.product_url
            );
            report.record_issue(UrlIssue {
                product_id: identity.id,
                product_name: identity.name.clone(),
                sku: identity.sku.clone(),
                kind: UrlIssueKind::Error,
                detail: format!("HTTP {status_code}"),
            });
        }
        Ok(())
    }

    /// Products whose metadata has not moved in `days` days; their URLs
    /// are the first candidates for a health check.
    pub async fn find_stale(&self, days: i64) -> Result<Vec<ProductIdentity>> {
        let stale = self.products.find_stale(days).await?;
        info!("Found {} products not updated in {} days", stale.len(), days);
        Ok(stale)
    }
}

/// Compare parsed URLs so cosmetic differences (trailing slash on a bare
/// host, default ports) do not read as redirects.
fn urls_differ(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => a != b,
        _ => a != b,
    }
}
