//! End-to-end tests over a real SQLite database: identity resolution,
//! price history, change detection, and the collection / health-check
//! pipelines driven through a stub fetcher.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use pricewatch::application::collector::Collector;
use pricewatch::application::url_monitor::UrlMonitor;
use pricewatch::domain::product::DISCONTINUED_MARKER;
use pricewatch::domain::report::ItemOutcome;
use pricewatch::infrastructure::config::{CrawlingConfig, SupplierConfig};
use pricewatch::infrastructure::database_connection::DatabaseConnection;
use pricewatch::infrastructure::html_parser::SnapshotExtractor;
use pricewatch::infrastructure::page_fetcher::{PageFetcher, UrlStatus};
use pricewatch::infrastructure::price_repository::PriceRepository;
use pricewatch::infrastructure::product_repository::{ObservedProduct, ProductRepository};

async fn test_repositories() -> Result<(TempDir, ProductRepository, PriceRepository)> {
    let dir = tempfile::tempdir()?;
    let database_url = format!("sqlite:{}", dir.path().join("test.db").display());
    let db = DatabaseConnection::new(&database_url).await?;
    db.migrate().await?;
    let pool = Arc::new(db.pool().clone());
    Ok((
        dir,
        ProductRepository::new(Arc::clone(&pool)),
        PriceRepository::new(pool),
    ))
}

fn observed<'a>(sku: &'a str, name: &'a str, url: &'a str) -> ObservedProduct<'a> {
    ObservedProduct {
        sku,
        name,
        category: Some("Timber"),
        unit: "per sheet",
        url,
    }
}

#[tokio::test]
async fn resolve_is_idempotent_for_identical_attributes() -> Result<()> {
    let (_dir, products, _prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;

    let first = products
        .resolve(supplier.id, &observed("340162", "Plywood 9mm", "https://example.com/a"))
        .await?;
    let stored = products.find_by_sku(supplier.id, "340162").await?.unwrap();
    let second = products
        .resolve(supplier.id, &observed("340162", "Plywood 9mm", "https://example.com/a"))
        .await?;

    assert_eq!(first.id, second.id);
    assert_eq!(stored.last_updated, second.last_updated);
    assert_eq!(products.find_all().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn suppliers_are_deactivated_never_deleted() -> Result<()> {
    let (_dir, products, _prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    assert!(supplier.active);

    products.deactivate_supplier(supplier.id).await?;

    let reloaded = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    assert_eq!(reloaded.id, supplier.id);
    assert!(!reloaded.active);
    Ok(())
}

#[tokio::test]
async fn rename_updates_metadata_but_history_stays_attached() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let attrs = serde_json::Map::new();

    // First observation: "Plywood 9mm" at 45.98.
    let identity = products
        .resolve(supplier.id, &observed("340162", "Plywood 9mm", "https://example.com/a"))
        .await?;
    prices
        .append(identity.id, supplier.id, 45.98, true, &attrs, Utc::now() - ChronoDuration::hours(1))
        .await?;

    // Later observation: renamed, repriced.
    let updated = products
        .resolve(
            supplier.id,
            &observed("340162", "Plywood 9mm Structural", "https://example.com/a"),
        )
        .await?;
    prices
        .append(updated.id, supplier.id, 47.50, true, &attrs, Utc::now())
        .await?;

    // One identity, new name, both observations on it.
    assert_eq!(identity.id, updated.id);
    assert_eq!(updated.name, "Plywood 9mm Structural");
    assert!(updated.last_updated > identity.last_updated);
    assert_eq!(products.find_all().await?.len(), 1);
    assert_eq!(prices.history(identity.id, 30).await?.len(), 2);

    // And the change report sees exactly that movement.
    let changes = prices.changes(7).await?;
    assert_eq!(changes.len(), 1);
    let change = &changes[0];
    assert_eq!(change.previous_price, 45.98);
    assert_eq!(change.current_price, 47.50);
    assert!((change.change_amount - 1.52).abs() < 1e-9);
    let percent = change.change_percent.unwrap();
    assert!((percent - 3.3).abs() < 0.1, "got {percent}");
    Ok(())
}

#[tokio::test]
async fn empty_observed_values_never_erase_known_metadata() -> Result<()> {
    let (_dir, products, _prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;

    products
        .resolve(supplier.id, &observed("340162", "Plywood 9mm", "https://example.com/a"))
        .await?;

    // A degraded snapshot: no category, empty unit, empty url.
    let degraded = ObservedProduct {
        sku: "340162",
        name: "Plywood 9mm",
        category: None,
        unit: "",
        url: "",
    };
    let resolved = products.resolve(supplier.id, &degraded).await?;

    assert_eq!(resolved.category.as_deref(), Some("Timber"));
    assert_eq!(resolved.unit, "per sheet");
    assert_eq!(resolved.product_url, "https://example.com/a");
    Ok(())
}

#[tokio::test]
async fn history_is_ascending_and_latest_is_its_tail() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let identity = products
        .resolve(supplier.id, &observed("100", "Decking Board", "https://example.com/d"))
        .await?;
    let attrs = serde_json::Map::new();

    let now = Utc::now();
    for (hours_ago, price) in [(3, 10.0), (2, 11.0), (1, 9.5)] {
        prices
            .append(identity.id, supplier.id, price, true, &attrs, now - ChronoDuration::hours(hours_ago))
            .await?;
    }

    let history = prices.history(identity.id, 30).await?;
    assert_eq!(history.len(), 3);
    assert!(history.windows(2).all(|w| w[0].captured_at <= w[1].captured_at));

    let latest = prices.latest(identity.id).await?.unwrap();
    assert_eq!(latest.id, history.last().unwrap().id);
    assert_eq!(latest.price, 9.5);
    Ok(())
}

#[tokio::test]
async fn changes_compares_only_the_most_recent_pair() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let identity = products
        .resolve(supplier.id, &observed("200", "Framing Pine", "https://example.com/f"))
        .await?;
    let attrs = serde_json::Map::new();

    let now = Utc::now();
    for (hours_ago, price) in [(3, 10.0), (2, 12.0), (1, 15.0)] {
        prices
            .append(identity.id, supplier.id, price, true, &attrs, now - ChronoDuration::hours(hours_ago))
            .await?;
    }

    let changes = prices.changes(7).await?;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].previous_price, 12.0);
    assert_eq!(changes[0].current_price, 15.0);
    Ok(())
}

#[tokio::test]
async fn equal_prices_are_not_a_change_even_if_stock_differs() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let identity = products
        .resolve(supplier.id, &observed("300", "MDF Sheet", "https://example.com/m"))
        .await?;
    let attrs = serde_json::Map::new();

    let now = Utc::now();
    prices
        .append(identity.id, supplier.id, 22.0, true, &attrs, now - ChronoDuration::hours(2))
        .await?;
    prices
        .append(identity.id, supplier.id, 22.0, false, &attrs, now)
        .await?;

    assert!(prices.changes(7).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn change_percent_is_none_when_previous_price_was_zero() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let identity = products
        .resolve(supplier.id, &observed("400", "Mystery Item", "https://example.com/x"))
        .await?;
    let attrs = serde_json::Map::new();

    let now = Utc::now();
    prices
        .append(identity.id, supplier.id, 0.0, true, &attrs, now - ChronoDuration::hours(1))
        .await?;
    prices
        .append(identity.id, supplier.id, 19.90, true, &attrs, now)
        .await?;

    let changes = prices.changes(7).await?;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].change_percent, None);
    Ok(())
}

#[tokio::test]
async fn changes_are_ordered_by_descending_absolute_delta() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let attrs = serde_json::Map::new();
    let now = Utc::now();

    for (sku, old_price, new_price) in [("a1", 10.0, 11.0), ("a2", 50.0, 40.0), ("a3", 5.0, 5.5)] {
        let identity = products
            .resolve(supplier.id, &observed(sku, sku, "https://example.com/p"))
            .await?;
        prices
            .append(identity.id, supplier.id, old_price, true, &attrs, now - ChronoDuration::hours(1))
            .await?;
        prices
            .append(identity.id, supplier.id, new_price, true, &attrs, now)
            .await?;
    }

    let changes = prices.changes(7).await?;
    let deltas: Vec<f64> = changes.iter().map(|c| c.change_amount.abs()).collect();
    assert_eq!(deltas, vec![10.0, 1.0, 0.5]);
    Ok(())
}

#[tokio::test]
async fn compare_orders_cheapest_first_and_skips_unobserved() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let attrs = serde_json::Map::new();
    let now = Utc::now();

    for (sku, name, price) in [
        ("p1", "Plywood Premium", Some(62.0)),
        ("p2", "Plywood Budget", Some(31.5)),
        ("p3", "Plywood Unpriced", None),
        ("p4", "Hardboard", Some(12.0)),
    ] {
        let identity = products
            .resolve(supplier.id, &observed(sku, name, "https://example.com/p"))
            .await?;
        if let Some(price) = price {
            prices
                .append(identity.id, supplier.id, price, true, &attrs, now)
                .await?;
        }
    }

    let rows = prices.compare("Plywood").await?;
    let names: Vec<&str> = rows.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["Plywood Budget", "Plywood Premium"]);
    assert!(rows[0].price <= rows[1].price);
    Ok(())
}

#[tokio::test]
async fn merge_repoints_history_and_deletes_the_duplicate() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let attrs = serde_json::Map::new();
    let now = Utc::now();

    let keep = products
        .resolve(supplier.id, &observed("500", "Plasterboard", "https://example.com/k"))
        .await?;
    let discard = products
        .resolve(supplier.id, &observed("unknown", "Plasterboard", "https://example.com/k"))
        .await?;
    prices
        .append(keep.id, supplier.id, 18.0, true, &attrs, now - ChronoDuration::hours(1))
        .await?;
    prices
        .append(discard.id, supplier.id, 18.5, true, &attrs, now)
        .await?;

    let moved = products.merge(keep.id, discard.id).await?;
    assert_eq!(moved, 1);
    assert!(products.find_by_id(discard.id).await?.is_none());
    assert_eq!(prices.history(keep.id, 30).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn discontinuation_marker_is_applied_exactly_once() -> Result<()> {
    let (_dir, products, _prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let identity = products
        .resolve(supplier.id, &observed("600", "Old Product", "https://example.com/o"))
        .await?;

    assert!(products.mark_discontinued(identity.id).await?);
    assert!(!products.mark_discontinued(identity.id).await?);

    let reloaded = products.find_by_id(identity.id).await?.unwrap();
    assert!(reloaded.is_discontinued());
    assert_eq!(
        reloaded.name,
        format!("{DISCONTINUED_MARKER}Old Product")
    );
    Ok(())
}

#[tokio::test]
async fn statistics_reflect_latest_stock_state() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let attrs = serde_json::Map::new();
    let now = Utc::now();

    let stocked = products
        .resolve(supplier.id, &observed("700", "Stocked", "https://example.com/s"))
        .await?;
    prices
        .append(stocked.id, supplier.id, 10.0, true, &attrs, now)
        .await?;

    // Was in stock, latest observation says it no longer is.
    let unstocked = products
        .resolve(supplier.id, &observed("701", "Unstocked", "https://example.com/u"))
        .await?;
    prices
        .append(unstocked.id, supplier.id, 10.0, true, &attrs, now - ChronoDuration::hours(1))
        .await?;
    prices
        .append(unstocked.id, supplier.id, 10.0, false, &attrs, now)
        .await?;

    let stats = prices.statistics().await?;
    assert_eq!(stats.total_suppliers, 1);
    assert_eq!(stats.total_products, 2);
    assert_eq!(stats.total_observations, 3);
    assert_eq!(stats.products_in_stock, 1);
    Ok(())
}

// ===============================
// Pipeline tests with a stub fetcher
// ===============================

struct StubFetcher {
    pages: HashMap<String, String>,
    statuses: HashMap<String, (String, u16)>,
}

impl StubFetcher {
    fn new() -> Self {
        Self {
            pages: HashMap::new(),
            statuses: HashMap::new(),
        }
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch_page(&self, url: &str, _wait_selector: Option<&str>) -> Result<String> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("All 3 fetch attempts failed for {url}"))
    }

    async fn check_url(&self, url: &str) -> Result<UrlStatus> {
        match self.statuses.get(url) {
            Some((final_url, status_code)) => Ok(UrlStatus {
                original_url: url.to_string(),
                final_url: final_url.clone(),
                status_code: *status_code,
            }),
            None => Err(anyhow!("connection refused")),
        }
    }
}

fn product_page(name: &str, price: f64) -> String {
    format!(
        r#"<html><body>
            <h1 class="product-title">{name}</h1>
            <span class="price-format__main-price">${price}</span>
            <span class="price-format__unit">per sheet</span>
        </body></html>"#
    )
}

fn fast_crawling_config() -> CrawlingConfig {
    CrawlingConfig {
        scrape_delay_secs: 0,
        ..CrawlingConfig::default()
    }
}

fn test_supplier_config() -> SupplierConfig {
    SupplierConfig {
        name: "Bunnings".to_string(),
        website: "https://bunnings.com.au".to_string(),
    }
}

#[tokio::test]
async fn collection_isolates_item_failures() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;

    let good_url = "https://shop.example/ecoply-plywood_p0340162".to_string();
    let nameless_url = "https://shop.example/broken_p0340163".to_string();
    let dead_url = "https://shop.example/gone_p0340164".to_string();

    let mut fetcher = StubFetcher::new();
    fetcher
        .pages
        .insert(good_url.clone(), product_page("Ecoply Plywood 9mm", 45.98));
    fetcher
        .pages
        .insert(nameless_url.clone(), "<html><body><p>$9.99 only</p></body></html>".repeat(20));
    // dead_url has no page: every fetch attempt fails.

    let mut collector = Collector::new(
        Arc::new(fetcher),
        SnapshotExtractor::new()?,
        products.clone(),
        prices.clone(),
        test_supplier_config(),
        &fast_crawling_config(),
    );

    let urls = vec![good_url, nameless_url.clone(), dead_url.clone()];
    let report = collector.collect_products(&urls).await;

    assert_eq!(report.total, 3);
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(report.ambiguous, 0);

    let reported_urls: Vec<&str> = report.errors.iter().map(|e| e.url.as_str()).collect();
    assert!(reported_urls.contains(&dead_url.as_str()));
    assert!(reported_urls.contains(&nameless_url.as_str()));
    let dead_error = report.errors.iter().find(|e| e.url == dead_url).unwrap();
    assert_eq!(dead_error.outcome, ItemOutcome::FetchFailed);
    assert!(dead_error.error.contains("Fetch failed"));
    let nameless_error = report.errors.iter().find(|e| e.url == nameless_url).unwrap();
    assert_eq!(nameless_error.outcome, ItemOutcome::ExtractionFailed);

    // The good item landed despite its neighbours failing.
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let identity = products.find_by_sku(supplier.id, "0340162").await?.unwrap();
    assert_eq!(identity.name, "Ecoply Plywood 9mm");
    assert_eq!(prices.history(identity.id, 30).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn unknown_sku_is_stored_but_surfaced_as_ambiguous() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;

    let url = "https://shop.example/no-sku-anywhere".to_string();
    let mut fetcher = StubFetcher::new();
    fetcher
        .pages
        .insert(url.clone(), product_page("Nameless Widget", 10.0));

    let mut collector = Collector::new(
        Arc::new(fetcher),
        SnapshotExtractor::new()?,
        products.clone(),
        prices,
        test_supplier_config(),
        &fast_crawling_config(),
    );

    let report = collector.collect_products(&[url]).await;
    assert_eq!(report.successful, 1);
    assert_eq!(report.ambiguous, 1);

    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    assert!(products.find_by_sku(supplier.id, "unknown").await?.is_some());
    Ok(())
}

#[tokio::test]
async fn health_check_classifies_and_heals() -> Result<()> {
    let (_dir, products, prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let attrs = serde_json::Map::new();

    let ok = products
        .resolve(supplier.id, &observed("1", "Healthy", "https://shop.example/ok"))
        .await?;
    let moved = products
        .resolve(supplier.id, &observed("2", "Moved", "https://shop.example/old"))
        .await?;
    let gone = products
        .resolve(supplier.id, &observed("3", "Gone", "https://shop.example/gone"))
        .await?;
    let flaky = products
        .resolve(supplier.id, &observed("4", "Flaky", "https://shop.example/flaky"))
        .await?;
    prices
        .append(gone.id, supplier.id, 10.0, true, &attrs, Utc::now())
        .await?;

    let mut fetcher = StubFetcher::new();
    fetcher.statuses.insert(
        "https://shop.example/ok".to_string(),
        ("https://shop.example/ok".to_string(), 200),
    );
    fetcher.statuses.insert(
        "https://shop.example/old".to_string(),
        ("https://shop.example/new".to_string(), 200),
    );
    fetcher.statuses.insert(
        "https://shop.example/gone".to_string(),
        ("https://shop.example/gone".to_string(), 404),
    );
    fetcher.statuses.insert(
        "https://shop.example/flaky".to_string(),
        ("https://shop.example/flaky".to_string(), 503),
    );

    let monitor = UrlMonitor::new(Arc::new(fetcher), products.clone(), Duration::from_millis(0));
    let report = monitor.run_health_check().await?;

    assert_eq!(report.total, 4);
    assert_eq!(report.active, 1);
    assert_eq!(report.redirected, 1);
    assert_eq!(report.not_found, 1);
    assert_eq!(report.errors, 1);

    // Redirect self-healed.
    assert_eq!(
        products.find_by_id(moved.id).await?.unwrap().product_url,
        "https://shop.example/new"
    );
    // 404 marked discontinued, history intact.
    let gone_reloaded = products.find_by_id(gone.id).await?.unwrap();
    assert!(gone_reloaded.is_discontinued());
    assert_eq!(prices.history(gone.id, 30).await?.len(), 1);
    // Errors cause no mutation.
    assert_eq!(
        products.find_by_id(flaky.id).await?.unwrap().name,
        "Flaky"
    );
    assert_eq!(products.find_by_id(ok.id).await?.unwrap().name, "Healthy");
    Ok(())
}

#[tokio::test]
async fn repeated_health_checks_keep_the_marker_single() -> Result<()> {
    let (_dir, products, _prices) = test_repositories().await?;
    let supplier = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let gone = products
        .resolve(supplier.id, &observed("10", "Gone Twice", "https://shop.example/gone"))
        .await?;

    let mut fetcher = StubFetcher::new();
    fetcher.statuses.insert(
        "https://shop.example/gone".to_string(),
        ("https://shop.example/gone".to_string(), 404),
    );
    let monitor = UrlMonitor::new(Arc::new(fetcher), products.clone(), Duration::from_millis(0));

    let first = monitor.run_health_check().await?;
    let second = monitor.run_health_check().await?;
    assert_eq!(first.not_found, 1);
    assert_eq!(second.not_found, 1);

    let name = products.find_by_id(gone.id).await?.unwrap().name;
    assert_eq!(name.matches("[DISCONTINUED]").count(), 1);
    Ok(())
}

#[tokio::test]
async fn duplicate_sku_report_finds_cross_supplier_collisions() -> Result<()> {
    let (_dir, products, _prices) = test_repositories().await?;
    let first = products.get_or_create_supplier("Bunnings", "https://bunnings.com.au").await?;
    let second = products.get_or_create_supplier("Mitre 10", "https://mitre10.com.au").await?;

    products
        .resolve(first.id, &observed("340162", "Plywood", "https://a.example/p"))
        .await?;
    products
        .resolve(second.id, &observed("340162", "Plywood", "https://b.example/p"))
        .await?;
    products
        .resolve(first.id, &observed("999", "Unique", "https://a.example/u"))
        .await?;

    let duplicates = products.find_duplicate_skus().await?;
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0], ("340162".to_string(), 2));
    Ok(())
}
