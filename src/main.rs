//! pricewatch command-line entry point.

use anyhow::{bail, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use pricewatch::application::collector::{write_example_products_file, Collector};
use pricewatch::application::url_monitor::UrlMonitor;
use pricewatch::domain::report::{CollectionReport, HealthReport};
use pricewatch::infrastructure::config::AppConfig;
use pricewatch::infrastructure::database_connection::DatabaseConnection;
use pricewatch::infrastructure::logging::init_logging_with_config;
use pricewatch::infrastructure::page_fetcher::HttpPageFetcher;
use pricewatch::infrastructure::price_repository::PriceRepository;
use pricewatch::infrastructure::product_repository::ProductRepository;
use pricewatch::infrastructure::html_parser::SnapshotExtractor;

const CONFIG_FILE: &str = "pricewatch.json";

const USAGE: &str = "\
pricewatch - retail price tracker

USAGE:
    pricewatch <command> [options]

COMMANDS:
    collect [--products-file FILE]   Collect prices for the tracked products
    check-urls                       Audit stored product URLs
    changes [--days N]               Show price changes (default 7 days)
    compare <name-substring>         Compare latest prices by product name
    stats                            Database statistics
    stale [--days N]                 Products not updated in N days (default 7)
    duplicates                       SKUs present under multiple identities
    merge <keep-id> <discard-id>     Merge duplicate identities (manual cleanup)
    init-example                     Write an example products.json
";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        print!("{USAGE}");
        return Ok(());
    };

    let config = AppConfig::load(CONFIG_FILE).await?;
    init_logging_with_config(&config.logging)?;

    match command {
        "collect" => {
            let products_file = flag_value(&args, "--products-file")
                .unwrap_or_else(|| config.products_file.clone());
            let mut collector = build_collector(&config).await?;

            // Let ctrl-c finish the current item before stopping.
            let interrupted = collector.interrupt_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, finishing current item");
                    interrupted.store(true, Ordering::Relaxed);
                }
            });

            let report = collector.collect_from_file(&products_file).await?;
            print_collection_report(&report);
        }
        "check-urls" => {
            let (products, _prices) = build_repositories(&config).await?;
            let fetcher = Arc::new(HttpPageFetcher::new(&config.crawling)?);
            let monitor = UrlMonitor::new(
                fetcher,
                products,
                Duration::from_secs(config.crawling.health_check_delay_secs),
            );
            let report = monitor.run_health_check().await?;
            print_health_report(&report);
        }
        "changes" => {
            let days = flag_value(&args, "--days")
                .map(|v| v.parse::<i64>())
                .transpose()?
                .unwrap_or(7);
            let (_products, prices) = build_repositories(&config).await?;
            let changes = prices.changes(days).await?;
            if changes.is_empty() {
                println!("No price changes in the last {days} days.");
            }
            for change in &changes {
                let percent = change
                    .change_percent
                    .map(|p| format!(" ({p:+.1}%)"))
                    .unwrap_or_default();
                println!(
                    "{} (SKU {}): {:.2} -> {:.2}  {:+.2}{}",
                    change.name,
                    change.sku,
                    change.previous_price,
                    change.current_price,
                    change.change_amount,
                    percent
                );
            }
        }
        "compare" => {
            let Some(term) = args.get(1).filter(|a| !a.starts_with("--")) else {
                bail!("Usage: pricewatch compare <name-substring>");
            };
            let (_products, prices) = build_repositories(&config).await?;
            let rows = prices.compare(term).await?;
            if rows.is_empty() {
                println!("No products matching '{term}' with price history.");
            }
            for row in &rows {
                let stock = if row.in_stock { "in stock" } else { "out of stock" };
                println!(
                    "{:>10.2}  {} [{}] ({}, {})",
                    row.price, row.name, row.sku, row.supplier, stock
                );
            }
        }
        "stats" => {
            let (_products, prices) = build_repositories(&config).await?;
            let stats = prices.statistics().await?;
            println!("Suppliers:      {}", stats.total_suppliers);
            println!("Products:       {}", stats.total_products);
            println!("Observations:   {}", stats.total_observations);
            println!("In stock:       {}", stats.products_in_stock);
        }
        "stale" => {
            let days = flag_value(&args, "--days")
                .map(|v| v.parse::<i64>())
                .transpose()?
                .unwrap_or(7);
            let (products, _prices) = build_repositories(&config).await?;
            let fetcher = Arc::new(HttpPageFetcher::new(&config.crawling)?);
            let monitor = UrlMonitor::new(
                fetcher,
                products,
                Duration::from_secs(config.crawling.health_check_delay_secs),
            );
            let stale = monitor.find_stale(days).await?;
            println!("Products not updated in {days} days: {}", stale.len());
            for identity in &stale {
                println!(
                    "  {} [{}]\n    Last updated: {}\n    URL: {}",
                    identity.name, identity.sku, identity.last_updated, identity.product_url
                );
            }
        }
        "duplicates" => {
            let (products, _prices) = build_repositories(&config).await?;
            let duplicates = products.find_duplicate_skus().await?;
            if duplicates.is_empty() {
                println!("No duplicate SKUs found.");
            }
            for (sku, count) in &duplicates {
                println!("SKU {sku}: {count} identities");
            }
        }
        "merge" => {
            let (keep, discard) = match (args.get(1), args.get(2)) {
                (Some(keep), Some(discard)) => (keep.parse::<i64>()?, discard.parse::<i64>()?),
                _ => bail!("Usage: pricewatch merge <keep-id> <discard-id>"),
            };
            let (products, _prices) = build_repositories(&config).await?;
            let moved = products.merge(keep, discard).await?;
            println!("Merged product {discard} into {keep} ({moved} observations moved).");
        }
        "init-example" => {
            write_example_products_file(&config.products_file).await?;
            println!("Created {} - edit it to add your product URLs.", config.products_file);
        }
        other => {
            eprintln!("Unknown command: {other}\n");
            print!("{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn build_repositories(config: &AppConfig) -> Result<(ProductRepository, PriceRepository)> {
    let db = DatabaseConnection::new(&config.database_url).await?;
    db.migrate().await?;
    let pool = Arc::new(db.pool().clone());
    Ok((
        ProductRepository::new(Arc::clone(&pool)),
        PriceRepository::new(pool),
    ))
}

async fn build_collector(config: &AppConfig) -> Result<Collector> {
    let (products, prices) = build_repositories(config).await?;
    let fetcher = Arc::new(HttpPageFetcher::new(&config.crawling)?);
    let extractor = SnapshotExtractor::new()?;
    Ok(Collector::new(
        fetcher,
        extractor,
        products,
        prices,
        config.supplier.clone(),
        &config.crawling,
    ))
}

fn flag_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn print_collection_report(report: &CollectionReport) {
    println!("{}", "=".repeat(60));
    println!("COLLECTION SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Total products: {}", report.total);
    println!("Successful:     {}", report.successful);
    println!("Failed:         {}", report.failed);
    if report.ambiguous > 0 {
        println!("Ambiguous SKU:  {} (risk of duplicate identities)", report.ambiguous);
    }
    if !report.errors.is_empty() {
        println!("\nErrors ({}):", report.errors.len());
        for error in report.errors.iter().take(5) {
            println!("  - {}", error.url);
            println!("    {}", error.error);
        }
    }
    println!("{}", "=".repeat(60));
}

fn print_health_report(report: &HealthReport) {
    println!("{}", "=".repeat(60));
    println!("URL HEALTH CHECK");
    println!("{}", "=".repeat(60));
    println!("Total products: {}", report.total);
    println!("Active:         {}", report.active);
    println!("Redirected:     {} (auto-fixed)", report.redirected);
    println!("Not found:      {} (marked discontinued)", report.not_found);
    println!("Errors:         {}", report.errors);
    if !report.issues.is_empty() {
        println!("\nIssues:");
        for issue in &report.issues {
            println!(
                "  - {} (SKU {}): {:?} - {}",
                issue.product_name, issue.sku, issue.kind, issue.detail
            );
        }
    }
    println!("{}", "=".repeat(60));
}
