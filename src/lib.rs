//! pricewatch - retail price tracking.
//!
//! Periodically fetches product pages, extracts structured fields from
//! unreliable HTML and reconciles observations against SKU-keyed product
//! identities, so price history stays continuous when retailers rename or
//! re-url their products.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{Collector, UrlMonitor};
pub use domain::{CollectionReport, HealthReport, ProductSnapshot};
pub use infrastructure::{
    AppConfig, DatabaseConnection, HttpPageFetcher, PageFetcher, PriceRepository,
    ProductRepository, SnapshotExtractor,
};
