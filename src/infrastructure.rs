//! Infrastructure layer: configuration, logging, pacing, page acquisition,
//! HTML extraction and SQLite persistence.

pub mod config;
pub mod database_connection;
pub mod extraction_error;
pub mod html_parser;
pub mod logging;
pub mod page_fetcher;
pub mod price_repository;
pub mod product_repository;
pub mod rate_limiter;

pub use config::AppConfig;
pub use database_connection::DatabaseConnection;
pub use extraction_error::{ExtractionError, ExtractionResult};
pub use html_parser::{ExtractedSnapshot, ExtractorConfig, FieldDefaults, SnapshotExtractor};
pub use logging::{init_logging, init_logging_with_config};
pub use page_fetcher::{HttpPageFetcher, PageFetcher, UrlStatus};
pub use price_repository::PriceRepository;
pub use product_repository::{ObservedProduct, ProductRepository};
pub use rate_limiter::RateLimiter;
