//! Application layer: the use cases that orchestrate fetching, extraction
//! and persistence.

pub mod collector;
pub mod url_monitor;

pub use collector::{write_example_products_file, Collector, ProductEntry};
pub use url_monitor::UrlMonitor;
