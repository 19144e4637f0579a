use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything one page fetch could tell us about a product.
///
/// Ephemeral: a snapshot is consumed by identity resolution and the price
/// store, never persisted as-is. Optional fields stay `None` when the page
/// did not yield them; the extractor guarantees `name` is non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub name: String,
    pub sku: String,
    pub price: f64,
    pub url: String,
    pub supplier: String,
    pub category: Option<String>,
    pub in_stock: bool,
    pub unit: String,
    /// Free-form extracted attributes (brand, description, specifications).
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub captured_at: DateTime<Utc>,
}

/// SKU placeholder when no identifier could be determined.
pub const UNKNOWN_SKU: &str = "unknown";

impl ProductSnapshot {
    /// A SKU the extractor could not determine. Resolution still works but
    /// may create duplicate identities across runs.
    pub fn has_ambiguous_sku(&self) -> bool {
        self.sku == UNKNOWN_SKU
    }
}

/// A retailer we track. Created lazily on first observation, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub id: i64,
    pub name: String,
    pub website: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// The persistent record a price history is attached to.
///
/// (supplier_id, sku) is the sole identity key and is immutable for the
/// lifetime of the record. Name, category, unit and URL are mutable
/// metadata that may drift without forking the history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductIdentity {
    pub id: i64,
    pub supplier_id: i64,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub unit: String,
    pub product_url: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Name prefix applied when a product's URL goes permanently dead.
pub const DISCONTINUED_MARKER: &str = "[DISCONTINUED] ";

impl ProductIdentity {
    pub fn is_discontinued(&self) -> bool {
        self.name.starts_with(DISCONTINUED_MARKER)
    }
}

/// One immutable price + stock reading at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceObservation {
    pub id: i64,
    pub product_id: i64,
    pub supplier_id: i64,
    pub price: f64,
    pub in_stock: bool,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub captured_at: DateTime<Utc>,
}

/// A detected movement between the two most recent observations of one
/// identity inside a query window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChange {
    pub product_id: i64,
    pub sku: String,
    pub name: String,
    pub previous_price: f64,
    pub current_price: f64,
    pub change_amount: f64,
    /// None when the previous price was zero.
    pub change_percent: Option<f64>,
    pub previous_at: DateTime<Utc>,
    pub current_at: DateTime<Utc>,
}

/// One row of a cross-product price comparison, cheapest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceComparison {
    pub product_id: i64,
    pub name: String,
    pub sku: String,
    pub supplier: String,
    pub price: f64,
    pub in_stock: bool,
    pub url: String,
    pub captured_at: DateTime<Utc>,
}

/// Aggregate counts over the whole store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStatistics {
    pub total_suppliers: i64,
    pub total_products: i64,
    pub total_observations: i64,
    pub products_in_stock: i64,
}
