//! Append-only price observation store and its read queries.
//!
//! Observations are immutable once written and totally ordered per product
//! by capture timestamp. Nothing here updates or deletes a row; the only
//! bulk mutation in the system is the explicit identity merge, which lives
//! in the product repository.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::debug;

use crate::domain::product::{PriceChange, PriceComparison, PriceObservation, StoreStatistics};

#[derive(Clone)]
pub struct PriceRepository {
    pool: Arc<SqlitePool>,
}

impl PriceRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    /// Append one observation. Always a new row, never an update.
    pub async fn append(
        &self,
        product_id: i64,
        supplier_id: i64,
        price: f64,
        in_stock: bool,
        attributes: &Map<String, Value>,
        captured_at: DateTime<Utc>,
    ) -> Result<PriceObservation> {
        let attributes_json = serde_json::to_string(attributes)?;
        let result = sqlx::query(
            "INSERT INTO price_history (product_id, supplier_id, price, in_stock, attributes, captured_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(product_id)
        .bind(supplier_id)
        .bind(price)
        .bind(in_stock)
        .bind(&attributes_json)
        .bind(captured_at)
        .execute(&*self.pool)
        .await?;

        debug!("Saved price: product #{} = {}", product_id, price);
        Ok(PriceObservation {
            id: result.last_insert_rowid(),
            product_id,
            supplier_id,
            price,
            in_stock,
            attributes: attributes.clone(),
            captured_at,
        })
    }

    /// Most recent observation for a product, or None without history.
    pub async fn latest(&self, product_id: i64) -> Result<Option<PriceObservation>> {
        let row = sqlx::query(
            "SELECT id, product_id, supplier_id, price, in_stock, attributes, captured_at
             FROM price_history WHERE product_id = ?
             ORDER BY captured_at DESC, id DESC LIMIT 1",
        )
        .bind(product_id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(row.map(|r| row_to_observation(&r)))
    }

    /// Observations within the last `days` days, ascending by timestamp.
    pub async fn history(&self, product_id: i64, days: i64) -> Result<Vec<PriceObservation>> {
        let cutoff = Utc::now() - Duration::days(days);
        let rows = sqlx::query(
            "SELECT id, product_id, supplier_id, price, in_stock, attributes, captured_at
             FROM price_history WHERE product_id = ? AND captured_at >= ?
             ORDER BY captured_at ASC, id ASC",
        )
        .bind(product_id)
        .bind(cutoff)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows.iter().map(row_to_observation).collect())
    }

    /// Price movements in the window, biggest absolute swing first.
    ///
    /// Per identity only the two most recent in-window observations are
    /// compared; equal prices are never a change. The percentage is None
    /// when the previous price was zero.
    pub async fn changes(&self, days: i64) -> Result<Vec<PriceChange>> {
        let cutoff = Utc::now() - Duration::days(days);
        let products = sqlx::query("SELECT id, sku, name FROM products ORDER BY id")
            .fetch_all(&*self.pool)
            .await?;

        let mut results = Vec::new();
        for product in &products {
            let product_id: i64 = product.get("id");
            let recent = sqlx::query(
                "SELECT price, captured_at FROM price_history
                 WHERE product_id = ? AND captured_at >= ?
                 ORDER BY captured_at DESC, id DESC LIMIT 2",
            )
            .bind(product_id)
            .bind(cutoff)
            .fetch_all(&*self.pool)
            .await?;

            if recent.len() < 2 {
                continue;
            }
            let current_price: f64 = recent[0].get("price");
            let previous_price: f64 = recent[1].get("price");
            if current_price == previous_price {
                continue;
            }

            let change_amount = current_price - previous_price;
            let change_percent = (previous_price != 0.0)
                .then(|| (change_amount / previous_price) * 100.0);

            results.push(PriceChange {
                product_id,
                sku: product.get("sku"),
                name: product.get("name"),
                previous_price,
                current_price,
                change_amount,
                change_percent,
                previous_at: recent[1].get("captured_at"),
                current_at: recent[0].get("captured_at"),
            });
        }

        results.sort_by(|a, b| {
            b.change_amount
                .abs()
                .partial_cmp(&a.change_amount.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }

    /// Latest prices for every identity whose name contains the substring,
    /// cheapest first. Identities without history are excluded.
    pub async fn compare(&self, name_substring: &str) -> Result<Vec<PriceComparison>> {
        let pattern = format!("%{name_substring}%");
        let products = sqlx::query(
            "SELECT p.id, p.sku, p.name, p.product_url, s.name AS supplier_name
             FROM products p JOIN suppliers s ON s.id = p.supplier_id
             WHERE p.name LIKE ? ORDER BY p.id",
        )
        .bind(&pattern)
        .fetch_all(&*self.pool)
        .await?;

        let mut results = Vec::new();
        for product in &products {
            let product_id: i64 = product.get("id");
            let Some(latest) = self.latest(product_id).await? else {
                continue;
            };
            results.push(PriceComparison {
                product_id,
                name: product.get("name"),
                sku: product.get("sku"),
                supplier: product.get("supplier_name"),
                price: latest.price,
                in_stock: latest.in_stock,
                url: product.get("product_url"),
                captured_at: latest.captured_at,
            });
        }

        results.sort_by(|a, b| {
            a.price
                .partial_cmp(&b.price)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }

    /// Aggregate counts; `products_in_stock` reflects each product's most
    /// recent observation.
    pub async fn statistics(&self) -> Result<StoreStatistics> {
        let total_suppliers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM suppliers")
            .fetch_one(&*self.pool)
            .await?;
        let total_products: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&*self.pool)
            .await?;
        let total_observations: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM price_history")
            .fetch_one(&*self.pool)
            .await?;
        let products_in_stock: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM products p WHERE (
                SELECT ph.in_stock FROM price_history ph
                WHERE ph.product_id = p.id
                ORDER BY ph.captured_at DESC, ph.id DESC LIMIT 1
             ) = 1",
        )
        .fetch_one(&*self.pool)
        .await?;

        Ok(StoreStatistics {
            total_suppliers,
            total_products,
            total_observations,
            products_in_stock,
        })
    }
}

fn row_to_observation(row: &sqlx::sqlite::SqliteRow) -> PriceObservation {
    let attributes_json: Option<String> = row.get("attributes");
    let attributes = attributes_json
        .and_then(|json| serde_json::from_str::<Map<String, Value>>(&json).ok())
        .unwrap_or_default();

    PriceObservation {
        id: row.get("id"),
        product_id: row.get("product_id"),
        supplier_id: row.get("supplier_id"),
        price: row.get("price"),
        in_stock: row.get("in_stock"),
        attributes,
        captured_at: row.get("captured_at"),
    }
}
