//! Supplier and product identity persistence.
//!
//! Identity is keyed solely on (supplier, SKU). A retailer renaming or
//! re-urling a product therefore never forks its price history: the same
//! row is found and its mutable metadata is updated in place.

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::product::{ProductIdentity, Supplier, DISCONTINUED_MARKER};

/// What the resolver observed on the page for the mutable identity fields.
/// Empty strings and `None` mean "the page did not say", never "erase".
#[derive(Debug, Clone)]
pub struct ObservedProduct<'a> {
    pub sku: &'a str,
    pub name: &'a str,
    pub category: Option<&'a str>,
    pub unit: &'a str,
    pub url: &'a str,
}

#[derive(Clone)]
pub struct ProductRepository {
    pool: Arc<SqlitePool>,
}

impl ProductRepository {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    // ===============================
    // SUPPLIER OPERATIONS
    // ===============================

    /// Get an existing supplier by name or create it. Suppliers are never
    /// deleted, only deactivated.
    pub async fn get_or_create_supplier(&self, name: &str, website: &str) -> Result<Supplier> {
        if let Some(row) = sqlx::query(
            "SELECT id, name, website, active, created_at FROM suppliers WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&*self.pool)
        .await?
        {
            return Ok(row_to_supplier(&row));
        }

        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO suppliers (name, website, active, created_at) VALUES (?, ?, 1, ?)",
        )
        .bind(name)
        .bind(website)
        .bind(now)
        .execute(&*self.pool)
        .await?;

        info!("Created supplier: {}", name);
        Ok(Supplier {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            website: Some(website.to_string()),
            active: true,
            created_at: now,
        })
    }

    pub async fn deactivate_supplier(&self, supplier_id: i64) -> Result<()> {
        sqlx::query("UPDATE suppliers SET active = 0 WHERE id = ?")
            .bind(supplier_id)
            .execute(&*self.pool)
            .await?;
        Ok(())
    }

    // ===============================
    // IDENTITY RESOLUTION
    // ===============================

    /// Map an observed (supplier, SKU) pair onto a product identity.
    ///
    /// Absent: create with the observed attributes. Present: overwrite each
    /// mutable field only when the observed value is non-empty and differs,
    /// advancing `last_updated`; a transient empty extraction never erases
    /// previously known metadata. Both paths run in one transaction.
    pub async fn resolve(
        &self,
        supplier_id: i64,
        observed: &ObservedProduct<'_>,
    ) -> Result<ProductIdentity> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id, supplier_id, sku, name, category, unit, product_url, created_at, last_updated
             FROM products WHERE supplier_id = ? AND sku = ?",
        )
        .bind(supplier_id)
        .bind(observed.sku)
        .fetch_optional(&mut *tx)
        .await?;

        let identity = match existing {
            None => {
                let now = Utc::now();
                let result = sqlx::query(
                    "INSERT INTO products (supplier_id, sku, name, category, unit, product_url, created_at, last_updated)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(supplier_id)
                .bind(observed.sku)
                .bind(observed.name)
                .bind(observed.category)
                .bind(observed.unit)
                .bind(observed.url)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await?;

                info!("Created new product: {} (SKU: {})", observed.name, observed.sku);
                ProductIdentity {
                    id: result.last_insert_rowid(),
                    supplier_id,
                    sku: observed.sku.to_string(),
                    name: observed.name.to_string(),
                    category: observed.category.map(str::to_string),
                    unit: observed.unit.to_string(),
                    product_url: observed.url.to_string(),
                    created_at: now,
                    last_updated: now,
                }
            }
            Some(row) => {
                let mut identity = row_to_identity(&row);
                let mut changes: Vec<String> = Vec::new();

                if !observed.name.is_empty() && identity.name != observed.name {
                    changes.push(format!("name: '{}' -> '{}'", identity.name, observed.name));
                    identity.name = observed.name.to_string();
                }
                if let Some(category) = observed.category.filter(|c| !c.is_empty()) {
                    if identity.category.as_deref() != Some(category) {
                        changes.push("category updated".to_string());
                        identity.category = Some(category.to_string());
                    }
                }
                if !observed.unit.is_empty() && identity.unit != observed.unit {
                    changes.push("unit updated".to_string());
                    identity.unit = observed.unit.to_string();
                }
                if !observed.url.is_empty() && identity.product_url != observed.url {
                    changes.push("URL updated".to_string());
                    identity.product_url = observed.url.to_string();
                }

                if !changes.is_empty() {
                    identity.last_updated = Utc::now();
                    sqlx::query(
                        "UPDATE products SET name = ?, category = ?, unit = ?, product_url = ?, last_updated = ?
                         WHERE id = ?",
                    )
                    .bind(&identity.name)
                    .bind(&identity.category)
                    .bind(&identity.unit)
                    .bind(&identity.product_url)
                    .bind(identity.last_updated)
                    .bind(identity.id)
                    .execute(&mut *tx)
                    .await?;

                    info!("Updated product {}: {}", identity.sku, changes.join(", "));
                } else {
                    debug!("Product {} unchanged", identity.sku);
                }

                identity
            }
        };

        tx.commit().await?;
        Ok(identity)
    }

    pub async fn find_by_sku(&self, supplier_id: i64, sku: &str) -> Result<Option<ProductIdentity>> {
        let row = sqlx::query(
            "SELECT id, supplier_id, sku, name, category, unit, product_url, created_at, last_updated
             FROM products WHERE supplier_id = ? AND sku = ?",
        )
        .bind(supplier_id)
        .bind(sku)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(row.map(|r| row_to_identity(&r)))
    }

    pub async fn find_by_id(&self, product_id: i64) -> Result<Option<ProductIdentity>> {
        let row = sqlx::query(
            "SELECT id, supplier_id, sku, name, category, unit, product_url, created_at, last_updated
             FROM products WHERE id = ?",
        )
        .bind(product_id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(row.map(|r| row_to_identity(&r)))
    }

    pub async fn find_all(&self) -> Result<Vec<ProductIdentity>> {
        let rows = sqlx::query(
            "SELECT id, supplier_id, sku, name, category, unit, product_url, created_at, last_updated
             FROM products ORDER BY id",
        )
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows.iter().map(row_to_identity).collect())
    }

    /// Identities not updated within the last `days` days. Candidates for a
    /// URL health check: their pages may have moved.
    pub async fn find_stale(&self, days: i64) -> Result<Vec<ProductIdentity>> {
        let cutoff = Utc::now() - Duration::days(days);
        let rows = sqlx::query(
            "SELECT id, supplier_id, sku, name, category, unit, product_url, created_at, last_updated
             FROM products WHERE last_updated < ? ORDER BY last_updated",
        )
        .bind(cutoff)
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows.iter().map(row_to_identity).collect())
    }

    /// SKUs appearing under more than one identity, for manual merge
    /// triage. The unique (supplier, sku) index makes these cross-supplier
    /// collisions or leftovers of the unknown-SKU path.
    pub async fn find_duplicate_skus(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT sku, COUNT(id) AS n FROM products GROUP BY sku HAVING COUNT(id) > 1",
        )
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("sku"), row.get::<i64, _>("n")))
            .collect())
    }

    // ===============================
    // CORRECTIONS
    // ===============================

    pub async fn update_url(&self, product_id: i64, new_url: &str) -> Result<()> {
        sqlx::query("UPDATE products SET product_url = ?, last_updated = ? WHERE id = ?")
            .bind(new_url)
            .bind(Utc::now())
            .bind(product_id)
            .execute(&*self.pool)
            .await?;
        info!("Updated URL for product {} -> {}", product_id, new_url);
        Ok(())
    }

    /// Prefix the display name with the discontinued marker. Idempotent;
    /// returns whether the product was newly marked. History is untouched.
    pub async fn mark_discontinued(&self, product_id: i64) -> Result<bool> {
        let Some(identity) = self.find_by_id(product_id).await? else {
            return Ok(false);
        };
        if identity.is_discontinued() {
            debug!("Product {} already marked discontinued", product_id);
            return Ok(false);
        }

        sqlx::query("UPDATE products SET name = ?, last_updated = ? WHERE id = ?")
            .bind(format!("{}{}", DISCONTINUED_MARKER, identity.name))
            .bind(Utc::now())
            .bind(product_id)
            .execute(&*self.pool)
            .await?;

        warn!("Marked product {} as discontinued", product_id);
        Ok(true)
    }

    /// Merge two duplicate identities: re-point every observation from
    /// `discard_id` to `keep_id`, then delete the duplicate. One
    /// transaction; manual cleanup only, never called by collection.
    pub async fn merge(&self, keep_id: i64, discard_id: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query("UPDATE price_history SET product_id = ? WHERE product_id = ?")
            .bind(keep_id)
            .bind(discard_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM products WHERE id = ?")
            .bind(discard_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        info!(
            "Merged product {} into {} ({} observations moved)",
            discard_id, keep_id, moved
        );
        Ok(moved)
    }
}

fn row_to_supplier(row: &sqlx::sqlite::SqliteRow) -> Supplier {
    Supplier {
        id: row.get("id"),
        name: row.get("name"),
        website: row.get("website"),
        active: row.get("active"),
        created_at: row.get("created_at"),
    }
}

fn row_to_identity(row: &sqlx::sqlite::SqliteRow) -> ProductIdentity {
    ProductIdentity {
        id: row.get("id"),
        supplier_id: row.get("supplier_id"),
        sku: row.get("sku"),
        name: row.get("name"),
        category: row.get("category"),
        unit: row.get("unit"),
        product_url: row.get("product_url"),
        created_at: row.get("created_at"),
        last_updated: row.get("last_updated"),
    }
}
