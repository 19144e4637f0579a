//! Field extraction from product pages.
//!
//! Turns one HTML document into a best-effort [`ProductSnapshot`]. Every
//! field is tried against an ordered list of selector candidates and
//! degrades to an explicit default when all of them miss; the only hard
//! failure is a page with no recognizable product name.

use chrono::Utc;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::product::{ProductSnapshot, UNKNOWN_SKU};
use crate::infrastructure::extraction_error::{ExtractionError, ExtractionResult};

/// Bounds for the free-text price scan. Numbers outside this range are
/// assumed to be something else on the page (a phone number, a model
/// number) rather than a price.
const PRICE_SCAN_MIN: f64 = 0.01;
const PRICE_SCAN_MAX: f64 = 100_000.0;

/// Descriptions longer than this are cut off before storage.
const MAX_DESCRIPTION_LEN: usize = 500;

/// Explicit per-field fallback values. Auditable in one place instead of
/// scattered through the extraction code.
#[derive(Debug, Clone)]
pub struct FieldDefaults {
    pub price: f64,
    pub unit: String,
    /// Optimistic: a page with no stock marker either way counts as in
    /// stock. Intentional bias, not an accident.
    pub in_stock: bool,
    pub sku: String,
}

impl Default for FieldDefaults {
    fn default() -> Self {
        Self {
            price: 0.0,
            unit: "each".to_string(),
            in_stock: true,
            sku: UNKNOWN_SKU.to_string(),
        }
    }
}

/// CSS selector candidates per field, tried in order. Swapping these for a
/// new retailer is a data change, not a code change.
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub name_selectors: Vec<String>,
    pub price_selectors: Vec<String>,
    pub sku_selectors: Vec<String>,
    pub in_stock_selectors: Vec<String>,
    pub unit_selectors: Vec<String>,
    pub brand_selectors: Vec<String>,
    pub description_selectors: Vec<String>,
    pub breadcrumb_selector: String,
    pub specification_selector: String,
    /// Phrases that force the stock flag to false wherever they appear.
    pub out_of_stock_phrases: Vec<String>,
    pub defaults: FieldDefaults,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            name_selectors: vec![
                "h1[class*=\"product\"]".to_string(),
                "h1.product-title".to_string(),
                "h1".to_string(),
                "[data-locator=\"product-title\"]".to_string(),
                "h1[itemprop=\"name\"]".to_string(),
            ],
            price_selectors: vec![
                "[data-locator=\"product-price\"]".to_string(),
                ".price-format__main-price".to_string(),
                "[class*=\"price\"]".to_string(),
                "[itemprop=\"price\"]".to_string(),
                "span.price".to_string(),
            ],
            sku_selectors: vec![
                "[data-locator=\"product-sku\"]".to_string(),
                ".product-sku".to_string(),
                "[itemprop=\"sku\"]".to_string(),
            ],
            in_stock_selectors: vec![
                "[data-locator=\"in-stock\"]".to_string(),
                ".in-stock".to_string(),
                "[class*=\"available\"]".to_string(),
            ],
            unit_selectors: vec![
                ".price-format__unit".to_string(),
                "[data-locator=\"price-unit\"]".to_string(),
                "span.unit".to_string(),
            ],
            brand_selectors: vec![
                "[itemprop=\"brand\"]".to_string(),
                "[data-locator=\"brand\"]".to_string(),
                ".brand-name".to_string(),
            ],
            description_selectors: vec![
                "[itemprop=\"description\"]".to_string(),
                "[data-locator=\"product-description\"]".to_string(),
                ".product-description".to_string(),
            ],
            breadcrumb_selector: "[class*=\"breadcrumb\"] a".to_string(),
            specification_selector: "[class*=\"specification\"]".to_string(),
            out_of_stock_phrases: vec![
                "out of stock".to_string(),
                "not available".to_string(),
                "currently unavailable".to_string(),
                "sold out".to_string(),
            ],
            defaults: FieldDefaults::default(),
        }
    }
}

/// A snapshot plus the fields that fell back to their defaults, for the
/// caller to log.
#[derive(Debug, Clone)]
pub struct ExtractedSnapshot {
    pub snapshot: ProductSnapshot,
    pub degraded_fields: Vec<&'static str>,
}

/// Extracts product snapshots from rendered page HTML.
#[derive(Debug)]
pub struct SnapshotExtractor {
    config: ExtractorConfig,
    sku_url_pattern: Regex,
    price_scan_pattern: Regex,
    digit_run_pattern: Regex,
}

impl SnapshotExtractor {
    /// Create an extractor with the default selector configuration.
    pub fn new() -> ExtractionResult<Self> {
        Self::with_config(ExtractorConfig::default())
    }

    /// Create an extractor, validating every configured selector up front.
    pub fn with_config(config: ExtractorConfig) -> ExtractionResult<Self> {
        let all_selectors = config
            .name_selectors
            .iter()
            .chain(&config.price_selectors)
            .chain(&config.sku_selectors)
            .chain(&config.in_stock_selectors)
            .chain(&config.unit_selectors)
            .chain(&config.brand_selectors)
            .chain(&config.description_selectors)
            .chain(std::iter::once(&config.breadcrumb_selector))
            .chain(std::iter::once(&config.specification_selector));

        for selector in all_selectors {
            Selector::parse(selector)
                .map_err(|e| ExtractionError::invalid_selector(selector, &e.to_string()))?;
        }

        Ok(Self {
            config,
            sku_url_pattern: Regex::new(r"_p(\d+)").expect("static pattern"),
            price_scan_pattern: Regex::new(r"\$\s*(\d+(?:,\d{3})*(?:\.\d{2})?)")
                .expect("static pattern"),
            digit_run_pattern: Regex::new(r"\d+").expect("static pattern"),
        })
    }

    /// Extract a snapshot from a product page.
    ///
    /// Fails only when no product name can be found; every other field
    /// degrades to its configured default and is listed in
    /// `degraded_fields`.
    pub fn extract_snapshot(
        &self,
        html: &Html,
        url: &str,
        supplier: &str,
    ) -> ExtractionResult<ExtractedSnapshot> {
        let mut degraded = Vec::new();

        let name = self
            .extract_name(html)
            .ok_or_else(|| ExtractionError::missing_name(url))?;

        let price = match self.extract_price(html) {
            Some(price) => price,
            None => {
                degraded.push("price");
                self.config.defaults.price
            }
        };

        let sku = match self
            .extract_sku_from_url(url)
            .or_else(|| self.extract_sku_from_page(html))
        {
            Some(sku) => sku,
            None => {
                degraded.push("sku");
                self.config.defaults.sku.clone()
            }
        };

        let page_text = html.root_element().text().collect::<String>();
        let in_stock = match self.extract_stock_status(html, &page_text) {
            Some(flag) => flag,
            None => {
                degraded.push("in_stock");
                self.config.defaults.in_stock
            }
        };

        let category = self.extract_category(html);
        if category.is_none() {
            degraded.push("category");
        }

        let unit = match self.first_selector_text(html, &self.config.unit_selectors) {
            Some(unit) => unit,
            None => {
                degraded.push("unit");
                self.config.defaults.unit.clone()
            }
        };

        let mut attributes = Map::new();
        if let Some(brand) = self.first_selector_text(html, &self.config.brand_selectors) {
            attributes.insert("brand".to_string(), Value::String(brand));
        }
        if let Some(description) = self.extract_description(html) {
            attributes.insert("description".to_string(), Value::String(description));
        }
        let specs = self.extract_specifications(html);
        if !specs.is_empty() {
            attributes.insert("specifications".to_string(), Value::Object(specs));
        }

        debug!(
            "Extracted '{}' (sku {}, price {}), {} degraded field(s)",
            name,
            sku,
            price,
            degraded.len()
        );

        Ok(ExtractedSnapshot {
            snapshot: ProductSnapshot {
                name,
                sku,
                price,
                url: url.to_string(),
                supplier: supplier.to_string(),
                category,
                in_stock,
                unit,
                attributes,
                captured_at: Utc::now(),
            },
            degraded_fields: degraded,
        })
    }

    fn extract_name(&self, html: &Html) -> Option<String> {
        self.first_selector_text(html, &self.config.name_selectors)
    }

    /// Selector candidates first (content attribute wins over text), then a
    /// bounded scan of the page text.
    fn extract_price(&self, html: &Html) -> Option<f64> {
        for selector in &self.config.price_selectors {
            let Ok(parsed) = Selector::parse(selector) else {
                continue;
            };
            for element in html.select(&parsed) {
                let price_text = element
                    .value()
                    .attr("content")
                    .map(str::to_string)
                    .unwrap_or_else(|| element.text().collect::<String>());
                let price = clean_price(&price_text);
                if price > 0.0 {
                    return Some(price);
                }
            }
        }

        let page_text = html.root_element().text().collect::<String>();
        for capture in self.price_scan_pattern.captures_iter(&page_text) {
            let price = clean_price(&capture[1]);
            if (PRICE_SCAN_MIN..=PRICE_SCAN_MAX).contains(&price) {
                return Some(price);
            }
        }

        None
    }

    /// Looks for the `_p<digits>` pattern retailers embed in product URLs.
    pub fn extract_sku_from_url(&self, url: &str) -> Option<String> {
        self.sku_url_pattern
            .captures(url)
            .map(|capture| capture[1].to_string())
    }

    fn extract_sku_from_page(&self, html: &Html) -> Option<String> {
        for selector in &self.config.sku_selectors {
            let Ok(parsed) = Selector::parse(selector) else {
                continue;
            };
            if let Some(element) = html.select(&parsed).next() {
                let text = element.text().collect::<String>();
                if let Some(digits) = self.digit_run_pattern.find(&text) {
                    return Some(digits.as_str().to_string());
                }
            }
        }
        None
    }

    /// Out-of-stock phrases anywhere in the page text take precedence; an
    /// explicit in-stock marker forces true; neither yields None so the
    /// caller applies the optimistic default.
    fn extract_stock_status(&self, html: &Html, page_text: &str) -> Option<bool> {
        let lowered = page_text.to_lowercase();
        for phrase in &self.config.out_of_stock_phrases {
            if lowered.contains(phrase) {
                return Some(false);
            }
        }

        for selector in &self.config.in_stock_selectors {
            let Ok(parsed) = Selector::parse(selector) else {
                continue;
            };
            if html.select(&parsed).next().is_some() {
                return Some(true);
            }
        }

        None
    }

    /// Second-to-last breadcrumb: skips the root "Home" crumb and the leaf,
    /// which is the product itself.
    fn extract_category(&self, html: &Html) -> Option<String> {
        let parsed = Selector::parse(&self.config.breadcrumb_selector).ok()?;
        let crumbs: Vec<ElementRef> = html.select(&parsed).collect();
        if crumbs.len() < 2 {
            return None;
        }
        let text = clean_text(&crumbs[crumbs.len() - 2].text().collect::<String>());
        (!text.is_empty()).then_some(text)
    }

    fn extract_description(&self, html: &Html) -> Option<String> {
        self.first_selector_text(html, &self.config.description_selectors)
            .map(|description| {
                if description.chars().count() > MAX_DESCRIPTION_LEN {
                    description.chars().take(MAX_DESCRIPTION_LEN).collect()
                } else {
                    description
                }
            })
    }

    /// Key/value pairs from specification tables. Rows need both cells
    /// non-empty after trimming; duplicate keys across tables are
    /// last-write-wins.
    fn extract_specifications(&self, html: &Html) -> Map<String, Value> {
        let mut specs = Map::new();
        let Ok(table_selector) = Selector::parse(&self.config.specification_selector) else {
            return specs;
        };
        let row_selector = Selector::parse("tr").expect("static selector");
        let cell_selector = Selector::parse("td, th").expect("static selector");

        for table in html.select(&table_selector) {
            for row in table.select(&row_selector) {
                let cells: Vec<ElementRef> = row.select(&cell_selector).collect();
                if cells.len() < 2 {
                    continue;
                }
                let key = clean_text(&cells[0].text().collect::<String>());
                let value = clean_text(&cells[1].text().collect::<String>());
                if !key.is_empty() && !value.is_empty() {
                    specs.insert(key, Value::String(value));
                }
            }
        }

        specs
    }

    /// First selector candidate yielding non-empty cleaned text.
    fn first_selector_text(&self, html: &Html, selectors: &[String]) -> Option<String> {
        for selector in selectors {
            let Ok(parsed) = Selector::parse(selector) else {
                continue;
            };
            for element in html.select(&parsed) {
                let text = clean_text(&element.text().collect::<String>());
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
        None
    }
}

/// Collapse whitespace runs to single spaces and trim. Idempotent.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extract a numeric price from text like "$45.99". Strips everything
/// except digits and the decimal point; anything unparsable yields 0.0.
pub fn clean_price(text: &str) -> f64 {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    cleaned.parse().unwrap_or(0.0)
}
