use chrono::NaiveDateTime;
use thiserror::Error;

// ── Product ───────────────────────────────────────────────────────────────────

/// One listing entry as extracted from a rendered page.
///
/// Only built through the extractor, which guarantees `name` and `price_now`
/// are present, `price_before` falls back to `price_now`, and `on_promotion`
/// reflects the two prices.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRecord {
    pub name: Option<String>,
    pub category: String,
    pub price_before: Option<f64>,
    pub price_now: Option<f64>,
    pub on_promotion: bool,
    pub measurements: Option<String>,
    pub product_id: Option<String>,
}

impl ProductRecord {
    /// 0/1 flag as stored in the destination table.
    pub fn promotion_flag(&self) -> i16 {
        i16::from(self.on_promotion)
    }
}

// ── Ranked product ────────────────────────────────────────────────────────────

/// A product after the ranking pass: global position across the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedProduct {
    pub global_rank: u32,
    pub extracted_at: NaiveDateTime,
    pub record: ProductRecord,
}

// ── Page result ───────────────────────────────────────────────────────────────

/// Why a page produced no products.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PageError {
    /// Product container never appeared; usually past the last page or a slow render.
    #[error("product container did not appear within {0}s")]
    RenderTimeout(u64),

    #[error("fetch failed: {0}")]
    FetchFailure(String),

    /// The worker task died before reporting (panic or pool shutdown).
    #[error("worker lost: {0}")]
    WorkerLost(String),
}

/// Outcome of scraping one page ordinal. Produced exactly once per ordinal.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    pub page_ordinal: u32,
    pub products: Vec<ProductRecord>,
    pub source_url: String,
    pub error: Option<PageError>,
}

impl PageResult {
    pub fn ok(page_ordinal: u32, source_url: String, products: Vec<ProductRecord>) -> Self {
        Self { page_ordinal, products, source_url, error: None }
    }

    pub fn failed(page_ordinal: u32, source_url: String, error: PageError) -> Self {
        Self { page_ordinal, products: Vec::new(), source_url, error: Some(error) }
    }

    pub fn has_data(&self) -> bool {
        self.error.is_none() && !self.products.is_empty()
    }
}
