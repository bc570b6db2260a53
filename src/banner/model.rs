use chrono::NaiveDate;
use indexmap::IndexMap;
use tracing::warn;

/// Metafield namespace every banner date lives under.
pub const METAFIELD_NAMESPACE: &str = "custom";

/// One promotion as read from the database: a product plus its sale and
/// price-increase (PI) date ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromotionRecord {
    pub product_id: String,
    pub sale_start: Option<NaiveDate>,
    pub sale_end: Option<NaiveDate>,
    pub pi_start: Option<NaiveDate>,
    pub pi_end: Option<NaiveDate>,
}

impl PromotionRecord {
    pub fn new(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            ..Self::default()
        }
    }

    /// Widen this record with another row for the same product: starts keep
    /// the earliest date, ends keep the latest.
    pub fn merge(&mut self, other: &PromotionRecord) {
        self.sale_start = earliest(self.sale_start, other.sale_start);
        self.sale_end = latest(self.sale_end, other.sale_end);
        self.pi_start = earliest(self.pi_start, other.pi_start);
        self.pi_end = latest(self.pi_end, other.pi_end);
    }
}

fn earliest(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Option<NaiveDate> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<NaiveDate>, b: Option<NaiveDate>) -> Option<NaiveDate> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}

/// Collapse source rows into one record per product, in first-seen order.
///
/// `normalize_id` maps a raw identifier to the key used remotely; rows it
/// rejects (blank ids) are skipped with a warning.
pub fn merge_by_product<F>(rows: Vec<PromotionRecord>, normalize_id: F) -> Vec<PromotionRecord>
where
    F: Fn(&str) -> Option<String>,
{
    let mut by_product: IndexMap<String, PromotionRecord> = IndexMap::new();
    for mut row in rows {
        let Some(id) = normalize_id(&row.product_id) else {
            warn!(raw_id = %row.product_id, "skipping promotion row without a usable product id");
            continue;
        };
        row.product_id = id.clone();
        match by_product.get_mut(&id) {
            Some(existing) => existing.merge(&row),
            None => {
                by_product.insert(id, row);
            }
        }
    }
    by_product.into_values().collect()
}

/// The four product metafields a banner is driven by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BannerField {
    SaleStart,
    SaleEnd,
    PiStart,
    PiEnd,
}

impl BannerField {
    /// Reconciliation order.
    pub const ALL: [BannerField; 4] = [
        BannerField::SaleStart,
        BannerField::SaleEnd,
        BannerField::PiStart,
        BannerField::PiEnd,
    ];

    /// Metafield key under [`METAFIELD_NAMESPACE`].
    pub fn key(&self) -> &'static str {
        match self {
            BannerField::SaleStart => "promo_sale_start_date",
            BannerField::SaleEnd => "promo_sale_end_date",
            BannerField::PiStart => "promo_pi_start_date",
            BannerField::PiEnd => "promo_pi_end_date",
        }
    }
}

/// Resolved banner dates for one product. `None` means the remote field should not exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BannerFieldSet {
    pub sale_start: Option<NaiveDate>,
    pub sale_end: Option<NaiveDate>,
    pub pi_start: Option<NaiveDate>,
    pub pi_end: Option<NaiveDate>,
}

impl BannerFieldSet {
    pub fn get(&self, field: BannerField) -> Option<NaiveDate> {
        match field {
            BannerField::SaleStart => self.sale_start,
            BannerField::SaleEnd => self.sale_end,
            BannerField::PiStart => self.pi_start,
            BannerField::PiEnd => self.pi_end,
        }
    }
}
