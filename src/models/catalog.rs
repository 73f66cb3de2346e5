//! Read-only projection of the ~342k-row product catalog table
//! (`spec.md` §3.1 "CatalogProduct", §4.A).

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One row of the `products` catalog table, as selected by
/// `CatalogStore::discover`. Field names track the catalog's own column
/// vocabulary rather than a renamed idiomatic-Rust one, because the
/// orchestrator round-trips `product_identifier` verbatim into
/// `letter_product_matches.catalog_product_identifier`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CatalogProduct {
    pub product_identifier: String,
    pub product_type: Option<String>,
    pub product_description: Option<String>,
    pub brand_code: Option<String>,
    pub brand_label: Option<String>,
    pub range_code: Option<String>,
    pub range_label: String,
    pub subrange_code: Option<String>,
    pub subrange_label: Option<String>,
    pub devicetype_label: Option<String>,
    pub pl_services: Option<String>,
    pub commercial_status: Option<String>,
}

/// The narrow projection handed to the reranker (`spec.md` §4.F): "plain
/// records, NOT catalog entities".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRef {
    pub product_identifier: String,
    pub range_label: String,
    pub subrange_label: Option<String>,
    pub description: Option<String>,
    pub brand_label: Option<String>,
    pub product_line: Option<String>,
    pub devicetype_label: Option<String>,
    pub commercial_status: Option<String>,
}

impl From<&CatalogProduct> for CandidateRef {
    fn from(p: &CatalogProduct) -> Self {
        Self {
            product_identifier: p.product_identifier.clone(),
            range_label: p.range_label.clone(),
            subrange_label: p.subrange_label.clone(),
            description: p.product_description.clone(),
            brand_label: p.brand_label.clone(),
            product_line: p.pl_services.clone(),
            devicetype_label: p.devicetype_label.clone(),
            commercial_status: p.commercial_status.clone(),
        }
    }
}

/// Filter record for one `discover` call (`spec.md` §4.A). All fields are
/// optional; the predicate ladder decides which combination to use.
#[derive(Debug, Clone, Default)]
pub struct DiscoverFilters {
    pub product_identifier: Option<String>,
    pub range_label: Option<String>,
    pub product_line: Option<String>,
    pub description: Option<String>,
}

/// Result of one `discover` call.
#[derive(Debug, Clone)]
pub struct DiscoveryResult {
    pub candidates: Vec<CatalogProduct>,
    /// "+"-joined names of the filters that fired, or "fallback".
    pub strategy_tag: String,
}

/// Catalog-wide aggregate statistics (`spec.md` §4.A `stats()`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total_rows: i64,
    pub top_product_lines: Vec<(String, i64)>,
    pub top_brands: Vec<(String, i64)>,
}
