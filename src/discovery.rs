//! Candidate discovery stage (component F, `spec.md` §4.F): builds a
//! lexical filter from one extracted range and asks the Catalog Store for
//! candidates.

use crate::catalog::CatalogStore;
use crate::extraction::ExtractedProduct;
use crate::models::{CandidateRef, CatalogProduct, DiscoverFilters};

/// Discovery output for one extracted product. The full catalog rows are
/// kept (not just `CandidateRef`) because the orchestrator needs them to
/// build `letter_product_matches` once the reranker picks a winner.
pub struct ProductCandidates {
    pub candidates: Vec<CatalogProduct>,
    pub strategy_tag: String,
}

impl ProductCandidates {
    pub fn as_refs(&self) -> Vec<CandidateRef> {
        self.candidates.iter().map(CandidateRef::from).collect()
    }
}

/// Runs discovery for every extracted product. Discovery errors are
/// swallowed into an empty candidate set per `spec.md` §4.F ("Discovery
/// errors -> treated as zero candidates, not fatal"); only a log line
/// distinguishes them from a genuine zero-candidate result.
pub async fn discover_all(
    catalog: &CatalogStore,
    products: &[ExtractedProduct],
    limit: usize,
) -> Vec<ProductCandidates> {
    let mut results = Vec::with_capacity(products.len());
    for product in products {
        let filters = DiscoverFilters {
            product_identifier: None,
            range_label: Some(product.range_label.clone()),
            product_line: Some(product.product_line.clone()),
            description: Some(product.description.clone()),
        };
        match catalog.discover(&filters, Some(limit as i64)).await {
            Ok(result) => {
                if result.candidates.is_empty() {
                    tracing::info!(range = %product.range_label, "discovery returned zero candidates");
                }
                results.push(ProductCandidates {
                    candidates: result.candidates,
                    strategy_tag: result.strategy_tag,
                });
            },
            Err(err) => {
                tracing::warn!(range = %product.range_label, error = %err, "discovery query failed, treating as zero candidates");
                results.push(ProductCandidates { candidates: Vec::new(), strategy_tag: "error".to_string() });
            },
        }
    }
    results
}
