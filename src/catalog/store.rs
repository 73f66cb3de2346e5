//! The lexical (non-embedding) candidate-discovery ladder (`spec.md` §4.A),
//! grounded in the original production-to-catalog lookup: primary predicates
//! first, a product-line fallback when no primary filter was given, a
//! device-type predicate ANDed in for precision, and a device-type-only
//! query used only when no primary or secondary filter was supplied at all.
//! Exactly one query is built per call; the strategy tag reflects which
//! filters were supplied, never how many rows came back.

use sqlx::Postgres;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, QueryBuilder};

use crate::error::CatalogError;
use crate::models::{CatalogProduct, CatalogStats, DiscoverFilters, DiscoveryResult};

const COLUMNS: &str = "product_identifier, product_type, product_description, brand_code, \
brand_label, range_code, range_label, subrange_code, subrange_label, devicetype_label, \
pl_services, commercial_status";

pub struct CatalogStore {
    pool: PgPool,
    table: String,
    default_limit: i64,
}

impl CatalogStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        table: impl Into<String>,
        default_limit: usize,
    ) -> Result<Self, CatalogError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool, table: table.into(), default_limit: default_limit as i64 })
    }

    pub fn with_pool(pool: PgPool, table: impl Into<String>, default_limit: usize) -> Self {
        Self { pool, table: table.into(), default_limit: default_limit as i64 }
    }

    pub async fn healthcheck(&self) -> Result<(), CatalogError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<CatalogStats, CatalogError> {
        let sql = format!("SELECT count(*) FROM {}", self.table);
        let (total_rows,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;

        let pl_sql = format!(
            "SELECT pl_services, count(*) FROM {} WHERE pl_services IS NOT NULL \
             GROUP BY pl_services ORDER BY count(*) DESC LIMIT 10",
            self.table
        );
        let top_product_lines: Vec<(String, i64)> =
            sqlx::query_as(&pl_sql).fetch_all(&self.pool).await?;

        let brand_sql = format!(
            "SELECT brand_label, count(*) FROM {} WHERE brand_label IS NOT NULL \
             GROUP BY brand_label ORDER BY count(*) DESC LIMIT 10",
            self.table
        );
        let top_brands: Vec<(String, i64)> = sqlx::query_as(&brand_sql).fetch_all(&self.pool).await?;

        Ok(CatalogStats { total_rows, top_product_lines, top_brands })
    }

    /// Runs the predicate ladder for one extracted product range.
    pub async fn discover(
        &self,
        filters: &DiscoverFilters,
        limit: Option<i64>,
    ) -> Result<DiscoveryResult, CatalogError> {
        let limit = limit.unwrap_or(self.default_limit);

        let mut primary_names = Vec::new();
        let mut primary_or = Vec::new();
        if let Some(identifier) = non_empty(&filters.product_identifier) {
            primary_names.push("product_identifier");
            primary_or.push(("product_identifier", format!("%{identifier}%")));
        }
        if let Some(range_label) = non_empty(&filters.range_label) {
            primary_names.push("range_label");
            primary_or.push(("range_label", format!("%{range_label}%")));
        }

        let secondary_pattern = non_empty(&filters.product_line)
            .map(|pl| format!("%{}%", pl.split('(').next().unwrap_or(&pl).trim()));

        let device_keyword = non_empty(&filters.description).and_then(|d| device_type_keyword(&d));

        // Primary predicates, OR-combined; when absent, the product-line
        // predicate is promoted to primary (spec.md: "if only secondary
        // predicates exist, use them as the primary filter").
        let (or_columns, strategy_name): (Vec<(&str, String)>, &str) = if !primary_or.is_empty() {
            (primary_or, "primary")
        } else if let Some(pattern) = secondary_pattern.clone() {
            (vec![("pl_services", pattern)], "product_line")
        } else {
            (Vec::new(), "none")
        };

        if !or_columns.is_empty() {
            let rows = self.run_or_and_device(&or_columns, device_keyword, limit).await?;
            let mut tag = if strategy_name == "primary" {
                primary_names.join("+")
            } else {
                strategy_name.to_string()
            };
            if device_keyword.is_some() {
                tag.push_str("+device_type");
            }
            return Ok(DiscoveryResult { candidates: rows, strategy_tag: tag });
        }

        // No primary/secondary filter was supplied at all: the device-type
        // predicate alone is the only strategy left.
        if let Some(keyword) = device_keyword {
            let rows = self.query_device_type_only(keyword, limit).await?;
            return Ok(DiscoveryResult { candidates: rows, strategy_tag: "fallback".to_string() });
        }

        Ok(DiscoveryResult { candidates: Vec::new(), strategy_tag: "fallback".to_string() })
    }

    async fn run_or_and_device(
        &self,
        or_columns: &[(&str, String)],
        device_keyword: Option<&'static str>,
        limit: i64,
    ) -> Result<Vec<CatalogProduct>, CatalogError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM {} WHERE (", self.table));

        for (i, (column, pattern)) in or_columns.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(format!("{column} ILIKE "));
            qb.push_bind(pattern.clone());
        }
        qb.push(")");

        if let Some(keyword) = device_keyword {
            qb.push(" AND devicetype_label ILIKE ");
            qb.push_bind(format!("%{keyword}%"));
        }

        qb.push(" ORDER BY product_identifier LIMIT ");
        qb.push_bind(limit);

        let rows = qb.build_query_as::<CatalogProduct>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn query_device_type_only(
        &self,
        keyword: &str,
        limit: i64,
    ) -> Result<Vec<CatalogProduct>, CatalogError> {
        let sql = format!(
            "SELECT {COLUMNS} FROM {} WHERE devicetype_label ILIKE $1 \
             ORDER BY product_identifier LIMIT $2",
            self.table
        );
        let pattern = format!("%{keyword}%");
        let rows =
            sqlx::query_as(&sql).bind(pattern).bind(limit).fetch_all(&self.pool).await?;
        Ok(rows)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Maps free-text description keywords onto the fixed device-type predicate
/// vocabulary (`spec.md` §4.A).
fn device_type_keyword(description: &str) -> Option<&'static str> {
    let text = description.to_lowercase();
    if text.contains("switchgear") {
        Some("switchgear")
    } else if text.contains("transformer") {
        Some("transformer")
    } else if text.contains("drive") || text.contains("vsd") {
        Some("drive")
    } else if text.contains("contactor") {
        Some("contactor")
    } else if text.contains("relay") {
        Some("relay")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_keyword_matches_known_categories() {
        assert_eq!(device_type_keyword("Medium Voltage Switchgear"), Some("switchgear"));
        assert_eq!(device_type_keyword("Variable Speed Drive (VSD)"), Some("drive"));
        assert_eq!(device_type_keyword("unrelated widget"), None);
    }

    #[test]
    fn non_empty_filters_blank_strings() {
        assert_eq!(non_empty(&Some("  ".to_string())), None);
        assert_eq!(non_empty(&Some(" PIX ".to_string())), Some("PIX".to_string()));
        assert_eq!(non_empty(&None), None);
    }
}
