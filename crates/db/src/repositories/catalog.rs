use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use scout_core::domain::supplier::{Part, SupplierRecord};

use super::{decode_timestamp, CatalogRepository, RepositoryError};
use crate::DbPool;

pub struct SqlCatalogRepository {
    pool: DbPool,
}

impl SqlCatalogRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogRepository for SqlCatalogRepository {
    async fn search_parts(
        &self,
        term: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Part>, RepositoryError> {
        let rows = match term.map(str::trim).filter(|value| !value.is_empty()) {
            Some(term) => {
                let pattern = format!("%{}%", term.to_lowercase());
                sqlx::query(
                    r#"
                    SELECT part_number, part_description
                    FROM parts
                    WHERE lower(part_number) LIKE ? OR lower(part_description) LIKE ?
                    ORDER BY part_number
                    LIMIT ?
                    "#,
                )
                .bind(&pattern)
                .bind(&pattern)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT part_number, part_description
                    FROM parts
                    ORDER BY part_number
                    LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(part_from_row).collect()
    }

    async fn suppliers_for_part(
        &self,
        part_number: &str,
    ) -> Result<Vec<SupplierRecord>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT po.supplier_name, po.supplier_email, po.order_date, po.price,
                   p.part_description
            FROM purchase_orders po
            JOIN parts p ON p.part_number = po.part_number
            WHERE po.part_number = ?
            ORDER BY po.order_date DESC
            "#,
        )
        .bind(part_number)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(supplier_from_row).collect()
    }
}

fn part_from_row(row: &SqliteRow) -> Result<Part, RepositoryError> {
    Ok(Part {
        part_number: row.get("part_number"),
        part_description: row.get("part_description"),
    })
}

fn supplier_from_row(row: &SqliteRow) -> Result<SupplierRecord, RepositoryError> {
    let order_date: String = row.get("order_date");
    Ok(SupplierRecord {
        name: row.get("supplier_name"),
        email: row.get("supplier_email"),
        last_purchased: decode_timestamp("order_date", &order_date)?,
        price: row.get("price"),
        part_description: row.get("part_description"),
    })
}

#[cfg(test)]
mod tests {
    use crate::connect_with_settings;
    use crate::fixtures::seed_demo_catalog;
    use crate::migrations::run_pending;
    use crate::repositories::{CatalogRepository, SqlCatalogRepository};

    async fn seeded_repository() -> SqlCatalogRepository {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("migrate");
        seed_demo_catalog(&pool).await.expect("seed");
        SqlCatalogRepository::new(pool)
    }

    #[tokio::test]
    async fn search_matches_description_case_insensitively() {
        let repository = seeded_repository().await;

        let parts = repository.search_parts(Some("HYDRAULIC"), 20).await.expect("search");

        assert!(!parts.is_empty());
        assert!(parts
            .iter()
            .all(|part| part.part_description.to_lowercase().contains("hydraulic")));
    }

    #[tokio::test]
    async fn search_without_term_lists_catalog_up_to_limit() {
        let repository = seeded_repository().await;

        let parts = repository.search_parts(None, 2).await.expect("list");
        assert_eq!(parts.len(), 2);
    }

    #[tokio::test]
    async fn unknown_term_returns_empty() {
        let repository = seeded_repository().await;

        let parts = repository.search_parts(Some("unobtainium"), 20).await.expect("search");
        assert!(parts.is_empty());
    }

    #[tokio::test]
    async fn suppliers_are_ordered_most_recent_first() {
        let repository = seeded_repository().await;

        let suppliers = repository.suppliers_for_part("HX-200").await.expect("suppliers");

        assert!(suppliers.len() >= 2);
        for window in suppliers.windows(2) {
            assert!(window[0].last_purchased >= window[1].last_purchased);
        }
        assert!(suppliers[0].part_description.contains("hydraulic"));
    }

    #[tokio::test]
    async fn part_without_orders_yields_no_suppliers() {
        let repository = seeded_repository().await;

        let suppliers = repository.suppliers_for_part("ZR-900").await.expect("suppliers");
        assert!(suppliers.is_empty());
    }
}
