use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};

use scout_core::domain::supplier::SupplierResponse;

use super::{decode_timestamp, decode_uuid, RepositoryError, ResponseRepository};
use crate::DbPool;

pub struct SqlResponseRepository {
    pool: DbPool,
}

impl SqlResponseRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResponseRepository for SqlResponseRepository {
    async fn upsert_latest(&self, response: &SupplierResponse) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO supplier_responses (
                id, supplier_email, supplier_name, price, response_text, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(supplier_email) DO UPDATE SET
                supplier_name = excluded.supplier_name,
                price = excluded.price,
                response_text = excluded.response_text,
                created_at = excluded.created_at
            "#,
        )
        .bind(response.id.to_string())
        .bind(&response.supplier_email)
        .bind(&response.supplier_name)
        .bind(response.price)
        .bind(&response.response_text)
        .bind(response.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<SupplierResponse>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, supplier_email, supplier_name, price, response_text, created_at
            FROM supplier_responses
            ORDER BY created_at DESC, supplier_email
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(response_from_row).collect()
    }

    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<SupplierResponse>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, supplier_email, supplier_name, price, response_text, created_at
            FROM supplier_responses
            WHERE lower(supplier_email) = lower(?)
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(response_from_row).transpose()
    }
}

fn response_from_row(row: &SqliteRow) -> Result<SupplierResponse, RepositoryError> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");
    Ok(SupplierResponse {
        id: decode_uuid("id", &id)?,
        supplier_email: row.get("supplier_email"),
        supplier_name: row.get("supplier_name"),
        price: row.get("price"),
        response_text: row.get("response_text"),
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}
