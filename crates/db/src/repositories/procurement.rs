use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use scout_core::domain::procurement::{
    ContactedSupplier, ProcurementRequest, ProcurementStatus,
};

use super::{decode_timestamp, decode_uuid, ProcurementRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProcurementRepository {
    pool: DbPool,
}

impl SqlProcurementRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcurementRepository for SqlProcurementRepository {
    async fn insert(&self, request: &ProcurementRequest) -> Result<(), RepositoryError> {
        let suppliers = serde_json::to_string(&request.suppliers_contacted)
            .map_err(|err| RepositoryError::Decode(format!("encode suppliers_contacted: {err}")))?;

        sqlx::query(
            r#"
            INSERT INTO procurement_requests (
                id, session_id, part_description, suppliers_contacted,
                status, created_at, expires_at, last_check_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request.id.to_string())
        .bind(request.session_id.to_string())
        .bind(&request.part_description)
        .bind(suppliers)
        .bind(request.status.as_str())
        .bind(request.created_at.to_rfc3339())
        .bind(request.expires_at.to_rfc3339())
        .bind(request.last_check_at.map(|at| at.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: &Uuid) -> Result<Option<ProcurementRequest>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, session_id, part_description, suppliers_contacted,
                   status, created_at, expires_at, last_check_at
            FROM procurement_requests
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(request_from_row).transpose()
    }

    async fn list_pending(&self) -> Result<Vec<ProcurementRequest>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, part_description, suppliers_contacted,
                   status, created_at, expires_at, last_check_at
            FROM procurement_requests
            WHERE status = 'pending'
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(request_from_row).collect()
    }

    async fn mark_completed(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE procurement_requests SET status = 'completed' \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_expired(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE procurement_requests SET status = 'expired' \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn stamp_last_check(
        &self,
        id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE procurement_requests SET last_check_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn request_from_row(row: &SqliteRow) -> Result<ProcurementRequest, RepositoryError> {
    let id: String = row.get("id");
    let session_id: String = row.get("session_id");
    let suppliers_raw: String = row.get("suppliers_contacted");
    let status_raw: String = row.get("status");
    let created_at: String = row.get("created_at");
    let expires_at: String = row.get("expires_at");
    let last_check_at: Option<String> = row.get("last_check_at");

    let suppliers_contacted: Vec<ContactedSupplier> = serde_json::from_str(&suppliers_raw)
        .map_err(|err| RepositoryError::Decode(format!("decode suppliers_contacted: {err}")))?;
    let status = ProcurementStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown procurement status `{status_raw}`"))
    })?;

    Ok(ProcurementRequest {
        id: decode_uuid("id", &id)?,
        session_id: decode_uuid("session_id", &session_id)?,
        part_description: row.get("part_description"),
        suppliers_contacted,
        status,
        created_at: decode_timestamp("created_at", &created_at)?,
        expires_at: decode_timestamp("expires_at", &expires_at)?,
        last_check_at: last_check_at
            .as_deref()
            .map(|value| decode_timestamp("last_check_at", value))
            .transpose()?,
    })
}
