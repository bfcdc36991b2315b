use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use scout_core::domain::procurement::ProcurementRequest;
use scout_core::domain::session::{ChatMessage, Session};
use scout_core::domain::supplier::{Part, PurchaseOrder, SupplierRecord, SupplierResponse};

pub mod catalog;
pub mod memory;
pub mod orders;
pub mod procurement;
pub mod responses;
pub mod sessions;

pub use catalog::SqlCatalogRepository;
pub use memory::{
    InMemoryCatalogRepository, InMemoryMessageRepository, InMemoryOrderRepository,
    InMemoryProcurementRepository, InMemoryResponseRepository, InMemorySessionRepository,
};
pub use orders::SqlOrderRepository;
pub use procurement::SqlProcurementRepository;
pub use responses::SqlResponseRepository;
pub use sessions::{SqlMessageRepository, SqlSessionRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Read access to the ERP parts catalog and its purchase history.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    /// Case-insensitive substring search over part numbers and descriptions.
    /// `None` lists the catalog up to `limit`.
    async fn search_parts(
        &self,
        term: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Part>, RepositoryError>;

    /// Purchase-history suppliers for one part, most recent order first.
    async fn suppliers_for_part(
        &self,
        part_number: &str,
    ) -> Result<Vec<SupplierRecord>, RepositoryError>;
}

/// Append-only purchase-order ledger.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn append(&self, order: &PurchaseOrder) -> Result<(), RepositoryError>;
}

/// Latest-reply-wins supplier response table.
#[async_trait]
pub trait ResponseRepository: Send + Sync {
    async fn upsert_latest(&self, response: &SupplierResponse) -> Result<(), RepositoryError>;

    async fn list_recent(&self, limit: i64) -> Result<Vec<SupplierResponse>, RepositoryError>;

    /// Lookup by supplier email, ignoring ASCII case.
    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<SupplierResponse>, RepositoryError>;
}

#[async_trait]
pub trait ProcurementRepository: Send + Sync {
    async fn insert(&self, request: &ProcurementRequest) -> Result<(), RepositoryError>;

    async fn find(&self, id: &Uuid) -> Result<Option<ProcurementRequest>, RepositoryError>;

    async fn list_pending(&self) -> Result<Vec<ProcurementRequest>, RepositoryError>;

    /// Compare-and-set `pending -> completed`. Returns whether this call won
    /// the transition; a second caller observes `false`.
    async fn mark_completed(&self, id: &Uuid) -> Result<bool, RepositoryError>;

    /// Compare-and-set `pending -> expired`, same contract as
    /// [`mark_completed`](Self::mark_completed).
    async fn mark_expired(&self, id: &Uuid) -> Result<bool, RepositoryError>;

    async fn stamp_last_check(
        &self,
        id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<(), RepositoryError>;

    async fn find(&self, id: &Uuid) -> Result<Option<Session>, RepositoryError>;

    /// All sessions, most recently active first.
    async fn list(&self) -> Result<Vec<Session>, RepositoryError>;

    /// Persist the mutable columns of an existing session. Returns whether
    /// the session row existed.
    async fn save_state(&self, session: &Session) -> Result<bool, RepositoryError>;

    /// Persist partial streamed output for an in-flight turn. Guarded on
    /// `is_processing` so a write scheduled during the turn cannot land
    /// after the turn finished and resurrect stale state. Returns whether
    /// the buffer was written.
    async fn save_stream_progress(
        &self,
        id: &Uuid,
        buffer: &str,
    ) -> Result<bool, RepositoryError>;

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError>;

    async fn delete_all(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(&self, message: &ChatMessage) -> Result<(), RepositoryError>;

    /// Full transcript for a session in insertion order.
    async fn list_for_session(
        &self,
        session_id: &Uuid,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;

    async fn clear_session(&self, session_id: &Uuid) -> Result<u64, RepositoryError>;
}

pub(crate) fn decode_uuid(column: &str, value: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(value)
        .map_err(|err| RepositoryError::Decode(format!("invalid uuid in `{column}`: {err}")))
}

pub(crate) fn decode_timestamp(
    column: &str,
    value: &str,
) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {err}")))
}
