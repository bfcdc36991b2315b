//! In-memory repository fakes for exercising services without sqlite.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use scout_core::domain::procurement::{ProcurementRequest, ProcurementStatus};
use scout_core::domain::session::{ChatMessage, Session};
use scout_core::domain::supplier::{Part, PurchaseOrder, SupplierRecord, SupplierResponse};

use super::{
    CatalogRepository, MessageRepository, OrderRepository, ProcurementRepository,
    RepositoryError, ResponseRepository, SessionRepository,
};

#[derive(Default)]
pub struct InMemoryCatalogRepository {
    parts: RwLock<Vec<Part>>,
    orders: RwLock<Vec<PurchaseOrder>>,
}

impl InMemoryCatalogRepository {
    pub async fn add_part(&self, part: Part) {
        self.parts.write().await.push(part);
    }

    pub async fn add_order(&self, order: PurchaseOrder) {
        self.orders.write().await.push(order);
    }
}

#[async_trait::async_trait]
impl CatalogRepository for InMemoryCatalogRepository {
    async fn search_parts(
        &self,
        term: Option<&str>,
        limit: i64,
    ) -> Result<Vec<Part>, RepositoryError> {
        let parts = self.parts.read().await;
        let needle = term.map(|value| value.trim().to_lowercase()).filter(|v| !v.is_empty());

        let matched = parts
            .iter()
            .filter(|part| match &needle {
                Some(needle) => {
                    part.part_number.to_lowercase().contains(needle)
                        || part.part_description.to_lowercase().contains(needle)
                }
                None => true,
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect();

        Ok(matched)
    }

    async fn suppliers_for_part(
        &self,
        part_number: &str,
    ) -> Result<Vec<SupplierRecord>, RepositoryError> {
        let parts = self.parts.read().await;
        let description = parts
            .iter()
            .find(|part| part.part_number == part_number)
            .map(|part| part.part_description.clone())
            .unwrap_or_default();

        let orders = self.orders.read().await;
        let mut records: Vec<SupplierRecord> = orders
            .iter()
            .filter(|order| order.part_number == part_number)
            .map(|order| SupplierRecord {
                name: order.supplier_name.clone(),
                email: order.supplier_email.clone(),
                last_purchased: order.order_date,
                price: order.price,
                part_description: description.clone(),
            })
            .collect();
        records.sort_by(|a, b| b.last_purchased.cmp(&a.last_purchased));

        Ok(records)
    }
}

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<Vec<PurchaseOrder>>,
}

impl InMemoryOrderRepository {
    pub async fn orders(&self) -> Vec<PurchaseOrder> {
        self.orders.read().await.clone()
    }
}

#[async_trait::async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn append(&self, order: &PurchaseOrder) -> Result<(), RepositoryError> {
        self.orders.write().await.push(order.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryResponseRepository {
    responses: RwLock<HashMap<String, SupplierResponse>>,
}

#[async_trait::async_trait]
impl ResponseRepository for InMemoryResponseRepository {
    async fn upsert_latest(&self, response: &SupplierResponse) -> Result<(), RepositoryError> {
        let mut responses = self.responses.write().await;
        responses.insert(response.supplier_email.to_ascii_lowercase(), response.clone());
        Ok(())
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<SupplierResponse>, RepositoryError> {
        let responses = self.responses.read().await;
        let mut all: Vec<SupplierResponse> = responses.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all.truncate(limit.max(0) as usize);
        Ok(all)
    }

    async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<SupplierResponse>, RepositoryError> {
        let responses = self.responses.read().await;
        Ok(responses.get(&email.to_ascii_lowercase()).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryProcurementRepository {
    requests: RwLock<HashMap<Uuid, ProcurementRequest>>,
}

#[async_trait::async_trait]
impl ProcurementRepository for InMemoryProcurementRepository {
    async fn insert(&self, request: &ProcurementRequest) -> Result<(), RepositoryError> {
        self.requests.write().await.insert(request.id, request.clone());
        Ok(())
    }

    async fn find(&self, id: &Uuid) -> Result<Option<ProcurementRequest>, RepositoryError> {
        Ok(self.requests.read().await.get(id).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<ProcurementRequest>, RepositoryError> {
        let requests = self.requests.read().await;
        let mut pending: Vec<ProcurementRequest> = requests
            .values()
            .filter(|request| request.status == ProcurementStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    async fn mark_completed(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let mut requests = self.requests.write().await;
        match requests.get_mut(id) {
            Some(request) if request.status == ProcurementStatus::Pending => {
                request.status = ProcurementStatus::Completed;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_expired(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let mut requests = self.requests.write().await;
        match requests.get_mut(id) {
            Some(request) if request.status == ProcurementStatus::Pending => {
                request.status = ProcurementStatus::Expired;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn stamp_last_check(
        &self,
        id: &Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut requests = self.requests.write().await;
        if let Some(request) = requests.get_mut(id) {
            request.last_check_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySessionRepository {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

#[async_trait::async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn create(&self, session: &Session) -> Result<(), RepositoryError> {
        self.sessions.write().await.insert(session.id, session.clone());
        Ok(())
    }

    async fn find(&self, id: &Uuid) -> Result<Option<Session>, RepositoryError> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Session>, RepositoryError> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<Session> = sessions.values().cloned().collect();
        all.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(all)
    }

    async fn save_state(&self, session: &Session) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.id) {
            Some(existing) => {
                *existing = session.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn save_stream_progress(
        &self,
        id: &Uuid,
        buffer: &str,
    ) -> Result<bool, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(id) {
            Some(session) if session.is_processing => {
                session.streaming_buffer = Some(buffer.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        Ok(self.sessions.write().await.remove(id).is_some())
    }

    async fn delete_all(&self) -> Result<u64, RepositoryError> {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len() as u64;
        sessions.clear();
        Ok(count)
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<ChatMessage>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: &ChatMessage) -> Result<(), RepositoryError> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn list_for_session(
        &self,
        session_id: &Uuid,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|message| message.session_id == *session_id)
            .cloned()
            .collect())
    }

    async fn clear_session(&self, session_id: &Uuid) -> Result<u64, RepositoryError> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|message| message.session_id != *session_id);
        Ok((before - messages.len()) as u64)
    }
}
