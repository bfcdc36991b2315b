//! Session lifecycle: creation with derived titles, event application, and
//! per-session locking so concurrent turns and tracker updates serialize.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use scout_core::domain::session::{auto_title, ChatMessage, Session, SessionEvent};
use scout_db::repositories::{MessageRepository, RepositoryError, SessionRepository};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
    messages: Arc<dyn MessageRepository>,
    default_model: String,
    locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SessionService {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        messages: Arc<dyn MessageRepository>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            messages,
            default_model: default_model.into(),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    /// One async mutex per session id. Turn execution and tracker
    /// notifications for the same session take this lock.
    pub fn lock_for(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(session_id).or_default().clone()
    }

    /// Fetch the session, creating it on first contact. The title is derived
    /// from the first message when one is available.
    pub async fn ensure_session(
        &self,
        session_id: Uuid,
        first_message: Option<&str>,
    ) -> Result<Session, ServiceError> {
        if let Some(existing) = self.sessions.find(&session_id).await? {
            return Ok(existing);
        }

        let now = Utc::now();
        let session =
            Session::new(session_id, auto_title(first_message, now), &self.default_model, now);
        self.sessions.create(&session).await?;
        tracing::info!(session_id = %session_id, title = %session.title, "session created");
        Ok(session)
    }

    /// Create a session with a fresh id. An explicit title wins; otherwise
    /// the title is derived from the first message.
    pub async fn open(
        &self,
        title: Option<String>,
        first_message: Option<&str>,
    ) -> Result<Session, ServiceError> {
        let now = Utc::now();
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| auto_title(first_message, now));
        let session = Session::new(Uuid::new_v4(), title, &self.default_model, now);
        self.sessions.create(&session).await?;
        tracing::info!(session_id = %session.id, title = %session.title, "session created");
        Ok(session)
    }

    /// Apply one event to a stored session and persist the result.
    pub async fn apply(&self, session_id: Uuid, event: SessionEvent) -> Result<Session, ServiceError> {
        let mut session = self
            .sessions
            .find(&session_id)
            .await?
            .ok_or(ServiceError::SessionNotFound(session_id))?;
        session.apply(event);
        if !self.sessions.save_state(&session).await? {
            return Err(ServiceError::SessionNotFound(session_id));
        }
        Ok(session)
    }

    /// Append an agent-initiated notification to the transcript. Takes the
    /// session lock, so the append waits for any in-flight turn and never
    /// interleaves with a turn's own writes. Callers already holding the
    /// lock must append through the message repository directly.
    pub async fn notify(
        &self,
        session_id: Uuid,
        content: impl Into<String>,
    ) -> Result<ChatMessage, ServiceError> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        if self.sessions.find(&session_id).await?.is_none() {
            return Err(ServiceError::SessionNotFound(session_id));
        }
        let message = ChatMessage::notification(session_id, content, Utc::now());
        self.messages.append(&message).await?;
        Ok(message)
    }

    /// Persist partial streamed output for an in-flight turn. This runs
    /// outside the session lock on purpose: the repository write only lands
    /// while the session is marked processing, so a persist scheduled during
    /// the turn becomes a no-op once the turn has finished.
    pub async fn stream_progress(
        &self,
        session_id: Uuid,
        buffer: &str,
    ) -> Result<bool, ServiceError> {
        Ok(self.sessions.save_stream_progress(&session_id, buffer).await?)
    }

    pub async fn find(&self, session_id: Uuid) -> Result<Option<Session>, ServiceError> {
        Ok(self.sessions.find(&session_id).await?)
    }

    pub async fn list(&self) -> Result<Vec<Session>, ServiceError> {
        Ok(self.sessions.list().await?)
    }

    pub async fn rename(&self, session_id: Uuid, title: String) -> Result<Session, ServiceError> {
        self.apply(session_id, SessionEvent::Renamed { title }).await
    }

    pub async fn delete(&self, session_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.sessions.delete(&session_id).await?)
    }

    pub async fn delete_all(&self) -> Result<u64, ServiceError> {
        Ok(self.sessions.delete_all().await?)
    }

    pub async fn transcript(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, ServiceError> {
        Ok(self.messages.list_for_session(&session_id).await?)
    }

    /// Wipe the transcript but keep the session record.
    pub async fn clear_transcript(&self, session_id: Uuid) -> Result<u64, ServiceError> {
        if self.sessions.find(&session_id).await?.is_none() {
            return Err(ServiceError::SessionNotFound(session_id));
        }
        Ok(self.messages.clear_session(&session_id).await?)
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use scout_core::domain::session::SessionEvent;
    use scout_db::repositories::{InMemoryMessageRepository, InMemorySessionRepository};

    use super::{ServiceError, SessionService};

    fn service() -> SessionService {
        SessionService::new(
            Arc::new(InMemorySessionRepository::default()),
            Arc::new(InMemoryMessageRepository::default()),
            "llama3.1",
        )
    }

    #[tokio::test]
    async fn first_contact_creates_a_titled_session() {
        let service = service();
        let session_id = Uuid::new_v4();

        let session =
            service.ensure_session(session_id, Some("Need 40 HX-200 actuators")).await.expect("session");

        assert_eq!(session.id, session_id);
        assert!(session.title.starts_with("Need 40 HX-200 actuators"));
        assert_eq!(session.model, "llama3.1");

        // Second call returns the stored session untouched.
        let again = service.ensure_session(session_id, Some("other text")).await.expect("session");
        assert_eq!(again.title, session.title);
    }

    #[tokio::test]
    async fn apply_persists_the_transition() {
        let service = service();
        let session_id = Uuid::new_v4();
        service.ensure_session(session_id, None).await.expect("session");

        let updated = service
            .apply(session_id, SessionEvent::ModelChanged { model: "qwen2.5".to_string() })
            .await
            .expect("apply");
        assert_eq!(updated.model, "qwen2.5");

        let stored = service.find(session_id).await.expect("find").expect("stored");
        assert_eq!(stored.model, "qwen2.5");
    }

    #[tokio::test]
    async fn apply_to_missing_session_is_not_found() {
        let service = service();
        let result = service
            .apply(Uuid::new_v4(), SessionEvent::Renamed { title: "x".to_string() })
            .await;
        assert!(matches!(result, Err(ServiceError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn notify_appends_a_system_notification() {
        let service = service();
        let session_id = Uuid::new_v4();
        service.ensure_session(session_id, None).await.expect("session");

        service.notify(session_id, "New quote from Acme ($450.00)").await.expect("notify");

        let transcript = service.transcript(session_id).await.expect("transcript");
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].is_system_notification);
        assert!(transcript[0].content.contains("Acme"));
    }

    #[tokio::test]
    async fn open_prefers_the_explicit_title() {
        let service = service();

        let titled = service
            .open(Some("HX-200 sourcing".to_string()), Some("find actuators"))
            .await
            .expect("session");
        assert_eq!(titled.title, "HX-200 sourcing");

        let derived = service
            .open(Some("   ".to_string()), Some("Need 40 HX-200 actuators"))
            .await
            .expect("session");
        assert!(derived.title.starts_with("Need 40 HX-200 actuators"));
        assert_ne!(titled.id, derived.id);
    }

    #[tokio::test]
    async fn clear_transcript_keeps_the_session() {
        let service = service();
        let session_id = Uuid::new_v4();
        service.ensure_session(session_id, None).await.expect("session");
        service.notify(session_id, "New quote from Acme ($450.00)").await.expect("notify");

        let cleared = service.clear_transcript(session_id).await.expect("clear");
        assert_eq!(cleared, 1);
        assert!(service.transcript(session_id).await.expect("transcript").is_empty());
        assert!(service.find(session_id).await.expect("find").is_some());

        let missing = service.clear_transcript(Uuid::new_v4()).await;
        assert!(matches!(missing, Err(ServiceError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn late_stream_progress_cannot_resurrect_a_finished_turn() {
        let service = service();
        let session_id = Uuid::new_v4();
        service.ensure_session(session_id, None).await.expect("session");

        service
            .apply(session_id, SessionEvent::TurnStarted { at: chrono::Utc::now() })
            .await
            .expect("start");
        assert!(service.stream_progress(session_id, "partial text").await.expect("stream"));

        service
            .apply(session_id, SessionEvent::TurnFinished { at: chrono::Utc::now() })
            .await
            .expect("finish");

        // A persist scheduled mid-turn lands after the turn is over; the
        // session must stay idle with no leftover buffer.
        assert!(!service.stream_progress(session_id, "partial text").await.expect("stream"));

        let stored = service.find(session_id).await.expect("find").expect("stored");
        assert!(!stored.is_processing);
        assert!(stored.streaming_buffer.is_none());
    }

    #[tokio::test]
    async fn notify_waits_for_the_session_lock() {
        let service = Arc::new(service());
        let session_id = Uuid::new_v4();
        service.ensure_session(session_id, None).await.expect("session");

        let lock = service.lock_for(session_id);
        let guard = lock.lock().await;

        let background = Arc::clone(&service);
        let mut task = tokio::spawn(async move {
            background.notify(session_id, "Order placed with Acme").await
        });

        // While a turn holds the lock the notification cannot land.
        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), &mut task).await;
        assert!(blocked.is_err());

        drop(guard);
        task.await.expect("join").expect("notify");

        let transcript = service.transcript(session_id).await.expect("transcript");
        assert_eq!(transcript.len(), 1);
        assert!(transcript[0].content.contains("Acme"));
    }

    #[tokio::test]
    async fn lock_is_shared_per_session() {
        let service = service();
        let session_id = Uuid::new_v4();

        let first = service.lock_for(session_id);
        let second = service.lock_for(session_id);
        assert!(Arc::ptr_eq(&first, &second));

        let other = service.lock_for(Uuid::new_v4());
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
