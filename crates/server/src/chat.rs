//! Turn execution over stored sessions: persist the user message, run the
//! agent, persist what it did, and keep the session's processing state
//! honest even when a step fails.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use scout_agent::conversation::{ChatOrchestrator, TurnOutcome};
use scout_agent::llm::ChunkSink;
use scout_core::domain::session::{ChatMessage, Session, SessionEvent, ToolInvocation};
use scout_db::repositories::MessageRepository;

use crate::sessions::{ServiceError, SessionService};

/// What a completed turn handed back to the API layer.
#[derive(Debug)]
pub struct TurnReply {
    pub session: Session,
    /// The final assistant summary message.
    pub message: ChatMessage,
    pub tool_calls: Vec<ToolInvocation>,
    pub preview: bool,
}

pub struct ChatService {
    sessions: Arc<SessionService>,
    messages: Arc<dyn MessageRepository>,
    orchestrator: Arc<ChatOrchestrator>,
}

impl ChatService {
    pub fn new(
        sessions: Arc<SessionService>,
        messages: Arc<dyn MessageRepository>,
        orchestrator: Arc<ChatOrchestrator>,
    ) -> Self {
        Self { sessions, messages, orchestrator }
    }

    pub fn sessions(&self) -> &Arc<SessionService> {
        &self.sessions
    }

    /// Run one user turn. Holds the session lock for the whole turn so a
    /// second message (or a tracker update) waits instead of interleaving.
    pub async fn send_message(
        &self,
        session_id: Uuid,
        text: &str,
        model_override: Option<String>,
        on_chunk: Option<ChunkSink<'_>>,
    ) -> Result<TurnReply, ServiceError> {
        let lock = self.sessions.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.sessions.ensure_session(session_id, Some(text)).await?;
        if let Some(model) = model_override {
            if model != session.model {
                session =
                    self.sessions.apply(session_id, SessionEvent::ModelChanged { model }).await?;
            }
        }

        // Context for the model is the transcript BEFORE this message; the
        // orchestrator receives the new text separately.
        let history = self.messages.list_for_session(&session_id).await?;
        self.messages.append(&ChatMessage::user(session_id, text, Utc::now())).await?;
        self.sessions.apply(session_id, SessionEvent::TurnStarted { at: Utc::now() }).await?;

        let outcome =
            self.orchestrator.run_turn(session_id, &session.model, &history, text, on_chunk).await;

        let persisted = self.persist_outcome(session_id, outcome).await;
        let finished =
            self.sessions.apply(session_id, SessionEvent::TurnFinished { at: Utc::now() }).await;

        let (message, tool_calls, preview) = persisted?;
        let session = finished?;
        Ok(TurnReply { session, message, tool_calls, preview })
    }

    /// Run an agent-initiated turn (procurement updates). The prompt is not
    /// written to the transcript; only the agent's answer lands, as a
    /// notification. Skipped entirely in preview mode.
    pub async fn agent_update(
        &self,
        session_id: Uuid,
        prompt: &str,
    ) -> Result<Option<ChatMessage>, ServiceError> {
        if self.orchestrator.is_preview() {
            return Ok(None);
        }

        let lock = self.sessions.lock_for(session_id);
        let _guard = lock.lock().await;

        let session = self
            .sessions
            .find(session_id)
            .await?
            .ok_or(ServiceError::SessionNotFound(session_id))?;
        let history = self.messages.list_for_session(&session_id).await?;

        let outcome =
            self.orchestrator.run_turn(session_id, &session.model, &history, prompt, None).await;
        if outcome.content.trim().is_empty() {
            return Ok(None);
        }

        // The lock is already held here; `notify` would deadlock taking it
        // again, so the notification is appended directly.
        let message = ChatMessage::notification(session_id, outcome.content, Utc::now());
        self.messages.append(&message).await?;
        Ok(Some(message))
    }

    /// Turn shape in the transcript: user (already appended), then if tools
    /// ran one assistant message carrying the call record, one tool message
    /// per result, and finally the assistant summary.
    async fn persist_outcome(
        &self,
        session_id: Uuid,
        outcome: TurnOutcome,
    ) -> Result<(ChatMessage, Vec<ToolInvocation>, bool), ServiceError> {
        let now = Utc::now();
        if !outcome.tool_calls.is_empty() {
            let call_record = ChatMessage::assistant(session_id, "", now)
                .with_tool_calls(outcome.tool_calls.clone());
            self.messages.append(&call_record).await?;

            for invocation in &outcome.tool_calls {
                let rendered = invocation
                    .result
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| "{}".to_string());
                self.messages.append(&ChatMessage::tool(session_id, rendered, now)).await?;
            }
        }

        let message = ChatMessage::assistant(session_id, outcome.content, now);
        self.messages.append(&message).await?;
        Ok((message, outcome.tool_calls, outcome.preview))
    }
}
