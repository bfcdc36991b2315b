//! Chat sessions and their append-only message log.
//!
//! A session's mutable state (processing flag, streaming buffer, model,
//! title) only changes through [`SessionEvent`]s applied by [`Session::apply`],
//! so every writer goes through the same small set of transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "tool" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// One tool call made by the assistant during a turn, together with the
/// result that was fed back to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolInvocation>,
    /// Set on assistant messages the agent pushed on its own (procurement
    /// updates), as opposed to replies to a user turn.
    #[serde(default)]
    pub is_system_notification: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn user(session_id: Uuid, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(session_id, MessageRole::User, content, now)
    }

    pub fn assistant(session_id: Uuid, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(session_id, MessageRole::Assistant, content, now)
    }

    pub fn tool(session_id: Uuid, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(session_id, MessageRole::Tool, content, now)
    }

    pub fn notification(session_id: Uuid, content: impl Into<String>, now: DateTime<Utc>) -> Self {
        let mut message = Self::new(session_id, MessageRole::Assistant, content, now);
        message.is_system_notification = true;
        message
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolInvocation>) -> Self {
        self.tool_calls = tool_calls;
        self
    }

    fn new(
        session_id: Uuid,
        role: MessageRole,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            is_system_notification: false,
            created_at: now,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub title: String,
    pub model: String,
    pub is_processing: bool,
    pub streaming_buffer: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: Uuid, title: impl Into<String>, model: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: title.into(),
            model: model.into(),
            is_processing: false,
            streaming_buffer: None,
            created_at: now,
            last_active_at: now,
        }
    }
}

/// State transitions a session can undergo.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// A turn began: the session is busy and any stale partial output is gone.
    TurnStarted { at: DateTime<Utc> },
    /// The turn finished (or failed); the session is idle again.
    TurnFinished { at: DateTime<Utc> },
    ModelChanged { model: String },
    Renamed { title: String },
}

impl Session {
    pub fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TurnStarted { at } => {
                self.is_processing = true;
                self.streaming_buffer = None;
                self.last_active_at = at;
            }
            SessionEvent::TurnFinished { at } => {
                self.is_processing = false;
                self.streaming_buffer = None;
                self.last_active_at = at;
            }
            SessionEvent::ModelChanged { model } => {
                self.model = model;
            }
            SessionEvent::Renamed { title } => {
                self.title = title;
            }
        }
    }
}

/// Derive a display title for a freshly created session.
///
/// With a first message: the message truncated to 32 characters (with an
/// ellipsis when cut), then ` | MM/DD HH:MM`. Without one: `Inquiry` and
/// the same timestamp.
pub fn auto_title(first_message: Option<&str>, now: DateTime<Utc>) -> String {
    let stamp = now.format("%m/%d %H:%M");
    match first_message.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) => {
            let truncated: String = text.chars().take(32).collect();
            if text.chars().count() > 32 {
                format!("{truncated}... | {stamp}")
            } else {
                format!("{truncated} | {stamp}")
            }
        }
        None => format!("Inquiry {stamp}"),
    }
}
