use async_trait::async_trait;
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use scout_core::domain::session::{ChatMessage, MessageRole, Session, ToolInvocation};

use super::{
    decode_timestamp, decode_uuid, MessageRepository, RepositoryError, SessionRepository,
};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn create(&self, session: &Session) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO chat_sessions (
                id, title, model, is_processing, streaming_buffer, created_at, last_active_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.title)
        .bind(&session.model)
        .bind(session.is_processing as i64)
        .bind(session.streaming_buffer.as_deref())
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_active_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: &Uuid) -> Result<Option<Session>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, model, is_processing, streaming_buffer, created_at, last_active_at
            FROM chat_sessions
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Session>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, model, is_processing, streaming_buffer, created_at, last_active_at
            FROM chat_sessions
            ORDER BY last_active_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn save_state(&self, session: &Session) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE chat_sessions
            SET title = ?, model = ?, is_processing = ?, streaming_buffer = ?, last_active_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&session.title)
        .bind(&session.model)
        .bind(session.is_processing as i64)
        .bind(session.streaming_buffer.as_deref())
        .bind(session.last_active_at.to_rfc3339())
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn save_stream_progress(
        &self,
        id: &Uuid,
        buffer: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET streaming_buffer = ? WHERE id = ? AND is_processing = 1",
        )
        .bind(buffer)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self) -> Result<u64, RepositoryError> {
        sqlx::query("DELETE FROM chat_messages").execute(&self.pool).await?;
        let result = sqlx::query("DELETE FROM chat_sessions").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: &ChatMessage) -> Result<(), RepositoryError> {
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.tool_calls).map_err(|err| {
                RepositoryError::Decode(format!("encode tool_calls: {err}"))
            })?)
        };

        sqlx::query(
            r#"
            INSERT INTO chat_messages (
                id, session_id, role, content, tool_calls, is_system_notification, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.id.to_string())
        .bind(message.session_id.to_string())
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(tool_calls)
        .bind(message.is_system_notification as i64)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_session(
        &self,
        session_id: &Uuid,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, role, content, tool_calls, is_system_notification, created_at
            FROM chat_messages
            WHERE session_id = ?
            ORDER BY created_at, rowid
            "#,
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn clear_session(&self, session_id: &Uuid) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

fn session_from_row(row: &SqliteRow) -> Result<Session, RepositoryError> {
    let id: String = row.get("id");
    let created_at: String = row.get("created_at");
    let last_active_at: String = row.get("last_active_at");
    let is_processing: i64 = row.get("is_processing");

    Ok(Session {
        id: decode_uuid("id", &id)?,
        title: row.get("title"),
        model: row.get("model"),
        is_processing: is_processing != 0,
        streaming_buffer: row.get("streaming_buffer"),
        created_at: decode_timestamp("created_at", &created_at)?,
        last_active_at: decode_timestamp("last_active_at", &last_active_at)?,
    })
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage, RepositoryError> {
    let id: String = row.get("id");
    let session_id: String = row.get("session_id");
    let role_raw: String = row.get("role");
    let tool_calls_raw: Option<String> = row.get("tool_calls");
    let is_system_notification: i64 = row.get("is_system_notification");
    let created_at: String = row.get("created_at");

    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;
    let tool_calls: Vec<ToolInvocation> = match tool_calls_raw.as_deref() {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| RepositoryError::Decode(format!("decode tool_calls: {err}")))?,
        None => Vec::new(),
    };

    Ok(ChatMessage {
        id: decode_uuid("id", &id)?,
        session_id: decode_uuid("session_id", &session_id)?,
        role,
        content: row.get("content"),
        tool_calls,
        is_system_notification: is_system_notification != 0,
        created_at: decode_timestamp("created_at", &created_at)?,
    })
}
