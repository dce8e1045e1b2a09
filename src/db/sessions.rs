//! Chat sessions: the full message list is stored as one JSON blob and
//! replaced on every save.

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::*;
use crate::providers::ChatMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub project_ref: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn row_to_session(row: &rusqlite::Row) -> rusqlite::Result<ChatSession> {
    let raw: String = row.get("messages")?;
    Ok(ChatSession {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        project_ref: row.get("project_ref")?,
        messages: serde_json::from_str(&raw).unwrap_or_default(),
        model: row.get("model")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

impl MemoryDB {
    /// Insert or replace a session's messages. `created_at` survives
    /// replacement. A session owned by another user is not overwritten.
    pub fn upsert_session(
        &self,
        id: &str,
        user_id: &str,
        project_ref: &str,
        messages: &[ChatMessage],
        model: Option<&str>,
    ) -> Result<ChatSession, GhostError> {
        if id.trim().is_empty() || id.len() > 128 {
            return Err(GhostError::Validation("session id must be 1-128 chars".into()));
        }
        let json = serde_json::to_string(messages).map_err(|e| GhostError::Internal(e.to_string()))?;
        let now = now_ms();
        let conn = self.conn()?;
        let n = conn.execute(
            "INSERT INTO chat_sessions (id, user_id, project_ref, messages, model, created_at, updated_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?6) \
             ON CONFLICT(id) DO UPDATE SET messages = excluded.messages, \
               model = COALESCE(excluded.model, chat_sessions.model), updated_at = excluded.updated_at \
             WHERE chat_sessions.user_id = excluded.user_id AND chat_sessions.project_ref = excluded.project_ref",
            params![id, user_id, project_ref, json, model, now],
        )?;
        drop(conn);
        if n == 0 {
            return Err(GhostError::Forbidden("session belongs to another user".into()));
        }
        self.get_session(id, user_id, project_ref)?
            .ok_or_else(|| GhostError::Internal("session vanished after upsert".into()))
    }

    pub fn get_session(&self, id: &str, user_id: &str, project_ref: &str) -> Result<Option<ChatSession>, GhostError> {
        let s = self
            .conn()?
            .query_row(
                "SELECT * FROM chat_sessions WHERE id = ?1 AND user_id = ?2 AND project_ref = ?3",
                params![id, user_id, project_ref],
                row_to_session,
            )
            .optional()?;
        Ok(s)
    }

    /// Session to continue a chat in. `None` for a new id; an id held by
    /// another user or tenant is refused before any work is done on it.
    pub fn claim_session(&self, id: &str, user_id: &str, project_ref: &str) -> Result<Option<ChatSession>, GhostError> {
        if id.trim().is_empty() || id.len() > 128 {
            return Err(GhostError::Validation("session id must be 1-128 chars".into()));
        }
        let s = self
            .conn()?
            .query_row("SELECT * FROM chat_sessions WHERE id = ?1", [id], row_to_session)
            .optional()?;
        match s {
            Some(s) if s.user_id != user_id || s.project_ref != project_ref => {
                Err(GhostError::Forbidden("session belongs to another user".into()))
            }
            other => Ok(other),
        }
    }

    /// Most recently updated first.
    pub fn list_sessions(&self, user_id: &str, project_ref: &str, limit: usize) -> Result<Vec<ChatSession>, GhostError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM chat_sessions WHERE user_id = ?1 AND project_ref = ?2 \
             ORDER BY updated_at DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![user_id, project_ref, limit.max(1) as i64], row_to_session)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_session(&self, id: &str, user_id: &str, project_ref: &str) -> Result<bool, GhostError> {
        let n = self.conn()?.execute(
            "DELETE FROM chat_sessions WHERE id = ?1 AND user_id = ?2 AND project_ref = ?3",
            params![id, user_id, project_ref],
        )?;
        Ok(n > 0)
    }
}
