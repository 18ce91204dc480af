//! SQLite-backed conversation history.
//!
//! Every read and write is scoped by the caller-supplied user id; a session
//! or message that belongs to another user behaves as if it did not exist.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::schema::SCHEMA_SQL;
use crate::types::*;
use chorus_core::{Error, Result};

pub const DEFAULT_SESSION_TITLE: &str = "New chat";

/// SQLite store for sessions, messages and model responses.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl SqliteStore {
    /// Open or create the store.
    ///
    /// `db_dir` is the directory (e.g., `data/db/`). The file will be `db_dir/chorus.db`.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir)?;
        let db_path = db_dir.join("chorus.db");

        let conn = Connection::open(&db_path).map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        let store = Self::with_connection(conn, db_path)?;
        info!(
            "SqliteStore initialized: {} sessions, path={}",
            store.count_sessions()?,
            store.db_path.display()
        );
        Ok(store)
    }

    /// In-memory store, used by tests and ephemeral deployments.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Database(e.to_string()))?;
        Self::with_connection(conn, PathBuf::from(":memory:"))
    }

    fn with_connection(conn: Connection, db_path: PathBuf) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| Error::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ---------------------------------------------------------------
    // Sessions
    // ---------------------------------------------------------------

    /// Create a session. A blank title becomes [`DEFAULT_SESSION_TITLE`].
    pub fn create_session(&self, user_id: &str, title: &str) -> Result<ChatSession> {
        let title = match title.trim() {
            "" => DEFAULT_SESSION_TITLE,
            t => t,
        };
        let now = now_millis();
        let session = ChatSession {
            id: new_id(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO chat_sessions (id, user_id, title, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(|e| Error::Database(e.to_string()))?
        .execute(params![
            session.id,
            session.user_id,
            session.title,
            session.created_at,
            session.updated_at
        ])
        .map_err(|e| Error::Database(e.to_string()))?;

        debug!("Created session {} for user {}", session.id, user_id);
        Ok(session)
    }

    pub fn get_session(&self, user_id: &str, session_id: &str) -> Result<Option<ChatSession>> {
        let conn = self.conn.lock();
        let session = conn
            .prepare_cached("SELECT * FROM chat_sessions WHERE id = ?1 AND user_id = ?2")
            .map_err(|e| Error::Database(e.to_string()))?
            .query_row(params![session_id, user_id], Self::row_to_session)
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(session)
    }

    /// Sessions for a user, most recently updated first.
    pub fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT s.id, s.title, s.created_at, s.updated_at,
                        (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = s.id) AS message_count
                 FROM chat_sessions s
                 WHERE s.user_id = ?1
                 ORDER BY s.updated_at DESC, s.rowid DESC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(SessionSummary {
                    id: row.get("id")?,
                    title: row.get("title")?,
                    created_at: row.get("created_at")?,
                    updated_at: row.get("updated_at")?,
                    message_count: row.get("message_count")?,
                })
            })
            .map_err(|e| Error::Database(e.to_string()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Rename a session. Returns false if the user has no such session.
    pub fn rename_session(&self, user_id: &str, session_id: &str, title: &str) -> Result<bool> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::InvalidRequest("title cannot be empty".into()));
        }
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "UPDATE chat_sessions SET title = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
                params![title, now_millis(), session_id, user_id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Delete a session with its messages and responses.
    pub fn delete_session(&self, user_id: &str, session_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count = conn
            .execute(
                "DELETE FROM chat_sessions WHERE id = ?1 AND user_id = ?2",
                params![session_id, user_id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        if count > 0 {
            info!("Deleted session {}", session_id);
        }
        Ok(count > 0)
    }

    pub fn count_sessions(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM chat_sessions", [], |row| row.get(0))
            .map_err(|e| Error::Database(e.to_string()))
    }

    // ---------------------------------------------------------------
    // Messages
    // ---------------------------------------------------------------

    /// Append a message to a session and bump the session's `updated_at`.
    pub fn add_message(
        &self,
        user_id: &str,
        session_id: &str,
        role: Role,
        content: &str,
        model_id: Option<&str>,
    ) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: new_id(),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            role,
            model_id: model_id.map(str::to_string),
            timestamp: now_millis(),
        };

        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| Error::Database(e.to_string()))?;

        let touched = tx
            .execute(
                "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2 AND user_id = ?3",
                params![message.timestamp, session_id, user_id],
            )
            .map_err(|e| Error::Database(e.to_string()))?;
        if touched == 0 {
            return Err(Error::NotFound(format!("session {}", session_id)));
        }

        tx.execute(
            "INSERT INTO chat_messages (id, session_id, user_id, content, role, model_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.id,
                message.session_id,
                message.user_id,
                message.content,
                message.role.as_str(),
                message.model_id,
                message.timestamp
            ],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tx.commit().map_err(|e| Error::Database(e.to_string()))?;
        Ok(message)
    }

    /// Messages of a session, oldest first. User messages carry the model
    /// responses stored against them.
    pub fn list_messages(&self, user_id: &str, session_id: &str) -> Result<Vec<MessageWithResponses>> {
        let conn = self.conn.lock();
        let messages: Vec<ChatMessage> = {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT m.* FROM chat_messages m
                     JOIN chat_sessions s ON s.id = m.session_id
                     WHERE m.session_id = ?1 AND s.user_id = ?2
                     ORDER BY m.timestamp ASC, m.rowid ASC",
                )
                .map_err(|e| Error::Database(e.to_string()))?;
            let rows = stmt
                .query_map(params![session_id, user_id], Self::row_to_message)
                .map_err(|e| Error::Database(e.to_string()))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| Error::Database(e.to_string()))?
        };

        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM model_responses WHERE message_id = ?1 ORDER BY created_at ASC, rowid ASC",
            )
            .map_err(|e| Error::Database(e.to_string()))?;

        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            let responses = if message.role == Role::User {
                stmt.query_map(params![message.id], Self::row_to_response)
                    .map_err(|e| Error::Database(e.to_string()))?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(|e| Error::Database(e.to_string()))?
            } else {
                Vec::new()
            };
            out.push(MessageWithResponses { message, responses });
        }
        Ok(out)
    }

    // ---------------------------------------------------------------
    // Model responses
    // ---------------------------------------------------------------

    /// Store `(model_id, content)` pairs against a message in one transaction.
    pub fn add_model_responses(
        &self,
        message_id: &str,
        responses: &[(String, String)],
    ) -> Result<Vec<StoredResponse>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| Error::Database(e.to_string()))?;

        let exists: Option<String> = tx
            .query_row(
                "SELECT id FROM chat_messages WHERE id = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;
        if exists.is_none() {
            return Err(Error::NotFound(format!("message {}", message_id)));
        }

        let now = now_millis();
        let mut stored = Vec::with_capacity(responses.len());
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT INTO model_responses (id, message_id, model_id, content, is_best, created_at)
                     VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                )
                .map_err(|e| Error::Database(e.to_string()))?;
            for (model_id, content) in responses {
                let response = StoredResponse {
                    id: new_id(),
                    message_id: message_id.to_string(),
                    model_id: model_id.clone(),
                    content: content.clone(),
                    is_best: false,
                    created_at: now,
                };
                stmt.execute(params![
                    response.id,
                    response.message_id,
                    response.model_id,
                    response.content,
                    response.created_at
                ])
                .map_err(|e| Error::Database(e.to_string()))?;
                stored.push(response);
            }
        }

        tx.commit().map_err(|e| Error::Database(e.to_string()))?;
        debug!("Stored {} responses for message {}", stored.len(), message_id);
        Ok(stored)
    }

    /// Mark one model's response as the best answer to a message, clearing
    /// the flag on its siblings. Returns false if the user has no such
    /// message or the model has no response to it.
    pub fn mark_best(&self, user_id: &str, message_id: &str, model_id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(|e| Error::Database(e.to_string()))?;

        let target: Option<String> = tx
            .query_row(
                "SELECT r.id FROM model_responses r
                 JOIN chat_messages m ON m.id = r.message_id
                 WHERE r.message_id = ?1 AND r.model_id = ?2 AND m.user_id = ?3
                 ORDER BY r.rowid ASC LIMIT 1",
                params![message_id, model_id, user_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Database(e.to_string()))?;

        let Some(target) = target else {
            return Ok(false);
        };

        tx.execute(
            "UPDATE model_responses SET is_best = (id = ?1) WHERE message_id = ?2",
            params![target, message_id],
        )
        .map_err(|e| Error::Database(e.to_string()))?;

        tx.commit().map_err(|e| Error::Database(e.to_string()))?;
        Ok(true)
    }

    // ---------------------------------------------------------------
    // Row mapping
    // ---------------------------------------------------------------

    fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatSession> {
        Ok(ChatSession {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
        let role: String = row.get("role")?;
        Ok(ChatMessage {
            id: row.get("id")?,
            session_id: row.get("session_id")?,
            user_id: row.get("user_id")?,
            content: row.get("content")?,
            role: Role::parse(&role).unwrap_or(Role::User),
            model_id: row.get("model_id")?,
            timestamp: row.get("timestamp")?,
        })
    }

    fn row_to_response(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredResponse> {
        Ok(StoredResponse {
            id: row.get("id")?,
            message_id: row.get("message_id")?,
            model_id: row.get("model_id")?,
            content: row.get("content")?,
            is_best: row.get::<_, i64>("is_best")? != 0,
            created_at: row.get("created_at")?,
        })
    }
}
