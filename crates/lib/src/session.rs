//! Conversation sessions and message history, persisted in SQLite.
//!
//! The layout (`agent_sessions` + `agent_messages`, one JSON document per message)
//! is the one agent runtimes use for their session tables, so existing history
//! databases stay browsable. Reads and deletes are fail-soft: history browsing
//! never surfaces an error, it logs and returns an empty or `false` result.
//! The append path is the only one that reports errors, and its caller (the chat
//! agent) logs and swallows them.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Unique session identifier (opaque string, UUID-shaped by convention).
pub type SessionId = String;

/// Default number of sessions shown by the history browser.
pub const DEFAULT_LIST_LIMIT: usize = 50;

const PREVIEW_MAX_CHARS: usize = 50;
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS agent_sessions (
    session_id TEXT PRIMARY KEY,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
CREATE TABLE IF NOT EXISTS agent_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    message_data TEXT NOT NULL,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (session_id) REFERENCES agent_sessions (session_id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_agent_messages_session_id
    ON agent_messages (session_id, created_at);
";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One block of structured assistant content. Fields other than `text`
/// (e.g. `type`, `annotations`) are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Message content: plain text, or a list of blocks as some runtimes store
/// assistant output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Content {
    /// Text for display: blocks are joined with a blank line, blocks without text skipped.
    pub fn to_plain_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Content::Text(s)
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Content::Text(s.to_string())
    }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    pub created_at: NaiveDateTime,
}

/// Shape of the `message_data` column. Unknown fields are ignored on read.
#[derive(Deserialize)]
struct MessageData {
    role: Role,
    content: Content,
}

#[derive(Serialize)]
struct MessageDataRef<'a> {
    role: Role,
    content: &'a Content,
}

/// Derived, never-persisted metadata for the history browser.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub created_at: Option<NaiveDateTime>,
    pub updated_at: Option<NaiveDateTime>,
    pub message_count: usize,
    /// Content of the session's earliest message when that message is from the user.
    pub first_message: Option<String>,
}

impl SessionSummary {
    /// Label for the session list: the first user message (truncated), or a
    /// timestamp-derived fallback.
    pub fn preview(&self) -> String {
        if let Some(first) = self.first_message.as_deref().filter(|s| !s.is_empty()) {
            let mut preview: String = first.chars().take(PREVIEW_MAX_CHARS).collect();
            if first.chars().count() > PREVIEW_MAX_CHARS {
                preview.push_str("...");
            }
            return preview;
        }
        match self.created_at {
            Some(dt) => format!("Conversation {}", dt.format("%d/%m %H:%M")),
            None => {
                let short: String = self.session_id.chars().take(8).collect();
                format!("Conversation {}", short)
            }
        }
    }

    /// Human description of the creation time relative to `now` (both UTC).
    pub fn relative_time(&self, now: NaiveDateTime) -> String {
        let Some(created) = self.created_at else {
            return "Unknown date".to_string();
        };
        let diff = now.signed_duration_since(created);
        let days = diff.num_days();
        let hours = diff.num_hours();
        let minutes = diff.num_minutes();
        if days > 0 {
            plural(days, "day")
        } else if hours > 0 {
            plural(hours, "hour")
        } else if minutes > 0 {
            plural(minutes, "minute")
        } else {
            "Just now".to_string()
        }
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}

/// Parse a stored timestamp: `CURRENT_TIMESTAMP` form, with optional fraction,
/// `T` separator, or RFC 3339. Values with an offset are converted to UTC.
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    let normalized = s.replacen('T', " ", 1);
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f").ok()
}

fn now_timestamp() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serializing message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("creating database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to the conversation database. Cheap to clone; each operation opens its
/// own connection so the handle can be moved onto the bridge worker thread.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db_path: PathBuf,
}

impl SessionStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Create the database file and schema if they do not exist yet.
    pub fn init(&self) -> Result<(), StoreError> {
        self.open_or_create().map(|_| ())
    }

    /// Open an existing database; never creates the file.
    fn open_existing(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        configure(&conn)?;
        Ok(conn)
    }

    fn open_or_create(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.db_path)?;
        configure(&conn)?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Sessions ordered by most recent update, with message count and first message.
    pub fn list_sessions(&self, limit: usize) -> Vec<SessionSummary> {
        match self.try_list_sessions(limit) {
            Ok(sessions) => sessions,
            Err(e) => {
                log::warn!("session store: listing sessions failed: {}", e);
                Vec::new()
            }
        }
    }

    fn try_list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, StoreError> {
        let conn = self.open_existing()?;
        // Other writers use the `T` separator and offsets, so order by julianday, never by text.
        let mut stmt = conn.prepare(
            "SELECT
                s.session_id,
                s.created_at,
                s.updated_at,
                (SELECT COUNT(*) FROM agent_messages m WHERE m.session_id = s.session_id),
                (
                    SELECT m2.message_data
                    FROM agent_messages m2
                    WHERE m2.session_id = s.session_id
                    ORDER BY julianday(m2.created_at) ASC, m2.id ASC
                    LIMIT 1
                )
            FROM agent_sessions s
            ORDER BY julianday(s.updated_at) DESC, s.rowid DESC
            LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], |row| {
            Ok(SessionSummary {
                session_id: row.get(0)?,
                created_at: text_column(row, 1).as_deref().and_then(parse_timestamp),
                updated_at: text_column(row, 2).as_deref().and_then(parse_timestamp),
                message_count: row.get::<_, i64>(3)?.max(0) as usize,
                first_message: text_column(row, 4)
                    .as_deref()
                    .and_then(first_user_message),
            })
        })?;
        let mut sessions = Vec::new();
        for row in rows {
            match row {
                Ok(s) => sessions.push(s),
                Err(e) => log::debug!("session store: skipping unreadable session row: {}", e),
            }
        }
        Ok(sessions)
    }

    /// Messages of a session in creation order. Malformed rows are skipped.
    pub fn get_messages(&self, session_id: &str) -> Vec<Message> {
        match self.try_get_messages(session_id) {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!(
                    "session store: reading messages for {} failed: {}",
                    session_id,
                    e
                );
                Vec::new()
            }
        }
    }

    fn try_get_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.open_existing()?;
        let mut stmt = conn.prepare(
            "SELECT id, message_data, created_at
            FROM agent_messages
            WHERE session_id = ?1
            ORDER BY julianday(created_at) ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![session_id], |row| {
            Ok((row.get::<_, i64>(0)?, text_column(row, 1), text_column(row, 2)))
        })?;
        let mut messages = Vec::new();
        for row in rows {
            let (id, data, created_at) = match row {
                Ok(r) => r,
                Err(e) => {
                    log::debug!("session store: skipping unreadable message row: {}", e);
                    continue;
                }
            };
            match decode_message(data.as_deref(), created_at.as_deref()) {
                Some(m) => messages.push(m),
                None => log::debug!("session store: skipping malformed message {}", id),
            }
        }
        Ok(messages)
    }

    /// Delete a session and all its messages in one transaction. True only when a
    /// session row was removed.
    pub fn delete_session(&self, session_id: &str) -> bool {
        match self.try_delete_session(session_id) {
            Ok(deleted) => deleted,
            Err(e) => {
                log::warn!("session store: deleting {} failed: {}", session_id, e);
                false
            }
        }
    }

    fn try_delete_session(&self, session_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.open_existing()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM agent_messages WHERE session_id = ?1",
            params![session_id],
        )?;
        let removed = tx.execute(
            "DELETE FROM agent_sessions WHERE session_id = ?1",
            params![session_id],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    pub fn session_exists(&self, session_id: &str) -> bool {
        let result = self.open_existing().and_then(|conn| {
            conn.query_row(
                "SELECT 1 FROM agent_sessions WHERE session_id = ?1",
                params![session_id],
                |_| Ok(()),
            )
            .optional()
            .map_err(StoreError::from)
        });
        match result {
            Ok(found) => found.is_some(),
            Err(e) => {
                log::debug!("session store: existence check for {} failed: {}", session_id, e);
                false
            }
        }
    }

    /// Append one message, creating the session on first use.
    pub fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &Content,
    ) -> Result<(), StoreError> {
        self.append_messages(session_id, &[(role, content.clone())])
    }

    /// Append messages in order within one transaction and bump the session's
    /// `updated_at`. The session row is created if absent.
    pub fn append_messages(
        &self,
        session_id: &str,
        messages: &[(Role, Content)],
    ) -> Result<(), StoreError> {
        let mut conn = self.open_or_create()?;
        let now = now_timestamp();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO agent_sessions (session_id, created_at, updated_at)
            VALUES (?1, ?2, ?2)
            ON CONFLICT(session_id) DO UPDATE SET updated_at = excluded.updated_at",
            params![session_id, now],
        )?;
        for (role, content) in messages {
            let data = serde_json::to_string(&MessageDataRef {
                role: *role,
                content,
            })?;
            tx.execute(
                "INSERT INTO agent_messages (session_id, message_data, created_at)
                VALUES (?1, ?2, ?3)",
                params![session_id, data, now],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

fn configure(conn: &Connection) -> Result<(), StoreError> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

/// Read a column as text, tolerating NULL and non-text values.
fn text_column(row: &rusqlite::Row<'_>, idx: usize) -> Option<String> {
    row.get::<_, Option<String>>(idx).ok().flatten()
}

fn decode_message(data: Option<&str>, created_at: Option<&str>) -> Option<Message> {
    let parsed: MessageData = serde_json::from_str(data?).ok()?;
    Some(Message {
        role: parsed.role,
        content: parsed.content,
        created_at: parse_timestamp(created_at?)?,
    })
}

fn first_user_message(data: &str) -> Option<String> {
    let parsed: MessageData = serde_json::from_str(data).ok()?;
    if parsed.role == Role::User {
        Some(parsed.content.to_plain_text())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .and_then(|date| date.and_hms_opt(h, mi, s))
            .expect("valid date")
    }

    fn summary(first: Option<&str>, created_at: Option<NaiveDateTime>) -> SessionSummary {
        SessionSummary {
            session_id: "0123456789abcdef".to_string(),
            created_at,
            updated_at: created_at,
            message_count: 0,
            first_message: first.map(String::from),
        }
    }

    #[test]
    fn preview_truncates_long_first_message() {
        let long = "x".repeat(60);
        let s = summary(Some(&long), None);
        assert_eq!(s.preview(), format!("{}...", "x".repeat(50)));

        let exact = "y".repeat(50);
        assert_eq!(summary(Some(&exact), None).preview(), exact);
    }

    #[test]
    fn preview_falls_back_to_timestamp_then_id() {
        let s = summary(None, Some(at(2024, 3, 7, 9, 5, 0)));
        assert_eq!(s.preview(), "Conversation 07/03 09:05");
        assert_eq!(summary(None, None).preview(), "Conversation 01234567");
        assert_eq!(summary(Some(""), None).preview(), "Conversation 01234567");
    }

    #[test]
    fn relative_time_buckets() {
        let now = at(2024, 3, 10, 12, 0, 0);
        let rel = |t| summary(None, Some(t)).relative_time(now);
        assert_eq!(rel(at(2024, 3, 8, 12, 0, 0)), "2 days ago");
        assert_eq!(rel(at(2024, 3, 9, 11, 0, 0)), "1 day ago");
        assert_eq!(rel(at(2024, 3, 10, 9, 30, 0)), "2 hours ago");
        assert_eq!(rel(at(2024, 3, 10, 11, 59, 0)), "1 minute ago");
        assert_eq!(rel(at(2024, 3, 10, 11, 59, 30)), "Just now");
        assert_eq!(rel(at(2024, 3, 10, 12, 5, 0)), "Just now");
        assert_eq!(summary(None, None).relative_time(now), "Unknown date");
    }

    #[test]
    fn timestamps_in_all_stored_forms() {
        let expected = at(2024, 1, 2, 3, 4, 5);
        assert_eq!(parse_timestamp("2024-01-02 03:04:05"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T03:04:05"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T05:04:05+02:00"), Some(expected));
        let with_fraction = parse_timestamp("2024-01-02 03:04:05.250").expect("fraction");
        assert_eq!(with_fraction.and_utc().timestamp_subsec_millis(), 250);
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn blocks_normalize_to_text() {
        let content: Content = serde_json::from_str(
            r#"[{"type":"output_text","text":"First","annotations":[]},{"type":"refusal"},{"text":"Second"}]"#,
        )
        .expect("blocks");
        assert!(matches!(content, Content::Blocks(ref b) if b.len() == 3));
        assert_eq!(content.to_plain_text(), "First\n\nSecond");

        let text: Content = serde_json::from_str(r#""plain""#).expect("text");
        assert_eq!(text, Content::Text("plain".to_string()));
    }

    #[test]
    fn message_data_ignores_runtime_fields() {
        let data = r#"{"id":"msg_1","type":"message","status":"completed","role":"assistant","content":[{"type":"output_text","text":"Hi"}]}"#;
        let m = decode_message(Some(data), Some("2024-01-02 03:04:05")).expect("decodes");
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.content.to_plain_text(), "Hi");

        let call = r#"{"type":"function_call"}"#;
        assert!(decode_message(Some(call), Some("2024-01-02 03:04:05")).is_none());
        assert!(decode_message(Some(r#"{"role":"user","content":"x"}"#), Some("soon")).is_none());
    }

    #[test]
    fn first_user_message_only_for_user_role() {
        assert_eq!(
            first_user_message(r#"{"role":"user","content":"Hi"}"#),
            Some("Hi".to_string())
        );
        assert_eq!(first_user_message(r#"{"role":"assistant","content":"Hi"}"#), None);
        assert_eq!(first_user_message("not json"), None);
    }
}
