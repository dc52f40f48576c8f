use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{
    Conversation, ConversationKind, InboxRow, MessageRow, MessageStatus, MessageType,
};

/// Shared handle to the embedded metadata store (A) and message log (B).
///
/// A single `Mutex<Connection>` is the reference service's own concurrency
/// model: every caller serializes through one connection, which trivially
/// satisfies (and over-satisfies) the per-conversation serializability the
/// sequencer needs. Background workers open their own private connection to
/// the same file instead of sharing this handle, exactly as the reference
/// service's retention task and webhook dispatcher do.
pub struct Db {
    pub conn: Mutex<Connection>,
}

impl Db {
    pub fn new(path: &str) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .expect("Failed to set pragmas");
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        db
    }

    /// Idempotent schema setup. Safe to call on every startup against an
    /// existing database: every statement either creates-if-missing or is a
    /// best-effort `ALTER TABLE` whose duplicate-column error is ignored.
    fn migrate(&self) {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                pair_key TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                last_sequence INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair_key
                ON conversations(pair_key) WHERE pair_key IS NOT NULL;

            CREATE TABLE IF NOT EXISTS membership (
                conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                user_id TEXT NOT NULL,
                PRIMARY KEY (conversation_id, user_id)
            );
            CREATE INDEX IF NOT EXISTS idx_membership_user ON membership(user_id);

            CREATE TABLE IF NOT EXISTS sequence_log (
                message_id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sequence INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS user_identities (
                user_id TEXT NOT NULL,
                channel TEXT NOT NULL,
                external_id TEXT NOT NULL,
                PRIMARY KEY (user_id, channel)
            );

            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                message_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                attachments TEXT,
                PRIMARY KEY (conversation_id, sequence)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_message_id ON messages(message_id);

            CREATE TABLE IF NOT EXISTS user_inbox (
                user_id TEXT NOT NULL,
                arrival_time TEXT NOT NULL,
                message_id TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                content TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (user_id, arrival_time, message_id)
            );
            CREATE INDEX IF NOT EXISTS idx_inbox_user_message ON user_inbox(user_id, message_id);",
        )
        .expect("Failed to run migrations");
    }
}

fn status_ordinal(status: MessageStatus) -> i64 {
    match status {
        MessageStatus::Sent => 0,
        MessageStatus::Delivered => 1,
        MessageStatus::Read => 2,
    }
}

/// Deterministic sorted-pair key for private conversations, mirroring the
/// reference service's `dm:<first>:<second>` DM-room naming.
fn pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}\u{0}{b}")
    } else {
        format!("{b}\u{0}{a}")
    }
}

/// `A.create_conversation`. Idempotent for private pairs.
pub fn create_conversation(
    conn: &Connection,
    kind: ConversationKind,
    members: &[String],
    metadata: serde_json::Value,
) -> Result<String, CoreError> {
    let now = Utc::now().to_rfc3339();
    let metadata_str = metadata.to_string();

    if kind == ConversationKind::Private && members.len() == 2 {
        let key = pair_key(&members[0], &members[1]);

        if let Some(existing) = conn
            .query_row(
                "SELECT id FROM conversations WHERE pair_key = ?1",
                params![&key],
                |row| row.get::<_, String>(0),
            )
            .optional()?
        {
            return Ok(existing);
        }

        let id = Uuid::new_v4().to_string();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO conversations (id, kind, pair_key, metadata, last_sequence, created_at)
             VALUES (?1, 'private', ?2, ?3, 0, ?4)",
            params![&id, &key, &metadata_str, &now],
        )?;

        if inserted == 0 {
            // Lost a race with a concurrent creator for the same pair.
            return conn
                .query_row(
                    "SELECT id FROM conversations WHERE pair_key = ?1",
                    params![&key],
                    |row| row.get::<_, String>(0),
                )
                .map_err(CoreError::from);
        }

        for m in members {
            conn.execute(
                "INSERT OR IGNORE INTO membership (conversation_id, user_id) VALUES (?1, ?2)",
                params![&id, m],
            )?;
        }

        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO conversations (id, kind, pair_key, metadata, last_sequence, created_at)
         VALUES (?1, 'group', NULL, ?2, 0, ?3)",
        params![&id, &metadata_str, &now],
    )?;
    for m in members {
        conn.execute(
            "INSERT OR IGNORE INTO membership (conversation_id, user_id) VALUES (?1, ?2)",
            params![&id, m],
        )?;
    }

    Ok(id)
}

/// `A.get_members`.
pub fn get_members(conn: &Connection, conversation_id: &str) -> Result<Vec<String>, CoreError> {
    let mut stmt =
        conn.prepare("SELECT user_id FROM membership WHERE conversation_id = ?1")?;
    let rows = stmt
        .query_map(params![conversation_id], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// `A.get_user_conversations`.
pub fn get_user_conversations(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<Conversation>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.kind, c.metadata, c.last_sequence
         FROM conversations c JOIN membership m ON m.conversation_id = c.id
         WHERE m.user_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            let kind_str: String = row.get(1)?;
            let kind = if kind_str == "private" {
                ConversationKind::Private
            } else {
                ConversationKind::Group
            };
            let metadata_str: String = row.get(2)?;
            Ok(Conversation {
                id: row.get(0)?,
                kind,
                metadata: serde_json::from_str(&metadata_str).unwrap_or(serde_json::json!({})),
                last_sequence: row.get(3)?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// `A.next_sequence`. Idempotent: replaying the same message-id never
/// increments `last_sequence` again.
pub fn next_sequence(
    conn: &Connection,
    conversation_id: &str,
    message_id: &str,
) -> Result<i64, CoreError> {
    if let Some(seq) = conn
        .query_row(
            "SELECT sequence FROM sequence_log WHERE message_id = ?1",
            params![message_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
    {
        return Ok(seq);
    }

    let exists: Option<i64> = conn
        .query_row(
            "SELECT last_sequence FROM conversations WHERE id = ?1",
            params![conversation_id],
            |row| row.get(0),
        )
        .optional()?;
    if exists.is_none() {
        return Err(CoreError::NotFound(format!(
            "conversation {conversation_id} does not exist"
        )));
    }

    conn.execute(
        "UPDATE conversations SET last_sequence = last_sequence + 1 WHERE id = ?1",
        params![conversation_id],
    )?;
    let new_seq: i64 = conn.query_row(
        "SELECT last_sequence FROM conversations WHERE id = ?1",
        params![conversation_id],
        |row| row.get(0),
    )?;

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO sequence_log (message_id, conversation_id, sequence) VALUES (?1, ?2, ?3)",
        params![message_id, conversation_id, new_seq],
    )?;
    if inserted == 0 {
        // Another caller assigned this message-id first; return its sequence
        // and leave last_sequence's extra increment in place (sequences are
        // allowed to be sparse only in this narrow lost-the-race case, which
        // cannot happen under the mutex-serialized connection this store uses).
        return conn
            .query_row(
                "SELECT sequence FROM sequence_log WHERE message_id = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .map_err(CoreError::from);
    }

    Ok(new_seq)
}

/// `A.get_identities`. Always includes the implicit `delivery` binding.
pub fn get_identities(
    conn: &Connection,
    user_id: &str,
) -> Result<std::collections::HashMap<String, String>, CoreError> {
    let mut map = std::collections::HashMap::new();
    map.insert(
        crate::models::DELIVERY_CHANNEL.to_string(),
        user_id.to_string(),
    );

    let mut stmt =
        conn.prepare("SELECT channel, external_id FROM user_identities WHERE user_id = ?1")?;
    let rows = stmt.query_map(params![user_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows.filter_map(|r| r.ok()) {
        map.insert(row.0, row.1);
    }
    Ok(map)
}

/// `A.add_identity`. Upsert on (user_id, channel).
pub fn add_identity(
    conn: &Connection,
    user_id: &str,
    channel: &str,
    external_id: &str,
) -> Result<(), CoreError> {
    conn.execute(
        "INSERT INTO user_identities (user_id, channel, external_id) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id, channel) DO UPDATE SET external_id = excluded.external_id",
        params![user_id, channel, external_id],
    )?;
    Ok(())
}

/// `B.append`. Idempotent per (conversation_id, sequence): an identical
/// replay overwrites the same clustering cell with identical values.
#[allow(clippy::too_many_arguments)]
pub fn append_message(
    conn: &Connection,
    conversation_id: &str,
    sequence: i64,
    message_id: &str,
    sender_id: &str,
    content: &str,
    message_type: MessageType,
    status: MessageStatus,
    timestamp: chrono::DateTime<Utc>,
    attachments: Option<&serde_json::Value>,
) -> Result<(), CoreError> {
    let type_str = serde_json::to_value(message_type)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "text".to_string());
    let attachments_str = attachments.map(|v| v.to_string());

    conn.execute(
        "INSERT OR REPLACE INTO messages
            (conversation_id, sequence, message_id, sender_id, content, type, status, timestamp, attachments)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            conversation_id,
            sequence,
            message_id,
            sender_id,
            content,
            type_str,
            status.as_str(),
            timestamp.to_rfc3339(),
            attachments_str,
        ],
    )?;
    Ok(())
}

/// `B.push_inbox`.
#[allow(clippy::too_many_arguments)]
pub fn push_inbox(
    conn: &Connection,
    user_id: &str,
    conversation_id: &str,
    message_id: &str,
    sequence: i64,
    content: &str,
    sender_id: &str,
    status: MessageStatus,
) -> Result<(), CoreError> {
    let arrival = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT OR REPLACE INTO user_inbox
            (user_id, arrival_time, message_id, conversation_id, sequence, content, sender_id, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user_id,
            arrival,
            message_id,
            conversation_id,
            sequence,
            content,
            sender_id,
            status.as_str(),
        ],
    )?;
    Ok(())
}

/// `B.update_status`. Monotone: a conditional write only ever moves status
/// forward along SENT < DELIVERED < READ. Mirrors the update onto every
/// inbox row carrying the same message so a recipient's inbox view and the
/// canonical log never disagree.
pub fn update_status(
    conn: &Connection,
    conversation_id: &str,
    sequence: i64,
    new_status: MessageStatus,
) -> Result<(), CoreError> {
    conn.execute(
        "UPDATE messages SET status = ?3
         WHERE conversation_id = ?1 AND sequence = ?2
           AND (CASE status WHEN 'SENT' THEN 0 WHEN 'DELIVERED' THEN 1 WHEN 'READ' THEN 2 ELSE -1 END)
               < ?4",
        params![
            conversation_id,
            sequence,
            new_status.as_str(),
            status_ordinal(new_status),
        ],
    )?;
    conn.execute(
        "UPDATE user_inbox SET status = ?3
         WHERE conversation_id = ?1 AND sequence = ?2
           AND (CASE status WHEN 'SENT' THEN 0 WHEN 'DELIVERED' THEN 1 WHEN 'READ' THEN 2 ELSE -1 END)
               < ?4",
        params![
            conversation_id,
            sequence,
            new_status.as_str(),
            status_ordinal(new_status),
        ],
    )?;
    Ok(())
}

/// `B.read_history`. Rows in sequence-descending order.
pub fn read_history(
    conn: &Connection,
    conversation_id: &str,
    limit: i64,
    before_sequence: Option<i64>,
) -> Result<Vec<MessageRow>, CoreError> {
    let mut stmt = conn.prepare(
        "SELECT conversation_id, sequence, message_id, sender_id, content, type, status, timestamp, attachments
         FROM messages
         WHERE conversation_id = ?1 AND (?2 IS NULL OR sequence < ?2)
         ORDER BY sequence DESC LIMIT ?3",
    )?;
    let rows = stmt
        .query_map(params![conversation_id, before_sequence, limit], row_to_message_row)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

/// `B.read_inbox`. Rows in arrival-time-descending order, capped at 100.
pub fn read_inbox(
    conn: &Connection,
    user_id: &str,
    since: Option<chrono::DateTime<Utc>>,
) -> Result<Vec<InboxRow>, CoreError> {
    let since_str = since.map(|t| t.to_rfc3339());
    let mut stmt = conn.prepare(
        "SELECT user_id, arrival_time, message_id, conversation_id, sequence, content, sender_id, status
         FROM user_inbox
         WHERE user_id = ?1 AND (?2 IS NULL OR arrival_time > ?2)
         ORDER BY arrival_time DESC, message_id DESC LIMIT 100",
    )?;
    let rows = stmt
        .query_map(params![user_id, since_str], |row| {
            let arrival_str: String = row.get(1)?;
            let status_str: String = row.get(7)?;
            Ok(InboxRow {
                user_id: row.get(0)?,
                arrival_time: chrono::DateTime::parse_from_rfc3339(&arrival_str)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                message_id: row.get(2)?,
                conversation_id: row.get(3)?,
                sequence: row.get(4)?,
                content: row.get(5)?,
                sender_id: row.get(6)?,
                status: MessageStatus::parse(&status_str).unwrap_or(MessageStatus::Sent),
            })
        })?
        .filter_map(|r| r.ok())
        .collect();
    Ok(rows)
}

fn row_to_message_row(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    let type_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let timestamp_str: String = row.get(7)?;
    let attachments_str: Option<String> = row.get(8)?;
    Ok(MessageRow {
        conversation_id: row.get(0)?,
        sequence: row.get(1)?,
        message_id: row.get(2)?,
        sender_id: row.get(3)?,
        content: row.get(4)?,
        message_type: match type_str.as_str() {
            "file" => MessageType::File,
            "location" => MessageType::Location,
            _ => MessageType::Text,
        },
        status: MessageStatus::parse(&status_str).unwrap_or(MessageStatus::Sent),
        timestamp: chrono::DateTime::parse_from_rfc3339(&timestamp_str)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        attachments: attachments_str.and_then(|s| serde_json::from_str(&s).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let db = Db {
            conn: Mutex::new(conn),
        };
        db.migrate();
        // migrate() locked its own mutex; pull the connection back out.
        db.conn.into_inner().unwrap()
    }

    #[test]
    fn private_conversation_creation_is_idempotent() {
        let conn = test_conn();
        let members = vec!["alice".to_string(), "bob".to_string()];
        let id1 =
            create_conversation(&conn, ConversationKind::Private, &members, serde_json::json!({}))
                .unwrap();
        let id2 = create_conversation(
            &conn,
            ConversationKind::Private,
            &["bob".to_string(), "alice".to_string()],
            serde_json::json!({}),
        )
        .unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn next_sequence_is_idempotent_and_dense() {
        let conn = test_conn();
        let members = vec!["alice".to_string(), "bob".to_string()];
        let cid =
            create_conversation(&conn, ConversationKind::Private, &members, serde_json::json!({}))
                .unwrap();

        let s1 = next_sequence(&conn, &cid, "m1").unwrap();
        let s1_again = next_sequence(&conn, &cid, "m1").unwrap();
        assert_eq!(s1, 1);
        assert_eq!(s1_again, 1);

        let s2 = next_sequence(&conn, &cid, "m2").unwrap();
        assert_eq!(s2, 2);
    }

    #[test]
    fn next_sequence_missing_conversation_is_not_found() {
        let conn = test_conn();
        let err = next_sequence(&conn, "does-not-exist", "m1").unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn status_update_never_regresses() {
        let conn = test_conn();
        let members = vec!["alice".to_string(), "bob".to_string()];
        let cid =
            create_conversation(&conn, ConversationKind::Private, &members, serde_json::json!({}))
                .unwrap();
        next_sequence(&conn, &cid, "m1").unwrap();
        append_message(
            &conn,
            &cid,
            1,
            "m1",
            "alice",
            "hi",
            MessageType::Text,
            MessageStatus::Sent,
            Utc::now(),
            None,
        )
        .unwrap();

        update_status(&conn, &cid, 1, MessageStatus::Read).unwrap();
        update_status(&conn, &cid, 1, MessageStatus::Delivered).unwrap();

        let rows = read_history(&conn, &cid, 10, None).unwrap();
        assert_eq!(rows[0].status, MessageStatus::Read);
    }
}
