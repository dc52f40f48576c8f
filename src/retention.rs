use rusqlite::{Connection, params};

/// Background sweep enforcing the message log's TTL (§3, §4.B, §4.M).
/// SQLite has no native row expiry, so the reference service's periodic
/// retention-sweeper idiom (`spawn_retention_task` / `run_retention`) is
/// reused here, simplified to a single age-based cutoff applied uniformly
/// instead of per-room configurable limits.
pub fn spawn_retention_task(db_path: String, ttl_days: i64, interval_secs: u64) {
    tokio::spawn(async move {
        let conn = match Connection::open(&db_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("retention: failed to open db: {e}");
                return;
            }
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .ok();

        tokio::time::sleep(std::time::Duration::from_secs(30)).await;

        loop {
            let pruned = run_retention(&conn, ttl_days);
            if pruned > 0 {
                eprintln!("retention: pruned {pruned} message rows past the {ttl_days}-day TTL");
            }
            tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
        }
    });
}

/// Delete message rows older than `ttl_days`. Returns the number deleted.
pub fn run_retention(conn: &Connection, ttl_days: i64) -> i64 {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(ttl_days)).to_rfc3339();
    conn.execute(
        "DELETE FROM messages WHERE timestamp < ?1",
        params![cutoff],
    )
    .map(|n| n as i64)
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Db;

    #[test]
    fn prunes_only_rows_past_ttl() {
        let path = std::env::temp_dir()
            .join(format!("retention-test-{}.db", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string();
        let db = Db::new(&path);
        let conn = db.conn.lock().unwrap();

        let cid = crate::db::create_conversation(
            &conn,
            crate::models::ConversationKind::Private,
            &["alice".to_string(), "bob".to_string()],
            serde_json::json!({}),
        )
        .unwrap();
        crate::db::next_sequence(&conn, &cid, "old").unwrap();
        crate::db::append_message(
            &conn,
            &cid,
            1,
            "old",
            "alice",
            "ancient",
            crate::models::MessageType::Text,
            crate::models::MessageStatus::Sent,
            chrono::Utc::now() - chrono::Duration::days(400),
            None,
        )
        .unwrap();
        crate::db::next_sequence(&conn, &cid, "new").unwrap();
        crate::db::append_message(
            &conn,
            &cid,
            2,
            "new",
            "alice",
            "fresh",
            crate::models::MessageType::Text,
            crate::models::MessageStatus::Sent,
            chrono::Utc::now(),
            None,
        )
        .unwrap();

        let pruned = run_retention(&conn, 365);
        assert_eq!(pruned, 1);
        let remaining = crate::db::read_history(&conn, &cid, 10, None).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message_id, "new");

        drop(conn);
        let _ = std::fs::remove_file(&path);
    }
}
