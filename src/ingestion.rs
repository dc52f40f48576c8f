//! Ingestion worker (F, §4.F): consumes `submit`, assigns a sequence via the
//! metadata store, persists to the message log, and emits `persisted`.
//!
//! Spawned one task per partition, mirroring the reference service's
//! background-task idiom (`spawn_retention_task`, `webhooks::spawn_dispatcher`):
//! each task owns a private SQLite connection opened against the shared
//! database file and loops forever polling its assigned partition.

use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::Bus;
use crate::db;
use crate::dedup::DedupSet;
use crate::error::CoreError;
use crate::models::{PersistedEvent, SubmittedEvent};

const TOPIC: &str = "submit";
const GROUP: &str = "ingestion";
const DEDUP_CAPACITY: usize = 10_000;

pub fn spawn(bus: Arc<Bus>, db_path: String, dlq_max_retries: u32) {
    for partition in 0..bus.partition_count() {
        let bus = bus.clone();
        let db_path = db_path.clone();
        tokio::spawn(async move {
            run_partition(bus, db_path, partition, dlq_max_retries).await;
        });
    }
}

async fn run_partition(bus: Arc<Bus>, db_path: String, partition: usize, dlq_max_retries: u32) {
    let conn = match Connection::open(&db_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ingestion[{partition}]: failed to open db: {e}");
            return;
        }
    };
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .ok();

    let mut dedup = DedupSet::new(DEDUP_CAPACITY);
    let mut retries: HashMap<u64, u32> = HashMap::new();

    loop {
        let record = bus.poll(TOPIC, GROUP, partition).await;

        match handle(&conn, &bus, &mut dedup, &record.key, &record.payload).await {
            Ok(()) => {
                bus.commit(TOPIC, GROUP, partition, record.offset).await;
                retries.remove(&record.offset);
            }
            Err(e) => {
                let attempts = retries.entry(record.offset).or_insert(0);
                *attempts += 1;
                if e.is_permanent() || *attempts >= dlq_max_retries {
                    eprintln!(
                        "ingestion[{partition}]: poison message at offset {} -> {TOPIC}.dlq: {e}",
                        record.offset
                    );
                    let _ = bus
                        .publish_dlq(TOPIC, &record.key, record.payload.clone())
                        .await;
                    bus.commit(TOPIC, GROUP, partition, record.offset).await;
                    retries.remove(&record.offset);
                } else {
                    eprintln!(
                        "ingestion[{partition}]: retry {attempts}/{dlq_max_retries} for offset {}: {e}",
                        record.offset
                    );
                }
            }
        }
    }
}

async fn handle(
    conn: &Connection,
    bus: &Bus,
    dedup: &mut DedupSet,
    _key: &str,
    payload: &[u8],
) -> Result<(), CoreError> {
    let event: SubmittedEvent = serde_json::from_slice(payload)
        .map_err(|e| CoreError::InvalidArgument(format!("malformed submitted event: {e}")))?;

    if dedup.contains(&event.message_id) {
        return Ok(());
    }

    let sequence = db::next_sequence(conn, &event.conversation_id, &event.message_id)?;
    db::append_message(
        conn,
        &event.conversation_id,
        sequence,
        &event.message_id,
        &event.sender_id,
        &event.content,
        event.message_type,
        event.status,
        event.timestamp,
        event.attachments.as_ref(),
    )?;

    let persisted = PersistedEvent {
        submitted: event.clone(),
        sequence,
    };
    bus.publish_json("persisted", &event.conversation_id, &persisted)
        .await?;

    dedup.insert(&event.message_id);
    Ok(())
}
