//! Status processor (I, §4.I): consumes `status` events, updates the
//! message log, and notifies the original sender's socket.

use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::Bus;
use crate::db;
use crate::error::CoreError;
use crate::models::StatusEvent;
use crate::pubsub::PubSub;

const TOPIC: &str = "status";
const GROUP: &str = "status";

pub fn spawn(bus: Arc<Bus>, pubsub: Arc<PubSub>, db_path: String, dlq_max_retries: u32) {
    for partition in 0..bus.partition_count() {
        let bus = bus.clone();
        let pubsub = pubsub.clone();
        let db_path = db_path.clone();
        tokio::spawn(async move {
            run_partition(bus, pubsub, db_path, partition, dlq_max_retries).await;
        });
    }
}

async fn run_partition(
    bus: Arc<Bus>,
    pubsub: Arc<PubSub>,
    db_path: String,
    partition: usize,
    dlq_max_retries: u32,
) {
    let conn = match Connection::open(&db_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("status[{partition}]: failed to open db: {e}");
            return;
        }
    };
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .ok();

    let mut retries: HashMap<u64, u32> = HashMap::new();

    loop {
        let record = bus.poll(TOPIC, GROUP, partition).await;

        match handle(&conn, &pubsub, &record.payload) {
            Ok(()) => {
                bus.commit(TOPIC, GROUP, partition, record.offset).await;
                retries.remove(&record.offset);
            }
            Err(e) => {
                let attempts = retries.entry(record.offset).or_insert(0);
                *attempts += 1;
                if e.is_permanent() || *attempts >= dlq_max_retries {
                    eprintln!(
                        "status[{partition}]: poison message at offset {} -> {TOPIC}.dlq: {e}",
                        record.offset
                    );
                    let _ = bus
                        .publish_dlq(TOPIC, &record.key, record.payload.clone())
                        .await;
                    bus.commit(TOPIC, GROUP, partition, record.offset).await;
                    retries.remove(&record.offset);
                } else {
                    eprintln!(
                        "status[{partition}]: retry {attempts}/{dlq_max_retries} for offset {}: {e}",
                        record.offset
                    );
                }
            }
        }
    }
}

fn handle(conn: &Connection, pubsub: &PubSub, payload: &[u8]) -> Result<(), CoreError> {
    let event: StatusEvent = serde_json::from_slice(payload)
        .map_err(|e| CoreError::InvalidArgument(format!("malformed status event: {e}")))?;

    db::update_status(conn, &event.conversation_id, event.sequence, event.new_status)?;

    if event.sender_id != event.user_id {
        let notification = crate::models::StatusUpdateNotification {
            kind: "STATUS_UPDATE".to_string(),
            conversation_id: event.conversation_id.clone(),
            message_id: event.message_id.clone(),
            status: event.new_status,
            read_by: event.user_id.clone(),
            timestamp: event.timestamp,
        };
        if let Ok(bytes) = serde_json::to_vec(&notification) {
            let channel = PubSub::channel_for_user(&event.sender_id);
            pubsub.publish(&channel, bytes);
        }
    }

    Ok(())
}
