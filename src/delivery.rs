//! Delivery worker (H, §4.H): consumes `delivery` jobs, writes the
//! recipient's inbox row (write-ahead, mandatory), attempts real-time
//! delivery over the ephemeral pub/sub channel, and falls back to the push
//! topic when nobody is subscribed.

use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::Bus;
use crate::db;
use crate::error::CoreError;
use crate::models::{DeliveryJob, MessageStatus, PushNotificationEvent};
use crate::pubsub::PubSub;

const TOPIC: &str = "delivery";
const GROUP: &str = "delivery";

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
            eprintln!("delivery[{partition}]: failed to open db: {e}");
            return;
        }
    };
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .ok();

    let mut retries: HashMap<u64, u32> = HashMap::new();

    loop {
        let record = bus.poll(TOPIC, GROUP, partition).await;

        match handle(&conn, &bus, &pubsub, &record.payload).await {
            Ok(()) => {
                bus.commit(TOPIC, GROUP, partition, record.offset).await;
                retries.remove(&record.offset);
            }
            Err(e) => {
                let attempts = retries.entry(record.offset).or_insert(0);
                *attempts += 1;
                if e.is_permanent() || *attempts >= dlq_max_retries {
                    eprintln!(
                        "delivery[{partition}]: poison message at offset {} -> {TOPIC}.dlq: {e}",
                        record.offset
                    );
                    let _ = bus
                        .publish_dlq(TOPIC, &record.key, record.payload.clone())
                        .await;
                    bus.commit(TOPIC, GROUP, partition, record.offset).await;
                    retries.remove(&record.offset);
                } else {
                    eprintln!(
                        "delivery[{partition}]: retry {attempts}/{dlq_max_retries} for offset {}: {e}",
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
    pubsub: &PubSub,
    payload: &[u8],
) -> Result<(), CoreError> {
    let job: DeliveryJob = serde_json::from_slice(payload)
        .map_err(|e| CoreError::InvalidArgument(format!("malformed delivery job: {e}")))?;

    // Step 1: write-ahead inbox row. Mandatory — failure here aborts the
    // job for redelivery.
    db::push_inbox(
        conn,
        &job.recipient_id,
        &job.conversation_id,
        &job.message_id,
        job.payload.sequence,
        &job.payload.submitted.content,
        &job.payload.submitted.sender_id,
        MessageStatus::Sent,
    )?;

    // Steps 2-3: best-effort live delivery, falling back to push. Failures
    // here are logged, not propagated — the inbox write already made this
    // job's effect durable.
    let channel = PubSub::channel_for_user(&job.recipient_id);
    let serialized = match serde_json::to_vec(&job.payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("delivery: failed to serialize payload for {}: {e}", job.job_id);
            Vec::new()
        }
    };
    let subscribers = pubsub.publish(&channel, serialized);

    if subscribers == 0 {
        let notification = PushNotificationEvent {
            notification_id: uuid::Uuid::new_v4().to_string(),
            recipient_id: job.recipient_id.clone(),
            title: format!("New message from {}", job.payload.submitted.sender_id),
            body: push_body(&job.payload.submitted.content),
            data: serde_json::json!({
                "conversation_id": job.conversation_id,
                "message_id": job.message_id,
            }),
            timestamp: chrono::Utc::now(),
        };
        if let Err(e) = bus
            .publish_json("push", &job.recipient_id, &notification)
            .await
        {
            eprintln!("delivery: push-topic publish failed for {}: {e}", job.job_id);
        }
    }

    Ok(())
}

fn push_body(content: &str) -> String {
    if content.is_empty() {
        return "New file".to_string();
    }
    content.chars().take(100).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_body_truncates_and_defaults() {
        assert_eq!(push_body(""), "New file");
        let long = "x".repeat(200);
        assert_eq!(push_body(&long).chars().count(), 100);
    }
}
