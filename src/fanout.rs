//! Fan-out dispatcher (G, §4.G): consumes `persisted`, expands each event
//! into per-(recipient, channel) delivery jobs using the recipient's linked
//! identities and the sender's requested channel set.

use rusqlite::Connection;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::bus::Bus;
use crate::db;
use crate::error::CoreError;
use crate::models::{ALL_CHANNELS, DELIVERY_CHANNEL, DeliveryJob, PersistedEvent};

const TOPIC: &str = "persisted";
const GROUP: &str = "fanout";

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
            eprintln!("fanout[{partition}]: failed to open db: {e}");
            return;
        }
    };
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .ok();

    let mut retries: HashMap<u64, u32> = HashMap::new();

    loop {
        let record = bus.poll(TOPIC, GROUP, partition).await;

        match handle(&conn, &bus, &record.payload).await {
            Ok(()) => {
                bus.commit(TOPIC, GROUP, partition, record.offset).await;
                retries.remove(&record.offset);
            }
            Err(e) => {
                let attempts = retries.entry(record.offset).or_insert(0);
                *attempts += 1;
                if e.is_permanent() || *attempts >= dlq_max_retries {
                    eprintln!(
                        "fanout[{partition}]: poison message at offset {} -> {TOPIC}.dlq: {e}",
                        record.offset
                    );
                    let _ = bus
                        .publish_dlq(TOPIC, &record.key, record.payload.clone())
                        .await;
                    bus.commit(TOPIC, GROUP, partition, record.offset).await;
                    retries.remove(&record.offset);
                } else {
                    eprintln!(
                        "fanout[{partition}]: retry {attempts}/{dlq_max_retries} for offset {}: {e}",
                        record.offset
                    );
                }
            }
        }
    }
}

async fn handle(conn: &Connection, bus: &Bus, payload: &[u8]) -> Result<(), CoreError> {
    let event: PersistedEvent = serde_json::from_slice(payload)
        .map_err(|e| CoreError::InvalidArgument(format!("malformed persisted event: {e}")))?;

    let members = db::get_members(conn, &event.submitted.conversation_id)?;
    let sender = &event.submitted.sender_id;

    let requested: Vec<String> = if event.submitted.requested_channels.is_empty() {
        vec![DELIVERY_CHANNEL.to_string()]
    } else {
        event.submitted.requested_channels.clone()
    };
    let wants_all = requested.iter().any(|c| c == ALL_CHANNELS);
    let requested_set: HashSet<&str> = requested.iter().map(String::as_str).collect();

    for member in members.iter().filter(|m| *m != sender) {
        let identities = db::get_identities(conn, member)?;

        let target_channels: Vec<&str> = if wants_all {
            identities.keys().map(String::as_str).collect()
        } else {
            identities
                .keys()
                .map(String::as_str)
                .filter(|c| requested_set.contains(c))
                .collect()
        };

        for channel in target_channels {
            let job_id = DeliveryJob::compute_job_id(&event.submitted.message_id, member, channel);
            let job = DeliveryJob {
                job_id,
                message_id: event.submitted.message_id.clone(),
                conversation_id: event.submitted.conversation_id.clone(),
                recipient_id: member.clone(),
                channel: channel.to_string(),
                payload: event.clone(),
            };
            bus.publish_json("delivery", member, &job).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationKind, MessageStatus, MessageType, SubmittedEvent};

    #[tokio::test]
    async fn routes_only_to_requested_channels_present_in_identities() {
        let path = std::env::temp_dir()
            .join(format!("fanout-test-{}.db", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string();
        let real_db = db::Db::new(&path);

        let conn = real_db.conn.lock().unwrap();
        let cid = db::create_conversation(
            &conn,
            ConversationKind::Private,
            &["alice".to_string(), "bob".to_string()],
            serde_json::json!({}),
        )
        .unwrap();
        db::add_identity(&conn, "bob", "whatsapp", "+5511999").unwrap();
        drop(conn);

        let bus = Bus::new(1);
        let event = PersistedEvent {
            submitted: SubmittedEvent {
                message_id: "M1".to_string(),
                conversation_id: cid.clone(),
                sender_id: "alice".to_string(),
                timestamp: chrono::Utc::now(),
                message_type: MessageType::Text,
                content: "hi".to_string(),
                attachments: None,
                status: MessageStatus::Sent,
                requested_channels: vec!["whatsapp".to_string(), "instagram".to_string()],
            },
            sequence: 1,
        };
        let payload = serde_json::to_vec(&event).unwrap();

        let conn2 = real_db.conn.lock().unwrap();
        handle(&conn2, &bus, &payload).await.unwrap();
        drop(conn2);

        let r = bus.poll("delivery", "test", 0).await;
        let job: DeliveryJob = serde_json::from_slice(&r.payload).unwrap();
        assert_eq!(job.channel, "whatsapp");
        assert_eq!(job.recipient_id, "bob");
        assert_eq!(
            job.job_id,
            DeliveryJob::compute_job_id("M1", "bob", "whatsapp")
        );

        let _ = std::fs::remove_file(&path);
    }
}
