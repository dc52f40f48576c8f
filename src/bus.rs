//! The event bus (component C): an ordered, partitioned, at-least-once
//! topic transport with consumer groups and manual offset commit, embedded
//! in-process rather than fronting an external broker (see DESIGN.md for why
//! no external broker client is wired in).
//!
//! Grounded in the reference service's `tokio::sync::broadcast`-based
//! `EventBus`, generalized from "fire-and-forget fan-out" into a durable,
//! keyed, offset-tracked log: each topic is split into a fixed number of
//! partitions, a key always lands on the same partition, and a consumer
//! group tracks how far it has read on each partition independently.

use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::error::CoreError;

/// One record appended to a partition's log.
#[derive(Debug, Clone)]
pub struct Record {
    pub offset: u64,
    pub key: String,
    pub payload: Vec<u8>,
}

struct Partition {
    log: Mutex<VecDeque<Record>>,
    notify: Notify,
}

impl Partition {
    fn new() -> Self {
        Self {
            log: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

struct Topic {
    partitions: Vec<Partition>,
}

impl Topic {
    fn new(partition_count: usize) -> Self {
        Self {
            partitions: (0..partition_count).map(|_| Partition::new()).collect(),
        }
    }
}

/// `(topic, group, partition) -> next offset to read`.
type OffsetKey = (String, String, usize);

/// The embedded broker shared by the whole process. Cheap to clone (it's an
/// `Arc` internally); one instance is constructed at startup and handed to
/// every worker and the ingress HTTP surface.
pub struct Bus {
    partition_count: usize,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
    offsets: Mutex<HashMap<OffsetKey, u64>>,
}

impl Bus {
    pub fn new(partition_count: usize) -> Self {
        Self {
            partition_count: partition_count.max(1),
            topics: Mutex::new(HashMap::new()),
            offsets: Mutex::new(HashMap::new()),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partition_count
    }

    fn partition_of(&self, key: &str) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.partition_count
    }

    async fn topic(&self, name: &str) -> Arc<Topic> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Topic::new(self.partition_count)))
            .clone()
    }

    /// Append a record keyed by `key` to `topic`. Records sharing a key
    /// always land on the same partition, preserving per-key publish order.
    pub async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), CoreError> {
        let t = self.topic(topic).await;
        let idx = self.partition_of(key);
        let partition = &t.partitions[idx];
        let mut log = partition.log.lock().await;
        let offset = log.back().map(|r| r.offset + 1).unwrap_or(0);
        log.push_back(Record {
            offset,
            key: key.to_string(),
            payload,
        });
        drop(log);
        partition.notify.notify_waiters();
        Ok(())
    }

    /// Publish a JSON-serializable value, for callers that don't want to
    /// hand-roll serialization.
    pub async fn publish_json<T: serde::Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(), CoreError> {
        let payload = serde_json::to_vec(value)
            .map_err(|e| CoreError::Internal(format!("serialize {topic} payload: {e}")))?;
        self.publish(topic, key, payload).await
    }

    /// Publish directly to `<topic>.dlq`, the dead-letter sibling of `topic`.
    pub async fn publish_dlq(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), CoreError> {
        self.publish(&format!("{topic}.dlq"), key, payload).await
    }

    /// Block until the next record after this group's committed offset is
    /// available on `partition`, then return it without advancing the
    /// committed offset — the caller must call `commit` after it has
    /// durably handled the record.
    pub async fn poll(&self, topic: &str, group: &str, partition: usize) -> Record {
        let t = self.topic(topic).await;
        let p = &t.partitions[partition];
        loop {
            let next = {
                let offsets = self.offsets.lock().await;
                *offsets
                    .get(&(topic.to_string(), group.to_string(), partition))
                    .unwrap_or(&0)
            };

            let notified = p.notify.notified();
            {
                let log = p.log.lock().await;
                if let Some(record) = log.iter().find(|r| r.offset >= next) {
                    return record.clone();
                }
            }
            notified.await;
        }
    }

    /// Record that `group` has successfully handled every record up to and
    /// including `offset` on `partition`. Offsets are monotone: committing
    /// an already-committed-or-lower offset is a no-op.
    pub async fn commit(&self, topic: &str, group: &str, partition: usize, offset: u64) {
        let mut offsets = self.offsets.lock().await;
        let key = (topic.to_string(), group.to_string(), partition);
        let next = offset + 1;
        let entry = offsets.entry(key).or_insert(0);
        if next > *entry {
            *entry = next;
        }
    }

    #[cfg(test)]
    pub async fn committed(&self, topic: &str, group: &str, partition: usize) -> u64 {
        let offsets = self.offsets.lock().await;
        *offsets
            .get(&(topic.to_string(), group.to_string(), partition))
            .unwrap_or(&0)
    }
}
