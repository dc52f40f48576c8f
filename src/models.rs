use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Internal channel every user is implicitly bound to.
pub const DELIVERY_CHANNEL: &str = "delivery";
/// Sentinel requested-channel meaning "every linked channel".
pub const ALL_CHANNELS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Private,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    File,
    Location,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "SENT",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::Read => "READ",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SENT" => Some(MessageStatus::Sent),
            "DELIVERED" => Some(MessageStatus::Delivered),
            "READ" => Some(MessageStatus::Read),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub kind: ConversationKind,
    pub metadata: serde_json::Value,
    pub last_sequence: i64,
}

/// A client submission, enqueued on the `submit` topic keyed by conversation-id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmittedEvent {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub content: String,
    pub attachments: Option<serde_json::Value>,
    pub status: MessageStatus,
    pub requested_channels: Vec<String>,
}

/// A submitted event enriched with its assigned sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEvent {
    #[serde(flatten)]
    pub submitted: SubmittedEvent,
    pub sequence: i64,
}

/// One planned transmission to one (recipient, channel) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub job_id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub recipient_id: String,
    pub channel: String,
    pub payload: PersistedEvent,
}

impl DeliveryJob {
    /// Deterministic job-id so replayed fan-out produces byte-identical jobs.
    pub fn compute_job_id(message_id: &str, recipient_id: &str, channel: &str) -> String {
        let name = format!("{message_id}:{recipient_id}:{channel}");
        Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()).to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    pub event_id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub sequence: i64,
    pub user_id: String,
    pub sender_id: String,
    pub new_status: MessageStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushNotificationEvent {
    pub notification_id: String,
    pub recipient_id: String,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// `{type:"STATUS_UPDATE", ...}` payload forwarded to the sender's socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdateNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub conversation_id: String,
    pub message_id: String,
    pub status: MessageStatus,
    pub read_by: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRow {
    pub message_id: String,
    pub conversation_id: String,
    pub sequence: i64,
    pub sender_id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    pub attachments: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxRow {
    pub user_id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub sequence: i64,
    pub content: String,
    pub sender_id: String,
    pub status: MessageStatus,
    pub arrival_time: DateTime<Utc>,
}

/// Request body for `POST /api/v1/conversations`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateConversationRequest {
    pub kind: ConversationKind,
    pub members: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Request body for `POST /api/v1/identities`.
#[derive(Debug, Clone, Deserialize)]
pub struct AddIdentityRequest {
    pub user_id: String,
    pub channel: String,
    pub external_id: String,
}

/// Request body for `POST /api/v1/submit`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub conversation_id: String,
    pub sender_id: String,
    pub idempotency_key: String,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: Option<MessageType>,
    pub attachments: Option<serde_json::Value>,
    pub requested_channels: Option<Vec<String>>,
}

/// Request body for `POST /api/v1/status`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusRequest {
    pub message_id: String,
    pub conversation_id: String,
    pub sequence: i64,
    pub user_id: String,
    pub sender_id: String,
    pub status: MessageStatus,
}
