//! Ingress HTTP surface (K, §4.K): the thin synchronous front door that
//! validates client submissions and hands them off to the event bus. This
//! mirrors the reference service's route style (JSON in/out, per-IP rate
//! limiting, `(Status, Json<Value>)` error bodies) but the handlers here do
//! none of the pipeline's real work themselves — they only shape-validate
//! and publish.

use chrono::Utc;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use uuid::Uuid;

use super::ClientIp;
use crate::bus::Bus;
use crate::config::Config;
use crate::db::{self, Db};
use crate::models::{
    AddIdentityRequest, CreateConversationRequest, MessageStatus, MessageType, StatusRequest,
    SubmitRequest, SubmittedEvent,
};
use crate::rate_limit::RateLimiter;

type JsonErr = (Status, Json<serde_json::Value>);

fn err(status: Status, msg: impl Into<String>) -> JsonErr {
    (status, Json(serde_json::json!({ "error": msg.into() })))
}

#[post("/api/v1/conversations", format = "json", data = "<body>")]
pub fn create_conversation(
    db: &State<Db>,
    body: Json<CreateConversationRequest>,
) -> Result<Json<serde_json::Value>, JsonErr> {
    if body.kind == crate::models::ConversationKind::Private && body.members.len() != 2 {
        return Err(err(
            Status::BadRequest,
            "private conversations require exactly 2 members",
        ));
    }
    if body.members.is_empty() {
        return Err(err(Status::BadRequest, "members must not be empty"));
    }

    let conn = db.conn.lock().unwrap();
    let id = db::create_conversation(
        &conn,
        body.kind,
        &body.members,
        body.metadata.clone().unwrap_or_else(|| serde_json::json!({})),
    )
    .map_err(core_err)?;

    Ok(Json(serde_json::json!({ "conversation_id": id })))
}

#[post("/api/v1/identities", format = "json", data = "<body>")]
pub fn add_identity(db: &State<Db>, body: Json<AddIdentityRequest>) -> Result<Json<serde_json::Value>, JsonErr> {
    if body.user_id.is_empty() || body.channel.is_empty() || body.external_id.is_empty() {
        return Err(err(Status::BadRequest, "user_id, channel and external_id are required"));
    }
    let conn = db.conn.lock().unwrap();
    db::add_identity(&conn, &body.user_id, &body.channel, &body.external_id).map_err(core_err)?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[post("/api/v1/submit", format = "json", data = "<body>")]
pub async fn submit(
    bus: &State<std::sync::Arc<Bus>>,
    rate_limiter: &State<RateLimiter>,
    config: &State<Config>,
    ip: ClientIp,
    body: Json<SubmitRequest>,
) -> Result<Json<serde_json::Value>, JsonErr> {
    let rl = rate_limiter.check_with_info(
        &format!("submit:{}", ip.0),
        config.rate_limit_submit_per_min,
        60,
    );
    if !rl.allowed {
        return Err(err(Status::TooManyRequests, "rate limited"));
    }

    if body.conversation_id.is_empty() || body.sender_id.is_empty() || body.idempotency_key.is_empty() {
        return Err(err(
            Status::BadRequest,
            "conversation_id, sender_id and idempotency_key are required",
        ));
    }
    if Uuid::parse_str(&body.idempotency_key).is_err() {
        return Err(err(Status::BadRequest, "idempotency_key must be a UUID"));
    }
    if body.content.is_empty() && body.attachments.is_none() {
        return Err(err(Status::BadRequest, "content or attachments required"));
    }

    let event = SubmittedEvent {
        message_id: body.idempotency_key.clone(),
        conversation_id: body.conversation_id.clone(),
        sender_id: body.sender_id.clone(),
        timestamp: Utc::now(),
        message_type: body.message_type.unwrap_or(MessageType::Text),
        content: body.content.clone(),
        attachments: body.attachments.clone(),
        status: MessageStatus::Sent,
        requested_channels: body.requested_channels.clone().unwrap_or_default(),
    };

    bus.publish_json("submit", &event.conversation_id, &event)
        .await
        .map_err(core_err)?;

    Ok(Json(serde_json::json!({
        "message_id": event.message_id,
        "conversation_id": event.conversation_id,
        "accepted": true,
    })))
}

#[post("/api/v1/status", format = "json", data = "<body>")]
pub async fn submit_status(
    bus: &State<std::sync::Arc<Bus>>,
    rate_limiter: &State<RateLimiter>,
    config: &State<Config>,
    ip: ClientIp,
    body: Json<StatusRequest>,
) -> Result<Json<serde_json::Value>, JsonErr> {
    let rl = rate_limiter.check_with_info(
        &format!("status:{}", ip.0),
        config.rate_limit_status_per_min,
        60,
    );
    if !rl.allowed {
        return Err(err(Status::TooManyRequests, "rate limited"));
    }
    if body.new_status_is_sent() {
        return Err(err(Status::BadRequest, "status must be DELIVERED or READ"));
    }

    let event = crate::models::StatusEvent {
        event_id: Uuid::new_v4().to_string(),
        message_id: body.message_id.clone(),
        conversation_id: body.conversation_id.clone(),
        sequence: body.sequence,
        user_id: body.user_id.clone(),
        sender_id: body.sender_id.clone(),
        new_status: body.status,
        timestamp: Utc::now(),
    };

    bus.publish_json("status", &event.conversation_id, &event)
        .await
        .map_err(core_err)?;

    Ok(Json(serde_json::json!({ "accepted": true })))
}

#[get("/api/v1/conversations/<user_id>")]
pub fn get_user_conversations(db: &State<Db>, user_id: &str) -> Result<Json<serde_json::Value>, JsonErr> {
    let conn = db.conn.lock().unwrap();
    let conversations = db::get_user_conversations(&conn, user_id).map_err(core_err)?;
    Ok(Json(serde_json::json!({ "conversations": conversations })))
}

#[get("/api/v1/inbox/<user_id>?<since>")]
pub fn get_inbox(
    db: &State<Db>,
    user_id: &str,
    since: Option<&str>,
) -> Result<Json<serde_json::Value>, JsonErr> {
    let since_ts = since.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok());
    let conn = db.conn.lock().unwrap();
    let rows = db::read_inbox(&conn, user_id, since_ts.map(|t| t.with_timezone(&Utc)))
        .map_err(core_err)?;
    Ok(Json(serde_json::json!({ "inbox": rows })))
}

fn core_err(e: crate::error::CoreError) -> JsonErr {
    use crate::error::CoreError::*;
    let status = match e {
        InvalidArgument(_) => Status::BadRequest,
        NotFound(_) => Status::NotFound,
        Conflict(_) => Status::Conflict,
        Unavailable(_) => Status::ServiceUnavailable,
        Internal(_) => Status::InternalServerError,
    };
    err(status, e.to_string())
}

impl StatusRequest {
    fn new_status_is_sent(&self) -> bool {
        self.status == MessageStatus::Sent
    }
}
