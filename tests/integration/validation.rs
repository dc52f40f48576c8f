use crate::common::{create_private, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn submit_rejects_non_uuid_idempotency_key() {
    let client = test_client();
    let conv_id = create_private(&client, "alice", "bob");
    let res = client
        .post("/api/v1/submit")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"conversation_id":"{conv_id}","sender_id":"alice","idempotency_key":"not-a-uuid","content":"hi"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn submit_rejects_empty_content_without_attachments() {
    let client = test_client();
    let conv_id = create_private(&client, "alice", "bob");
    let key = uuid::Uuid::new_v4().to_string();
    let res = client
        .post("/api/v1/submit")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"conversation_id":"{conv_id}","sender_id":"alice","idempotency_key":"{key}","content":""}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn add_identity_rejects_empty_fields() {
    let client = test_client();
    let res = client
        .post("/api/v1/identities")
        .header(ContentType::JSON)
        .body(r#"{"user_id":"","channel":"whatsapp","external_id":"+5511999"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}
