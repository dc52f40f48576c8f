use crate::common::{create_private, test_client};
use rocket::http::{ContentType, Status};

#[test]
fn private_conversation_creation_is_idempotent_over_http() {
    let client = test_client();
    let first = create_private(&client, "alice", "bob");
    let second = create_private(&client, "bob", "alice");
    assert_eq!(first, second);
}

#[test]
fn private_conversation_rejects_wrong_member_count() {
    let client = test_client();
    let res = client
        .post("/api/v1/conversations")
        .header(ContentType::JSON)
        .body(r#"{"kind":"private","members":["alice","bob","carol"]}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn group_conversation_accepts_any_member_count() {
    let client = test_client();
    let res = client
        .post("/api/v1/conversations")
        .header(ContentType::JSON)
        .body(r#"{"kind":"group","members":["alice","bob","carol"]}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn user_conversations_lists_memberships() {
    let client = test_client();
    let conv_id = create_private(&client, "alice", "bob");

    let res = client.get("/api/v1/conversations/alice").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let ids: Vec<&str> = body["conversations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&conv_id.as_str()));
}
