use crate::common::{create_private, drain, submit, test_client};
use rocket::http::{ContentType, Status};
use uuid::Uuid;

#[test]
fn read_receipt_advances_status_and_rejects_regression() {
    let client = test_client();
    let conv_id = create_private(&client, "alice", "bob");
    let key = Uuid::new_v4().to_string();
    submit(&client, &conv_id, "alice", &key, "hi");
    drain();

    let res = client
        .post("/api/v1/status")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"message_id":"{key}","conversation_id":"{conv_id}","sequence":1,"user_id":"bob","sender_id":"alice","status":"READ"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    drain();

    let res = client.get("/api/v1/inbox/bob").dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    let row = body["inbox"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["message_id"] == key)
        .unwrap()
        .clone();
    assert_eq!(row["status"], "READ");
}

#[test]
fn status_submission_rejects_sent_as_new_status() {
    let client = test_client();
    let conv_id = create_private(&client, "alice", "bob");
    let key = Uuid::new_v4().to_string();
    submit(&client, &conv_id, "alice", &key, "hi");

    let res = client
        .post("/api/v1/status")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"message_id":"{key}","conversation_id":"{conv_id}","sequence":1,"user_id":"bob","sender_id":"alice","status":"SENT"}}"#
        ))
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}
