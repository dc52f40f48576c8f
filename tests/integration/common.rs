use rocket::local::blocking::Client;

/// Wrapper around Client that auto-deletes the temp DB on drop.
/// Uses Option<Client> so the SQLite connection is released before the file
/// is removed (WAL mode holds the file open otherwise).
pub struct TestClient {
    client: Option<Client>,
    db_path: String,
}

impl Drop for TestClient {
    fn drop(&mut self) {
        drop(self.client.take());
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

impl std::ops::Deref for TestClient {
    type Target = Client;
    fn deref(&self) -> &Client {
        self.client.as_ref().unwrap()
    }
}

pub fn test_client() -> TestClient {
    let db_path = format!(
        "/tmp/chat_backbone_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );

    let rocket = chat_backbone_core::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestClient { client: Some(client), db_path }
}

/// Create a private conversation between two users and return its id.
pub fn create_private(client: &Client, a: &str, b: &str) -> String {
    use rocket::http::ContentType;
    let res = client
        .post("/api/v1/conversations")
        .header(ContentType::JSON)
        .body(format!(r#"{{"kind":"private","members":["{a}","{b}"]}}"#))
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    body["conversation_id"].as_str().unwrap().to_string()
}

/// Submit a message and return the parsed response body.
pub fn submit(
    client: &Client,
    conversation_id: &str,
    sender: &str,
    idempotency_key: &str,
    content: &str,
) -> serde_json::Value {
    use rocket::http::ContentType;
    let res = client
        .post("/api/v1/submit")
        .header(ContentType::JSON)
        .body(format!(
            r#"{{"conversation_id":"{conversation_id}","sender_id":"{sender}","idempotency_key":"{idempotency_key}","content":"{content}"}}"#
        ))
        .dispatch();
    res.into_json().unwrap()
}

/// Give the background pipeline workers a chance to drain the bus.
/// The bus is in-process so this is a short fixed sleep rather than a poll
/// loop, matching the reference service's retention-sweep test style.
pub fn drain() {
    std::thread::sleep(std::time::Duration::from_millis(200));
}
