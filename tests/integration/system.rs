use crate::common::test_client;
use rocket::http::Status;

#[test]
fn health_reports_ok_on_fresh_db() {
    let client = test_client();
    let res = client.get("/api/v1/system/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
}
