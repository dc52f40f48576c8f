use rocket::serde::json::Json;
use rocket::{State, get};

use crate::db::Db;

#[get("/api/v1/system/health")]
pub fn health(db: &State<Db>) -> Json<serde_json::Value> {
    let ok = db.conn.lock().map(|c| c.is_autocommit()).unwrap_or(false);
    Json(serde_json::json!({ "status": if ok { "ok" } else { "degraded" } }))
}
