// Route module decomposition — each domain area in its own file.
// Shared types (request guards) live here; route functions in submodules.

mod gateway;
mod ingress;
mod system;

pub use gateway::gateway_stream;
pub use ingress::{add_identity, create_conversation, get_inbox, get_user_conversations, submit, submit_status};
pub use system::health;

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

/// The user-id extracted from a verified bearer token (§6, §4.J).
pub struct AuthedUser(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthedUser {
    type Error = String;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let config = match req.rocket().state::<crate::config::Config>() {
            Some(c) => c,
            None => return Outcome::Error((Status::InternalServerError, "config not managed".to_string())),
        };

        let token = req
            .headers()
            .get_one("Authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .or_else(|| req.query_value::<&str>("token").and_then(Result::ok));

        let Some(token) = token else {
            return Outcome::Error((Status::Unauthorized, "missing bearer token".to_string()));
        };

        match crate::token::verify_token(&config.token_secret, token) {
            Ok(user_id) => Outcome::Success(AuthedUser(user_id)),
            Err(e) => Outcome::Error((Status::Unauthorized, e.to_string())),
        }
    }
}
