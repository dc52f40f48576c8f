//! Socket gateway (J, §4.J): authenticates a live session, subscribes the
//! user's ephemeral pub/sub channel, and forwards published bytes as
//! server-sent events. Grounded directly in the reference service's SSE
//! stream route (`stream.rs`): one broadcast subscription per connection,
//! `tokio::select!` between the subscription and a heartbeat interval so
//! intermediary proxies don't time the connection out.

use rocket::response::stream::{Event, EventStream};
use rocket::{State, get};
use std::sync::Arc;
use std::time::Duration;

use super::AuthedUser;
use crate::pubsub::PubSub;

const HEARTBEAT_SECS: u64 = 15;

#[get("/api/v1/gateway/stream")]
pub fn gateway_stream(pubsub: &State<Arc<PubSub>>, user: AuthedUser) -> EventStream![Event + '_] {
    let channel = PubSub::channel_for_user(&user.0);
    let mut rx = pubsub.subscribe(&channel);

    EventStream! {
        let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_SECS));
        heartbeat.tick().await; // first tick fires immediately; consume it

        loop {
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Ok(bytes) => {
                            let body = String::from_utf8_lossy(&bytes).into_owned();
                            yield Event::data(body);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                            continue;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    yield Event::comment("heartbeat");
                }
            }
        }
    }
}
