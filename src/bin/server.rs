//! Process supervisor (L, §4.L): the single binary that wires the store,
//! bus, pub/sub, and pipeline workers together and launches the ingress
//! HTTP surface. Kept deliberately thin — all real wiring lives in
//! `chat_backbone_core::build_rocket`.

#[rocket::main]
async fn main() {
    if let Err(e) = chat_backbone_core::rocket().launch().await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
