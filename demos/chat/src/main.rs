//! Chat Demo
//!
//! An in-memory module tree served over HTTP and WebSocket:
//!
//! ```text
//! ping.channel             → event "ping"
//! users/:id.route          → GET /users/:id, also event "users/:id"
//! members.alias            → /members/:id, re-exported from /users
//! chat/
//! ├── session.middleware   → requires ?name=... on the socket handshake
//! ├── send.channel         → event "chat/send"
//! └── :room/join.channel   → event "chat/<room>/join"
//! neighbors.route          → GET /neighbors, rejected without ?trusted
//! ```
//!
//! # Usage
//!
//! ```bash
//! cargo run --package chat-demo
//! websocat 'ws://127.0.0.1:3000/socket?name=ada'
//! {"event":"chat/send","data":{"text":"hi"},"ack":1}
//! ```

use anyhow::Result;
use serde_json::{Value, json};
use tracing::info;
use trellis::prelude::*;

// ============================================================================
// Handlers
// ============================================================================

async fn ping(ctx: Context) {
    ctx.json(json!({ "pong": true }));
}

async fn show_user(ctx: Context, params: Params) -> Result<(), StructuredError> {
    let id = params.get("id").unwrap_or_default();
    if id.parse::<u64>().is_err() {
        return Err(StructuredError::bad_request("invalid-id").with_data(json!(id)));
    }
    ctx.json(json!({ "id": id, "name": format!("user-{id}") }));
    Ok(())
}

async fn send(ctx: Context, Injected(values): Injected, Body(body): Body<Value>) {
    let name = values.first().cloned().unwrap_or(Value::Null);
    info!(name = %name, "Message sent");
    ctx.json(json!({ "from": name, "text": body["text"] }));
}

async fn join(ctx: Context, Injected(values): Injected) {
    ctx.json(json!({ "room": ctx.param("room"), "members": values }));
}

// ============================================================================
// Middleware
// ============================================================================

/// Every chat channel needs a named connection; the name is injected.
fn chat_session() -> Middleware {
    Middleware::new()
        .builder(|conn: Connection| async move {
            match conn.auth_field("name") {
                Some(Value::String(name)) if !name.is_empty() => Ok(Some(json!(name))),
                _ => Err(Rejection::because("name-required")),
            }
        })
        .on_mounted(|conn: Connection| async move {
            conn.emit("chat/welcome", json!({ "connection": conn.id() }));
        })
}

fn tree() -> Directory {
    Directory::new()
        .file("ping.channel", Channel::new(ping))
        .dir(
            "users",
            Directory::new().file(
                ":id.route",
                Route::new()
                    .get(show_user)
                    .serve_via_socket()
                    .describe(json!({ "summary": "Look up a user" })),
            ),
        )
        .file("members.alias", Alias::of("/users"))
        .file(
            "neighbors.route",
            Route::new()
                .middleware(|ctx: Context| async move {
                    if ctx.query().contains_key("trusted") {
                        Ok(Flow::Next)
                    } else {
                        Err(StructuredError::forbidden("untrusted").into())
                    }
                })
                .get(|ctx: Context| async move {
                    ctx.json(json!(["left", "right"]));
                }),
        )
        .dir(
            "chat",
            Directory::new()
                .file("session.middleware", chat_session())
                .file("send.channel", Channel::new(send))
                .dir(
                    ":room",
                    Directory::new().file("join.channel", Channel::new(join)),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    let runtime = TrellisRuntime::builder()
        .source(tree())
        .docs(std::sync::Arc::new(trellis::framework::LogSink))
        .build_or_exit();

    runtime.run().await?;
    Ok(())
}
