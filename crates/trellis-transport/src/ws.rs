//! Event transport over WebSocket.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ConnectInfo, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{Extensions, HeaderMap as AxumHeaderMap, Uri},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use trellis_core::HeaderMap;
use trellis_framework::{Connection, Outbound, Session};

use crate::AppState;
use crate::frame::{Inbound, OutboundFrame};

/// Upgrade handler for the socket path.
///
/// The query string of the upgrade request is the handshake payload, as a
/// JSON object of strings.
pub(crate) async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: AxumHeaderMap,
    extensions: Extensions,
) -> Response {
    let remote_addr = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let auth = Query::<BTreeMap<String, String>>::try_from_uri(&uri)
        .map(|Query(query)| {
            Value::Object(
                query
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            )
        })
        .unwrap_or_else(|_| Value::Object(Default::default()));

    let headers: HeaderMap = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    debug!(remote_addr = ?remote_addr, "New WebSocket connection request");
    ws.on_upgrade(move |socket| async move {
        let (connection, outbound) = Connection::new(auth, headers, remote_addr);
        handle_socket(state, socket, connection, outbound).await;
    })
}

/// How long a closing connection may spend flushing queued frames.
const SEND_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Waits up to `grace` for `task`, aborting it if it is still running.
///
/// Returns whether the task finished on its own.
async fn finish_or_abort(mut task: JoinHandle<()>, grace: Duration) -> bool {
    if tokio::time::timeout(grace, &mut task).await.is_ok() {
        return true;
    }
    task.abort();
    false
}

/// Drives one WebSocket connection until either side closes it.
async fn handle_socket(
    state: Arc<AppState>,
    socket: WebSocket,
    connection: Connection,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    let id = connection.id();
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Mount before reading any frame so no event races the access map.
    let session = Arc::new(state.registries.mount(connection.clone()).await);
    info!(
        connection_id = id,
        remote_addr = ?connection.remote_addr(),
        mounted = session.access().iter().filter(|e| e.is_accessible()).count(),
        "WebSocket connection established"
    );

    // ── Send task: forwards outbound messages to the write half ──────────────
    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let Some(frame) = OutboundFrame::from_outbound(message) else {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            };
            if ws_tx.send(Message::Text(frame.to_text().into())).await.is_err() {
                warn!(connection_id = id, "Failed to send frame, connection closed");
                break;
            }
        }
    });

    // ── Receive loop: dispatches inbound frames as independent tasks ─────────
    loop {
        let result = tokio::select! {
            () = connection.closed() => break,
            () = state.shutdown.cancelled() => {
                connection.close();
                break;
            }
            next = ws_rx.next() => match next {
                Some(result) => result,
                None => break,
            },
        };

        match result {
            Ok(Message::Text(text)) => {
                trace!(connection_id = id, len = text.len(), "Received text frame");
                handle_frame(&session, text.as_str());
            }
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => handle_frame(&session, text),
                Err(_) => warn!(connection_id = id, "Dropping non UTF-8 binary frame"),
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                trace!(connection_id = id, "Received ping/pong");
            }
            Ok(Message::Close(_)) => {
                info!(connection_id = id, "WebSocket connection closed by client");
                break;
            }
            Err(e) => {
                warn!(connection_id = id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // ── Cleanup ──────────────────────────────────────────────────────────────
    connection.close();
    if !finish_or_abort(send_task, SEND_DRAIN_GRACE).await {
        debug!(connection_id = id, "Send task did not drain in time, aborted");
    }
    info!(connection_id = id, "WebSocket connection closed");
}

fn handle_frame(session: &Arc<Session>, text: &str) {
    let frame = match Inbound::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(connection_id = session.connection().id(), error = %e, "Dropping malformed frame");
            return;
        }
    };
    let ack = frame.ack.map(|id| session.connection().ack(id));
    let session = Arc::clone(session);
    tokio::spawn(async move {
        session.dispatch(&frame.event, frame.data, ack).await;
    });
}
