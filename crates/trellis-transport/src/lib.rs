//! # Trellis Transport
//!
//! Binds built [`Registries`] to the network. One TCP listener serves both
//! transports:
//!
//! ```text
//! 0.0.0.0:3000
//! ├── GET  /socket   → WebSocket upgrade → Session per connection
//! └── *    /{*path}  → route table       → Reply
//! ```
//!
//! ```rust,ignore
//! let listener = TcpListener::bind("127.0.0.1:3000").await?;
//! trellis_transport::serve(listener, registries, ServeOptions::default(), shutdown).await?;
//! ```

pub mod frame;
mod http;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit, routing::get};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use trellis_framework::Registries;

pub use frame::{Inbound, OutboundFrame};

/// Default path of the WebSocket endpoint.
pub const DEFAULT_SOCKET_PATH: &str = "/socket";

/// Default request body limit in bytes.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Listener options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServeOptions {
    /// Path at which WebSocket upgrades are accepted.
    pub socket_path: String,
    /// Maximum accepted request body size in bytes.
    pub body_limit: usize,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// State shared by every axum handler of one server.
pub(crate) struct AppState {
    pub registries: Arc<Registries>,
    pub options: ServeOptions,
    pub shutdown: CancellationToken,
}

/// Builds the axum router serving `registries`.
///
/// Open WebSocket connections are closed once `shutdown` is cancelled.
pub fn router(
    registries: Arc<Registries>,
    options: ServeOptions,
    shutdown: CancellationToken,
) -> Router {
    let socket_path = if options.socket_path.starts_with('/') {
        options.socket_path.clone()
    } else {
        format!("/{}", options.socket_path)
    };
    let body_limit = options.body_limit;
    let state = Arc::new(AppState {
        registries,
        options,
        shutdown,
    });

    Router::new()
        .route(&socket_path, get(ws::upgrade))
        .fallback(http::dispatch)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serves both transports on `listener` until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    registries: Arc<Registries>,
    options: ServeOptions,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    info!(
        addr = %addr,
        socket_path = %options.socket_path,
        routes = registries.routes().len(),
        channels = registries.channels().len(),
        "Listening"
    );

    let app = router(registries, options, shutdown.clone());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await?;

    info!(addr = %addr, "Server stopped");
    Ok(())
}
