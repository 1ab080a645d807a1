//! Handle to one live event-transport connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::trace;
use trellis_core::{Ack, HeaderMap};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A message the transport should write to the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A server push.
    Emit { event: String, data: Value },
    /// An acknowledgment for an inbound event that carried an ack id.
    Ack { id: u64, data: Value },
    /// Close the connection.
    Close,
}

struct ConnectionInner {
    id: u64,
    auth: Value,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: CancellationToken,
}

/// A connected event-transport peer.
///
/// Handed to gates, builders, mounted hooks and channel factories. Cheap to
/// clone.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Creates a connection and the receiver the transport drains.
    ///
    /// `auth` is the handshake payload.
    pub fn new(
        auth: Value,
        headers: HeaderMap,
        remote_addr: Option<SocketAddr>,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Self {
            inner: Arc::new(ConnectionInner {
                id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
                auth,
                headers,
                remote_addr,
                outbound: tx,
                closed: CancellationToken::new(),
            }),
        };
        (conn, rx)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The handshake payload.
    pub fn auth(&self) -> &Value {
        &self.inner.auth
    }

    /// A single handshake field.
    pub fn auth_field(&self, key: &str) -> Option<&Value> {
        self.inner.auth.get(key)
    }

    /// Headers of the upgrade request.
    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Pushes an event to the peer. Returns `false` once the connection is gone.
    pub fn emit(&self, event: impl Into<String>, data: Value) -> bool {
        if self.is_closed() {
            return false;
        }
        self.inner
            .outbound
            .send(Outbound::Emit {
                event: event.into(),
                data,
            })
            .is_ok()
    }

    /// Creates the acknowledgment callback for an inbound event's ack id.
    pub fn ack(&self, id: u64) -> Ack {
        let outbound = self.inner.outbound.clone();
        Ack::new(move |data| {
            let _ = outbound.send(Outbound::Ack { id, data });
        })
    }

    /// Closes the connection. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        trace!(connection_id = self.inner.id, "Closing connection");
        self.inner.closed.cancel();
        let _ = self.inner.outbound.send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.inner.closed.cancelled()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
