//! Per-connection mount evaluation and event dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error, info, trace};
use trellis_core::{
    Ack, BoxedHandler, Context, ErasedHandler, HandlerResult, Method, RequestParts,
    StructuredError, catch_panic, guarded,
};

use super::connection::Connection;
use super::router::{Dispatched, HandlerTree, PatternTable, SocketEvent, SocketRouter};
use crate::channel::ChannelDefinition;
use crate::middleware::{Gate, Layer, Rejection};
use crate::registry::ChannelRegistry;
use crate::route::deliver_error;

/// Mount-time decision for one channel path.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessEntry {
    pub path: String,
    /// `None` when the channel was mounted.
    pub rejection: Option<Rejection>,
}

impl AccessEntry {
    pub fn is_accessible(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Ancestor results already computed for this connection, keyed by layer path.
#[derive(Default)]
struct MountCache {
    gates: HashMap<String, Result<(), Rejection>>,
    builders: HashMap<String, Result<Vec<Value>, Rejection>>,
    mounted: HashSet<String>,
}

/// The mounted state of one connection.
///
/// Built once by [`Session::mount`]; afterwards only read.
pub struct Session {
    connection: Connection,
    router: SocketRouter,
    access: PatternTable<AccessEntry>,
    entries: Vec<AccessEntry>,
}

impl Session {
    /// Evaluates every channel of `registry` for `connection`.
    ///
    /// Closes the connection when no channel is usable.
    pub async fn mount(registry: &ChannelRegistry, connection: Connection) -> Self {
        let mut session = Self {
            connection,
            router: SocketRouter::new(),
            access: PatternTable::default(),
            entries: Vec::new(),
        };
        let mut cache = MountCache::default();

        for def in registry.definitions() {
            let rejection = session.mount_channel(def, &mut cache).await.err();
            match &rejection {
                None => trace!(connection_id = session.connection.id(), path = %def.path(), "Channel mounted"),
                Some(r) => debug!(
                    connection_id = session.connection.id(),
                    path = %def.path(),
                    reason = r.reason().unwrap_or("unauthorized"),
                    "Channel inaccessible"
                ),
            }
            let entry = AccessEntry {
                path: def.path().to_string(),
                rejection,
            };
            session.access.insert(Arc::clone(def.pattern()), entry.clone());
            session.entries.push(entry);
        }

        let mounted = session.entries.iter().filter(|e| e.is_accessible()).count();
        if mounted == 0 {
            info!(
                connection_id = session.connection.id(),
                channels = session.entries.len(),
                "No usable channel, closing connection"
            );
            session.connection.close();
        } else {
            debug!(
                connection_id = session.connection.id(),
                mounted,
                rejected = session.entries.len() - mounted,
                "Connection mounted"
            );
        }
        session
    }

    async fn mount_channel(
        &mut self,
        def: &ChannelDefinition,
        cache: &mut MountCache,
    ) -> Result<(), Rejection> {
        let conn = &self.connection;

        for layer in def.ancestors() {
            let decision = match cache.gates.get(layer.path()) {
                Some(decision) => decision.clone(),
                None => {
                    let decision = run_gates(conn, layer).await;
                    cache.gates.insert(layer.path().to_string(), decision.clone());
                    decision
                }
            };
            decision?;
        }

        if let Some(own) = def.own_gate() {
            run_gate(conn, own, def.path()).await?;
        }

        let handler = match catch_panic((def.factory())(conn.clone())).await {
            Ok(Some(handler)) => handler,
            Ok(None) => return Err(Rejection::because("unavailable")),
            Err(err) => {
                error!(connection_id = conn.id(), path = %def.path(), error = %err, "Channel factory failed");
                return Err(Rejection::because("unavailable"));
            }
        };

        let mut injected = Vec::new();
        for layer in def.ancestors() {
            let produced = match cache.builders.get(layer.path()) {
                Some(produced) => produced.clone(),
                None => {
                    let produced = run_builders(conn, layer).await;
                    cache.builders.insert(layer.path().to_string(), produced.clone());
                    produced
                }
            };
            injected.extend(produced?);
        }

        self.router
            .insert(Arc::clone(def.pattern()), listener(handler, injected));

        if let Some(hook) = def.own_mounted() {
            if let Err(err) = catch_panic(hook(conn.clone())).await {
                error!(connection_id = conn.id(), path = %def.path(), error = %err, "Mounted hook failed");
            }
        }
        for layer in def.ancestors() {
            if !cache.mounted.insert(layer.path().to_string()) {
                continue;
            }
            for hook in &layer.middleware().mounted {
                if let Err(err) = catch_panic(hook(conn.clone())).await {
                    error!(connection_id = conn.id(), layer = %layer.path(), error = %err, "Mounted hook failed");
                }
            }
        }
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Mount decisions in channel registration order.
    pub fn access(&self) -> &[AccessEntry] {
        &self.entries
    }

    /// Whether an event name resolves to a mounted channel.
    pub fn is_accessible(&self, event: &str) -> bool {
        let name = self.router.normalize(event);
        self.access
            .lookup(&name)
            .is_some_and(|(entry, _)| entry.is_accessible())
    }

    /// Dispatches one inbound event.
    ///
    /// Rejected paths answer with the recorded rejection without running any
    /// application code.
    pub async fn dispatch(&self, event: &str, body: Value, ack: Option<Ack>) -> Dispatched {
        let name = self.router.normalize(event);
        match self.access.lookup(&name) {
            Some((AccessEntry { rejection: Some(rejection), .. }, _)) => {
                let err = rejection.to_error();
                debug!(
                    connection_id = self.connection.id(),
                    event = %name,
                    status = err.status_code,
                    "Event on inaccessible channel"
                );
                if let Some(ack) = &ack {
                    ack.send(err.to_value());
                }
                Dispatched::Failed(err)
            }
            Some(_) => self.router.dispatch(&name, body, ack).await,
            None => {
                debug!(connection_id = self.connection.id(), event = %name, "No channel matched event");
                if let Some(ack) = &ack {
                    ack.send(StructuredError::not_found(&name).to_value());
                }
                Dispatched::NotFound
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection)
            .field("access", &self.entries)
            .finish_non_exhaustive()
    }
}

/// Wraps a channel handler as a router leaf bound to this connection's
/// injected values.
fn listener(handler: BoxedHandler, injected: Vec<Value>) -> HandlerTree {
    let injected: Arc<[Value]> = injected.into();
    HandlerTree::Leaf(Arc::new(
        move |event: SocketEvent| -> BoxFuture<'static, HandlerResult> {
            let handler = Arc::clone(&handler);
            let injected = injected.to_vec();
            Box::pin(async move {
                let parts = RequestParts::new(Method::Get, event.event)
                    .with_body(event.body)
                    .with_params(event.params);
                let ctx = Context::event(parts, injected, event.ack);
                if let Err(err) = guarded(handler.call(ctx.clone())).await {
                    deliver_error(&ctx, err);
                }
                ctx.finish();
                Ok(())
            })
        },
    ))
}

async fn run_gate(conn: &Connection, gate: &Gate, path: &str) -> Result<(), Rejection> {
    match catch_panic(gate(conn.clone())).await {
        Ok(decision) => decision,
        Err(err) => {
            error!(connection_id = conn.id(), path = %path, error = %err, "Gate failed");
            Err(Rejection::because("internal-error"))
        }
    }
}

async fn run_gates(conn: &Connection, layer: &Layer) -> Result<(), Rejection> {
    for gate in &layer.middleware().gates {
        run_gate(conn, gate, layer.path()).await?;
    }
    Ok(())
}

async fn run_builders(conn: &Connection, layer: &Layer) -> Result<Vec<Value>, Rejection> {
    let mut produced = Vec::new();
    for builder in &layer.middleware().builders {
        match catch_panic(builder(conn.clone())).await {
            Ok(Ok(Some(value))) => produced.push(value),
            Ok(Ok(None)) => {}
            Ok(Err(rejection)) => return Err(rejection),
            Err(err) => {
                error!(connection_id = conn.id(), layer = %layer.path(), error = %err, "Builder failed");
                return Err(Rejection::because("internal-error"));
            }
        }
    }
    Ok(produced)
}
