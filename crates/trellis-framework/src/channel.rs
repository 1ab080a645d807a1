//! Event-transport channels.
//!
//! A channel file exports a [`Channel`]. At mount time each connection asks
//! the channel's factory for a handler, so a channel can decide per
//! connection whether it exists at all.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use trellis_core::pattern::{self, CompiledPattern};
use trellis_core::{
    BoxedHandler, Context, Handler, HandlerResult, HeaderMap, Method, QueryMap,
    RequestParts, StructuredError, UnknownMethod, into_handler,
};

use crate::error::BuildResult;
use crate::middleware::{Gate, GateResult, MountedHook, Scope, gate, mounted_hook};
use crate::route::{Listener, RouteDefinition, compile};
use crate::socket::Connection;

/// Produces a connection's handler for a channel, or `None` to withhold it.
pub type Factory =
    Arc<dyn Fn(Connection) -> BoxFuture<'static, Option<BoxedHandler>> + Send + Sync>;

/// The export of a channel file.
#[derive(Clone)]
pub struct Channel {
    factory: Factory,
    before_mounted: Option<Gate>,
    mounted: Option<MountedHook>,
    meta: Option<Value>,
}

impl Channel {
    /// A channel that gives every connection the same handler.
    pub fn new<H, T>(handler: H) -> Self
    where
        H: Handler<T>,
        T: 'static,
    {
        let handler = into_handler(handler);
        Self::factory(move |_| {
            let handler = Arc::clone(&handler);
            async move { Some(handler) }
        })
    }

    /// A channel whose handler is chosen per connection.
    pub fn factory<F, Fut>(f: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<BoxedHandler>> + Send + 'static,
    {
        Self {
            factory: Arc::new(
                move |conn: Connection| -> BoxFuture<'static, Option<BoxedHandler>> {
                    Box::pin(f(conn))
                },
            ),
            before_mounted: None,
            mounted: None,
            meta: None,
        }
    }

    /// Gate evaluated after every ancestor gate passed.
    pub fn before_mounted<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = GateResult> + Send + 'static,
    {
        self.before_mounted = Some(gate(f));
        self
    }

    /// Hook run once this channel's listener is attached.
    pub fn mounted<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.mounted = Some(mounted_hook(f));
        self
    }

    /// Attaches description metadata for the documentation sink.
    pub fn describe(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    pub(crate) fn into_definition(
        self,
        path: &str,
        ancestors: &Scope,
    ) -> BuildResult<ChannelDefinition> {
        Ok(ChannelDefinition {
            path: pattern::join(path, ""),
            pattern: compile(path)?,
            ancestors: ancestors.clone(),
            factory: self.factory,
            before_mounted: self.before_mounted,
            mounted: self.mounted,
            meta: self.meta,
            mirrored: Vec::new(),
        })
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("before_mounted", &self.before_mounted.is_some())
            .field("mounted", &self.mounted.is_some())
            .finish_non_exhaustive()
    }
}

/// A registered channel. Immutable once built.
///
/// The ancestor scope supplies the three mount-time layers, each keyed by
/// its directory path: gates, builders, and mounted hooks.
#[derive(Clone)]
pub struct ChannelDefinition {
    path: String,
    pattern: Arc<CompiledPattern>,
    ancestors: Scope,
    factory: Factory,
    before_mounted: Option<Gate>,
    mounted: Option<MountedHook>,
    meta: Option<Value>,
    mirrored: Vec<Method>,
}

impl ChannelDefinition {
    /// Mirrors the event-served routes sharing one path into a channel.
    ///
    /// `routes` must be non-empty and share a path; the first route's
    /// ancestors become the channel's.
    pub(crate) fn mirror(routes: Vec<RouteDefinition>) -> Option<Self> {
        let first = routes.first()?.clone();
        let methods: Vec<Method> = routes.iter().map(RouteDefinition::method).collect();
        let listeners: Arc<Vec<(Method, Listener)>> =
            Arc::new(routes.iter().map(|r| (r.method(), r.listener())).collect());

        let handler = into_handler(move |ctx: Context| {
            let listeners = Arc::clone(&listeners);
            async move { dispatch_envelope(&listeners, ctx).await }
        });

        Some(Self {
            path: first.path().to_string(),
            pattern: Arc::clone(first.pattern()),
            ancestors: first.ancestors().clone(),
            factory: Arc::new(
                move |_: Connection| -> BoxFuture<'static, Option<BoxedHandler>> {
                    let handler = Arc::clone(&handler);
                    Box::pin(async move { Some(handler) })
                },
            ),
            before_mounted: None,
            mounted: None,
            meta: first.meta().cloned(),
            mirrored: methods,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn pattern(&self) -> &Arc<CompiledPattern> {
        &self.pattern
    }

    /// Ancestor layers, outermost first.
    pub fn ancestors(&self) -> &Scope {
        &self.ancestors
    }

    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// The route methods this channel mirrors, empty for declared channels.
    pub fn mirrored_methods(&self) -> &[Method] {
        &self.mirrored
    }

    pub fn is_mirrored(&self) -> bool {
        !self.mirrored.is_empty()
    }

    pub(crate) fn factory(&self) -> &Factory {
        &self.factory
    }

    pub(crate) fn own_gate(&self) -> Option<&Gate> {
        self.before_mounted.as_ref()
    }

    pub(crate) fn own_mounted(&self) -> Option<&MountedHook> {
        self.mounted.as_ref()
    }

    pub(crate) fn relocate(&self, path: &str, ancestors: Option<&Scope>) -> BuildResult<Self> {
        Ok(Self {
            path: pattern::join(path, ""),
            pattern: compile(path)?,
            ancestors: ancestors.cloned().unwrap_or_else(|| self.ancestors.clone()),
            ..self.clone()
        })
    }
}

impl std::fmt::Debug for ChannelDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelDefinition")
            .field("path", &self.path)
            .field("ancestors", &self.ancestors.len())
            .field("mirrored", &self.mirrored)
            .finish_non_exhaustive()
    }
}

/// The event body of a mirrored route call.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Envelope {
    method: Option<String>,
    body: Value,
    query: QueryMap,
    params: BTreeMap<String, String>,
    headers: HeaderMap,
}

fn select_method(
    listeners: &[(Method, Listener)],
    requested: Option<&str>,
) -> HandlerResult<usize> {
    if let Some(name) = requested {
        let method: Method = name
            .parse()
            .map_err(|e: UnknownMethod| StructuredError::bad_request(e.to_string()))?;
        return listeners
            .iter()
            .position(|(m, _)| *m == method)
            .or_else(|| listeners.iter().position(|(m, _)| *m == Method::All))
            .ok_or_else(|| StructuredError::new(405, "method-not-allowed").into());
    }

    if listeners.len() == 1 {
        return Ok(0);
    }
    Ok(listeners
        .iter()
        .position(|(m, _)| *m == Method::Get)
        .unwrap_or(0))
}

async fn dispatch_envelope(listeners: &[(Method, Listener)], ctx: Context) -> HandlerResult {
    let envelope: Envelope = match ctx.body() {
        Value::Null => Envelope::default(),
        body => serde_json::from_value(body.clone()).map_err(|e| {
            StructuredError::bad_request("invalid-envelope").with_messages(vec![e.to_string()])
        })?,
    };
    let index = select_method(listeners, envelope.method.as_deref())?;
    let (method, listener) = &listeners[index];

    let mut params = envelope.params;
    params.extend(ctx.params().clone());

    let parts = RequestParts::new(*method, ctx.full_path())
        .with_body(envelope.body)
        .with_query(envelope.query)
        .with_params(params)
        .with_headers(envelope.headers);

    match ctx.derive(parts) {
        Some(inner) => {
            listener(inner).await;
            Ok(())
        }
        None => Err(StructuredError::bad_request("mirrored routes are event-only").into()),
    }
}
