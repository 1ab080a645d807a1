//! Transport-agnostic call context.
//!
//! Both transports normalize an inbound call into one [`Context`]: an HTTP
//! request becomes one through [`Context::http`], a socket event through
//! [`Context::event`]. Handlers and middleware only ever see this shape.
//!
//! # Responding
//!
//! Each context carries a local "responded" flag. The first call to any of
//! [`json`](Context::json), [`text`](Context::text), [`html`](Context::html)
//! or [`file`](Context::file) wins; later calls are ignored with a warning.
//! [`finish`](Context::finish) supplies the generic success payload when the
//! handler never responded:
//!
//! | transport | no response, ack present | no response, no ack |
//! |-----------|--------------------------|---------------------|
//! | HTTP      | warn + `{"success":true}` (200) | n/a          |
//! | event     | `{"success":true}`       | nothing (fire-and-forget) |
//!
//! On the event transport there are no response headers, so an explicitly set
//! status is folded into the payload as `{"statusCode": .., "data": ..}`.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::ack::Ack;
use crate::error::StructuredError;
use crate::pattern::ParamMap;
use crate::transport::{Method, Transport};

/// Header map with lower-cased names.
pub type HeaderMap = BTreeMap<String, String>;

/// Decoded query string.
pub type QueryMap = BTreeMap<String, String>;

/// The payload sent when a handler completes without responding.
pub fn default_success() -> Value {
    json!({ "success": true })
}

/// The request data shared by both transports.
#[derive(Debug, Clone)]
pub struct RequestParts {
    /// Request method. Socket events use the envelope method or GET.
    pub method: Method,
    /// Full request path or event name.
    pub full_path: String,
    /// Decoded body.
    pub body: Value,
    /// Query parameters.
    pub query: QueryMap,
    /// Path parameters captured by the matched pattern.
    pub params: ParamMap,
    /// Request headers.
    pub headers: HeaderMap,
}

impl RequestParts {
    /// Creates parts for `method` on `full_path` with everything else empty.
    pub fn new(method: Method, full_path: impl Into<String>) -> Self {
        Self {
            method,
            full_path: full_path.into(),
            body: Value::Null,
            query: QueryMap::new(),
            params: ParamMap::new(),
            headers: HeaderMap::new(),
        }
    }

    /// Sets the body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    /// Sets the query parameters.
    pub fn with_query(mut self, query: QueryMap) -> Self {
        self.query = query;
        self
    }

    /// Sets the path parameters.
    pub fn with_params(mut self, params: ParamMap) -> Self {
        self.params = params;
        self
    }

    /// Sets the headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Extra surface exposed only by the request/response transport.
#[derive(Debug, Default)]
pub struct HttpSurface {
    raw_body: Bytes,
    remote_addr: Option<SocketAddr>,
    response_headers: Mutex<Vec<(String, String)>>,
}

impl HttpSurface {
    /// Creates a surface over the raw request body.
    pub fn new(raw_body: Bytes, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            raw_body,
            remote_addr,
            response_headers: Mutex::new(Vec::new()),
        }
    }

    /// The unparsed request body.
    pub fn raw_body(&self) -> &Bytes {
        &self.raw_body
    }

    /// The peer address, when known.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Adds a response header. Must be called before responding.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        self.response_headers
            .lock()
            .push((name.into(), value.into()));
    }

    fn take_headers(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.response_headers.lock())
    }
}

/// Body of an HTTP reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Json(Value),
    Text(String),
    Html(String),
    /// A file to stream; read by the transport.
    File(PathBuf),
}

/// A finished HTTP reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Status code.
    pub status: u16,
    /// Response headers set through [`HttpSurface::set_header`].
    pub headers: Vec<(String, String)>,
    /// Reply body.
    pub body: ReplyBody,
}

impl Reply {
    /// A JSON reply with no extra headers.
    pub fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: ReplyBody::Json(value),
        }
    }

    /// A JSON reply carrying a structured error.
    pub fn error(err: &StructuredError) -> Self {
        Self::json(err.status_code, err.to_value())
    }
}

enum Sink {
    Http {
        surface: HttpSurface,
        reply: Mutex<Option<Reply>>,
    },
    Event {
        ack: Option<Ack>,
    },
}

struct ResponseState {
    status: u16,
    status_set: bool,
    responded: bool,
}

struct ContextInner {
    parts: RequestParts,
    injected: Vec<Value>,
    locals: Mutex<Map<String, Value>>,
    state: Mutex<ResponseState>,
    sink: Sink,
}

/// The context handed to every handler and middleware.
///
/// Cheap to clone; clones share locals and response state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    fn build(parts: RequestParts, injected: Vec<Value>, sink: Sink) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                parts,
                injected,
                locals: Mutex::new(Map::new()),
                state: Mutex::new(ResponseState {
                    status: 200,
                    status_set: false,
                    responded: false,
                }),
                sink,
            }),
        }
    }

    /// Creates a context for an HTTP request.
    pub fn http(parts: RequestParts, surface: HttpSurface) -> Self {
        Self::build(
            parts,
            Vec::new(),
            Sink::Http {
                surface,
                reply: Mutex::new(None),
            },
        )
    }

    /// Creates a context for a socket event.
    ///
    /// `injected` holds the values produced by builder middleware for the
    /// channel, outermost ancestor first.
    pub fn event(parts: RequestParts, injected: Vec<Value>, ack: Option<Ack>) -> Self {
        Self::build(parts, injected, Sink::Event { ack })
    }

    /// Derives an event context for the same caller with new request parts.
    ///
    /// The derived context shares the acknowledgment and injected values but
    /// starts with fresh locals and response state. Returns `None` for HTTP
    /// contexts.
    pub fn derive(&self, parts: RequestParts) -> Option<Self> {
        match &self.inner.sink {
            Sink::Event { ack } => Some(Self::event(
                parts,
                self.inner.injected.clone(),
                ack.clone(),
            )),
            Sink::Http { .. } => None,
        }
    }

    /// The transport this call arrived over.
    pub fn transport(&self) -> Transport {
        match self.inner.sink {
            Sink::Http { .. } => Transport::RequestResponse,
            Sink::Event { .. } => Transport::Event,
        }
    }

    /// The HTTP-only surface, if this is an HTTP call.
    pub fn http_surface(&self) -> Option<&HttpSurface> {
        match &self.inner.sink {
            Sink::Http { surface, .. } => Some(surface),
            Sink::Event { .. } => None,
        }
    }

    pub fn method(&self) -> Method {
        self.inner.parts.method
    }

    pub fn full_path(&self) -> &str {
        &self.inner.parts.full_path
    }

    pub fn body(&self) -> &Value {
        &self.inner.parts.body
    }

    pub fn query(&self) -> &QueryMap {
        &self.inner.parts.query
    }

    pub fn params(&self) -> &ParamMap {
        &self.inner.parts.params
    }

    /// A single path parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.inner.parts.params.get(name).map(String::as_str)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.parts.headers
    }

    /// Values injected by builder middleware, outermost ancestor first.
    pub fn injected(&self) -> &[Value] {
        &self.inner.injected
    }

    /// Reads a per-invocation local.
    pub fn local(&self, key: &str) -> Option<Value> {
        self.inner.locals.lock().get(key).cloned()
    }

    /// Stores a per-invocation local, visible to later middleware and the handler.
    pub fn set_local(&self, key: impl Into<String>, value: Value) {
        self.inner.locals.lock().insert(key.into(), value);
    }

    /// A snapshot of all locals.
    pub fn locals(&self) -> Map<String, Value> {
        self.inner.locals.lock().clone()
    }

    /// Sets the status used by the next response.
    pub fn set_status(&self, code: u16) -> &Self {
        let mut state = self.inner.state.lock();
        state.status = code;
        state.status_set = true;
        self
    }

    /// The status that will be (or was) used.
    pub fn status(&self) -> u16 {
        self.inner.state.lock().status
    }

    /// Whether any respond method has been called.
    pub fn has_responded(&self) -> bool {
        self.inner.state.lock().responded
    }

    /// Whether an event caller supplied an acknowledgment callback.
    pub fn has_ack(&self) -> bool {
        matches!(&self.inner.sink, Sink::Event { ack: Some(_) })
    }

    /// Responds with JSON.
    pub fn json(&self, value: Value) -> bool {
        self.respond(ReplyBody::Json(value))
    }

    /// Responds with plain text.
    pub fn text(&self, text: impl Into<String>) -> bool {
        self.respond(ReplyBody::Text(text.into()))
    }

    /// Responds with HTML.
    pub fn html(&self, html: impl Into<String>) -> bool {
        self.respond(ReplyBody::Html(html.into()))
    }

    /// Responds with a file.
    pub fn file(&self, path: impl Into<PathBuf>) -> bool {
        self.respond(ReplyBody::File(path.into()))
    }

    fn mark_responded(&self) -> Option<(u16, bool)> {
        let mut state = self.inner.state.lock();
        if state.responded {
            return None;
        }
        state.responded = true;
        Some((state.status, state.status_set))
    }

    fn respond(&self, body: ReplyBody) -> bool {
        let Some((status, status_set)) = self.mark_responded() else {
            warn!(path = %self.full_path(), "Ignoring second response for the same call");
            return false;
        };

        match &self.inner.sink {
            Sink::Http { surface, reply } => {
                *reply.lock() = Some(Reply {
                    status,
                    headers: surface.take_headers(),
                    body,
                });
                true
            }
            Sink::Event { ack } => {
                let Some(ack) = ack else {
                    return false;
                };
                let payload = match body {
                    ReplyBody::Json(v) => v,
                    ReplyBody::Text(s) | ReplyBody::Html(s) => Value::String(s),
                    ReplyBody::File(path) => json!({ "file": path.to_string_lossy() }),
                };
                let payload = if status_set {
                    json!({ "statusCode": status, "data": payload })
                } else {
                    payload
                };
                ack.send(payload)
            }
        }
    }

    /// Delivers a structured error through the transport's error path.
    ///
    /// Returns `false` if nothing could be delivered: the call already
    /// responded, or it is an event without an ack.
    pub fn fail(&self, err: &StructuredError) -> bool {
        if self.mark_responded().is_none() {
            warn!(
                path = %self.full_path(),
                status = err.status_code,
                "Error raised after a response was already sent"
            );
            return false;
        }

        match &self.inner.sink {
            Sink::Http { surface, reply } => {
                let mut r = Reply::error(err);
                r.headers = surface.take_headers();
                *reply.lock() = Some(r);
                true
            }
            Sink::Event { ack } => ack.as_ref().is_some_and(|ack| ack.send(err.to_value())),
        }
    }

    /// Sends the generic success payload if the handler never responded.
    pub fn finish(&self) {
        if self.has_responded() {
            return;
        }
        match &self.inner.sink {
            Sink::Http { .. } => {
                warn!(
                    method = %self.method(),
                    path = %self.full_path(),
                    "Handler completed without responding, sending default success"
                );
                self.json(default_success());
            }
            Sink::Event { ack: Some(_) } => {
                debug!(event = %self.full_path(), "Handler did not respond, acknowledging with default success");
                self.json(default_success());
            }
            Sink::Event { ack: None } => {}
        }
    }

    /// Takes the HTTP reply, if one was produced.
    pub fn take_reply(&self) -> Option<Reply> {
        match &self.inner.sink {
            Sink::Http { reply, .. } => reply.lock().take(),
            Sink::Event { .. } => None,
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("transport", &self.transport())
            .field("method", &self.method())
            .field("full_path", &self.full_path())
            .field("responded", &self.has_responded())
            .finish_non_exhaustive()
    }
}
