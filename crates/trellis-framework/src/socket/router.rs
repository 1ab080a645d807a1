//! Event-name pattern router.
//!
//! [`SocketRouter`] works without any registry: register patterns, then
//! dispatch raw event names.
//!
//! ```rust,ignore
//! let mut router = SocketRouter::new();
//! router.on("rooms/:room/messages", HandlerTree::leaf(post_message))?;
//! router.dispatch("/rooms/42/messages/", body, Some(ack)).await;
//! ```
//!
//! Exact patterns resolve through a map. Dynamic patterns are tried in
//! registration order and the first registered match wins, even when a later
//! pattern is more specific.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error};
use trellis_core::pattern::{self, CompiledPattern};
use trellis_core::{Ack, HandlerResult, ParamMap, PatternError, StructuredError, guarded};

/// What a leaf handler receives.
#[derive(Debug, Clone)]
pub struct SocketEvent {
    pub body: Value,
    pub ack: Option<Ack>,
    /// The normalized event name.
    pub event: String,
    pub params: ParamMap,
}

/// A leaf handler.
pub type SocketHandler = Arc<dyn Fn(SocketEvent) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A handler, or an arbitrarily nested list of them.
///
/// Leaves run left to right, depth first; the first failing leaf stops the
/// rest.
#[derive(Clone)]
pub enum HandlerTree {
    Leaf(SocketHandler),
    List(Vec<HandlerTree>),
}

impl HandlerTree {
    pub fn leaf<F, Fut>(f: F) -> Self
    where
        F: Fn(SocketEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self::Leaf(Arc::new(
            move |event: SocketEvent| -> BoxFuture<'static, HandlerResult> { Box::pin(f(event)) },
        ))
    }

    pub fn list(items: impl IntoIterator<Item = HandlerTree>) -> Self {
        Self::List(items.into_iter().collect())
    }

    /// Flattens the tree into its leaves in execution order.
    ///
    /// Uses an explicit stack, so nesting depth is bounded only by memory.
    pub fn flatten(&self) -> Vec<SocketHandler> {
        let mut leaves = Vec::new();
        let mut stack: Vec<&HandlerTree> = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Leaf(handler) => leaves.push(Arc::clone(handler)),
                Self::List(items) => stack.extend(items.iter().rev()),
            }
        }
        leaves
    }
}

impl std::fmt::Debug for HandlerTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leaf(_) => f.write_str("Leaf"),
            Self::List(items) => f.debug_list().entries(items).finish(),
        }
    }
}

/// An exact map plus an ordered list of dynamic patterns.
pub(crate) struct PatternTable<T> {
    exact: HashMap<String, T>,
    dynamic: Vec<(Arc<CompiledPattern>, T)>,
}

impl<T> Default for PatternTable<T> {
    fn default() -> Self {
        Self {
            exact: HashMap::new(),
            dynamic: Vec::new(),
        }
    }
}

impl<T> PatternTable<T> {
    /// Inserts `value` under the compiled pattern. An earlier entry for the
    /// same exact pattern is kept.
    pub fn insert(&mut self, pattern: Arc<CompiledPattern>, value: T) {
        if pattern.is_dynamic() {
            self.dynamic.push((pattern, value));
        } else {
            self.exact
                .entry(pattern.normalized().to_string())
                .or_insert(value);
        }
    }

    /// Looks up an already normalized name.
    pub fn lookup(&self, name: &str) -> Option<(&T, ParamMap)> {
        if let Some(value) = self.exact.get(name) {
            return Some((value, ParamMap::new()));
        }
        self.dynamic
            .iter()
            .find_map(|(pattern, value)| pattern.matches(name).map(|params| (value, params)))
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.dynamic.len()
    }
}

/// Raw event names a router remembers the normalized form of.
pub const NAME_CACHE_LIMIT: usize = 1024;

/// Outcome of [`SocketRouter::dispatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// Every leaf ran.
    Completed,
    /// A leaf failed; the error went to the ack or the log.
    Failed(StructuredError),
    /// Nothing matched the event name.
    NotFound,
}

/// Routes event names to handler leaves.
#[derive(Default)]
pub struct SocketRouter {
    table: PatternTable<Arc<[SocketHandler]>>,
    names: Mutex<HashMap<String, String>>,
}

impl SocketRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `tree` under `pattern`.
    pub fn on(&mut self, pattern: &str, tree: HandlerTree) -> Result<&mut Self, PatternError> {
        let compiled = pattern::compile(pattern)?;
        self.insert(compiled, tree);
        Ok(self)
    }

    pub(crate) fn insert(&mut self, pattern: Arc<CompiledPattern>, tree: HandlerTree) {
        self.table.insert(pattern, tree.flatten().into());
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalizes a raw event name.
    pub fn normalize(&self, raw: &str) -> String {
        if let Some(hit) = self.names.lock().get(raw) {
            return hit.clone();
        }
        pattern::normalize(raw).to_string()
    }

    /// Finds the leaves and captured params for a raw event name.
    ///
    /// Only names that resolve are remembered, up to [`NAME_CACHE_LIMIT`].
    pub fn resolve(&self, raw: &str) -> Option<(Arc<[SocketHandler]>, ParamMap)> {
        self.resolve_as(raw, self.normalize(raw))
    }

    fn resolve_as(&self, raw: &str, name: String) -> Option<(Arc<[SocketHandler]>, ParamMap)> {
        let (leaves, params) = self.table.lookup(&name)?;
        let found = (Arc::clone(leaves), params);

        let mut names = self.names.lock();
        if names.len() < NAME_CACHE_LIMIT && !names.contains_key(raw) {
            names.insert(raw.to_string(), name);
        }
        Some(found)
    }

    /// Dispatches one event.
    ///
    /// A 404 is delivered through `ack` when nothing matches. Leaf failures
    /// are delivered the same way: structured errors verbatim, anything else
    /// wrapped into a 500.
    pub async fn dispatch(&self, raw: &str, body: Value, ack: Option<Ack>) -> Dispatched {
        let event = self.normalize(raw);
        let Some((leaves, params)) = self.resolve_as(raw, event.clone()) else {
            debug!(event = %event, "No handler matched event");
            if let Some(ack) = &ack {
                ack.send(StructuredError::not_found(&event).to_value());
            }
            return Dispatched::NotFound;
        };

        for leaf in leaves.iter() {
            let call = SocketEvent {
                body: body.clone(),
                ack: ack.clone(),
                event: event.clone(),
                params: params.clone(),
            };
            if let Err(err) = guarded(leaf(call)).await {
                let message = err.to_string();
                let structured = err.into_structured();
                match &ack {
                    Some(ack) => {
                        debug!(event = %event, error = %message, "Event handler failed");
                        ack.send(structured.to_value());
                    }
                    None => error!(event = %event, error = %message, "Event handler failed"),
                }
                return Dispatched::Failed(structured);
            }
        }
        Dispatched::Completed
    }
}

impl std::fmt::Debug for SocketRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketRouter")
            .field("routes", &self.table.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recording(log: &Arc<parking_lot::Mutex<Vec<&'static str>>>, name: &'static str) -> HandlerTree {
        let log = Arc::clone(log);
        HandlerTree::leaf(move |_| {
            let log = Arc::clone(&log);
            async move {
                log.lock().push(name);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_slashes_resolve_to_same_handler() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let mut router = SocketRouter::new();
        router
            .on(
                "chat/send",
                HandlerTree::leaf(move |_| {
                    let h = Arc::clone(&h);
                    async move {
                        h.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            )
            .unwrap();

        assert_eq!(router.dispatch("chat/send", Value::Null, None).await, Dispatched::Completed);
        assert_eq!(router.dispatch("/chat/send/", Value::Null, None).await, Dispatched::Completed);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_first_registered_dynamic_wins() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut router = SocketRouter::new();
        router
            .on("rooms/:id/*", recording(&log, "p1"))
            .unwrap()
            .on("rooms/:id/messages", recording(&log, "p2"))
            .unwrap();

        router.dispatch("rooms/1/messages", Value::Null, None).await;
        assert_eq!(*log.lock(), ["p1"]);
    }

    #[tokio::test]
    async fn test_leaf_receives_params() {
        let (ack, rx) = Ack::channel();
        let mut router = SocketRouter::new();
        router
            .on(
                "users/:id/messages/*",
                HandlerTree::leaf(|event: SocketEvent| async move {
                    if let Some(ack) = event.ack {
                        ack.send(json!({ "event": event.event, "params": event.params }));
                    }
                    Ok(())
                }),
            )
            .unwrap();

        router
            .dispatch("users/42/messages/a/b/c", Value::Null, Some(ack))
            .await;
        assert_eq!(
            rx.await.unwrap(),
            json!({
                "event": "users/42/messages/a/b/c",
                "params": { "id": "42", "*": "a/b/c" }
            })
        );
    }

    #[test]
    fn test_deep_nesting_flattens_in_order() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut tree = recording(&log, "inner");
        for _ in 0..100_000 {
            tree = HandlerTree::list([tree]);
        }
        let tree = HandlerTree::list([recording(&log, "first"), tree, recording(&log, "last")]);
        assert_eq!(tree.flatten().len(), 3);
        // Deep trees drop recursively; leak it rather than overflow the test thread.
        std::mem::forget(tree);
    }

    #[tokio::test]
    async fn test_list_runs_left_to_right_and_stops_on_error() {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let failing = HandlerTree::leaf(|_| async {
            Err(StructuredError::new(409, "conflict").into())
        });
        let tree = HandlerTree::list([
            recording(&log, "a"),
            HandlerTree::list([recording(&log, "b"), failing]),
            recording(&log, "c"),
        ]);

        let mut router = SocketRouter::new();
        router.on("x", tree).unwrap();
        let (ack, rx) = Ack::channel();
        let out = router.dispatch("x", Value::Null, Some(ack)).await;

        assert_eq!(*log.lock(), ["a", "b"]);
        assert!(matches!(out, Dispatched::Failed(ref e) if e.status_code == 409));
        assert_eq!(rx.await.unwrap()["statusCode"], json!(409));
    }

    #[tokio::test]
    async fn test_foreign_errors_and_panics_become_500() {
        let mut router = SocketRouter::new();
        router
            .on(
                "thrown",
                HandlerTree::leaf(|_| async { Err(json!({ "weird": true }).into()) }),
            )
            .unwrap()
            .on(
                "panics",
                HandlerTree::leaf(|_| async {
                    if true {
                        panic!("kaboom");
                    }
                    Ok(())
                }),
            )
            .unwrap();

        let (ack, rx) = Ack::channel();
        router.dispatch("thrown", Value::Null, Some(ack)).await;
        let err = rx.await.unwrap();
        assert_eq!(err["statusCode"], json!(500));
        assert_eq!(err["errors"][0]["data"], json!({ "weird": true }));

        let out = router.dispatch("panics", Value::Null, None).await;
        assert!(matches!(out, Dispatched::Failed(ref e) if e.status_code == 500));
    }

    #[tokio::test]
    async fn test_unknown_event_is_not_found() {
        let router = SocketRouter::new();
        let (ack, rx) = Ack::channel();
        assert_eq!(
            router.dispatch("nope", Value::Null, Some(ack)).await,
            Dispatched::NotFound
        );
        assert_eq!(rx.await.unwrap()["statusCode"], json!(404));
    }

    #[tokio::test]
    async fn test_only_resolved_names_are_cached() {
        let mut router = SocketRouter::new();
        router
            .on("ping", HandlerTree::leaf(|_| async { Ok(()) }))
            .unwrap();

        for i in 0..50 {
            router.dispatch(&format!("garbage-{i}"), Value::Null, None).await;
        }
        assert!(router.names.lock().is_empty());

        router.dispatch("/ping/", Value::Null, None).await;
        router.dispatch("/ping/", Value::Null, None).await;
        assert_eq!(router.names.lock().len(), 1);
        assert_eq!(router.normalize("/ping/"), "ping");
    }

    #[tokio::test]
    async fn test_name_cache_is_capped() {
        let mut router = SocketRouter::new();
        router
            .on("users/:id", HandlerTree::leaf(|_| async { Ok(()) }))
            .unwrap();

        for i in 0..NAME_CACHE_LIMIT + 10 {
            router.dispatch(&format!("users/{i}"), Value::Null, None).await;
        }
        assert_eq!(router.names.lock().len(), NAME_CACHE_LIMIT);
    }
}
