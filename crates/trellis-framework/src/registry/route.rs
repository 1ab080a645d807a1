//! The request/response registry.

use std::collections::{HashMap, HashSet};

use percent_encoding::percent_decode_str;
use tracing::{Instrument, debug, debug_span};
use trellis_core::{
    Context, HttpSurface, Method, ParamMap, Reply, RequestParts, StructuredError, Transport,
    default_success,
};

use crate::error::{BuildError, BuildResult};
use crate::route::{Listener, RouteDefinition};

/// Collects route definitions, rejecting duplicate (path, method) pairs.
#[derive(Default)]
pub(crate) struct RouteRegistryBuilder {
    definitions: Vec<RouteDefinition>,
    keys: HashSet<(String, Method)>,
}

impl RouteRegistryBuilder {
    pub fn insert(&mut self, def: RouteDefinition) -> BuildResult<()> {
        let key = (def.pattern().normalized().to_string(), def.method());
        if !self.keys.insert(key) {
            return Err(BuildError::DuplicateRoute {
                method: def.method(),
                path: def.path().to_string(),
            });
        }
        self.definitions.push(def);
        Ok(())
    }

    pub fn definitions(&self) -> &[RouteDefinition] {
        &self.definitions
    }

    pub fn finish(self) -> RouteTable {
        RouteTable::new(self.definitions)
    }
}

#[derive(Default)]
struct MethodTable {
    exact: HashMap<String, usize>,
    dynamic: Vec<usize>,
}

/// A successful lookup.
pub struct RouteMatch<'a> {
    pub definition: &'a RouteDefinition,
    pub params: ParamMap,
    listener: &'a Listener,
}

impl RouteMatch<'_> {
    pub fn listener(&self) -> &Listener {
        self.listener
    }
}

/// Every registered route, with per-method lookup tables for HTTP.
///
/// Each method has an exact map and an ordered list of dynamic patterns;
/// `ALL` routes are consulted after the method's own table.
pub struct RouteTable {
    definitions: Vec<RouteDefinition>,
    listeners: Vec<Listener>,
    tables: HashMap<Method, MethodTable>,
}

impl RouteTable {
    fn new(definitions: Vec<RouteDefinition>) -> Self {
        let listeners = definitions.iter().map(RouteDefinition::listener).collect();
        let mut tables: HashMap<Method, MethodTable> = HashMap::new();

        for (index, def) in definitions.iter().enumerate() {
            if !def.served_via().contains(Transport::RequestResponse) {
                continue;
            }
            let table = tables.entry(def.method()).or_default();
            if def.pattern().is_dynamic() {
                table.dynamic.push(index);
            } else {
                table
                    .exact
                    .insert(def.pattern().normalized().to_string(), index);
            }
        }

        Self {
            definitions,
            listeners,
            tables,
        }
    }

    /// All definitions in registration order, whatever transport serves them.
    pub fn definitions(&self) -> &[RouteDefinition] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn lookup(&self, method: Method, path: &str) -> Option<(usize, ParamMap)> {
        let table = self.tables.get(&method)?;
        let normalized = trellis_core::pattern::normalize(path);
        if let Some(&index) = table.exact.get(normalized) {
            return Some((index, ParamMap::new()));
        }
        table.dynamic.iter().find_map(|&index| {
            self.definitions[index]
                .pattern()
                .matches(normalized)
                .map(|params| (index, params))
        })
    }

    /// Finds the HTTP route for `method` and `path`.
    pub fn resolve(&self, method: Method, path: &str) -> Option<RouteMatch<'_>> {
        let (index, params) = self
            .lookup(method, path)
            .or_else(|| self.lookup(Method::All, path))?;
        Some(RouteMatch {
            definition: &self.definitions[index],
            params,
            listener: &self.listeners[index],
        })
    }

    /// Serves one HTTP request.
    pub async fn handle(&self, parts: RequestParts, surface: HttpSurface) -> Reply {
        let Some(found) = self.resolve(parts.method, &parts.full_path) else {
            debug!(method = %parts.method, path = %parts.full_path, "No route matched");
            return Reply::error(&StructuredError::not_found(&parts.full_path));
        };

        let span = debug_span!(
            "http",
            method = %parts.method,
            path = %parts.full_path,
            route = %found.definition.path()
        );
        let params = found
            .params
            .into_iter()
            .map(|(name, value)| {
                let decoded = percent_decode_str(&value).decode_utf8_lossy().into_owned();
                (name, decoded)
            })
            .collect();
        let ctx = Context::http(parts.with_params(params), surface);
        (found.listener)(ctx.clone()).instrument(span).await;
        ctx.take_reply()
            .unwrap_or_else(|| Reply::json(200, default_success()))
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("definitions", &self.definitions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Scope;
    use crate::route::Route;
    use serde_json::json;
    use trellis_core::{Params, ReplyBody};

    fn table(routes: Vec<(&str, Route)>) -> BuildResult<RouteTable> {
        let mut builder = RouteRegistryBuilder::default();
        for (path, route) in routes {
            for def in route.into_definitions(path, &Scope::new())? {
                builder.insert(def)?;
            }
        }
        Ok(builder.finish())
    }

    #[tokio::test]
    async fn test_dynamic_route_end_to_end() {
        let table = table(vec![(
            "/users/:id",
            Route::new().get(|ctx: Context, params: Params| async move {
                ctx.json(json!({ "id": params.get("id") }));
            }),
        )])
        .unwrap();

        let reply = table
            .handle(
                RequestParts::new(Method::Get, "/users/7"),
                HttpSurface::default(),
            )
            .await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, ReplyBody::Json(json!({ "id": "7" })));
    }

    #[tokio::test]
    async fn test_captured_params_are_decoded() {
        let table = table(vec![(
            "/files/:name",
            Route::new().get(|ctx: Context, params: Params| async move {
                ctx.json(json!({ "name": params.get("name") }));
            }),
        )])
        .unwrap();

        let reply = table
            .handle(
                RequestParts::new(Method::Get, "/files/a%20b%zz"),
                HttpSurface::default(),
            )
            .await;
        assert_eq!(reply.body, ReplyBody::Json(json!({ "name": "a b%zz" })));
    }

    #[tokio::test]
    async fn test_no_match_is_not_found() {
        let table = table(vec![("/a", Route::new().get(|| async {}))]).unwrap();
        let reply = table
            .handle(RequestParts::new(Method::Post, "/a"), HttpSurface::default())
            .await;
        assert_eq!(reply.status, 404);
    }

    #[test]
    fn test_duplicate_is_rejected() {
        let err = table(vec![
            ("/a", Route::new().get(|| async {})),
            ("a/", Route::new().get(|| async {})),
        ])
        .err()
        .unwrap();
        assert!(matches!(err, BuildError::DuplicateRoute { method: Method::Get, .. }));
    }

    #[test]
    fn test_exact_beats_dynamic_and_all_is_fallback() {
        let table = table(vec![
            ("/users/:id", Route::new().get(|| async {})),
            ("/users/me", Route::new().get(|| async {})),
            ("/users/*", Route::new().all(|| async {})),
        ])
        .unwrap();

        let me = table.resolve(Method::Get, "users/me").unwrap();
        assert_eq!(me.definition.path(), "/users/me");

        let other = table.resolve(Method::Delete, "/users/9/x").unwrap();
        assert_eq!(other.definition.method(), Method::All);
        assert_eq!(other.params.get("*").map(String::as_str), Some("9/x"));
    }

    #[test]
    fn test_socket_only_routes_are_not_http_visible() {
        let table = table(vec![("/ws", Route::new().get(|| async {}).socket_only())]).unwrap();
        assert!(table.resolve(Method::Get, "/ws").is_none());
        assert_eq!(table.len(), 1);
    }
}
