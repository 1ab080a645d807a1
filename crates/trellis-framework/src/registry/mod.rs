//! Registry construction.
//!
//! [`RouterBuilder`] turns a module tree into [`Registries`] in four
//! sequential steps:
//!
//! ```text
//! walk tree ──▶ register routes/channels ──▶ resolve aliases ──▶ mirror socket routes
//! ```
//!
//! Every step fails fast. The result is immutable and shared behind `Arc`
//! by the transports.

mod channel;
mod route;
mod walk;

pub use channel::ChannelRegistry;
pub use route::{RouteMatch, RouteTable};

pub(crate) use channel::ChannelRegistryBuilder;
pub(crate) use route::RouteRegistryBuilder;

use std::sync::Arc;

use tracing::{Level, info, span};
use trellis_core::{HttpSurface, Reply, RequestParts, Transport};

use crate::alias::{self, PendingAlias};
use crate::config::RoutingConfig;
use crate::docs::{self, ChannelInfo, DocumentationSink, RouteInfo};
use crate::error::BuildResult;
use crate::module::ModuleSource;
use crate::socket::{Connection, Session};
use walk::{Found, walk};

/// Builds [`Registries`] from a module tree.
#[derive(Clone, Default)]
pub struct RouterBuilder {
    config: RoutingConfig,
    docs: Option<Arc<dyn DocumentationSink>>,
}

impl RouterBuilder {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config, docs: None }
    }

    /// Sets the sink that receives a description of every route and channel.
    pub fn docs(mut self, sink: Arc<dyn DocumentationSink>) -> Self {
        self.docs = Some(sink);
        self
    }

    pub fn config(&self) -> &RoutingConfig {
        &self.config
    }

    /// Traverses `source` and builds both registries.
    pub fn build(&self, source: &dyn ModuleSource) -> BuildResult<Registries> {
        let span = span!(Level::DEBUG, "build_registries");
        let _enter = span.enter();

        let mut routes = RouteRegistryBuilder::default();
        let mut channels = ChannelRegistryBuilder::default();
        let mut aliases = Vec::new();

        for discovery in walk(source, &self.config)? {
            match discovery.found {
                Found::Route(route) => {
                    for def in route.into_definitions(&discovery.path, &discovery.scope)? {
                        routes.insert(def)?;
                    }
                }
                Found::Channel(channel) => {
                    channels.insert(channel.into_definition(&discovery.path, &discovery.scope)?)?;
                }
                Found::Alias(alias) => aliases.push(PendingAlias {
                    file: discovery.file,
                    destination: discovery.path,
                    alias,
                    scope: discovery.scope,
                }),
            }
        }

        let alias_count = aliases.len();
        alias::resolve(aliases, &mut routes, &mut channels)?;
        let mirrored = channels.mirror(routes.definitions())?;

        let registries = Registries {
            routes: routes.finish(),
            channels: channels.finish(),
        };
        if let Some(sink) = &self.docs {
            registries.describe(sink.as_ref());
        }

        info!(
            routes = registries.routes.len(),
            channels = registries.channels.len(),
            mirrored,
            aliases = alias_count,
            "Registries built"
        );
        Ok(registries)
    }
}

impl std::fmt::Debug for RouterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterBuilder")
            .field("config", &self.config)
            .field("docs", &self.docs.is_some())
            .finish()
    }
}

/// The built route table and channel registry.
#[derive(Debug)]
pub struct Registries {
    routes: RouteTable,
    channels: ChannelRegistry,
}

impl Registries {
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Serves one HTTP request.
    pub async fn handle_http(&self, parts: RequestParts, surface: HttpSurface) -> Reply {
        self.routes.handle(parts, surface).await
    }

    /// Runs mount evaluation for a new connection.
    pub async fn mount(&self, connection: Connection) -> Session {
        Session::mount(&self.channels, connection).await
    }

    fn describe(&self, sink: &dyn DocumentationSink) {
        for def in self.routes.definitions() {
            for transport in def.served_via().transports() {
                docs::describe_route(
                    sink,
                    &RouteInfo {
                        transport,
                        path: def.path().to_string(),
                        method: def.method(),
                        meta: def.meta().cloned(),
                    },
                );
            }
        }
        for def in self.channels.definitions() {
            docs::describe_channel(
                sink,
                &ChannelInfo {
                    transport: Transport::Event,
                    path: def.path().to_string(),
                    methods: def.mirrored_methods().to_vec(),
                    meta: def.meta().cloned(),
                },
            );
        }
    }
}
