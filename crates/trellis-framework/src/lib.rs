//! # Trellis Framework
//!
//! Directory-driven registries for the two Trellis transports.
//!
//! This layer provides:
//! - Module exports: [`Route`], [`Channel`], [`Middleware`] and [`Alias`]
//! - Tree traversal over any [`ModuleSource`] into a [`RouteTable`] and a
//!   [`ChannelRegistry`]
//! - Per-connection mount evaluation and dispatch ([`Session`])
//! - A standalone event-name router ([`SocketRouter`])
//!
//! ```text
//! routes/
//! ├── auth.middleware      ──▶ Layer "/"
//! ├── index.route          ──▶ GET /
//! └── chat/
//!     ├── room.middleware  ──▶ Layer "/chat"
//!     ├── send.channel     ──▶ channel "/chat/send"
//!     └── :id.route        ──▶ GET /chat/:id (and a mirrored channel)
//! ```
//!
//! Transport bindings live in `trellis-transport`; this crate never touches
//! a socket.

pub mod alias;
pub mod channel;
pub mod config;
pub mod docs;
pub mod error;
pub mod middleware;
pub mod module;
pub mod registry;
pub mod route;
pub mod socket;

pub use alias::Alias;
pub use channel::{Channel, ChannelDefinition, Factory};
pub use config::{ModuleKind, RoutingConfig};
pub use docs::{ChannelInfo, DocumentationSink, LogSink, RouteInfo};
pub use error::{BuildError, BuildResult};
pub use middleware::{Flow, GateResult, Layer, Middleware, Rejection, Scope};
pub use module::{DirEntry, Directory, EntryKind, Export, FsSource, ModuleSource};
pub use registry::{ChannelRegistry, Registries, RouteMatch, RouteTable, RouterBuilder};
pub use route::{Listener, Route, RouteDefinition, ServedVia};
pub use socket::{
    AccessEntry, Connection, Dispatched, HandlerTree, Outbound, Session, SocketEvent,
    SocketHandler, SocketRouter,
};
