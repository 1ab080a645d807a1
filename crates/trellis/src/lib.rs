//! # Trellis
//!
//! Directory-driven routing for HTTP and WebSocket services.
//!
//! A module tree decides where every endpoint lives. Files named with the
//! configured suffixes declare modules; their position in the tree is their
//! path:
//!
//! ```text
//! routes/
//! ├── index.route          → GET /
//! ├── users/
//! │   ├── auth.middleware  → runs before everything under /users
//! │   └── :id.route        → GET|POST /users/:id
//! ├── chat/
//! │   ├── gate.middleware  → before_mounted gate for every chat channel
//! │   └── send.channel     → socket event "chat/send"
//! └── members.alias        → /members re-exported from /users
//! ```
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌────────────┐──▶ HTTP request → Reply
//! │  Source  │──▶│ RouterBuilder │──▶│ Registries │
//! └──────────┘   └───────────────┘   └────────────┘──▶ Connection → Session
//! ```
//!
//! - **Core**: context, extractors, handler erasure, pattern compiler
//! - **Framework**: module sources, middleware scopes, registries, sessions
//! - **Transport**: axum binding for HTTP and WebSocket on one listener
//! - **Runtime**: configuration, logging and hosting
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tree = Directory::new().file(
//!         "ping.channel",
//!         Channel::new(|ctx: Context| async move {
//!             ctx.json(serde_json::json!({ "pong": true }));
//!         }),
//!     );
//!     TrellisRuntime::builder().source(tree).build_or_exit().run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use trellis_core as core;
pub use trellis_framework as framework;
pub use trellis_runtime as runtime;
pub use trellis_transport as transport;

/// Commonly used types for building applications.
///
/// ```rust,ignore
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use trellis_runtime::{RuntimeBuilder, TrellisConfig, TrellisRuntime};

    // Module tree
    pub use trellis_framework::{
        Alias, Channel, Directory, Flow, FsSource, Middleware, ModuleSource, Rejection, Route,
        RouterBuilder,
    };

    // Sockets
    pub use trellis_framework::{Connection, Session};

    // Handlers and extractors
    pub use trellis_core::{
        Body, Context, Headers, Injected, Locals, Params, Query, RawBody, StructuredError,
    };

    // Logging macros
    pub use trellis_runtime::prelude::*;
}
