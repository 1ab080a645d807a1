//! Documentation sink.
//!
//! Registries describe every route and channel to an optional sink once the
//! build completes. Describing is best-effort: sink errors are logged and
//! never fail the build.

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use trellis_core::{Method, Transport};

/// One route as served over one transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteInfo {
    pub transport: Transport,
    pub path: String,
    pub method: Method,
    pub meta: Option<Value>,
}

/// One channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelInfo {
    pub transport: Transport,
    pub path: String,
    /// Route methods mirrored into this channel, empty for declared channels.
    pub methods: Vec<Method>,
    pub meta: Option<Value>,
}

/// Receives descriptions of the built registries.
pub trait DocumentationSink: Send + Sync {
    fn describe_route(&self, info: &RouteInfo) -> anyhow::Result<()>;

    fn describe_channel(&self, info: &ChannelInfo) -> anyhow::Result<()>;
}

/// A sink that logs each description at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DocumentationSink for LogSink {
    fn describe_route(&self, info: &RouteInfo) -> anyhow::Result<()> {
        debug!(
            transport = %info.transport,
            method = %info.method,
            path = %info.path,
            "Route"
        );
        Ok(())
    }

    fn describe_channel(&self, info: &ChannelInfo) -> anyhow::Result<()> {
        debug!(path = %info.path, mirrored = !info.methods.is_empty(), "Channel");
        Ok(())
    }
}

pub(crate) fn describe_route(sink: &dyn DocumentationSink, info: &RouteInfo) {
    if let Err(e) = sink.describe_route(info) {
        warn!(path = %info.path, method = %info.method, error = %e, "Failed to describe route");
    }
}

pub(crate) fn describe_channel(sink: &dyn DocumentationSink, info: &ChannelInfo) {
    if let Err(e) = sink.describe_channel(info) {
        warn!(path = %info.path, error = %e, "Failed to describe channel");
    }
}
