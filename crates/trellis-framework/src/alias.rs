//! Path aliases.
//!
//! An alias file clones an already registered subtree under the alias
//! file's own path. `api/v2/members.alias` exporting `Alias::of("/users")`
//! serves every route and channel under `/users` again under
//! `/api/v2/members`.

use tracing::debug;
use trellis_core::pattern::{join, normalize};

use crate::error::{BuildError, BuildResult};
use crate::middleware::Scope;
use crate::registry::{ChannelRegistryBuilder, RouteRegistryBuilder};

/// The export of an alias file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    source: String,
    include_middleware: bool,
}

impl Alias {
    /// Clones everything under `source`, keeping its original middleware.
    pub fn of(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            include_middleware: true,
        }
    }

    /// Whether clones keep their original ancestor middleware.
    ///
    /// When `false`, clones use the middleware in effect at the alias file.
    pub fn include_middleware(mut self, include: bool) -> Self {
        self.include_middleware = include;
        self
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn includes_middleware(&self) -> bool {
        self.include_middleware
    }
}

/// An alias found during traversal, waiting for the registries to fill.
#[derive(Debug)]
pub(crate) struct PendingAlias {
    pub file: String,
    pub destination: String,
    pub alias: Alias,
    pub scope: Scope,
}

/// Rewrites `path` from under `source` to under `destination`.
///
/// Matching is by whole segments: `/users` covers `/users` and `/users/7`
/// but not `/usersettings`.
pub(crate) fn rebase(path: &str, source: &str, destination: &str) -> Option<String> {
    let path = normalize(path);
    let source = normalize(source);
    let rest = if source.is_empty() {
        path
    } else if path == source {
        ""
    } else {
        path.strip_prefix(source)?.strip_prefix('/')?
    };
    Some(join(destination, rest))
}

/// Resolves queued aliases in order.
///
/// Later aliases see the output of earlier ones.
pub(crate) fn resolve(
    queue: Vec<PendingAlias>,
    routes: &mut RouteRegistryBuilder,
    channels: &mut ChannelRegistryBuilder,
) -> BuildResult<()> {
    for pending in queue {
        let ancestors = (!pending.alias.include_middleware).then_some(&pending.scope);
        let source = pending.alias.source();

        let route_clones = routes
            .definitions()
            .iter()
            .filter_map(|def| {
                rebase(def.path(), source, &pending.destination)
                    .map(|path| def.relocate(&path, ancestors))
            })
            .collect::<BuildResult<Vec<_>>>()?;
        let channel_clones = channels
            .definitions()
            .iter()
            .filter_map(|def| {
                rebase(def.path(), source, &pending.destination)
                    .map(|path| def.relocate(&path, ancestors))
            })
            .collect::<BuildResult<Vec<_>>>()?;

        if route_clones.is_empty() && channel_clones.is_empty() {
            return Err(BuildError::UnresolvedAlias {
                file: pending.file,
                prefix: source.to_string(),
            });
        }

        debug!(
            file = %pending.file,
            from = %source,
            to = %pending.destination,
            routes = route_clones.len(),
            channels = channel_clones.len(),
            "Resolved alias"
        );

        for def in route_clones {
            routes.insert(def)?;
        }
        for def in channel_clones {
            channels.insert(def)?;
        }
    }
    Ok(())
}
