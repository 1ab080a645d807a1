//! Module tree traversal.

use std::sync::Arc;

use tracing::trace;
use trellis_core::pattern::join;

use crate::alias::Alias;
use crate::channel::Channel;
use crate::config::{ModuleKind, RoutingConfig};
use crate::error::{BuildError, BuildResult};
use crate::middleware::{Layer, Middleware, Scope};
use crate::module::{EntryKind, Export, ModuleSource, child_path};
use crate::route::Route;

pub(crate) enum Found {
    Route(Route),
    Channel(Channel),
    Alias(Alias),
}

/// One module file met during traversal.
pub(crate) struct Discovery {
    /// Source-relative file path.
    pub file: String,
    /// Path the file's export is served at.
    pub path: String,
    /// Ancestor layers in effect at the file's directory.
    pub scope: Scope,
    pub found: Found,
}

/// Walks the whole tree and returns its module files in registration order.
///
/// Within a directory, entries are visited by name: middleware files first
/// (merged into one layer for the directory), then the other module files,
/// then subdirectories depth-first.
pub(crate) fn walk(source: &dyn ModuleSource, config: &RoutingConfig) -> BuildResult<Vec<Discovery>> {
    let mut found = Vec::new();
    walk_dir(source, config, "", "/", &Scope::new(), &mut found)?;
    Ok(found)
}

fn walk_dir(
    source: &dyn ModuleSource,
    config: &RoutingConfig,
    dir: &str,
    url: &str,
    inherited: &Scope,
    out: &mut Vec<Discovery>,
) -> BuildResult<()> {
    let mut entries = source.read_dir(dir)?;
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    let mut middleware_files = Vec::new();
    let mut module_files = Vec::new();
    let mut subdirs = Vec::new();

    for entry in entries {
        match entry.kind {
            EntryKind::Directory => subdirs.push(entry.name),
            EntryKind::File => match config.classify(&entry.name) {
                Some((ModuleKind::Middleware, _)) => middleware_files.push(entry.name),
                Some((kind, stem)) => {
                    let stem = stem.to_string();
                    module_files.push((entry.name, kind, stem));
                }
                None => trace!(dir = %dir, file = %entry.name, "Skipping non-module file"),
            },
        }
    }

    let mut scope = inherited.clone();
    if !middleware_files.is_empty() {
        let mut bundle = Middleware::new();
        for name in middleware_files {
            let file = child_path(dir, &name);
            match source.import(&file)? {
                Export::Middleware(middleware) => bundle = bundle.merge(middleware),
                other => return Err(mismatch(&file, ModuleKind::Middleware, &other)),
            }
        }
        trace!(path = %url, middleware = ?bundle, "Entering middleware layer");
        scope.push(Arc::new(Layer::new(url, bundle)));
    }

    for (name, kind, stem) in module_files {
        let file = child_path(dir, &name);
        let path = if config.is_index(&stem) {
            url.to_string()
        } else {
            join(url, &stem)
        };

        let found = match (kind, source.import(&file)?) {
            (ModuleKind::Route, Export::Route(route)) => Found::Route(route),
            (ModuleKind::Channel, Export::Channel(channel)) => Found::Channel(channel),
            (ModuleKind::Alias, Export::Alias(alias)) => Found::Alias(alias),
            (kind, other) => return Err(mismatch(&file, kind, &other)),
        };
        out.push(Discovery {
            file,
            path,
            scope: scope.clone(),
            found,
        });
    }

    for name in subdirs {
        walk_dir(
            source,
            config,
            &child_path(dir, &name),
            &join(url, &name),
            &scope,
            out,
        )?;
    }
    Ok(())
}

fn mismatch(file: &str, expected: ModuleKind, found: &Export) -> BuildError {
    BuildError::malformed(
        file,
        format!(
            "expected a {} export, found a {}",
            expected.as_str(),
            found.kind().as_str()
        ),
    )
}
