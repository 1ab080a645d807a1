//! Module trees.
//!
//! A module tree is anything that can list directories and hand back the
//! export of a file. [`Directory`] builds one in memory; [`FsSource`] lays a
//! table of exports over a real directory.
//!
//! Paths passed to a [`ModuleSource`] are relative to its root, joined with
//! `/`, with `""` naming the root itself.

mod fs;
mod memory;

pub use fs::FsSource;
pub use memory::Directory;

use crate::alias::Alias;
use crate::channel::Channel;
use crate::config::ModuleKind;
use crate::error::BuildResult;
use crate::middleware::Middleware;
use crate::route::Route;

/// What a module file exports.
///
/// Closed: every variant is built through its own constructor, and the
/// builder checks the variant against the file's suffix.
#[derive(Debug, Clone)]
pub enum Export {
    Route(Route),
    Channel(Channel),
    Middleware(Middleware),
    Alias(Alias),
}

impl Export {
    /// The module kind this export satisfies.
    pub fn kind(&self) -> ModuleKind {
        match self {
            Self::Route(_) => ModuleKind::Route,
            Self::Channel(_) => ModuleKind::Channel,
            Self::Middleware(_) => ModuleKind::Middleware,
            Self::Alias(_) => ModuleKind::Alias,
        }
    }
}

impl From<Route> for Export {
    fn from(route: Route) -> Self {
        Self::Route(route)
    }
}

impl From<Channel> for Export {
    fn from(channel: Channel) -> Self {
        Self::Channel(channel)
    }
}

impl From<Middleware> for Export {
    fn from(middleware: Middleware) -> Self {
        Self::Middleware(middleware)
    }
}

impl From<Alias> for Export {
    fn from(alias: Alias) -> Self {
        Self::Alias(alias)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }
}

/// A tree of modules the registry builder can traverse.
pub trait ModuleSource {
    /// Lists the entries of a directory, in any order.
    fn read_dir(&self, dir: &str) -> BuildResult<Vec<DirEntry>>;

    /// Returns the export of a file.
    fn import(&self, file: &str) -> BuildResult<Export>;
}

/// Joins a source-relative directory and an entry name.
pub(crate) fn child_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}
