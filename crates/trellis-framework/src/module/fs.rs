use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{trace, warn};

use super::{DirEntry, Export, ModuleSource};
use crate::error::{BuildError, BuildResult};

/// A module tree backed by a real directory.
///
/// The directory decides which modules exist and where; a link table
/// supplies each file's export. A module file on disk with nothing linked to
/// it fails the build.
///
/// ```rust,ignore
/// let source = FsSource::new("routes")
///     .link("users/:id.route", users::show())
///     .link("chat/auth.middleware", chat::auth());
/// ```
#[derive(Debug)]
pub struct FsSource {
    root: PathBuf,
    table: HashMap<String, Export>,
}

impl FsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            table: HashMap::new(),
        }
    }

    /// A link table with no root yet; the runtime roots it at
    /// `routing.root` from its config.
    pub fn links() -> Self {
        Self::new(PathBuf::new())
    }

    /// Moves the link table onto a different root directory.
    pub fn rooted_at(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Links the file at `path` (relative to the root) to `export`.
    pub fn link(mut self, path: &str, export: impl Into<Export>) -> Self {
        self.table
            .insert(path.trim_matches('/').to_string(), export.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ModuleSource for FsSource {
    fn read_dir(&self, dir: &str) -> BuildResult<Vec<DirEntry>> {
        let full = self.root.join(dir);
        let unreadable = |source| BuildError::UnreadableDirectory {
            path: full.display().to_string(),
            source,
        };

        let mut entries = Vec::new();
        for entry in fs::read_dir(&full).map_err(unreadable)? {
            let entry = entry.map_err(unreadable)?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!(path = %entry.path().display(), "Skipping entry with a non UTF-8 name");
                continue;
            };
            if entry.path().is_dir() {
                entries.push(DirEntry::directory(name));
            } else {
                entries.push(DirEntry::file(name));
            }
        }
        trace!(dir = %full.display(), entries = entries.len(), "Listed module directory");
        Ok(entries)
    }

    fn import(&self, file: &str) -> BuildResult<Export> {
        self.table
            .get(file.trim_matches('/'))
            .cloned()
            .ok_or_else(|| BuildError::malformed(file, "no export is linked to this file"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Route;

    #[test]
    fn test_lists_real_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("users")).unwrap();
        fs::write(dir.path().join("users").join("index.route"), "").unwrap();

        let source = FsSource::new(dir.path()).link("users/index.route", Route::new());
        let root = source.read_dir("").unwrap();
        assert_eq!(root, vec![DirEntry::directory("users")]);
        assert_eq!(
            source.read_dir("users").unwrap(),
            vec![DirEntry::file("index.route")]
        );
        assert!(source.import("users/index.route").is_ok());
    }

    #[test]
    fn test_unlinked_file_is_malformed() {
        let source = FsSource::new("/unused");
        assert!(matches!(
            source.import("ghost.route"),
            Err(BuildError::MalformedModule { .. })
        ));
    }

    #[test]
    fn test_links_can_be_rooted_later() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("health.route"), "").unwrap();

        let source = FsSource::links()
            .link("health.route", Route::new())
            .rooted_at(dir.path());
        assert_eq!(source.root(), dir.path());
        assert_eq!(
            source.read_dir("").unwrap(),
            vec![DirEntry::file("health.route")]
        );
        assert!(source.import("health.route").is_ok());
    }

    #[test]
    fn test_missing_root_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsSource::new(dir.path().join("missing"));
        assert!(matches!(
            source.read_dir(""),
            Err(BuildError::UnreadableDirectory { .. })
        ));
    }
}
