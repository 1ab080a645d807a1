use std::collections::BTreeMap;
use std::io;

use super::{DirEntry, Export, ModuleSource};
use crate::error::{BuildError, BuildResult};

#[derive(Debug, Clone)]
enum Node {
    File(Export),
    Dir(Directory),
}

/// An in-memory module tree.
///
/// ```rust,ignore
/// let tree = Directory::new()
///     .file("auth.middleware", Middleware::new().gate(require_login))
///     .dir("users", Directory::new().file(":id.route", Route::new().get(show)));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Directory {
    entries: BTreeMap<String, Node>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module file.
    pub fn file(mut self, name: impl Into<String>, export: impl Into<Export>) -> Self {
        self.entries.insert(name.into(), Node::File(export.into()));
        self
    }

    /// Adds a subdirectory.
    pub fn dir(mut self, name: impl Into<String>, dir: Directory) -> Self {
        self.entries.insert(name.into(), Node::Dir(dir));
        self
    }

    fn find(&self, path: &str) -> Option<&Node> {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = segments.next()?;
        let mut node = self.entries.get(first)?;
        for segment in segments {
            match node {
                Node::Dir(dir) => node = dir.entries.get(segment)?,
                Node::File(_) => return None,
            }
        }
        Some(node)
    }
}

impl ModuleSource for Directory {
    fn read_dir(&self, dir: &str) -> BuildResult<Vec<DirEntry>> {
        let directory = if dir.is_empty() {
            self
        } else {
            match self.find(dir) {
                Some(Node::Dir(d)) => d,
                _ => {
                    return Err(BuildError::UnreadableDirectory {
                        path: dir.to_string(),
                        source: io::Error::new(io::ErrorKind::NotFound, "no such directory"),
                    });
                }
            }
        };

        Ok(directory
            .entries
            .iter()
            .map(|(name, node)| match node {
                Node::File(_) => DirEntry::file(name.clone()),
                Node::Dir(_) => DirEntry::directory(name.clone()),
            })
            .collect())
    }

    fn import(&self, file: &str) -> BuildResult<Export> {
        match self.find(file) {
            Some(Node::File(export)) => Ok(export.clone()),
            Some(Node::Dir(_)) => Err(BuildError::malformed(file, "is a directory")),
            None => Err(BuildError::malformed(file, "no such module")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::EntryKind;
    use crate::route::Route;

    #[test]
    fn test_nested_lookup() {
        let tree = Directory::new().dir(
            "users",
            Directory::new().file(":id.route", Route::new().get(|| async {})),
        );

        let root = tree.read_dir("").unwrap();
        assert_eq!(root, vec![DirEntry::directory("users")]);

        let users = tree.read_dir("users").unwrap();
        assert_eq!(users[0].kind, EntryKind::File);
        assert!(matches!(tree.import("users/:id.route"), Ok(Export::Route(_))));
    }

    #[test]
    fn test_missing_paths() {
        let tree = Directory::new().file("a.route", Route::new());
        assert!(matches!(
            tree.read_dir("nope"),
            Err(BuildError::UnreadableDirectory { .. })
        ));
        assert!(matches!(
            tree.read_dir("a.route"),
            Err(BuildError::UnreadableDirectory { .. })
        ));
        assert!(matches!(
            tree.import("b.route"),
            Err(BuildError::MalformedModule { .. })
        ));
    }
}
