//! Directory convention settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// What a module file declares, judged by its suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Route,
    Middleware,
    Alias,
    Channel,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::Middleware => "middleware",
            Self::Alias => "alias",
            Self::Channel => "channel",
        }
    }
}

/// How the module tree maps onto paths.
///
/// A file named `<stem><suffix>` declares a module of the suffix's kind. A
/// stem equal to `index_name` maps to its directory's own path; any other
/// stem becomes a child segment, so `users/:id.route` serves `/users/:id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Root directory of the module tree.
    pub root: PathBuf,
    pub route_suffix: String,
    pub middleware_suffix: String,
    pub alias_suffix: String,
    pub channel_suffix: String,
    /// Stem that maps to the directory itself.
    pub index_name: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("routes"),
            route_suffix: ".route".to_string(),
            middleware_suffix: ".middleware".to_string(),
            alias_suffix: ".alias".to_string(),
            channel_suffix: ".channel".to_string(),
            index_name: "index".to_string(),
        }
    }
}

impl RoutingConfig {
    /// The suffix configured for each module kind.
    pub fn suffixes(&self) -> [(ModuleKind, &str); 4] {
        [
            (ModuleKind::Route, self.route_suffix.as_str()),
            (ModuleKind::Middleware, self.middleware_suffix.as_str()),
            (ModuleKind::Alias, self.alias_suffix.as_str()),
            (ModuleKind::Channel, self.channel_suffix.as_str()),
        ]
    }

    /// Classifies a file name, returning its kind and stem.
    ///
    /// The longest matching suffix wins. Files matching no suffix (or with
    /// an empty stem) are not modules.
    pub fn classify<'a>(&self, file_name: &'a str) -> Option<(ModuleKind, &'a str)> {
        self.suffixes()
            .into_iter()
            .filter(|(_, suffix)| !suffix.is_empty())
            .filter_map(|(kind, suffix)| {
                file_name
                    .strip_suffix(suffix)
                    .map(|stem| (kind, stem, suffix.len()))
            })
            .filter(|(_, stem, _)| !stem.is_empty())
            .max_by_key(|(_, _, len)| *len)
            .map(|(kind, stem, _)| (kind, stem))
    }

    /// Whether `stem` names the directory's own path.
    pub fn is_index(&self, stem: &str) -> bool {
        stem == self.index_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_default_suffixes() {
        let config = RoutingConfig::default();
        assert_eq!(
            config.classify("index.route"),
            Some((ModuleKind::Route, "index"))
        );
        assert_eq!(
            config.classify(":id.route"),
            Some((ModuleKind::Route, ":id"))
        );
        assert_eq!(
            config.classify("auth.middleware"),
            Some((ModuleKind::Middleware, "auth"))
        );
        assert_eq!(config.classify("README.md"), None);
        assert_eq!(config.classify(".route"), None);
    }

    #[test]
    fn test_classify_prefers_longest_suffix() {
        let config = RoutingConfig {
            route_suffix: ".rs".into(),
            channel_suffix: ".channel.rs".into(),
            ..RoutingConfig::default()
        };
        assert_eq!(
            config.classify("ping.channel.rs"),
            Some((ModuleKind::Channel, "ping"))
        );
        assert_eq!(config.classify("ping.rs"), Some((ModuleKind::Route, "ping")));
    }
}
