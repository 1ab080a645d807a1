//! The event-transport registry.

use std::collections::{HashMap, HashSet};

use trellis_core::Transport;

use crate::channel::ChannelDefinition;
use crate::error::{BuildError, BuildResult};
use crate::route::RouteDefinition;

/// Collects channel definitions, rejecting duplicate paths.
#[derive(Default)]
pub(crate) struct ChannelRegistryBuilder {
    definitions: Vec<ChannelDefinition>,
    keys: HashSet<String>,
}

impl ChannelRegistryBuilder {
    pub fn insert(&mut self, def: ChannelDefinition) -> BuildResult<()> {
        if !self.keys.insert(def.pattern().normalized().to_string()) {
            return Err(BuildError::DuplicateChannel {
                path: def.path().to_string(),
            });
        }
        self.definitions.push(def);
        Ok(())
    }

    pub fn definitions(&self) -> &[ChannelDefinition] {
        &self.definitions
    }

    /// Adds one channel per path for every route served over the event
    /// transport, in the order the paths were first registered.
    pub fn mirror(&mut self, routes: &[RouteDefinition]) -> BuildResult<usize> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<RouteDefinition>> = HashMap::new();

        for def in routes
            .iter()
            .filter(|def| def.served_via().contains(Transport::Event))
        {
            let key = def.pattern().normalized().to_string();
            groups
                .entry(key.clone())
                .or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                })
                .push(def.clone());
        }

        let mut mirrored = 0;
        for key in order {
            let Some(group) = groups.remove(&key) else {
                continue;
            };
            if let Some(channel) = ChannelDefinition::mirror(group) {
                self.insert(channel)?;
                mirrored += 1;
            }
        }
        Ok(mirrored)
    }

    pub fn finish(self) -> ChannelRegistry {
        ChannelRegistry {
            definitions: self.definitions,
        }
    }
}

/// Every registered channel in registration order.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    definitions: Vec<ChannelDefinition>,
}

impl ChannelRegistry {
    pub fn definitions(&self) -> &[ChannelDefinition] {
        &self.definitions
    }

    /// The channel registered at exactly `path`.
    pub fn get(&self, path: &str) -> Option<&ChannelDefinition> {
        let normalized = trellis_core::pattern::normalize(path);
        self.definitions
            .iter()
            .find(|def| def.pattern().normalized() == normalized)
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::middleware::Scope;
    use crate::route::Route;

    #[test]
    fn test_mirror_groups_methods_by_path() {
        let mut routes = Vec::new();
        routes.extend(
            Route::new()
                .get(|| async {})
                .post(|| async {})
                .serve_via_socket()
                .into_definitions("/users/:id", &Scope::new())
                .unwrap(),
        );
        routes.extend(
            Route::new()
                .get(|| async {})
                .into_definitions("/http-only", &Scope::new())
                .unwrap(),
        );

        let mut builder = ChannelRegistryBuilder::default();
        assert_eq!(builder.mirror(&routes).unwrap(), 1);
        let registry = builder.finish();
        let channel = registry.get("users/:id").unwrap();
        assert_eq!(channel.mirrored_methods().len(), 2);
        assert!(registry.get("/http-only").is_none());
    }

    #[test]
    fn test_mirror_conflicting_with_declared_channel() {
        let mut builder = ChannelRegistryBuilder::default();
        builder
            .insert(
                Channel::new(|| async {})
                    .into_definition("/ping", &Scope::new())
                    .unwrap(),
            )
            .unwrap();
        let routes = Route::new()
            .get(|| async {})
            .socket_only()
            .into_definitions("/ping", &Scope::new())
            .unwrap();
        assert!(matches!(
            builder.mirror(&routes),
            Err(BuildError::DuplicateChannel { .. })
        ));
    }
}
