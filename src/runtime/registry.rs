//! Named runtimes, for processes hosting more than one server.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::config::ServerConfig;
use crate::{Error, Result};

use super::ServerRuntime;

#[derive(Default)]
pub struct ServerRegistry {
    servers: RwLock<HashMap<String, Arc<ServerRuntime>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a runtime and register it under its `application_name`.
    pub fn create(&self, config: ServerConfig) -> Result<Arc<ServerRuntime>> {
        let name = config.application_name.clone();
        let runtime = Arc::new(ServerRuntime::new(config)?);
        self.register(name, runtime.clone())?;
        Ok(runtime)
    }

    pub fn register(&self, name: impl Into<String>, runtime: Arc<ServerRuntime>) -> Result<()> {
        let name = name.into();
        let mut servers = self.servers.write();
        if servers.contains_key(&name) {
            return Err(Error::InvalidArgument(format!("server {name} already registered")));
        }
        debug!(server = %name, "server registered");
        servers.insert(name, runtime);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ServerRuntime>> {
        self.servers.read().get(name).cloned()
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<ServerRuntime>> {
        self.servers.write().remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.servers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.read().is_empty()
    }
}

impl std::fmt::Debug for ServerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerRegistry").field("servers", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_lookup_unregister() {
        let registry = ServerRegistry::new();
        let a = registry.create(ServerConfig::default().with_application_name("a")).unwrap();
        registry.create(ServerConfig::default().with_application_name("b")).unwrap();
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(Arc::ptr_eq(&registry.get("a").unwrap(), &a));

        let dup = registry.create(ServerConfig::default().with_application_name("a"));
        assert!(matches!(dup, Err(Error::InvalidArgument(_))));

        assert!(registry.unregister("a").is_some());
        assert!(registry.get("a").is_none());
        assert_eq!(registry.len(), 1);
    }
}
