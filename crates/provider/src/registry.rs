//! Source identifier to provider lookup.

use crate::backend::LocalProvider;
use crate::error::{ErrorKind, Result};
use crate::ProviderHandle;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tanko_config::SourceConfig;

/// All providers known to the application, keyed by source identifier.
#[derive(Clone, Default)]
pub struct Registry {
    providers: HashMap<String, ProviderHandle>,
}
impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build providers for every configured source.
    ///
    /// # Errors
    ///
    /// Fails on the first source that can't be constructed (for example, a
    /// local source whose root isn't absolute).
    pub fn from_config(sources: &BTreeMap<String, SourceConfig>) -> Result<Self> {
        let mut registry = Self::new();
        for (id, source) in sources {
            let provider: ProviderHandle = match source {
                SourceConfig::Local { root } => Arc::new(LocalProvider::new(id, root)?),
            };
            tracing::debug!(source = %id, "Registered provider");
            registry.register(provider);
        }
        Ok(registry)
    }

    /// Register a provider under its own [`id`](crate::ProviderDelegate::id),
    /// returning the provider it replaced, if any.
    pub fn register(&mut self, provider: ProviderHandle) -> Option<ProviderHandle> {
        self.providers.insert(provider.id().to_string(), provider)
    }

    pub fn with(mut self, provider: ProviderHandle) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, source_id: &str) -> Result<ProviderHandle> {
        match self.providers.get(source_id) {
            Some(provider) => Ok(Arc::clone(provider)),
            None => exn::bail!(ErrorKind::UnknownSource(source_id.to_string())),
        }
    }

    /// Registered source identifiers, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<_> = self.providers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_from_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let sources = BTreeMap::from([
            ("shelf".to_string(), SourceConfig::Local { root: temp_dir.path().to_path_buf() }),
            ("attic".to_string(), SourceConfig::Local { root: temp_dir.path().join("attic") }),
        ]);
        let registry = Registry::from_config(&sources).unwrap();
        assert_eq!(registry.ids(), ["attic", "shelf"]);
        assert_eq!(registry.get("shelf").unwrap().id(), "shelf");
    }

    #[test]
    fn test_from_config_rejects_relative_root() {
        let sources = BTreeMap::from([(
            "shelf".to_string(),
            SourceConfig::Local { root: PathBuf::from("relative") },
        )]);
        assert!(Registry::from_config(&sources).is_err());
    }

    #[test]
    fn test_unknown_source() {
        let registry = Registry::new();
        let err = registry.get("nope").err().unwrap();
        assert!(matches!(&*err, ErrorKind::UnknownSource(id) if id == "nope"));
    }

    #[test]
    fn test_register_replaces() {
        let temp_dir = tempfile::tempdir().unwrap();
        let first: ProviderHandle = Arc::new(LocalProvider::new("shelf", temp_dir.path()).unwrap());
        let second: ProviderHandle = Arc::new(LocalProvider::new("shelf", "/srv").unwrap());
        let mut registry = Registry::new().with(first);
        assert!(registry.register(second).is_some());
        assert_eq!(registry.ids(), ["shelf"]);
    }
}
