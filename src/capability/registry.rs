// src/capability/registry.rs

//! Registry capability: latest published version of a pack

use crate::error::Result;
use crate::version::PackVersion;
use std::collections::BTreeMap;

pub trait Registry: Send + Sync {
    /// Latest known version of `pack_id`, `None` when the registry has never heard of it
    fn latest_version(&self, pack_id: &str) -> Result<Option<PackVersion>>;
}

/// Fixed table of versions
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    versions: BTreeMap<String, PackVersion>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pack_id: &str, version: PackVersion) -> Self {
        self.versions.insert(pack_id.to_string(), version);
        self
    }
}

impl Registry for StaticRegistry {
    fn latest_version(&self, pack_id: &str) -> Result<Option<PackVersion>> {
        Ok(self.versions.get(pack_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_registry() {
        let registry = StaticRegistry::new().with("demo", "1.2.0".parse().unwrap());
        assert_eq!(
            registry.latest_version("demo").unwrap().unwrap().to_string(),
            "1.2.0"
        );
        assert!(registry.latest_version("other").unwrap().is_none());
    }
}
