//! Extension catalog: resolves extension ids to constructors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::builtin;
use super::error::{ExtensionError, ExtensionResult};
use super::extension::Extension;
use super::runtime::HostRuntime;
use super::ExtensionId;

/// Constructor of an extension. Receives the host runtime and the id it was
/// resolved under.
pub type ExtensionFactory =
    Arc<dyn Fn(Arc<HostRuntime>, &str) -> anyhow::Result<Box<dyn Extension>> + Send + Sync>;

/// Table of constructible extensions.
///
/// Workers receive a clone of the host's catalog, so every extension the host
/// can load synchronously can also be loaded on a worker.
#[derive(Clone, Default)]
pub struct ExtensionCatalog {
    factories: BTreeMap<ExtensionId, ExtensionFactory>,
}

impl fmt::Debug for ExtensionCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionCatalog")
            .field("ids", &self.ids())
            .finish()
    }
}

impl ExtensionCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog holding the built-in extensions.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        builtin::register(&mut catalog);
        catalog
    }

    /// Add or replace a constructor.
    pub fn register<F>(&mut self, id: impl Into<ExtensionId>, factory: F)
    where
        F: Fn(Arc<HostRuntime>, &str) -> anyhow::Result<Box<dyn Extension>> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, id: impl Into<ExtensionId>, factory: F) -> Self
    where
        F: Fn(Arc<HostRuntime>, &str) -> anyhow::Result<Box<dyn Extension>> + Send + Sync + 'static,
    {
        self.register(id, factory);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<ExtensionId> {
        self.factories.keys().cloned().collect()
    }

    /// Construct the extension registered under `id`.
    pub fn instantiate(&self, runtime: Arc<HostRuntime>, id: &str) -> ExtensionResult<Box<dyn Extension>> {
        let factory = self
            .factories
            .get(id)
            .ok_or_else(|| ExtensionError::ExtensionNotFound(id.to_string()))?;
        factory(runtime, id).map_err(|e| ExtensionError::construction(id, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::descriptor::ExtensionDescriptor;

    struct Blank;

    impl Extension for Blank {
        fn get_info(&mut self) -> ExtensionDescriptor {
            ExtensionDescriptor::new("blank", "Blank")
        }
    }

    #[test]
    fn test_builtin_catalog() {
        let catalog = ExtensionCatalog::builtin();
        assert!(catalog.contains("coreExample"));
        assert_eq!(catalog.ids(), vec!["coreExample".to_string()]);
    }

    #[test]
    fn test_instantiate() {
        let catalog = ExtensionCatalog::new()
            .with("blank", |_, _| Ok(Box::new(Blank) as Box<dyn Extension>))
            .with("broken", |_, _| anyhow::bail!("missing device"));
        let runtime = Arc::new(HostRuntime::new());

        let mut blank = catalog.instantiate(runtime.clone(), "blank").unwrap();
        assert_eq!(blank.get_info().id, "blank");

        let Err(err) = catalog.instantiate(runtime.clone(), "broken") else {
            panic!("broken factory should fail");
        };
        assert!(matches!(err, ExtensionError::ExtensionConstructionError { ref extension, .. } if extension == "broken"));
        assert!(err.to_string().contains("missing device"));

        let Err(err) = catalog.instantiate(runtime, "nope") else {
            panic!("unknown id should fail");
        };
        assert!(matches!(err, ExtensionError::ExtensionNotFound(_)));
    }
}
