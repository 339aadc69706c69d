//! Library catalog — which instrumentable libraries are present in this
//! process, at which version, and which hook points they expose.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::hook::HookPoint;

/// A library present in the process.
#[derive(Debug)]
pub struct LibraryHandle {
    name: String,
    version: String,
    hooks: BTreeMap<String, Arc<HookPoint>>,
}

impl LibraryHandle {
    pub fn new<'a>(
        name: impl Into<String>,
        version: impl Into<String>,
        hooks: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            hooks: hooks
                .into_iter()
                .map(|h| (h.to_string(), Arc::new(HookPoint::new(h))))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn hook(&self, name: &str) -> Option<Arc<HookPoint>> {
        self.hooks.get(name).cloned()
    }

    pub fn hook_names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }
}

/// Libraries known to the process, keyed by name.
#[derive(Debug, Default)]
pub struct LibraryCatalog {
    libraries: RwLock<HashMap<String, Arc<LibraryHandle>>>,
}

impl LibraryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a library, replacing any earlier entry with the same name.
    pub fn register(&self, library: LibraryHandle) -> Arc<LibraryHandle> {
        let library = Arc::new(library);
        debug!(library = library.name(), version = library.version(), "Library registered in catalog");
        self.libraries
            .write()
            .insert(library.name().to_string(), Arc::clone(&library));
        library
    }

    pub fn get(&self, name: &str) -> Option<Arc<LibraryHandle>> {
        self.libraries.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.libraries.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.libraries.read().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        let catalog = LibraryCatalog::new();
        assert!(catalog.get("llama_index").is_none());

        let handle = catalog.register(LibraryHandle::new("llama_index", "0.10.3", ["llm", "retriever"]));
        assert_eq!(handle.version(), "0.10.3");
        assert!(handle.hook("llm").is_some());
        assert!(handle.hook("embed_model").is_none());
        assert_eq!(handle.hook_names().collect::<Vec<_>>(), vec!["llm", "retriever"]);
        assert!(catalog.contains("llama_index"));
        assert_eq!(catalog.names(), vec!["llama_index"]);
    }

    #[test]
    fn same_hook_is_shared() {
        let catalog = LibraryCatalog::new();
        catalog.register(LibraryHandle::new("openai", "1.3.0", ["embeddings"]));
        let a = catalog.get("openai").unwrap().hook("embeddings").unwrap();
        let b = catalog.get("openai").unwrap().hook("embeddings").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
