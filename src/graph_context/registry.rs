//! Process-wide map from graph name to its shared context.
//!
//! Lookups load the current map snapshot without locking. Creation and
//! deletion publish a new snapshot under a writer mutex, re-checking the name
//! once the mutex is held.

use std::sync::Arc;

use ahash::AHashMap;
use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::{config::GraphConfig, errors::GraphResult};

use super::GraphContext;

type GraphMap = AHashMap<String, Arc<GraphContext>>;

pub struct GraphRegistry {
    config: GraphConfig,
    graphs: ArcSwap<GraphMap>,
    write: Mutex<()>,
}

impl GraphRegistry {
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            graphs: ArcSwap::from_pointee(GraphMap::new()),
            write: Mutex::new(()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<GraphContext>> {
        self.graphs.load().get(name).cloned()
    }

    /// Shared context for `name`, created with the registry's configuration
    /// when missing.
    pub fn get_or_create(&self, name: &str) -> GraphResult<Arc<GraphContext>> {
        if let Some(gc) = self.get(name) {
            return Ok(gc);
        }

        let _write = self.write.lock();
        let current = self.graphs.load_full();
        if let Some(gc) = current.get(name) {
            return Ok(Arc::clone(gc));
        }

        let gc = GraphContext::new(name, self.config.clone())?;
        let mut next = (*current).clone();
        next.insert(name.to_string(), Arc::clone(&gc));
        self.graphs.store(Arc::new(next));
        tracing::info!(graph = name, "graph registered");
        Ok(gc)
    }

    /// Unregister `name`. Queries still holding the context keep it alive
    /// until they finish.
    pub fn delete(&self, name: &str) -> Option<Arc<GraphContext>> {
        let _write = self.write.lock();
        let current = self.graphs.load_full();
        if !current.contains_key(name) {
            return None;
        }
        let mut next = (*current).clone();
        let removed = next.remove(name);
        self.graphs.store(Arc::new(next));
        tracing::info!(graph = name, "graph unregistered");
        removed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.graphs.load().contains_key(name)
    }

    /// Registered graph names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.graphs.load().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.graphs.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for GraphRegistry {
    fn default() -> Self {
        Self::new(GraphConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn concurrent_creation_yields_one_context() {
        let registry = Arc::new(GraphRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create("social").unwrap())
            })
            .collect();
        let contexts: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(contexts.iter().all(|gc| Arc::ptr_eq(gc, &contexts[0])));
        assert_eq!(registry.names(), vec!["social".to_string()]);
    }

    #[test]
    fn deleted_context_outlives_registration() {
        let registry = GraphRegistry::default();
        let gc = registry.get_or_create("g").unwrap();
        let removed = registry.delete("g").expect("registered");
        assert!(Arc::ptr_eq(&gc, &removed));
        assert!(!registry.contains("g"));
        assert!(registry.delete("g").is_none());
        assert_eq!(gc.name(), "g");
    }
}
