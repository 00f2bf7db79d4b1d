//! Dependency graph store for incremental compilation.
//!
//! Holds every known [`Module`] keyed by id, plus a reverse index from each
//! dependency id to the ids of the modules that import it. Constructed at
//! project-open and passed explicitly to every component that needs it; there
//! is no process-wide instance.
//!
//! # Invariants
//! - Forward edges (each module's `deps`) and the reverse index are always
//!   consistent after `insert`/`remove`.
//! - Pseudo-dependencies (inline styles, data hooks) never enter the reverse
//!   index; they are not modules.

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::module::Module;

type IdSet = FxHashSet<String>;

/// Thread-safe module table with reverse-dependency lookups.
#[derive(Debug, Default)]
pub struct ModuleStore {
    modules: RwLock<FxHashMap<String, Module>>,
    /// dependency id → ids of modules importing it
    reverse: RwLock<FxHashMap<String, IdSet>>,
}

impl ModuleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a module, keeping the reverse index consistent.
    pub fn insert(&self, module: Module) {
        let id = module.id.clone();
        let new_deps: Vec<String> = module
            .deps
            .iter()
            .filter(|d| !d.is_pseudo())
            .map(|d| d.url.clone())
            .collect();

        let mut modules = self.modules.write();
        let mut reverse = self.reverse.write();

        if let Some(old) = modules.get(&id) {
            for dep in &old.deps {
                if dep.is_pseudo() {
                    continue;
                }
                if let Some(dependents) = reverse.get_mut(&dep.url) {
                    dependents.remove(&id);
                    if dependents.is_empty() {
                        reverse.remove(&dep.url);
                    }
                }
            }
        }

        for dep in new_deps {
            // Self-edges would make every cascade revisit its own origin.
            if dep != id {
                reverse.entry(dep).or_default().insert(id.clone());
            }
        }

        modules.insert(id, module);
    }

    /// Look up a module by id (cloned snapshot).
    pub fn get(&self, id: &str) -> Option<Module> {
        self.modules.read().get(id).cloned()
    }

    /// Whether a module id is known.
    pub fn contains(&self, id: &str) -> bool {
        self.modules.read().contains_key(id)
    }

    /// Remove a module and clean up its reverse edges.
    pub fn remove(&self, id: &str) -> Option<Module> {
        let mut modules = self.modules.write();
        let mut reverse = self.reverse.write();

        let module = modules.remove(id)?;
        for dep in &module.deps {
            if dep.is_pseudo() {
                continue;
            }
            if let Some(dependents) = reverse.get_mut(&dep.url) {
                dependents.remove(id);
                if dependents.is_empty() {
                    reverse.remove(&dep.url);
                }
            }
        }
        // Anything that imported the removed module keeps its (now dangling)
        // edge; the next compile of those modules repairs it.
        Some(module)
    }

    /// Apply an in-place mutation to a module.
    ///
    /// Intended for cascade rewrites that touch content/hash/dep-hash copies;
    /// structural dep changes must go through `insert`.
    pub fn update_with<F: FnOnce(&mut Module)>(&self, id: &str, f: F) -> bool {
        let mut modules = self.modules.write();
        match modules.get_mut(id) {
            Some(module) => {
                f(module);
                true
            }
            None => false,
        }
    }

    /// Ids of modules that import the given id.
    pub fn dependents_of(&self, id: &str) -> Vec<String> {
        self.reverse
            .read()
            .get(id)
            .map(|set| {
                let mut ids: Vec<String> = set.iter().cloned().collect();
                ids.sort();
                ids
            })
            .unwrap_or_default()
    }

    /// Whether the given id is a recorded dependency of any known module.
    pub fn is_dependency(&self, id: &str) -> bool {
        self.reverse.read().contains_key(id)
    }

    /// All known module ids.
    pub fn ids(&self) -> Vec<String> {
        self.modules.read().keys().cloned().collect()
    }

    /// Number of known modules.
    pub fn len(&self) -> usize {
        self.modules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.read().is_empty()
    }

    /// Drop everything (full rebuild).
    pub fn clear(&self) {
        self.modules.write().clear();
        self.reverse.write().clear();
    }

    /// Transitive style-dependency lookup.
    ///
    /// Returns ids of every style module (css/less) in the dependency closure
    /// of `id`, in discovery order. SSR collaborators consume this to know
    /// which stylesheets a route pulls in.
    pub fn collect_styles(&self, id: &str) -> Vec<String> {
        let modules = self.modules.read();
        let mut seen = FxHashSet::default();
        let mut styles = Vec::new();
        let mut stack = vec![id.to_string()];

        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(module) = modules.get(&current) else {
                continue;
            };
            if module.loader.is_style() {
                styles.push(current);
            }
            for dep in &module.deps {
                if !dep.is_pseudo() {
                    stack.push(dep.url.clone());
                }
            }
        }

        styles
    }
}
