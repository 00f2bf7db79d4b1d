//! Cache invalidation cascade.
//!
//! When a module's compiled hash changes, every module holding a stale dep
//! entry for it gets its embedded hashed import path rewritten, its dep-hash
//! copy refreshed, its own hash recomputed and persisted — and then becomes
//! the changed dependency for the next ring. The visited set guarantees
//! termination under cycles and at-most-once visiting per pass.

use rustc_hash::FxHashSet;

use super::{CompilationEngine, CompileError, MAIN_MODULE_ID, persist};
use crate::debug;
use crate::hashing::{ContentHash, compute_hash};

/// One module updated by a cascade pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CascadeUpdate {
    pub id: String,
    pub hash: ContentHash,
}

impl CompilationEngine {
    /// Propagate a dependency's new hash through all its dependents.
    ///
    /// Returns the modules rewritten by this pass, in visit order. Callers
    /// share `visited` across related invocations to keep the at-most-once
    /// guarantee within one logical change.
    pub fn on_dependency_changed(
        &self,
        dep_id: &str,
        visited: &mut FxHashSet<String>,
    ) -> Result<Vec<CascadeUpdate>, CompileError> {
        let mut updates = Vec::new();
        self.cascade(dep_id, visited, &mut updates)?;
        Ok(updates)
    }

    fn cascade(
        &self,
        dep_id: &str,
        visited: &mut FxHashSet<String>,
        updates: &mut Vec<CascadeUpdate>,
    ) -> Result<(), CompileError> {
        let Some(dep) = self.store().get(dep_id) else {
            return Ok(());
        };
        let new_path = dep.import_path();
        let new_hash = dep.hash;

        for dependent_id in self.store().dependents_of(dep_id) {
            if !visited.insert(dependent_id.clone()) {
                continue;
            }

            // The entry module is generated, not authored: regenerate it from
            // the route table instead of patching text.
            if dependent_id == MAIN_MODULE_ID {
                let module = self.generate_main_module()?;
                updates.push(CascadeUpdate {
                    id: module.id,
                    hash: module.hash,
                });
                continue;
            }

            let Some(mut module) = self.store().get(&dependent_id) else {
                continue;
            };
            let previous_artifact = module.js_file.clone();

            let mut dirty = module.rewrite_import(dep_id, &new_path);
            for entry in module.deps.iter_mut().filter(|d| d.url == dep_id) {
                if entry.hash != new_hash {
                    entry.hash = new_hash;
                    dirty = true;
                }
            }
            if !dirty {
                continue;
            }

            module.hash = compute_hash(module.js_content.as_bytes());
            module.js_file = self
                .config()
                .modules_dir()
                .join(module.artifact_rel_path());

            let previous = (!previous_artifact.as_os_str().is_empty())
                .then_some(previous_artifact.as_path());
            persist::persist(self.config(), &module, previous).map_err(|e| CompileError::Io {
                path: module.js_file.clone(),
                source: e,
            })?;
            self.count_write();
            self.store().insert(module.clone());

            debug!("cascade"; "{} -> {}", dependent_id, module.hash);
            updates.push(CascadeUpdate {
                id: dependent_id.clone(),
                hash: module.hash,
            });

            self.cascade(&dependent_id, visited, updates)?;
        }

        Ok(())
    }
}
