//! Router collaborator boundary.
//!
//! The compilation core does not own routing semantics; it only notifies a
//! [`Router`] when a page-classified module changes identity or disappears,
//! and reads the route table back when regenerating the synthetic entry
//! module. [`RouteTable`] is the in-crate default collaborator.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::hashing::ContentHash;

/// One page module's routing descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteModule {
    /// Module id (`/pages/about.js`).
    pub id: String,
    /// Original source specifier (`/pages/about.tsx`), used by the entry
    /// module's generated imports.
    pub specifier: String,
    /// URL pattern served by this page (`/about`).
    pub pattern: String,
    /// Compiled hash at last update.
    pub hash: ContentHash,
}

/// Route-table collaborator interface.
pub trait Router: Send + Sync {
    fn update(&self, route: RouteModule);
    fn remove_route(&self, module_id: &str);
}

/// Default route table: pattern derivation + ordered storage.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: RwLock<BTreeMap<String, RouteModule>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// All routes, ordered by module id (stable entry generation).
    pub fn all(&self) -> Vec<RouteModule> {
        self.routes.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }

    pub fn get(&self, module_id: &str) -> Option<RouteModule> {
        self.routes.read().get(module_id).cloned()
    }
}

impl Router for RouteTable {
    fn update(&self, route: RouteModule) {
        self.routes.write().insert(route.id.clone(), route);
    }

    fn remove_route(&self, module_id: &str) {
        self.routes.write().remove(module_id);
    }
}

/// Derive the URL pattern for a page module id.
///
/// `/pages/about.js` → `/about`, `/pages/index.js` → `/`,
/// `/pages/docs/intro.md` → `/docs/intro`.
pub fn route_pattern(module_id: &str, pages_dir: &str) -> String {
    let prefix = format!("/{pages_dir}");
    let path = module_id.strip_prefix(&prefix).unwrap_or(module_id);

    let path = path
        .strip_suffix(".js")
        .or_else(|| path.strip_suffix(".md"))
        .or_else(|| path.strip_suffix(".markdown"))
        .unwrap_or(path);

    let path = path.strip_suffix("index").unwrap_or(path);
    let path = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };

    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}
