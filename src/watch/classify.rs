//! Watcher file classification.
//!
//! Pure functions deciding whether a changed path matters to the module
//! graph. A dropped relevant file is a correctness bug; an extra irrelevant
//! one is only wasted work — so the rules err on the side of inclusion and
//! are tested exhaustively.

use std::path::Path;

use regex::Regex;

use crate::config::KilnConfig;
use crate::graph::ModuleStore;
use crate::utils::path::virtual_extension;

/// Reserved top-level module names that are always relevant.
pub const RESERVED_NAMES: [&str; 3] = ["app", "404", "loading"];

const MODULE_EXTS: [&str; 6] = ["js", "mjs", "jsx", "ts", "mts", "tsx"];
const MARKDOWN_EXTS: [&str; 2] = ["md", "markdown"];

/// Convert an absolute filesystem path into its virtual specifier
/// (`/pages/index.tsx`). Paths outside the source root yield `None`.
pub fn to_specifier(path: &Path, config: &KilnConfig) -> Option<String> {
    let rel = path.strip_prefix(config.src_dir()).ok()?;
    let rel = rel.to_str()?.replace('\\', "/");
    if rel.is_empty() {
        return None;
    }
    Some(format!("/{rel}"))
}

/// Whether a changed path should trigger recompilation.
pub fn is_relevant(
    path: &Path,
    config: &KilnConfig,
    store: &ModuleStore,
    plugin_tests: &[(Regex, String)],
) -> bool {
    // Build output and the internal build cache are always ignored.
    if path.starts_with(config.output_dir()) || path.starts_with(config.cache_dir()) {
        return false;
    }

    let Some(specifier) = to_specifier(path, config) else {
        return false;
    };

    let ext = virtual_extension(&specifier).unwrap_or("");
    let is_module_ext = MODULE_EXTS.contains(&ext);
    let is_markdown_ext = MARKDOWN_EXTS.contains(&ext);

    // Reserved top-level names (app/404/loading) are always relevant.
    if is_module_ext
        && let Some(stem) = specifier
            .strip_prefix('/')
            .and_then(|rest| rest.split_once('.'))
            .map(|(stem, _)| stem)
        && RESERVED_NAMES.contains(&stem)
    {
        return true;
    }

    // Anything under the pages dir with a module or markdown extension.
    let pages_prefix = format!("/{}/", config.build.pages);
    if specifier.starts_with(&pages_prefix) && (is_module_ext || is_markdown_ext) {
        return true;
    }

    // Anything that is a recorded dependency of a currently-known module.
    let id = crate::resolve::normalize_id(&specifier);
    if store.is_dependency(&id) {
        return true;
    }

    // Anything a registered plugin claims.
    if plugin_tests.iter().any(|(test, _)| test.is_match(&specifier)) {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::ContentHash;
    use crate::module::{DependencyDescriptor, Loader, Module};
    use std::path::PathBuf;

    fn test_config() -> KilnConfig {
        let mut config = KilnConfig::default();
        config.root = PathBuf::from("/project");
        config
    }

    fn store_with_dep(dep_id: &str) -> ModuleStore {
        let store = ModuleStore::new();
        let mut module = Module::new("/pages/index.js", "/pages/index.tsx", false, Loader::Js);
        module.deps = vec![DependencyDescriptor::new(dep_id, ContentHash::empty())];
        store.insert(module);
        store
    }

    fn relevant(path: &str) -> bool {
        is_relevant(
            Path::new(path),
            &test_config(),
            &ModuleStore::new(),
            &[],
        )
    }

    #[test]
    fn output_and_cache_always_ignored() {
        assert!(!relevant("/project/dist/pages/index.js"));
        assert!(!relevant("/project/.kiln/modules/pages/index.abcd.js"));
    }

    #[test]
    fn reserved_top_level_names_relevant() {
        assert!(relevant("/project/app.tsx"));
        assert!(relevant("/project/404.jsx"));
        assert!(relevant("/project/loading.ts"));
        // Not at top level → not reserved.
        assert!(!relevant("/project/lib/app.data"));
        // Wrong extension → not a module.
        assert!(!relevant("/project/app.txt"));
    }

    #[test]
    fn pages_with_module_or_markdown_ext_relevant() {
        assert!(relevant("/project/pages/index.tsx"));
        assert!(relevant("/project/pages/docs/intro.md"));
        assert!(relevant("/project/pages/about.jsx"));
        assert!(!relevant("/project/pages/notes.txt"));
    }

    #[test]
    fn recorded_dependency_relevant() {
        let config = test_config();
        let store = store_with_dep("/components/logo.js");

        assert!(is_relevant(
            Path::new("/project/components/logo.tsx"),
            &config,
            &store,
            &[],
        ));
        // Same path, empty store → irrelevant.
        assert!(!relevant("/project/components/logo.tsx"));
    }

    #[test]
    fn plugin_test_relevant() {
        let config = test_config();
        let tests = vec![(Regex::new(r"\.wasm$").unwrap(), "wasm".to_string())];
        assert!(is_relevant(
            Path::new("/project/lib/add.wasm"),
            &config,
            &ModuleStore::new(),
            &tests,
        ));
        assert!(!relevant("/project/lib/add.wasm"));
    }

    #[test]
    fn everything_else_ignored() {
        assert!(!relevant("/project/README.md")); // markdown outside pages
        assert!(!relevant("/project/notes/todo.txt"));
        assert!(!relevant("/outside/pages/index.tsx")); // outside src root
    }

    #[test]
    fn test_to_specifier() {
        let config = test_config();
        assert_eq!(
            to_specifier(Path::new("/project/pages/index.tsx"), &config),
            Some("/pages/index.tsx".to_string())
        );
        assert_eq!(to_specifier(Path::new("/elsewhere/x.ts"), &config), None);
    }
}
