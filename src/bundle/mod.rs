//! Production bundler adapter.
//!
//! Groups modules shared across ≥2 entry points (plus every remote module)
//! into a vendor bundle: a synthetic entry re-exports each into the runtime
//! registry object, an external bundle step runs, and the result goes back
//! through the transpiler and the minifier. Bundle failures are reported with
//! the adapter's raw diagnostic and abort only their own artifact group.

pub mod minify;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::engine::CompilationEngine;
use crate::graph::ModuleStore;
use crate::hashing::compute_hash;
use crate::loader::js_string;
use crate::log;

/// Black-box boundary to the bundle step.
pub trait Bundler: Send + Sync {
    /// Bundle `entry` into `output`. Returns raw diagnostic text on failure.
    fn bundle(&self, entry: &Path, output: &Path) -> Result<(), String>;
}

/// Bundler that shells out to a configured external command.
///
/// `{entry}` and `{output}` placeholders in the command are substituted with
/// the respective paths.
pub struct CommandBundler {
    command: Vec<String>,
}

impl CommandBundler {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

impl Bundler for CommandBundler {
    fn bundle(&self, entry: &Path, output: &Path) -> Result<(), String> {
        if self.command.is_empty() {
            return Err("no bundler command configured".to_string());
        }

        let args: Vec<String> = self
            .command
            .iter()
            .map(|arg| {
                arg.replace("{entry}", &entry.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
            })
            .collect();

        let result = Command::new(&args[0])
            .args(&args[1..])
            .output()
            .map_err(|e| format!("failed to spawn `{}`: {}", args[0], e))?;

        if !result.status.success() {
            let mut diagnostic = String::from_utf8_lossy(&result.stderr).into_owned();
            if diagnostic.trim().is_empty() {
                diagnostic = String::from_utf8_lossy(&result.stdout).into_owned();
            }
            return Err(diagnostic);
        }

        if !output.is_file() {
            return Err("bundle step produced no output file".to_string());
        }

        Ok(())
    }
}

/// Modules shared by ≥2 entry points, plus every remote module.
///
/// Entry modules themselves stay out of the vendor group.
pub fn shared_module_ids(store: &ModuleStore, entries: &[String]) -> Vec<String> {
    let mut counts: FxHashMap<String, usize> = FxHashMap::default();

    for entry in entries {
        let mut seen = FxHashSet::default();
        let mut stack = vec![entry.clone()];
        while let Some(id) = stack.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(module) = store.get(&id) else {
                continue;
            };
            *counts.entry(id).or_insert(0) += 1;
            for dep in module.deps.iter().filter(|d| !d.is_pseudo()) {
                stack.push(dep.url.clone());
            }
        }
    }

    let mut ids: Vec<String> = store
        .ids()
        .into_iter()
        .filter(|id| !entries.contains(id))
        .filter(|id| {
            let Some(module) = store.get(id) else {
                return false;
            };
            module.is_remote || counts.get(id).copied().unwrap_or(0) >= 2
        })
        .collect();
    ids.sort();
    ids
}

/// Synthesize the vendor entry re-exporting shared modules into the runtime
/// registry object.
pub fn synthesize_vendor_entry(store: &ModuleStore, ids: &[String]) -> String {
    let mut imports = String::new();
    let mut registry = String::new();

    for (i, id) in ids.iter().enumerate() {
        let Some(module) = store.get(id) else {
            continue;
        };
        imports.push_str(&format!(
            "import * as $mod{i} from \"{}\";\n",
            module.import_path()
        ));
        registry.push_str(&format!("  {}: $mod{i},\n", js_string(id)));
    }

    format!("{imports}window.__KILN.pack = {{\n{registry}}};\n")
}

/// Outcome of one bundle group.
#[derive(Debug)]
pub struct BundleReport {
    pub name: &'static str,
    pub output: Option<PathBuf>,
    pub error: Option<String>,
}

/// Build the shared vendor bundle into `out_dir`.
///
/// A failure is reported, not retried; independent artifact groups (the page
/// artifacts themselves) still proceed.
pub fn build_vendor_bundle(
    engine: &CompilationEngine,
    bundler: &dyn Bundler,
    out_dir: &Path,
    entries: &[String],
) -> BundleReport {
    let store = engine.store();
    let shared = shared_module_ids(store, entries);
    if shared.is_empty() {
        return BundleReport {
            name: "vendor",
            output: None,
            error: None,
        };
    }

    let work_dir = engine.config().cache_dir().join("bundle");
    let entry_path = work_dir.join("vendor.entry.js");
    let bundled_path = work_dir.join("vendor.bundle.js");

    let prepared = fs::create_dir_all(&work_dir)
        .and_then(|_| fs::write(&entry_path, synthesize_vendor_entry(store, &shared)));
    if let Err(e) = prepared {
        return BundleReport {
            name: "vendor",
            output: None,
            error: Some(e.to_string()),
        };
    }

    if let Err(diagnostic) = bundler.bundle(&entry_path, &bundled_path) {
        log!("error"; "vendor bundle failed:\n{}", diagnostic);
        return BundleReport {
            name: "vendor",
            output: None,
            error: Some(diagnostic),
        };
    }

    let bundled = match fs::read_to_string(&bundled_path) {
        Ok(code) => code,
        Err(e) => {
            return BundleReport {
                name: "vendor",
                output: None,
                error: Some(e.to_string()),
            };
        }
    };

    // Target-level down-compilation pass, then minification.
    let lowered = match engine.transpile_bundle(&bundled) {
        Ok(code) => code,
        Err(e) => {
            return BundleReport {
                name: "vendor",
                output: None,
                error: Some(e.to_string()),
            };
        }
    };
    let minified = minify::minify_js(&lowered).unwrap_or(lowered);

    let hash = compute_hash(minified.as_bytes());
    let output = out_dir.join(format!("vendor.{}.js", hash.short()));
    if let Err(e) = fs::create_dir_all(out_dir).and_then(|_| fs::write(&output, &minified)) {
        return BundleReport {
            name: "vendor",
            output: None,
            error: Some(e.to_string()),
        };
    }

    BundleReport {
        name: "vendor",
        output: Some(output),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::ContentHash;
    use crate::module::{DependencyDescriptor, Loader, Module};

    fn module_with_deps(id: &str, remote: bool, deps: &[&str]) -> Module {
        let mut module = Module::new(id, id, remote, Loader::Js);
        module.deps = deps
            .iter()
            .map(|d| DependencyDescriptor::new(*d, ContentHash::empty()))
            .collect();
        module
    }

    #[test]
    fn shared_by_two_entries_selected() {
        let store = ModuleStore::new();
        store.insert(module_with_deps("/pages/a.js", false, &["/shared.js"]));
        store.insert(module_with_deps("/pages/b.js", false, &["/shared.js"]));
        store.insert(module_with_deps("/shared.js", false, &[]));
        store.insert(module_with_deps("/only-a.js", false, &[]));

        let entries = vec!["/pages/a.js".to_string(), "/pages/b.js".to_string()];
        let shared = shared_module_ids(&store, &entries);
        assert_eq!(shared, vec!["/shared.js".to_string()]);
    }

    #[test]
    fn remote_modules_always_selected() {
        let store = ModuleStore::new();
        store.insert(module_with_deps(
            "/pages/a.js",
            false,
            &["/-/esm.sh/react.js"],
        ));
        store.insert(module_with_deps("/-/esm.sh/react.js", true, &[]));

        let entries = vec!["/pages/a.js".to_string()];
        let shared = shared_module_ids(&store, &entries);
        assert_eq!(shared, vec!["/-/esm.sh/react.js".to_string()]);
    }

    #[test]
    fn entries_never_in_vendor_group() {
        let store = ModuleStore::new();
        store.insert(module_with_deps("/pages/a.js", false, &["/pages/b.js"]));
        store.insert(module_with_deps("/pages/b.js", false, &[]));

        let entries = vec!["/pages/a.js".to_string(), "/pages/b.js".to_string()];
        assert!(shared_module_ids(&store, &entries).is_empty());
    }

    #[test]
    fn vendor_entry_shape() {
        let store = ModuleStore::new();
        let mut react = module_with_deps("/-/esm.sh/react.js", true, &[]);
        react.hash = compute_hash(b"react");
        store.insert(react);

        let source = synthesize_vendor_entry(&store, &["/-/esm.sh/react.js".to_string()]);
        assert!(source.contains("import * as $mod0 from \"/-/esm.sh/react.js\";"));
        assert!(source.contains("window.__KILN.pack"));
        assert!(source.contains("\"/-/esm.sh/react.js\": $mod0,"));
    }

    #[test]
    fn command_bundler_requires_command() {
        let bundler = CommandBundler::new(vec![]);
        assert!(
            bundler
                .bundle(Path::new("/tmp/in.js"), Path::new("/tmp/out.js"))
                .is_err()
        );
    }

    #[test]
    fn command_bundler_reports_diagnostics() {
        let dir = tempfile::TempDir::new().unwrap();
        let entry = dir.path().join("entry.js");
        let output = dir.path().join("out.js");
        std::fs::write(&entry, "export {};").unwrap();

        // `false` exits nonzero with no output: diagnostic surfaces, no retry.
        let bundler = CommandBundler::new(vec!["false".to_string()]);
        assert!(bundler.bundle(&entry, &output).is_err());
    }

    #[test]
    fn command_bundler_success_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let entry = dir.path().join("entry.js");
        let output = dir.path().join("out.js");
        std::fs::write(&entry, "export {};").unwrap();

        let bundler = CommandBundler::new(vec![
            "cp".to_string(),
            "{entry}".to_string(),
            "{output}".to_string(),
        ]);
        bundler.bundle(&entry, &output).unwrap();
        assert!(output.is_file());
    }
}
