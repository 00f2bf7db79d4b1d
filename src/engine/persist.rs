//! Module cache persistence.
//!
//! Each compiled module persists as a meta-record + JS artifact pair under
//! the build-cache modules directory, mirroring the source tree:
//!
//! - `<stem>.meta.json` — `{url, sourceHash, hash, deps, importEdges}`
//! - `<stem>.<hash8>.js` — compiled output (local modules carry the hash
//!   suffix; pinned remote modules do not)
//! - `<stem>.<hash8>.js.map` — written only when source maps are configured
//!
//! Writes go through a temp file + rename so a crash never leaves a
//! half-written record behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::KilnConfig;
use crate::hashing::ContentHash;
use crate::module::{DependencyDescriptor, ImportEdge, Module, import_path_for, meta_rel_for};
use crate::resolve::ResolvedModule;

/// Persisted meta-record for one module.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaRecord {
    pub url: String,
    pub source_hash: ContentHash,
    pub hash: ContentHash,
    pub deps: Vec<DependencyDescriptor>,
    #[serde(default)]
    pub import_edges: Vec<ImportEdge>,
}

impl MetaRecord {
    pub fn from_module(module: &Module) -> Self {
        Self {
            url: module.url.clone(),
            source_hash: module.source_hash,
            hash: module.hash,
            deps: module.deps.clone(),
            import_edges: module.import_edges.clone(),
        }
    }
}

/// Persist a module's meta-record, artifact and optional source map.
///
/// `previous_artifact` is removed afterwards when the hash moved, so stale
/// hashed files do not accumulate in the cache.
pub fn persist(
    config: &KilnConfig,
    module: &Module,
    previous_artifact: Option<&Path>,
) -> io::Result<()> {
    let modules_dir = config.modules_dir();
    let meta_path = modules_dir.join(module.meta_rel_path());
    let js_path = modules_dir.join(module.artifact_rel_path());

    if let Some(parent) = js_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let meta = MetaRecord::from_module(module);
    let meta_json = serde_json::to_string_pretty(&meta)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    write_atomic(&meta_path, meta_json.as_bytes())?;
    write_atomic(&js_path, module.js_content.as_bytes())?;

    if config.build.source_maps
        && let Some(map) = &module.source_map
    {
        let map_path = js_path.with_extension("js.map");
        write_atomic(&map_path, map.as_bytes())?;
    }

    if let Some(previous) = previous_artifact
        && previous != js_path
        && previous.starts_with(&modules_dir)
    {
        let _ = fs::remove_file(previous);
        let _ = fs::remove_file(previous.with_extension("js.map"));
    }

    Ok(())
}

/// Restore a module from its on-disk meta-record, if present and intact.
///
/// Returns `None` when no record exists or its JS artifact is missing —
/// callers fall through to a fresh compile.
pub fn restore(config: &KilnConfig, resolved: &ResolvedModule) -> io::Result<Option<Module>> {
    let modules_dir = config.modules_dir();
    let meta_path = modules_dir.join(meta_rel_for(&resolved.id));

    if !meta_path.is_file() {
        return Ok(None);
    }

    let meta_json = fs::read_to_string(&meta_path)?;
    let Ok(meta) = serde_json::from_str::<MetaRecord>(&meta_json) else {
        // Corrupt record: treat as a cache miss, recompile will rewrite it.
        return Ok(None);
    };

    let import_path = import_path_for(&resolved.id, resolved.is_remote, &meta.hash);
    let js_path = modules_dir.join(import_path.trim_start_matches('/'));
    if !js_path.is_file() {
        return Ok(None);
    }

    let js_content = fs::read_to_string(&js_path)?;

    let mut module = Module::new(
        resolved.id.clone(),
        meta.url,
        resolved.is_remote,
        resolved.loader.clone(),
    );
    module.source_hash = meta.source_hash;
    module.hash = meta.hash;
    module.deps = meta.deps;
    module.import_edges = meta.import_edges;
    module.js_file = js_path;
    module.js_content = js_content;

    Ok(Some(module))
}

/// Restore by module id alone (startup scan), deriving identity fields.
pub fn restore_by_id(
    config: &KilnConfig,
    id: &str,
    loader: crate::module::Loader,
) -> io::Result<Option<Module>> {
    let resolved = ResolvedModule {
        id: id.to_string(),
        canonical_url: String::new(), // module url comes from the meta record
        is_remote: id.starts_with("/-/"),
        cache_subpath: PathBuf::from(id.trim_start_matches('/')),
        loader,
    };
    restore(config, &resolved)
}

/// All meta-record paths under the modules cache dir (startup restore scan).
pub fn meta_records(config: &KilnConfig) -> Vec<PathBuf> {
    let modules_dir = config.modules_dir();
    if !modules_dir.is_dir() {
        return Vec::new();
    }
    jwalk::WalkDir::new(&modules_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".meta.json"))
        })
        .collect()
}

/// Module id encoded by a meta-record path (inverse of [`meta_rel_for`]).
pub fn id_for_meta_path(config: &KilnConfig, meta_path: &Path) -> Option<String> {
    let rel = meta_path.strip_prefix(config.modules_dir()).ok()?;
    let rel = rel.to_str()?.replace('\\', "/");
    let stem = rel.strip_suffix(".meta.json")?;
    // Script stems regain their `.js`; style/markdown/plugin ids keep their
    // own extension, which is still present in the stem.
    match crate::utils::path::virtual_extension(stem) {
        Some("css" | "less" | "md" | "markdown" | "wasm") => Some(format!("/{stem}")),
        _ => Some(format!("/{stem}.js")),
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::compute_hash;
    use crate::module::Loader;
    use tempfile::TempDir;

    fn test_config(root: &Path) -> KilnConfig {
        let mut config = KilnConfig::default();
        config.root = root.to_path_buf();
        config
    }

    fn compiled_module(id: &str, url: &str, code: &str) -> Module {
        let mut module = Module::new(id, url, false, Loader::Js);
        module.js_content = code.to_string();
        module.source_hash = compute_hash(b"source");
        module.hash = compute_hash(code.as_bytes());
        module
    }

    fn resolved_for(module: &Module) -> ResolvedModule {
        ResolvedModule {
            id: module.id.clone(),
            canonical_url: module.url.clone(),
            is_remote: module.is_remote,
            cache_subpath: PathBuf::from(module.id.trim_start_matches('/')),
            loader: module.loader.clone(),
        }
    }

    #[test]
    fn test_persist_restore_roundtrip() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let module = compiled_module("/pages/index.js", "/pages/index.tsx", "export default 1;");

        persist(&config, &module, None).unwrap();

        let restored = restore(&config, &resolved_for(&module)).unwrap().unwrap();
        assert_eq!(restored.hash, module.hash);
        assert_eq!(restored.source_hash, module.source_hash);
        assert_eq!(restored.js_content, module.js_content);
        assert_eq!(restored.url, "/pages/index.tsx");
    }

    #[test]
    fn test_restore_missing_artifact_is_cache_miss() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let module = compiled_module("/pages/index.js", "/pages/index.tsx", "export default 1;");

        persist(&config, &module, None).unwrap();
        let artifact = config.modules_dir().join(module.artifact_rel_path());
        fs::remove_file(artifact).unwrap();

        assert!(restore(&config, &resolved_for(&module)).unwrap().is_none());
    }

    #[test]
    fn test_artifact_filename_carries_hash_prefix() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let module = compiled_module("/pages/index.js", "/pages/index.tsx", "export default 1;");

        persist(&config, &module, None).unwrap();

        let expected = config
            .modules_dir()
            .join(format!("pages/index.{}.js", module.hash.short()));
        assert!(expected.is_file());
    }

    #[test]
    fn test_previous_artifact_removed() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());

        let old = compiled_module("/pages/index.js", "/pages/index.tsx", "export default 1;");
        persist(&config, &old, None).unwrap();
        let old_artifact = config.modules_dir().join(old.artifact_rel_path());
        assert!(old_artifact.is_file());

        let new = compiled_module("/pages/index.js", "/pages/index.tsx", "export default 2;");
        persist(&config, &new, Some(&old_artifact)).unwrap();

        assert!(!old_artifact.is_file());
        assert!(config.modules_dir().join(new.artifact_rel_path()).is_file());
    }

    #[test]
    fn test_meta_scan_and_id_decode() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());

        persist(
            &config,
            &compiled_module("/pages/index.js", "/pages/index.tsx", "a"),
            None,
        )
        .unwrap();
        let mut css = compiled_module("/style/app.css", "/style/app.css", "b");
        css.loader = Loader::Css;
        persist(&config, &css, None).unwrap();

        let records = meta_records(&config);
        assert_eq!(records.len(), 2);

        let mut ids: Vec<String> = records
            .iter()
            .filter_map(|p| id_for_meta_path(&config, p))
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["/pages/index.js", "/style/app.css"]);
    }
}
