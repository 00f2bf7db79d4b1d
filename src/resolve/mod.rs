//! Module identity resolution.
//!
//! Maps an arbitrary import specifier (local path, remote URL, relative
//! import) to a canonical module id and a deterministic cache path. The same
//! specifier always yields the same id, across process restarts.
//!
//! Remote modules are namespaced under `/-/host[_port]/path` so that
//! relative-import resolution between a remote module's own dependencies
//! works with ordinary path math.

mod import_map;

pub use import_map::ImportMap;

use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::hashing::compute_hash;
use crate::loader::LoaderRegistry;
use crate::module::{Loader, loader_for_path};
use crate::utils::path::{clean_virtual_path, join_virtual, virtual_extension};

/// Resolution outcome for one specifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    /// Canonical module id (`/pages/index.js`, `/-/esm.sh/react.js`).
    pub id: String,
    /// Fully-qualified source location (local virtual path or remote URL).
    pub canonical_url: String,
    pub is_remote: bool,
    /// Cache path relative to the modules dir (id without the leading `/`).
    pub cache_subpath: PathBuf,
    pub loader: Loader,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("malformed specifier `{0}`")]
    Malformed(String),

    #[error("invalid remote url `{0}`: {1}")]
    InvalidUrl(String, String),
}

/// Identity context of the importing module, for relative resolution.
#[derive(Debug, Clone, Copy)]
pub struct Referrer<'a> {
    pub id: &'a str,
    pub url: &'a str,
}

/// Deterministic specifier → identity mapping.
pub struct ModuleResolver {
    import_map: ImportMap,
    plugin_tests: Vec<(regex::Regex, String)>,
}

impl ModuleResolver {
    pub fn new(import_map: ImportMap, plugins: &LoaderRegistry) -> Self {
        Self {
            import_map,
            plugin_tests: plugins.tests(),
        }
    }

    /// Resolve a specifier against an optional referrer.
    pub fn resolve(
        &self,
        specifier: &str,
        referrer: Option<Referrer<'_>>,
    ) -> Result<ResolvedModule, ResolveError> {
        if specifier.is_empty() {
            return Err(ResolveError::Malformed(specifier.to_string()));
        }

        let mapped = self.import_map.resolve(specifier);

        if is_remote_specifier(&mapped) {
            return self.resolve_remote(&mapped);
        }

        // Relative (or host-rooted) imports inside a remote module's
        // namespace resolve against the referrer's canonical URL, yielding
        // another remote module.
        if (mapped.starts_with('.') || mapped.starts_with('/'))
            && let Some(referrer) = referrer
            && referrer.id.starts_with("/-/")
        {
            let base = Url::parse(referrer.url)
                .map_err(|e| ResolveError::InvalidUrl(referrer.url.to_string(), e.to_string()))?;
            let joined = base
                .join(&mapped)
                .map_err(|e| ResolveError::InvalidUrl(mapped.clone(), e.to_string()))?;
            return self.resolve_remote(joined.as_str());
        }

        self.resolve_local(&mapped, referrer)
    }

    fn resolve_local(
        &self,
        specifier: &str,
        referrer: Option<Referrer<'_>>,
    ) -> Result<ResolvedModule, ResolveError> {
        let raw = if specifier.starts_with('/') {
            clean_virtual_path(specifier)
        } else if specifier.starts_with('.') {
            let Some(referrer) = referrer else {
                return Err(ResolveError::Malformed(specifier.to_string()));
            };
            join_virtual(referrer.id, specifier)
        } else {
            // Bare specifier with no import-map entry.
            return Err(ResolveError::Malformed(specifier.to_string()));
        };

        let loader = self.loader_for(&raw, &raw);
        let id = normalize_id(&raw);

        Ok(ResolvedModule {
            cache_subpath: PathBuf::from(id.trim_start_matches('/')),
            canonical_url: raw,
            is_remote: false,
            id,
            loader,
        })
    }

    fn resolve_remote(&self, specifier: &str) -> Result<ResolvedModule, ResolveError> {
        let url = Url::parse(specifier)
            .map_err(|e| ResolveError::InvalidUrl(specifier.to_string(), e.to_string()))?;
        let host = url
            .host_str()
            .ok_or_else(|| ResolveError::Malformed(specifier.to_string()))?;

        let mut path = url.path().to_string();
        if path.is_empty() || path == "/" {
            path = "/mod".to_string();
        }

        // Query strings disambiguate otherwise-identical paths
        // (`?dev`, `?target=es2020`).
        if let Some(query) = url.query().filter(|q| !q.is_empty()) {
            let marker = compute_hash(query.as_bytes()).short();
            path = match path.rfind('.') {
                Some(idx) if idx > path.rfind('/').unwrap_or(0) => {
                    format!("{}.q{}{}", &path[..idx], marker, &path[idx..])
                }
                _ => format!("{path}.q{marker}"),
            };
        }

        let namespaced = match url.port() {
            Some(port) => format!("/-/{host}_{port}{path}"),
            None => format!("/-/{host}{path}"),
        };

        let loader = self.loader_for(&namespaced, specifier);
        let id = normalize_id(&namespaced);

        Ok(ResolvedModule {
            cache_subpath: PathBuf::from(id.trim_start_matches('/')),
            canonical_url: specifier.to_string(),
            is_remote: true,
            id,
            loader,
        })
    }

    /// Plugin test patterns run before the extension table.
    fn loader_for(&self, virtual_path: &str, original: &str) -> Loader {
        for (test, name) in &self.plugin_tests {
            if test.is_match(original) || test.is_match(virtual_path) {
                return Loader::Plugin(name.clone());
            }
        }
        loader_for_path(virtual_path)
    }
}

/// Whether a dev-loopback host should always be re-fetched.
pub fn is_loopback_url(url: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h == "localhost" || h == "127.0.0.1"))
        .unwrap_or(false)
}

fn is_remote_specifier(specifier: &str) -> bool {
    specifier.starts_with("http://") || specifier.starts_with("https://")
}

/// Normalize a virtual path into a module id.
///
/// Compiled script ids always end in `.js` regardless of source extension;
/// style/markdown/plugin sources keep their extension until loader-transformed.
pub(crate) fn normalize_id(path: &str) -> String {
    match virtual_extension(path) {
        Some("ts" | "tsx" | "jsx" | "mjs" | "mts") => {
            let idx = path.rfind('.').unwrap_or(path.len());
            format!("{}.js", &path[..idx])
        }
        Some(_) => path.to_string(),
        None => format!("{path}.js"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoaderRegistry;

    fn resolver() -> ModuleResolver {
        ModuleResolver::new(ImportMap::default(), &LoaderRegistry::with_builtin())
    }

    #[test]
    fn test_local_extension_normalization() {
        let r = resolver();
        let resolved = r.resolve("/pages/index.tsx", None).unwrap();
        assert_eq!(resolved.id, "/pages/index.js");
        assert_eq!(resolved.canonical_url, "/pages/index.tsx");
        assert!(!resolved.is_remote);
        assert_eq!(resolved.loader, Loader::Tsx);
    }

    #[test]
    fn test_style_keeps_extension() {
        let r = resolver();
        let resolved = r.resolve("/style/app.css", None).unwrap();
        assert_eq!(resolved.id, "/style/app.css");
        assert_eq!(resolved.loader, Loader::Css);
    }

    #[test]
    fn test_relative_against_referrer() {
        let r = resolver();
        let referrer = Referrer {
            id: "/pages/index.js",
            url: "/pages/index.tsx",
        };
        let resolved = r
            .resolve("../components/logo.tsx", Some(referrer))
            .unwrap();
        assert_eq!(resolved.id, "/components/logo.js");
    }

    #[test]
    fn test_remote_namespacing() {
        let r = resolver();
        let resolved = r.resolve("https://esm.sh/react@18.2.0", None).unwrap();
        assert_eq!(resolved.id, "/-/esm.sh/react@18.2.0.js");
        assert!(resolved.is_remote);
        assert_eq!(resolved.canonical_url, "https://esm.sh/react@18.2.0");
    }

    #[test]
    fn test_remote_with_port_and_query() {
        let r = resolver();
        let a = r.resolve("http://localhost:9000/mod.ts?dev", None).unwrap();
        let b = r.resolve("http://localhost:9000/mod.ts", None).unwrap();
        assert!(a.id.starts_with("/-/localhost_9000/"));
        assert_ne!(a.id, b.id); // query folds into a disambiguator
        assert_eq!(b.id, "/-/localhost_9000/mod.js");
    }

    #[test]
    fn test_remote_determinism() {
        let r = resolver();
        let a = r.resolve("https://esm.sh/react@18.2.0?dev", None).unwrap();
        let b = r.resolve("https://esm.sh/react@18.2.0?dev", None).unwrap();
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn test_remote_relative_dependency() {
        let r = resolver();
        let referrer = Referrer {
            id: "/-/esm.sh/react@18.2.0.js",
            url: "https://esm.sh/react@18.2.0",
        };
        let resolved = r.resolve("./jsx-runtime.js", Some(referrer)).unwrap();
        assert!(resolved.is_remote);
        assert_eq!(resolved.canonical_url, "https://esm.sh/jsx-runtime.js");
        assert_eq!(resolved.id, "/-/esm.sh/jsx-runtime.js");
    }

    #[test]
    fn test_bare_specifier_rejected_without_map() {
        let r = resolver();
        assert!(r.resolve("react", None).is_err());
    }

    #[test]
    fn test_bare_specifier_through_import_map() {
        let map = ImportMap::from_pairs(vec![(
            "react".to_string(),
            "https://esm.sh/react@18.2.0".to_string(),
        )]);
        let r = ModuleResolver::new(map, &LoaderRegistry::with_builtin());
        let resolved = r.resolve("react", None).unwrap();
        assert_eq!(resolved.id, "/-/esm.sh/react@18.2.0.js");
    }

    #[test]
    fn test_unknown_extension_unknown_loader() {
        let r = resolver();
        let resolved = r.resolve("/data/blob.bin", None).unwrap();
        assert_eq!(resolved.loader, Loader::Unknown);
    }

    #[test]
    fn test_wasm_matches_builtin_plugin() {
        let r = resolver();
        let resolved = r.resolve("/lib/add.wasm", None).unwrap();
        assert_eq!(resolved.loader, Loader::Plugin("wasm".to_string()));
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback_url("http://localhost:3000/mod.ts"));
        assert!(is_loopback_url("http://127.0.0.1/mod.ts"));
        assert!(!is_loopback_url("https://esm.sh/react"));
    }
}
