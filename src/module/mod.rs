//! Module data model.
//!
//! A [`Module`] is one compiled unit: the record tying a source location to
//! its compiled JS artifact, its content digests and its dependency edges.
//! Everything the meta-file persists lives here; everything derived (reverse
//! edges, in-flight state) lives in the graph store and engine.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::hashing::ContentHash;
use crate::utils::path::virtual_extension;

/// Prefix of inline-style pseudo-dependency urls.
pub const INLINE_STYLE_PREFIX: &str = "#inline-style-";

/// Prefix of data pseudo-dependency urls.
pub const DATA_DEP_PREFIX: &str = "#data-";

// ============================================================================
// Loader tag
// ============================================================================

/// Content-type tag selected for a module by plugin match or extension.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Loader {
    Js,
    Ts,
    Jsx,
    Tsx,
    Css,
    Less,
    Markdown,
    /// Registered plugin loader, by plugin name (e.g. `wasm`).
    Plugin(String),
    /// No loader matched. Rejected at dispatch with a fatal error.
    #[default]
    Unknown,
}

impl Loader {
    /// Map a file extension to its built-in loader.
    ///
    /// Plugin matching happens before this table is consulted.
    pub fn from_extension(ext: Option<&str>) -> Self {
        match ext {
            Some("js" | "mjs") => Self::Js,
            Some("ts" | "mts") => Self::Ts,
            Some("jsx") => Self::Jsx,
            Some("tsx") => Self::Tsx,
            Some("css") => Self::Css,
            Some("less") => Self::Less,
            Some("md" | "markdown") => Self::Markdown,
            _ => Self::Unknown,
        }
    }

    /// Whether this loader feeds source straight to the transpiler.
    #[inline]
    pub fn is_script(&self) -> bool {
        matches!(self, Self::Js | Self::Ts | Self::Jsx | Self::Tsx)
    }

    /// Whether this loader produces a style module.
    #[inline]
    pub fn is_style(&self) -> bool {
        matches!(self, Self::Css | Self::Less)
    }

    /// Display tag for logs and diagnostics.
    pub fn tag(&self) -> &str {
        match self {
            Self::Js => "js",
            Self::Ts => "ts",
            Self::Jsx => "jsx",
            Self::Tsx => "tsx",
            Self::Css => "css",
            Self::Less => "less",
            Self::Markdown => "markdown",
            Self::Plugin(name) => name,
            Self::Unknown => "",
        }
    }
}

// ============================================================================
// Dependency edges
// ============================================================================

/// A lightweight dependency edge record.
///
/// `hash` is a cached copy of the dependency's compiled hash at last
/// resolution; the dependency module's own `hash` field is the source of
/// truth, and the invalidation cascade exists to repair staleness here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyDescriptor {
    pub url: String,
    pub hash: ContentHash,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_dynamic: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_style: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_data: bool,
}

impl DependencyDescriptor {
    /// A plain static import edge.
    pub fn new(url: impl Into<String>, hash: ContentHash) -> Self {
        Self {
            url: url.into(),
            hash,
            is_dynamic: false,
            is_style: false,
            is_data: false,
        }
    }

    /// Pseudo-dependencies carry an inline hash rather than a real url.
    #[inline]
    pub fn is_pseudo(&self) -> bool {
        self.url.starts_with('#')
    }
}

/// Byte-span of one import specifier inside compiled `js_content`.
///
/// Captured by the transpiler and maintained through every rewrite so
/// import-path updates never re-match text patterns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportEdge {
    /// Resolved module id this edge points at.
    pub url: String,
    /// Byte offset of the specifier text (inside its quotes).
    pub start: usize,
    /// Byte length of the specifier text.
    pub len: usize,
}

// ============================================================================
// Module
// ============================================================================

/// One compiled unit.
#[derive(Debug, Clone, Default)]
pub struct Module {
    /// Canonical string key, stable across recompiles.
    pub id: String,
    /// Original import specifier/source location.
    pub url: String,
    /// Remote modules with pinned specifiers are content-immutable.
    pub is_remote: bool,
    /// Content-type tag selected at resolution.
    pub loader: Loader,
    /// Digest of the original source bytes.
    pub source_hash: ContentHash,
    /// Digest of the compiled JS output bytes.
    pub hash: ContentHash,
    /// Ordered dependency edges.
    pub deps: Vec<DependencyDescriptor>,
    /// Specifier spans inside `js_content`, kept in sync with rewrites.
    pub import_edges: Vec<ImportEdge>,
    /// Absolute path of the persisted JS artifact.
    pub js_file: PathBuf,
    /// Compiled JS output.
    pub js_content: String,
    /// Optional source map contents.
    pub source_map: Option<String>,
    /// Last fatal compilation error, if any.
    pub error: Option<String>,
}

impl Module {
    pub fn new(id: impl Into<String>, url: impl Into<String>, is_remote: bool, loader: Loader) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            is_remote,
            loader,
            ..Default::default()
        }
    }

    /// The import path dependents embed for this module.
    ///
    /// Local modules carry an 8-char hash prefix before the `.js` suffix;
    /// pinned remote modules are content-immutable and keep an unhashed path.
    pub fn import_path(&self) -> String {
        import_path_for(&self.id, self.is_remote, &self.hash)
    }

    /// Artifact path relative to the modules cache dir.
    pub fn artifact_rel_path(&self) -> PathBuf {
        PathBuf::from(self.import_path().trim_start_matches('/'))
    }

    /// Meta-record path relative to the modules cache dir.
    ///
    /// Hash-independent so a module's meta file is findable before its
    /// current hash is known.
    pub fn meta_rel_path(&self) -> PathBuf {
        PathBuf::from(meta_rel_for(&self.id))
    }

    /// Whether this module should be treated as a page (route source).
    pub fn is_page(&self, pages_prefix: &str) -> bool {
        !self.is_remote && self.id.starts_with(pages_prefix)
    }

    /// Rewrite every import edge pointing at `dep_id` to `new_path`.
    ///
    /// Operates on the recorded specifier spans, never on text patterns.
    /// Spans of later edges shift by the accumulated length delta; the edge
    /// list must be (and stays) ordered by start offset.
    pub fn rewrite_import(&mut self, dep_id: &str, new_path: &str) -> bool {
        let mut changed = false;
        let mut delta: isize = 0;
        for edge in &mut self.import_edges {
            let start = edge.start.wrapping_add_signed(delta);
            edge.start = start;
            if edge.url == dep_id {
                let end = start + edge.len;
                self.js_content.replace_range(start..end, new_path);
                delta += new_path.len() as isize - edge.len as isize;
                edge.len = new_path.len();
                changed = true;
            }
        }
        changed
    }
}

/// Compute the embedded import path for a module id + hash.
pub fn import_path_for(id: &str, is_remote: bool, hash: &ContentHash) -> String {
    if is_remote {
        if id.ends_with(".js") {
            id.to_string()
        } else {
            format!("{id}.js")
        }
    } else if let Some(stem) = id.strip_suffix(".js") {
        format!("{stem}.{}.js", hash.short())
    } else {
        format!("{id}.{}.js", hash.short())
    }
}

/// Compute the meta-record relative path for a module id.
pub fn meta_rel_for(id: &str) -> String {
    let trimmed = id.trim_start_matches('/');
    match trimmed.strip_suffix(".js") {
        Some(stem) => format!("{stem}.meta.json"),
        None => format!("{trimmed}.meta.json"),
    }
}

/// Derive the loader tag for a virtual path from its extension.
pub fn loader_for_path(path: &str) -> Loader {
    Loader::from_extension(virtual_extension(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::compute_hash;

    #[test]
    fn test_loader_from_extension() {
        assert_eq!(Loader::from_extension(Some("ts")), Loader::Ts);
        assert_eq!(Loader::from_extension(Some("tsx")), Loader::Tsx);
        assert_eq!(Loader::from_extension(Some("css")), Loader::Css);
        assert_eq!(Loader::from_extension(Some("md")), Loader::Markdown);
        assert_eq!(Loader::from_extension(Some("xyz")), Loader::Unknown);
        assert_eq!(Loader::from_extension(None), Loader::Unknown);
    }

    #[test]
    fn test_import_path_local_hashed() {
        let hash = compute_hash(b"content");
        let path = import_path_for("/pages/index.js", false, &hash);
        assert_eq!(path, format!("/pages/index.{}.js", hash.short()));
    }

    #[test]
    fn test_import_path_style_keeps_extension() {
        let hash = compute_hash(b"h1{}");
        let path = import_path_for("/style/app.css", false, &hash);
        assert_eq!(path, format!("/style/app.css.{}.js", hash.short()));
    }

    #[test]
    fn test_import_path_remote_unhashed() {
        let hash = compute_hash(b"whatever");
        let path = import_path_for("/-/esm.sh/react.js", true, &hash);
        assert_eq!(path, "/-/esm.sh/react.js");
    }

    #[test]
    fn test_meta_rel_path() {
        assert_eq!(meta_rel_for("/pages/index.js"), "pages/index.meta.json");
        assert_eq!(meta_rel_for("/style/app.css"), "style/app.css.meta.json");
        assert_eq!(
            meta_rel_for("/-/esm.sh/react.js"),
            "-/esm.sh/react.meta.json"
        );
    }

    #[test]
    fn test_pseudo_dependency() {
        let dep = DependencyDescriptor {
            url: format!("{INLINE_STYLE_PREFIX}abcd"),
            hash: ContentHash::empty(),
            is_dynamic: false,
            is_style: true,
            is_data: false,
        };
        assert!(dep.is_pseudo());
        assert!(!DependencyDescriptor::new("/a.js", ContentHash::empty()).is_pseudo());
    }

    #[test]
    fn test_rewrite_import_shifts_later_edges() {
        let mut module = Module::new("/pages/index.js", "/pages/index.tsx", false, Loader::Js);
        module.js_content =
            "import a from \"/components/logo.js\";\nimport b from \"/lib/util.js\";\n".to_string();
        let first = module.js_content.find("/components/logo.js").unwrap();
        let second = module.js_content.find("/lib/util.js").unwrap();
        module.import_edges = vec![
            ImportEdge {
                url: "/components/logo.js".to_string(),
                start: first,
                len: "/components/logo.js".len(),
            },
            ImportEdge {
                url: "/lib/util.js".to_string(),
                start: second,
                len: "/lib/util.js".len(),
            },
        ];

        let changed = module.rewrite_import("/components/logo.js", "/components/logo.deadbeef.js");
        assert!(changed);
        assert!(module.js_content.contains("\"/components/logo.deadbeef.js\""));
        assert!(module.js_content.contains("\"/lib/util.js\""));

        // The second edge's span still points at its specifier text.
        let edge = &module.import_edges[1];
        assert_eq!(
            &module.js_content[edge.start..edge.start + edge.len],
            "/lib/util.js"
        );

        // Rewriting an uninvolved dep is a no-op.
        assert!(!module.rewrite_import("/missing.js", "/missing.x.js"));
    }

    #[test]
    fn test_dependency_serde_shape() {
        let dep = DependencyDescriptor::new("/components/logo.js", compute_hash(b"x"));
        let json = serde_json::to_value(&dep).unwrap();
        // Plain static edges serialize without flag noise.
        assert!(json.get("isDynamic").is_none());
        assert!(json.get("url").is_some());
        assert!(json.get("hash").is_some());
    }
}
