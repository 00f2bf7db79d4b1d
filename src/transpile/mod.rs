//! Transpiler adapter boundary.
//!
//! The engine never parses JS itself; it talks to a [`Transpiler`] that turns
//! source text into JS and reports, as a side channel, the list of discovered
//! import specifiers (with byte spans) and any inline style fragments.
//!
//! The shipped default is [`EsScanner`]: a structural scanner that leaves
//! surrounding code untouched. Real TS/JSX lowering plugs in behind the same
//! trait.

mod scanner;

pub use scanner::EsScanner;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::module::Loader;

/// Options handed to the transpiler for one module.
#[derive(Debug, Clone)]
pub struct TranspileOptions<'a> {
    /// Module url/id, for diagnostics.
    pub url: &'a str,
    /// Target ECMAScript level (`es2018`, ...).
    pub target: &'a str,
    /// Source flavor.
    pub source_type: Loader,
    /// Development mode (keeps output readable, skips lowering).
    pub dev_mode: bool,
    /// Production bundling pass (second trip through the adapter).
    pub bundle_mode: bool,
}

/// One import specifier discovered during transpilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredImport {
    /// Specifier text exactly as written.
    pub specifier: String,
    /// `import("...")` rather than a static `import`/`export ... from`.
    pub is_dynamic: bool,
    /// Byte offset of the specifier text inside the emitted code.
    pub start: usize,
    /// Byte length of the specifier text.
    pub len: usize,
}

/// One inline style fragment lifted out of a tagged template literal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineStyle {
    /// Style language tag (`css`).
    pub kind: String,
    /// Literal text segments.
    pub quasis: Vec<String>,
    /// Interpolated expression texts, between the quasis.
    pub exprs: Vec<String>,
}

impl InlineStyle {
    /// Whether the fragment is fully static (no interpolations).
    pub fn is_static(&self) -> bool {
        self.exprs.is_empty()
    }

    /// Reassemble the style text, re-inserting interpolations verbatim.
    pub fn to_template_text(&self) -> String {
        let mut out = String::new();
        for (i, quasi) in self.quasis.iter().enumerate() {
            out.push_str(quasi);
            if let Some(expr) = self.exprs.get(i) {
                out.push_str("${");
                out.push_str(expr);
                out.push('}');
            }
        }
        out
    }
}

/// Transpilation result.
#[derive(Debug, Clone, Default)]
pub struct TranspileOutput {
    /// Emitted JS (placeholders mark lifted inline styles).
    pub code: String,
    /// Optional source map JSON.
    pub map: Option<String>,
    /// Discovered static and dynamic import specifiers, in source order.
    pub deps: Vec<DiscoveredImport>,
    /// Inline style fragments keyed by placeholder id.
    pub inline_styles: BTreeMap<String, InlineStyle>,
}

#[derive(Debug, Error)]
pub enum TranspileError {
    #[error("syntax error in {url}: {message}")]
    Syntax { url: String, message: String },
}

/// Black-box boundary to the transpile step.
pub trait Transpiler: Send + Sync {
    fn transpile(
        &self,
        source: &str,
        options: &TranspileOptions<'_>,
    ) -> Result<TranspileOutput, TranspileError>;
}

/// Placeholder literal that marks a lifted inline style inside emitted code.
pub fn style_placeholder(key: &str) -> String {
    format!("\"%%{key}%%\"")
}
