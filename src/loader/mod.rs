//! Loader dispatch.
//!
//! Given a module's content-type tag and raw bytes, a loader either hands
//! final JS source to the transpiler or synthesizes a JS wrapper and
//! re-enters compilation with it. The re-entry is an explicit tagged variant,
//! not hidden recursion.

pub mod css;
pub mod markdown;
pub mod wasm;

use regex::Regex;
use thiserror::Error;

use crate::core::BuildMode;
use crate::module::Loader;

/// Result of dispatching one module through its loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderOutcome {
    /// Source is JS-family; hand it to the transpiler as-is.
    FinalJs { code: String },
    /// Loader synthesized a JS wrapper; compile that instead.
    Reenter { source: String, loader: Loader },
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("unknown loader for `{0}`")]
    UnknownLoader(String),

    #[error("`{0}` is not valid UTF-8")]
    InvalidUtf8(String),

    #[error("css error in `{url}`: {message}")]
    Css { url: String, message: String },

    #[error("plugin `{name}` failed on `{url}`: {message}")]
    Plugin {
        name: String,
        url: String,
        message: String,
    },
}

/// Output of a plugin loader transform.
pub struct PluginOutput {
    pub code: String,
    pub loader: Loader,
}

/// External collaborators register content-types here.
pub trait LoaderPlugin: Send + Sync {
    /// Plugin name, also used as its loader tag.
    fn name(&self) -> &str;

    /// Paths/urls this plugin claims.
    fn test(&self) -> &Regex;

    /// Turn raw bytes into synthesized source for re-entry.
    fn transform(&self, bytes: &[u8], url: &str) -> Result<PluginOutput, String>;
}

/// Registered plugin loaders, consulted before the extension table.
#[derive(Default)]
pub struct LoaderRegistry {
    plugins: Vec<Box<dyn LoaderPlugin>>,
}

impl LoaderRegistry {
    /// Empty registry (tests).
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in plugins (wasm).
    pub fn with_builtin() -> Self {
        let mut registry = Self::default();
        registry.register(Box::new(wasm::WasmPlugin::new()));
        registry
    }

    pub fn register(&mut self, plugin: Box<dyn LoaderPlugin>) {
        self.plugins.push(plugin);
    }

    /// Test patterns for the resolver and the watcher classifier.
    pub fn tests(&self) -> Vec<(Regex, String)> {
        self.plugins
            .iter()
            .map(|p| (p.test().clone(), p.name().to_string()))
            .collect()
    }

    fn find(&self, name: &str) -> Option<&dyn LoaderPlugin> {
        self.plugins
            .iter()
            .map(AsRef::as_ref)
            .find(|p| p.name() == name)
    }
}

/// Dispatch one module's bytes through its loader.
pub fn dispatch(
    id: &str,
    bytes: &[u8],
    loader: &Loader,
    mode: BuildMode,
    registry: &LoaderRegistry,
) -> Result<LoaderOutcome, LoaderError> {
    match loader {
        Loader::Js | Loader::Ts | Loader::Jsx | Loader::Tsx => Ok(LoaderOutcome::FinalJs {
            code: utf8(id, bytes)?,
        }),
        Loader::Css | Loader::Less => {
            let source = utf8(id, bytes)?;
            let processed = css::process(id, &source, loader, mode.minify)?;
            Ok(LoaderOutcome::Reenter {
                source: css::synthesize(id, &processed),
                loader: Loader::Js,
            })
        }
        Loader::Markdown => {
            let source = utf8(id, bytes)?;
            Ok(LoaderOutcome::Reenter {
                source: markdown::synthesize(id, &source),
                loader: Loader::Js,
            })
        }
        Loader::Plugin(name) => {
            let plugin = find_plugin(registry, name, id)?;
            let output = plugin
                .transform(bytes, id)
                .map_err(|message| LoaderError::Plugin {
                    name: name.clone(),
                    url: id.to_string(),
                    message,
                })?;
            Ok(LoaderOutcome::Reenter {
                source: output.code,
                loader: output.loader,
            })
        }
        Loader::Unknown => Err(LoaderError::UnknownLoader(id.to_string())),
    }
}

fn find_plugin<'a>(
    registry: &'a LoaderRegistry,
    name: &str,
    id: &str,
) -> Result<&'a dyn LoaderPlugin, LoaderError> {
    registry
        .find(name)
        .ok_or_else(|| LoaderError::UnknownLoader(id.to_string()))
}

fn utf8(id: &str, bytes: &[u8]) -> Result<String, LoaderError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| LoaderError::InvalidUtf8(id.to_string()))
}

/// Escape a string as a JS double-quoted literal.
pub fn js_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
