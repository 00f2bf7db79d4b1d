//! Built-in wasm loader plugin.
//!
//! Embeds the wasm bytes as a numeric array literal, instantiates the module
//! synchronously and re-exports its exports.

use std::fmt::Write;

use regex::Regex;

use super::{LoaderPlugin, PluginOutput};
use crate::module::Loader;

pub struct WasmPlugin {
    test: Regex,
}

impl WasmPlugin {
    pub fn new() -> Self {
        Self {
            // The pattern is static and known-good.
            test: Regex::new(r"\.wasm$").unwrap(),
        }
    }
}

impl Default for WasmPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderPlugin for WasmPlugin {
    fn name(&self) -> &str {
        "wasm"
    }

    fn test(&self) -> &Regex {
        &self.test
    }

    fn transform(&self, bytes: &[u8], _url: &str) -> Result<PluginOutput, String> {
        let mut literal = String::with_capacity(bytes.len() * 4);
        for (i, byte) in bytes.iter().enumerate() {
            if i > 0 {
                literal.push(',');
            }
            write!(literal, "{byte}").map_err(|e| e.to_string())?;
        }

        let code = format!(
            "const wasmBytes = new Uint8Array([{literal}]);\n\
             const wasmModule = new WebAssembly.Module(wasmBytes);\n\
             const {{ exports }} = new WebAssembly.Instance(wasmModule);\n\
             export default exports;\n"
        );

        Ok(PluginOutput {
            code,
            loader: Loader::Js,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern() {
        let plugin = WasmPlugin::new();
        assert!(plugin.test().is_match("/lib/add.wasm"));
        assert!(!plugin.test().is_match("/lib/add.ts"));
    }

    #[test]
    fn test_transform_embeds_bytes() {
        let plugin = WasmPlugin::new();
        let out = plugin.transform(&[0, 97, 115, 109], "/lib/add.wasm").unwrap();
        assert!(out.code.contains("new Uint8Array([0,97,115,109])"));
        assert_eq!(out.loader, Loader::Js);
    }

    #[test]
    fn test_transform_empty() {
        let plugin = WasmPlugin::new();
        let out = plugin.transform(&[], "/lib/empty.wasm").unwrap();
        assert!(out.code.contains("new Uint8Array([])"));
    }
}
