//! Synthetic entry module.
//!
//! `/main.js` bootstraps the application: it imports every page module and
//! hands the route table to the runtime. It is generated from the route
//! table, never authored — the cascade regenerates it wholesale instead of
//! patching its text.

use super::{CompilationEngine, CompileError, CompileOptions};
use crate::loader::js_string;
use crate::module::Module;

/// Id of the synthetic entry module.
pub const MAIN_MODULE_ID: &str = "/main.js";

impl CompilationEngine {
    /// (Re)generate the entry module from the current route table.
    pub fn generate_main_module(&self) -> Result<Module, CompileError> {
        let source = self.synthesize_main_source();
        self.compile(
            MAIN_MODULE_ID,
            CompileOptions {
                force: true,
                source: Some(source),
                bundle_mode: false,
            },
        )
    }

    /// Emit the entry source. Page imports use raw specifiers; the normal
    /// compile pipeline rewrites them to hashed paths like any other module.
    fn synthesize_main_source(&self) -> String {
        let routes = self.routes().all();
        let mut imports = String::new();
        let mut table = String::new();

        for (i, route) in routes.iter().enumerate() {
            imports.push_str(&format!("import $page{i} from \"{}\";\n", route.specifier));
            table.push_str(&format!("  {}: $page{i},\n", js_string(&route.pattern)));
        }

        format!("{imports}window.__KILN.boot({{\n  routes: {{\n{table}  }},\n}});\n")
    }
}
