//! Compilation engine.
//!
//! Orchestrates identity resolution → cache lookup → source acquisition →
//! loader dispatch → transpilation → dependency compilation → import-path
//! rewriting → persistence. After `compile` returns, the module's hash
//! matches its content, and every rewritten import path inside it matches the
//! current hash of the module it points at — transitively, because
//! dependencies settle before the parent's rewrite step runs.

mod cascade;
mod entry;
mod inflight;
mod persist;
mod source;

#[cfg(test)]
mod tests;

pub use cascade::CascadeUpdate;
pub use entry::MAIN_MODULE_ID;
pub use persist::MetaRecord;
pub use source::{FetchError, SourceFetcher};

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::config::KilnConfig;
use crate::core::BuildMode;
use crate::debug;
use crate::graph::ModuleStore;
use crate::hashing::compute_hash;
use crate::loader::{self, LoaderError, LoaderOutcome, LoaderRegistry, css, js_string};
use crate::module::{
    DATA_DEP_PREFIX, DependencyDescriptor, ImportEdge, INLINE_STYLE_PREFIX, Loader, Module,
    loader_for_path,
};
use crate::resolve::{ImportMap, ModuleResolver, Referrer, ResolveError, ResolvedModule,
    is_loopback_url};
use crate::router::RouteTable;
use crate::transpile::{
    DiscoveredImport, EsScanner, InlineStyle, TranspileError, TranspileOptions, Transpiler,
    style_placeholder,
};

use inflight::{Claim, InFlightMap};

/// Per-call compilation options.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Recompile even when digests are unchanged.
    pub force: bool,
    /// Injected source override (synthetic modules).
    pub source: Option<String>,
    /// Production bundling pass.
    pub bundle_mode: bool,
}

impl CompileOptions {
    /// Force-recompile (watcher path).
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }

    /// Options used for a module's dependencies: never forced, never
    /// injected, same bundle mode.
    fn for_dependency(&self) -> Self {
        Self {
            force: false,
            source: None,
            bundle_mode: self.bundle_mode,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Transpile(#[from] TranspileError),

    #[error("module `{0}` is not in the graph")]
    NotFound(String),

    #[error("source file for `{0}` disappeared")]
    Gone(String),

    #[error("io error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// State threaded through one top-level compile pass.
#[derive(Default)]
struct CompileCtx {
    /// Ids entered during this pass (cycle guard).
    seen: FxHashSet<String>,
    /// Ids that were referenced while still in flight; their dependents
    /// embedded a provisional hash and need a repair cascade once settled.
    cycles: Vec<String>,
}

/// The incremental module compiler.
pub struct CompilationEngine {
    config: Arc<KilnConfig>,
    mode: BuildMode,
    store: Arc<ModuleStore>,
    routes: Arc<RouteTable>,
    resolver: ModuleResolver,
    registry: LoaderRegistry,
    transpiler: Box<dyn Transpiler>,
    fetcher: SourceFetcher,
    in_flight: InFlightMap,
    /// Count of persisted writes (idempotence checks, diagnostics).
    writes: AtomicUsize,
}

impl CompilationEngine {
    pub fn new(
        config: Arc<KilnConfig>,
        mode: BuildMode,
        store: Arc<ModuleStore>,
        routes: Arc<RouteTable>,
    ) -> Self {
        let registry = LoaderRegistry::with_builtin();

        let import_map = match config.import_map_path() {
            Some(path) => match ImportMap::load(&path) {
                Ok(map) => map,
                Err(e) => {
                    crate::log!("warning"; "{e:#}");
                    ImportMap::default()
                }
            },
            None => ImportMap::default(),
        };

        let resolver = ModuleResolver::new(import_map, &registry);
        let fetcher = SourceFetcher::new(config.src_dir());

        Self {
            config,
            mode,
            store,
            routes,
            resolver,
            registry,
            transpiler: Box::new(EsScanner),
            fetcher,
            in_flight: InFlightMap::new(),
            writes: AtomicUsize::new(0),
        }
    }

    /// Swap in a different transpiler implementation.
    pub fn with_transpiler(mut self, transpiler: Box<dyn Transpiler>) -> Self {
        self.transpiler = transpiler;
        self
    }

    pub fn store(&self) -> &Arc<ModuleStore> {
        &self.store
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    /// Number of module persists performed so far.
    pub fn persisted_writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    pub(crate) fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Resolve a specifier without compiling (watcher, diagnostics).
    pub fn resolve(
        &self,
        specifier: &str,
        referrer: Option<Referrer<'_>>,
    ) -> Result<ResolvedModule, ResolveError> {
        self.resolver.resolve(specifier, referrer)
    }

    /// Registered plugin test patterns (watcher classification).
    pub fn loader_tests(&self) -> Vec<(regex::Regex, String)> {
        self.registry.tests()
    }

    /// Loader tag for a module id: plugin tests first, extension table after.
    pub fn loader_for_id(&self, id: &str) -> Loader {
        for (test, name) in self.registry.tests() {
            if test.is_match(id) {
                return Loader::Plugin(name);
            }
        }
        loader_for_path(id)
    }

    // ------------------------------------------------------------------------
    // compile
    // ------------------------------------------------------------------------

    /// Compile one module (and, recursively, its dependencies).
    ///
    /// Fetch/read failures are recorded on `Module::error` and returned, not
    /// thrown — callers check `.error` before use. Unknown loaders and
    /// malformed specifiers are hard errors.
    pub fn compile(
        &self,
        specifier: &str,
        options: CompileOptions,
    ) -> Result<Module, CompileError> {
        let mut ctx = CompileCtx::default();
        let module = self.compile_inner(specifier, None, &options, &mut ctx)?;

        // Modules referenced while still in flight (dependency cycles) were
        // embedded with a provisional hash; cascade from them now.
        let cycles = std::mem::take(&mut ctx.cycles);
        for id in cycles {
            if self.store.contains(&id) {
                let mut visited = FxHashSet::default();
                self.on_dependency_changed(&id, &mut visited)?;
            }
        }

        Ok(module)
    }

    fn compile_inner(
        &self,
        specifier: &str,
        referrer: Option<Referrer<'_>>,
        options: &CompileOptions,
        ctx: &mut CompileCtx,
    ) -> Result<Module, CompileError> {
        let resolved = self.resolver.resolve(specifier, referrer)?;

        if ctx.seen.contains(&resolved.id) {
            // Cycle within this pass: hand back the current snapshot (or a
            // provisional placeholder) and let the repair cascade settle it.
            ctx.cycles.push(resolved.id.clone());
            return Ok(self.store.get(&resolved.id).unwrap_or_else(|| {
                Module::new(
                    resolved.id.clone(),
                    resolved.canonical_url.clone(),
                    resolved.is_remote,
                    resolved.loader.clone(),
                )
            }));
        }

        match self.in_flight.claim(&resolved.id) {
            Claim::Waited => self
                .store
                .get(&resolved.id)
                .ok_or_else(|| CompileError::NotFound(resolved.id.clone())),
            Claim::Owner(_guard) => {
                ctx.seen.insert(resolved.id.clone());
                self.compile_module(&resolved, options, ctx)
                // _guard drops here, releasing waiters
            }
        }
    }

    fn compile_module(
        &self,
        resolved: &ResolvedModule,
        options: &CompileOptions,
        ctx: &mut CompileCtx,
    ) -> Result<Module, CompileError> {
        let id = resolved.id.as_str();
        let pinned_remote = resolved.is_remote && !is_loopback_url(&resolved.canonical_url);

        // Cache short-circuit: no recompilation from a pure cache hit, even
        // across process restarts. Pinned remote modules are immutable, so
        // even a forced compile reuses their settled record.
        if (!options.force || pinned_remote) && options.source.is_none() {
            if let Some(module) = self.store.get(id)
                && module.error.is_none()
            {
                return Ok(module);
            }
            if let Some(module) =
                persist::restore(&self.config, resolved).map_err(|e| CompileError::Io {
                    path: self.config.modules_dir(),
                    source: e,
                })?
            {
                self.store.insert(module.clone());
                return Ok(module);
            }
        }

        // Source acquisition: injected → remote fetch → local read.
        let source_bytes = if let Some(text) = &options.source {
            text.clone().into_bytes()
        } else {
            match self.fetcher.fetch(resolved) {
                Ok(bytes) => bytes,
                Err(FetchError::NotFound(_))
                    if !resolved.is_remote
                        && self
                            .store
                            .get(id)
                            .is_some_and(|m| m.error.is_none()) =>
                {
                    // Re-read of a module the graph already knows: hard fault.
                    return Err(CompileError::Gone(id.to_string()));
                }
                Err(err) => {
                    let mut module = Module::new(
                        id,
                        resolved.canonical_url.clone(),
                        resolved.is_remote,
                        resolved.loader.clone(),
                    );
                    module.error = Some(err.to_string());
                    self.store.insert(module.clone());
                    return Ok(module);
                }
            }
        };

        // Unchanged source digest: this module and its recorded deps are
        // still valid. Forced compiles skip the shortcut — their import
        // rewrites must run even when the source text is identical.
        let source_hash = compute_hash(&source_bytes);
        let existing = self.store.get(id);
        if !options.force
            && let Some(module) = &existing
            && module.error.is_none()
            && module.source_hash == source_hash
        {
            return Ok(module.clone());
        }
        let previous_artifact = existing
            .as_ref()
            .map(|m| m.js_file.clone())
            .filter(|p| !p.as_os_str().is_empty());

        // Loader dispatch; synthetic loaders (css/markdown/plugins) re-enter
        // with synthesized source and a new tag until JS comes out.
        let mut bytes = source_bytes;
        let mut loader = resolved.loader.clone();
        let output = loop {
            match loader::dispatch(id, &bytes, &loader, self.mode, &self.registry)? {
                LoaderOutcome::FinalJs { code } => {
                    let transpile_options = TranspileOptions {
                        url: &resolved.canonical_url,
                        target: &self.config.build.target,
                        source_type: loader.clone(),
                        dev_mode: self.mode.is_dev(),
                        bundle_mode: options.bundle_mode,
                    };
                    break self.transpiler.transpile(&code, &transpile_options)?;
                }
                LoaderOutcome::Reenter {
                    source,
                    loader: next,
                } => {
                    bytes = source.into_bytes();
                    loader = next;
                }
            }
        };

        let mut module = Module::new(
            id,
            resolved.canonical_url.clone(),
            resolved.is_remote,
            resolved.loader.clone(),
        );
        module.source_hash = source_hash;
        module.source_map = output.map.clone();

        let mut code = output.code;
        let mut discovered = output.deps;

        // Inline styles compile separately and splice back at placeholders.
        for (key, style) in &output.inline_styles {
            let replacement = self.compile_inline_style(id, style)?;
            splice_placeholder(&mut code, &mut discovered, key, &replacement);
            module.deps.push(DependencyDescriptor {
                url: format!("{INLINE_STYLE_PREFIX}{key}"),
                hash: compute_hash(style.to_template_text().as_bytes()),
                is_dynamic: false,
                is_style: true,
                is_data: false,
            });
        }

        // Dependencies: compile each fully, then rewrite its specifier to
        // the hashed import path. Because a dependency settles (including its
        // own cascade) before this rewrite, no parent embeds a stale hash.
        let referrer = Referrer {
            id,
            url: &resolved.canonical_url,
        };
        let mut edges: Vec<ImportEdge> = Vec::with_capacity(discovered.len());
        let mut delta: isize = 0;

        for d in &discovered {
            if let Some(descriptor) = pseudo_descriptor(&d.specifier) {
                module.deps.push(descriptor);
                continue;
            }

            let dep =
                self.compile_inner(&d.specifier, Some(referrer), &options.for_dependency(), ctx)?;

            let import_path = dep.import_path();
            let start = d.start.wrapping_add_signed(delta);
            code.replace_range(start..start + d.len, &import_path);
            delta += import_path.len() as isize - d.len as isize;

            edges.push(ImportEdge {
                url: dep.id.clone(),
                start,
                len: import_path.len(),
            });
            module.deps.push(DependencyDescriptor {
                url: dep.id.clone(),
                hash: dep.hash,
                is_dynamic: d.is_dynamic,
                is_style: false,
                is_data: false,
            });
        }

        // Any content mutation requires hash recomputation before persisting.
        module.js_content = code;
        module.hash = compute_hash(module.js_content.as_bytes());
        module.import_edges = edges;
        module.js_file = self.config.modules_dir().join(module.artifact_rel_path());

        persist::persist(&self.config, &module, previous_artifact.as_deref()).map_err(|e| {
            CompileError::Io {
                path: module.js_file.clone(),
                source: e,
            }
        })?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.store.insert(module.clone());

        debug!("compile"; "{} [{}] -> {}", id, module.loader.tag(), module.hash);
        Ok(module)
    }

    fn compile_inline_style(
        &self,
        id: &str,
        style: &InlineStyle,
    ) -> Result<String, CompileError> {
        if style.is_static() {
            let css_text = style.quasis.concat();
            let processed = css::process(id, &css_text, &Loader::Css, self.mode.minify)?;
            Ok(js_string(&processed))
        } else {
            // Interpolations evaluate at runtime; keep the template form.
            Ok(format!("`{}`", style.to_template_text()))
        }
    }

    /// Run bundled output back through the transpiler (target lowering pass).
    pub fn transpile_bundle(&self, code: &str) -> Result<String, TranspileError> {
        let options = TranspileOptions {
            url: "/bundle.js",
            target: &self.config.build.target,
            source_type: Loader::Js,
            dev_mode: false,
            bundle_mode: true,
        };
        Ok(self.transpiler.transpile(code, &options)?.code)
    }

    // ------------------------------------------------------------------------
    // startup restore
    // ------------------------------------------------------------------------

    /// Load every intact persisted meta record into the store.
    ///
    /// Unchanged modules then skip recompilation across process restarts.
    pub fn restore_cache(&self) -> usize {
        let mut restored = 0;
        for meta_path in persist::meta_records(&self.config) {
            let Some(id) = persist::id_for_meta_path(&self.config, &meta_path) else {
                continue;
            };
            if self.store.contains(&id) {
                continue;
            }
            let loader = self.loader_for_id(&id);
            match persist::restore_by_id(&self.config, &id, loader) {
                Ok(Some(module)) => {
                    self.store.insert(module);
                    restored += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    debug!("cache"; "failed to restore {}: {}", id, e);
                }
            }
        }
        restored
    }
}

/// Classify reserved-prefix specifiers as pseudo-dependencies.
fn pseudo_descriptor(specifier: &str) -> Option<DependencyDescriptor> {
    if !specifier.starts_with('#') {
        return None;
    }
    Some(DependencyDescriptor {
        url: specifier.to_string(),
        hash: compute_hash(specifier.as_bytes()),
        is_dynamic: false,
        is_style: specifier.starts_with(INLINE_STYLE_PREFIX),
        is_data: specifier.starts_with(DATA_DEP_PREFIX),
    })
}

/// Replace a style placeholder, shifting later import spans.
fn splice_placeholder(
    code: &mut String,
    discovered: &mut [DiscoveredImport],
    key: &str,
    replacement: &str,
) {
    let placeholder = style_placeholder(key);
    let Some(pos) = code.find(&placeholder) else {
        return;
    };
    code.replace_range(pos..pos + placeholder.len(), replacement);
    let delta = replacement.len() as isize - placeholder.len() as isize;
    for d in discovered.iter_mut() {
        if d.start > pos {
            d.start = d.start.wrapping_add_signed(delta);
        }
    }
}
