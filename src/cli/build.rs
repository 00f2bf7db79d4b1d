//! Production build driver.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, bail};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::bundle::{self, CommandBundler};
use crate::config::KilnConfig;
use crate::core::BuildMode;
use crate::engine::{CompilationEngine, CompileOptions};
use crate::graph::ModuleStore;
use crate::log;
use crate::logger::ProgressLine;
use crate::router::{RouteModule, RouteTable, Router, route_pattern};
use crate::utils::plural_s;

/// Page source extensions scanned under the pages directory.
const PAGE_EXTS: [&str; 6] = ["js", "jsx", "ts", "tsx", "md", "markdown"];

/// Scan the pages directory for page source specifiers (`/pages/...`).
pub fn scan_pages(config: &KilnConfig) -> Vec<String> {
    let pages_dir = config.pages_dir();
    let src_dir = config.src_dir();

    let mut specifiers: Vec<String> = jwalk::WalkDir::new(&pages_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let path = e.path();
            let ext = path.extension()?.to_str()?;
            if !PAGE_EXTS.contains(&ext) {
                return None;
            }
            let rel = path.strip_prefix(&src_dir).ok()?;
            Some(format!("/{}", rel.to_str()?.replace('\\', "/")))
        })
        .collect();
    specifiers.sort();
    specifiers
}

/// Compile every page, fanning out across the thread pool.
///
/// Returns `(specifier, error)` pairs for failed pages.
pub fn compile_pages(
    engine: &CompilationEngine,
    specifiers: &[String],
    progress: Option<&ProgressLine>,
) -> Vec<(String, String)> {
    let errors = Mutex::new(Vec::new());

    specifiers.par_iter().for_each(|specifier| {
        match engine.compile(specifier, CompileOptions::default()) {
            Ok(module) => {
                if let Some(error) = module.error {
                    errors.lock().push((specifier.clone(), error));
                }
            }
            Err(e) => {
                errors.lock().push((specifier.clone(), e.to_string()));
            }
        }
        if let Some(progress) = progress {
            progress.inc("pages");
        }
    });

    errors.into_inner()
}

/// Register route-table entries for successfully compiled pages.
pub fn register_routes(engine: &CompilationEngine, specifiers: &[String]) {
    for specifier in specifiers {
        let Ok(resolved) = engine.resolve(specifier, None) else {
            continue;
        };
        let Some(module) = engine.store().get(&resolved.id) else {
            continue;
        };
        if module.error.is_some() {
            continue;
        }
        engine.routes().update(RouteModule {
            id: module.id.clone(),
            specifier: specifier.clone(),
            pattern: route_pattern(&module.id, &engine.config().build.pages),
            hash: module.hash,
        });
    }
}

/// Full production build: compile pages, generate the entry, bundle.
pub fn build_site(config: Arc<KilnConfig>, clean: bool) -> Result<()> {
    if clean {
        clear_cache(&config.cache_dir())?;
    }

    let store = Arc::new(ModuleStore::new());
    let routes = Arc::new(RouteTable::new());
    let engine = CompilationEngine::new(
        config.clone(),
        BuildMode::PRODUCTION,
        store.clone(),
        routes,
    );

    let restored = engine.restore_cache();
    if restored > 0 {
        log!("build"; "restored {} cached module{}", restored, plural_s(restored));
    }

    let specifiers = scan_pages(&config);
    if specifiers.is_empty() {
        bail!(
            "no page modules found under {}",
            config.pages_dir().display()
        );
    }

    let progress = ProgressLine::new(&[("pages", specifiers.len())]);
    let errors = compile_pages(&engine, &specifiers, Some(&progress));
    progress.finish();

    if !errors.is_empty() {
        for (specifier, error) in &errors {
            log!("error"; "{}: {}", specifier, error);
        }
        bail!(
            "{} page{} failed to compile",
            errors.len(),
            plural_s(errors.len())
        );
    }

    register_routes(&engine, &specifiers);
    engine.generate_main_module()?;

    let mut bundle_failed = false;
    if config.bundle.enabled() {
        let bundler = CommandBundler::new(config.bundle.command.clone());
        let entries: Vec<String> = engine
            .routes()
            .all()
            .into_iter()
            .map(|r| r.id)
            .collect();
        let report =
            bundle::build_vendor_bundle(&engine, &bundler, &config.output_dir(), &entries);
        match (&report.output, &report.error) {
            (Some(path), _) => log!("bundle"; "{} -> {}", report.name, path.display()),
            (None, Some(_)) => bundle_failed = true,
            (None, None) => log!("bundle"; "nothing shared, skipped"),
        }
    }

    log!(
        "build";
        "{} module{} compiled ({} write{})",
        store.len(),
        plural_s(store.len()),
        engine.persisted_writes(),
        plural_s(engine.persisted_writes())
    );

    if bundle_failed {
        bail!("vendor bundle failed");
    }
    Ok(())
}

/// Remove the build cache directory.
pub fn clear_cache(cache_dir: &Path) -> Result<()> {
    if cache_dir.exists() {
        std::fs::remove_dir_all(cache_dir)?;
    }
    Ok(())
}
