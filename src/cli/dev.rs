//! Development server: initial compile, watcher, hot reload, artifact HTTP.

use std::sync::Arc;

use anyhow::{Context, Result};

use super::build::{clear_cache, compile_pages, register_routes, scan_pages};
use crate::config::KilnConfig;
use crate::core::{BuildMode, set_healthy, set_serving};
use crate::engine::CompilationEngine;
use crate::graph::ModuleStore;
use crate::log;
use crate::logger::status_error;
use crate::reload::{WsBroadcaster, start_ws_server};
use crate::router::RouteTable;
use crate::server;
use crate::utils::plural_s;
use crate::watch::{FsWatcher, WatchContext};

/// Run the dev server until shutdown.
pub fn run_dev(config: Arc<KilnConfig>, clean: bool) -> Result<()> {
    if clean {
        clear_cache(&config.cache_dir())?;
    }

    let store = Arc::new(ModuleStore::new());
    let routes = Arc::new(RouteTable::new());
    let engine = Arc::new(CompilationEngine::new(
        config.clone(),
        BuildMode::DEVELOPMENT,
        store,
        routes.clone(),
    ));

    // Watcher-first: start buffering events before the initial compile so
    // edits made during it are not lost.
    let watcher = if config.serve.watch {
        Some(FsWatcher::new(vec![config.src_dir()]).context("failed to start file watcher")?)
    } else {
        None
    };

    // Initial compile (cache restore makes this cheap across restarts).
    let restored = engine.restore_cache();
    if restored > 0 {
        log!("serve"; "restored {} cached module{}", restored, plural_s(restored));
    }

    let specifiers = scan_pages(&config);
    if specifiers.is_empty() {
        anyhow::bail!(
            "no page modules found under {}",
            config.pages_dir().display()
        );
    }

    let errors = compile_pages(&engine, &specifiers, None);
    register_routes(&engine, &specifiers);
    if let Err(e) = engine.generate_main_module() {
        log!("error"; "entry generation failed: {}", e);
    }

    set_healthy(errors.is_empty());
    if let Some((specifier, error)) = errors.first() {
        status_error(&format!("compile error in {specifier}"), error);
    } else {
        log!("serve"; "compiled {} page{}", specifiers.len(), plural_s(specifiers.len()));
    }

    // Hot reload transport.
    let broadcaster = WsBroadcaster::new();
    let ws_port = start_ws_server(config.serve.effective_ws_port(), broadcaster.clone())?;
    log!("reload"; "ws://127.0.0.1:{}/", ws_port);

    // Watcher actor on its own runtime thread.
    if let Some(watcher) = watcher {
        let ctx = WatchContext {
            config: config.clone(),
            engine: engine.clone(),
            router: routes,
            notifier: Arc::new(broadcaster),
        };
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build();
            match runtime {
                Ok(runtime) => runtime.block_on(watcher.run(ctx)),
                Err(e) => log!("watch"; "failed to start runtime: {}", e),
            }
        });
    }

    // Serve artifacts on the main thread until Ctrl+C.
    let http = server::bind(&config)?;
    set_serving();
    server::run(http, config, engine, ws_port);

    Ok(())
}
