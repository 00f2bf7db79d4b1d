//! File-system watcher actor.
//!
//! Watches the source tree and turns raw notify events into debounced
//! per-module actions:
//!
//! ```text
//! raw path change → classify (ignored | relevant)
//!                 → debounce per module id (150 ms)
//!                 → {add | modify | remove}
//! ```
//!
//! The watcher starts buffering immediately ("watcher-first"), so events
//! raised during the initial compile are not lost.

pub mod classify;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::mpsc;

use crate::config::KilnConfig;
use crate::core::is_shutdown;
use crate::engine::{CompilationEngine, CompileOptions, MAIN_MODULE_ID};
use crate::logger::{status_error, status_success};
use crate::reload::{HmrEvent, HmrNotifier};
use crate::router::{RouteModule, Router, route_pattern};
use crate::{debug, log};

/// Debounce window per module id.
const DEBOUNCE_MS: u64 = 150;

/// What happened to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    fn label(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Removed => "removed",
        }
    }
}

// =============================================================================
// Debouncer - per-module-id timing and event collapse
// =============================================================================

#[derive(Debug)]
struct Pending {
    kind: ChangeKind,
    path: PathBuf,
    deadline: Instant,
}

/// Collapses event bursts per module id: editors often emit several write
/// events for one save, and each new event reschedules that id's deadline.
#[derive(Debug, Default)]
pub struct Debouncer {
    pending: FxHashMap<String, Pending>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an event, applying collapse rules:
    /// - Removed + Added/Modified → the restore event wins
    /// - Added/Modified + Removed → Removed (Added+Removed cancels out)
    /// - same kind → first wins, deadline rescheduled
    pub fn add(&mut self, specifier: String, path: PathBuf, kind: ChangeKind) {
        let deadline = Instant::now() + Duration::from_millis(DEBOUNCE_MS);

        let merged = match self.pending.get(&specifier).map(|p| p.kind) {
            None => Some(kind),
            Some(existing) => match (existing, kind) {
                (ChangeKind::Removed, ChangeKind::Added | ChangeKind::Modified) => Some(kind),
                // Appeared then vanished within the window: no-op.
                (ChangeKind::Added, ChangeKind::Removed) => None,
                (ChangeKind::Modified, ChangeKind::Removed) => Some(ChangeKind::Removed),
                (ChangeKind::Added, ChangeKind::Modified) => Some(ChangeKind::Added),
                _ => Some(existing),
            },
        };

        match merged {
            Some(kind) => {
                self.pending.insert(
                    specifier,
                    Pending {
                        kind,
                        path,
                        deadline,
                    },
                );
            }
            None => {
                self.pending.remove(&specifier);
            }
        }
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Drain entries whose debounce window has elapsed.
    pub fn take_ready(&mut self, now: Instant) -> Vec<(String, ChangeKind, PathBuf)> {
        let ready: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        ready
            .into_iter()
            .filter_map(|id| {
                self.pending
                    .remove(&id)
                    .map(|p| (id, p.kind, p.path))
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// =============================================================================
// Watcher actor
// =============================================================================

/// Shared collaborators the watcher drives on each action.
pub struct WatchContext {
    pub config: Arc<KilnConfig>,
    pub engine: Arc<CompilationEngine>,
    pub router: Arc<dyn Router>,
    pub notifier: Arc<dyn HmrNotifier>,
}

/// File-system watcher with buffered startup.
pub struct FsWatcher {
    notify_rx: std::sync::mpsc::Receiver<notify::Result<notify::Event>>,
    _watcher: RecommendedWatcher,
}

/// Check if path is a temp/backup file (editor artifacts)
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

impl FsWatcher {
    /// Create the watcher and start buffering events immediately, before the
    /// initial compile runs.
    pub fn new(paths: Vec<PathBuf>) -> notify::Result<Self> {
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = notify_tx.send(res);
        })?;

        for path in &paths {
            if path.exists() {
                watcher.watch(path, RecursiveMode::Recursive)?;
            }
        }

        Ok(Self {
            notify_rx,
            _watcher: watcher,
        })
    }

    /// Run the actor event loop until shutdown.
    pub async fn run(self, ctx: WatchContext) {
        let notify_rx = self.notify_rx;
        let plugin_tests: Vec<(Regex, String)> = ctx.engine.loader_tests();
        let mut debouncer = Debouncer::new();

        let (async_tx, mut async_rx) = mpsc::channel::<notify::Event>(64);

        // Bridge: notify's sync channel → async channel.
        std::thread::spawn(move || {
            while let Ok(result) = notify_rx.recv() {
                match result {
                    Ok(event) => {
                        if async_tx.blocking_send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => log!("watch"; "notify error: {}", e),
                }
            }
        });

        loop {
            if is_shutdown() {
                return;
            }

            let sleep_for = debouncer
                .next_deadline()
                .map(|d| d.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_millis(500));

            tokio::select! {
                biased;
                event = async_rx.recv() => {
                    let Some(event) = event else { return };
                    collect_event(&event, &ctx, &plugin_tests, &mut debouncer);
                }
                _ = tokio::time::sleep(sleep_for.max(Duration::from_millis(1))) => {
                    for (specifier, kind, path) in debouncer.take_ready(Instant::now()) {
                        handle_change(&ctx, &specifier, kind, &path).await;
                    }
                }
            }
        }
    }
}

/// Classify one raw notify event into debounced pending changes.
fn collect_event(
    event: &notify::Event,
    ctx: &WatchContext,
    plugin_tests: &[(Regex, String)],
    debouncer: &mut Debouncer,
) {
    use notify::EventKind;

    let kind = match event.kind {
        EventKind::Create(_) => ChangeKind::Added,
        EventKind::Remove(_) => ChangeKind::Removed,
        EventKind::Modify(modify) => {
            // mtime/chmod noise would trigger endless rebuild loops
            if matches!(modify, notify::event::ModifyKind::Metadata(_)) {
                return;
            }
            ChangeKind::Modified
        }
        _ => return,
    };

    for path in &event.paths {
        if is_temp_file(path) {
            continue;
        }
        if !classify::is_relevant(path, &ctx.config, ctx.engine.store(), plugin_tests) {
            continue;
        }
        let Some(specifier) = classify::to_specifier(path, &ctx.config) else {
            continue;
        };

        // Reconcile stale event kinds with actual filesystem state.
        let kind = match (kind, path.exists()) {
            (ChangeKind::Added | ChangeKind::Modified, false) => ChangeKind::Removed,
            (ChangeKind::Removed, true) => ChangeKind::Modified,
            (kind, _) => kind,
        };

        debug!("watch"; "{}: {}", kind.label(), specifier);
        debouncer.add(specifier, path.clone(), kind);
    }
}

/// Apply one debounced change: recompile (or retract), cascade, notify.
async fn handle_change(ctx: &WatchContext, specifier: &str, kind: ChangeKind, _path: &Path) {
    let engine = ctx.engine.clone();
    let config = ctx.config.clone();
    let router = ctx.router.clone();
    let notifier = ctx.notifier.clone();
    let specifier = specifier.to_string();

    let result = tokio::task::spawn_blocking(move || {
        apply_change(&engine, &config, router.as_ref(), notifier.as_ref(), &specifier, kind)
    })
    .await;

    if let Err(e) = result {
        log!("watch"; "change task panicked: {}", e);
    }
}

fn apply_change(
    engine: &CompilationEngine,
    config: &KilnConfig,
    router: &dyn Router,
    notifier: &dyn HmrNotifier,
    specifier: &str,
    kind: ChangeKind,
) {
    let pages_prefix = format!("/{}/", config.build.pages);

    if kind == ChangeKind::Removed {
        let Ok(resolved) = engine.resolve(specifier, None) else {
            return;
        };
        if engine.store().remove(&resolved.id).is_some() {
            router.remove_route(&resolved.id);
            notifier.emit(HmrEvent::Remove {
                url: resolved.id.clone(),
            });
            if resolved.id.starts_with(&pages_prefix) {
                refresh_entry(engine);
            }
            status_success(&format!("removed: {specifier}"));
        }
        return;
    }

    match engine.compile(specifier, CompileOptions::forced()) {
        Ok(module) => {
            if let Some(error) = &module.error {
                notifier.emit(HmrEvent::Error {
                    path: specifier.to_string(),
                    error: error.clone(),
                });
                status_error(&format!("failed: {specifier}"), error);
                return;
            }

            let mut visited = FxHashSet::default();
            let updates = match engine.on_dependency_changed(&module.id, &mut visited) {
                Ok(updates) => updates,
                Err(e) => {
                    status_error(&format!("cascade failed: {specifier}"), &e.to_string());
                    return;
                }
            };

            if module.is_page(&pages_prefix) {
                router.update(RouteModule {
                    id: module.id.clone(),
                    specifier: specifier.to_string(),
                    pattern: route_pattern(&module.id, &config.build.pages),
                    hash: module.hash,
                });
                if !visited.contains(MAIN_MODULE_ID) {
                    refresh_entry(engine);
                }
            }

            notifier.emit(HmrEvent::ClearError);
            match kind {
                ChangeKind::Added => notifier.emit(HmrEvent::Add {
                    url: module.id.clone(),
                    pattern: module
                        .is_page(&pages_prefix)
                        .then(|| route_pattern(&module.id, &config.build.pages)),
                }),
                _ => notifier.emit(HmrEvent::Modify {
                    url: module.id.clone(),
                    hash: module.hash.short(),
                }),
            }
            for update in &updates {
                notifier.emit(HmrEvent::Modify {
                    url: update.id.clone(),
                    hash: update.hash.short(),
                });
            }

            status_success(&format!(
                "recompiled: {specifier} ({} dependent{})",
                updates.len(),
                crate::utils::plural_s(updates.len())
            ));
        }
        Err(e) => {
            notifier.emit(HmrEvent::Error {
                path: specifier.to_string(),
                error: e.to_string(),
            });
            status_error(&format!("failed: {specifier}"), &e.to_string());
        }
    }
}

fn refresh_entry(engine: &CompilationEngine) {
    if let Err(e) = engine.generate_main_module() {
        log!("watch"; "entry regeneration failed: {}", e);
    }
}
