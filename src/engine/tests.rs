//! Engine integration tests over real temp projects.

use std::fs;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use tempfile::TempDir;

use super::{CompilationEngine, CompileError, CompileOptions, MAIN_MODULE_ID, persist};
use crate::config::KilnConfig;
use crate::core::BuildMode;
use crate::graph::ModuleStore;
use crate::hashing::compute_hash;
use crate::loader::LoaderError;
use crate::module::{Loader, Module};
use crate::router::{RouteModule, Router, RouteTable, route_pattern};

struct TestProject {
    _dir: TempDir,
    config: Arc<KilnConfig>,
    store: Arc<ModuleStore>,
    routes: Arc<RouteTable>,
}

impl TestProject {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pages")).unwrap();

        let mut config = KilnConfig::default();
        config.root = dir.path().to_path_buf();

        Self {
            _dir: dir,
            config: Arc::new(config),
            store: Arc::new(ModuleStore::new()),
            routes: Arc::new(RouteTable::new()),
        }
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.config.root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn engine(&self) -> CompilationEngine {
        CompilationEngine::new(
            self.config.clone(),
            BuildMode::DEVELOPMENT,
            self.store.clone(),
            self.routes.clone(),
        )
    }

    /// New engine over an empty store: simulates a process restart.
    fn restarted_engine(&self) -> CompilationEngine {
        CompilationEngine::new(
            self.config.clone(),
            BuildMode::DEVELOPMENT,
            Arc::new(ModuleStore::new()),
            self.routes.clone(),
        )
    }

    fn register_page(&self, engine: &CompilationEngine, specifier: &str) {
        let resolved = engine.resolve(specifier, None).unwrap();
        let module = engine.store().get(&resolved.id).unwrap();
        self.routes.update(RouteModule {
            pattern: route_pattern(&module.id, &self.config.build.pages),
            id: module.id,
            specifier: specifier.to_string(),
            hash: module.hash,
        });
    }
}

fn basic_project() -> TestProject {
    let project = TestProject::new();
    project.write(
        "pages/index.tsx",
        "import Logo from \"../components/logo.tsx\";\nexport default () => Logo;\n",
    );
    project.write("components/logo.tsx", "export default \"logo\";\n");
    project.write("pages/about.tsx", "export default \"about\";\n");
    project
}

// ----------------------------------------------------------------------------
// Idempotence
// ----------------------------------------------------------------------------

#[test]
fn unchanged_module_compiles_once() {
    let project = basic_project();
    let engine = project.engine();

    let first = engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();
    let writes = engine.persisted_writes();
    assert_eq!(writes, 2); // index + logo

    let second = engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();

    assert_eq!(first.hash, second.hash);
    assert_eq!(first.js_content, second.js_content);
    assert_eq!(engine.persisted_writes(), writes); // zero new writes
}

#[test]
fn cache_hit_survives_restart_without_recompiling() {
    let project = basic_project();
    let first = project
        .engine()
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();

    let engine = project.restarted_engine();
    let second = engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();

    assert_eq!(first.hash, second.hash);
    assert_eq!(first.js_content, second.js_content);
    assert_eq!(engine.persisted_writes(), 0);
}

#[test]
fn restore_cache_preloads_all_meta_records() {
    let project = basic_project();
    project
        .engine()
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();

    let engine = project.restarted_engine();
    let restored = engine.restore_cache();
    assert_eq!(restored, 2);
    assert!(engine.store().contains("/pages/index.js"));
    assert!(engine.store().contains("/components/logo.js"));
}

// ----------------------------------------------------------------------------
// Hash-path round trip
// ----------------------------------------------------------------------------

#[test]
fn artifact_and_embedded_paths_share_hash_prefix() {
    let project = basic_project();
    let engine = project.engine();

    let index = engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();
    let logo = engine.store().get("/components/logo.js").unwrap();

    let prefix = logo.hash.short();
    let artifact = project
        .config
        .modules_dir()
        .join(format!("components/logo.{prefix}.js"));
    assert!(artifact.is_file());
    assert!(
        index
            .js_content
            .contains(&format!("\"/components/logo.{prefix}.js\""))
    );

    // The dep record caches the same digest.
    let dep = index
        .deps
        .iter()
        .find(|d| d.url == "/components/logo.js")
        .unwrap();
    assert_eq!(dep.hash, logo.hash);
}

#[test]
fn dynamic_imports_rewritten_too() {
    let project = basic_project();
    project.write(
        "pages/index.tsx",
        "const About = () => import(\"./about.tsx\");\nexport default About;\n",
    );
    let engine = project.engine();

    let index = engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();
    let about = engine.store().get("/pages/about.js").unwrap();

    assert!(
        index
            .js_content
            .contains(&format!("import(\"/pages/about.{}.js\")", about.hash.short()))
    );
    assert!(index.deps.iter().any(|d| d.is_dynamic));
}

// ----------------------------------------------------------------------------
// Cascade convergence (the logo scenario)
// ----------------------------------------------------------------------------

#[test]
fn leaf_change_cascades_to_ancestors_only() {
    let project = basic_project();
    let engine = project.engine();

    engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();
    engine
        .compile("/pages/about.tsx", CompileOptions::default())
        .unwrap();

    let old_logo = engine.store().get("/components/logo.js").unwrap();
    let old_index = engine.store().get("/pages/index.js").unwrap();
    let old_about = engine.store().get("/pages/about.js").unwrap();

    // (a) changing the leaf produces a new hash
    project.write("components/logo.tsx", "export default \"LOGO v2\";\n");
    let new_logo = engine
        .compile("/components/logo.tsx", CompileOptions::forced())
        .unwrap();
    assert_ne!(new_logo.hash, old_logo.hash);

    let writes_before = engine.persisted_writes();
    let mut visited = FxHashSet::default();
    let updates = engine
        .on_dependency_changed("/components/logo.js", &mut visited)
        .unwrap();

    // The cascade visits the one ancestor exactly once.
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].id, "/pages/index.js");
    assert_eq!(engine.persisted_writes(), writes_before + 1);

    // (b) the ancestor's import statement references the new hash
    let new_index = engine.store().get("/pages/index.js").unwrap();
    assert!(
        new_index
            .js_content
            .contains(&format!("/components/logo.{}.js", new_logo.hash.short()))
    );
    let old_prefix = old_logo.hash.short();
    assert!(!new_index.js_content.contains(&old_prefix));

    // (c) the ancestor's own hash was recomputed and persisted
    assert_ne!(new_index.hash, old_index.hash);
    let meta_json = fs::read_to_string(
        project
            .config
            .modules_dir()
            .join("pages/index.meta.json"),
    )
    .unwrap();
    let meta: persist::MetaRecord = serde_json::from_str(&meta_json).unwrap();
    assert_eq!(meta.hash, new_index.hash);

    // (d) the unrelated module is untouched
    let about = engine.store().get("/pages/about.js").unwrap();
    assert_eq!(about.hash, old_about.hash);
}

#[test]
fn cascade_converges_over_two_levels() {
    let project = TestProject::new();
    project.write("lib/colors.ts", "export const red = \"#f00\";\n");
    project.write(
        "components/logo.tsx",
        "import { red } from \"../lib/colors.ts\";\nexport default red;\n",
    );
    project.write(
        "pages/index.tsx",
        "import Logo from \"../components/logo.tsx\";\nexport default Logo;\n",
    );
    let engine = project.engine();
    engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();

    project.write("lib/colors.ts", "export const red = \"#e00\";\n");
    let new_colors = engine
        .compile("/lib/colors.ts", CompileOptions::forced())
        .unwrap();

    let mut visited = FxHashSet::default();
    let updates = engine
        .on_dependency_changed("/lib/colors.js", &mut visited)
        .unwrap();

    let ids: Vec<&str> = updates.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["/components/logo.js", "/pages/index.js"]);

    // Every embedded prefix equals the *current* hash of its target.
    let logo = engine.store().get("/components/logo.js").unwrap();
    let index = engine.store().get("/pages/index.js").unwrap();
    assert!(
        logo.js_content
            .contains(&format!("/lib/colors.{}.js", new_colors.hash.short()))
    );
    assert!(
        index
            .js_content
            .contains(&format!("/components/logo.{}.js", logo.hash.short()))
    );
}

// ----------------------------------------------------------------------------
// Cycle safety
// ----------------------------------------------------------------------------

#[test]
fn dependency_cycle_terminates() {
    let project = TestProject::new();
    project.write(
        "lib/a.ts",
        "import { b } from \"./b.ts\";\nexport const a = 1;\n",
    );
    project.write(
        "lib/b.ts",
        "import { a } from \"./a.ts\";\nexport const b = 2;\n",
    );
    let engine = project.engine();

    let a = engine
        .compile("/lib/a.ts", CompileOptions::default())
        .unwrap();
    assert!(a.error.is_none());
    assert!(engine.store().contains("/lib/a.js"));
    assert!(engine.store().contains("/lib/b.js"));

    // The cascade over the cycle terminates as well, visiting each once.
    let mut visited = FxHashSet::default();
    let updates = engine.on_dependency_changed("/lib/a.js", &mut visited).unwrap();
    assert!(updates.len() <= 2);
}

// ----------------------------------------------------------------------------
// CSS modules
// ----------------------------------------------------------------------------

#[test]
fn css_module_invokes_apply_css() {
    let project = TestProject::new();
    project.write("style/app.css", "h1{color:red}");
    project.write(
        "pages/index.tsx",
        "import \"../style/app.css\";\nexport default 1;\n",
    );
    let engine = project.engine();

    let index = engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();
    let css = engine.store().get("/style/app.css").unwrap();

    assert_eq!(css.loader, Loader::Css);
    assert!(
        css.js_content
            .contains("applyCSS(\"/style/app.css\", \"h1{color:red}\")")
    );

    // The importer references the style module's hashed JS artifact.
    assert!(
        index
            .js_content
            .contains(&format!("\"/style/app.css.{}.js\"", css.hash.short()))
    );

    // Style-dependency lookup finds it transitively.
    assert_eq!(
        engine.store().collect_styles("/pages/index.js"),
        vec!["/style/app.css".to_string()]
    );
}

#[test]
fn inline_style_spliced_back() {
    let project = TestProject::new();
    project.write(
        "pages/index.tsx",
        "const style = css`h1{color:red}`;\nexport default style;\n",
    );
    let engine = project.engine();

    let index = engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();

    assert!(index.js_content.contains("\"h1{color:red}\""));
    assert!(!index.js_content.contains("%%"));
    assert!(index.deps.iter().any(|d| d.is_style && d.is_pseudo()));
}

// ----------------------------------------------------------------------------
// Markdown modules
// ----------------------------------------------------------------------------

#[test]
fn markdown_page_compiles_to_component() {
    let project = TestProject::new();
    project.write(
        "pages/docs/intro.md",
        "---\ntitle = \"Intro\"\n---\n# Intro\n",
    );
    let engine = project.engine();

    let module = engine
        .compile("/pages/docs/intro.md", CompileOptions::default())
        .unwrap();

    assert_eq!(module.id, "/pages/docs/intro.md"); // id keeps its extension
    assert_eq!(module.loader, Loader::Markdown);
    assert!(module.js_content.contains("<h1>Intro</h1>"));
    assert!(module.js_content.contains("\"title\":\"Intro\""));

    let artifact = project
        .config
        .modules_dir()
        .join(format!("pages/docs/intro.md.{}.js", module.hash.short()));
    assert!(artifact.is_file());
}

// ----------------------------------------------------------------------------
// Failure modes
// ----------------------------------------------------------------------------

#[test]
fn missing_local_file_records_error() {
    let project = TestProject::new();
    let engine = project.engine();

    let module = engine
        .compile("/pages/missing.tsx", CompileOptions::default())
        .unwrap();
    assert!(module.error.is_some());
    // Callers check `.error`; the module is otherwise unusable.
    assert!(module.js_content.is_empty());
}

#[test]
fn deleted_source_of_known_module_is_hard_fault() {
    let project = basic_project();
    let engine = project.engine();
    engine
        .compile("/pages/about.tsx", CompileOptions::default())
        .unwrap();

    fs::remove_file(project.config.root.join("pages/about.tsx")).unwrap();
    let err = engine
        .compile("/pages/about.tsx", CompileOptions::forced())
        .unwrap_err();
    assert!(matches!(err, CompileError::Gone(_)));
}

#[test]
fn unknown_loader_is_fatal() {
    let project = TestProject::new();
    project.write("data/blob.bin", "xx");
    let engine = project.engine();

    let err = engine
        .compile("/data/blob.bin", CompileOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        CompileError::Loader(LoaderError::UnknownLoader(_))
    ));
}

// ----------------------------------------------------------------------------
// Remote modules
// ----------------------------------------------------------------------------

#[test]
fn pinned_remote_module_never_refetched() {
    let project = TestProject::new();
    let engine = project.engine();

    // Seed a settled remote record; no network exists in this test.
    let mut remote = Module::new(
        "/-/esm.sh/react@18.2.0.js",
        "https://esm.sh/react@18.2.0",
        true,
        Loader::Js,
    );
    remote.js_content = "export default \"react\";".to_string();
    remote.source_hash = compute_hash(b"remote-source");
    remote.hash = compute_hash(remote.js_content.as_bytes());
    remote.js_file = project.config.modules_dir().join(remote.artifact_rel_path());
    persist::persist(&project.config, &remote, None).unwrap();

    // Plain and forced compiles both reuse the immutable record.
    let compiled = engine
        .compile("https://esm.sh/react@18.2.0", CompileOptions::default())
        .unwrap();
    assert_eq!(compiled.hash, remote.hash);

    let forced = engine
        .compile("https://esm.sh/react@18.2.0", CompileOptions::forced())
        .unwrap();
    assert_eq!(forced.hash, remote.hash);
    assert_eq!(engine.persisted_writes(), 0);

    // Remote artifacts live at unhashed, content-addressed-by-dir paths.
    assert!(
        project
            .config
            .modules_dir()
            .join("-/esm.sh/react@18.2.0.js")
            .is_file()
    );
}

// ----------------------------------------------------------------------------
// Synthetic entry module
// ----------------------------------------------------------------------------

#[test]
fn entry_module_imports_hashed_pages() {
    let project = basic_project();
    let engine = project.engine();
    engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();
    engine
        .compile("/pages/about.tsx", CompileOptions::default())
        .unwrap();
    project.register_page(&engine, "/pages/index.tsx");
    project.register_page(&engine, "/pages/about.tsx");

    let main = engine.generate_main_module().unwrap();
    let index = engine.store().get("/pages/index.js").unwrap();

    assert_eq!(main.id, MAIN_MODULE_ID);
    assert!(
        main.js_content
            .contains(&format!("\"/pages/index.{}.js\"", index.hash.short()))
    );
    assert!(main.js_content.contains("\"/\": $page"));
    assert!(main.js_content.contains("\"/about\": $page"));
}

#[test]
fn cascade_regenerates_entry_instead_of_patching() {
    let project = basic_project();
    let engine = project.engine();
    engine
        .compile("/pages/index.tsx", CompileOptions::default())
        .unwrap();
    project.register_page(&engine, "/pages/index.tsx");
    engine.generate_main_module().unwrap();

    project.write("components/logo.tsx", "export default \"LOGO v3\";\n");
    engine
        .compile("/components/logo.tsx", CompileOptions::forced())
        .unwrap();

    let mut visited = FxHashSet::default();
    let updates = engine
        .on_dependency_changed("/components/logo.js", &mut visited)
        .unwrap();

    assert!(updates.iter().any(|u| u.id == MAIN_MODULE_ID));

    let index = engine.store().get("/pages/index.js").unwrap();
    let main = engine.store().get(MAIN_MODULE_ID).unwrap();
    assert!(
        main.js_content
            .contains(&format!("\"/pages/index.{}.js\"", index.hash.short()))
    );
}

// ----------------------------------------------------------------------------
// In-flight de-duplication
// ----------------------------------------------------------------------------

#[test]
fn concurrent_compiles_deduplicate() {
    let project = basic_project();
    let engine = Arc::new(project.engine());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            std::thread::spawn(move || {
                engine
                    .compile("/pages/index.tsx", CompileOptions::default())
                    .unwrap()
            })
        })
        .collect();

    let hashes: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().hash)
        .collect();

    assert!(hashes.windows(2).all(|w| w[0] == w[1]));
    // index + logo were each compiled exactly once.
    assert_eq!(engine.persisted_writes(), 2);
}
