//! Project configuration management for `kiln.toml`.
//!
//! # Sections
//!
//! | Section    | Purpose                                            |
//! |------------|----------------------------------------------------|
//! | `[build]`  | Source root, pages dir, output dir, target, maps   |
//! | `[bundle]` | External bundler command for production builds     |
//! | `[serve]`  | Development server (port, ws port, watch)          |

mod error;

pub use error::ConfigError;

use crate::cli::Cli;
use crate::log;
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Default config file name.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Build-cache directory name (inside project root).
pub const CACHE_DIR: &str = ".kiln";

// ============================================================================
// root configuration
// ============================================================================

/// Root configuration structure representing kiln.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KilnConfig {
    /// Absolute path to the config file (internal use only)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Project root directory - parent of config file (internal use only)
    #[serde(skip)]
    pub root: PathBuf,

    /// Build settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Production bundler settings
    #[serde(default)]
    pub bundle: BundleConfig,

    /// Development server settings
    #[serde(default)]
    pub serve: ServeConfig,
}

/// `[build]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Source root, relative to the project root.
    pub src: PathBuf,

    /// Pages directory name under the source root.
    pub pages: String,

    /// Output directory for production builds, relative to the project root.
    pub output: PathBuf,

    /// Target ECMAScript level handed to the transpiler.
    pub target: String,

    /// Emit `.js.map` files next to compiled artifacts.
    pub source_maps: bool,

    /// Import map file, relative to the source root.
    pub import_map: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            src: PathBuf::from("."),
            pages: "pages".to_string(),
            output: PathBuf::from("dist"),
            target: "es2018".to_string(),
            source_maps: false,
            import_map: None,
        }
    }
}

/// `[bundle]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct BundleConfig {
    /// External bundler command. `{entry}` and `{output}` placeholders are
    /// substituted before invocation. Empty = bundling disabled.
    pub command: Vec<String>,
}

impl BundleConfig {
    /// Whether a bundler command is configured.
    pub fn enabled(&self) -> bool {
        !self.command.is_empty()
    }
}

/// `[serve]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    /// HTTP port for the artifact server.
    pub port: u16,

    /// WebSocket port for hot reload. 0 = HTTP port + 1.
    pub ws_port: u16,

    /// Enable file watching for incremental recompilation.
    pub watch: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            ws_port: 0,
            watch: true,
        }
    }
}

impl ServeConfig {
    /// Effective WebSocket port.
    pub fn effective_ws_port(&self) -> u16 {
        if self.ws_port == 0 {
            self.port.saturating_add(1)
        } else {
            self.ws_port
        }
    }
}

impl KilnConfig {
    /// Load configuration from CLI arguments.
    ///
    /// Searches upward from cwd to find the config file. The project root is
    /// determined by the config file's parent directory.
    pub fn load(cli: &Cli) -> Result<Self> {
        let Some(config_path) = find_config_file(&cli.config) else {
            log!(
                "error";
                "Config file '{}' not found in this directory or any parent.",
                cli.config.display()
            );
            std::process::exit(1);
        };

        let mut config = Self::from_path(&config_path)?;

        config.root = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.config_path = config_path;
        config.validate()?;

        Ok(config)
    }

    /// Load config directly from a file path (tests and library callers).
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;

        let (mut config, ignored) = Self::parse_with_ignored(&content)?;

        if !ignored.is_empty() {
            log!("warning"; "unknown fields in {}, ignoring:", path.display());
            for field in &ignored {
                eprintln!("- {}", field);
            }
        }

        config.config_path = path.to_path_buf();
        config.root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    /// Parse TOML content, collecting any unknown fields.
    fn parse_with_ignored(content: &str) -> Result<(Self, Vec<String>)> {
        let mut ignored = Vec::new();
        let deserializer = toml::Deserializer::new(content);
        let config = serde_ignored::deserialize(deserializer, |path: serde_ignored::Path| {
            ignored.push(path.to_string());
        })
        .map_err(ConfigError::Toml)?;
        Ok((config, ignored))
    }

    /// Validate the loaded configuration.
    fn validate(&self) -> Result<()> {
        if !self.src_dir().is_dir() {
            bail!(
                "source root '{}' does not exist",
                self.src_dir().display()
            );
        }
        if self.build.pages.is_empty() || self.build.pages.contains('/') {
            bail!("[build] pages must be a plain directory name");
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Derived paths
    // ------------------------------------------------------------------------

    /// Absolute source root directory.
    pub fn src_dir(&self) -> PathBuf {
        self.root.join(&self.build.src)
    }

    /// Absolute pages directory.
    pub fn pages_dir(&self) -> PathBuf {
        self.src_dir().join(&self.build.pages)
    }

    /// Absolute output directory for production builds.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(&self.build.output)
    }

    /// Absolute build-cache directory.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join(CACHE_DIR)
    }

    /// Absolute directory holding compiled module artifacts + meta records.
    pub fn modules_dir(&self) -> PathBuf {
        self.cache_dir().join("modules")
    }

    /// Absolute import map path, if configured and present.
    pub fn import_map_path(&self) -> Option<PathBuf> {
        let path = match &self.build.import_map {
            Some(p) => self.src_dir().join(p),
            None => self.src_dir().join("import_map.json"),
        };
        path.is_file().then_some(path)
    }
}

/// Search upward from cwd for the config file.
fn find_config_file(name: &Path) -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}
