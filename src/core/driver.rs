//! Build mode configuration for production/development builds.

/// Build mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildMode {
    /// Whether compiled output is minified (styles now, bundles later).
    pub minify: bool,

    /// Whether hot-module-replacement metadata is emitted.
    pub hmr: bool,
}

impl BuildMode {
    /// Production mode: minified output, no HMR wiring.
    pub const PRODUCTION: Self = Self {
        minify: true,
        hmr: false,
    };

    /// Development mode: fast output with hot reload support.
    pub const DEVELOPMENT: Self = Self {
        minify: false,
        hmr: true,
    };

    /// Check if this is development mode.
    #[inline]
    pub const fn is_dev(&self) -> bool {
        self.hmr
    }
}
