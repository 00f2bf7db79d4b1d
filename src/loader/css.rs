//! CSS/LESS loader.
//!
//! Style sources become JS modules whose body hands the css text to the
//! runtime `applyCSS(id, cssText)` helper. Development mode passes the style
//! text through byte-for-byte; production mode minifies with lightningcss.
//! LESS lowering is an external pre-processing step; LESS sources that are
//! plain CSS compile as-is.

use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};

use super::{LoaderError, js_string};
use crate::module::Loader;

/// Run the style pipeline for one module.
pub fn process(
    id: &str,
    source: &str,
    loader: &Loader,
    minify: bool,
) -> Result<String, LoaderError> {
    if !minify {
        return Ok(source.to_string());
    }
    if matches!(loader, Loader::Less) {
        // No in-process LESS lowering; minification would reject its syntax.
        return Ok(source.to_string());
    }
    minify_css(source).map_err(|message| LoaderError::Css {
        url: id.to_string(),
        message,
    })
}

/// Minify CSS source code.
pub fn minify_css(source: &str) -> Result<String, String> {
    let stylesheet =
        StyleSheet::parse(source, ParserOptions::default()).map_err(|e| e.to_string())?;
    let result = stylesheet
        .to_css(PrinterOptions {
            minify: true,
            ..PrinterOptions::default()
        })
        .map_err(|e| e.to_string())?;
    Ok(result.code)
}

/// Synthesize the JS module wrapping a processed stylesheet.
pub fn synthesize(id: &str, css: &str) -> String {
    let id_lit = js_string(id);
    let css_lit = js_string(css);
    format!(
        "window.__KILN.applyCSS({id_lit}, {css_lit});\nexport default {css_lit};\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_mode_passthrough() {
        let css = process("/a.css", "h1 { color : red }", &Loader::Css, false).unwrap();
        assert_eq!(css, "h1 { color : red }");
    }

    #[test]
    fn test_minify() {
        let css = minify_css("h1 {\n  color: red;\n}\n").unwrap();
        assert!(!css.contains('\n'));
        assert!(css.contains("h1"));
    }

    #[test]
    fn test_minify_rejects_garbage() {
        assert!(minify_css("h1 { color: ").is_err() || minify_css("@&!").is_err());
    }

    #[test]
    fn test_synthesize_shape() {
        let js = synthesize("/style/app.css", "h1{color:red}");
        assert!(js.contains(r#"window.__KILN.applyCSS("/style/app.css", "h1{color:red}")"#));
        assert!(js.contains("export default"));
    }

    #[test]
    fn test_less_not_minified() {
        let source = "@color: red;\nh1 { color: @color; }";
        let out = process("/a.less", source, &Loader::Less, true).unwrap();
        assert_eq!(out, source);
    }
}
