//! JavaScript minification for production bundles.
//!
//! Uses oxc (parse → compress + mangle → codegen).

use oxc::allocator::Allocator;
use oxc::codegen::{Codegen, CodegenOptions, CommentOptions};
use oxc::mangler::MangleOptions;
use oxc::minifier::{CompressOptions, Minifier, MinifierOptions};
use oxc::parser::Parser;
use oxc::span::SourceType;

/// Minify JavaScript source code.
///
/// Returns `None` when the source fails to parse; callers fall back to the
/// unminified text.
pub fn minify_js(source: &str) -> Option<String> {
    let allocator = Allocator::default();
    let source_type = SourceType::mjs();
    let ret = Parser::new(&allocator, source, source_type).parse();
    if !ret.errors.is_empty() {
        return None;
    }
    let mut program = ret.program;
    let options = MinifierOptions {
        mangle: Some(MangleOptions::default()),
        compress: Some(CompressOptions::smallest()),
    };
    let ret = Minifier::new(options).minify(&allocator, &mut program);
    let code = Codegen::new()
        .with_options(CodegenOptions {
            minify: true,
            comments: CommentOptions::disabled(),
            ..CodegenOptions::default()
        })
        .with_scoping(ret.scoping)
        .build(&program)
        .code;
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minify_strips_whitespace() {
        let out = minify_js("const answer = 1 + 2;\nexport default answer;\n").unwrap();
        assert!(out.len() < "const answer = 1 + 2;\nexport default answer;\n".len());
    }

    #[test]
    fn test_minify_rejects_invalid() {
        assert!(minify_js("const = ;;;").is_none());
    }
}
