//! Structural ES module scanner.
//!
//! Discovers static imports, re-exports and dynamic `import()` calls with
//! exact byte spans, and lifts `css`-tagged template literals into the
//! inline-style side channel. Surrounding code is emitted untouched, so the
//! scanner is also the identity transpiler for plain JS.
//!
//! String, template, comment and regex contexts are tracked so specifier-like
//! text inside them is never misread as an import edge.

use std::collections::BTreeMap;

use super::{
    DiscoveredImport, InlineStyle, TranspileError, TranspileOptions, TranspileOutput, Transpiler,
    style_placeholder,
};
use crate::hashing::compute_hash;

/// Default transpiler: structural scan, no lowering.
pub struct EsScanner;

impl Transpiler for EsScanner {
    fn transpile(
        &self,
        source: &str,
        _options: &TranspileOptions<'_>,
    ) -> Result<TranspileOutput, TranspileError> {
        Ok(scan(source))
    }
}

/// Scan a source text for import edges and inline styles.
pub fn scan(source: &str) -> TranspileOutput {
    Scanner::new(source).run()
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    i: usize,
    out: String,
    deps: Vec<DiscoveredImport>,
    styles: BTreeMap<String, InlineStyle>,
    /// Last significant (non-trivia) byte emitted. 0 at start of input.
    last_significant: u8,
    /// Last identifier word emitted (for regex-vs-division and `from`).
    last_word: String,
}

#[inline]
fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

#[inline]
fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Length of the UTF-8 sequence starting with this byte.
#[inline]
fn utf8_len(b: u8) -> usize {
    if b >= 0xF0 {
        4
    } else if b >= 0xE0 {
        3
    } else if b >= 0xC0 {
        2
    } else {
        1
    }
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            i: 0,
            out: String::with_capacity(src.len()),
            deps: Vec::new(),
            styles: BTreeMap::new(),
            last_significant: 0,
            last_word: String::new(),
        }
    }

    fn run(mut self) -> TranspileOutput {
        while self.i < self.bytes.len() {
            let b = self.bytes[self.i];
            match b {
                b'/' => self.handle_slash(),
                b'"' | b'\'' => self.copy_string(b),
                b'`' => self.copy_template(),
                _ if is_ident_start(b) => self.handle_word(),
                _ if b.is_ascii_whitespace() => {
                    self.out.push(b as char);
                    self.i += 1;
                }
                _ => self.copy_char(b),
            }
        }

        TranspileOutput {
            code: self.out,
            map: None,
            deps: self.deps,
            inline_styles: self.styles,
        }
    }

    // ------------------------------------------------------------------------
    // Byte plumbing
    // ------------------------------------------------------------------------

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.i).copied()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.i + 1).copied()
    }

    /// Copy one char (possibly multi-byte) and mark it significant.
    fn copy_char(&mut self, b: u8) {
        let len = utf8_len(b);
        let end = (self.i + len).min(self.src.len());
        self.out.push_str(&self.src[self.i..end]);
        self.i = end;
        if b < 0x80 {
            self.last_significant = b;
            self.last_word.clear();
        }
    }

    fn push_byte(&mut self, b: u8) {
        self.out.push(b as char);
        self.i += 1;
        self.last_significant = b;
        self.last_word.clear();
    }

    /// Copy whitespace and comments without touching significance state.
    fn skip_trivia(&mut self) {
        while let Some(b) = self.current() {
            if b.is_ascii_whitespace() {
                self.out.push(b as char);
                self.i += 1;
            } else if b == b'/' && matches!(self.peek(), Some(b'/')) {
                self.copy_line_comment();
            } else if b == b'/' && matches!(self.peek(), Some(b'*')) {
                self.copy_block_comment();
            } else {
                return;
            }
        }
    }

    // ------------------------------------------------------------------------
    // Comments and regex
    // ------------------------------------------------------------------------

    fn handle_slash(&mut self) {
        match self.peek() {
            Some(b'/') => self.copy_line_comment(),
            Some(b'*') => self.copy_block_comment(),
            _ if self.regex_allowed() => self.copy_regex(),
            _ => self.push_byte(b'/'),
        }
    }

    fn copy_line_comment(&mut self) {
        while let Some(b) = self.current() {
            if b == b'\n' {
                return;
            }
            let len = utf8_len(b);
            let end = (self.i + len).min(self.src.len());
            self.out.push_str(&self.src[self.i..end]);
            self.i = end;
        }
    }

    fn copy_block_comment(&mut self) {
        // "/*" prefix
        self.out.push_str("/*");
        self.i += 2;
        while let Some(b) = self.current() {
            if b == b'*' && matches!(self.peek(), Some(b'/')) {
                self.out.push_str("*/");
                self.i += 2;
                return;
            }
            let len = utf8_len(b);
            let end = (self.i + len).min(self.src.len());
            self.out.push_str(&self.src[self.i..end]);
            self.i = end;
        }
    }

    /// Whether a `/` here starts a regex literal rather than division.
    fn regex_allowed(&self) -> bool {
        match self.last_significant {
            0 | b'(' | b',' | b'=' | b':' | b'[' | b'!' | b'&' | b'|' | b'?' | b'{' | b'}'
            | b';' | b'<' | b'>' | b'+' | b'-' | b'*' | b'%' | b'^' | b'~' => true,
            _ => matches!(
                self.last_word.as_str(),
                "return"
                    | "typeof"
                    | "case"
                    | "in"
                    | "of"
                    | "new"
                    | "delete"
                    | "void"
                    | "instanceof"
                    | "do"
                    | "else"
                    | "yield"
                    | "await"
            ),
        }
    }

    fn copy_regex(&mut self) {
        self.out.push('/');
        self.i += 1;
        let mut in_class = false;
        while let Some(b) = self.current() {
            match b {
                b'\\' => {
                    let end = (self.i + 1 + self.peek().map_or(0, utf8_len)).min(self.src.len());
                    self.out.push_str(&self.src[self.i..end]);
                    self.i = end;
                }
                b'[' => {
                    in_class = true;
                    self.out.push('[');
                    self.i += 1;
                }
                b']' => {
                    in_class = false;
                    self.out.push(']');
                    self.i += 1;
                }
                b'/' if !in_class => {
                    self.out.push('/');
                    self.i += 1;
                    // flags
                    while let Some(f) = self.current() {
                        if is_ident_char(f) {
                            self.out.push(f as char);
                            self.i += 1;
                        } else {
                            break;
                        }
                    }
                    self.last_significant = b'/';
                    self.last_word.clear();
                    return;
                }
                b'\n' => return, // not a regex after all; resume normally
                _ => {
                    let len = utf8_len(b);
                    let end = (self.i + len).min(self.src.len());
                    self.out.push_str(&self.src[self.i..end]);
                    self.i = end;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Strings and templates
    // ------------------------------------------------------------------------

    fn copy_string(&mut self, quote: u8) {
        self.out.push(quote as char);
        self.i += 1;
        while let Some(b) = self.current() {
            if b == b'\\' {
                let end = (self.i + 1 + self.peek().map_or(0, utf8_len)).min(self.src.len());
                self.out.push_str(&self.src[self.i..end]);
                self.i = end;
                continue;
            }
            if b == quote {
                self.out.push(quote as char);
                self.i += 1;
                break;
            }
            if b == b'\n' {
                break; // unterminated
            }
            let len = utf8_len(b);
            let end = (self.i + len).min(self.src.len());
            self.out.push_str(&self.src[self.i..end]);
            self.i = end;
        }
        self.last_significant = quote;
        self.last_word.clear();
    }

    fn copy_template(&mut self) {
        self.out.push('`');
        self.i += 1;
        while let Some(b) = self.current() {
            match b {
                b'\\' => {
                    let end = (self.i + 1 + self.peek().map_or(0, utf8_len)).min(self.src.len());
                    self.out.push_str(&self.src[self.i..end]);
                    self.i = end;
                }
                b'`' => {
                    self.out.push('`');
                    self.i += 1;
                    self.last_significant = b'`';
                    self.last_word.clear();
                    return;
                }
                b'$' if matches!(self.peek(), Some(b'{')) => {
                    self.out.push_str("${");
                    self.i += 2;
                    self.copy_interpolation();
                }
                _ => {
                    let len = utf8_len(b);
                    let end = (self.i + len).min(self.src.len());
                    self.out.push_str(&self.src[self.i..end]);
                    self.i = end;
                }
            }
        }
    }

    /// Copy a `${ ... }` interpolation body, honoring nested contexts.
    fn copy_interpolation(&mut self) {
        let mut depth = 1usize;
        while let Some(b) = self.current() {
            match b {
                b'{' => {
                    self.out.push('{');
                    self.i += 1;
                    depth += 1;
                }
                b'}' => {
                    self.out.push('}');
                    self.i += 1;
                    depth -= 1;
                    if depth == 0 {
                        return;
                    }
                }
                b'"' | b'\'' => self.copy_string(b),
                b'`' => self.copy_template(),
                b'/' => self.handle_slash(),
                _ => {
                    let len = utf8_len(b);
                    let end = (self.i + len).min(self.src.len());
                    self.out.push_str(&self.src[self.i..end]);
                    self.i = end;
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Words, imports, exports, inline styles
    // ------------------------------------------------------------------------

    fn handle_word(&mut self) {
        let start = self.i;
        let mut j = self.i;
        while j < self.bytes.len() && is_ident_char(self.bytes[j]) {
            j += 1;
        }
        let word = &self.src[start..j];
        let standalone = (start == 0 || !is_ident_char(self.bytes[start - 1]))
            && self.last_significant != b'.';

        if standalone {
            match word {
                "import" => {
                    self.emit_word(start, j);
                    self.handle_import();
                    return;
                }
                "export" => {
                    self.emit_word(start, j);
                    self.handle_export();
                    return;
                }
                "css" if j < self.bytes.len() && self.bytes[j] == b'`' => {
                    self.i = j;
                    self.handle_inline_style();
                    return;
                }
                _ => {}
            }
        }

        self.emit_word(start, j);
    }

    fn emit_word(&mut self, start: usize, end: usize) {
        let word = &self.src[start..end];
        self.out.push_str(word);
        self.last_word = word.to_string();
        self.last_significant = self.bytes[end - 1];
        self.i = end;
    }

    fn handle_import(&mut self) {
        self.skip_trivia();
        match self.current() {
            Some(b'(') => {
                self.push_byte(b'(');
                self.skip_trivia();
                if let Some(q @ (b'"' | b'\'')) = self.current() {
                    self.record_specifier(q, true);
                }
                // Non-literal argument: expression import, nothing to rewrite.
            }
            Some(q @ (b'"' | b'\'')) => self.record_specifier(q, false), // side-effect import
            Some(b'.') => {} // import.meta
            _ => self.scan_from_clause(),
        }
    }

    fn handle_export(&mut self) {
        self.skip_trivia();
        match self.current() {
            // Only `export { ... } from` / `export * from` carry specifiers.
            Some(b'{') | Some(b'*') => self.scan_from_clause(),
            _ => {}
        }
    }

    /// Copy an import/export clause until its `from "specifier"` or `;`.
    fn scan_from_clause(&mut self) {
        let mut depth = 0usize;
        while let Some(b) = self.current() {
            match b {
                b';' => {
                    self.push_byte(b';');
                    return;
                }
                b'{' => {
                    self.push_byte(b'{');
                    depth += 1;
                }
                b'}' => {
                    self.push_byte(b'}');
                    depth = depth.saturating_sub(1);
                }
                b'/' => self.handle_slash(),
                b'"' | b'\'' => {
                    if depth == 0 && self.last_word == "from" {
                        self.record_specifier(b, false);
                    } else {
                        self.copy_string(b);
                    }
                    return;
                }
                b'`' => {
                    self.copy_template();
                    return;
                }
                _ if is_ident_start(b) => {
                    let start = self.i;
                    let mut j = self.i;
                    while j < self.bytes.len() && is_ident_char(self.bytes[j]) {
                        j += 1;
                    }
                    self.emit_word(start, j);
                }
                _ if b.is_ascii_whitespace() => {
                    self.out.push(b as char);
                    self.i += 1;
                }
                _ => self.copy_char(b),
            }
        }
    }

    /// Copy a quoted specifier, recording its span in the emitted code.
    fn record_specifier(&mut self, quote: u8, is_dynamic: bool) {
        self.out.push(quote as char);
        self.i += 1;

        let content_start = self.out.len();
        while let Some(b) = self.current() {
            if b == quote || b == b'\n' {
                break;
            }
            let step = if b == b'\\' {
                1 + self.peek().map_or(0, utf8_len)
            } else {
                utf8_len(b)
            };
            let end = (self.i + step).min(self.src.len());
            self.out.push_str(&self.src[self.i..end]);
            self.i = end;
        }

        let specifier = self.out[content_start..].to_string();
        self.deps.push(DiscoveredImport {
            len: self.out.len() - content_start,
            start: content_start,
            specifier,
            is_dynamic,
        });

        if self.current() == Some(quote) {
            self.out.push(quote as char);
            self.i += 1;
        }
        self.last_significant = quote;
        self.last_word.clear();
    }

    /// Lift a `css`-tagged template into the inline-style side channel.
    ///
    /// The tag and template are replaced by a placeholder string literal the
    /// engine later splices compiled style text into.
    fn handle_inline_style(&mut self) {
        let template_start = self.i;
        let (quasis, exprs, end) = parse_template_parts(self.src, self.i);
        let raw = &self.src[template_start..end];
        let key = compute_hash(raw.as_bytes()).short();

        self.styles.insert(
            key.clone(),
            InlineStyle {
                kind: "css".to_string(),
                quasis,
                exprs,
            },
        );
        self.out.push_str(&style_placeholder(&key));
        self.i = end;
        self.last_significant = b'"';
        self.last_word.clear();
    }
}

/// Split a template literal (starting at its backtick) into quasis + exprs.
///
/// Returns the pieces plus the index just past the closing backtick.
fn parse_template_parts(src: &str, start: usize) -> (Vec<String>, Vec<String>, usize) {
    let bytes = src.as_bytes();
    let mut quasis = Vec::new();
    let mut exprs = Vec::new();
    let mut i = start + 1;
    let mut quasi_start = i;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 1 + bytes.get(i + 1).map_or(0, |b| utf8_len(*b));
            }
            b'`' => {
                quasis.push(src[quasi_start..i].to_string());
                return (quasis, exprs, i + 1);
            }
            b'$' if bytes.get(i + 1) == Some(&b'{') => {
                quasis.push(src[quasi_start..i].to_string());
                i += 2;
                let expr_start = i;
                let mut depth = 1usize;
                while i < bytes.len() && depth > 0 {
                    match bytes[i] {
                        b'{' => {
                            depth += 1;
                            i += 1;
                        }
                        b'}' => {
                            depth -= 1;
                            i += 1;
                        }
                        b'"' | b'\'' => i = skip_plain_string(bytes, i),
                        b'\\' => i += 1 + bytes.get(i + 1).map_or(0, |b| utf8_len(*b)),
                        b => i += utf8_len(b),
                    }
                }
                exprs.push(src[expr_start..i.saturating_sub(1)].to_string());
                quasi_start = i;
            }
            b => i += utf8_len(b),
        }
    }

    quasis.push(src[quasi_start..i.min(src.len())].to_string());
    (quasis, exprs, i.min(src.len()))
}

/// Index just past the closing quote of a plain string literal.
fn skip_plain_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1 + bytes.get(i + 1).map_or(0, |b| utf8_len(*b)),
            b if b == quote => return i + 1,
            b'\n' => return i,
            b => i += utf8_len(b),
        }
    }
    i
}
