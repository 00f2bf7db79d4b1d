//! Markdown loader.
//!
//! Parses optional TOML front matter (between `---` fences), renders the body
//! to HTML with pulldown-cmark, and synthesizes a JS module exporting the
//! rendered page plus a mount hook that intercepts same-origin anchor clicks
//! for client-side navigation.

use pulldown_cmark::{Options, Parser, html};

use super::js_string;

/// Markdown extension switches.
#[derive(Debug, Clone)]
pub struct MarkdownOptions {
    pub tables: bool,
    pub footnotes: bool,
    pub strikethrough: bool,
    pub task_lists: bool,
    pub heading_attributes: bool,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            tables: true,
            footnotes: true,
            strikethrough: true,
            task_lists: true,
            heading_attributes: true,
        }
    }
}

impl MarkdownOptions {
    fn to_pulldown_options(&self) -> Options {
        let mut opts = Options::empty();
        if self.tables {
            opts.insert(Options::ENABLE_TABLES);
        }
        if self.footnotes {
            opts.insert(Options::ENABLE_FOOTNOTES);
        }
        if self.strikethrough {
            opts.insert(Options::ENABLE_STRIKETHROUGH);
        }
        if self.task_lists {
            opts.insert(Options::ENABLE_TASKLISTS);
        }
        if self.heading_attributes {
            opts.insert(Options::ENABLE_HEADING_ATTRIBUTES);
        }
        opts
    }
}

/// Split front matter from the markdown body.
///
/// Front matter is a TOML block between `---` fences at the very start.
fn split_front_matter(source: &str) -> (Option<&str>, &str) {
    let Some(rest) = source.strip_prefix("---\n") else {
        return (None, source);
    };
    if let Some(idx) = rest.find("\n---\n") {
        return (Some(&rest[..idx]), &rest[idx + 5..]);
    }
    if let Some(stripped) = rest.strip_suffix("\n---")
        && !stripped.contains("\n---\n")
    {
        return (Some(stripped), "");
    }
    (None, source)
}

/// Render markdown body to HTML.
fn render_html(body: &str, options: &MarkdownOptions) -> String {
    let parser = Parser::new_ext(body, options.to_pulldown_options());
    let mut out = String::with_capacity(body.len() * 2);
    html::push_html(&mut out, parser);
    out
}

/// Front matter as a JSON object literal (`{}` when absent or malformed).
fn meta_json(front_matter: Option<&str>) -> String {
    let Some(raw) = front_matter else {
        return "{}".to_string();
    };
    match raw.parse::<toml::Value>() {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string()),
        Err(_) => "{}".to_string(),
    }
}

/// Synthesize the JS module for a markdown source.
pub fn synthesize(id: &str, source: &str) -> String {
    let (front_matter, body) = split_front_matter(source);
    let html = render_html(body, &MarkdownOptions::default());
    let meta = meta_json(front_matter);
    let id_lit = js_string(id);
    let html_lit = js_string(&html);

    format!(
        r#"const html = {html_lit};
export const meta = {meta};
export default {{
  url: {id_lit},
  html,
  meta,
  mount(el) {{
    el.innerHTML = html;
    for (const a of el.querySelectorAll("a[href^='/']")) {{
      a.addEventListener("click", (e) => {{
        e.preventDefault();
        window.__KILN.navigate(a.getAttribute("href"));
      }});
    }}
  }},
}};
"#
    )
}
