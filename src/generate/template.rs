//! Template Rendering
//!
//! Thin wrapper over minijinja used for every generated text artifact.
//! Templates are rendered with strict undefined handling, trimmed block
//! tags and these filters:
//! - `basename`: last path component
//! - `dquote`: escape for a bash double-quoted string
//! - `xml`: escape for XML attribute values

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use crate::error::Result;

/// Template engine shared by the script, catalog and graph generators.
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_keep_trailing_newline(true);

        env.add_filter("basename", basename);
        env.add_filter("dquote", dquote);
        env.add_filter("xml", xml_escape);

        Self { env }
    }

    /// Renders `template` with `model` as context.
    pub fn render<S: Serialize>(&self, template: &str, model: S) -> Result<String> {
        Ok(self.env.render_str(template, model)?)
    }
}

/// Last component of a `/` separated path.
pub fn basename(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Escapes text for use inside `"..."` in bash.
pub fn dquote(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Escapes text for use inside an XML attribute.
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
