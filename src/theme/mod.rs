//! Template engine
//!
//! HTML pages are Tera templates compiled into the binary from the
//! `templates/` directory. `base.html` is registered first so every page can
//! extend it.

use anyhow::Result;
use rust_embed::RustEmbed;
use std::collections::HashMap;
use std::error::Error as StdError;
use tera::{Context as TeraContext, Tera, Value};

use crate::models::upload_url;

mod error;

pub use error::ThemeError;

#[derive(RustEmbed)]
#[folder = "templates/"]
#[include = "*.html"]
struct EmbeddedTemplates;

/// Renders the application's pages
pub struct ThemeEngine {
    tera: Tera,
}

impl ThemeEngine {
    /// Load the embedded templates.
    pub fn new() -> Result<Self> {
        let mut templates = Vec::new();
        for name in EmbeddedTemplates::iter() {
            let file = EmbeddedTemplates::get(&name)
                .ok_or_else(|| ThemeError::NotFound(name.to_string()))?;
            let content = String::from_utf8(file.data.into_owned())
                .map_err(|_| ThemeError::Encoding(name.to_string()))?;
            templates.push((name.to_string(), content));
        }

        let engine = Self::from_templates(templates)?;
        tracing::debug!("Loaded {} templates", engine.tera.get_template_names().count());
        Ok(engine)
    }

    /// Build an engine from `(name, source)` pairs.
    pub fn from_templates<I, N, S>(templates: I) -> Result<Self>
    where
        I: IntoIterator<Item = (N, S)>,
        N: Into<String>,
        S: Into<String>,
    {
        let mut templates: Vec<(String, String)> = templates
            .into_iter()
            .map(|(n, s)| (n.into(), s.into()))
            .collect();

        // Base templates first
        templates.sort_by(|a, b| {
            let a_is_base = a.0 == "base.html" || a.0.ends_with("/base.html");
            let b_is_base = b.0 == "base.html" || b.0.ends_with("/base.html");
            b_is_base.cmp(&a_is_base).then_with(|| a.0.cmp(&b.0))
        });

        let mut tera = Tera::default();
        tera.register_filter("upload_url", upload_url_filter);
        for (name, content) in &templates {
            tera.add_raw_template(name, content).map_err(|e| {
                ThemeError::TemplateError(format!("Failed to add template {}: {}", name, error_chain(&e)))
            })?;
        }

        tera.build_inheritance_chains().map_err(|e| {
            ThemeError::TemplateError(format!("Failed to build template inheritance: {}", e))
        })?;

        Ok(Self { tera })
    }

    pub fn has_template(&self, template: &str) -> bool {
        self.tera.get_template_names().any(|name| name == template)
    }

    /// Render a template with context
    pub fn render(&self, template: &str, context: &TeraContext) -> Result<String> {
        if !self.has_template(template) {
            return Err(ThemeError::NotFound(template.to_string()).into());
        }

        self.tera.render(template, context).map_err(|e| {
            ThemeError::TemplateError(format!("Failed to render '{}': {}", template, error_chain(&e)))
                .into()
        })
    }

    /// Render a template, falling back to `error.html` and then to a plain
    /// page when that fails too.
    pub fn render_with_fallback(&self, template: &str, context: &TeraContext) -> String {
        match self.render(template, context) {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("Failed to render template '{}': {}", template, e);
                self.error_page(&e.to_string())
            }
        }
    }

    /// The generic error page
    pub fn error_page(&self, message: &str) -> String {
        let mut context = TeraContext::new();
        context.insert("error_message", message);

        match self.render("error.html", &context) {
            Ok(html) => html,
            Err(e) => {
                tracing::warn!("Failed to render error template: {}", e);
                simple_error_page(message)
            }
        }
    }
}

/// `{{ name | upload_url }}`: served URL of a stored upload
fn upload_url_filter(value: &Value, _: &HashMap<String, Value>) -> tera::Result<Value> {
    let name = value
        .as_str()
        .ok_or_else(|| tera::Error::msg("upload_url expects a stored file name"))?;
    Ok(Value::String(upload_url(name)))
}

fn error_chain(e: &tera::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        message.push_str(&format!("\n  Caused by: {}", s));
        source = s.source();
    }
    message
}

/// Plain error page, used when no template can be rendered
pub fn simple_error_page(error: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
    <meta charset="UTF-8">
    <title>Error</title>
</head>
<body>
    <h1>Error interno</h1>
    <p>{}</p>
</body>
</html>"#,
        tera::escape_html(error)
    )
}
