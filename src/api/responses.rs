//! Shared response types
//!
//! HTML pages go through [`Page`], which fills the context every template
//! expects (`usuario`, `mensajes`) before rendering.

use axum::{
    http::header,
    response::{Html, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tera::Context as TeraContext;

use super::flash::{clear_flash_cookie, Flash};
use crate::models::{Account, Upload};
use crate::theme::ThemeEngine;

/// A template plus its context
pub struct Page {
    template: &'static str,
    context: TeraContext,
    messages: Vec<String>,
    consumes_flash: bool,
}

impl Page {
    pub fn new(template: &'static str) -> Self {
        Self {
            template,
            context: TeraContext::new(),
            messages: Vec::new(),
            consumes_flash: false,
        }
    }

    /// Logged-in account shown in the navigation bar
    pub fn account(mut self, account: &Account) -> Self {
        self.context.insert("usuario", account);
        self
    }

    /// Show the carried-over messages and drop the flash cookie
    pub fn flash(mut self, flash: Flash) -> Self {
        if !flash.is_empty() {
            self.consumes_flash = true;
            self.messages.extend(flash.0);
        }
        self
    }

    /// Show a message on this page only
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.messages.push(message.into());
        self
    }

    pub fn insert<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Self {
        self.context.insert(key, value);
        self
    }

    pub fn render(mut self, theme: &ThemeEngine) -> Response {
        self.context.insert("mensajes", &self.messages);
        let html = theme.render_with_fallback(self.template, &self.context);

        let mut response = Html(html).into_response();
        if self.consumes_flash {
            response
                .headers_mut()
                .append(header::SET_COOKIE, clear_flash_cookie());
        }
        response
    }
}

/// Which uploads `/api/uploads` lists
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadScope {
    /// Uploads of the logged-in account
    #[default]
    Mine,
    /// Every upload in the system
    All,
}

/// Query parameters for `/api/uploads`
#[derive(Debug, Default, Deserialize)]
pub struct UploadListQuery {
    #[serde(default)]
    pub scope: UploadScope,
}

/// JSON listing of uploads, newest first
#[derive(Debug, Serialize)]
pub struct UploadListResponse {
    pub scope: UploadScope,
    pub total: usize,
    pub uploads: Vec<Upload>,
}

impl UploadListResponse {
    pub fn new(scope: UploadScope, uploads: Vec<Upload>) -> Self {
        Self {
            scope,
            total: uploads.len(),
            uploads,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn theme() -> ThemeEngine {
        ThemeEngine::from_templates([(
            "page.html",
            "{% for m in mensajes %}[{{ m }}]{% endfor %}{% if usuario %}{{ usuario.nombre }}{% endif %}",
        )])
        .unwrap()
    }

    async fn body(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_page_renders_flash_and_clears_cookie() {
        let response = Page::new("page.html")
            .flash(Flash(vec!["uno".into()]))
            .message("dos")
            .render(&theme());

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("flash=;"));
        assert_eq!(body(response).await, "[uno][dos]");
    }

    #[tokio::test]
    async fn test_page_without_flash_keeps_cookies() {
        let account = Account::new("Alice".into(), "a@example.com".into(), "hash".into());

        let response = Page::new("page.html").account(&account).render(&theme());

        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(body(response).await, "Alice");
    }

    #[test]
    fn test_upload_scope_query() {
        let query: UploadListQuery = serde_json::from_str(r#"{"scope":"all"}"#).unwrap();
        assert_eq!(query.scope, UploadScope::All);

        let query: UploadListQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.scope, UploadScope::Mine);
    }
}
