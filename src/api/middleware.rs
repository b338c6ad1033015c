//! Web middleware
//!
//! Contains:
//! - Shared application state
//! - Session cookie handling and the `require_auth` guard
//! - The error type returned by page handlers

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{Html, IntoResponse, Redirect, Response},
};
use std::sync::Arc;

use crate::classifier::InferenceService;
use crate::config::{Config, UploadConfig};
use crate::db::repositories::{SqlxAccountRepository, SqlxSessionRepository, SqlxUploadRepository};
use crate::db::DynDatabasePool;
use crate::models::Account;
use crate::services::{AccountService, UploadService};
use crate::theme::ThemeEngine;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub account_service: Arc<AccountService>,
    pub upload_service: Arc<UploadService>,
    pub inference: Arc<InferenceService>,
    pub theme_engine: Arc<ThemeEngine>,
    pub upload_config: Arc<UploadConfig>,
    /// Session lifetime, used for the cookie's Max-Age
    pub session_days: i64,
}

impl AppState {
    /// Wire the services for `config` on top of `pool`
    pub fn new(pool: DynDatabasePool, config: &Config, theme_engine: ThemeEngine) -> Self {
        let account_service = AccountService::with_session_expiration(
            SqlxAccountRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
            config.auth.session_days,
        );
        let upload_service =
            UploadService::new(SqlxUploadRepository::boxed(pool.clone()), &config.upload.path);

        Self {
            pool,
            account_service: Arc::new(account_service),
            upload_service: Arc::new(upload_service),
            inference: Arc::new(InferenceService::new(&config.model.path)),
            theme_engine: Arc::new(theme_engine),
            upload_config: Arc::new(config.upload.clone()),
            session_days: config.auth.session_days,
        }
    }
}

/// Account of the logged-in client, inserted by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthenticatedAccount(pub Account);

/// Infrastructure failure while serving a page.
///
/// Rendered as a 500 page; the cause is logged, not shown.
#[derive(Debug)]
pub struct WebError(anyhow::Error);

impl WebError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self(anyhow::anyhow!(message.into()))
    }
}

impl<E> From<E> for WebError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        tracing::error!("Request failed: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(crate::theme::simple_error_page(
                "Ocurrió un error inesperado. Inténtalo de nuevo más tarde.",
            )),
        )
            .into_response()
    }
}

/// Read a cookie by name from request headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value opening a session
pub fn session_cookie(token: &str, days: i64) -> HeaderValue {
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        days.saturating_mul(24 * 60 * 60)
    );
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| clear_session_cookie())
}

/// `Set-Cookie` value removing the session
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Authentication middleware
///
/// Requests without a valid session are redirected to `/login` before the
/// handler runs.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, WebError> {
    let Some(token) = read_cookie(request.headers(), SESSION_COOKIE) else {
        return Ok(Redirect::to("/login").into_response());
    };

    let account = state
        .account_service
        .validate_session(&token)
        .await
        .map_err(|e| WebError::internal(format!("Session validation failed: {}", e)))?;

    match account {
        Some(account) => {
            request.extensions_mut().insert(AuthenticatedAccount(account));
            Ok(next.run(request).await)
        }
        None => {
            tracing::debug!("Rejected stale session on {}", request.uri().path());
            let mut response = Redirect::to("/login").into_response();
            response
                .headers_mut()
                .insert(header::SET_COOKIE, clear_session_cookie());
            Ok(response)
        }
    }
}

impl<S> FromRequestParts<S> for AuthenticatedAccount
where
    S: Send + Sync,
{
    type Rejection = Redirect;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedAccount>()
            .cloned()
            .ok_or_else(|| Redirect::to("/login"))
    }
}
