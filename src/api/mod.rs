//! Web layer - HTTP handlers and routing
//!
//! Server-rendered pages for the account workflow and the upload panel, a
//! small JSON listing, and static serving of stored uploads.

pub mod auth;
pub mod flash;
pub mod middleware;
pub mod pages;
pub mod responses;
pub mod upload;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware as axum_middleware,
    response::{Html, IntoResponse, Response},
    Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::models::UPLOADS_URL_PREFIX;

pub use middleware::{AppState, AuthenticatedAccount, WebError};

/// Build the page routes
pub fn build_routes(state: AppState) -> Router<AppState> {
    // Protected routes (need a session)
    let protected_routes = Router::new()
        .merge(pages::protected_router())
        .merge(upload::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .merge(pages::public_router())
        .merge(auth::public_router())
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let uploads = ServeDir::new(&state.upload_config.path);
    let body_limit = usize::try_from(state.upload_config.max_file_size).unwrap_or(usize::MAX);

    build_routes(state.clone())
        .nest_service(UPLOADS_URL_PREFIX, uploads)
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found(State(state): State<AppState>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(state.theme_engine.error_page("Página no encontrada.")),
    )
        .into_response()
}

#[cfg(test)]
mod tests;
