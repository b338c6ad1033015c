//! Informational pages
//!
//! - GET / redirects to the login form
//! - GET /menu, /fase1, /fase2 (session required)

use axum::{
    extract::State,
    response::{Redirect, Response},
    routing::get,
    Router,
};

use super::flash::Flash;
use super::middleware::{AppState, AuthenticatedAccount};
use super::responses::Page;

pub fn public_router() -> Router<AppState> {
    Router::new().route("/", get(|| async { Redirect::to("/login") }))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/menu", get(menu))
        .route("/fase1", get(fase1))
        .route("/fase2", get(fase2))
}

async fn menu(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    flash: Flash,
) -> Response {
    Page::new("menu.html")
        .account(&account)
        .flash(flash)
        .render(&state.theme_engine)
}

async fn fase1(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
) -> Response {
    Page::new("fase1.html")
        .account(&account)
        .render(&state.theme_engine)
}

async fn fase2(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
) -> Response {
    Page::new("fase2.html")
        .account(&account)
        .render(&state.theme_engine)
}
