//! Authentication pages
//!
//! - GET/POST /login
//! - GET/POST /registro (alias /register)
//! - GET /logout

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use serde::Deserialize;

use super::flash::{flash_redirect, Flash};
use super::middleware::{
    clear_session_cookie, read_cookie, session_cookie, AppState, WebError, SESSION_COOKIE,
};
use super::responses::Page;
use crate::services::{AccountServiceError, LoginInput, RegisterInput};

pub const LOGIN_FAILED: &str = "Correo o contraseña incorrectos.";
pub const EMAIL_TAKEN: &str = "El correo ya está registrado.";
pub const REGISTERED: &str = "Registro exitoso. Ahora inicia sesión.";
pub const LOGGED_OUT: &str = "Sesión cerrada correctamente.";

/// Login form fields
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub correo: String,
    #[serde(default, rename = "contraseña")]
    pub password: String,
}

/// Registration form fields
#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    #[serde(default)]
    pub nombre: String,
    #[serde(default)]
    pub correo: String,
    #[serde(default, rename = "contraseña")]
    pub password: String,
}

/// Routes reachable without a session
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route("/registro", get(register_page).post(register))
        .route("/register", get(register_page).post(register))
        .route("/logout", get(logout))
}

async fn login_page(State(state): State<AppState>, flash: Flash) -> Response {
    Page::new("login.html").flash(flash).render(&state.theme_engine)
}

async fn register_page(State(state): State<AppState>, flash: Flash) -> Response {
    Page::new("register.html").flash(flash).render(&state.theme_engine)
}

/// POST /login
async fn login(
    State(state): State<AppState>,
    Form(form): Form<LoginForm>,
) -> Result<Response, WebError> {
    match state
        .account_service
        .login(LoginInput::new(form.correo, form.password))
        .await
    {
        Ok(session) => {
            let mut response = Redirect::to("/menu").into_response();
            response.headers_mut().append(
                header::SET_COOKIE,
                session_cookie(&session.id, state.session_days),
            );
            Ok(response)
        }
        Err(AccountServiceError::AuthenticationError) => Ok(flash_redirect("/login", LOGIN_FAILED)),
        Err(e) => Err(e.into()),
    }
}

/// POST /registro
async fn register(
    State(state): State<AppState>,
    Form(form): Form<RegisterForm>,
) -> Result<Response, WebError> {
    let input = RegisterInput::new(form.nombre, form.correo, form.password);

    match state.account_service.register(input).await {
        Ok(_) => Ok(flash_redirect("/login", REGISTERED)),
        Err(AccountServiceError::EmailTaken(_)) => Ok(flash_redirect("/registro", EMAIL_TAKEN)),
        Err(AccountServiceError::ValidationError(message)) => {
            Ok(flash_redirect("/registro", &message))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /logout
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, WebError> {
    if let Some(token) = read_cookie(&headers, SESSION_COOKIE) {
        state.account_service.logout(&token).await?;
    }

    let mut response = flash_redirect("/login", LOGGED_OUT);
    response
        .headers_mut()
        .append(header::SET_COOKIE, clear_session_cookie());
    Ok(response)
}
