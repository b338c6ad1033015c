//! One-shot flash messages
//!
//! A message survives exactly one redirect: it is written to the `flash`
//! cookie by [`flash_redirect`] and consumed by the next rendered page.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue},
    response::{IntoResponse, Redirect, Response},
};
use std::convert::Infallible;

use super::middleware::read_cookie;

pub const FLASH_COOKIE: &str = "flash";

/// Messages carried over from the previous request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flash(pub Vec<String>);

impl Flash {
    pub fn messages(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode the cookie value
    pub fn decode(value: &str) -> Self {
        let decoded = urlencoding::decode(value)
            .map(|s| s.into_owned())
            .unwrap_or_default();
        Self(
            decoded
                .split('\n')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Encode messages into a cookie value
    pub fn encode(messages: &[&str]) -> String {
        urlencoding::encode(&messages.join("\n")).into_owned()
    }
}

impl<S> FromRequestParts<S> for Flash
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(read_cookie(&parts.headers, FLASH_COOKIE)
            .map(|value| Flash::decode(&value))
            .unwrap_or_default())
    }
}

/// `Set-Cookie` value removing consumed messages
pub fn clear_flash_cookie() -> HeaderValue {
    HeaderValue::from_static("flash=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Redirect to `to`, showing `message` on the next page
pub fn flash_redirect(to: &str, message: &str) -> Response {
    let mut response = Redirect::to(to).into_response();
    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax",
        FLASH_COOKIE,
        Flash::encode(&[message])
    );
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}
