//! Router tests
//!
//! Drive the complete router with in-memory SQLite and a temporary upload
//! directory.

use super::*;
use crate::api::flash::Flash;
use crate::classifier::inference::tests::write_test_artifact;
use crate::classifier::{Variant, MULTICLASS_LABELS};
use crate::config::Config;
use crate::db::{create_test_pool, migrations};
use crate::models::PREDICTION_UNAVAILABLE;
use crate::theme::ThemeEngine;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use std::io::Cursor;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "tumorscan-test-boundary";

struct TestApp {
    router: Router,
    state: AppState,
    temp: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let temp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.upload.path = temp.path().join("uploads");
        config.model.path = temp.path().join("model.tar.gz");

        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let state = AppState::new(pool, &config, ThemeEngine::new().unwrap());

        Self {
            router: build_router(state.clone()),
            state,
            temp,
        }
    }

    fn install_model(&self) {
        write_test_artifact(self.state.inference.artifact_path(), Variant::Multiclass);
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str, session: Option<&str>) -> Response {
        let mut builder = Request::get(uri);
        if let Some(session) = session {
            builder = builder.header(header::COOKIE, format!("session={}", session));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let body = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap();
        self.send(request).await
    }

    async fn post_file(
        &self,
        uri: &str,
        session: Option<&str>,
        field: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Response {
        let disposition = format!("form-data; name=\"{field}\"; filename=\"{filename}\"");
        self.post_part(uri, session, &disposition, bytes).await
    }

    /// Post a multipart body holding one part with the given disposition
    async fn post_part(
        &self,
        uri: &str,
        session: Option<&str>,
        disposition: &str,
        bytes: &[u8],
    ) -> Response {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        let mut builder = Request::post(uri).header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        );
        if let Some(session) = session {
            builder = builder.header(header::COOKIE, format!("session={}", session));
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    /// Register and log in, returning the session token
    async fn login_as(&self, name: &str, email: &str, password: &str) -> String {
        let response = self
            .post_form(
                "/registro",
                &[("nombre", name), ("correo", email), ("contraseña", password)],
            )
            .await;
        assert_eq!(location(&response), "/login");

        let response = self
            .post_form("/login", &[("correo", email), ("contraseña", password)])
            .await;
        assert_eq!(location(&response), "/menu");
        cookie(&response, "session").expect("login sets a session cookie")
    }

    async fn upload_count(&self) -> usize {
        self.state.upload_service.list_all().await.unwrap().len()
    }
}

fn location(response: &Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

fn cookie(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, value)| *key == name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn flash_messages(response: &Response) -> Vec<String> {
    cookie(response, "flash")
        .map(|value| Flash::decode(&value).0)
        .unwrap_or_default()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn jpeg_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_fn(24, 20, |x, y| {
        image::Rgb([(x * 10) as u8, (y * 12) as u8, 128])
    });
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .unwrap();
    bytes
}

#[tokio::test]
async fn test_root_redirects_to_login() {
    let app = TestApp::new().await;

    let response = app.get("/", None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn test_protected_pages_require_session() {
    let app = TestApp::new().await;

    for uri in ["/menu", "/fase1", "/fase2", "/panel", "/index", "/api/uploads"] {
        let response = app.get(uri, None).await;
        assert_eq!(location(&response), "/login", "{} should redirect", uri);
    }

    let response = app.get("/menu", Some("not-a-session")).await;
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn test_unauthenticated_upload_creates_nothing() {
    let app = TestApp::new().await;

    let response = app
        .post_file("/panel", None, "archivo", "scan.jpg", &jpeg_bytes())
        .await;

    assert_eq!(location(&response), "/login");
    assert_eq!(app.upload_count().await, 0);
    assert!(!app.temp.path().join("uploads").exists());
}

#[tokio::test]
async fn test_register_login_and_menu() {
    let app = TestApp::new().await;
    let session = app.login_as("Alice", "alice@example.com", "secret").await;

    let response = app.get("/menu", Some(&session)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Bienvenido, Alice"));
}

#[tokio::test]
async fn test_registration_flashes_success() {
    let app = TestApp::new().await;

    let response = app
        .post_form(
            "/register",
            &[("nombre", "Bob"), ("correo", "bob@example.com"), ("contraseña", "pw")],
        )
        .await;

    assert_eq!(location(&response), "/login");
    assert_eq!(flash_messages(&response), [auth::REGISTERED]);
}

#[tokio::test]
async fn test_duplicate_email_is_rejected() {
    let app = TestApp::new().await;
    app.login_as("Alice", "alice@example.com", "secret").await;

    let response = app
        .post_form(
            "/registro",
            &[("nombre", "Other"), ("correo", "alice@example.com"), ("contraseña", "x")],
        )
        .await;

    assert_eq!(location(&response), "/registro");
    assert_eq!(flash_messages(&response), [auth::EMAIL_TAKEN]);
}

#[tokio::test]
async fn test_wrong_password_flashes_error() {
    let app = TestApp::new().await;
    app.login_as("Alice", "alice@example.com", "secret").await;

    let response = app
        .post_form("/login", &[("correo", "alice@example.com"), ("contraseña", "wrong")])
        .await;

    assert_eq!(location(&response), "/login");
    assert!(cookie(&response, "session").is_none());
    assert_eq!(flash_messages(&response), [auth::LOGIN_FAILED]);
}

#[tokio::test]
async fn test_flash_is_shown_and_cleared() {
    let app = TestApp::new().await;
    let flash = Flash::encode(&[auth::LOGIN_FAILED]);

    let response = app
        .send(
            Request::get("/login")
                .header(header::COOKIE, format!("flash={}", flash))
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    let cleared = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .any(|v| v.to_str().unwrap().starts_with("flash=;"));
    assert!(cleared);
    assert!(body_text(response).await.contains(auth::LOGIN_FAILED));
}

#[tokio::test]
async fn test_logout_ends_session() {
    let app = TestApp::new().await;
    let session = app.login_as("Alice", "alice@example.com", "secret").await;

    let response = app.get("/logout", Some(&session)).await;

    assert_eq!(location(&response), "/login");
    assert_eq!(flash_messages(&response), [auth::LOGGED_OUT]);
    let response = app.get("/menu", Some(&session)).await;
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn test_upload_and_predict_end_to_end() {
    let app = TestApp::new().await;
    app.install_model();
    let session = app.login_as("Alice", "alice@example.com", "secret").await;

    let response = app
        .post_file("/panel", Some(&session), "archivo", "scan.jpg", &jpeg_bytes())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains(upload::UPLOAD_DONE));
    assert!(MULTICLASS_LABELS.iter().any(|label| html.contains(&format!("{} (", label))));

    let uploads = app.state.upload_service.list_all().await.unwrap();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].stored_name.ends_with("_scan.jpg"));
    let prediction = uploads[0].prediction.as_deref().unwrap();
    assert!(MULTICLASS_LABELS.iter().any(|label| prediction.starts_with(label)));
}

#[tokio::test]
async fn test_new_upload_heads_the_history() {
    let app = TestApp::new().await;
    let session = app.login_as("Alice", "alice@example.com", "secret").await;

    app.post_file("/panel", Some(&session), "archivo", "first.jpg", &jpeg_bytes())
        .await;
    let response = app
        .post_file("/panel", Some(&session), "archivo", "second.jpg", &jpeg_bytes())
        .await;

    let html = body_text(response).await;
    assert!(html.find("_second.jpg").unwrap() < html.find("_first.jpg").unwrap());

    let response = app.get("/api/uploads", Some(&session)).await;
    let listing: serde_json::Value =
        serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(listing["total"], 2);
    let first = listing["uploads"][0]["nombre_archivo"].as_str().unwrap();
    assert!(first.ends_with("_second.jpg"));
}

#[tokio::test]
async fn test_upload_without_model_records_sentinel() {
    let app = TestApp::new().await;
    let session = app.login_as("Alice", "alice@example.com", "secret").await;

    let response = app
        .post_file("/panel", Some(&session), "archivo", "scan.jpg", &jpeg_bytes())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains(PREDICTION_UNAVAILABLE));
    let uploads = app.state.upload_service.list_all().await.unwrap();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].prediction.as_deref(), Some(PREDICTION_UNAVAILABLE));
}

#[tokio::test]
async fn test_empty_filename_is_rejected() {
    let app = TestApp::new().await;
    let session = app.login_as("Alice", "alice@example.com", "secret").await;

    let response = app
        .post_file("/panel", Some(&session), "archivo", "", b"")
        .await;

    assert_eq!(location(&response), "/panel");
    assert_eq!(flash_messages(&response), [upload::NO_IMAGE_SELECTED]);
    assert_eq!(app.upload_count().await, 0);
}

#[tokio::test]
async fn test_missing_field_is_rejected() {
    let app = TestApp::new().await;
    let session = app.login_as("Alice", "alice@example.com", "secret").await;

    let response = app
        .post_file("/panel", Some(&session), "otro", "scan.jpg", &jpeg_bytes())
        .await;

    assert_eq!(location(&response), "/panel");
    assert_eq!(flash_messages(&response), [upload::NO_IMAGE_UPLOADED]);
    assert_eq!(app.upload_count().await, 0);
}

#[tokio::test]
async fn test_text_field_is_not_a_file() {
    let app = TestApp::new().await;
    let session = app.login_as("Alice", "alice@example.com", "secret").await;

    let response = app
        .post_part("/panel", Some(&session), r#"form-data; name="archivo""#, b"scan.jpg")
        .await;

    assert_eq!(location(&response), "/panel");
    assert_eq!(flash_messages(&response), [upload::NO_IMAGE_UPLOADED]);
    assert_eq!(app.upload_count().await, 0);
}

#[tokio::test]
async fn test_quick_predict_does_not_record() {
    let app = TestApp::new().await;
    app.install_model();
    let session = app.login_as("Alice", "alice@example.com", "secret").await;

    let response = app
        .post_file("/predict", Some(&session), "file", "scan.jpg", &jpeg_bytes())
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains(r#"src="/static/uploads/"#));
    assert!(MULTICLASS_LABELS.iter().any(|label| html.contains(label)));
    assert_eq!(app.upload_count().await, 0);

    let response = app
        .post_file("/predict", Some(&session), "file", "", b"")
        .await;
    assert_eq!(location(&response), "/index");
    assert_eq!(flash_messages(&response), [upload::NO_IMAGE_SELECTED_QUICK]);
}

#[tokio::test]
async fn test_listing_scopes() {
    let app = TestApp::new().await;
    let alice = app.login_as("Alice", "alice@example.com", "secret").await;
    let bob = app.login_as("Bob", "bob@example.com", "hunter2").await;

    app.post_file("/panel", Some(&alice), "archivo", "a.jpg", &jpeg_bytes())
        .await;
    app.post_file("/panel", Some(&bob), "archivo", "b.jpg", &jpeg_bytes())
        .await;

    let mine: serde_json::Value =
        serde_json::from_str(&body_text(app.get("/api/uploads?scope=mine", Some(&alice)).await).await)
            .unwrap();
    let all: serde_json::Value =
        serde_json::from_str(&body_text(app.get("/api/uploads?scope=all", Some(&alice)).await).await)
            .unwrap();

    assert_eq!(mine["scope"], "mine");
    assert_eq!(mine["total"], 1);
    assert_eq!(all["scope"], "all");
    assert_eq!(all["total"], 2);
    assert!(all["uploads"][0]["nombre_archivo"].as_str().unwrap().ends_with("_b.jpg"));
}

#[tokio::test]
async fn test_stored_upload_is_served() {
    let app = TestApp::new().await;
    let session = app.login_as("Alice", "alice@example.com", "secret").await;
    let bytes = jpeg_bytes();

    app.post_file("/panel", Some(&session), "archivo", "scan.jpg", &bytes)
        .await;
    let stored = app.state.upload_service.list_all().await.unwrap()[0]
        .stored_name
        .clone();

    let response = app.get(&format!("/static/uploads/{}", stored), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let served = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(served.as_ref(), bytes.as_slice());
}

#[tokio::test]
async fn test_unknown_path_is_404() {
    let app = TestApp::new().await;

    let response = app.get("/no-such-page", None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_history_link_reaches_file_with_reserved_characters() {
    let app = TestApp::new().await;
    let session = app.login_as("Alice", "alice@example.com", "secret").await;
    let bytes = jpeg_bytes();

    app.post_file("/panel", Some(&session), "archivo", "scan #1%20.jpg", &bytes)
        .await;
    let html = body_text(app.get("/panel", Some(&session)).await).await;

    let start = html.find(r#"href="/static/uploads/"#).unwrap() + r#"href=""#.len();
    let href = &html[start..start + html[start..].find('"').unwrap()];
    assert!(href.ends_with("_scan%20%231%2520.jpg"), "{}", href);

    let response = app.get(href, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let served = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(served.as_ref(), bytes.as_slice());
}
