//! Upload and prediction pages
//!
//! - GET/POST /panel: history, upload + classify + record
//! - GET /index, POST /predict: classify without recording
//! - GET /api/uploads: JSON listing

use axum::{
    extract::{multipart::MultipartError, Multipart, Query, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::path::PathBuf;

use super::flash::{flash_redirect, Flash};
use super::middleware::{AppState, AuthenticatedAccount, WebError};
use super::responses::{Page, UploadListQuery, UploadListResponse, UploadScope};
use crate::classifier::InferenceError;
use crate::models::{UploadHistory, PREDICTION_UNAVAILABLE};
use crate::services::upload::sanitize_filename;

pub const NO_IMAGE_UPLOADED: &str = "No se subió ninguna imagen";
pub const NO_IMAGE_SELECTED: &str = "No seleccionaste ninguna imagen";
pub const NO_IMAGE_SELECTED_QUICK: &str = "No seleccionaste una imagen";
pub const UPLOAD_DONE: &str = "Archivo subido y predicción realizada.";

/// Multipart fields accepted by the panel form
const PANEL_FIELDS: &[&str] = &["archivo", "file"];
/// Multipart fields accepted by the quick-predict form
const PREDICT_FIELDS: &[&str] = &["file", "archivo"];

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/panel", get(panel).post(upload))
        .route("/index", get(predict_page))
        .route("/predict", axum::routing::post(quick_predict))
        .route("/api/uploads", get(list_uploads))
}

/// An image file taken from a multipart form
#[derive(Debug)]
pub struct UploadSubmission {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Why a multipart form did not yield an image
#[derive(Debug)]
pub enum SubmissionRejection {
    /// None of the accepted fields was present as a file
    MissingField,
    /// The field was present with no filename or no content
    EmptyFile,
    /// The body could not be parsed
    Malformed(MultipartError),
}

impl UploadSubmission {
    /// Take the first field named in `fields` from the form.
    pub async fn from_multipart(
        mut multipart: Multipart,
        fields: &[&str],
    ) -> Result<Self, SubmissionRejection> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(SubmissionRejection::Malformed)?
        {
            let name = field.name().unwrap_or_default();
            if !fields.contains(&name) {
                continue;
            }
            // Plain text fields are not files
            let Some(filename) = field.file_name() else {
                continue;
            };

            let filename = sanitize_filename(filename).ok_or(SubmissionRejection::EmptyFile)?;

            let bytes = field.bytes().await.map_err(SubmissionRejection::Malformed)?;
            if bytes.is_empty() {
                return Err(SubmissionRejection::EmptyFile);
            }

            return Ok(Self {
                filename,
                bytes: bytes.to_vec(),
            });
        }

        Err(SubmissionRejection::MissingField)
    }
}

impl SubmissionRejection {
    /// Flash the rejection and send the client back to `form`
    fn redirect(self, form: &str, empty_message: &str) -> Response {
        match self {
            Self::MissingField => flash_redirect(form, NO_IMAGE_UPLOADED),
            Self::EmptyFile => flash_redirect(form, empty_message),
            Self::Malformed(e) => {
                tracing::debug!("Rejected malformed upload: {}", e);
                e.into_response()
            }
        }
    }
}

/// Label for a stored image, or the sentinel when the classifier can't run
async fn classify(state: &AppState, path: PathBuf) -> String {
    match state.inference.clone().predict_blocking(path).await {
        Ok(prediction) => prediction.to_string(),
        Err(InferenceError::ModelUnavailable(artifact)) => {
            tracing::warn!("No model artifact at {}", artifact.display());
            PREDICTION_UNAVAILABLE.to_string()
        }
        Err(e) => {
            tracing::error!("Prediction failed: {}", e);
            PREDICTION_UNAVAILABLE.to_string()
        }
    }
}

/// GET /panel
async fn panel(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    flash: Flash,
) -> Result<Response, WebError> {
    let history = state.upload_service.history(account.id).await?;

    Ok(Page::new("panel.html")
        .account(&account)
        .flash(flash)
        .insert("archivos", history.entries())
        .render(&state.theme_engine))
}

/// POST /panel
async fn upload(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    multipart: Multipart,
) -> Result<Response, WebError> {
    let submission = match UploadSubmission::from_multipart(multipart, PANEL_FIELDS).await {
        Ok(submission) => submission,
        Err(rejection) => return Ok(rejection.redirect("/panel", NO_IMAGE_SELECTED)),
    };

    let previous = state.upload_service.history(account.id).await?;

    let stored = state
        .upload_service
        .store_file(&submission.filename, &submission.bytes)
        .await?;
    let prediction = classify(&state, stored.path.clone()).await;
    let upload = state
        .upload_service
        .record(account.id, &stored, prediction.clone())
        .await?;

    tracing::info!(
        "Account {} uploaded {}: {}",
        account.id,
        upload.stored_name,
        prediction
    );

    let history = UploadHistory::with_pending(previous.entries().to_vec(), upload);

    Ok(Page::new("panel.html")
        .account(&account)
        .message(UPLOAD_DONE)
        .insert("archivos", history.entries())
        .insert("prediccion", &prediction)
        .insert("image_path", &stored.public_url())
        .render(&state.theme_engine))
}

/// GET /index
async fn predict_page(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    flash: Flash,
) -> Response {
    Page::new("predict.html")
        .account(&account)
        .flash(flash)
        .render(&state.theme_engine)
}

/// POST /predict
async fn quick_predict(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    multipart: Multipart,
) -> Result<Response, WebError> {
    let submission = match UploadSubmission::from_multipart(multipart, PREDICT_FIELDS).await {
        Ok(submission) => submission,
        Err(rejection) => return Ok(rejection.redirect("/index", NO_IMAGE_SELECTED_QUICK)),
    };

    let stored = state
        .upload_service
        .store_file(&submission.filename, &submission.bytes)
        .await?;
    let prediction = classify(&state, stored.path.clone()).await;

    Ok(Page::new("predict.html")
        .account(&account)
        .insert("result", &prediction)
        .insert("image_path", &stored.public_url())
        .render(&state.theme_engine))
}

/// GET /api/uploads?scope=mine|all
async fn list_uploads(
    State(state): State<AppState>,
    AuthenticatedAccount(account): AuthenticatedAccount,
    Query(query): Query<UploadListQuery>,
) -> Result<Json<UploadListResponse>, WebError> {
    let uploads = match query.scope {
        UploadScope::Mine => state
            .upload_service
            .history(account.id)
            .await?
            .entries()
            .to_vec(),
        UploadScope::All => state.upload_service.list_all().await?,
    };

    Ok(Json(UploadListResponse::new(query.scope, uploads)))
}
