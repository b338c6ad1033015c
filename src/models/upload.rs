//! Upload model
//!
//! An `Upload` is the persisted record of one submitted image and the label
//! the classifier produced for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prediction stored when the classifier could not run.
pub const PREDICTION_UNAVAILABLE: &str = "Modelo no disponible";

/// Path under which stored uploads are served.
pub const UPLOADS_URL_PREFIX: &str = "/static/uploads";

/// URL of a stored upload, with the name percent-encoded.
pub fn upload_url(stored_name: &str) -> String {
    format!("{}/{}", UPLOADS_URL_PREFIX, urlencoding::encode(stored_name))
}

/// Persisted record of a submitted image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upload {
    /// Unique identifier
    pub id: i64,
    /// Generated storage name, `<uuid>_<client filename>`
    #[serde(rename = "nombre_archivo")]
    pub stored_name: String,
    /// Filesystem path of the stored image
    #[serde(rename = "ruta")]
    pub path: String,
    /// Upload timestamp
    #[serde(rename = "fecha_subida")]
    pub uploaded_at: DateTime<Utc>,
    /// Classifier output, `None` until classified
    #[serde(rename = "prediccion")]
    pub prediction: Option<String>,
    /// Owning account
    #[serde(rename = "usuario_id")]
    pub account_id: i64,
}

/// Input for recording an upload
#[derive(Debug, Clone)]
pub struct CreateUploadInput {
    pub stored_name: String,
    pub path: String,
    pub prediction: Option<String>,
    pub account_id: i64,
}

/// Upload history as shown on the panel.
///
/// Built from a page fetched from storage plus an optional pending record
/// that goes in front of it, without querying storage again.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadHistory {
    entries: Vec<Upload>,
}

impl UploadHistory {
    /// History made of persisted entries only, newest first.
    pub fn persisted(entries: Vec<Upload>) -> Self {
        Self { entries }
    }

    /// Persisted page with `pending` placed first.
    ///
    /// A persisted entry with the same id as `pending` is dropped so the
    /// record never appears twice.
    pub fn with_pending(persisted: Vec<Upload>, pending: Upload) -> Self {
        let mut entries = Vec::with_capacity(persisted.len() + 1);
        let pending_id = pending.id;
        entries.push(pending);
        entries.extend(persisted.into_iter().filter(|u| u.id != pending_id));
        Self { entries }
    }

    pub fn entries(&self) -> &[Upload] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_upload_url_encodes_name() {
        assert_eq!(upload_url("abc_scan.jpg"), "/static/uploads/abc_scan.jpg");
        assert_eq!(upload_url("abc_scan#1.jpg"), "/static/uploads/abc_scan%231.jpg");
        assert_eq!(upload_url("abc_a%20b?.jpg"), "/static/uploads/abc_a%2520b%3F.jpg");
        assert_eq!(upload_url("abc_a b.jpg"), "/static/uploads/abc_a%20b.jpg");
    }

    fn upload(id: i64, name: &str, minutes_ago: i64) -> Upload {
        Upload {
            id,
            stored_name: name.to_string(),
            path: format!("static/uploads/{}", name),
            uploaded_at: Utc::now() - Duration::minutes(minutes_ago),
            prediction: Some("glioma (90.00%)".to_string()),
            account_id: 1,
        }
    }

    #[test]
    fn test_with_pending_puts_pending_first() {
        let persisted = vec![upload(2, "b.jpg", 5), upload(1, "a.jpg", 10)];
        let history = UploadHistory::with_pending(persisted, upload(3, "c_scan.jpg", 0));

        let names: Vec<_> = history.entries().iter().map(|u| u.stored_name.as_str()).collect();
        assert_eq!(names, vec!["c_scan.jpg", "b.jpg", "a.jpg"]);
    }

    #[test]
    fn test_with_pending_skips_duplicate_id() {
        let persisted = vec![upload(3, "c_scan.jpg", 0), upload(1, "a.jpg", 10)];
        let history = UploadHistory::with_pending(persisted, upload(3, "c_scan.jpg", 0));

        assert_eq!(history.entries().len(), 2);
        assert_eq!(history.entries()[0].id, 3);
    }

    #[test]
    fn test_upload_serializes_with_form_names() {
        let json = serde_json::to_value(upload(7, "x_scan.jpg", 1)).unwrap();
        assert_eq!(json["nombre_archivo"], "x_scan.jpg");
        assert_eq!(json["ruta"], "static/uploads/x_scan.jpg");
        assert_eq!(json["prediccion"], "glioma (90.00%)");
        assert_eq!(json["usuario_id"], 1);
    }
}
