//! Error types for qrserve operations

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Result type alias using qrserve's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for qrserve operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete client input
    #[error("{0}")]
    BadRequest(String),

    /// Request touches something outside the allowed boundary
    #[error("{0}")]
    Forbidden(String),

    /// Requested saved file does not exist
    #[error("{0}")]
    NotFound(String),

    /// QR code encoding failed
    #[error("Failed to encode QR code: {0}")]
    QrEncode(String),

    /// QR code decoding failed
    #[error("Failed to decode QR code: {0}")]
    QrDecode(String),

    /// No QR code found in image
    #[error("No QR code found in image")]
    NoQrCodeFound,

    /// The host file manager could not be launched
    #[error("{0}")]
    Reveal(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status reported for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::QrEncode(_)
            | Error::QrDecode(_)
            | Error::NoQrCodeFound
            | Error::Reveal(_)
            | Error::Io(_)
            | Error::Image(_)
            | Error::Config(_)
            | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message placed in the JSON `error` field.
    ///
    /// Launch failures from the file manager are passed through verbatim; other
    /// internal failures are reported generically and only logged in full.
    pub fn user_message(&self) -> String {
        match self {
            Error::BadRequest(message)
            | Error::Forbidden(message)
            | Error::NotFound(message)
            | Error::Reveal(message) => message.clone(),
            Error::QrEncode(_) => self.to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::BadRequest(_) | Error::NotFound(_) => {
                tracing::debug!("Client error: {}", self);
            }
            Error::Forbidden(_) => {
                tracing::info!("Rejected request: {}", self);
            }
            _ => {
                tracing::error!("Internal service error: {:#}", self);
            }
        }

        let status = self.status_code();
        (status, Json(json!({ "error": self.user_message() }))).into_response()
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e.to_string())
    }
}

impl From<qrcode::types::QrError> for Error {
    fn from(e: qrcode::types::QrError) -> Self {
        Error::QrEncode(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::BadRequest("No text provided".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Forbidden("path not allowed".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::Reveal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_details_are_hidden() {
        let err = Error::Io(std::io::Error::other("disk on fire"));
        assert_eq!(err.user_message(), "Internal server error");

        let err = Error::Reveal("failed to launch xdg-open".into());
        assert_eq!(err.user_message(), "failed to launch xdg-open");
    }
}
