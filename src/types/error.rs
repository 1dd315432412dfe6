//! Error types for the agreement backend
//!
//! Every failure surfaced to a client maps onto one variant here, which
//! decides the HTTP status and the machine-readable `code` of the JSON body.

use hyper::StatusCode;

/// Main error type for agreement operations
#[derive(Debug, thiserror::Error)]
pub enum ConvenioError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Import failed: {0}")]
    Import(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),
}

impl ConvenioError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Import(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Http(_) => StatusCode::BAD_REQUEST,
            Self::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
        }
    }

    /// Stable error code for the JSON error body
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Import(_) => "IMPORT_FAILED",
            Self::Database(_) => "DB_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Http(_) => "INVALID_REQUEST",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Auth(_) => "AUTH_ERROR",
        }
    }

    /// Message without the variant prefix, as shown to clients
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Import(m)
            | Self::Database(m)
            | Self::Storage(m)
            | Self::Internal(m)
            | Self::Http(m)
            | Self::Config(m)
            | Self::Auth(m) => m,
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for ConvenioError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ConvenioError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for ConvenioError {
    fn from(err: hyper::Error) -> Self {
        Self::Http(format!("HTTP error: {}", err))
    }
}

impl From<mongodb::error::Error> for ConvenioError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for ConvenioError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encoding failed: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for ConvenioError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::Unauthorized(format!("JWT error: {}", err))
    }
}

impl From<multer::Error> for ConvenioError {
    fn from(err: multer::Error) -> Self {
        Self::BadRequest(format!("Invalid multipart body: {}", err))
    }
}

impl From<calamine::XlsxError> for ConvenioError {
    fn from(err: calamine::XlsxError) -> Self {
        Self::Import(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for ConvenioError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        Self::Internal(format!("Workbook generation failed: {}", err))
    }
}

/// Result type alias for agreement operations
pub type Result<T> = std::result::Result<T, ConvenioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ConvenioError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ConvenioError::Import("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ConvenioError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_message_strips_prefix() {
        let err = ConvenioError::NotFound("Agreement not found".into());
        assert_eq!(err.message(), "Agreement not found");
        assert_eq!(err.to_string(), "Not found: Agreement not found");
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
