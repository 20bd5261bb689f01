//! Error types for ReceiptFlow services
//!
//! Provides a single error enum shared by the service clients, the pipeline
//! and the HTTP layer:
//! - Distinct variants for each upstream failure mode
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingFile,
    UnsupportedFileType,
    PayloadTooLarge,

    // Rate limiting (6xxx)
    RateLimited,

    // Database service errors (7xxx)
    SchemaFetchError,
    RelationLookupError,
    InsertError,

    // External service errors (8xxx)
    UpstreamError,
    ExtractionError,
    EmptyExtraction,
    StorageError,
    GoogleAuthError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingFile => 1002,
            ErrorCode::UnsupportedFileType => 1003,
            ErrorCode::PayloadTooLarge => 1004,

            ErrorCode::RateLimited => 6001,

            ErrorCode::SchemaFetchError => 7001,
            ErrorCode::RelationLookupError => 7002,
            ErrorCode::InsertError => 7003,

            ErrorCode::UpstreamError => 8001,
            ErrorCode::ExtractionError => 8002,
            ErrorCode::EmptyExtraction => 8003,
            ErrorCode::StorageError => 8004,
            ErrorCode::GoogleAuthError => 8005,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("No file was provided")]
    MissingFile,

    #[error("Unsupported file type: {filename}")]
    UnsupportedFileType { filename: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Database service errors
    #[error("Failed to fetch schema for database {database_id}: {status} - {message}")]
    SchemaFetch {
        database_id: String,
        status: u16,
        message: String,
    },

    #[error("Failed to search database {database_id}: {status} - {message}")]
    RelationLookup {
        database_id: String,
        status: u16,
        message: String,
    },

    #[error("Failed to insert entry: {status} - {message}")]
    Insert { status: u16, message: String },

    // External service errors
    #[error("Extraction service error: {message}")]
    Extraction { message: String },

    #[error("Extraction returned no usable fields for {filename}")]
    EmptyExtraction { filename: String },

    #[error("Storage service error: {message}")]
    Storage { message: String },

    #[error("Google authentication failed: {message}")]
    GoogleAuth { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingFile => ErrorCode::MissingFile,
            AppError::UnsupportedFileType { .. } => ErrorCode::UnsupportedFileType,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::SchemaFetch { .. } => ErrorCode::SchemaFetchError,
            AppError::RelationLookup { .. } => ErrorCode::RelationLookupError,
            AppError::Insert { .. } => ErrorCode::InsertError,
            AppError::Extraction { .. } => ErrorCode::ExtractionError,
            AppError::EmptyExtraction { .. } => ErrorCode::EmptyExtraction,
            AppError::Storage { .. } => ErrorCode::StorageError,
            AppError::GoogleAuth { .. } => ErrorCode::GoogleAuthError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } | AppError::MissingFile => StatusCode::BAD_REQUEST,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 415 Unsupported Media Type
            AppError::UnsupportedFileType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,

            // 422 Unprocessable Entity
            AppError::EmptyExtraction { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::SchemaFetch { .. }
            | AppError::RelationLookup { .. }
            | AppError::Insert { .. }
            | AppError::Extraction { .. }
            | AppError::Storage { .. }
            | AppError::GoogleAuth { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Status code reported by the remote service, if the failure came from one
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            AppError::SchemaFetch { status, .. }
            | AppError::RelationLookup { status, .. }
            | AppError::Insert { status, .. } => Some(*status),
            AppError::HttpClient(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = code.as_code(),
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = code.as_code(),
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                upstream_status: self.upstream_status(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::GoogleAuth {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::SchemaFetch {
            database_id: "db".into(),
            status: 404,
            message: "object_not_found".into(),
        };
        assert_eq!(err.code(), ErrorCode::SchemaFetchError);
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.upstream_status(), Some(404));
    }

    #[test]
    fn test_insert_error_message_carries_remote_status() {
        let err = AppError::Insert {
            status: 400,
            message: "validation_error".into(),
        };
        assert_eq!(err.to_string(), "Failed to insert entry: 400 - validation_error");
        assert!(err.is_server_error());
    }

    #[test]
    fn test_client_errors() {
        let err = AppError::UnsupportedFileType {
            filename: "notes.txt".into(),
        };
        assert_eq!(err.status_code(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(err.is_client_error());
        assert!(!err.is_server_error());
        assert_eq!(err.upstream_status(), None);
    }

    #[test]
    fn test_numeric_codes_are_grouped() {
        assert_eq!(ErrorCode::MissingFile.as_code(), 1002);
        assert_eq!(ErrorCode::InsertError.as_code(), 7003);
        assert_eq!(ErrorCode::ConfigurationError.as_code(), 9002);
    }
}
