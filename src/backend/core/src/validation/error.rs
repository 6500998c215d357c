//! Validation error types.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The kind of check that rejected a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// Field was missing.
    Required,
    /// Field had the wrong type.
    InvalidType { expected: String, received: String },
    /// String shorter than allowed.
    MinLength { min: usize, actual: usize },
    /// Not an email address.
    InvalidEmail,
    /// Not a URL.
    InvalidUrl,
    /// Did not match a pattern.
    Pattern { pattern: String },
    /// File content type not accepted.
    InvalidFileType { content_type: String },
    /// File has no content.
    EmptyFile,
    /// File exceeds the size limit.
    FileTooLarge { max: u64, actual: u64 },
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => write!(f, "field is required"),
            Self::InvalidType { expected, received } => {
                write!(f, "expected {} but received {}", expected, received)
            }
            Self::MinLength { min, actual } => {
                write!(f, "must be at least {} characters (got {})", min, actual)
            }
            Self::InvalidEmail => write!(f, "must be a valid email address"),
            Self::InvalidUrl => write!(f, "must be a valid URL"),
            Self::Pattern { pattern } => write!(f, "must match pattern: {}", pattern),
            Self::InvalidFileType { content_type } => {
                write!(f, "content type {} is not accepted", content_type)
            }
            Self::EmptyFile => write!(f, "file is empty"),
            Self::FileTooLarge { max, actual } => {
                write!(f, "file is {} bytes, limit is {}", actual, max)
            }
        }
    }
}

/// A rejected field with the message shown to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub kind: ValidationErrorKind,
    pub message: String,
}

impl FieldError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Why a request payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The first field, in declaration order, that failed its rules.
    #[error("{}", error.message)]
    Field { field: String, error: FieldError },

    #[error("Invalid request body")]
    MalformedBody { reason: String },

    #[error("Request body too large")]
    BodyTooLarge,

    #[error("Unsupported content type")]
    UnsupportedContentType,
}

impl ValidationError {
    pub fn field(field: impl Into<String>, error: FieldError) -> Self {
        Self::Field {
            field: field.into(),
            error,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedBody {
            reason: reason.into(),
        }
    }

    /// Name of the rejected field, if the error is field-level.
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Self::Field { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(error: ValidationError) -> Self {
        let resource = error.field_name().map(str::to_string);
        let api = ApiError::bad_request(error.to_string());
        match resource {
            Some(field) => api.with_resource(field),
            None => api,
        }
    }
}

pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
