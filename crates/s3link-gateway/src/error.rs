//! Error types and S3 error codes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use s3link_core::{BackendError, RejectionKind};
use thiserror::Error;

/// Result type alias using `ApiError`
pub type Result<T> = std::result::Result<T, ApiError>;

/// S3 error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum S3ErrorCode {
    AccessDenied,
    BadDigest,
    BucketAlreadyExists,
    BucketNotEmpty,
    EntityTooLarge,
    EntityTooSmall,
    ExpiredToken,
    InternalError,
    InvalidAccessKeyId,
    InvalidArgument,
    InvalidBucketName,
    InvalidDigest,
    InvalidPart,
    InvalidPartOrder,
    InvalidRange,
    InvalidRequest,
    InvalidToken,
    InvalidURI,
    KeyTooLong,
    MalformedXML,
    MethodNotAllowed,
    MissingSecurityHeader,
    NoSuchBucket,
    NoSuchKey,
    NoSuchUpload,
    NotImplemented,
    PreconditionFailed,
    QuotaExceeded,
    RequestTimeTooSkewed,
    ServiceUnavailable,
    SignatureDoesNotMatch,
    SlowDown,
    XAmzContentSHA256Mismatch,
}

impl S3ErrorCode {
    /// Get the error code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessDenied => "AccessDenied",
            Self::BadDigest => "BadDigest",
            Self::BucketAlreadyExists => "BucketAlreadyExists",
            Self::BucketNotEmpty => "BucketNotEmpty",
            Self::EntityTooLarge => "EntityTooLarge",
            Self::EntityTooSmall => "EntityTooSmall",
            Self::ExpiredToken => "ExpiredToken",
            Self::InternalError => "InternalError",
            Self::InvalidAccessKeyId => "InvalidAccessKeyId",
            Self::InvalidArgument => "InvalidArgument",
            Self::InvalidBucketName => "InvalidBucketName",
            Self::InvalidDigest => "InvalidDigest",
            Self::InvalidPart => "InvalidPart",
            Self::InvalidPartOrder => "InvalidPartOrder",
            Self::InvalidRange => "InvalidRange",
            Self::InvalidRequest => "InvalidRequest",
            Self::InvalidToken => "InvalidToken",
            Self::InvalidURI => "InvalidURI",
            Self::KeyTooLong => "KeyTooLong",
            Self::MalformedXML => "MalformedXML",
            Self::MethodNotAllowed => "MethodNotAllowed",
            Self::MissingSecurityHeader => "MissingSecurityHeader",
            Self::NoSuchBucket => "NoSuchBucket",
            Self::NoSuchKey => "NoSuchKey",
            Self::NoSuchUpload => "NoSuchUpload",
            Self::NotImplemented => "NotImplemented",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::QuotaExceeded => "QuotaExceeded",
            Self::RequestTimeTooSkewed => "RequestTimeTooSkewed",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            Self::SlowDown => "SlowDown",
            Self::XAmzContentSHA256Mismatch => "XAmzContentSHA256Mismatch",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::AccessDenied | Self::RequestTimeTooSkewed | Self::SignatureDoesNotMatch => {
                StatusCode::FORBIDDEN
            }
            Self::InvalidAccessKeyId
            | Self::InvalidToken
            | Self::ExpiredToken
            | Self::MissingSecurityHeader => StatusCode::UNAUTHORIZED,
            Self::BucketAlreadyExists | Self::BucketNotEmpty | Self::QuotaExceeded => {
                StatusCode::CONFLICT
            }
            Self::BadDigest
            | Self::EntityTooLarge
            | Self::EntityTooSmall
            | Self::InvalidArgument
            | Self::InvalidBucketName
            | Self::InvalidDigest
            | Self::InvalidPart
            | Self::InvalidPartOrder
            | Self::InvalidRequest
            | Self::InvalidURI
            | Self::KeyTooLong
            | Self::MalformedXML
            | Self::XAmzContentSHA256Mismatch => StatusCode::BAD_REQUEST,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::NoSuchBucket | Self::NoSuchKey | Self::NoSuchUpload => StatusCode::NOT_FOUND,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            Self::ServiceUnavailable | Self::SlowDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Whether a client may retry the same request unchanged
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable | Self::SlowDown | Self::InternalError)
    }
}

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    S3Error {
        code: S3ErrorCode,
        message: String,
        resource: Option<String>,
    },

    #[error("{0}")]
    Backend(#[from] BackendError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Create a new S3 error
    pub fn s3(code: S3ErrorCode, message: impl Into<String>) -> Self {
        Self::S3Error {
            code,
            message: message.into(),
            resource: None,
        }
    }

    /// Create with resource
    pub fn s3_with_resource(
        code: S3ErrorCode,
        message: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self::S3Error {
            code,
            message: message.into(),
            resource: Some(resource.into()),
        }
    }

    /// Shorthand for `AccessDenied`
    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::s3(S3ErrorCode::AccessDenied, message)
    }

    /// Shorthand for a malformed request
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::s3(S3ErrorCode::InvalidArgument, message)
    }

    /// Get the error code
    pub fn error_code(&self) -> S3ErrorCode {
        match self {
            Self::S3Error { code, .. } => *code,
            Self::Internal(_) => S3ErrorCode::InternalError,
            Self::Backend(e) => match e {
                BackendError::NotFound { .. } => S3ErrorCode::NoSuchKey,
                BackendError::BucketNotFound(_) => S3ErrorCode::NoSuchBucket,
                BackendError::BucketAlreadyExists(_) => S3ErrorCode::BucketAlreadyExists,
                BackendError::BucketNotEmpty(_) => S3ErrorCode::BucketNotEmpty,
                BackendError::InvalidBucketName(_) => S3ErrorCode::InvalidBucketName,
                BackendError::EmptyObjectKey => S3ErrorCode::InvalidArgument,
                BackendError::ObjectKeyTooLong(_) => S3ErrorCode::KeyTooLong,
                BackendError::InvalidContinuationToken => S3ErrorCode::InvalidArgument,
                BackendError::Unavailable(_) => S3ErrorCode::ServiceUnavailable,
                BackendError::Rejected {
                    kind: RejectionKind::Quota,
                    ..
                } => S3ErrorCode::QuotaExceeded,
                BackendError::Rejected {
                    kind: RejectionKind::Permission,
                    ..
                } => S3ErrorCode::AccessDenied,
                BackendError::Corrupted(_) | BackendError::BlockStore(_) => {
                    S3ErrorCode::InternalError
                }
            },
        }
    }

    /// Resource named in the error body, if any
    pub fn resource(&self) -> Option<String> {
        match self {
            Self::S3Error { resource, .. } => resource.clone(),
            Self::Backend(BackendError::NotFound { bucket, key }) => {
                Some(format!("/{}/{}", bucket, key))
            }
            Self::Backend(
                BackendError::BucketNotFound(bucket)
                | BackendError::BucketAlreadyExists(bucket)
                | BackendError::BucketNotEmpty(bucket),
            ) => Some(format!("/{}", bucket)),
            _ => None,
        }
    }

    /// Message for the error body. Internal failures are not echoed to clients.
    pub fn public_message(&self) -> String {
        match self.error_code() {
            S3ErrorCode::InternalError => {
                "We encountered an internal error. Please try again.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = crate::response::new_request_id();
        crate::response::error_response(&self, &request_id, false).map(axum::body::Body::from)
    }
}
