//! Error types for procedure dispatch
//!
//! Every failure raised while dispatching a procedure is an [`RpcError`]:
//! parsing, middleware, validation, handler and upgrade failures alike.
//! Errors carry a typed [`RpcErrorCode`] which decides the HTTP status of the
//! default response.
//!
//! # Example
//! ```rust,ignore
//! use procedure_router::{RpcError, RpcErrorCode};
//!
//! let error = RpcError::new(RpcErrorCode::NotFound, "User not found");
//! let error = RpcError::not_found("User not found"); // Convenience method
//! ```

use crate::request::RequestHandle;
use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Type-safe error codes for procedure dispatch.
///
/// When serialized to JSON, codes are converted to SCREAMING_SNAKE_CASE
/// (e.g., `NotFound` becomes `"NOT_FOUND"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum RpcErrorCode {
    // Client errors (4xx)
    /// The request was malformed or invalid
    BadRequest,
    /// Authentication is required
    Unauthorized,
    /// The authenticated caller lacks permission
    Forbidden,
    /// The requested resource was not found
    NotFound,
    /// Input validation failed
    ValidationError,
    /// The request conflicts with current state
    Conflict,
    /// The request payload exceeds size limits
    PayloadTooLarge,
    /// Too many requests
    RateLimited,

    // Server errors (5xx)
    /// An unexpected internal error occurred
    InternalError,
    /// The requested functionality is not implemented
    NotImplemented,
    /// A required collaborator is unavailable or unconfigured
    ServiceUnavailable,

    // Router-specific errors
    /// The requested procedure was not found
    ProcedureNotFound,
    /// A realtime session failed
    SubscriptionError,
    /// A middleware step failed
    MiddlewareError,
    /// JSON serialization/deserialization failed
    SerializationError,
}

impl RpcErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Conflict => "CONFLICT",
            Self::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            Self::RateLimited => "RATE_LIMITED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::ProcedureNotFound => "PROCEDURE_NOT_FOUND",
            Self::SubscriptionError => "SUBSCRIPTION_ERROR",
            Self::MiddlewareError => "MIDDLEWARE_ERROR",
            Self::SerializationError => "SERIALIZATION_ERROR",
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        self.status().is_client_error()
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status().is_server_error()
    }

    /// HTTP status used when the error is turned into a response.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound | Self::ProcedureNotFound => StatusCode::NOT_FOUND,
            Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict => StatusCode::CONFLICT,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::InternalError
            | Self::SubscriptionError
            | Self::MiddlewareError
            | Self::SerializationError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatch error with a typed code and message.
///
/// # Example
/// ```rust,ignore
/// use procedure_router::{RpcError, RpcErrorCode};
///
/// let error = RpcError::new(RpcErrorCode::NotFound, "User not found")
///     .with_details(serde_json::json!({"user_id": 123}))
///     .with_cause("Database query returned empty result");
/// ```
#[derive(Debug, Clone, Deserialize, Error)]
#[error("[{code}] {message}")]
pub struct RpcError {
    /// Type-safe error code
    pub code: RpcErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (JSON value)
    pub details: Option<serde_json::Value>,
    /// Optional cause for debugging, never written to responses
    pub cause: Option<String>,
}

impl RpcError {
    /// Create a new error with code and message.
    pub fn new(code: RpcErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            cause: None,
        }
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Serialize) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }

    /// Add a cause string for debugging.
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Replace the message of internal errors so nothing leaks to clients.
    pub fn sanitize(mut self) -> Self {
        if matches!(self.code, RpcErrorCode::InternalError) {
            debug!(
                original_message = %self.message,
                "Sanitizing internal error for client response"
            );
            self.message = "An internal error occurred".to_string();
            self.details = None;
            self.cause = None;
        }
        self
    }

    // Convenience constructors

    /// Create a NOT_FOUND error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::NotFound, message)
    }

    /// Create a BAD_REQUEST error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::BadRequest, message)
    }

    /// Create a VALIDATION_ERROR error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::ValidationError, message)
    }

    /// Create an UNAUTHORIZED error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Unauthorized, message)
    }

    /// Create a FORBIDDEN error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Forbidden, message)
    }

    /// Create an INTERNAL_ERROR error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InternalError, message)
    }

    /// Create a CONFLICT error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::Conflict, message)
    }

    /// Create a PROCEDURE_NOT_FOUND error.
    pub fn procedure_not_found(path: &str) -> Self {
        Self::new(
            RpcErrorCode::ProcedureNotFound,
            format!("Procedure '{}' not found", path),
        )
    }

    /// Create a PAYLOAD_TOO_LARGE error.
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::PayloadTooLarge, message)
    }

    /// Create a SERIALIZATION_ERROR error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::SerializationError, message)
    }

    /// Create a MIDDLEWARE_ERROR error.
    pub fn middleware(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::MiddlewareError, message)
    }

    /// Create a SUBSCRIPTION_ERROR error.
    pub fn subscription(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::SubscriptionError, message)
    }

    /// Create a SERVICE_UNAVAILABLE error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::ServiceUnavailable, message)
    }

    /// Create a RATE_LIMITED error.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::RateLimited, message)
    }

    /// Create a NOT_IMPLEMENTED error.
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::NotImplemented, message)
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(format!("JSON error: {}", err))
    }
}

impl Serialize for RpcError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let len = if self.details.is_some() { 3 } else { 2 };
        let mut state = serializer.serialize_struct("RpcError", len)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;

        if let Some(ref details) = self.details {
            state.serialize_field("details", details)?;
        }

        state.end()
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let error = self.sanitize();
        (error.code.status(), Json(error)).into_response()
    }
}

/// Result type alias for dispatch operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Router-level error handler.
///
/// Receives every error raised while dispatching a read, write or upgrade
/// request and turns it into the response sent to the caller.
pub type ErrorHandler<Ctx> = Arc<dyn Fn(RpcError, &RequestHandle<Ctx>) -> Response + Send + Sync>;


// =============================================================================
// Property-Based Tests
// =============================================================================
