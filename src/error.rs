//! Error types for the interception core
//!
//! Every failure the core can hit is local and recoverable: a malformed
//! rule, an override that cannot be built, a browser API that is missing.
//! None of these may escape from the patched `fetch`/`XMLHttpRequest`; the
//! classification helpers below let callers decide between "fall back to the
//! original behavior" and "log and carry on".

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wasm_bindgen::JsValue;

pub type Result<T> = std::result::Result<T, InterceptError>;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Rule errors (1xx)
    InvalidRule = 100,
    InvalidPattern = 101,

    // Override errors (2xx)
    RequestRewriteFailed = 200,
    ResponseOverrideFailed = 201,

    // Host errors (3xx)
    ApiUnavailable = 300,
    StorageError = 301,

    // Serialization errors (4xx)
    SerializationError = 400,

    // Internal errors (9xx)
    InternalError = 900,
}

/// Main error type for the interception core
#[derive(Error, Debug, Clone)]
pub enum InterceptError {
    // ===== Rule Errors =====
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid URL pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // ===== Override Errors =====
    #[error("Request rewrite failed: {0}")]
    RequestRewrite(String),

    #[error("Response override failed: {0}")]
    ResponseOverride(String),

    // ===== Host Errors =====
    #[error("Browser API unavailable: {0}")]
    ApiUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Internal Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl InterceptError {
    /// Get the error code for programmatic handling
    pub fn code(&self) -> ErrorCode {
        match self {
            InterceptError::InvalidRule(_) => ErrorCode::InvalidRule,
            InterceptError::InvalidPattern { .. } => ErrorCode::InvalidPattern,
            InterceptError::RequestRewrite(_) => ErrorCode::RequestRewriteFailed,
            InterceptError::ResponseOverride(_) => ErrorCode::ResponseOverrideFailed,
            InterceptError::ApiUnavailable(_) => ErrorCode::ApiUnavailable,
            InterceptError::Storage(_) => ErrorCode::StorageError,
            InterceptError::Serialization(_) => ErrorCode::SerializationError,
            InterceptError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Whether the interceptor can fall back to the unmodified request or
    /// response after this error.
    ///
    /// Override computation errors are always recoverable: the caller sees
    /// the original traffic as if no rule had matched.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            InterceptError::InvalidRule(_)
                | InterceptError::InvalidPattern { .. }
                | InterceptError::RequestRewrite(_)
                | InterceptError::ResponseOverride(_)
                | InterceptError::Serialization(_)
        )
    }

    /// Whether interception has to stay disabled after this error
    pub fn disables_interception(&self) -> bool {
        matches!(self, InterceptError::ApiUnavailable(_))
    }

    /// Get a user-friendly message for display
    pub fn user_message(&self) -> String {
        match self {
            InterceptError::InvalidRule(_) => {
                "A mock rule is malformed and was ignored. Please check the rule fields.".into()
            }
            InterceptError::InvalidPattern { pattern, .. } => format!(
                "The URL pattern `{}` is not a valid regular expression; the rule never matches.",
                pattern
            ),
            InterceptError::RequestRewrite(_) => {
                "The request body could not be replaced; the original request was sent.".into()
            }
            InterceptError::ResponseOverride(_) => {
                "The mocked response could not be built; the real response was returned.".into()
            }
            InterceptError::ApiUnavailable(_) => {
                "Request interception is not available on this page.".into()
            }
            InterceptError::Storage(_) => {
                "Interception state could not be saved for this tab session.".into()
            }
            InterceptError::Serialization(_) => "Failed to read or write rule data.".into(),
            InterceptError::Internal(_) => {
                "An internal error occurred. Please report this bug.".into()
            }
        }
    }

    /// Wrap a JS exception raised while rewriting a request
    pub fn request_rewrite(err: &JsValue) -> Self {
        InterceptError::RequestRewrite(describe_js(err))
    }

    /// Wrap a JS exception raised while building an override response
    pub fn response_override(err: &JsValue) -> Self {
        InterceptError::ResponseOverride(describe_js(err))
    }
}

/// Render a thrown JS value for logs and error messages
pub(crate) fn describe_js(err: &JsValue) -> String {
    err.as_string().unwrap_or_else(|| format!("{:?}", err))
}

impl From<serde_json::Error> for InterceptError {
    fn from(err: serde_json::Error) -> Self {
        InterceptError::Serialization(err.to_string())
    }
}

impl From<serde_wasm_bindgen::Error> for InterceptError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        InterceptError::Serialization(err.to_string())
    }
}

/// Errors reach JS as an [`ErrorInfo`] object
impl From<InterceptError> for JsValue {
    fn from(err: InterceptError) -> Self {
        ErrorInfo::from(&err).to_js()
    }
}

/// Error information for JavaScript consumption
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: u32,
    pub message: String,
    pub user_message: String,
    pub is_recoverable: bool,
}

impl ErrorInfo {
    /// `{ code, message, userMessage, isRecoverable }`, or the bare message
    /// if the object cannot be built
    pub fn to_js(&self) -> JsValue {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        self.serialize(&serializer)
            .unwrap_or_else(|_| JsValue::from_str(&self.message))
    }
}

impl From<&InterceptError> for ErrorInfo {
    fn from(err: &InterceptError) -> Self {
        ErrorInfo {
            code: err.code() as u32,
            message: err.to_string(),
            user_message: err.user_message(),
            is_recoverable: err.is_recoverable(),
        }
    }
}
