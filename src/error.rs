use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

/// Message used for every authentication rejection.
///
/// Callers never learn whether a credential was revoked, expired or never existed.
pub const AUTHENTICATION_FAILED: &str = "Invalid or missing credentials";

/// The main error type for plangate
#[derive(Debug, thiserror::Error)]
pub enum PlangateError {
    #[error("Unauthorized: {0}")]
    Unauthenticated(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{service} error: {message}")]
    Upstream {
        service: UpstreamService,
        message: String,
        /// Whether `message` may be shown to the caller.
        expose: bool,
    },

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Stable, machine-checkable discriminant for every rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[serde(rename = "authentication_error")]
    Authentication,
    #[serde(rename = "authorization_error")]
    Authorization,
    QuotaExceeded,
    #[serde(rename = "validation_error")]
    Validation,
    NotFound,
    #[serde(rename = "upstream_error")]
    Upstream,
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication_error",
            Self::Authorization => "authorization_error",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Validation => "validation_error",
            Self::NotFound => "not_found",
            Self::Upstream => "upstream_error",
            Self::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// External collaborators whose failures surface as upstream errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamService {
    Datastore,
    GenerationProvider,
    ObjectStorage,
    PaymentProcessor,
    EmailSender,
}

impl fmt::Display for UpstreamService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Datastore => "Datastore",
            Self::GenerationProvider => "Generation provider",
            Self::ObjectStorage => "Object storage",
            Self::PaymentProcessor => "Payment processor",
            Self::EmailSender => "Email sender",
        };
        f.write_str(name)
    }
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorKind,
    pub error_id: String,
}

impl PlangateError {
    /// Authentication failure with the fixed, uninformative message.
    pub fn unauthenticated() -> Self {
        Self::Unauthenticated(AUTHENTICATION_FAILED.to_string())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn quota_exceeded(msg: impl Into<String>) -> Self {
        Self::QuotaExceeded(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Upstream failure whose message stays server-side.
    pub fn upstream(service: UpstreamService, msg: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: msg.into(),
            expose: false,
        }
    }

    /// Upstream failure whose message is safe and useful to show the caller.
    pub fn upstream_exposed(service: UpstreamService, msg: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: msg.into(),
            expose: true,
        }
    }

    /// Shorthand for datastore failures, the most common upstream.
    pub fn datastore(msg: impl Into<String>) -> Self {
        Self::upstream(UpstreamService::Datastore, msg)
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthenticated(_) => ErrorKind::Authentication,
            Self::Forbidden(_) => ErrorKind::Authorization,
            Self::QuotaExceeded(_) => ErrorKind::QuotaExceeded,
            Self::BadRequest(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Upstream { .. } => ErrorKind::Upstream,
            Self::Internal(_) | Self::Anyhow(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a message suitable for untrusted callers.
    ///
    /// Client errors keep their message. Server-side failures are replaced by a
    /// generic message unless the upstream error was explicitly marked exposable.
    fn safe_message(&self) -> String {
        match self {
            Self::Unauthenticated(msg) => msg.clone(),
            Self::Forbidden(msg) => msg.clone(),
            Self::QuotaExceeded(msg) => msg.clone(),
            Self::BadRequest(msg) => msg.clone(),
            Self::NotFound(msg) => msg.clone(),

            Self::Upstream {
                service,
                message,
                expose: true,
            } => format!("{} error: {}", service, message),
            Self::Upstream { .. } => "Upstream service error".to_string(),
            Self::Internal(_) | Self::Anyhow(_) => "Internal server error".to_string(),
        }
    }

    pub fn to_response_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: self.safe_message(),
            code: self.kind(),
            error_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl IntoResponse for PlangateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_response_body();

        if status.is_server_error() {
            tracing::error!(
                status = status.as_u16(),
                code = %body.code,
                error_id = %body.error_id,
                error = %self,
                "Request failed"
            );
        } else {
            tracing::debug!(
                status = status.as_u16(),
                code = %body.code,
                error_id = %body.error_id,
                error = %self,
                "Request rejected"
            );
        }

        (status, Json(body)).into_response()
    }
}

/// Result type alias for plangate operations
pub type Result<T> = std::result::Result<T, PlangateError>;

impl From<serde_json::Error> for PlangateError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            PlangateError::BadRequest(format!("JSON error: {}", err))
        } else {
            PlangateError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

impl From<validator::ValidationErrors> for PlangateError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut field_errors: Vec<String> = err
            .field_errors()
            .iter()
            .map(|(field, errors)| {
                let messages: Vec<&str> = errors
                    .iter()
                    .filter_map(|e| e.message.as_ref().map(|m| m.as_ref()))
                    .collect();
                if messages.is_empty() {
                    format!("{}: invalid", field)
                } else {
                    format!("{}: {}", field, messages.join(", "))
                }
            })
            .collect();
        field_errors.sort();

        PlangateError::BadRequest(format!("Validation failed: {}", field_errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_map_to_status_codes() {
        let cases = [
            (PlangateError::unauthenticated(), StatusCode::UNAUTHORIZED),
            (PlangateError::forbidden("nope"), StatusCode::FORBIDDEN),
            (PlangateError::quota_exceeded("full"), StatusCode::TOO_MANY_REQUESTS),
            (PlangateError::bad_request("bad"), StatusCode::BAD_REQUEST),
            (PlangateError::not_found("gone"), StatusCode::NOT_FOUND),
            (PlangateError::datastore("down"), StatusCode::BAD_GATEWAY),
            (PlangateError::internal("oops"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[test]
    fn test_unauthenticated_message_is_fixed() {
        let err = PlangateError::unauthenticated();
        assert_eq!(err.safe_message(), AUTHENTICATION_FAILED);
        assert_eq!(err.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_upstream_message_hidden_unless_exposed() {
        let hidden = PlangateError::upstream(UpstreamService::PaymentProcessor, "sk_live leaked in body");
        assert_eq!(hidden.safe_message(), "Upstream service error");

        let exposed =
            PlangateError::upstream_exposed(UpstreamService::GenerationProvider, "prompt rejected");
        assert_eq!(exposed.safe_message(), "Generation provider error: prompt rejected");
    }

    #[test]
    fn test_internal_message_hidden() {
        let err = PlangateError::internal("connection string postgres://...");
        assert_eq!(err.safe_message(), "Internal server error");

        let err: PlangateError = anyhow::anyhow!("boom").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.safe_message(), "Internal server error");
    }

    #[test]
    fn test_error_kind_serializes_to_code() {
        let json = serde_json::to_value(ErrorKind::QuotaExceeded).unwrap();
        assert_eq!(json, "quota_exceeded");
        let json = serde_json::to_value(ErrorKind::Authorization).unwrap();
        assert_eq!(json, "authorization_error");
        for kind in [
            ErrorKind::Authentication,
            ErrorKind::Authorization,
            ErrorKind::QuotaExceeded,
            ErrorKind::Validation,
            ErrorKind::NotFound,
            ErrorKind::Upstream,
            ErrorKind::Internal,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
    }

    #[test]
    fn test_from_serde_json_syntax_error() {
        let err = serde_json::from_str::<serde_json::Value>("{ invalid").unwrap_err();
        let err: PlangateError = err.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_into_response_body_has_code_and_error_id() {
        let response = PlangateError::quota_exceeded("Monthly image generation limit reached")
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "quota_exceeded");
        assert_eq!(body["error"], "Monthly image generation limit reached");
        assert!(uuid::Uuid::parse_str(body["error_id"].as_str().unwrap()).is_ok());
    }
}
