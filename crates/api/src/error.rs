//! Error responses.
//!
//! Every failure leaves the API as `{"error": CODE, "message": text}` with the
//! status the ledger error maps to.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use walletpoint_core::ledger::LedgerError;
use walletpoint_shared::AppError;

/// An error returned from a handler.
#[derive(Debug)]
pub enum ApiError {
    /// Failure reported by the ledger service.
    Ledger(LedgerError),
    /// Failure detected at the HTTP layer (bad input, missing role).
    App(AppError),
}

impl ApiError {
    /// The caller's role is not allowed on this route.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::App(AppError::Forbidden(message.into()))
    }

    /// Malformed request input.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::App(AppError::Validation(message.into()))
    }

    fn parts(&self) -> (StatusCode, &'static str) {
        let (status, code) = match self {
            Self::Ledger(err) => (err.http_status_code(), err.error_code()),
            Self::App(err) => (err.status_code(), err.error_code()),
        };
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            code,
        )
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = match &self {
            Self::Ledger(err) => err.to_string(),
            Self::App(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = code, %message, "request failed");
        }

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}
