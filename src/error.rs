//! Error types for Libris server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

/// When false, messages of 5xx errors are replaced by a generic text.
static EXPOSE_INTERNAL_ERRORS: std::sync::atomic::AtomicBool =
    std::sync::atomic::AtomicBool::new(false);

/// Toggle whether internal error messages reach clients (development builds).
pub fn expose_internal_errors(expose: bool) {
    EXPOSE_INTERNAL_ERRORS.store(expose, std::sync::atomic::Ordering::Relaxed);
}

/// Main application error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Validation error")]
    Validation(Vec<String>),

    #[error("User membership is not valid or has expired")]
    MembershipInvalid,

    #[error("Book is not available for borrowing")]
    NoCopiesAvailable,

    #[error("Maximum active loans reached ({current}/{max})")]
    BorrowLimitReached { current: usize, max: u32 },

    #[error("User has unpaid fines ({0})")]
    UnpaidFines(rust_decimal::Decimal),

    #[error("Book is already returned")]
    AlreadyReturned,

    #[error("{0}")]
    InvalidTransition(String),

    #[error("No fine is due for this loan")]
    NoFineDue,

    #[error("Fine has already been settled")]
    AlreadyPaid,

    #[error("Payment of {tendered} does not cover the fine of {owed}")]
    InsufficientPayment {
        owed: rust_decimal::Decimal,
        tendered: rust_decimal::Decimal,
    },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(vec![message.into()])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Validation(_)
            | AppError::MembershipInvalid
            | AppError::NoCopiesAvailable
            | AppError::BorrowLimitReached { .. }
            | AppError::UnpaidFines(_)
            | AppError::AlreadyReturned
            | AppError::InvalidTransition(_)
            | AppError::NoFineDue
            | AppError::AlreadyPaid
            | AppError::InsufficientPayment { .. } => StatusCode::BAD_REQUEST,
            AppError::StorageUnavailable(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = e {
            if db.is_unique_violation() {
                let constraint = db.constraint().unwrap_or("unique key").to_string();
                return AppError::Conflict(format!(
                    "Duplicate field value ({}). This value is already taken.",
                    constraint
                ));
            }
        }
        AppError::StorageUnavailable(e.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => format!("{}: {}", field, msg),
                    None => format!("{}: invalid value ({})", field, e.code),
                })
            })
            .collect();
        messages.sort();
        AppError::Validation(messages)
    }
}

/// Error response body
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub status_code: u16,
    pub message: String,
    pub errors: Vec<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let (message, errors) = match &self {
            AppError::Validation(items) => ("Validation Error".to_string(), items.clone()),
            AppError::StorageUnavailable(msg) | AppError::Internal(msg) => {
                tracing::error!("Request failed: {}", msg);
                if EXPOSE_INTERNAL_ERRORS.load(std::sync::atomic::Ordering::Relaxed) {
                    (self.to_string(), Vec::new())
                } else {
                    ("Server Error".to_string(), Vec::new())
                }
            }
            other => (other.to_string(), Vec::new()),
        };

        let body = Json(ErrorResponse {
            success: false,
            status_code: status.as_u16(),
            message,
            errors,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
