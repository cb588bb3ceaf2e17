//! Error types for the library server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::models::loan::LoanStatus;

/// Stable numeric error codes exposed to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchUser = 4,
    NoSuchBook = 5,
    NoSuchLoan = 6,
    BookNotAvailable = 7,
    MaxBorrowsReached = 11,
    AlreadyBorrowed = 13,
    BadValue = 18,
    InvalidLoanState = 22,
}

/// Kind of entity a lookup failed for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Borrower,
    Book,
    Loan,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Entity::Borrower => "Borrower",
            Entity::Book => "Book",
            Entity::Loan => "Loan record",
        };
        f.write_str(name)
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: Entity, id: String },

    #[error("No copies of this book are currently available")]
    OutOfStock,

    #[error("Maximum loans reached ({current}/{max})")]
    LimitExceeded { current: usize, max: i32 },

    #[error("This book is already borrowed by the borrower")]
    AlreadyBorrowed,

    #[error("Cannot {action} a loan with status {status}")]
    InvalidState {
        status: LoanStatus,
        action: &'static str,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: Entity, id: impl Into<String>) -> Self {
        AppError::NotFound {
            entity,
            id: id.into(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Validation(errors.to_string())
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound { entity, .. } => {
                let code = match entity {
                    Entity::Borrower => ErrorCode::NoSuchUser,
                    Entity::Book => ErrorCode::NoSuchBook,
                    Entity::Loan => ErrorCode::NoSuchLoan,
                };
                (StatusCode::NOT_FOUND, code, self.to_string())
            }
            AppError::OutOfStock => {
                (StatusCode::CONFLICT, ErrorCode::BookNotAvailable, self.to_string())
            }
            AppError::LimitExceeded { .. } => {
                (StatusCode::CONFLICT, ErrorCode::MaxBorrowsReached, self.to_string())
            }
            AppError::AlreadyBorrowed => {
                (StatusCode::CONFLICT, ErrorCode::AlreadyBorrowed, self.to_string())
            }
            AppError::InvalidState { .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorCode::InvalidLoanState,
                self.to_string(),
            ),
            AppError::Authentication(msg) => {
                (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Authorization(msg) => {
                (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized, msg.clone())
            }
            AppError::Validation(msg) | AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ErrorCode::BadValue, msg.clone())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::DbFailure,
                    "Database error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorCode::Failure,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
