//! Loan management endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    models::loan::{LoanRecord, OverdueReport},
};

use super::AuthenticatedUser;

/// Borrow request
#[derive(Deserialize, Validate, ToSchema)]
pub struct BorrowRequest {
    /// Book to borrow
    #[validate(length(min = 1, message = "book_id must not be empty"))]
    pub book_id: String,
    /// Borrower (admin only, defaults to the caller)
    pub borrower_id: Option<String>,
}

/// Mark-overdue command
#[derive(Deserialize, ToSchema)]
pub struct MarkOverdueRequest {
    /// Loan records to flag
    pub ids: Vec<String>,
}

/// Records changed by an overdue command
#[derive(Serialize, ToSchema)]
pub struct OverdueResponse {
    /// Number of records flagged
    pub flagged: usize,
    /// The flagged records
    pub loans: Vec<LoanRecord>,
}

impl From<Vec<LoanRecord>> for OverdueResponse {
    fn from(loans: Vec<LoanRecord>) -> Self {
        Self {
            flagged: loans.len(),
            loans,
        }
    }
}

/// Borrow a book
#[utoipa::path(
    post,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = BorrowRequest,
    responses(
        (status = 201, description = "Loan created", body = LoanRecord),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Borrower or book not found"),
        (status = 409, description = "Out of stock, limit reached or already borrowed")
    )
)]
pub async fn create_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<BorrowRequest>,
) -> AppResult<(StatusCode, Json<LoanRecord>)> {
    request.validate()?;

    let borrower_id = request.borrower_id.unwrap_or_else(|| claims.user_id.clone());
    claims.require_self_or_admin(&borrower_id)?;

    let loan = state.services.loans.borrow(&borrower_id, &request.book_id).await?;
    Ok((StatusCode::CREATED, Json(loan)))
}

/// Get a loan record
#[utoipa::path(
    get,
    path = "/loans/{id}",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan record", body = LoanRecord),
        (status = 404, description = "Loan not found")
    )
)]
pub async fn get_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<String>,
) -> AppResult<Json<LoanRecord>> {
    let loan = state.services.loans.get_loan(&loan_id).await?;
    claims.require_self_or_admin(&loan.borrower_id)?;
    Ok(Json(loan))
}

/// Return a borrowed book
#[utoipa::path(
    post,
    path = "/loans/{id}/return",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Book returned", body = LoanRecord),
        (status = 404, description = "Loan not found"),
        (status = 422, description = "Loan already returned")
    )
)]
pub async fn return_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<String>,
) -> AppResult<Json<LoanRecord>> {
    let loan = state.services.loans.get_loan(&loan_id).await?;
    claims.require_self_or_admin(&loan.borrower_id)?;

    let loan = state.services.loans.return_book(&loan_id).await?;
    Ok(Json(loan))
}

/// Renew a loan
#[utoipa::path(
    post,
    path = "/loans/{id}/renew",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Loan ID")),
    responses(
        (status = 200, description = "Loan renewed", body = LoanRecord),
        (status = 404, description = "Loan not found"),
        (status = 422, description = "Loan is not currently borrowed")
    )
)]
pub async fn renew_loan(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(loan_id): Path<String>,
) -> AppResult<Json<LoanRecord>> {
    let loan = state.services.loans.get_loan(&loan_id).await?;
    claims.require_self_or_admin(&loan.borrower_id)?;

    let loan = state.services.loans.renew(&loan_id).await?;
    Ok(Json(loan))
}

/// List every loan record
#[utoipa::path(
    get,
    path = "/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All loan records", body = Vec<LoanRecord>),
        (status = 403, description = "Administrator privileges required")
    )
)]
pub async fn list_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<LoanRecord>>> {
    claims.require_admin()?;
    Ok(Json(state.services.loans.all_records().await?))
}

/// Loan history of the caller
#[utoipa::path(
    get,
    path = "/loans/me",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Caller's loan records", body = Vec<LoanRecord>))
)]
pub async fn get_my_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<LoanRecord>>> {
    let loans = state.services.loans.borrower_records(&claims.user_id).await?;
    Ok(Json(loans))
}

/// Books the caller currently holds
#[utoipa::path(
    get,
    path = "/loans/me/current",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Caller's borrowed books", body = Vec<LoanRecord>))
)]
pub async fn get_my_current_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<LoanRecord>>> {
    let loans = state.services.loans.current_borrows(&claims.user_id).await?;
    Ok(Json(loans))
}

/// Get loans for a specific user
#[utoipa::path(
    get,
    path = "/users/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User's loan records", body = Vec<LoanRecord>),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<String>,
) -> AppResult<Json<Vec<LoanRecord>>> {
    claims.require_self_or_admin(&user_id)?;

    let loans = state.services.loans.borrower_records(&user_id).await?;
    Ok(Json(loans))
}

/// Lending history of a book
#[utoipa::path(
    get,
    path = "/books/{id}/loans",
    tag = "loans",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "Book ID")),
    responses((status = 200, description = "Book's loan records", body = Vec<LoanRecord>))
)]
pub async fn get_book_loans(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(book_id): Path<String>,
) -> AppResult<Json<Vec<LoanRecord>>> {
    claims.require_admin()?;

    let loans = state.services.loans.book_records(&book_id).await?;
    Ok(Json(loans))
}

/// Past-due loans that are still marked borrowed (read-only)
#[utoipa::path(
    get,
    path = "/loans/overdue",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Past-due borrowed loans", body = Vec<LoanRecord>))
)]
pub async fn list_overdue_candidates(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<Vec<LoanRecord>>> {
    claims.require_admin()?;
    Ok(Json(state.services.loans.overdue_candidates().await?))
}

/// Overdue overview with days late
#[utoipa::path(
    get,
    path = "/loans/overdue/report",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Overdue report", body = OverdueReport))
)]
pub async fn get_overdue_report(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<OverdueReport>> {
    claims.require_admin()?;
    Ok(Json(state.services.loans.overdue_report().await?))
}

/// Flag the given loans as overdue
#[utoipa::path(
    post,
    path = "/loans/overdue/mark",
    tag = "loans",
    security(("bearer_auth" = [])),
    request_body = MarkOverdueRequest,
    responses(
        (status = 200, description = "Loans flagged", body = OverdueResponse),
        (status = 400, description = "No loan ids given")
    )
)]
pub async fn mark_overdue(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Json(request): Json<MarkOverdueRequest>,
) -> AppResult<Json<OverdueResponse>> {
    claims.require_admin()?;

    if request.ids.is_empty() {
        return Err(AppError::BadRequest("ids must not be empty".to_string()));
    }

    let flagged = state.services.loans.mark_overdue(&request.ids).await?;
    Ok(Json(flagged.into()))
}

/// Find and flag every past-due loan
#[utoipa::path(
    post,
    path = "/loans/overdue/sweep",
    tag = "loans",
    security(("bearer_auth" = [])),
    responses((status = 200, description = "Loans flagged", body = OverdueResponse))
)]
pub async fn sweep_overdue(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<OverdueResponse>> {
    claims.require_admin()?;

    let flagged = state.services.loans.list_overdue().await?;
    Ok(Json(flagged.into()))
}
