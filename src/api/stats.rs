//! Statistics endpoints

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{
    error::AppResult,
    models::loan::{BorrowerStatistics, LoanStatistics},
};

use super::AuthenticatedUser;

/// Library-wide loan counters
#[utoipa::path(
    get,
    path = "/stats/loans",
    tag = "stats",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Loan statistics", body = LoanStatistics),
        (status = 403, description = "Administrator privileges required"),
        (status = 500, description = "Statistics could not be computed")
    )
)]
pub async fn get_loan_stats(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
) -> AppResult<Json<LoanStatistics>> {
    claims.require_admin()?;

    let stats = state.services.stats.loan_statistics().await?;
    Ok(Json(stats))
}

/// Lending summary of a user
#[utoipa::path(
    get,
    path = "/users/{id}/stats",
    tag = "stats",
    security(("bearer_auth" = [])),
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Borrower statistics", body = BorrowerStatistics),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user_stats(
    State(state): State<crate::AppState>,
    AuthenticatedUser(claims): AuthenticatedUser,
    Path(user_id): Path<String>,
) -> AppResult<Json<BorrowerStatistics>> {
    claims.require_self_or_admin(&user_id)?;

    let stats = state.services.stats.borrower_statistics(&user_id).await?;
    Ok(Json(stats))
}
