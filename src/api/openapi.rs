//! OpenAPI documentation

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{health, loans, stats};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Library Lending API",
        version = "1.0.0",
        description = "Borrow, return and renew books; overdue tracking and loan statistics"
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Loans
        loans::create_loan,
        loans::get_loan,
        loans::return_loan,
        loans::renew_loan,
        loans::list_loans,
        loans::get_my_loans,
        loans::get_my_current_loans,
        loans::get_user_loans,
        loans::get_book_loans,
        loans::list_overdue_candidates,
        loans::get_overdue_report,
        loans::mark_overdue,
        loans::sweep_overdue,
        // Stats
        stats::get_loan_stats,
        stats::get_user_stats,
    ),
    components(
        schemas(
            // Loans
            loans::BorrowRequest,
            loans::MarkOverdueRequest,
            loans::OverdueResponse,
            crate::models::loan::LoanRecord,
            crate::models::loan::LoanStatus,
            crate::models::loan::OverdueEntry,
            crate::models::loan::OverdueReport,
            // Stats
            crate::models::loan::LoanStatistics,
            crate::models::loan::BorrowerStatistics,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "loans", description = "Loan management"),
        (name = "stats", description = "Statistics")
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
