//! OpenAPI documentation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::{books, borrows, health, users};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Libris API",
        version = "0.3.0",
        description = "Library circulation REST API: books, members, loans and fines",
        license(name = "AGPL-3.0", url = "https://www.gnu.org/licenses/agpl-3.0.html")
    ),
    servers(
        (url = "/api/v1", description = "API v1")
    ),
    paths(
        // Health
        health::health_check,
        health::readiness_check,
        // Books
        books::list_books,
        books::get_book,
        books::create_book,
        books::update_book,
        books::delete_book,
        // Users
        users::list_users,
        users::get_user,
        users::create_user,
        users::update_user,
        users::delete_user,
        // Borrows
        borrows::list_borrows,
        borrows::list_overdue,
        borrows::fine_report,
        borrows::user_history,
        borrows::get_borrow,
        borrows::create_borrow,
        borrows::update_borrow,
        borrows::return_borrow,
        borrows::renew_borrow,
        borrows::pay_fine,
    ),
    components(
        schemas(
            // Books
            crate::models::book::Book,
            crate::models::book::CreateBook,
            crate::models::book::UpdateBook,
            // Users
            crate::models::member::Member,
            crate::models::member::Address,
            crate::models::member::MemberView,
            crate::models::member::MemberShort,
            crate::models::member::MembershipType,
            crate::models::member::CreateMember,
            crate::models::member::UpdateMember,
            // Borrows
            crate::models::loan::LoanRecord,
            crate::models::loan::LoanView,
            crate::models::loan::LoanStatus,
            crate::models::loan::Fine,
            crate::models::loan::FineReason,
            crate::models::loan::PaymentStatus,
            crate::models::loan::PaymentMethod,
            crate::models::loan::BookCondition,
            crate::models::loan::ConditionRecord,
            crate::models::loan::RenewalEntry,
            crate::models::loan::CheckoutRequest,
            crate::models::loan::UpdateLoanRequest,
            crate::models::loan::ReturnRequest,
            crate::models::loan::RenewRequest,
            crate::models::loan::PayFineRequest,
            crate::models::loan::LoanSort,
            crate::models::loan::SortOrder,
            crate::models::report::UserHistory,
            crate::models::report::HistorySummary,
            crate::models::report::FineReport,
            crate::models::report::FineGroup,
            // Envelope
            crate::api::Meta,
            crate::api::Pagination,
            // Health
            health::HealthResponse,
            // Errors
            crate::error::ErrorResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "books", description = "Catalog management"),
        (name = "users", description = "Member management"),
        (name = "borrows", description = "Checkout, renewal, return and fines")
    )
)]
pub struct ApiDoc;

/// Create the OpenAPI documentation router
pub fn create_openapi_router() -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
