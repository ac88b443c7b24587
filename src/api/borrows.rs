//! Borrowing (loan lifecycle) endpoints

use axum::extract::{Path, State};
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::{
        loan::{
            CheckoutRequest, FineReportQuery, LoanQuery, LoanView, PageQuery, PayFineRequest,
            RenewRequest, ReturnRequest, UpdateLoanRequest,
        },
        report::{FineReport, UserHistory},
    },
};

use super::{ApiResponse, OptionalJson, Pagination, ValidatedJson, ValidatedQuery};

/// List borrow records with filters
#[utoipa::path(
    get,
    path = "/borrows",
    tag = "borrows",
    params(LoanQuery),
    responses(
        (status = 200, description = "Paginated borrow records", body = Vec<LoanView>),
        (status = 400, description = "Invalid filter", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_borrows(
    State(state): State<crate::AppState>,
    ValidatedQuery(query): ValidatedQuery<LoanQuery>,
) -> AppResult<ApiResponse<Vec<LoanView>>> {
    let (loans, total) = state.services.circulation.list(&query).await?;
    Ok(ApiResponse::ok("Borrow records retrieved successfully", loans)
        .paginated(Pagination::new(total, query.page, query.limit)))
}

/// Overdue loans, earliest due date first
#[utoipa::path(
    get,
    path = "/borrows/overdue",
    tag = "borrows",
    params(PageQuery),
    responses(
        (status = 200, description = "Paginated overdue loans", body = Vec<LoanView>)
    )
)]
pub async fn list_overdue(
    State(state): State<crate::AppState>,
    ValidatedQuery(query): ValidatedQuery<PageQuery>,
) -> AppResult<ApiResponse<Vec<LoanView>>> {
    let (loans, total) = state
        .services
        .circulation
        .list_overdue(query.page, query.limit)
        .await?;
    Ok(ApiResponse::ok("Overdue books retrieved successfully", loans)
        .paginated(Pagination::new(total, query.page, query.limit)))
}

/// Fines assessed in a date window, grouped by payment status
#[utoipa::path(
    get,
    path = "/borrows/fines/report",
    tag = "borrows",
    params(FineReportQuery),
    responses(
        (status = 200, description = "Fine report", body = FineReport),
        (status = 400, description = "Invalid window", body = crate::error::ErrorResponse)
    )
)]
pub async fn fine_report(
    State(state): State<crate::AppState>,
    ValidatedQuery(query): ValidatedQuery<FineReportQuery>,
) -> AppResult<ApiResponse<FineReport>> {
    let report = state.services.circulation.fine_report(query.from, query.to).await?;
    Ok(ApiResponse::ok("Fine report generated successfully", report))
}

/// Borrow history of one member
#[utoipa::path(
    get,
    path = "/borrows/user/{user_id}",
    tag = "borrows",
    params(
        ("user_id" = Uuid, Path, description = "Member ID")
    ),
    responses(
        (status = 200, description = "Member history with summary", body = UserHistory),
        (status = 404, description = "User not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn user_history(
    State(state): State<crate::AppState>,
    Path(user_id): Path<Uuid>,
) -> AppResult<ApiResponse<UserHistory>> {
    let history = state.services.circulation.user_history(user_id).await?;
    Ok(ApiResponse::ok("User borrow history retrieved successfully", history))
}

/// Get a borrow record
#[utoipa::path(
    get,
    path = "/borrows/{id}",
    tag = "borrows",
    params(
        ("id" = Uuid, Path, description = "Borrow record ID")
    ),
    responses(
        (status = 200, description = "Borrow record", body = LoanView),
        (status = 404, description = "Borrow record not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_borrow(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<LoanView>> {
    let loan = state.services.circulation.get(id).await?;
    Ok(ApiResponse::ok("Borrow record retrieved successfully", loan))
}

/// Check a book out
#[utoipa::path(
    post,
    path = "/borrows",
    tag = "borrows",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Book borrowed", body = LoanView),
        (status = 400, description = "Membership, availability or limit rule violated", body = crate::error::ErrorResponse),
        (status = 404, description = "User or book not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_borrow(
    State(state): State<crate::AppState>,
    ValidatedJson(request): ValidatedJson<CheckoutRequest>,
) -> AppResult<ApiResponse<LoanView>> {
    let loan = state.services.circulation.checkout(request).await?;
    Ok(ApiResponse::created("Book borrowed successfully", loan))
}

/// Edit notes, checkout condition or due date
#[utoipa::path(
    put,
    path = "/borrows/{id}",
    tag = "borrows",
    params(
        ("id" = Uuid, Path, description = "Borrow record ID")
    ),
    request_body = UpdateLoanRequest,
    responses(
        (status = 200, description = "Borrow record updated", body = LoanView),
        (status = 400, description = "Invalid change", body = crate::error::ErrorResponse),
        (status = 404, description = "Borrow record not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_borrow(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<UpdateLoanRequest>,
) -> AppResult<ApiResponse<LoanView>> {
    let loan = state.services.circulation.update(id, request).await?;
    Ok(ApiResponse::ok("Borrow record updated successfully", loan))
}

/// Return a book (condition `lost` closes the loan as lost)
#[utoipa::path(
    post,
    path = "/borrows/{id}/return",
    tag = "borrows",
    params(
        ("id" = Uuid, Path, description = "Borrow record ID")
    ),
    request_body(content = ReturnRequest, description = "Optional return condition"),
    responses(
        (status = 200, description = "Book returned", body = LoanView),
        (status = 400, description = "Already returned", body = crate::error::ErrorResponse),
        (status = 404, description = "Borrow record not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn return_borrow(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
    OptionalJson(body): OptionalJson<ReturnRequest>,
) -> AppResult<ApiResponse<LoanView>> {
    let condition = body.and_then(|r| r.book_condition);
    let loan = state.services.circulation.return_loan(id, condition).await?;
    Ok(ApiResponse::ok("Book returned successfully", loan))
}

/// Renew a loan
#[utoipa::path(
    post,
    path = "/borrows/{id}/renew",
    tag = "borrows",
    params(
        ("id" = Uuid, Path, description = "Borrow record ID")
    ),
    request_body(content = RenewRequest, description = "Optional extension in days"),
    responses(
        (status = 200, description = "Loan renewed", body = LoanView),
        (status = 400, description = "Loan cannot be renewed", body = crate::error::ErrorResponse),
        (status = 404, description = "Borrow record not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn renew_borrow(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
    OptionalJson(body): OptionalJson<RenewRequest>,
) -> AppResult<ApiResponse<LoanView>> {
    let extension_days = body.and_then(|r| r.extension_days);
    let loan = state.services.circulation.renew(id, extension_days).await?;
    Ok(ApiResponse::ok("Book renewed successfully", loan))
}

/// Pay or waive the fine of a closed loan
#[utoipa::path(
    post,
    path = "/borrows/{id}/pay-fine",
    tag = "borrows",
    params(
        ("id" = Uuid, Path, description = "Borrow record ID")
    ),
    request_body = PayFineRequest,
    responses(
        (status = 200, description = "Fine settled", body = LoanView),
        (status = 400, description = "No fine due, already paid or insufficient amount", body = crate::error::ErrorResponse),
        (status = 404, description = "Borrow record not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn pay_fine(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<PayFineRequest>,
) -> AppResult<ApiResponse<LoanView>> {
    let loan = state
        .services
        .circulation
        .pay_fine(id, request.payment_method, request.amount)
        .await?;
    Ok(ApiResponse::ok("Fine paid successfully", loan))
}
