//! Member (user) management endpoints

use axum::extract::{Path, State};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::AppResult,
    models::member::{CreateMember, MemberQuery, MemberView, UpdateMember},
};

use super::{ApiResponse, Pagination, ValidatedJson, ValidatedQuery};

/// List members with filters
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    params(MemberQuery),
    responses(
        (status = 200, description = "Paginated members", body = Vec<MemberView>),
        (status = 400, description = "Invalid filter", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_users(
    State(state): State<crate::AppState>,
    ValidatedQuery(query): ValidatedQuery<MemberQuery>,
) -> AppResult<ApiResponse<Vec<MemberView>>> {
    let (members, total) = state.services.members.search_members(&query).await?;
    let now = Utc::now();
    let views = members.into_iter().map(|m| MemberView::new(m, now)).collect();
    Ok(ApiResponse::ok("Users retrieved successfully", views)
        .paginated(Pagination::new(total, query.page, query.limit)))
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    params(
        ("id" = Uuid, Path, description = "Member ID")
    ),
    responses(
        (status = 200, description = "Member details", body = MemberView),
        (status = 404, description = "User not found", body = crate::error::ErrorResponse)
    )
)]
pub async fn get_user(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<MemberView>> {
    let member = state.services.members.get_member(id).await?;
    Ok(ApiResponse::ok("User retrieved successfully", MemberView::new(member, Utc::now())))
}

/// Register a new member
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    request_body = CreateMember,
    responses(
        (status = 201, description = "Member created", body = MemberView),
        (status = 400, description = "Invalid input", body = crate::error::ErrorResponse),
        (status = 409, description = "Email already exists", body = crate::error::ErrorResponse)
    )
)]
pub async fn create_user(
    State(state): State<crate::AppState>,
    ValidatedJson(request): ValidatedJson<CreateMember>,
) -> AppResult<ApiResponse<MemberView>> {
    let member = state.services.members.create_member(request).await?;
    Ok(ApiResponse::created("User created successfully", MemberView::new(member, Utc::now())))
}

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "users",
    params(
        ("id" = Uuid, Path, description = "Member ID")
    ),
    request_body = UpdateMember,
    responses(
        (status = 200, description = "Member updated", body = MemberView),
        (status = 400, description = "Invalid input", body = crate::error::ErrorResponse),
        (status = 404, description = "User not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Email already exists", body = crate::error::ErrorResponse)
    )
)]
pub async fn update_user(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<UpdateMember>,
) -> AppResult<ApiResponse<MemberView>> {
    let member = state.services.members.update_member(id, request).await?;
    Ok(ApiResponse::ok("User updated successfully", MemberView::new(member, Utc::now())))
}

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    params(
        ("id" = Uuid, Path, description = "Member ID")
    ),
    responses(
        (status = 200, description = "Member deleted"),
        (status = 404, description = "User not found", body = crate::error::ErrorResponse),
        (status = 409, description = "Member has open loans", body = crate::error::ErrorResponse)
    )
)]
pub async fn delete_user(
    State(state): State<crate::AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<ApiResponse<()>> {
    state.services.members.delete_member(id).await?;
    Ok(ApiResponse::ok("User deleted successfully", ()))
}
