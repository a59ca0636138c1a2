use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    error::{ApiJson, AppError, AppResult},
    pagination::{PageParams, Paginated},
    state::AppState,
    users::{
        credentials::{AccountChanges, NewAccount},
        dto::{CreateUserRequest, MessageResponse, UpdateUserRequest, UserListQuery, UserView},
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

/// Ids that are not UUIDs cannot name a record.
fn parse_id(raw: &str) -> AppResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound)
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    Query(q): Query<UserListQuery>,
) -> AppResult<Json<Paginated<UserView>>> {
    let params = PageParams::from_query(q.page.as_deref(), q.limit.as_deref());
    let filter = q.filter()?;
    let (users, total) = state.users.list(&filter, params).await?;
    let page = Paginated::new(users, total, params).map(UserView::from);
    Ok(Json(page))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserView>)> {
    let payload = payload.validate()?;
    if state.users.find_by_email(&payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(AppError::Conflict);
    }

    let user = state
        .users
        .create(NewAccount {
            first_name: payload.first_name,
            last_name: payload.last_name,
            email: payload.email,
            password: payload.password,
            role: payload.role,
            is_email_verified: false,
            verification_token: None,
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, "user created");
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<UserView>> {
    let id = parse_id(&id)?;
    let user = state.users.find_by_id(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ApiJson(payload): ApiJson<UpdateUserRequest>,
) -> AppResult<Json<UserView>> {
    let id = parse_id(&id)?;
    let payload = payload.validate()?;
    let user = state
        .users
        .update(
            id,
            AccountChanges {
                first_name: payload.first_name,
                last_name: payload.last_name,
                email: payload.email,
                role: payload.role,
                password: None,
            },
        )
        .await?;

    info!(user_id = %user.id, "user updated");
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let id = parse_id(&id)?;
    let user = state.users.delete(id).await?;
    info!(user_id = %user.id, email = %user.email, "user deleted");
    Ok(Json(MessageResponse::new("User deleted successfully")))
}
