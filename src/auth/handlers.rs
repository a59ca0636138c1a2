use axum::{
    extract::{FromRef, State},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use crate::{
    auth::{
        dto::{
            ForgotPasswordRequest, LoginRequest, LoginResponse, PublicUser, RegisterRequest,
            RegisterResponse, ResetPasswordRequest, VerifyEmailRequest,
        },
        jwt::{expired_session_cookie, session_cookie, JwtKeys, SessionUser},
        password::{self, verify_dummy_async, verify_password_async},
        tokens::{generate_token, reset_expiry},
    },
    error::{ApiJson, AppError, AppResult},
    mail::{self, MailKind},
    state::AppState,
    users::{credentials::NewAccount, dto::MessageResponse},
    validation::normalize_email,
};

pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists, a password reset email has been sent.";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route("/auth/verify-email", post(verify_email))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> AppResult<Json<RegisterResponse>> {
    let payload = payload.validate()?;

    if state.users.find_by_email(&payload.email).await?.is_some() {
        warn!(email = %payload.email, "email already registered");
        return Err(AppError::Conflict);
    }

    let token = generate_token();
    // the store re-checks uniqueness at write time
    let user = state
        .users
        .create(NewAccount {
            first_name: payload.first_name,
            last_name: payload.last_name,
            email: payload.email,
            password: payload.password,
            role: payload.role,
            is_email_verified: false,
            verification_token: Some(token.clone()),
        })
        .await?;

    info!(user_id = %user.id, email = %user.email, role = %user.role, "user registered");
    mail::dispatch(
        state.mailer.clone(),
        MailKind::Verification,
        user.email.clone(),
        token,
    );

    Ok(Json(RegisterResponse {
        message: "Registration successful. Please verify your email.".into(),
        user_id: user.id,
    }))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<(CookieJar, Json<LoginResponse>)> {
    let email = normalize_email(&payload.email);

    let Some(user) = state.users.find_by_email(&email).await? else {
        verify_dummy_async(payload.password).await;
        warn!(email = %email, "login unknown email");
        return Err(AppError::Unauthorized);
    };

    if !verify_password_async(payload.password, user.password_hash.clone()).await? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(AppError::Unauthorized);
    }

    if !user.is_email_verified {
        warn!(user_id = %user.id, "login before email verification");
        return Err(AppError::Unauthorized);
    }

    let token = JwtKeys::from_ref(&state).sign(user.id, user.role)?;
    let jar = jar.add(session_cookie(token, state.config.production));

    info!(user_id = %user.id, "user logged in");
    Ok((jar, Json(LoginResponse { user: user.into() })))
}

#[instrument(skip(jar))]
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<MessageResponse>) {
    (
        jar.remove(expired_session_cookie()),
        Json(MessageResponse::new("Logged out")),
    )
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    session: SessionUser,
) -> AppResult<Json<PublicUser>> {
    // a deleted account keeps a valid token until it expires
    let user = state
        .users
        .find_by_id(session.id)
        .await?
        .ok_or(AppError::Unauthorized)?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn verify_email(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<VerifyEmailRequest>,
) -> AppResult<Json<MessageResponse>> {
    if payload.token.is_empty() {
        return Err(AppError::InvalidToken);
    }
    let Some(user) = state.users.consume_verification_token(&payload.token).await? else {
        warn!("verification token rejected");
        return Err(AppError::InvalidToken);
    };
    info!(user_id = %user.id, "email verified");
    Ok(Json(MessageResponse::new("Email verified successfully")))
}

/// Same answer whether or not the account exists.
#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    let email = normalize_email(&payload.email);
    let token = generate_token();
    let expires = reset_expiry(OffsetDateTime::now_utc());

    match state.users.set_reset_token(&email, &token, expires).await? {
        Some(user) => {
            info!(user_id = %user.id, "password reset requested");
            mail::dispatch(state.mailer.clone(), MailKind::PasswordReset, user.email, token);
        }
        None => debug!(email = %email, "password reset for unknown email"),
    }

    Ok(Json(MessageResponse::new(FORGOT_PASSWORD_MESSAGE)))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    if payload.token.is_empty() {
        return Err(AppError::InvalidToken);
    }
    if !password::is_acceptable(&payload.new_password) {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            password::MIN_PASSWORD_LEN
        )));
    }

    let Some(user) = state
        .users
        .reset_password(&payload.token, payload.new_password, OffsetDateTime::now_utc())
        .await?
    else {
        warn!("reset token rejected");
        return Err(AppError::InvalidToken);
    };

    info!(user_id = %user.id, "password reset");
    Ok(Json(MessageResponse::new("Password reset successful")))
}
