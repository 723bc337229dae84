use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    activity::{record_activity, ClientMeta},
    auth::{password, session, throttle, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{Role, User},
    notifications::unread_count,
    routes::users::UserResponse,
    schema::users,
    state::AppState,
};

const INVALID_CREDENTIALS: &str = "invalid username or password";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserResponse,
}

#[derive(Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: UserResponse,
    pub role_title: &'static str,
    pub unread_notifications: i64,
}

/// `POST /api/auth/:role/login`. The account must hold the role named in the path.
pub async fn login(
    State(state): State<AppState>,
    Path(role): Path<String>,
    meta: ClientMeta,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let expected_role: Role = role.parse().map_err(|_| AppError::not_found())?;
    let username = payload.username.trim();
    if username.is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("username and password are required"));
    }

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    throttle::prune_attempts(&mut conn, now)?;

    let failures = throttle::failed_attempts_in_window(&mut conn, username, now)?;
    if throttle::is_locked_out(failures) {
        throttle::record_attempt(&mut conn, username, false, meta.ip_address.clone(), now)?;
        warn!(username, ip = ?meta.ip_address, "login rejected: too many failed attempts");
        return Err(AppError::too_many_requests(format!(
            "too many failed login attempts, try again in {} minutes",
            throttle::ATTEMPT_WINDOW_MINUTES
        )));
    }

    let user: Option<User> = users::table
        .filter(users::username.eq(username))
        .first(&mut conn)
        .optional()?;

    let authenticated = match &user {
        Some(user) => {
            password::verify_password(&payload.password, &user.password_hash)?
                && user.role() == Some(expected_role)
        }
        None => false,
    };

    let user = match (authenticated, user) {
        (true, Some(user)) => user,
        (_, user) => {
            throttle::record_attempt(&mut conn, username, false, meta.ip_address.clone(), now)?;
            record_activity(
                &mut conn,
                user.map(|u| u.id),
                "login_failed",
                format!("failed {expected_role} login for '{username}'"),
                &meta,
            );
            warn!(username, role = %expected_role, ip = ?meta.ip_address, "login failed");
            return Err(AppError::new(StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS));
        }
    };

    throttle::record_attempt(&mut conn, username, true, meta.ip_address.clone(), now)?;
    let session = session::create_session(&mut conn, user.id, now)?;
    let access_token =
        state
            .jwt
            .generate_token(user.id, session.id, &user.username, expected_role)?;

    record_activity(
        &mut conn,
        Some(user.id),
        "login",
        format!("{expected_role} login"),
        &meta,
    );
    info!(user_id = %user.id, role = %expected_role, "login succeeded");

    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.jwt.expires_in_seconds(),
        user: UserResponse::from(user),
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    session::revoke_session(&mut conn, user.session_id, Utc::now().naive_utc())?;
    record_activity(&mut conn, Some(user.user_id), "logout", "", &meta);
    info!(user_id = %user.user_id, "logout");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MeResponse>> {
    let mut conn = state.db()?;
    let record: User = users::table.find(user.user_id).first(&mut conn)?;
    let unread_notifications = unread_count(&mut conn, user.user_id)?;

    Ok(Json(MeResponse {
        user: UserResponse::from(record),
        role_title: user.role.title(),
        unread_notifications,
    }))
}
