use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    activity::{record_activity, ClientMeta},
    auth::{password, session, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewUser, Role, User},
    schema::users,
    state::AppState,
};

const MAX_USERNAME_LENGTH: usize = 100;

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub role: String,
    pub full_name: String,
    pub has_signature: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            full_name: user.full_name,
            has_signature: user.digital_signature_path.is_some(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct UserListQuery {
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub role: String,
    pub full_name: String,
}

#[derive(Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub role: Option<String>,
    pub full_name: Option<String>,
    pub password: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UpdateUserChangeset {
    username: Option<String>,
    role: Option<String>,
    full_name: Option<String>,
    password_hash: Option<String>,
    updated_at: Option<NaiveDateTime>,
}

#[derive(Serialize)]
pub struct ResetPasswordResponse {
    pub user_id: Uuid,
    pub new_password: String,
}

pub fn validate_username(username: &str) -> Result<String, AppError> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request("username must not be empty"));
    }
    if trimmed.chars().count() > MAX_USERNAME_LENGTH {
        return Err(AppError::bad_request("username is too long"));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(AppError::bad_request("username must not contain whitespace"));
    }
    Ok(trimmed.to_string())
}

pub fn validate_password(candidate: &str) -> Result<(), AppError> {
    let errors = password::password_strength_errors(candidate);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::bad_request(errors.join(", ")))
    }
}

fn parse_role(value: &str) -> Result<Role, AppError> {
    value.parse().map_err(AppError::bad_request)
}

fn non_empty(value: &str, field: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

fn username_taken(
    conn: &mut PgConnection,
    username: &str,
    except: Option<Uuid>,
) -> QueryResult<bool> {
    let mut query = users::table
        .filter(users::username.eq(username))
        .select(users::id)
        .into_boxed();
    if let Some(id) = except {
        query = query.filter(users::id.ne(id));
    }
    Ok(query.first::<Uuid>(conn).optional()?.is_some())
}

pub async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<UserListQuery>,
) -> AppResult<Json<Vec<UserResponse>>> {
    let mut conn = state.db()?;
    let mut statement = users::table.into_boxed();
    if let Some(role) = query.role.as_deref().filter(|value| !value.is_empty()) {
        statement = statement.filter(users::role.eq(parse_role(role)?.as_str()));
    }

    let rows: Vec<User> = statement
        .order((users::role.asc(), users::full_name.asc()))
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(UserResponse::from).collect()))
}

pub async fn create_user(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    meta: ClientMeta,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<UserResponse>)> {
    let username = validate_username(&payload.username)?;
    let full_name = non_empty(&payload.full_name, "full_name")?;
    let role = parse_role(&payload.role)?;
    validate_password(&payload.password)?;

    let mut conn = state.db()?;
    if username_taken(&mut conn, &username, None)? {
        return Err(AppError::bad_request("username already exists"));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        username,
        password_hash: password::hash_password(&payload.password)?,
        role: role.as_str().to_string(),
        full_name,
    };

    let user: User = match diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(&mut conn)
    {
        Ok(user) => user,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => return Err(AppError::bad_request("username already exists")),
        Err(err) => return Err(AppError::from(err)),
    };

    record_activity(
        &mut conn,
        Some(admin.user_id),
        "user_create",
        format!("User created: {} ({})", user.username, user.role),
        &meta,
    );
    info!(user_id = %user.id, role = %role, "user created");

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    admin: AuthenticatedUser,
    meta: ClientMeta,
    Json(payload): Json<UpdateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    let mut conn = state.db()?;
    let existing: User = users::table.find(user_id).first(&mut conn)?;

    let mut changeset = UpdateUserChangeset::default();
    if let Some(username) = payload.username.as_deref() {
        let username = validate_username(username)?;
        if username != existing.username {
            if username_taken(&mut conn, &username, Some(user_id))? {
                return Err(AppError::bad_request("username already exists"));
            }
            changeset.username = Some(username);
        }
    }
    if let Some(role) = payload.role.as_deref() {
        let role = parse_role(role)?;
        if existing.role() != Some(role) {
            if user_id == admin.user_id {
                return Err(AppError::bad_request("you cannot change your own role"));
            }
            changeset.role = Some(role.as_str().to_string());
        }
    }
    if let Some(full_name) = payload.full_name.as_deref() {
        changeset.full_name = Some(non_empty(full_name, "full_name")?);
    }
    if let Some(new_password) = payload.password.as_deref().filter(|value| !value.is_empty()) {
        validate_password(new_password)?;
        changeset.password_hash = Some(password::hash_password(new_password)?);
    }

    let role_changed = changeset.role.is_some();
    let password_changed = changeset.password_hash.is_some();
    if changeset.username.is_none()
        && changeset.full_name.is_none()
        && !role_changed
        && !password_changed
    {
        return Ok(Json(UserResponse::from(existing)));
    }

    let now = Utc::now().naive_utc();
    changeset.updated_at = Some(now);
    let updated: User = conn.transaction::<_, AppError, _>(|conn| {
        let updated = diesel::update(users::table.find(user_id))
            .set(&changeset)
            .get_result(conn)?;
        if role_changed || password_changed {
            session::revoke_user_sessions(conn, user_id, now)?;
        }
        Ok(updated)
    })?;

    record_activity(
        &mut conn,
        Some(admin.user_id),
        "user_update",
        format!("User updated: {} (ID: {})", updated.username, updated.id),
        &meta,
    );
    info!(user_id = %updated.id, "user updated");

    Ok(Json(UserResponse::from(updated)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    admin: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<StatusCode> {
    if user_id == admin.user_id {
        return Err(AppError::bad_request("you cannot delete your own account"));
    }

    let mut conn = state.db()?;
    let existing: User = users::table.find(user_id).first(&mut conn)?;
    diesel::delete(users::table.find(user_id)).execute(&mut conn)?;

    if let Some(path) = existing.digital_signature_path.as_deref() {
        if let Err(err) = state.storage.delete_object(path).await {
            tracing::warn!(user_id = %user_id, error = %err, "failed to delete signature of removed user");
        }
    }

    record_activity(
        &mut conn,
        Some(admin.user_id),
        "user_delete",
        format!("User deleted: {} (ID: {})", existing.username, existing.id),
        &meta,
    );
    info!(user_id = %user_id, "user deleted");

    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    admin: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<Json<ResetPasswordResponse>> {
    let mut conn = state.db()?;
    let existing: User = users::table.find(user_id).first(&mut conn)?;

    let new_password = password::generate_password();
    let password_hash = password::hash_password(&new_password)?;
    let now = Utc::now().naive_utc();

    conn.transaction::<_, AppError, _>(|conn| {
        diesel::update(users::table.find(user_id))
            .set((
                users::password_hash.eq(password_hash),
                users::updated_at.eq(now),
            ))
            .execute(conn)?;
        session::revoke_user_sessions(conn, user_id, now)?;
        Ok(())
    })?;

    record_activity(
        &mut conn,
        Some(admin.user_id),
        "user_reset_password",
        format!("Password reset for {}", existing.username),
        &meta,
    );
    info!(user_id = %user_id, "password reset");

    Ok(Json(ResetPasswordResponse {
        user_id,
        new_password,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_are_trimmed_and_checked() {
        assert_eq!(validate_username("  dewi ").unwrap(), "dewi");
        assert!(validate_username("   ").is_err());
        assert!(validate_username("dewi lestari").is_err());
    }

    #[test]
    fn weak_password_message_lists_every_rule() {
        let err = validate_password("short").unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(err.message().contains("at least 8 characters"));
        assert!(err.message().contains("uppercase"));
        assert!(err.message().contains("digit"));
    }
}
