use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Notification, NotificationKind},
    notifications::unread_count,
    schema::{letters, notifications},
    state::AppState,
};

pub const PAGE_SIZE: i64 = 20;

#[derive(Debug, Serialize)]
pub struct NotificationResponse {
    pub id: Uuid,
    pub letter_id: Option<Uuid>,
    pub letter_number: Option<String>,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub type_label: &'static str,
    pub is_read: bool,
    pub created_at: NaiveDateTime,
}

impl NotificationResponse {
    pub fn new(notification: Notification, letter_number: Option<String>) -> Self {
        let type_label = notification
            .kind
            .parse::<NotificationKind>()
            .map(NotificationKind::label)
            .unwrap_or("Notifikasi");
        Self {
            id: notification.id,
            letter_id: notification.letter_id,
            letter_number,
            message: notification.message,
            kind: notification.kind,
            type_label,
            is_read: notification.is_read,
            created_at: notification.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct InboxQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// `read` or `unread`.
    pub status: Option<String>,
    pub page: Option<i64>,
}

#[derive(Serialize)]
pub struct InboxResponse {
    pub notifications: Vec<NotificationResponse>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
    pub unread_count: i64,
}

#[derive(Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: i64,
}

#[derive(Serialize)]
pub struct UpdatedCountResponse {
    pub updated: usize,
    pub unread_count: i64,
}

#[derive(Serialize)]
pub struct DeletedCountResponse {
    pub deleted: usize,
}

fn read_filter(status: Option<&str>) -> Result<Option<bool>, AppError> {
    match status.map(str::trim).filter(|value| !value.is_empty()) {
        None | Some("all") => Ok(None),
        Some("read") => Ok(Some(true)),
        Some("unread") => Ok(Some(false)),
        Some(other) => Err(AppError::bad_request(format!(
            "invalid status '{other}'. Allowed: read, unread"
        ))),
    }
}

fn total_pages(total: i64) -> i64 {
    ((total + PAGE_SIZE - 1) / PAGE_SIZE).max(1)
}

/// Requested page limited to `1..=total_pages(total)`.
fn clamp_page(requested: Option<i64>, total: i64) -> i64 {
    requested.unwrap_or(1).clamp(1, total_pages(total))
}

fn owned_by(
    user_id: Uuid,
    query: &InboxQuery,
) -> Result<notifications::BoxedQuery<'static, diesel::pg::Pg>, AppError> {
    let mut statement = notifications::table
        .filter(notifications::user_id.eq(user_id))
        .into_boxed();
    if let Some(kind) = query.kind.as_deref().filter(|value| !value.is_empty()) {
        let kind: NotificationKind = kind.parse().map_err(AppError::bad_request)?;
        statement = statement.filter(notifications::type_.eq(kind.as_str()));
    }
    if let Some(is_read) = read_filter(query.status.as_deref())? {
        statement = statement.filter(notifications::is_read.eq(is_read));
    }
    Ok(statement)
}

pub async fn list_notifications(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<InboxQuery>,
) -> AppResult<Json<InboxResponse>> {
    let mut conn = state.db()?;

    let total: i64 = owned_by(user.user_id, &query)?
        .count()
        .get_result(&mut conn)?;
    let page = clamp_page(query.page, total);
    let ids: Vec<Uuid> = owned_by(user.user_id, &query)?
        .select(notifications::id)
        .order((notifications::created_at.desc(), notifications::id.desc()))
        .limit(PAGE_SIZE)
        .offset((page - 1) * PAGE_SIZE)
        .load(&mut conn)?;

    let rows: Vec<(Notification, Option<String>)> = notifications::table
        .left_join(letters::table)
        .filter(notifications::id.eq_any(ids))
        .order((notifications::created_at.desc(), notifications::id.desc()))
        .select((notifications::all_columns, letters::letter_number.nullable()))
        .load(&mut conn)?;

    Ok(Json(InboxResponse {
        notifications: rows
            .into_iter()
            .map(|(notification, number)| NotificationResponse::new(notification, number))
            .collect(),
        page,
        per_page: PAGE_SIZE,
        total,
        total_pages: total_pages(total),
        unread_count: unread_count(&mut conn, user.user_id)?,
    }))
}

pub async fn get_unread_count(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UnreadCountResponse>> {
    let mut conn = state.db()?;
    Ok(Json(UnreadCountResponse {
        unread_count: unread_count(&mut conn, user.user_id)?,
    }))
}

/// Marks one of the caller's notifications as read. Repeating the call changes
/// nothing.
pub async fn mark_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<Json<UpdatedCountResponse>> {
    let mut conn = state.db()?;
    let owned: Option<Uuid> = notifications::table
        .filter(notifications::id.eq(notification_id))
        .filter(notifications::user_id.eq(user.user_id))
        .select(notifications::id)
        .first(&mut conn)
        .optional()?;
    if owned.is_none() {
        return Err(AppError::not_found());
    }

    let updated = diesel::update(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::is_read.eq(false)),
    )
    .set(notifications::is_read.eq(true))
    .execute(&mut conn)?;

    Ok(Json(UpdatedCountResponse {
        updated,
        unread_count: unread_count(&mut conn, user.user_id)?,
    }))
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<UpdatedCountResponse>> {
    let mut conn = state.db()?;
    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::is_read.eq(false)),
    )
    .set(notifications::is_read.eq(true))
    .execute(&mut conn)?;

    Ok(Json(UpdatedCountResponse {
        updated,
        unread_count: 0,
    }))
}

pub async fn delete_notification(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(notification_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        notifications::table
            .filter(notifications::id.eq(notification_id))
            .filter(notifications::user_id.eq(user.user_id)),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_read(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<DeletedCountResponse>> {
    let mut conn = state.db()?;
    let deleted = diesel::delete(
        notifications::table
            .filter(notifications::user_id.eq(user.user_id))
            .filter(notifications::is_read.eq(true)),
    )
    .execute(&mut conn)?;
    Ok(Json(DeletedCountResponse { deleted }))
}
