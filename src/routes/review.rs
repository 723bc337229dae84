//! Manager and director review endpoints. The stage is derived from the caller's
//! role, so both role routers share these handlers.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use diesel::{pg::Pg, prelude::*};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    activity::{record_activity, ClientMeta},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Letter, LetterStatus, Notification, Template, User},
    notifications::unread_count,
    render::{self, FinalLetter, SignatureBlock, SignatureImage},
    routes::letters::{
        letter_detail_response, load_summaries, parse_status, LetterDetail, LetterSummary,
        RECENT_LETTERS_LIMIT,
    },
    routes::notifications::NotificationResponse,
    schema::{letters, notifications, templates, users},
    state::AppState,
    storage::final_letter_key,
    workflow::{apply_transition, plan_transition, Actor, ReviewAction, Stage, Transition, WorkflowError},
};

const DASHBOARD_NOTIFICATIONS_LIMIT: i64 = 5;

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub action: String,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct ReviewListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ReviewerCounts {
    pub awaiting: i64,
    pub processed: i64,
    pub approved: i64,
    pub rejected: i64,
    pub revision: i64,
}

#[derive(Serialize)]
pub struct ReviewerDashboardResponse {
    pub stage: String,
    pub counts: ReviewerCounts,
    pub awaiting_letters: Vec<LetterSummary>,
    pub recent_notifications: Vec<NotificationResponse>,
    pub unread_notifications: i64,
    pub has_signature: bool,
}

fn stage_for(user: &AuthenticatedUser) -> AppResult<Stage> {
    Stage::for_role(user.role).ok_or_else(|| {
        AppError::from(WorkflowError::RoleNotAllowed { role: user.role })
    })
}

fn acted_by<'a>(stage: Stage, user_id: Uuid) -> letters::BoxedQuery<'a, Pg> {
    match stage {
        Stage::Manager => letters::table
            .filter(letters::manager_action_by.eq(user_id))
            .into_boxed(),
        Stage::Director => letters::table
            .filter(letters::director_action_by.eq(user_id))
            .into_boxed(),
    }
}

/// Outcome counts for one reviewer. A manager's decision is a rejection or revision
/// only when the letter never reached the director.
fn reviewer_counts(
    conn: &mut PgConnection,
    stage: Stage,
    user_id: Uuid,
) -> QueryResult<ReviewerCounts> {
    let awaiting = letters::table
        .filter(letters::status.eq(stage.expected_status().as_str()))
        .count()
        .get_result(conn)?;
    let processed = acted_by(stage, user_id).count().get_result(conn)?;

    let mut outcome = |status: LetterStatus| -> QueryResult<i64> {
        let mut query = acted_by(stage, user_id).filter(letters::status.eq(status.as_str()));
        if stage == Stage::Manager {
            query = query.filter(letters::director_action_at.is_null());
        }
        query.count().get_result(conn)
    };
    let rejected = outcome(LetterStatus::Rejected)?;
    let revision = outcome(LetterStatus::Revision)?;

    Ok(ReviewerCounts {
        awaiting,
        processed,
        approved: processed - rejected - revision,
        rejected,
        revision,
    })
}

pub async fn dashboard(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<ReviewerDashboardResponse>> {
    let stage = stage_for(&user)?;
    let mut conn = state.db()?;

    let counts = reviewer_counts(&mut conn, stage, user.user_id)?;
    let awaiting_letters = load_summaries(
        &mut conn,
        letters::table
            .filter(letters::status.eq(stage.expected_status().as_str()))
            .into_boxed(),
        Some(RECENT_LETTERS_LIMIT),
    )?;
    let recent: Vec<(Notification, Option<String>)> = notifications::table
        .left_join(letters::table)
        .filter(notifications::user_id.eq(user.user_id))
        .order(notifications::created_at.desc())
        .limit(DASHBOARD_NOTIFICATIONS_LIMIT)
        .select((notifications::all_columns, letters::letter_number.nullable()))
        .load(&mut conn)?;
    let unread_notifications = unread_count(&mut conn, user.user_id)?;
    let has_signature = users::table
        .find(user.user_id)
        .select(users::digital_signature_path)
        .first::<Option<String>>(&mut conn)?
        .is_some();

    Ok(Json(ReviewerDashboardResponse {
        stage: stage.to_string(),
        counts,
        awaiting_letters,
        recent_notifications: recent
            .into_iter()
            .map(|(notification, number)| NotificationResponse::new(notification, number))
            .collect(),
        unread_notifications,
        has_signature,
    }))
}

/// Letters in the caller's queue by default; any status may be requested.
pub async fn list_letters(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ReviewListQuery>,
) -> AppResult<Json<Vec<LetterSummary>>> {
    let stage = stage_for(&user)?;
    let status = match query.status.as_deref().filter(|value| !value.is_empty()) {
        Some(value) => parse_status(value)?,
        None => stage.expected_status(),
    };

    let mut conn = state.db()?;
    let summaries = load_summaries(
        &mut conn,
        letters::table
            .filter(letters::status.eq(status.as_str()))
            .into_boxed(),
        None,
    )?;
    Ok(Json(summaries))
}

pub async fn get_letter(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(letter_id): Path<Uuid>,
) -> AppResult<Json<LetterDetail>> {
    stage_for(&user)?;
    let mut conn = state.db()?;
    Ok(Json(letter_detail_response(&state, &mut conn, letter_id)?))
}

pub async fn review_letter(
    State(state): State<AppState>,
    Path(letter_id): Path<Uuid>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    Json(payload): Json<ReviewRequest>,
) -> AppResult<Json<LetterDetail>> {
    let action: ReviewAction = payload.action.parse().map_err(AppError::bad_request)?;
    let mut conn = state.db()?;
    let letter: Letter = letters::table.find(letter_id).first(&mut conn)?;
    let reviewer: User = users::table.find(user.user_id).first(&mut conn)?;

    let has_signature = match (action, reviewer.digital_signature_path.as_deref()) {
        (ReviewAction::Approve, Some(key)) => state.storage.object_exists(key).await?,
        _ => false,
    };

    let transition = plan_transition(
        &letter.status,
        user.role,
        action,
        payload.notes.as_deref(),
        has_signature,
    )
    .map_err(|err| {
        warn!(
            letter_id = %letter.id,
            user_id = %user.user_id,
            action = action.as_str(),
            error = %err,
            "review rejected"
        );
        AppError::from(err)
    })?;

    let now = Utc::now().naive_utc();
    let final_letter_path = if transition.is_final_approval() {
        let html = render_final_document(&state, &mut conn, &letter, &reviewer).await?;
        let key = final_letter_key(&letter.letter_number, Uuid::new_v4());
        state
            .storage
            .put_object(&key, html.into_bytes(), Some("text/html; charset=utf-8".into()))
            .await?;
        Some(key)
    } else {
        None
    };

    let actor = Actor {
        id: reviewer.id,
        full_name: &reviewer.full_name,
    };
    let updated = match apply_transition(
        &mut conn,
        &letter,
        &actor,
        &transition,
        final_letter_path.as_deref(),
        now,
    ) {
        Ok(updated) => updated,
        Err(err) => {
            if let Some(key) = final_letter_path.as_deref() {
                if let Err(cleanup) = state.storage.delete_object(key).await {
                    warn!(key, error = %cleanup, "failed to remove orphaned final letter");
                }
            }
            warn!(letter_id = %letter.id, error = %err, "review could not be applied");
            return Err(AppError::from(err));
        }
    };

    log_transition(&mut conn, &user, &updated, &transition, &meta);
    Ok(Json(letter_detail_response(&state, &mut conn, updated.id)?))
}

fn log_transition(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    letter: &Letter,
    transition: &Transition,
    meta: &ClientMeta,
) {
    record_activity(
        conn,
        Some(user.user_id),
        &transition.activity_action(),
        format!("Letter {}: {} -> {}", letter.letter_number, transition.from, transition.to),
        meta,
    );
    info!(
        letter_id = %letter.id,
        letter_number = %letter.letter_number,
        from = %transition.from,
        to = %transition.to,
        reviewer = %user.user_id,
        "letter reviewed"
    );
}

async fn load_signature(state: &AppState, key: Option<&str>) -> Option<SignatureImage> {
    let key = key?;
    match state.storage.get_object(key).await {
        Ok(bytes) => Some(SignatureImage {
            content_type: mime_guess::from_path(key)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            bytes,
        }),
        Err(err) => {
            warn!(key, error = %err, "signature image unavailable for final letter");
            None
        }
    }
}

async fn render_final_document(
    state: &AppState,
    conn: &mut PgConnection,
    letter: &Letter,
    director: &User,
) -> AppResult<String> {
    let template: Template = templates::table.find(letter.template_id).first(conn)?;
    let manager: Option<User> = match letter.manager_action_by {
        Some(id) => users::table.find(id).first(conn).optional()?,
        None => None,
    };

    let offset = state.config.utc_offset();
    let local_now = state.local_now();
    let body = render::render_with_date(
        &template.template_content,
        &letter.field_map(),
        local_now.date_naive(),
    );

    let mut signatures = Vec::with_capacity(2);
    if let Some(manager) = &manager {
        signatures.push(SignatureBlock {
            title: crate::models::Role::Manager.title(),
            name: manager.full_name.clone(),
            signed_at: letter
                .manager_action_at
                .map(|at| render::to_local(at, offset)),
            image: load_signature(state, manager.digital_signature_path.as_deref()).await,
        });
    }
    signatures.push(SignatureBlock {
        title: crate::models::Role::Director.title(),
        name: director.full_name.clone(),
        signed_at: Some(local_now.naive_local()),
        image: load_signature(state, director.digital_signature_path.as_deref()).await,
    });

    Ok(render::render_final_letter(&FinalLetter {
        letter_number: &letter.letter_number,
        template_name: &template.name,
        body: &body,
        signatures,
    }))
}
