//! Endpoints for submitters. None of these require a login.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    activity::{record_activity, ClientMeta},
    error::{AppError, AppResult},
    models::{Letter, LetterStatus, NewLetter, NotificationKind, Role, Template},
    notifications::{notify_users, user_ids_with_role},
    numbering::next_letter_number,
    routes::letters::{load_detail, LetterDetail},
    routes::templates::TemplateResponse,
    schema::{letters, templates},
    state::AppState,
};

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

#[derive(Deserialize)]
pub struct SubmitLetterRequest {
    pub template_id: Uuid,
    pub submitter_name: String,
    pub submitter_email: String,
    pub submitter_phone: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

#[derive(Serialize)]
pub struct SubmitLetterResponse {
    pub letter_number: String,
    pub status: String,
    pub status_label: &'static str,
}

#[derive(Deserialize)]
pub struct TrackQuery {
    pub letter_number: Option<String>,
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct LetterMatch {
    pub letter_number: String,
    pub template_name: String,
    pub status: String,
    pub status_label: &'static str,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum TrackResponse {
    Letter(TrackedLetter),
    Matches { letters: Vec<LetterMatch> },
}

/// Tracking view of a letter. Reviewer identities are reduced to names.
#[derive(Serialize)]
pub struct TrackedLetter {
    pub letter_number: String,
    pub template_name: String,
    pub submitter_name: String,
    pub status: String,
    pub status_label: &'static str,
    pub created_at: NaiveDateTime,
    pub manager_name: Option<String>,
    pub manager_notes: Option<String>,
    pub director_name: Option<String>,
    pub director_notes: Option<String>,
    pub content: String,
    pub document_available: bool,
    pub timeline: Vec<crate::render::TimelineStep>,
}

impl From<LetterDetail> for TrackedLetter {
    fn from(detail: LetterDetail) -> Self {
        Self {
            letter_number: detail.summary.letter_number,
            template_name: detail.summary.template_name,
            submitter_name: detail.summary.submitter_name,
            status: detail.summary.status,
            status_label: detail.summary.status_label,
            created_at: detail.summary.created_at,
            manager_name: detail.manager_review.name,
            manager_notes: detail.manager_review.notes,
            director_name: detail.director_review.name,
            director_notes: detail.director_review.notes,
            content: detail.content,
            document_available: detail.document_available,
            timeline: detail.timeline,
        }
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

/// Checks submitted values against the template's required keys. Every key must
/// be present with a non-blank value and no other keys are accepted.
pub fn validate_letter_fields(
    required: &[String],
    submitted: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, AppError> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|key| {
            submitted
                .get(key.as_str())
                .map_or(true, |value| value.trim().is_empty())
        })
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(AppError::bad_request(format!(
            "required fields are missing: {}",
            missing.join(", ")
        )));
    }

    let unknown: Vec<&str> = submitted
        .keys()
        .filter(|key| !required.contains(*key))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        return Err(AppError::bad_request(format!(
            "unknown fields: {}",
            unknown.join(", ")
        )));
    }

    Ok(submitted
        .iter()
        .map(|(key, value)| (key.clone(), value.trim().to_string()))
        .collect())
}

pub async fn list_templates(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<TemplateResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Template> = templates::table
        .order(templates::name.asc())
        .load(&mut conn)?;
    Ok(Json(
        rows.into_iter()
            .map(|template| TemplateResponse::new(template, None))
            .collect(),
    ))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> AppResult<Json<TemplateResponse>> {
    let mut conn = state.db()?;
    let template: Template = templates::table.find(template_id).first(&mut conn)?;
    Ok(Json(TemplateResponse::new(template, None)))
}

pub async fn submit_letter(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(payload): Json<SubmitLetterRequest>,
) -> AppResult<(StatusCode, Json<SubmitLetterResponse>)> {
    let submitter_name = payload.submitter_name.trim().to_string();
    let submitter_email = payload.submitter_email.trim().to_string();
    if submitter_name.is_empty() || submitter_email.is_empty() {
        return Err(AppError::bad_request(
            "submitter_name and submitter_email are required",
        ));
    }
    if !is_valid_email(&submitter_email) {
        return Err(AppError::bad_request("submitter_email is not a valid email address"));
    }
    let submitter_phone = payload
        .submitter_phone
        .as_deref()
        .map(str::trim)
        .filter(|phone| !phone.is_empty())
        .map(str::to_owned);

    let mut conn = state.db()?;
    let template: Template = templates::table
        .find(payload.template_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::bad_request("template does not exist"))?;
    let fields = validate_letter_fields(&template.field_keys(), &payload.fields)?;

    let today = state.local_now().date_naive();
    let prefix = state.config.letter_number_prefix.clone();
    let letter: Letter = conn.transaction::<_, AppError, _>(|conn| {
        let letter_number = next_letter_number(conn, &prefix, today)?;
        let new_letter = NewLetter {
            id: Uuid::new_v4(),
            letter_number,
            template_id: template.id,
            submitter_name,
            submitter_email,
            submitter_phone,
            letter_data: Value::Object(
                fields
                    .into_iter()
                    .map(|(key, value)| (key, Value::String(value)))
                    .collect(),
            ),
            status: LetterStatus::Pending.as_str().to_string(),
        };
        let letter: Letter = diesel::insert_into(letters::table)
            .values(&new_letter)
            .get_result(conn)?;

        let admins = user_ids_with_role(conn, Role::Admin)?;
        let message = format!(
            "Pengajuan surat baru {} ({}) dari {}",
            letter.letter_number, template.name, letter.submitter_name
        );
        notify_users(
            conn,
            &admins,
            Some(letter.id),
            &message,
            NotificationKind::NewSubmission,
        )?;
        Ok(letter)
    })?;

    record_activity(
        &mut conn,
        None,
        "letter_submit",
        format!("Letter submitted: {}", letter.letter_number),
        &meta,
    );
    info!(
        letter_id = %letter.id,
        letter_number = %letter.letter_number,
        template_id = %template.id,
        "letter submitted"
    );

    Ok((
        StatusCode::CREATED,
        Json(SubmitLetterResponse {
            letter_number: letter.letter_number,
            status: letter.status,
            status_label: LetterStatus::Pending.label(),
        }),
    ))
}

fn tracked(state: &AppState, conn: &mut PgConnection, letter: Letter) -> AppResult<TrackedLetter> {
    let today = state.local_now().date_naive();
    let detail = load_detail(conn, letter, today, state.config.utc_offset())?;
    Ok(TrackedLetter::from(detail))
}

fn find_by_number(conn: &mut PgConnection, letter_number: &str) -> AppResult<Letter> {
    letters::table
        .filter(letters::letter_number.eq(letter_number.trim()))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(StatusCode::NOT_FOUND, "letter not found"))
}

pub async fn track(
    State(state): State<AppState>,
    Query(query): Query<TrackQuery>,
) -> AppResult<Json<TrackResponse>> {
    let letter_number = query
        .letter_number
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let email = query
        .email
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());

    let mut conn = state.db()?;
    if let Some(letter_number) = letter_number {
        let letter = find_by_number(&mut conn, letter_number)?;
        return Ok(Json(TrackResponse::Letter(tracked(&state, &mut conn, letter)?)));
    }

    let email = email.ok_or_else(|| {
        AppError::bad_request("provide a letter_number or an email to track")
    })?;
    let mut matches: Vec<(Letter, String)> = letters::table
        .inner_join(templates::table)
        .filter(letters::submitter_email.eq(email))
        .order(letters::created_at.desc())
        .select((letters::all_columns, templates::name))
        .load(&mut conn)?;

    match matches.len() {
        0 => Err(AppError::new(
            StatusCode::NOT_FOUND,
            "no letters found for this email",
        )),
        1 => {
            let (letter, _) = matches.remove(0);
            Ok(Json(TrackResponse::Letter(tracked(&state, &mut conn, letter)?)))
        }
        _ => Ok(Json(TrackResponse::Matches {
            letters: matches
                .into_iter()
                .map(|(letter, template_name)| LetterMatch {
                    status_label: letter.status().map(LetterStatus::label).unwrap_or(""),
                    letter_number: letter.letter_number,
                    template_name,
                    status: letter.status,
                    created_at: letter.created_at,
                })
                .collect(),
        })),
    }
}

pub async fn track_letter(
    State(state): State<AppState>,
    Path(letter_number): Path<String>,
) -> AppResult<Json<TrackedLetter>> {
    let mut conn = state.db()?;
    let letter = find_by_number(&mut conn, &letter_number)?;
    Ok(Json(tracked(&state, &mut conn, letter)?))
}

/// Serves the rendered final letter once the director has approved it.
pub async fn letter_document(
    State(state): State<AppState>,
    Path(letter_number): Path<String>,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let letter = find_by_number(&mut conn, &letter_number)?;
    drop(conn);

    let key = match (letter.status(), letter.final_letter_path.as_deref()) {
        (Some(LetterStatus::DirectorApproved), Some(key)) => key.to_string(),
        _ => {
            return Err(AppError::new(
                StatusCode::NOT_FOUND,
                "final letter is not available yet",
            ))
        }
    };

    let bytes = state.storage.get_object(&key).await.map_err(|err| {
        warn!(letter_number = %letter.letter_number, error = %err, "final letter missing from storage");
        AppError::internal(err)
    })?;
    let content_type = mime_guess::from_path(&key)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let filename = format!("{}.html", letter.letter_number);
    let disposition = format!(
        "inline; filename*=UTF-8''{}",
        utf8_percent_encode(&filename, NON_ALPHANUMERIC)
    );

    Ok((
        [
            (header::CONTENT_TYPE, format!("{content_type}; charset=utf-8")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}
