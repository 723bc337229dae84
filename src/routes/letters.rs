use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{Duration, FixedOffset, NaiveDate, NaiveDateTime};
use diesel::{pg::Pg, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{Letter, LetterStatus, Template},
    notifications::unread_count,
    render::{self, TimelineStep},
    schema::{letters, templates, users},
    state::AppState,
};

pub const RECENT_LETTERS_LIMIT: i64 = 10;

#[derive(Debug, Serialize)]
pub struct LetterSummary {
    pub id: Uuid,
    pub letter_number: String,
    pub template_id: Uuid,
    pub template_name: String,
    pub submitter_name: String,
    pub submitter_email: String,
    pub status: String,
    pub status_label: &'static str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl LetterSummary {
    pub fn new(letter: &Letter, template_name: String) -> Self {
        Self {
            id: letter.id,
            letter_number: letter.letter_number.clone(),
            template_id: letter.template_id,
            template_name,
            submitter_name: letter.submitter_name.clone(),
            submitter_email: letter.submitter_email.clone(),
            status: letter.status.clone(),
            status_label: status_label(letter),
            created_at: letter.created_at,
            updated_at: letter.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReviewRecord {
    pub user_id: Option<Uuid>,
    pub name: Option<String>,
    pub acted_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LetterDetail {
    #[serde(flatten)]
    pub summary: LetterSummary,
    pub submitter_phone: Option<String>,
    pub fields: BTreeMap<String, String>,
    pub content: String,
    pub manager_review: ReviewRecord,
    pub director_review: ReviewRecord,
    pub document_available: bool,
    pub timeline: Vec<TimelineStep>,
}

#[derive(Debug, Default, Serialize)]
pub struct StatusCounts {
    pub total: i64,
    pub pending: i64,
    pub manager_approved: i64,
    pub director_approved: i64,
    pub rejected: i64,
    pub revision: i64,
}

impl StatusCounts {
    fn add(&mut self, status: &str, count: i64) {
        self.total += count;
        match status.parse::<LetterStatus>() {
            Ok(LetterStatus::Pending) => self.pending += count,
            Ok(LetterStatus::ManagerApproved) => self.manager_approved += count,
            Ok(LetterStatus::DirectorApproved) => self.director_approved += count,
            Ok(LetterStatus::Rejected) => self.rejected += count,
            Ok(LetterStatus::Revision) => self.revision += count,
            Err(_) => {}
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LetterFilter {
    pub status: Option<String>,
    pub template_id: Option<Uuid>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
}

#[derive(Serialize)]
pub struct LetterListResponse {
    pub letters: Vec<LetterSummary>,
    pub counts: StatusCounts,
}

#[derive(Serialize)]
pub struct AdminDashboardResponse {
    pub counts: StatusCounts,
    pub recent_letters: Vec<LetterSummary>,
    pub unread_notifications: i64,
}

fn status_label(letter: &Letter) -> &'static str {
    letter.status().map(LetterStatus::label).unwrap_or("Tidak Diketahui")
}

pub fn parse_status(value: &str) -> Result<LetterStatus, AppError> {
    value.parse().map_err(AppError::bad_request)
}

/// UTC bounds of a local calendar day range, end exclusive.
fn utc_day_start(day: NaiveDate, offset: FixedOffset) -> NaiveDateTime {
    day.and_time(chrono::NaiveTime::MIN) - Duration::seconds(i64::from(offset.local_minus_utc()))
}

pub fn filtered_letters<'a>(
    filter: &LetterFilter,
    offset: FixedOffset,
) -> Result<letters::BoxedQuery<'a, Pg>, AppError> {
    let mut query = letters::table.into_boxed();
    if let Some(status) = filter.status.as_deref().filter(|value| !value.is_empty()) {
        query = query.filter(letters::status.eq(parse_status(status)?.as_str()));
    }
    if let Some(template_id) = filter.template_id {
        query = query.filter(letters::template_id.eq(template_id));
    }
    if let Some(from) = filter.date_from {
        query = query.filter(letters::created_at.ge(utc_day_start(from, offset)));
    }
    if let Some(to) = filter.date_to {
        let end = to
            .succ_opt()
            .ok_or_else(|| AppError::bad_request("date_to is out of range"))?;
        query = query.filter(letters::created_at.lt(utc_day_start(end, offset)));
    }
    Ok(query)
}

pub fn load_summaries(
    conn: &mut PgConnection,
    query: letters::BoxedQuery<'_, Pg>,
    limit: Option<i64>,
) -> QueryResult<Vec<LetterSummary>> {
    let mut query = query.order(letters::created_at.desc());
    if let Some(limit) = limit {
        query = query.limit(limit);
    }
    let rows: Vec<Letter> = query.load(conn)?;

    let template_ids: Vec<Uuid> = rows.iter().map(|letter| letter.template_id).collect();
    let names: BTreeMap<Uuid, String> = templates::table
        .filter(templates::id.eq_any(template_ids))
        .select((templates::id, templates::name))
        .load::<(Uuid, String)>(conn)?
        .into_iter()
        .collect();

    Ok(rows
        .iter()
        .map(|letter| {
            let name = names.get(&letter.template_id).cloned().unwrap_or_default();
            LetterSummary::new(letter, name)
        })
        .collect())
}

pub fn status_counts(
    conn: &mut PgConnection,
    query: letters::BoxedQuery<'_, Pg>,
) -> QueryResult<StatusCounts> {
    let statuses: Vec<String> = query.select(letters::status).load(conn)?;

    let mut counts = StatusCounts::default();
    for status in &statuses {
        counts.add(status, 1);
    }
    Ok(counts)
}

pub fn user_full_name(conn: &mut PgConnection, user_id: Option<Uuid>) -> QueryResult<Option<String>> {
    match user_id {
        Some(id) => users::table
            .find(id)
            .select(users::full_name)
            .first(conn)
            .optional(),
        None => Ok(None),
    }
}

pub fn load_detail(
    conn: &mut PgConnection,
    letter: Letter,
    today: NaiveDate,
    offset: FixedOffset,
) -> QueryResult<LetterDetail> {
    let template: Template = templates::table.find(letter.template_id).first(conn)?;
    let fields = letter.field_map();
    let content = render::render_with_date(&template.template_content, &fields, today);
    let manager_name = user_full_name(conn, letter.manager_action_by)?;
    let director_name = user_full_name(conn, letter.director_action_by)?;
    let timeline = render::timeline(&letter, offset);

    Ok(LetterDetail {
        summary: LetterSummary::new(&letter, template.name),
        submitter_phone: letter.submitter_phone.clone(),
        fields,
        content,
        manager_review: ReviewRecord {
            user_id: letter.manager_action_by,
            name: manager_name,
            acted_at: letter.manager_action_at,
            notes: letter.manager_notes.clone(),
        },
        director_review: ReviewRecord {
            user_id: letter.director_action_by,
            name: director_name,
            acted_at: letter.director_action_at,
            notes: letter.director_notes.clone(),
        },
        document_available: letter.final_letter_path.is_some(),
        timeline,
    })
}

pub fn letter_detail_response(
    state: &AppState,
    conn: &mut PgConnection,
    letter_id: Uuid,
) -> AppResult<LetterDetail> {
    let letter: Letter = letters::table.find(letter_id).first(conn)?;
    let today = state.local_now().date_naive();
    Ok(load_detail(conn, letter, today, state.config.utc_offset())?)
}

pub async fn admin_dashboard(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<AdminDashboardResponse>> {
    let mut conn = state.db()?;
    let counts = status_counts(&mut conn, letters::table.into_boxed())?;
    let recent_letters = load_summaries(
        &mut conn,
        letters::table.into_boxed(),
        Some(RECENT_LETTERS_LIMIT),
    )?;
    let unread_notifications = unread_count(&mut conn, user.user_id)?;

    Ok(Json(AdminDashboardResponse {
        counts,
        recent_letters,
        unread_notifications,
    }))
}

pub async fn list_letters(
    State(state): State<AppState>,
    _admin: AuthenticatedUser,
    Query(filter): Query<LetterFilter>,
) -> AppResult<Json<LetterListResponse>> {
    let offset = state.config.utc_offset();
    let mut conn = state.db()?;

    let letters = load_summaries(&mut conn, filtered_letters(&filter, offset)?, None)?;
    let unfiltered_status = LetterFilter {
        status: None,
        ..filter
    };
    let counts = status_counts(&mut conn, filtered_letters(&unfiltered_status, offset)?)?;

    Ok(Json(LetterListResponse { letters, counts }))
}

pub async fn get_letter(
    State(state): State<AppState>,
    _admin: AuthenticatedUser,
    Path(letter_id): Path<Uuid>,
) -> AppResult<Json<LetterDetail>> {
    let mut conn = state.db()?;
    Ok(Json(letter_detail_response(&state, &mut conn, letter_id)?))
}
