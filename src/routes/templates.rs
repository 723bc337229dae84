use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::{dsl::count_star, prelude::*};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::{
    activity::{record_activity, ClientMeta},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{NewTemplate, Template},
    render::{is_valid_field_key, LETTER_DATE_FIELD},
    schema::{letters, templates},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct TemplateResponse {
    pub id: Uuid,
    pub name: String,
    pub template_content: String,
    pub fields_required: Vec<String>,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_count: Option<i64>,
}

impl TemplateResponse {
    pub fn new(template: Template, usage_count: Option<i64>) -> Self {
        let fields_required = template.field_keys();
        Self {
            id: template.id,
            name: template.name,
            template_content: template.template_content,
            fields_required,
            created_by: template.created_by,
            created_at: template.created_at,
            updated_at: template.updated_at,
            usage_count,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub template_content: String,
    pub fields_required: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    pub template_content: Option<String>,
    pub fields_required: Option<Vec<String>>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = templates)]
struct UpdateTemplateChangeset {
    name: Option<String>,
    template_content: Option<String>,
    fields_required: Option<Value>,
    updated_at: Option<NaiveDateTime>,
}

/// Trims each key and rejects empty lists, malformed keys, duplicates, and the
/// automatically filled letter date.
pub fn validate_field_keys(fields: &[String]) -> Result<Vec<String>, AppError> {
    if fields.is_empty() {
        return Err(AppError::bad_request("fields_required must not be empty"));
    }

    let mut keys: Vec<String> = Vec::with_capacity(fields.len());
    for raw in fields {
        let key = raw.trim();
        if !is_valid_field_key(key) {
            return Err(AppError::bad_request(format!(
                "invalid field key '{key}': use letters, digits and underscores"
            )));
        }
        if key == LETTER_DATE_FIELD {
            return Err(AppError::bad_request(format!(
                "'{LETTER_DATE_FIELD}' is filled automatically and cannot be required"
            )));
        }
        if keys.iter().any(|existing| existing == key) {
            return Err(AppError::bad_request(format!("duplicate field key '{key}'")));
        }
        keys.push(key.to_string());
    }
    Ok(keys)
}

fn required_text(value: &str, field: &str) -> Result<String, AppError> {
    if value.trim().is_empty() {
        return Err(AppError::bad_request(format!("{field} must not be empty")));
    }
    Ok(value.to_string())
}

fn usage_count(conn: &mut PgConnection, template_id: Uuid) -> QueryResult<i64> {
    letters::table
        .filter(letters::template_id.eq(template_id))
        .select(count_star())
        .first(conn)
}

pub async fn list_templates(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<TemplateResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Template> = templates::table
        .order(templates::name.asc())
        .load(&mut conn)?;

    let usage_rows: Vec<(Uuid, i64)> = letters::table
        .group_by(letters::template_id)
        .select((letters::template_id, count_star()))
        .load(&mut conn)?;
    let usage: HashMap<Uuid, i64> = usage_rows.into_iter().collect();

    Ok(Json(
        rows.into_iter()
            .map(|template| {
                let count = usage.get(&template.id).copied().unwrap_or(0);
                TemplateResponse::new(template, Some(count))
            })
            .collect(),
    ))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
) -> AppResult<Json<TemplateResponse>> {
    let mut conn = state.db()?;
    let template: Template = templates::table.find(template_id).first(&mut conn)?;
    let count = usage_count(&mut conn, template_id)?;
    Ok(Json(TemplateResponse::new(template, Some(count))))
}

pub async fn create_template(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    meta: ClientMeta,
    Json(payload): Json<CreateTemplateRequest>,
) -> AppResult<(StatusCode, Json<TemplateResponse>)> {
    let name = required_text(&payload.name, "name")?.trim().to_string();
    let template_content = required_text(&payload.template_content, "template_content")?;
    let fields = validate_field_keys(&payload.fields_required)?;

    let mut conn = state.db()?;
    let new_template = NewTemplate {
        id: Uuid::new_v4(),
        name,
        template_content,
        fields_required: Value::from(fields),
        created_by: Some(admin.user_id),
    };
    let template: Template = diesel::insert_into(templates::table)
        .values(&new_template)
        .get_result(&mut conn)?;

    record_activity(
        &mut conn,
        Some(admin.user_id),
        "template_create",
        format!("Template created: {}", template.name),
        &meta,
    );
    info!(template_id = %template.id, "template created");

    Ok((StatusCode::CREATED, Json(TemplateResponse::new(template, Some(0)))))
}

pub async fn update_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    admin: AuthenticatedUser,
    meta: ClientMeta,
    Json(payload): Json<UpdateTemplateRequest>,
) -> AppResult<Json<TemplateResponse>> {
    let mut conn = state.db()?;
    let existing: Template = templates::table.find(template_id).first(&mut conn)?;

    let changeset = UpdateTemplateChangeset {
        name: payload
            .name
            .as_deref()
            .map(|name| required_text(name, "name").map(|name| name.trim().to_string()))
            .transpose()?,
        template_content: payload
            .template_content
            .as_deref()
            .map(|content| required_text(content, "template_content"))
            .transpose()?,
        fields_required: payload
            .fields_required
            .as_deref()
            .map(validate_field_keys)
            .transpose()?
            .map(Value::from),
        updated_at: None,
    };

    if changeset.name.is_none()
        && changeset.template_content.is_none()
        && changeset.fields_required.is_none()
    {
        let count = usage_count(&mut conn, template_id)?;
        return Ok(Json(TemplateResponse::new(existing, Some(count))));
    }

    let changeset = UpdateTemplateChangeset {
        updated_at: Some(Utc::now().naive_utc()),
        ..changeset
    };
    let updated: Template = diesel::update(templates::table.find(template_id))
        .set(&changeset)
        .get_result(&mut conn)?;
    let count = usage_count(&mut conn, template_id)?;

    record_activity(
        &mut conn,
        Some(admin.user_id),
        "template_update",
        format!("Template updated: {} (ID: {})", updated.name, updated.id),
        &meta,
    );
    info!(template_id = %updated.id, "template updated");

    Ok(Json(TemplateResponse::new(updated, Some(count))))
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path(template_id): Path<Uuid>,
    admin: AuthenticatedUser,
    meta: ClientMeta,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;

    let usage = usage_count(&mut conn, template_id)?;
    if usage > 0 {
        return Err(AppError::precondition_failed(format!(
            "template is still used by {usage} letter(s) and cannot be deleted"
        )));
    }

    let deleted = diesel::delete(templates::table.find(template_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found());
    }

    record_activity(
        &mut conn,
        Some(admin.user_id),
        "template_delete",
        format!("Template deleted: ID {template_id}"),
        &meta,
    );
    info!(template_id = %template_id, "template deleted");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn accepts_trimmed_unique_keys() {
        assert_eq!(
            validate_field_keys(&keys(&[" nama", "tempat "])).unwrap(),
            keys(&["nama", "tempat"])
        );
    }

    #[test]
    fn rejects_bad_field_lists() {
        assert!(validate_field_keys(&[]).is_err());
        assert!(validate_field_keys(&keys(&["nama", "nama"])).is_err());
        assert!(validate_field_keys(&keys(&["nama lengkap"])).is_err());
        assert!(validate_field_keys(&keys(&["tanggal_surat"])).is_err());
    }
}
