use axum::{
    extract::{Multipart, State},
    http::header,
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use image::ImageFormat;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    activity::{record_activity, ClientMeta},
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::User,
    schema::users,
    state::AppState,
    storage::signature_key,
};

const SIGNATURE_FIELD: &str = "signature";

#[derive(Serialize)]
pub struct SignatureStatus {
    pub has_signature: bool,
    pub content_type: Option<String>,
    pub updated_at: NaiveDateTime,
}

impl SignatureStatus {
    fn of(user: &User) -> Self {
        Self {
            has_signature: user.digital_signature_path.is_some(),
            content_type: user
                .digital_signature_path
                .as_deref()
                .and_then(|key| mime_guess::from_path(key).first())
                .map(|mime| mime.essence_str().to_string()),
            updated_at: user.updated_at,
        }
    }
}

/// Checks the declared type and the actual bytes. Returns the file extension to
/// store the image under.
pub fn validate_signature_image(
    bytes: &[u8],
    declared_type: Option<&str>,
    max_bytes: usize,
) -> Result<&'static str, AppError> {
    if bytes.is_empty() {
        return Err(AppError::bad_request("signature file must not be empty"));
    }
    if bytes.len() > max_bytes {
        return Err(AppError::bad_request(format!(
            "signature file exceeds the {} MB limit",
            max_bytes / (1024 * 1024)
        )));
    }
    if let Some(declared) = declared_type {
        if !matches!(declared, "image/png" | "image/jpeg" | "image/jpg") {
            return Err(AppError::bad_request(
                "signature must be a PNG or JPEG image",
            ));
        }
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok("png"),
        Ok(ImageFormat::Jpeg) => Ok("jpg"),
        _ => Err(AppError::bad_request(
            "signature must be a PNG or JPEG image",
        )),
    }
}

fn signature_object_key(user_id: Uuid, bytes: &[u8], extension: &str) -> String {
    let digest = hex::encode(Sha256::digest(bytes));
    signature_key(&format!("{user_id}-{}.{extension}", &digest[..16]))
}

pub async fn get_signature(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<SignatureStatus>> {
    let mut conn = state.db()?;
    let record: User = users::table.find(user.user_id).first(&mut conn)?;
    Ok(Json(SignatureStatus::of(&record)))
}

pub async fn get_signature_image(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<impl IntoResponse> {
    let mut conn = state.db()?;
    let key = users::table
        .find(user.user_id)
        .select(users::digital_signature_path)
        .first::<Option<String>>(&mut conn)?
        .ok_or_else(AppError::not_found)?;
    drop(conn);

    let bytes = state.storage.get_object(&key).await?;
    let content_type = mime_guess::from_path(&key)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    Ok(([(header::CONTENT_TYPE, content_type)], bytes))
}

pub async fn upload_signature(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    meta: ClientMeta,
    mut multipart: Multipart,
) -> AppResult<Json<SignatureStatus>> {
    let mut upload: Option<(Vec<u8>, Option<String>)> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() != Some(SIGNATURE_FIELD) {
            continue;
        }
        let content_type = field.content_type().map(|mime| mime.to_string());
        let data = field.bytes().await.map_err(|err| {
            error!(error = %err, "failed to read signature bytes");
            AppError::bad_request(format!("failed to read signature file: {err}"))
        })?;
        upload = Some((data.to_vec(), content_type));
    }

    let (bytes, declared_type) =
        upload.ok_or_else(|| AppError::bad_request("signature field is required"))?;
    let extension = validate_signature_image(
        &bytes,
        declared_type.as_deref(),
        state.config.max_signature_bytes,
    )
    .map_err(|err| {
        warn!(user_id = %user.user_id, reason = err.message(), "signature upload rejected");
        err
    })?;

    let key = signature_object_key(user.user_id, &bytes, extension);
    let content_type = if extension == "png" { "image/png" } else { "image/jpeg" };
    state
        .storage
        .put_object(&key, bytes, Some(content_type.to_string()))
        .await?;

    let mut conn = state.db()?;
    let previous: Option<String> = users::table
        .find(user.user_id)
        .select(users::digital_signature_path)
        .first(&mut conn)?;

    let updated: User = match diesel::update(users::table.find(user.user_id))
        .set((
            users::digital_signature_path.eq(Some(key.as_str())),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .get_result(&mut conn)
    {
        Ok(updated) => updated,
        Err(err) => {
            if let Err(cleanup) = state.storage.delete_object(&key).await {
                warn!(key = %key, error = %cleanup, "failed to remove unused signature");
            }
            return Err(AppError::from(err));
        }
    };

    if let Some(old_key) = previous.filter(|old| *old != key) {
        if let Err(err) = state.storage.delete_object(&old_key).await {
            warn!(key = %old_key, error = %err, "failed to delete previous signature");
        }
    }

    record_activity(
        &mut conn,
        Some(user.user_id),
        "signature_upload",
        format!("Signature uploaded: {key}"),
        &meta,
    );
    info!(user_id = %user.user_id, key = %key, "signature uploaded");

    Ok(Json(SignatureStatus::of(&updated)))
}
