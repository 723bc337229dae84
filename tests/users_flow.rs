mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp, PASSWORD};
use serde_json::{json, Value};

#[tokio::test]
async fn admin_creates_and_updates_accounts() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let (_, admin) = app.user_with_token("admin", "admin", "Admin Kantor").await?;

    let response = app
        .post_json(
            "/api/admin/users",
            &json!({
                "username": "rudi",
                "password": "Manager2024",
                "role": "manager",
                "full_name": "Rudi Hartono",
            }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = json_body(response).await?;
    assert_eq!(created["role"], "manager");
    assert_eq!(created["has_signature"], false);
    assert!(created.get("password_hash").is_none());
    let user_id = created["id"].as_str().unwrap_or_default().to_string();

    let response = app
        .post_json(
            "/api/admin/users",
            &json!({
                "username": "rudi",
                "password": "Manager2024",
                "role": "manager",
                "full_name": "Rudi Kedua",
            }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/admin/users",
            &json!({ "username": "lemah", "password": "pendek", "role": "manager", "full_name": "Lemah" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let manager = app.login_token("manager", "rudi", "Manager2024").await?;

    let response = app
        .patch_json(
            &format!("/api/admin/users/{user_id}"),
            &json!({ "role": "director" }),
            Some(&admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let updated: Value = json_body(response).await?;
    assert_eq!(updated["role"], "director");

    // A role change ends existing sessions.
    let response = app.get("/api/auth/me", Some(&manager)).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    app.login_token("director", "rudi", "Manager2024").await?;

    let response = app.get("/api/admin/users?role=director", Some(&admin)).await?;
    let directors: Value = json_body(response).await?;
    assert_eq!(directors.as_array().map(Vec::len), Some(1));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn password_reset_and_deletion() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let (admin_id, admin) = app.user_with_token("admin", "admin", "Admin Kantor").await?;
    let (manager_id, manager) = app.user_with_token("maya", "manager", "Maya Sari").await?;
    app.upload_signature(&manager).await?;
    assert_eq!(app.storage().keys_with_prefix("signatures/").await.len(), 1);

    let response = app
        .post_empty(&format!("/api/admin/users/{manager_id}/reset-password"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let reset: Value = json_body(response).await?;
    let new_password = reset["new_password"].as_str().unwrap_or_default().to_string();
    assert_eq!(new_password.len(), 12);

    let response = app.get("/api/auth/me", Some(&manager)).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(app.login_token("manager", "maya", PASSWORD).await.is_err());
    app.login_token("manager", "maya", &new_password).await?;

    let response = app
        .delete(&format!("/api/admin/users/{admin_id}"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .delete(&format!("/api/admin/users/{manager_id}"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.storage().keys_with_prefix("signatures/").await.is_empty());

    let response = app
        .delete(&format!("/api/admin/users/{manager_id}"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn signature_upload_rejects_non_images() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let (_, director) = app.user_with_token("dewi", "director", "Dewi Lestari").await?;

    let response = app
        .post_multipart(
            "/api/signature",
            "signature",
            "ttd.png",
            "image/png",
            b"%PDF-1.4 not an image",
            &director,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/api/signature", Some(&director)).await?;
    let status: Value = json_body(response).await?;
    assert_eq!(status["has_signature"], false);

    app.upload_signature(&director).await?;
    let response = app.get("/api/signature", Some(&director)).await?;
    let status: Value = json_body(response).await?;
    assert_eq!(status["has_signature"], true);
    assert_eq!(status["content_type"], "image/png");

    let response = app.get("/api/signature/image", Some(&director)).await?;
    assert_eq!(response.status(), StatusCode::OK);

    app.cleanup().await?;
    Ok(())
}
