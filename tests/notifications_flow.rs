mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp};
use serde_json::{json, Value};

#[tokio::test]
async fn inbox_read_and_delete_cycle() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let (_, admin) = app.user_with_token("admin", "admin", "Admin Kantor").await?;
    let (_, other_admin) = app.user_with_token("admin2", "admin", "Admin Cadangan").await?;
    let template_id = app
        .create_template(&admin, "Surat Izin", "Izin untuk {nama}", &["nama"])
        .await?;
    let first = app.submit_letter(template_id, json!({ "nama": "Budi" })).await?;
    app.submit_letter(template_id, json!({ "nama": "Sari" })).await?;

    let response = app.get("/api/notifications", Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let inbox: Value = json_body(response).await?;
    assert_eq!(inbox["total"], 2);
    assert_eq!(inbox["unread_count"], 2);
    let notifications = inbox["notifications"].as_array().cloned().unwrap_or_default();
    assert_eq!(notifications.len(), 2);
    assert!(notifications.iter().all(|item| item["type"] == "new_submission"));
    assert!(notifications
        .iter()
        .any(|item| item["letter_number"] == first.as_str()));

    let target = notifications[0]["id"].as_str().unwrap_or_default().to_string();

    // Another account cannot touch this notification.
    let response = app
        .post_empty(&format!("/api/notifications/{target}/read"), Some(&other_admin))
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .post_empty(&format!("/api/notifications/{target}/read"), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let marked: Value = json_body(response).await?;
    assert_eq!(marked["updated"], 1);
    assert_eq!(marked["unread_count"], 1);

    let response = app
        .post_empty(&format!("/api/notifications/{target}/read"), Some(&admin))
        .await?;
    let again: Value = json_body(response).await?;
    assert_eq!(again["updated"], 0);

    let response = app.get("/api/notifications?status=unread", Some(&admin)).await?;
    let unread: Value = json_body(response).await?;
    assert_eq!(unread["total"], 1);

    let response = app.delete("/api/notifications/read", Some(&admin)).await?;
    let deleted: Value = json_body(response).await?;
    assert_eq!(deleted["deleted"], 1);

    let response = app.post_empty("/api/notifications/read-all", Some(&admin)).await?;
    let all: Value = json_body(response).await?;
    assert_eq!(all["updated"], 1);
    assert_eq!(all["unread_count"], 0);

    let response = app.get("/api/notifications/unread-count", Some(&other_admin)).await?;
    let other: Value = json_body(response).await?;
    assert_eq!(other["unread_count"], 2);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn inbox_filters_are_validated_and_pages_clamped() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };
    let (_, admin) = app.user_with_token("admin", "admin", "Admin Kantor").await?;

    let response = app.get("/api/notifications?status=archived", Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/api/notifications?type=reminder", Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get("/api/notifications?type=approval&page=3", Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let page: Value = json_body(response).await?;
    assert_eq!(page["page"], 1);
    assert_eq!(page["total"], 0);
    assert_eq!(page["total_pages"], 1);

    let response = app
        .get(&format!("/api/notifications?page={}", i64::MAX), Some(&admin))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let page: Value = json_body(response).await?;
    assert_eq!(page["page"], 1);
    assert_eq!(page["notifications"], json!([]));

    app.cleanup().await?;
    Ok(())
}
