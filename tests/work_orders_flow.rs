mod common;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{json_body, TestApp};
use opsportal::access::Role;
use opsportal::notify::NotificationEvent;
use serde_json::{json, Value};
use uuid::Uuid;

const SIGNATURE: &str = "data:image/png;base64,iVBORw0KGgo=";

async fn create_order(app: &TestApp, admin: &str, assignee: Uuid) -> Result<Value> {
    let response = app
        .post_json(
            "/api/work-orders",
            &json!({ "title": "Replace boiler", "assigned_to": assignee }),
            Some(admin),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await
}

#[tokio::test]
async fn completing_twice_notifies_once() -> Result<()> {
    let app = TestApp::new().await?;
    let (_, admin) = app.user_with_token("admin@example.com", Role::Admin).await?;
    let (worker_id, worker) = app.user_with_token("worker@example.com", Role::Worker).await?;

    let order = create_order(&app, &admin, worker_id).await?;
    assert_eq!(order["work_order_number"], "WO-000001");
    assert_eq!(order["work_completed"], "not_started");
    let path = format!("/api/work-orders/{}", order["id"].as_str().unwrap_or_default());

    for _ in 0..2 {
        let response = app
            .patch_json(&path, &json!({ "work_completed": "completed" }), Some(&worker))
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let updated: Value = json_body(response).await?;
        assert!(updated["completed_at"].is_string());
    }

    let completions = app
        .drain_events()
        .await
        .into_iter()
        .filter(|event| matches!(event, NotificationEvent::WorkOrderCompleted { .. }))
        .count();
    assert_eq!(completions, 1);

    let response = app
        .patch_json(&path, &json!({ "work_completed": "in_progress" }), Some(&worker))
        .await?;
    let reopened: Value = json_body(response).await?;
    assert!(reopened["completed_at"].is_null());
    assert!(matches!(
        app.drain_events().await.as_slice(),
        [NotificationEvent::WorkOrderStatusChanged { .. }]
    ));
    Ok(())
}

#[tokio::test]
async fn clients_never_reach_work_orders() -> Result<()> {
    let app = TestApp::new().await?;
    let (_, admin) = app.user_with_token("admin@example.com", Role::Admin).await?;
    let (worker_id, _) = app.user_with_token("worker@example.com", Role::Worker).await?;
    let (_, client) = app.user_with_token("client@example.com", Role::Client).await?;
    let order = create_order(&app, &admin, worker_id).await?;
    let id = order["id"].as_str().unwrap_or_default();

    for path in [
        "/api/work-orders".to_string(),
        format!("/api/work-orders/{id}"),
        format!("/api/work-orders/{id}/signatures"),
        format!("/api/work-orders/{id}/materials"),
    ] {
        let response = app.get(&path, Some(&client)).await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
    }
    Ok(())
}

#[tokio::test]
async fn only_the_assignee_works_an_order() -> Result<()> {
    let app = TestApp::new().await?;
    let (_, admin) = app.user_with_token("admin@example.com", Role::Admin).await?;
    let (worker_id, worker) = app.user_with_token("worker@example.com", Role::Worker).await?;
    let (_, other) = app.user_with_token("other@example.com", Role::Employee).await?;
    let order = create_order(&app, &admin, worker_id).await?;
    let path = format!("/api/work-orders/{}", order["id"].as_str().unwrap_or_default());

    let response = app.get(&path, Some(&other)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get("/api/work-orders", Some(&other)).await?;
    let visible: Vec<Value> = json_body(response).await?;
    assert!(visible.is_empty());
    let response = app.get("/api/work-orders", Some(&worker)).await?;
    let visible: Vec<Value> = json_body(response).await?;
    assert_eq!(visible.len(), 1);

    let response = app
        .patch_json(&path, &json!({ "assigned_to": null }), Some(&worker))
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let missing = format!("/api/work-orders/{}", Uuid::new_v4());
    let response = app.get(&missing, Some(&worker)).await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = app.get(&missing, Some(&admin)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn signatures_record_the_forwarded_address() -> Result<()> {
    let app = TestApp::new().await?;
    let (_, admin) = app.user_with_token("admin@example.com", Role::Admin).await?;
    let (worker_id, worker) = app.user_with_token("worker@example.com", Role::Worker).await?;
    let order = create_order(&app, &admin, worker_id).await?;
    let path = format!(
        "/api/work-orders/{}/signatures",
        order["id"].as_str().unwrap_or_default()
    );

    let payload = json!({
        "signer_type": "building_rep",
        "signer_name": "Dana Whitfield",
        "signature": SIGNATURE
    });
    let request = Request::builder()
        .method(Method::POST)
        .uri(&path)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {worker}"))
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.2")
        .body(Body::from(serde_json::to_vec(&payload)?))?;
    let response = app.send(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let signature: Value = json_body(response).await?;
    assert_eq!(signature["ip_address"], "203.0.113.7");
    assert_eq!(signature["signer_type"], "building_rep");

    let response = app
        .post_json(
            &path,
            &json!({
                "signer_type": "building_rep",
                "signer_name": "Dana Whitfield",
                "signature": "not base64!"
            }),
            Some(&worker),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get(&path, Some(&worker)).await?;
    let signatures: Vec<Value> = json_body(response).await?;
    assert_eq!(signatures.len(), 1);
    Ok(())
}

#[tokio::test]
async fn materials_are_added_and_removed() -> Result<()> {
    let app = TestApp::new().await?;
    let (_, admin) = app.user_with_token("admin@example.com", Role::Admin).await?;
    let (worker_id, worker) = app.user_with_token("worker@example.com", Role::Worker).await?;
    let order = create_order(&app, &admin, worker_id).await?;
    let id = order["id"].as_str().unwrap_or_default().to_string();
    let materials = format!("/api/work-orders/{id}/materials");

    let response = app
        .post_json(
            &materials,
            &json!({ "name": "Copper pipe", "quantity": 12.5, "unit": "m" }),
            Some(&worker),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let material: Value = json_body(response).await?;

    let response = app.get(&format!("/api/work-orders/{id}"), Some(&worker)).await?;
    let detail: Value = json_body(response).await?;
    assert_eq!(detail["materials"].as_array().map(Vec::len), Some(1));
    assert_eq!(detail["work_order_number"], order["work_order_number"]);

    let item = format!("{materials}/{}", material["id"].as_str().unwrap_or_default());
    let response = app.delete(&item, Some(&worker)).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.delete(&item, Some(&worker)).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn malformed_work_order_bodies_are_bad_requests() -> Result<()> {
    let app = TestApp::new().await?;
    let (_, admin) = app.user_with_token("admin@example.com", Role::Admin).await?;

    for payload in [
        json!({}),
        json!({ "title": "x", "assigned_to": "nope" }),
    ] {
        let response = app
            .post_json("/api/work-orders", &payload, Some(&admin))
            .await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{payload}");
        let body: Value = json_body(response).await?;
        assert!(body["error"].is_string());
    }
    Ok(())
}
