//! End-to-end HTTP tests against the in-memory store.

use std::sync::Arc;

use audience_api::ApiServer;
use audience_core::config::AppConfig;
use audience_store::MemoryStore;
use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

fn app() -> Router {
    let store = Arc::new(MemoryStore::new());
    ApiServer::new(AppConfig::default(), store.clone(), store).router()
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = app();
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["node_id"], AppConfig::default().node_id);

    assert_eq!(send(&app, Method::GET, "/ready", None).await.0, StatusCode::OK);
    assert_eq!(send(&app, Method::GET, "/live", None).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_preview_counts_live_customers() {
    let app = app();
    for spend in [500, 1200, 5000] {
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/v1/customers",
            Some(json!({"name": format!("c{spend}"), "totalSpend": spend})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let rules = json!({"rules": [{"field": "total_spend", "operator": ">", "value": 1000}]});
    let (status, body) = send(&app, Method::POST, "/api/v1/segments/preview", Some(rules)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["audienceSize"], 2);

    let (_, body) = send(&app, Method::POST, "/api/v1/segments/preview", Some(json!({"rules": []}))).await;
    assert_eq!(body["audienceSize"], 0);
}

#[tokio::test]
async fn test_segment_crud_flow() {
    let app = app();
    send(
        &app,
        Method::POST,
        "/api/v1/customers",
        Some(json!({"name": "rich", "totalSpend": 5000})),
    )
    .await;

    let create = json!({
        "name": "Big Spenders",
        "rules": [{"field": "total_spend", "operator": "greaterThan", "value": "1000"}]
    });
    let (status, created) = send(&app, Method::POST, "/api/v1/segments", Some(create.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["audienceSize"], 1);
    assert_eq!(created["createdBy"], "admin");
    let id = created["id"].as_str().unwrap().to_string();

    let (status, body) = send(&app, Method::POST, "/api/v1/segments", Some(create)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_name");

    let (status, _) = send(&app, Method::POST, "/api/v1/segments", Some(json!({"name": " "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, summary) = send(&app, Method::GET, &format!("/api/v1/segments/{id}/summary"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary, json!({"id": id, "name": "Big Spenders", "audienceSize": 1}));

    let (status, updated) = send(
        &app,
        Method::PUT,
        &format!("/api/v1/segments/{id}"),
        Some(json!({"rules": [{"field": "total_spend", "operator": ">", "value": 9000}]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["audienceSize"], 0);

    let (_, list) = send(&app, Method::GET, "/api/v1/segments", None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/v1/segments/{id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, body) = send(&app, Method::GET, &format!("/api/v1/segments/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_created_by_comes_from_user_header() {
    let app = app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/segments")
        .header("content-type", "application/json")
        .header("x-user-id", "marketer-7")
        .body(Body::from(json!({"name": "Owned"}).to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["createdBy"], "marketer-7");
}

#[tokio::test]
async fn test_customer_membership_moves_segment_counts() {
    let app = app();
    let (_, s1) = send(&app, Method::POST, "/api/v1/segments", Some(json!({"name": "S1"}))).await;
    let (_, s2) = send(&app, Method::POST, "/api/v1/segments", Some(json!({"name": "S2"}))).await;
    let s1 = s1["id"].as_str().unwrap().to_string();
    let s2 = s2["id"].as_str().unwrap().to_string();

    let (status, created) = send(
        &app,
        Method::POST,
        "/api/v1/customers",
        Some(json!({"name": "mover", "segments": [s1]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let customer_id = created["customer"]["id"].as_str().unwrap().to_string();

    let size = |body: Value| body["audienceSize"].as_i64().unwrap();
    assert_eq!(size(send(&app, Method::GET, &format!("/api/v1/segments/{s1}/summary"), None).await.1), 1);

    let (status, _) = send(
        &app,
        Method::PUT,
        &format!("/api/v1/customers/{customer_id}"),
        Some(json!({"segments": [s2]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(size(send(&app, Method::GET, &format!("/api/v1/segments/{s1}/summary"), None).await.1), 0);
    assert_eq!(size(send(&app, Method::GET, &format!("/api/v1/segments/{s2}/summary"), None).await.1), 1);

    let (status, _) = send(&app, Method::DELETE, &format!("/api/v1/customers/{customer_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(size(send(&app, Method::GET, &format!("/api/v1/segments/{s2}/summary"), None).await.1), 0);
}

#[tokio::test]
async fn test_bulk_import() {
    let app = app();
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/customers/bulk",
        Some(json!([{"name": "a"}, {"name": ""}, {"name": "c"}])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["imported"], 2);
    assert_eq!(body["rejected"][0]["index"], 1);

    let (_, list) = send(&app, Method::GET, "/api/v1/customers", None).await;
    assert_eq!(list.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_ids_are_not_found() {
    let app = app();
    let id = Uuid::new_v4();
    for uri in [
        format!("/api/v1/segments/{id}"),
        format!("/api/v1/segments/{id}/summary"),
        format!("/api/v1/customers/{id}"),
    ] {
        assert_eq!(send(&app, Method::GET, &uri, None).await.0, StatusCode::NOT_FOUND);
    }
    assert_eq!(
        send(&app, Method::DELETE, &format!("/api/v1/customers/{id}"), None).await.0,
        StatusCode::NOT_FOUND
    );
}
