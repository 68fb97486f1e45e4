// Control-server contract tests driven through the router with oneshot
// requests, no sockets involved.

use adsmith_core::orchestrator::Orchestrator;
use adsmith_core::providers::ProviderSet;
use adsmith_core::server::{create_router, ServerState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn router(root: &std::path::Path) -> axum::Router {
    let orchestrator = Orchestrator::new(root.to_path_buf(), ProviderSet::offline(0xAD5));
    create_router(Arc::new(ServerState::new(orchestrator)))
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_plan_endpoint_returns_planned_state() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(tmp.path());

    let response = app
        .oneshot(post_json(
            "/api/plan",
            serde_json::json!({
                "topic": "luxury watch ad",
                "duration_seconds": 12,
                "aspect_ratio": "16:9",
                "style": "cinematic"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let state = body_json(response).await;
    assert_eq!(state["status"], "planned");
    let scenes = state["script"]["scenes"].as_array().unwrap();
    assert!((2..=4).contains(&scenes.len()));
    let total: u64 = scenes
        .iter()
        .map(|s| s["duration_seconds"].as_u64().unwrap())
        .sum();
    assert_eq!(total, 12);
}

#[tokio::test]
async fn test_plan_rejects_invalid_duration() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(tmp.path());

    let response = app
        .oneshot(post_json(
            "/api/plan",
            serde_json::json!({ "topic": "x", "duration_seconds": 2 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_unknown_project_is_404() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(tmp.path());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/status/proj_missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_gate_mismatch_is_409() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(tmp.path());

    let planned = body_json(
        app.clone()
            .oneshot(post_json(
                "/api/plan",
                serde_json::json!({ "topic": "sneaker drop", "duration_seconds": 8 }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let id = planned["id"].as_str().unwrap();

    // Motion before images violates the gate order.
    let response = app
        .oneshot(post_json(
            "/api/generate/videos",
            serde_json::json!({ "project_id": id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_images_endpoint_advances_and_regate_conflicts() {
    let tmp = tempfile::tempdir().unwrap();
    let app = router(tmp.path());

    let planned = body_json(
        app.clone()
            .oneshot(post_json(
                "/api/plan",
                serde_json::json!({ "topic": "sneaker drop", "duration_seconds": 8 }),
            ))
            .await
            .unwrap(),
    )
    .await;
    let id = planned["id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/generate/images",
            serde_json::json!({ "project_id": id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // The stage runs in the background; poll the status endpoint.
    let mut status = String::new();
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/status/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        status = body_json(response).await["status"]
            .as_str()
            .unwrap()
            .to_string();
        if status == "images_complete" || status == "failed" {
            break;
        }
    }
    assert_eq!(status, "images_complete");

    // The gate has passed; repeating the approval now conflicts.
    let response = app
        .oneshot(post_json(
            "/api/generate/images",
            serde_json::json!({ "project_id": id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_asset_traversal_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path()).unwrap();
    let app = router(tmp.path());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/assets/..%2F..%2Fetc%2Fpasswd")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_ne!(response.status(), StatusCode::OK);
}
