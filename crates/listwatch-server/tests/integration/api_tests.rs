use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;
use uuid::Uuid;

use listwatch_core::{CategoryKey, JobStatus, ListingStore};

use crate::integration::common::{
    PDX_BIKES, TEST_API_KEY, send, setup_test_app, setup_test_app_no_auth,
};

#[tokio::test]
async fn health_returns_200() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["store"], "ok");
    assert_eq!(json["browser"], "disabled");

    app.shutdown().await;
}

#[tokio::test]
async fn unauthenticated_request_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/v1/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.shutdown().await;
}

#[tokio::test]
async fn wrong_api_key_returns_401() {
    let app = setup_test_app().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/v1/jobs")
                .header("authorization", "Bearer wrong-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    app.shutdown().await;
}

#[tokio::test]
async fn no_api_key_configured_returns_403() {
    let app = setup_test_app_no_auth().await;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/v1/jobs")
                .header("authorization", format!("Bearer {TEST_API_KEY}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "forbidden");

    app.shutdown().await;
}

#[tokio::test]
async fn update_job_crawls_and_persists() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        "POST",
        "/v1/jobs",
        Some(json!({
            "action": "update",
            "params": {"category": "bikes", "categories_file": app.manifest}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(json["status"], "init");
    let id: Uuid = json["job_id"].as_str().unwrap().parse().unwrap();

    assert_eq!(app.wait_terminal(id).await, JobStatus::Done);

    let (status, json) = send(&app.router, "GET", &format!("/v1/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "done");
    assert_eq!(json["action"], "update");
    let output: Vec<&str> = json["output"]
        .as_array()
        .unwrap()
        .iter()
        .map(|line| line.as_str().unwrap())
        .collect();
    assert!(output.iter().any(|l| l.ends_with("portland-bikes: started")));
    assert!(
        output
            .iter()
            .any(|l| l.ends_with("portland-bikes: retrieving 2 new posts"))
    );
    assert!(output.last().unwrap().ends_with("portland-bikes: ended"));

    let state = app
        .store
        .load(&CategoryKey::new("portland", "bikes"))
        .await
        .unwrap();
    assert_eq!(state.active.len(), 2);
    assert!(state.sold.is_empty());
    assert_eq!(app.site.visit_count(PDX_BIKES), 1);

    app.shutdown().await;
}

#[tokio::test]
async fn missing_manifest_fails_the_job() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        "POST",
        "/v1/jobs",
        Some(json!({
            "action": "update_all",
            "params": {"categories_file": "/nonexistent/categories.json"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id: Uuid = json["job_id"].as_str().unwrap().parse().unwrap();

    assert_eq!(app.wait_terminal(id).await, JobStatus::Failed);

    let (_, json) = send(&app.router, "GET", &format!("/v1/jobs/{id}"), None).await;
    assert_eq!(json["status"], "failed");
    let last = json["output"].as_array().unwrap().last().unwrap();
    assert!(last.as_str().unwrap().contains("error: "), "{last}");

    app.shutdown().await;
}

#[tokio::test]
async fn unknown_category_finishes_cleanly() {
    let app = setup_test_app().await;

    let (_, json) = send(
        &app.router,
        "POST",
        "/v1/jobs",
        Some(json!({
            "action": "update",
            "params": {"category": "kayaks", "categories_file": app.manifest}
        })),
    )
    .await;
    let id: Uuid = json["job_id"].as_str().unwrap().parse().unwrap();

    assert_eq!(app.wait_terminal(id).await, JobStatus::Done);

    app.shutdown().await;
}

#[tokio::test]
async fn unknown_action_returns_400() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        "POST",
        "/v1/jobs",
        Some(json!({"action": "cl__update"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
    assert_eq!(
        json["message"],
        "Invalid request: no action called 'cl__update' exists"
    );

    app.shutdown().await;
}

#[tokio::test]
async fn update_without_category_returns_400() {
    let app = setup_test_app().await;

    let (status, json) = send(
        &app.router,
        "POST",
        "/v1/jobs",
        Some(json!({"action": "update", "params": {}})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");
    assert!(app.registry.list(None).await.is_empty());

    app.shutdown().await;
}

#[tokio::test]
async fn list_jobs_filters_by_status() {
    let app = setup_test_app().await;

    let (_, json) = send(
        &app.router,
        "POST",
        "/v1/jobs",
        Some(json!({
            "action": "update",
            "params": {"category": "bikes", "categories_file": app.manifest}
        })),
    )
    .await;
    let id: Uuid = json["job_id"].as_str().unwrap().parse().unwrap();
    app.wait_terminal(id).await;

    let (status, json) = send(&app.router, "GET", "/v1/jobs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["jobs"][id.to_string()], "done");

    let (_, json) = send(&app.router, "GET", "/v1/jobs?status=running", None).await;
    assert_eq!(json["total"], 0);

    let (status, json) = send(&app.router, "GET", "/v1/jobs?status=sleeping", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "invalid_request");

    app.shutdown().await;
}

#[tokio::test]
async fn unknown_job_returns_404() {
    let app = setup_test_app().await;

    let id = Uuid::new_v4();
    let (status, json) = send(&app.router, "GET", &format!("/v1/jobs/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "invalid_id");
    assert_eq!(json["message"], format!("invalid job id '{id}'"));

    app.shutdown().await;
}

#[tokio::test]
async fn malformed_job_id_returns_404() {
    let app = setup_test_app().await;

    let (status, json) = send(&app.router, "GET", "/v1/jobs/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "invalid_id");
    assert_eq!(json["message"], "invalid job id 'not-a-uuid'");

    app.shutdown().await;
}

#[tokio::test]
async fn actions_lists_every_action_and_param() {
    let app = setup_test_app().await;

    let (status, json) = send(&app.router, "GET", "/v1/actions", None).await;
    assert_eq!(status, StatusCode::OK);

    let names: Vec<&str> = json["actions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["update", "update_all", "update_p", "update_all_p"]);

    let fields: Vec<&str> = json["params"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"category"));
    assert!(fields.contains(&"tmin"));

    app.shutdown().await;
}
