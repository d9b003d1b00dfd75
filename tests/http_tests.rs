//! Integration tests for the HTTP submission surface.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::routing::get;
use serde_json::{Value, json};
use taskrow::db::Database;
use taskrow::http::build_router;
use taskrow::types::{NewTask, TaskState};
use tower::ServiceExt;

fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            Value::String(String::from_utf8_lossy(&bytes).into_owned())
        })
    };
    (status, body)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let (status, body) = send(build_router(setup_db(), None), get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn submit_creates_pending_task() {
    let db = setup_db();
    let request = post_json(
        "/tasks",
        json!({ "name": "thumbnail", "task_type": "image", "args": "a.png", "max_retries": 2 }),
    );

    let (status, body) = send(build_router(db.clone(), None), request).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["state"], "pending");
    assert_eq!(body["num_retries"], 0);

    let id = body["id"].as_i64().unwrap();
    let stored = db.get_task(id).unwrap().unwrap();
    assert_eq!(stored.name, "thumbnail");
    assert_eq!(stored.max_retries, 2);
}

#[tokio::test]
async fn submit_rejects_invalid_fields() {
    let request = post_json("/tasks", json!({ "name": "", "task_type": "log" }));
    let (status, body) = send(build_router(setup_db(), None), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_FIELD_VALUE");
}

#[tokio::test]
async fn list_filters_by_state() {
    let db = setup_db();
    db.insert_task(&NewTask::new("waiting", "log")).unwrap();
    let claimed = db.insert_task(&NewTask::new("busy", "log")).unwrap();
    db.claim_task(claimed.id, 0).unwrap();

    let (status, body) = send(build_router(db.clone(), None), get_request("/tasks")).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["waiting"]);

    let (_, body) = send(
        build_router(db.clone(), None),
        get_request("/tasks?state=running"),
    )
    .await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["state"], TaskState::Running.as_str());

    let (status, _) = send(build_router(db, None), get_request("/tasks?state=done")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_task_by_id() {
    let db = setup_db();
    let task = db.insert_task(&NewTask::new("lookup", "log")).unwrap();

    let (status, body) = send(
        build_router(db.clone(), None),
        get_request(&format!("/tasks/{}", task.id)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "lookup");

    let (status, body) = send(build_router(db, None), get_request("/tasks/4242")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "TASK_NOT_FOUND");
}

#[tokio::test]
async fn stats_counts_states() {
    let db = setup_db();
    db.insert_task(&NewTask::new("a", "log")).unwrap();
    db.insert_task(&NewTask::new("b", "log")).unwrap();

    let (status, body) = send(build_router(db, None), get_request("/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pending"], 2);
    assert_eq!(body["failed"], 0);
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let (status, body) = send(build_router(setup_db(), None), get_request("/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "path not supported: /nope");
}

#[tokio::test]
async fn wrong_method_is_rejected() {
    let request = Request::builder()
        .method("DELETE")
        .uri("/tasks")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(build_router(setup_db(), None), request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn extra_routes_are_merged() {
    let extra = Router::new().route("/ping", get(|| async { "pong" }));
    let (status, body) = send(build_router(setup_db(), Some(extra)), get_request("/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("pong".into()));
}
