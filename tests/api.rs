use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use scan_alerts::{
    api::{ApiClient, HistoryQuery},
    config::ApiConfig,
    errors::ScanAlertError,
    models::{ChildId, Coordinates, RecordId, ScanSubmission, SecureId},
};

const TOKEN: &str = "parent-token";

#[derive(Clone, Default)]
struct Recorded {
    submissions: Arc<Mutex<Vec<(String, Value)>>>,
    queries: Arc<Mutex<Vec<HashMap<String, String>>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", TOKEN))
        .unwrap_or(false)
}

async fn submit(
    State(recorded): State<Recorded>,
    Path(secure_id): Path<String>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if secure_id == "unknown" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"message": "Invalid QR code"})),
        );
    }
    recorded
        .submissions
        .lock()
        .unwrap()
        .push((secure_id, body));
    (
        StatusCode::CREATED,
        Json(json!({"success": true, "message": "Location recorded"})),
    )
}

async fn history(
    State(recorded): State<Recorded>,
    Path(child_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Invalid token"})),
        );
    }
    recorded.queries.lock().unwrap().push(query);
    (
        StatusCode::OK,
        Json(json!({
            "logs": [
                {
                    "_id": "r2",
                    "childId": child_id,
                    "latitude": 12.95,
                    "longitude": 77.65,
                    "timestamp": "2024-03-01T11:00:00.000Z",
                    "message": "I am in Danger"
                },
                {
                    "_id": "r1",
                    "childId": child_id,
                    "latitude": 12.9,
                    "longitude": 77.6,
                    "accuracy": 20,
                    "timestamp": "2024-03-01T10:00:00.000Z"
                }
            ],
            "total": 42
        })),
    )
}

async fn last(Path(child_id): Path<String>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({})));
    }
    if child_id == "empty" {
        return (StatusCode::OK, Json(json!({"lastLocation": null})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "lastLocation": {
                "_id": "r9",
                "childId": child_id,
                "latitude": 60.17,
                "longitude": 24.94,
                "timestamp": "2024-03-02T08:30:00Z"
            }
        })),
    )
}

async fn broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn spawn_server() -> (SocketAddr, Recorded) {
    let recorded = Recorded::default();
    let app = Router::new()
        .route("/api/scan/:secure_id", post(submit))
        .route("/api/scan/child/:child_id/history", get(history))
        .route("/api/scan/child/:child_id/last", get(last))
        .route("/api/scan/child/broken/last", get(broken))
        .with_state(recorded.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, recorded)
}

fn client(addr: SocketAddr) -> ApiClient {
    ApiClient::new(&ApiConfig {
        base_url: format!("http://{}", addr),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

#[tokio::test]
async fn submit_scan_posts_payload() {
    let (addr, recorded) = spawn_server().await;
    let api = client(addr);

    let mut submission = ScanSubmission::new(Coordinates::new(12.9, 77.6).unwrap());
    submission.message = Some("I am in Danger".to_string());
    let ack = api
        .submit_scan(&SecureId::try_from("abc123").unwrap(), &submission)
        .await
        .unwrap();

    assert!(ack.success);
    assert_eq!(ack.message, "Location recorded");

    let submissions = recorded.submissions.lock().unwrap();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].0, "abc123");
    assert_eq!(
        submissions[0].1,
        json!({"latitude": 12.9, "longitude": 77.6, "message": "I am in Danger"})
    );
}

#[tokio::test]
async fn submit_scan_reports_server_message() {
    let (addr, _) = spawn_server().await;
    let api = client(addr);

    let submission = ScanSubmission::new(Coordinates::new(1.0, 2.0).unwrap());
    let err = api
        .submit_scan(&SecureId::try_from("unknown").unwrap(), &submission)
        .await
        .unwrap_err();

    match err {
        ScanAlertError::Status { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Invalid QR code");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn history_sends_paging_and_token() {
    let (addr, recorded) = spawn_server().await;
    let api = client(addr);

    let page = api
        .history(
            TOKEN,
            &ChildId::from("c1"),
            HistoryQuery {
                limit: Some(20),
                skip: Some(0),
            },
        )
        .await
        .unwrap();

    assert_eq!(page.total, 42);
    assert_eq!(page.logs.len(), 2);
    assert_eq!(page.logs[0].id, RecordId::from("r2"));
    assert_eq!(page.logs[1].accuracy, Some(20.0));

    let queries = recorded.queries.lock().unwrap();
    assert_eq!(queries[0].get("limit").map(String::as_str), Some("20"));
    assert_eq!(queries[0].get("skip").map(String::as_str), Some("0"));
}

#[tokio::test]
async fn history_without_paging_sends_no_query() {
    let (addr, recorded) = spawn_server().await;
    let api = client(addr);

    api.history(TOKEN, &ChildId::from("c1"), HistoryQuery::default())
        .await
        .unwrap();
    assert!(recorded.queries.lock().unwrap()[0].is_empty());
}

#[tokio::test]
async fn bad_token_is_unauthorized() {
    let (addr, _) = spawn_server().await;
    let api = client(addr);

    let err = api
        .history("stale-token", &ChildId::from("c1"), HistoryQuery::latest(20))
        .await
        .unwrap_err();
    assert!(matches!(err, ScanAlertError::Unauthorized));
}

#[tokio::test]
async fn last_location_present_and_absent() {
    let (addr, _) = spawn_server().await;
    let api = client(addr);

    let last = api
        .last_location(TOKEN, &ChildId::from("c1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.id, RecordId::from("r9"));

    let none = api
        .last_location(TOKEN, &ChildId::from("empty"))
        .await
        .unwrap();
    assert!(none.is_none());
}

#[tokio::test]
async fn empty_error_body_uses_status_reason() {
    let (addr, _) = spawn_server().await;
    let api = client(addr);

    let err = api
        .last_location(TOKEN, &ChildId::from("broken"))
        .await
        .unwrap_err();
    match err {
        ScanAlertError::Status { status, message } => {
            assert_eq!(status, 500);
            assert_eq!(message, "Internal Server Error");
        }
        other => panic!("unexpected error {:?}", other),
    }
}
