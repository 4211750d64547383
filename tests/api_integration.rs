//! HTTP endpoint tests driven through the router without a listener.

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use signaling_relay::config::Settings;
use signaling_relay::server::{create_app, AppState};

fn app() -> (Router, AppState) {
    let state = AppState::in_memory(Settings::default());
    (create_app(state.clone()), state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn create_room(app: &Router) -> String {
    let (status, body) = send(app, Method::POST, "/create-room", None).await;
    assert_eq!(status, StatusCode::OK);
    body["roomId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_create_room_returns_alphanumeric_id() {
    let (app, state) = app();

    let room_id = create_room(&app).await;
    assert_eq!(room_id.len(), 8);
    assert!(room_id.chars().all(|c| c.is_ascii_alphanumeric()));

    let room = state.store.get(&room_id).await.unwrap();
    assert!(room.exists);
    assert_eq!(room.count, 0);

    assert_ne!(create_room(&app).await, room_id);
}

#[tokio::test]
async fn test_join_room_advisory_check() {
    let (app, state) = app();
    let room_id = create_room(&app).await;

    let (status, body) = send(&app, Method::POST, "/join-room", Some(json!({ "roomId": room_id }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "joined" }));

    // The check itself admits nobody
    assert_eq!(state.store.get(&room_id).await.unwrap().count, 0);

    // Fill the room through the admission path
    for _ in 0..2 {
        state.admission.begin(&room_id).await.unwrap().commit().await.unwrap();
    }
    let (status, body) = send(&app, Method::POST, "/join-room", Some(json!({ "roomId": room_id }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_join_room_rejects_bad_input() {
    let (app, _state) = app();

    let (status, body) = send(&app, Method::POST, "/join-room", Some(json!({ "roomId": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["message"], "roomId is required");

    // Present but malformed
    let (status, body) = send(&app, Method::POST, "/join-room", Some(json!({ "roomId": "a b" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["message"], "Invalid roomId");

    let (status, _) = send(&app, Method::POST, "/join-room", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/join-room")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::POST, "/join-room", Some(json!({ "roomId": "nope" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_ice_servers() {
    let (app, _state) = app();

    let (status, body) = send(&app, Method::GET, "/ice-servers", None).await;
    assert_eq!(status, StatusCode::OK);
    let servers = body.as_array().unwrap();
    assert!(!servers.is_empty());
    assert!(servers[0]["urls"][0].as_str().unwrap().starts_with("stun:"));
}

#[tokio::test]
async fn test_plain_get_on_signaling_endpoint_rolls_back() {
    let (app, state) = app();
    let room_id = create_room(&app).await;

    // No upgrade headers: the reservation is taken, then rolled back
    let (status, _) = send(&app, Method::GET, &format!("/ws/{room_id}"), None).await;
    assert!(status.is_client_error());
    assert_eq!(state.store.get(&room_id).await.unwrap().count, 0);
    assert!(state.registry.get(&room_id).is_none());

    let (status, body) = send(&app, Method::GET, "/ws/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&app, Method::GET, "/ws/bad%20id", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_signaling_endpoint_without_room_id_is_bad_request() {
    let (app, _state) = app();

    for uri in ["/ws/", "/ws"] {
        let (status, body) = send(&app, Method::GET, uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["message"], "Invalid room id");
    }
}

#[tokio::test]
async fn test_health_stats_and_metrics() {
    let (app, _state) = app();
    create_room(&app).await;

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"]["backend"], "memory");
    assert_eq!(body["store"]["rooms"], 1);

    let (status, body) = send(&app, Method::GET, "/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["registry"]["live_rooms"], 0);

    let request = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&text);
    assert!(text.contains("relay_rooms_created_total"));
}
