//! HTTP API driven through the router without binding a socket.

mod common;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use common::*;
use crewchat_backend::{models::PaymentStatus, storage::Storage, ws_router::create_router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// `+` is a space in query strings
fn query_phone(phone_number: &str) -> String {
    phone_number.replace('+', "%2B")
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

#[tokio::test]
async fn test_health_check() {
    let (state, _storage) = memory_state();
    let app = create_router(state);

    let (status, body) = call(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));
}

#[tokio::test]
async fn test_apply_then_accept() {
    let (state, storage) = memory_state();
    let event = seed_event(&storage, 1, 0).await;
    let app = create_router(state);

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            &format!("/api/events/{}/applications", event.id),
            json!({
                "phone_number": CREW_A,
                "images": ["uploads/badge.jpg"],
                "experience": "Bar back",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["phone_number"], CREW_A);

    let (status, _) = call(
        &app,
        json_request(
            Method::POST,
            &format!("/api/events/{}/applications", event.id),
            json!({ "phone_number": CREW_A, "images": ["uploads/badge.jpg"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/events/{}/applications/{CREW_A}/status", event.id),
            json!({ "status": "accepted", "phone_number": ORGANIZER }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], json!([CREW_A]));
    assert_eq!(body["status_to_pay"], true);

    let stored = storage.get_event(event.id).await.unwrap().unwrap();
    assert!(stored.accepted.contains(CREW_A));
    assert!(stored.applied.is_empty());
}

#[tokio::test]
async fn test_worker_cannot_decide() {
    let (state, storage) = memory_state();
    let event = seed_event(&storage, 1, 0).await;
    let app = create_router(state);

    let (status, body) = call(
        &app,
        json_request(
            Method::PUT,
            &format!("/api/events/{}/applications/{CREW_B}/status", event.id),
            json!({ "status": "accepted", "phone_number": CREW_A }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "unauthorized");
    assert_eq!(body["error"]["code"], "AUTH_001");
    let message = body["error"]["message"].as_str().unwrap();
    assert!(!message.contains(&event.id.to_string()));
    assert!(!message.contains(CREW_A));
}

#[tokio::test]
async fn test_malformed_ids_are_bad_requests() {
    let (state, _storage) = memory_state();
    let app = create_router(state);

    let (status, body) = call(
        &app,
        get(&format!("/api/events/not-an-id/capacity?phone_number={}", query_phone(ORGANIZER))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_input");

    let (status, _) = call(
        &app,
        get(&format!(
            "/api/events/{}/capacity?phone_number={}",
            uuid::Uuid::new_v4(),
            query_phone(ORGANIZER)
        )),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_payment_quote_for_organizer_only() {
    let (state, storage) = memory_state();
    let event = seed_event(&storage, 2, 1).await;
    record_payment(&storage, event.id, PaymentStatus::Pending).await;
    let app = create_router(state);

    let uri = |phone: &str| {
        format!("/api/events/{}/payment-quote?phone_number={}", event.id, query_phone(phone))
    };

    let (status, body) = call(&app, get(&uri(ORGANIZER))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["crew_slots"], 3);
    assert_eq!(body["days"], 2);
    assert_eq!(body["latest_payment_status"], "pending");

    let (status, _) = call(&app, get(&uri(CREW_A))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_chat_over_http() {
    let (state, storage) = memory_state();
    let event = seed_event(&storage, 1, 0).await;
    state.ledger.accept(event.id, ORGANIZER, CREW_A).await.unwrap();
    record_payment(&storage, event.id, PaymentStatus::Completed).await;
    seed_worker(&storage, CREW_A, "Ana", "Lopez").await;
    let event = storage.get_event(event.id).await.unwrap().unwrap();
    let room = state.lifecycle.ensure_room(&event).await.unwrap();
    let app = create_router(state);
    let messages = format!("/api/chat/rooms/{}/messages", room.id);

    let key = uuid::Uuid::new_v4();
    for _ in 0..2 {
        let (status, body) = call(
            &app,
            json_request(
                Method::POST,
                &messages,
                json!({
                    "phone_number": CREW_A,
                    "message": "On site",
                    "client_message_id": key.to_string(),
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["seq"], 1);
    }

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            &messages,
            json!({ "phone_number": OUTSIDER, "message": "let me in" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["kind"], "unauthorized");

    let (status, body) = call(
        &app,
        get(&format!("{messages}?phone_number={}", query_phone(ORGANIZER))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let history = body.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["message"], "On site");
    assert_eq!(history[0]["sender_role"], "gig_worker");
    assert_eq!(history[0]["sender_name"], "Ana Lopez");
}

#[tokio::test]
async fn test_end_requires_confirmation() {
    let (state, storage) = memory_state();
    let event = seed_event(&storage, 1, 0).await;
    let app = create_router(state);
    let uri = format!("/api/events/{}/end", event.id);

    let (status, _) = call(
        &app,
        json_request(Method::POST, &uri, json!({ "phone_number": ORGANIZER })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        json_request(
            Method::POST,
            &uri,
            json!({ "phone_number": ORGANIZER, "confirm": true }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ended");
    assert!(body.get("room_id").is_none());
}

#[tokio::test]
async fn test_delete_event() {
    let (state, storage) = memory_state();
    let event = seed_event(&storage, 1, 0).await;
    let app = create_router(state);
    let uri = |phone: &str| format!("/api/events/{}?phone_number={}", event.id, query_phone(phone));

    let request = |phone: &str| {
        Request::builder()
            .method(Method::DELETE)
            .uri(uri(phone))
            .body(Body::empty())
            .unwrap()
    };

    let (status, _) = call(&app, request(CREW_A)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&app, request(ORGANIZER)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);
    assert!(storage.get_event(event.id).await.unwrap().is_none());
}
