//! Real WebSocket clients against a served router.

mod common;

use std::{sync::Arc, time::Duration};

use common::*;
use crewchat_backend::{
    models::PaymentStatus, storage::MemoryStorage, ws_router::create_router, AppState,
};
use crewchat_common::{ClientMessage, ErrorKind, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server() -> (String, Arc<AppState<MemoryStorage>>, MemoryStorage) {
    let (state, storage) = memory_state();
    let app = create_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{addr}/ws"), state, storage)
}

async fn connect(url: &str) -> Client {
    let (socket, _response) = connect_async(url).await.unwrap();
    socket
}

async fn send(client: &mut Client, message: &ClientMessage) {
    let json = serde_json::to_string(message).unwrap();
    client.send(Message::text(json)).await.unwrap();
}

async fn receive(client: &mut Client) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn join(client: &mut Client, id: Uuid, phone_number: &str) -> ServerMessage {
    send(
        client,
        &ClientMessage::JoinRoom {
            room_id: id.to_string(),
            phone_number: phone_number.to_string(),
        },
    )
    .await;
    receive(client).await
}

#[tokio::test]
async fn test_message_reaches_every_member() {
    let (url, state, storage) = start_server().await;
    let event = seed_event(&storage, 1, 0).await;
    state.ledger.accept(event.id, ORGANIZER, CREW_A).await.unwrap();
    record_payment(&storage, event.id, PaymentStatus::Completed).await;

    let mut organizer = connect(&url).await;
    let mut crew = connect(&url).await;

    let room_id = match join(&mut organizer, event.id, ORGANIZER).await {
        ServerMessage::RoomJoined { room } => room.room_id,
        other => panic!("unexpected reply: {other:?}"),
    };
    assert!(matches!(
        join(&mut crew, room_id, CREW_A).await,
        ServerMessage::RoomJoined { room } if room.room_id == room_id
    ));

    send(
        &mut crew,
        &ClientMessage::SendMessage {
            room_id: room_id.to_string(),
            phone_number: CREW_A.to_string(),
            message: "Loading dock is clear".to_string(),
            client_message_id: None,
        },
    )
    .await;

    // The author gets both the acknowledgment and the broadcast
    let mut accepted = None;
    let mut echoed = None;
    while accepted.is_none() || echoed.is_none() {
        match receive(&mut crew).await {
            ServerMessage::MessageAccepted { message } => accepted = Some(message),
            ServerMessage::NewMessage { message } => echoed = Some(message),
            other => panic!("unexpected message: {other:?}"),
        }
    }
    assert_eq!(accepted, echoed);

    match receive(&mut organizer).await {
        ServerMessage::NewMessage { message } => {
            assert_eq!(message.message, "Loading dock is clear");
            assert_eq!(message.phone_number, CREW_A);
            assert_eq!(message.seq, 1);
        },
        other => panic!("unexpected message: {other:?}"),
    }
}

#[tokio::test]
async fn test_outsider_is_refused() {
    let (url, state, storage) = start_server().await;
    let event = seed_event(&storage, 1, 0).await;
    state.ledger.accept(event.id, ORGANIZER, CREW_A).await.unwrap();
    record_payment(&storage, event.id, PaymentStatus::Completed).await;

    let mut outsider = connect(&url).await;
    match join(&mut outsider, event.id, OUTSIDER).await {
        ServerMessage::Error { kind, message, .. } => {
            assert_eq!(kind, ErrorKind::Unauthorized);
            assert!(!message.contains(CREW_A));
        },
        other => panic!("unexpected reply: {other:?}"),
    }
    assert_eq!(state.registry.connection_count(), 0);

    outsider.send(Message::text("{\"type\":")).await.unwrap();
    assert!(matches!(
        receive(&mut outsider).await,
        ServerMessage::MalformedMessage { .. }
    ));
}

#[tokio::test]
async fn test_event_end_is_pushed() {
    let (url, state, storage) = start_server().await;
    let event = seed_event(&storage, 1, 0).await;
    state.ledger.accept(event.id, ORGANIZER, CREW_A).await.unwrap();
    record_payment(&storage, event.id, PaymentStatus::Completed).await;

    let mut crew = connect(&url).await;
    let room_id = match join(&mut crew, event.id, CREW_A).await {
        ServerMessage::RoomJoined { room } => room.room_id,
        other => panic!("unexpected reply: {other:?}"),
    };

    state.lifecycle.end_event(event.id, ORGANIZER, true).await.unwrap();

    match receive(&mut crew).await {
        ServerMessage::EventEnded {
            event_id,
            room_id: ended_room,
        } => {
            assert_eq!(event_id, event.id);
            assert_eq!(ended_room, room_id);
        },
        other => panic!("unexpected message: {other:?}"),
    }

    send(
        &mut crew,
        &ClientMessage::SendMessage {
            room_id: room_id.to_string(),
            phone_number: CREW_A.to_string(),
            message: "still here?".to_string(),
            client_message_id: None,
        },
    )
    .await;
    assert!(matches!(
        receive(&mut crew).await,
        ServerMessage::Error { kind: ErrorKind::RoomClosed, .. }
    ));
}

#[tokio::test]
async fn test_disconnect_leaves_rooms() {
    let (url, state, storage) = start_server().await;
    let event = seed_event(&storage, 1, 0).await;
    state.ledger.accept(event.id, ORGANIZER, CREW_A).await.unwrap();
    record_payment(&storage, event.id, PaymentStatus::Completed).await;

    let mut crew = connect(&url).await;
    let room_id = match join(&mut crew, event.id, CREW_A).await {
        ServerMessage::RoomJoined { room } => room.room_id,
        other => panic!("unexpected reply: {other:?}"),
    };
    assert_eq!(state.registry.members(room_id), 1);

    crew.close(None).await.unwrap();
    drop(crew);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.registry.members(room_id) != 0 {
        assert!(tokio::time::Instant::now() < deadline, "connection never cleaned up");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.registry.connection_count(), 0);
}
