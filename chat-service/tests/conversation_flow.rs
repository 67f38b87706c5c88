//! End-to-end flows across the lifecycle, delivery, and transport layers,
//! plus a REST smoke test driving the router in-process.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use chat_service::db::{run_migrations, Database};
use chat_service::events::{Effect, ServerEvent};
use chat_service::lifecycle;
use chat_service::models::{Identity, SendMessageRequest};
use chat_service::notify::Notifier;
use chat_service::protocol;
use chat_service::rooms::RoomKey;
use chat_service::state::AppState;
use http_body_util::BodyExt;
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;
use vendora_core::Role;

async fn setup_db() -> Database {
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    Database::new(pool)
}

async fn seed_identity(db: &Database, id: &str, role: Role, name: &str) -> String {
    db.upsert_identity(&Identity {
        id: id.to_string(),
        role,
        display_name: name.to_string(),
        language: "en".to_string(),
        push_token: None,
        is_active: true,
    })
    .await
    .unwrap();
    db.create_session(id).await.unwrap()
}

fn user_message(body: &str) -> SendMessageRequest {
    SendMessageRequest {
        conversation_key: "v1_u1".to_string(),
        sender_id: "u1".to_string(),
        sender_role: "user".to_string(),
        receiver_id: "v1".to_string(),
        receiver_role: "vendor".to_string(),
        message: body.to_string(),
        attachment: None,
    }
}

#[tokio::test]
async fn full_conversation_lifecycle() {
    let db = setup_db().await;

    // First contact creates the conversation with a welcome message that
    // counts as unread for the vendor only.
    let (conversation, created, _) = lifecycle::find_or_create(&db, "u1", "v1").await.unwrap();
    assert!(created);
    assert_eq!(conversation.conversation_key, "v1_u1");
    assert_eq!(conversation.unread_for("v1"), 1);
    assert_eq!(conversation.unread_for("u1"), 0);

    // User sends; vendor's counter climbs, user's stays at zero.
    let (_, effects) = protocol::send_message(&db, &user_message("Hi"), true)
        .await
        .unwrap();
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::Broadcast { event: ServerEvent::NewMessage(_), .. })));

    let updated = db.find_by_key("v1_u1").await.unwrap().unwrap();
    assert_eq!(updated.messages_count, 2);
    assert_eq!(updated.unread_for("v1"), 2);
    assert_eq!(updated.last_message.unwrap().text, "Hi");

    // Vendor reads; counter drops to zero and the update targets the
    // vendor's own identity room.
    let effects = protocol::mark_read(&db, &updated.id, "v1").await.unwrap();
    match &effects[0] {
        Effect::Broadcast { room, .. } => {
            assert_eq!(*room, RoomKey::identity(Role::Vendor, "v1"));
        }
        other => panic!("unexpected effect: {other:?}"),
    }
    let read = db.get_conversation(&updated.id).await.unwrap().unwrap();
    assert_eq!(read.unread_for("v1"), 0);

    // Vendor reports: conversation is blocked in the same update and a
    // moderation alert effect is produced.
    let (reported, effects) = lifecycle::report(&db, &updated.id, "v1", "vendor", "spam")
        .await
        .unwrap();
    assert!(reported.is_blocked);
    assert!(reported.is_reported);
    assert!(effects
        .iter()
        .any(|e| matches!(e, Effect::ModerationAlert { .. })));

    // Delivery is refused while blocked.
    assert!(protocol::send_message(&db, &user_message("still there?"), true)
        .await
        .is_err());

    // Unblocking clears both flags and delivery resumes.
    lifecycle::unblock(&db, &updated.id).await.unwrap();
    protocol::send_message(&db, &user_message("back"), true)
        .await
        .unwrap();
}

#[tokio::test]
async fn effects_reach_subscribed_rooms() {
    let db = setup_db().await;
    let state = AppState::new(db, Notifier::disabled());
    lifecycle::find_or_create(&state.db, "u1", "v1").await.unwrap();

    // A vendor device watching its identity room plus a client viewing the
    // conversation; the same send must reach both through different events.
    let mut identity_rx = state
        .room(&RoomKey::identity(Role::Vendor, "v1"))
        .subscribe();
    let mut conversation_rx = state.room(&RoomKey::conversation("v1_u1")).subscribe();

    let (_, effects) = protocol::send_message(&state.db, &user_message("Hi"), true)
        .await
        .unwrap();
    state.dispatch(effects);

    let conversation_payload = conversation_rx.recv().await.unwrap();
    assert!(conversation_payload.contains("\"type\":\"new_message\""));

    let identity_payload = identity_rx.recv().await.unwrap();
    assert!(identity_payload.contains("\"type\":\"new_conversation\""));
}

#[tokio::test]
async fn multi_device_identity_room_fanout() {
    let db = setup_db().await;
    let state = AppState::new(db, Notifier::disabled());
    let (conversation, _, _) = lifecycle::find_or_create(&state.db, "u1", "v1").await.unwrap();

    let room = RoomKey::identity(Role::Vendor, "v1");
    let mut phone = state.room(&room).subscribe();
    let mut laptop = state.room(&room).subscribe();

    let effects = protocol::mark_read(&state.db, &conversation.id, "v1")
        .await
        .unwrap();
    state.dispatch(effects);

    for rx in [&mut phone, &mut laptop] {
        let payload = rx.recv().await.unwrap();
        assert!(payload.contains("\"type\":\"unread_count\""));
        assert!(payload.contains("\"unread_count\":0"));
    }
}

#[tokio::test]
async fn concurrent_sends_preserve_message_count() {
    let db = setup_db().await;
    lifecycle::find_or_create(&db, "u1", "v1").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..4 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            protocol::send_message(&db, &user_message(&format!("msg {i}")), true).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let conversation = db.find_by_key("v1_u1").await.unwrap().unwrap();
    // Welcome + 4 concurrent sends, none lost
    assert_eq!(conversation.messages_count, 5);
    assert_eq!(conversation.unread_for("v1"), 5);
    let log = db.history("v1_u1", "v1", 50, 0).await.unwrap();
    assert_eq!(log.len(), 5);
}

#[tokio::test]
async fn rest_create_and_list_with_session_auth() {
    let db = setup_db().await;
    let user_token = seed_identity(&db, "u1", Role::User, "Alice").await;
    let state = AppState::new(db, Notifier::disabled());
    let app = chat_service::app(state);

    // Unauthenticated requests are rejected at the extractor.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/conversations")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"user_id":"u1","vendor_id":"v1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // With a valid session the pair's conversation is created.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/conversations")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {user_token}"))
                .body(Body::from(r#"{"user_id":"u1","vendor_id":"v1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(envelope["success"], true);
    assert_eq!(envelope["data"]["conversation_key"], "v1_u1");

    // Listing as the user returns the one conversation.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/conversations/u1/user")
                .header(header::AUTHORIZATION, format!("Bearer {user_token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let envelope: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(envelope["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn rest_forbids_acting_for_another_identity() {
    let db = setup_db().await;
    let user_token = seed_identity(&db, "u1", Role::User, "Alice").await;
    seed_identity(&db, "v1", Role::Vendor, "Vendor One").await;
    let state = AppState::new(db, Notifier::disabled());
    lifecycle::find_or_create(&state.db, "u1", "v1").await.unwrap();
    let app = chat_service::app(state);

    // u1's session cannot send a message as v1.
    let body = r#"{
        "conversation_key": "v1_u1",
        "sender_id": "v1",
        "sender_role": "vendor",
        "receiver_id": "u1",
        "receiver_role": "user",
        "message": "spoofed"
    }"#;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/messages")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {user_token}"))
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
