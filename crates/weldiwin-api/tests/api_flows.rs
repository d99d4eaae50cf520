//! End-to-end REST flows against an in-memory database.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt; // For `oneshot` method
use uuid::Uuid;

use weldiwin_api::auth::AppStateInner;
use weldiwin_api::notify::{Notification, Notifier};
use weldiwin_core::Services;
use weldiwin_db::Database;

#[derive(Clone, Default)]
struct Outbox(Arc<Mutex<Vec<Notification>>>);

impl Outbox {
    /// Latest code sent to `to`.
    fn code_for(&self, to: &str) -> String {
        let sent = self.0.lock().unwrap();
        let n = sent
            .iter()
            .rev()
            .find(|n| n.to == to)
            .unwrap_or_else(|| panic!("nothing sent to {to}"));
        n.body
            .split(|c: char| !c.is_ascii_digit())
            .find(|s| s.len() == 6)
            .expect("six-digit code in message")
            .to_string()
    }
}

#[async_trait]
impl Notifier for Outbox {
    fn configured(&self) -> bool {
        true
    }

    async fn send(&self, notification: Notification) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(notification);
        Ok(())
    }
}

struct TestApp {
    router: Router,
    services: Services,
    outbox: Outbox,
}

fn test_app() -> TestApp {
    let db = Database::open_in_memory().expect("in-memory db");
    let services = Services::new(Arc::new(db), Duration::from_secs(5));
    let outbox = Outbox::default();

    let mut state = AppStateInner::new(services.clone(), "test_secret_key_for_testing_only");
    state.notifier = Box::new(outbox.clone());

    TestApp {
        router: weldiwin_api::router(Arc::new(state)),
        services,
        outbox,
    }
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Registers and verifies a parent, returning (user id, token).
    async fn verified_parent(&self, name: &str) -> (String, String) {
        let email = format!("{}@example.com", name.to_lowercase());
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/register",
                None,
                Some(json!({ "name": name, "email": email, "password": "secret123" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["user"]["isVerified"], false);

        let code = self.outbox.code_for(&email);
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/verify",
                None,
                Some(json!({ "email": email, "code": code })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["user"]["isVerified"], true);

        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["accessToken"].as_str().unwrap().to_string(),
        )
    }

    async fn create_child(&self, token: &str, name: &str) -> Value {
        let (status, body) = self
            .call(Method::POST, "/children", Some(token), Some(json!({ "name": name })))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body
    }

    async fn child_token(&self, child: &Value) -> String {
        let (status, body) = self
            .call(
                Method::POST,
                "/auth/login/qr",
                None,
                Some(json!({ "qrCode": child["qrCode"] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body["child"].get("qrCode").is_none());
        body["accessToken"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn health_check_endpoint() {
    let app = test_app();
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn invited_parent_gains_and_loses_room_access() {
    let app = test_app();
    let (a_id, a) = app.verified_parent("Amina").await;
    let (b_id, b) = app.verified_parent("Bilel").await;
    let (c_id, _c) = app.verified_parent("Chiraz").await;

    let child = app.create_child(&a, "Yasmine").await;
    let child_id = child["id"].as_str().unwrap();

    let (status, rooms) = app
        .call(Method::GET, &format!("/messages/rooms/parent/{a_id}"), Some(&a), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let rooms = rooms.as_array().unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0]["child"]["id"], child_id);
    let room = rooms[0]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .call(
            Method::POST,
            &format!("/messages/room/{room}/text"),
            Some(&a),
            Some(json!({ "text": "hello", "senderModel": "User", "senderId": a_id })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // B is a stranger until invited.
    let (status, body) = app
        .call(Method::GET, &format!("/messages/room/{room}"), Some(&b), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Forbidden");

    let (status, body) = app
        .call(Method::POST, &format!("/messages/room/{room}/invite/{b_id}"), Some(&a), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["invitedParents"][0]["id"], b_id.as_str());

    let (status, body) = app
        .call(Method::GET, &format!("/messages/room/{room}"), Some(&b), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lastMessage"]["text"], "hello");

    // Invited parents cannot invite others.
    let (status, _) = app
        .call(Method::POST, &format!("/messages/room/{room}/invite/{c_id}"), Some(&b), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(Method::POST, &format!("/messages/room/{room}/invite/{b_id}"), Some(&a), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app
        .call(Method::DELETE, &format!("/messages/room/{room}/invite/{b_id}"), Some(&a), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(Method::GET, &format!("/messages/room/{room}"), Some(&b), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn child_only_sees_itself() {
    let app = test_app();
    let (_, parent) = app.verified_parent("Parent").await;
    let kid = app.create_child(&parent, "Kid").await;
    let sibling = app.create_child(&parent, "Sibling").await;
    let kid_token = app.child_token(&kid).await;
    let kid_id = kid["id"].as_str().unwrap();
    let sibling_id = sibling["id"].as_str().unwrap();

    let (status, body) = app.call(Method::GET, "/children/profile", Some(&kid_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], kid_id);

    let (status, _) = app
        .call(Method::GET, &format!("/children/{sibling_id}"), Some(&kid_token), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.call(Method::GET, "/children", Some(&kid_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, _) = app.call(Method::GET, "/users", Some(&kid_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, room) = app
        .call(Method::GET, &format!("/messages/room/child/{kid_id}"), Some(&kid_token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let room_id = room["id"].as_str().unwrap();

    // A child may only post as itself.
    let (status, _) = app
        .call(
            Method::POST,
            &format!("/messages/room/{room_id}/text"),
            Some(&kid_token),
            Some(json!({ "text": "hi", "senderModel": "Child", "senderId": sibling_id })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_or_bad_credentials_are_unauthorized() {
    let app = test_app();
    let (status, body) = app.call(Method::GET, "/children", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = app.call(Method::GET, "/children", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "nobody@example.com", "password": "whatever" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_ids_are_client_errors() {
    let app = test_app();
    let (_, token) = app.verified_parent("Parent").await;

    let (status, body) = app
        .call(Method::GET, "/messages/room/665f1c9f6e9a5f0984b2d111", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInput");

    let (status, body) = app
        .call(Method::GET, &format!("/messages/room/{}", Uuid::new_v4()), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NotFound");
}

#[tokio::test]
async fn history_pages_backwards_without_gaps() {
    let app = test_app();
    let (parent_id, token) = app.verified_parent("Parent").await;
    let child = app.create_child(&token, "Kid").await;
    let (_, room) = app
        .call(
            Method::GET,
            &format!("/messages/rooms/parent/{parent_id}"),
            Some(&token),
            None,
        )
        .await;
    let room_id = room[0]["id"].as_str().unwrap().to_string();

    for i in 0..7 {
        let (status, _) = app
            .call(
                Method::POST,
                &format!("/messages/room/{room_id}/text"),
                Some(&token),
                Some(json!({ "text": format!("#{i}"), "senderModel": "Child", "senderId": child["id"] })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, page1) = app
        .call(
            Method::GET,
            &format!("/messages/room/{room_id}/messages?limit=4"),
            Some(&token),
            None,
        )
        .await;
    let page1 = page1.as_array().unwrap().clone();
    assert_eq!(page1.len(), 4);
    assert_eq!(page1[0]["text"], "#6");

    let oldest = page1[3]["id"].as_str().unwrap();
    let (_, page2) = app
        .call(
            Method::GET,
            &format!("/messages/room/{room_id}/messages?limit=4&beforeId={oldest}"),
            Some(&token),
            None,
        )
        .await;
    let texts: Vec<&str> = page2
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["text"].as_str().unwrap())
        .collect();
    assert_eq!(texts, ["#2", "#1", "#0"]);
}

#[tokio::test]
async fn concurrent_first_access_keeps_one_room() {
    let app = Arc::new(test_app());
    let (_, token) = app.verified_parent("Parent").await;
    let child = app.create_child(&token, "Kid").await;
    let child_token = app.child_token(&child).await;
    let child_id: Uuid = child["id"].as_str().unwrap().parse().unwrap();

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let app = app.clone();
        let child_token = child_token.clone();
        tasks.push(tokio::spawn(async move {
            app.call(
                Method::GET,
                &format!("/messages/room/child/{child_id}"),
                Some(&child_token),
                None,
            )
            .await
        }));
    }
    let mut room_ids = Vec::new();
    for task in tasks {
        let (status, room) = task.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        room_ids.push(room["id"].as_str().unwrap().to_string());
    }
    room_ids.dedup();
    assert_eq!(room_ids.len(), 1);

    let count = app
        .services
        .store
        .read("count rooms", move |db| db.count_rooms_for_child(child_id))
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn password_reset_flow() {
    let app = test_app();
    app.verified_parent("Forgetful").await;
    let email = "forgetful@example.com";

    let (_, unknown) = app
        .call(
            Method::POST,
            "/auth/forgot-password",
            None,
            Some(json!({ "email": "ghost@example.com" })),
        )
        .await;
    let (status, known) = app
        .call(Method::POST, "/auth/forgot-password", None, Some(json!({ "email": email })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(unknown, known);

    let code = app.outbox.code_for(email);
    let (status, _) = app
        .call(
            Method::POST,
            "/auth/reset-password",
            None,
            Some(json!({ "email": email, "code": "000000x", "newPassword": "newsecret" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .call(
            Method::POST,
            "/auth/reset-password",
            None,
            Some(json!({ "email": email, "code": code, "newPassword": "newsecret" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": email, "password": "newsecret" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["accessToken"].is_string());
}

#[tokio::test]
async fn resend_is_rate_limited_and_duplicates_conflict() {
    let app = test_app();
    let (status, _) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "name": "Dup", "email": "dup@example.com", "password": "secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .call(
            Method::POST,
            "/auth/register",
            None,
            Some(json!({ "name": "Dup", "email": "DUP@example.com", "password": "secret123" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Conflict");

    let (status, _) = app
        .call(Method::POST, "/auth/resend-code", None, Some(json!({ "email": "dup@example.com" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn malformed_bodies_use_the_error_shape() {
    let app = test_app();
    let (parent_id, token) = app.verified_parent("Parent").await;
    app.create_child(&token, "Kid").await;
    let (_, rooms) = app
        .call(Method::GET, &format!("/messages/rooms/parent/{parent_id}"), Some(&token), None)
        .await;
    let room_id = rooms[0]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(
            Method::POST,
            &format!("/messages/room/{room_id}/text"),
            Some(&token),
            Some(json!({ "text": "hi", "senderModel": "Robot", "senderId": parent_id })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInput");
    assert!(body["message"].is_string());

    let (status, body) = app
        .call(Method::POST, "/auth/login", None, Some(json!({ "email": "a@example.com" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInput");

    let (status, body) = app
        .call(
            Method::GET,
            &format!("/messages/room/{room_id}/audio?sender=everyone"),
            Some(&token),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "InvalidInput");
}
