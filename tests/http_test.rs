//! The HTTP surface end to end, driven through `oneshot` with a dev session.

mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rollcall::{app, notify::push::LogPushSender, AppOptions, AppState};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

struct Client {
    app: Router,
    cookie: Option<String>,
}

impl Client {
    fn anonymous(app: &Router) -> Self {
        Client { app: app.clone(), cookie: None }
    }

    async fn signed_in(app: &Router, user_id: Uuid) -> Self {
        let mut client = Client::anonymous(app);
        let response = client
            .app
            .clone()
            .oneshot(json_request("POST", "/session", None, json!({ "userId": user_id })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        client.cookie = set_cookie.split(';').next().map(str::to_owned);
        client
    }

    async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = match body {
            Some(body) => json_request(method, uri, self.cookie.as_deref(), body),
            None => {
                let mut builder = Request::builder().method(method).uri(uri);
                if let Some(cookie) = &self.cookie {
                    builder = builder.header(header::COOKIE, cookie);
                }
                builder.body(Body::empty()).unwrap()
            }
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }
}

fn json_request(method: &str, uri: &str, cookie: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn router(state: AppState) -> Router {
    app(state, AppOptions { session_idle: time::Duration::minutes(5), dev_login: true })
}

#[tokio::test]
async fn everything_needs_a_session() {
    let db = common::test_db().await;
    let app = router(common::state(&db.pool, Arc::new(LogPushSender)));
    let client = Client::anonymous(&app);

    let (status, body) = client.call("GET", "/rooms", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthenticated");

    let (status, _) = client.call("GET", "/notifications", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn dev_login_is_off_unless_asked_for() {
    let db = common::test_db().await;
    let user = common::user(&db.pool, "alice").await;
    let app = app(
        common::state(&db.pool, Arc::new(LogPushSender)),
        AppOptions { session_idle: time::Duration::minutes(5), dev_login: false },
    );

    let response = app
        .oneshot(json_request("POST", "/session", None, json!({ "userId": user.id })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn chat_room_lifecycle() {
    let db = common::test_db().await;
    let (alice, bob, carol) = (
        common::user(&db.pool, "alice").await,
        common::user(&db.pool, "bob").await,
        common::user(&db.pool, "carol").await,
    );
    let app = router(common::state(&db.pool, Arc::new(LogPushSender)));
    let (as_alice, as_bob, as_carol) = (
        Client::signed_in(&app, alice.id).await,
        Client::signed_in(&app, bob.id).await,
        Client::signed_in(&app, carol.id).await,
    );

    let (status, room) = as_alice
        .call("POST", "/rooms", Some(json!({ "name": "practice", "memberIds": [bob.id] })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let room_id = room["id"].as_str().unwrap().to_owned();
    let messages = format!("/rooms/{room_id}/messages");

    let (status, sent) = as_alice.call("POST", &messages, Some(json!({ "body": "hi bob" }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["kind"], "text");

    let (status, _) = as_alice.call("POST", &messages, Some(json!({ "body": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, page) = as_bob.call("GET", &messages, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["messages"].as_array().unwrap().len(), 1);
    assert_eq!(page["hasMore"], false);

    let (status, body) = as_carol.call("GET", &messages, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "not_a_participant");

    let read = format!("{messages}/{}/read", sent["id"].as_str().unwrap());
    let (status, _) = as_bob.call("POST", &read, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, page) = as_alice.call("GET", &messages, None).await;
    assert_eq!(page["messages"][0]["read"], true);

    let room_uri = format!("/rooms/{room_id}");
    let (status, _) = as_alice.call("DELETE", &room_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = as_alice.call("DELETE", &room_uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "already_deleted");

    let (_, page) = as_alice.call("GET", &messages, None).await;
    assert!(page["messages"].as_array().unwrap().is_empty());
    let (_, rooms) = as_alice.call("GET", "/rooms", None).await;
    assert!(rooms.as_array().unwrap().is_empty());
    let (_, rooms) = as_bob.call("GET", "/rooms", None).await;
    assert_eq!(rooms.as_array().unwrap().len(), 1);

    // bob speaks up, and the room comes back for alice
    as_bob.call("POST", &messages, Some(json!({ "body": "still here" }))).await;
    let (_, rooms) = as_alice.call("GET", "/rooms", None).await;
    assert_eq!(rooms[0]["lastMessage"]["body"], "still here");
}

#[tokio::test]
async fn rsvp_capacity_over_http() {
    let db = common::test_db().await;
    let owner = common::admin(&db.pool, "owner").await;
    let (x, y) = (common::user(&db.pool, "x").await, common::user(&db.pool, "y").await);
    let state = common::state(&db.pool, Arc::new(LogPushSender));
    let app = router(state.clone());
    let (as_owner, as_x, as_y) = (
        Client::signed_in(&app, owner.id).await,
        Client::signed_in(&app, x.id).await,
        Client::signed_in(&app, y.id).await,
    );

    let (status, _) = as_x.call("POST", "/subjects", Some(json!({ "title": "nope", "maxConfirmed": 1 }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, subject) = as_owner
        .call("POST", "/subjects", Some(json!({ "title": "Saturday match", "maxConfirmed": 1 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    let rsvp = format!("/subjects/{}/rsvp", subject["id"].as_str().unwrap());

    let (status, record) = as_x.call("POST", &rsvp, Some(json!({ "status": "confirmed" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "confirmed");

    let (status, body) = as_y.call("POST", &rsvp, Some(json!({ "status": "confirmed" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "capacity_exceeded");

    let (status, body) = as_y
        .call("POST", &rsvp, Some(json!({ "status": "declined", "userId": x.id })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (_, list) = as_y.call("GET", &rsvp, None).await;
    assert_eq!(list["confirmed"], 1);
    assert_eq!(list["signups"].as_array().unwrap().len(), 1);

    state.notify.drain().await;
    let (_, inbox) = as_owner.call("GET", "/notifications", None).await;
    let inbox = inbox.as_array().unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0]["kind"], "rsvp");

    let read = format!("/notifications/{}/read", inbox[0]["id"].as_str().unwrap());
    let (status, _) = as_x.call("POST", &read, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = as_owner.call("POST", &read, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn admin_answering_for_an_unknown_user_is_not_found() {
    let db = common::test_db().await;
    let owner = common::admin(&db.pool, "owner").await;
    let subject = common::subject(&db.pool, owner.id, Some(2)).await;
    let app = router(common::state(&db.pool, Arc::new(LogPushSender)));
    let as_owner = Client::signed_in(&app, owner.id).await;

    let rsvp = format!("/subjects/{subject}/rsvp");
    let (status, body) = as_owner
        .call("POST", &rsvp, Some(json!({ "status": "confirmed", "userId": Uuid::now_v7() })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
    assert!(!body["message"].as_str().unwrap().contains("FOREIGN KEY"));

    let (_, list) = as_owner.call("GET", &rsvp, None).await;
    assert_eq!(list["confirmed"], 0);
}

#[tokio::test]
async fn announcements_reach_every_active_user() {
    let db = common::test_db().await;
    let owner = common::admin(&db.pool, "owner").await;
    let x = common::user(&db.pool, "x").await;
    let state = common::state(&db.pool, Arc::new(LogPushSender));
    let app = router(state.clone());
    let (as_owner, as_x) = (Client::signed_in(&app, owner.id).await, Client::signed_in(&app, x.id).await);

    let (status, _) = as_x.call("POST", "/announcements", Some(json!({ "title": "hi", "body": "all" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = as_owner
        .call("POST", "/announcements", Some(json!({ "title": "Season opener", "body": "See you there" })))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    state.notify.drain().await;
    assert_eq!(common::notification_count(&db.pool, owner.id).await, 1);
    assert_eq!(common::notification_count(&db.pool, x.id).await, 1);

    let (_, inbox) = as_x.call("GET", "/notifications", None).await;
    let id = inbox[0]["id"].as_str().unwrap().to_owned();
    as_x.call("POST", &format!("/notifications/{id}/archive"), None).await;

    let (_, inbox) = as_x.call("GET", "/notifications", None).await;
    assert!(inbox.as_array().unwrap().is_empty());
    let (_, archived) = as_x.call("GET", "/notifications?archived=true", None).await;
    assert_eq!(archived.as_array().unwrap().len(), 1);
}
