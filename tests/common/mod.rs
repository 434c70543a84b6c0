#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use rollcall::{
    db::{self, Message, PushDestination, RoomId, Timestamp, User, UserId},
    notify::{
        push::{DeliveryFailure, PushPayload, PushSender},
        FanoutLimits,
    },
    AppState,
};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

/// An on-disk database so several pool connections really race.
pub struct TestDb {
    pub pool: SqlitePool,
    _dir: TempDir,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("temp dir");
    let url = format!("sqlite://{}", dir.path().join("test.db").display());
    let pool = db::connect(&url, 8).await.expect("connect");
    TestDb { pool, _dir: dir }
}

pub async fn user(pool: &SqlitePool, name: &str) -> User {
    db::create_user(pool, name, false).await.expect("create user")
}

pub async fn admin(pool: &SqlitePool, name: &str) -> User {
    db::create_user(pool, name, true).await.expect("create admin")
}

pub async fn room_with(pool: &SqlitePool, owner: UserId, members: &[UserId]) -> RoomId {
    let room_id = Uuid::now_v7();
    sqlx::query("INSERT INTO rooms (id,name,created_by,created_at) VALUES (?,?,?,0)")
        .bind(room_id)
        .bind("test room")
        .bind(owner)
        .execute(pool)
        .await
        .expect("insert room");
    for member in members.iter().chain([&owner]) {
        sqlx::query("INSERT OR IGNORE INTO room_members (room_id,user_id,joined_at) VALUES (?,?,0)")
            .bind(room_id)
            .bind(member)
            .execute(pool)
            .await
            .expect("insert member");
    }
    room_id
}

/// Writes a message with a chosen timestamp, bypassing the live path.
pub async fn message_at(pool: &SqlitePool, room_id: RoomId, sender_id: UserId, created_at: Timestamp) -> Message {
    sqlx::query_as(
        "INSERT INTO messages (id,room_id,sender_id,body,kind,created_at,read)
         VALUES (?,?,?,?,'text',?,0)
         RETURNING id,room_id,sender_id,body,kind,created_at,read",
    )
    .bind(Uuid::now_v7())
    .bind(room_id)
    .bind(sender_id)
    .bind(format!("at {created_at}"))
    .bind(created_at)
    .fetch_one(pool)
    .await
    .expect("insert message")
}

pub async fn subject(pool: &SqlitePool, created_by: UserId, max_confirmed: Option<i64>) -> Uuid {
    let subject_id = Uuid::now_v7();
    sqlx::query("INSERT INTO subjects (id,title,max_confirmed,created_by,created_at) VALUES (?,?,?,?,0)")
        .bind(subject_id)
        .bind("practice")
        .bind(max_confirmed)
        .bind(created_by)
        .execute(pool)
        .await
        .expect("insert subject");
    subject_id
}

pub async fn push_destination(pool: &SqlitePool, user_id: UserId, token: &str) {
    sqlx::query("INSERT INTO push_destinations (token,user_id,platform,created_at) VALUES (?,?,'test',0)")
        .bind(token)
        .bind(user_id)
        .execute(pool)
        .await
        .expect("insert push destination");
}

pub async fn notification_count(pool: &SqlitePool, user_id: UserId) -> i64 {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notifications WHERE recipient_id=?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("count notifications");
    count
}

/// Push sender whose behaviour is chosen per token. With a `delay` each
/// send stays in flight for a while, and the highest overlap seen is kept.
#[derive(Default)]
pub struct ScriptedPush {
    pub failing_for: Vec<UserId>,
    pub gone_tokens: Vec<String>,
    pub delay: Duration,
    pub sent: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl ScriptedPush {
    pub fn slow(delay: Duration) -> Self {
        ScriptedPush { delay, ..Default::default() }
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushSender for ScriptedPush {
    async fn send(&self, destination: &PushDestination, _payload: &PushPayload) -> Result<(), DeliveryFailure> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.gone_tokens.contains(&destination.token) {
            return Err(DeliveryFailure::Gone);
        }
        if self.failing_for.contains(&destination.user_id) {
            return Err(DeliveryFailure::Rejected("scripted failure".into()));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn state(pool: &SqlitePool, push: Arc<dyn PushSender>) -> AppState {
    AppState::new(pool.clone(), push, FanoutLimits { recipients: 4, pushes: 4 })
}
