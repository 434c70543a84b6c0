use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    types::Json,
    FromRow, SqlitePool,
};
use time::OffsetDateTime;
use uuid::Uuid;

pub type UserId = Uuid;
pub type RoomId = Uuid;
pub type MessageId = Uuid;
pub type SubjectId = Uuid;

/// Unix milliseconds.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as Timestamp
}

/// Opens the pool and brings the schema up to date.
pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(10));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&db_pool).await?;
    tracing::info!(url, "database ready");

    Ok(db_pool)
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub is_admin: bool,
    pub active: bool,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub body: String,
    pub kind: MessageKind,
    pub created_at: Timestamp,
    pub read: bool,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_by: UserId,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: UserId,
    pub title: String,
    pub body: String,
    pub kind: String,
    pub related_id: Option<Uuid>,
    pub related_type: Option<String>,
    pub metadata: Option<Json<serde_json::Value>>,
    pub read: bool,
    pub archived: bool,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushDestination {
    pub token: String,
    pub user_id: UserId,
    pub platform: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SignupStatus {
    Confirmed,
    Pending,
    Declined,
    Maybe,
}

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: SubjectId,
    pub title: String,
    pub max_confirmed: Option<i64>,
    pub created_by: UserId,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRecord {
    pub subject_id: SubjectId,
    pub user_id: UserId,
    pub status: SignupStatus,
    pub signed_up_by: UserId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

pub async fn create_user(db_pool: &SqlitePool, name: &str, is_admin: bool) -> sqlx::Result<User> {
    sqlx::query_as(
        "INSERT INTO users (id,name,is_admin,active,created_at) VALUES (?,?,?,1,?)
         RETURNING id,name,is_admin,active,created_at",
    )
    .bind(Uuid::now_v7())
    .bind(name)
    .bind(is_admin)
    .bind(now_millis())
    .fetch_one(db_pool)
    .await
}

pub async fn find_user(db_pool: &SqlitePool, user_id: UserId) -> sqlx::Result<Option<User>> {
    sqlx::query_as("SELECT id,name,is_admin,active,created_at FROM users WHERE id=?")
        .bind(user_id)
        .fetch_optional(db_pool)
        .await
}

pub async fn set_user_active(db_pool: &SqlitePool, user_id: UserId, active: bool) -> sqlx::Result<()> {
    sqlx::query("UPDATE users SET active=? WHERE id=?")
        .bind(active)
        .bind(user_id)
        .execute(db_pool)
        .await?;
    Ok(())
}
