use std::collections::BTreeSet;

use axum::{debug_handler, extract::{Path, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    appresult::{AppResult, Rejected},
    db::{now_millis, Message, Room, RoomId, UserId},
    session::CurrentUser,
    visibility::VisibilityGate,
    AppState,
};

use super::{msg, require_member};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewRoomQuery {
    name: String,
    #[serde(default)]
    member_ids: Vec<UserId>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn new_room(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user_id): CurrentUser,
    Json(NewRoomQuery { name, member_ids }): Json<NewRoomQuery>,
) -> AppResult<Json<Room>> {
    if name.trim().is_empty() {
        return Err(Rejected::Invalid("room name must not be empty".into()).into());
    }

    let now = now_millis();
    let mut tx = db_pool.begin().await?;
    let room: Room = sqlx::query_as(
        "INSERT INTO rooms (id,name,created_by,created_at) VALUES (?,?,?,?)
         RETURNING id,name,created_by,created_at",
    )
    .bind(Uuid::now_v7())
    .bind(&name)
    .bind(user_id)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let members: BTreeSet<UserId> = member_ids.into_iter().chain([user_id]).collect();
    for member in members {
        sqlx::query("INSERT INTO room_members (room_id,user_id,joined_at) VALUES (?,?,?)")
            .bind(room.id)
            .bind(member)
            .bind(now)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(room_id = %room.id, created_by = %user_id, "room created");
    Ok(Json(room))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddMemberQuery {
    user_id: UserId,
}

#[debug_handler(state = AppState)]
pub(crate) async fn add_member(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<RoomId>,
    Json(AddMemberQuery { user_id: member }): Json<AddMemberQuery>,
) -> AppResult<StatusCode> {
    require_member(&db_pool, room_id, user_id).await?;

    let (known,): (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM users WHERE id=?)")
        .bind(member)
        .fetch_one(&db_pool)
        .await?;
    if !known {
        return Err(Rejected::NotFound("user").into());
    }

    sqlx::query("INSERT INTO room_members (room_id,user_id,joined_at) VALUES (?,?,?) ON CONFLICT DO NOTHING")
        .bind(room_id)
        .bind(member)
        .bind(now_millis())
        .execute(&db_pool)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RoomSummary {
    #[serde(flatten)]
    room: Room,
    last_message: Option<Message>,
}

/// Rooms the caller belongs to. A room they deleted stays hidden until
/// something new is said in it.
#[debug_handler(state = AppState)]
pub(crate) async fn list_rooms(
    State(db_pool): State<SqlitePool>,
    State(gate): State<VisibilityGate>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<Json<Vec<RoomSummary>>> {
    let rooms: Vec<Room> = sqlx::query_as(
        "SELECT r.id,r.name,r.created_by,r.created_at FROM rooms r
         JOIN room_members m ON m.room_id=r.id
         WHERE m.user_id=?
         ORDER BY r.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(&db_pool)
    .await?;

    let mut summaries = Vec::with_capacity(rooms.len());
    for room in rooms {
        let latest = msg::latest(&db_pool, room.id).await?;
        let had_messages = latest.is_some();
        let last_message = gate
            .visible_messages(room.id, user_id, latest.into_iter().collect())
            .await?
            .pop();

        if had_messages && last_message.is_none() {
            continue;
        }
        if !had_messages && gate.cutoff(room.id, user_id).await?.is_some() {
            continue;
        }
        summaries.push(RoomSummary { room, last_message });
    }

    Ok(Json(summaries))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Deleted {
    room_id: RoomId,
    cutoff: i64,
}

#[debug_handler(state = AppState)]
pub(crate) async fn delete_for_me(
    State(db_pool): State<SqlitePool>,
    State(gate): State<VisibilityGate>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<RoomId>,
) -> AppResult<Json<Deleted>> {
    require_member(&db_pool, room_id, user_id).await?;
    let cutoff = gate.delete_for_user(room_id, user_id).await?;
    Ok(Json(Deleted { room_id, cutoff }))
}
