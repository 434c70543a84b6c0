use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    appresult::{AppResult, Rejected},
    broadcast::Broadcaster,
    db::{now_millis, Message, MessageId, MessageKind, RoomId, UserId},
    events::{OutgoingMessage, ServerEvent},
    registry::ConnectionId,
    session::CurrentUser,
    visibility::VisibilityGate,
    AppState,
};

use super::{members, require_member};

const DEFAULT_PAGE_SIZE: u32 = 50;
const MAX_PAGE_SIZE: u32 = 100;

const MESSAGE_COLUMNS: &str = "id,room_id,sender_id,body,kind,created_at,read";

/// Persists a message and pushes it live. `origin` is the socket it came
/// from, which gets a `message-sent` acknowledgement instead of an echo.
pub async fn send_msg(
    db_pool: &SqlitePool,
    broadcaster: &Broadcaster,
    sender_id: UserId,
    room_id: RoomId,
    OutgoingMessage { body, kind }: OutgoingMessage,
    origin: Option<ConnectionId>,
) -> AppResult<Message> {
    if body.trim().is_empty() {
        return Err(Rejected::Invalid("message body must not be empty".into()).into());
    }
    require_member(db_pool, room_id, sender_id).await?;

    let _turn = broadcaster.room_turn(room_id).await;
    let message = insert_message(db_pool, room_id, sender_id, &body, kind).await?;

    if let Some(origin) = origin {
        broadcaster
            .registry()
            .send(origin, ServerEvent::MessageSent { room_id, message: message.clone() });
    }
    let members = members(db_pool, room_id).await?;
    broadcaster.send_message(&message, &members, origin);

    Ok(message)
}

/// `created_at` keeps increasing within a room and always lands after every
/// visibility cutoff already taken there, so nothing new is born hidden.
pub async fn insert_message(
    db_pool: &SqlitePool,
    room_id: RoomId,
    sender_id: UserId,
    body: &str,
    kind: MessageKind,
) -> AppResult<Message> {
    let message = sqlx::query_as(&format!(
        "INSERT INTO messages (id,room_id,sender_id,body,kind,created_at,read)
         VALUES (?1,?2,?3,?4,?5, MAX(?6,
             COALESCE((SELECT MAX(created_at) + 1 FROM messages WHERE room_id=?2), 0),
             COALESCE((SELECT MAX(cutoff_at) + 1 FROM visibility_cutoffs WHERE room_id=?2), 0)
         ), 0)
         RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(Uuid::now_v7())
    .bind(room_id)
    .bind(sender_id)
    .bind(body)
    .bind(kind)
    .bind(now_millis())
    .fetch_one(db_pool)
    .await?;

    Ok(message)
}

pub async fn latest(db_pool: &SqlitePool, room_id: RoomId) -> AppResult<Option<Message>> {
    Ok(sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id=? ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(room_id)
    .fetch_optional(db_pool)
    .await?)
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListQuery {
    page: Option<u32>,
    limit: Option<u32>,
    #[serde(default)]
    sort_order: SortOrder,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessagePage {
    messages: Vec<Message>,
    page: u32,
    limit: u32,
    has_more: bool,
}

/// One page of what this user is allowed to see. The cutoff is applied in
/// the query so pages stay full.
pub async fn visible_page(
    db_pool: &SqlitePool,
    gate: &VisibilityGate,
    room_id: RoomId,
    user_id: UserId,
    page: u32,
    limit: u32,
    order: SortOrder,
) -> AppResult<(Vec<Message>, bool)> {
    let cutoff = gate.cutoff(room_id, user_id).await?;
    let direction = match order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };

    let mut messages: Vec<Message> = sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE room_id=? AND created_at > ?
         ORDER BY created_at {direction}, id {direction}
         LIMIT ? OFFSET ?"
    ))
    .bind(room_id)
    .bind(cutoff.unwrap_or(i64::MIN))
    .bind(i64::from(limit) + 1)
    .bind(i64::from(page.saturating_sub(1)) * i64::from(limit))
    .fetch_all(db_pool)
    .await?;

    let has_more = messages.len() > limit as usize;
    messages.truncate(limit as usize);
    Ok((messages, has_more))
}

#[debug_handler(state = AppState)]
pub(crate) async fn list_msgs(
    State(db_pool): State<SqlitePool>,
    State(gate): State<VisibilityGate>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<RoomId>,
    Query(ListQuery { page, limit, sort_order }): Query<ListQuery>,
) -> AppResult<Json<MessagePage>> {
    require_member(&db_pool, room_id, user_id).await?;

    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let (messages, has_more) = visible_page(&db_pool, &gate, room_id, user_id, page, limit, sort_order).await?;

    Ok(Json(MessagePage { messages, page, limit, has_more }))
}

#[debug_handler(state = AppState)]
pub(crate) async fn post_msg(
    State(db_pool): State<SqlitePool>,
    State(broadcaster): State<Broadcaster>,
    CurrentUser(user_id): CurrentUser,
    Path(room_id): Path<RoomId>,
    Json(message): Json<OutgoingMessage>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let message = send_msg(&db_pool, &broadcaster, user_id, room_id, message, None).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Flips the read flag on someone else's message and tells the room.
pub async fn mark_read(
    db_pool: &SqlitePool,
    broadcaster: &Broadcaster,
    room_id: RoomId,
    message_id: MessageId,
    reader: UserId,
    origin: Option<ConnectionId>,
) -> AppResult<()> {
    require_member(db_pool, room_id, reader).await?;

    let sender: Option<(UserId,)> = sqlx::query_as("SELECT sender_id FROM messages WHERE id=? AND room_id=?")
        .bind(message_id)
        .bind(room_id)
        .fetch_optional(db_pool)
        .await?;
    let Some((sender,)) = sender else {
        return Err(Rejected::NotFound("message").into());
    };

    if sender != reader {
        sqlx::query("UPDATE messages SET read=1 WHERE id=? AND read=0")
            .bind(message_id)
            .execute(db_pool)
            .await?;
    }

    broadcaster.mark_read(room_id, message_id, reader, origin);
    Ok(())
}

#[debug_handler(state = AppState)]
pub(crate) async fn read_msg(
    State(db_pool): State<SqlitePool>,
    State(broadcaster): State<Broadcaster>,
    CurrentUser(user_id): CurrentUser,
    Path((room_id, message_id)): Path<(RoomId, MessageId)>,
) -> AppResult<StatusCode> {
    mark_read(&db_pool, &broadcaster, room_id, message_id, user_id, None).await?;
    Ok(StatusCode::NO_CONTENT)
}
