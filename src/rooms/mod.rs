pub mod msg;
pub mod room;
pub mod ws;

use axum::{routing::{delete, get, post}, Router};
use sqlx::SqlitePool;

use crate::{
    appresult::{AppResult, Rejected},
    db::{RoomId, UserId},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(room::list_rooms).post(room::new_room))
        .route("/{id}", delete(room::delete_for_me))
        .route("/{id}/members", post(room::add_member))
        .route("/{id}/messages", get(msg::list_msgs).post(msg::post_msg))
        .route("/{id}/messages/{message_id}/read", post(msg::read_msg))
}

/// Durable membership, as opposed to who has the room open right now.
pub async fn members(db_pool: &SqlitePool, room_id: RoomId) -> AppResult<Vec<UserId>> {
    let members: Vec<(UserId,)> = sqlx::query_as("SELECT user_id FROM room_members WHERE room_id=?")
        .bind(room_id)
        .fetch_all(db_pool)
        .await?;
    Ok(members.into_iter().map(|(id,)| id).collect())
}

pub async fn require_member(db_pool: &SqlitePool, room_id: RoomId, user_id: UserId) -> AppResult<()> {
    let (exists, member): (bool, bool) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM rooms WHERE id=?1),
                EXISTS (SELECT 1 FROM room_members WHERE room_id=?1 AND user_id=?2)",
    )
    .bind(room_id)
    .bind(user_id)
    .fetch_one(db_pool)
    .await?;

    match (exists, member) {
        (false, _) => Err(Rejected::NotFound("room").into()),
        (true, false) => Err(Rejected::NotAParticipant.into()),
        (true, true) => Ok(()),
    }
}
