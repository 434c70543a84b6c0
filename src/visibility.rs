//! Per-user "delete chat for me".
//!
//! A deletion is a single cutoff timestamp per (room, user); messages at or
//! before it are hidden from that user only. Shared message rows are never
//! touched.

use sqlx::SqlitePool;

use crate::{
    appresult::{AppResult, Rejected},
    db::{now_millis, Message, RoomId, Timestamp, UserId},
};

#[derive(Clone)]
pub struct VisibilityGate {
    db_pool: SqlitePool,
}

/// Keeps only messages newer than the cutoff. No cutoff hides nothing.
pub fn retain_visible(cutoff: Option<Timestamp>, messages: &mut Vec<Message>) {
    if let Some(cutoff) = cutoff {
        messages.retain(|message| message.created_at > cutoff);
    }
}

impl VisibilityGate {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn cutoff(&self, room_id: RoomId, user_id: UserId) -> AppResult<Option<Timestamp>> {
        let cutoff: Option<(Timestamp,)> =
            sqlx::query_as("SELECT cutoff_at FROM visibility_cutoffs WHERE room_id=? AND user_id=?")
                .bind(room_id)
                .bind(user_id)
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(cutoff.map(|(at,)| at))
    }

    pub async fn visible_messages(
        &self,
        room_id: RoomId,
        user_id: UserId,
        mut candidates: Vec<Message>,
    ) -> AppResult<Vec<Message>> {
        let cutoff = self.cutoff(room_id, user_id).await?;
        retain_visible(cutoff, &mut candidates);
        Ok(candidates)
    }

    pub async fn delete_for_user(&self, room_id: RoomId, user_id: UserId) -> AppResult<Timestamp> {
        self.delete_for_user_at(room_id, user_id, now_millis()).await
    }

    /// Hides everything up to `at`. An existing cutoff is only moved forward
    /// once a newer message has arrived in the room; until then the room is
    /// already deleted for this user. Moving it always covers every message
    /// the room holds, even ones stamped after `at`.
    pub async fn delete_for_user_at(&self, room_id: RoomId, user_id: UserId, at: Timestamp) -> AppResult<Timestamp> {
        let cutoff: Option<(Timestamp,)> = sqlx::query_as(
            "INSERT INTO visibility_cutoffs (room_id,user_id,cutoff_at) VALUES (?1,?2,?3)
             ON CONFLICT (room_id,user_id) DO UPDATE SET cutoff_at=MAX(
                 excluded.cutoff_at,
                 (SELECT MAX(created_at) FROM messages WHERE messages.room_id=visibility_cutoffs.room_id)
             )
             WHERE EXISTS (
                 SELECT 1 FROM messages
                 WHERE messages.room_id=visibility_cutoffs.room_id
                   AND messages.created_at > visibility_cutoffs.cutoff_at
             )
             RETURNING cutoff_at",
        )
        .bind(room_id)
        .bind(user_id)
        .bind(at)
        .fetch_optional(&self.db_pool)
        .await?;

        let Some((cutoff,)) = cutoff else {
            return Err(Rejected::AlreadyDeleted.into());
        };

        tracing::info!(%room_id, %user_id, cutoff, "room deleted for user");
        Ok(cutoff)
    }
}
