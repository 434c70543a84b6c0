//! RSVP-style signups with an optional cap on confirmed places.
//!
//! The cap is enforced by a single conditional upsert, so the count check and
//! the write see the same state no matter how many requests race.

mod rsvp;
mod subject;

use axum::{routing::{get, post}, Router};
use sqlx::SqlitePool;

use crate::{
    appresult::{AppResult, Rejected},
    db::{now_millis, SignupRecord, SignupStatus, Subject, SubjectId, UserId},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(subject::create))
        .route("/{id}/rsvp", get(rsvp::list).post(rsvp::set).delete(rsvp::remove))
}

#[derive(Clone)]
pub struct CapacityGate {
    db_pool: SqlitePool,
}

impl CapacityGate {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    pub async fn subject(&self, subject_id: SubjectId) -> AppResult<Subject> {
        sqlx::query_as("SELECT id,title,max_confirmed,created_by,created_at FROM subjects WHERE id=?")
            .bind(subject_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| Rejected::NotFound("subject").into())
    }

    pub async fn confirmed_count(&self, subject_id: SubjectId) -> AppResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM signups WHERE subject_id=? AND status='confirmed'")
                .bind(subject_id)
                .fetch_one(&self.db_pool)
                .await?;
        Ok(count)
    }

    pub async fn records(&self, subject_id: SubjectId) -> AppResult<Vec<SignupRecord>> {
        Ok(sqlx::query_as(
            "SELECT subject_id,user_id,status,signed_up_by,created_at,updated_at
             FROM signups WHERE subject_id=? ORDER BY created_at, user_id",
        )
        .bind(subject_id)
        .fetch_all(&self.db_pool)
        .await?)
    }

    pub async fn record(&self, subject_id: SubjectId, user_id: UserId) -> AppResult<Option<SignupRecord>> {
        Ok(sqlx::query_as(
            "SELECT subject_id,user_id,status,signed_up_by,created_at,updated_at
             FROM signups WHERE subject_id=? AND user_id=?",
        )
        .bind(subject_id)
        .bind(user_id)
        .fetch_optional(&self.db_pool)
        .await?)
    }

    pub async fn set_status(&self, subject_id: SubjectId, user_id: UserId, status: SignupStatus) -> AppResult<SignupRecord> {
        self.set_status_by(subject_id, user_id, status, user_id).await
    }

    /// Creates or updates the signup of `user_id`, recording `actor` as whoever
    /// made the change. Confirming is refused once the subject is full; the
    /// user's own confirmed place does not count against them.
    pub async fn set_status_by(
        &self,
        subject_id: SubjectId,
        user_id: UserId,
        status: SignupStatus,
        actor: UserId,
    ) -> AppResult<SignupRecord> {
        self.subject(subject_id).await?;

        let record: Option<SignupRecord> = sqlx::query_as(
            "INSERT INTO signups (subject_id,user_id,status,signed_up_by,created_at,updated_at)
             SELECT ?1,?2,?3,?4,?5,?5
             WHERE ?3 <> 'confirmed'
                OR (SELECT max_confirmed FROM subjects WHERE id=?1) IS NULL
                OR (SELECT COUNT(*) FROM signups WHERE subject_id=?1 AND status='confirmed' AND user_id<>?2)
                   < (SELECT max_confirmed FROM subjects WHERE id=?1)
             ON CONFLICT (subject_id,user_id) DO UPDATE SET
                status=excluded.status,
                signed_up_by=excluded.signed_up_by,
                updated_at=excluded.updated_at
             RETURNING subject_id,user_id,status,signed_up_by,created_at,updated_at",
        )
        .bind(subject_id)
        .bind(user_id)
        .bind(status)
        .bind(actor)
        .bind(now_millis())
        .fetch_optional(&self.db_pool)
        .await?;

        let Some(record) = record else {
            tracing::info!(%subject_id, %user_id, "confirm refused, subject is full");
            return Err(Rejected::CapacityExceeded.into());
        };

        tracing::debug!(%subject_id, %user_id, status = ?record.status, %actor, "signup updated");
        Ok(record)
    }

    /// Removes the signup outright, freeing its place. Missing is fine.
    pub async fn remove_status(&self, subject_id: SubjectId, user_id: UserId) -> AppResult<bool> {
        let removed = sqlx::query("DELETE FROM signups WHERE subject_id=? AND user_id=?")
            .bind(subject_id)
            .bind(user_id)
            .execute(&self.db_pool)
            .await?
            .rows_affected();
        Ok(removed > 0)
    }
}
