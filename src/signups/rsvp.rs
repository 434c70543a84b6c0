use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    appresult::{AppResult, Rejected},
    db::{self, SignupRecord, SignupStatus, Subject, SubjectId, UserId},
    notify::{NewNotification, NotifyJob, NotifyOptions, NotifyQueue},
    session::{require_admin, CurrentUser},
    AppState,
};

use super::CapacityGate;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignupList {
    subject: Subject,
    confirmed: i64,
    signups: Vec<SignupRecord>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list(
    State(gate): State<CapacityGate>,
    CurrentUser(_): CurrentUser,
    Path(subject_id): Path<SubjectId>,
) -> AppResult<Json<SignupList>> {
    Ok(Json(SignupList {
        subject: gate.subject(subject_id).await?,
        confirmed: gate.confirmed_count(subject_id).await?,
        signups: gate.records(subject_id).await?,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SetRsvp {
    status: SignupStatus,
    /// Set by an admin answering on someone else's behalf.
    user_id: Option<UserId>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn set(
    State(db_pool): State<SqlitePool>,
    State(gate): State<CapacityGate>,
    State(notify): State<NotifyQueue>,
    CurrentUser(actor): CurrentUser,
    Path(subject_id): Path<SubjectId>,
    Json(SetRsvp { status, user_id }): Json<SetRsvp>,
) -> AppResult<Json<SignupRecord>> {
    let user_id = user_id.unwrap_or(actor);
    if user_id != actor {
        require_admin(&db_pool, actor).await?;
        if db::find_user(&db_pool, user_id).await?.is_none() {
            return Err(Rejected::NotFound("user").into());
        }
    }

    let record = gate.set_status_by(subject_id, user_id, status, actor).await?;

    // the signup is committed; a lost notification must not turn it into a failure
    if let Err(err) = announce_change(&db_pool, &gate, &notify, &record).await {
        tracing::warn!(%subject_id, %user_id, error = %err.0, "rsvp change not announced");
    }

    Ok(Json(record))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoveRsvp {
    user_id: Option<UserId>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn remove(
    State(db_pool): State<SqlitePool>,
    State(gate): State<CapacityGate>,
    CurrentUser(actor): CurrentUser,
    Path(subject_id): Path<SubjectId>,
    Query(RemoveRsvp { user_id }): Query<RemoveRsvp>,
) -> AppResult<StatusCode> {
    let user_id = user_id.unwrap_or(actor);
    if user_id != actor {
        require_admin(&db_pool, actor).await?;
    }

    gate.subject(subject_id).await?;
    gate.remove_status(subject_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Whoever did not make the change hears about it: the user when an admin
/// answered for them, otherwise the subject's creator.
async fn announce_change(
    db_pool: &SqlitePool,
    gate: &CapacityGate,
    notify: &NotifyQueue,
    record: &SignupRecord,
) -> AppResult<()> {
    let subject = gate.subject(record.subject_id).await?;
    let (recipient, body) = if record.signed_up_by != record.user_id {
        (record.user_id, format!("Your RSVP for {} was set to {:?}", subject.title, record.status))
    } else if subject.created_by != record.user_id {
        let name = db::find_user(db_pool, record.user_id)
            .await?
            .map(|user| user.name)
            .unwrap_or_else(|| "Someone".to_owned());
        (subject.created_by, format!("{name} answered {:?} for {}", record.status, subject.title))
    } else {
        return Ok(());
    };

    notify.enqueue(NotifyJob::Users {
        recipients: vec![recipient],
        notification: NewNotification {
            title: "RSVP updated".into(),
            body,
            kind: "rsvp".into(),
            related_id: Some(subject.id),
            related_type: Some("subject".into()),
            metadata: Some(serde_json::json!({ "status": record.status, "by": record.signed_up_by })),
        },
        options: NotifyOptions { send_push: true },
    });
    Ok(())
}
