use axum::{debug_handler, extract::State, http::StatusCode, Json};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    appresult::{AppResult, Rejected},
    session::{require_admin, CurrentUser},
    AppState,
};

use super::{NewNotification, NotifyJob, NotifyOptions, NotifyQueue};

#[derive(Deserialize)]
pub(crate) struct Announcement {
    title: String,
    body: String,
}

/// Queues a notification for every active user and returns immediately.
#[debug_handler(state = AppState)]
pub(crate) async fn announce(
    State(db_pool): State<SqlitePool>,
    State(notify): State<NotifyQueue>,
    CurrentUser(user_id): CurrentUser,
    Json(Announcement { title, body }): Json<Announcement>,
) -> AppResult<StatusCode> {
    require_admin(&db_pool, user_id).await?;
    if title.trim().is_empty() {
        return Err(Rejected::Invalid("title must not be empty".into()).into());
    }

    tracing::info!(%user_id, %title, "announcement queued");
    notify.enqueue(NotifyJob::Everyone {
        notification: NewNotification {
            title,
            body,
            kind: "announcement".into(),
            related_id: None,
            related_type: None,
            metadata: Some(serde_json::json!({ "author": user_id })),
        },
        options: NotifyOptions { send_push: true },
    });

    Ok(StatusCode::ACCEPTED)
}
