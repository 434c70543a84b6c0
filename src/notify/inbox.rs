use axum::{debug_handler, extract::{Path, Query, State}, http::StatusCode, Json};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    appresult::{AppResult, Rejected},
    db::Notification,
    session::CurrentUser,
    AppState,
};

#[derive(Deserialize)]
pub(crate) struct ListQuery {
    #[serde(default)]
    archived: bool,
}

#[debug_handler(state = AppState)]
pub(crate) async fn list(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user_id): CurrentUser,
    Query(ListQuery { archived }): Query<ListQuery>,
) -> AppResult<Json<Vec<Notification>>> {
    let notifications = sqlx::query_as(
        "SELECT id,recipient_id,title,body,kind,related_id,related_type,metadata,read,archived,created_at
         FROM notifications WHERE recipient_id=? AND archived=?
         ORDER BY created_at DESC, id DESC",
    )
    .bind(user_id)
    .bind(archived)
    .fetch_all(&db_pool)
    .await?;

    Ok(Json(notifications))
}

#[debug_handler(state = AppState)]
pub(crate) async fn read(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    update_own(&db_pool, "UPDATE notifications SET read=1 WHERE id=? AND recipient_id=?", id, user_id).await
}

#[debug_handler(state = AppState)]
pub(crate) async fn archive(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user_id): CurrentUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    update_own(&db_pool, "UPDATE notifications SET archived=1 WHERE id=? AND recipient_id=?", id, user_id).await
}

#[debug_handler(state = AppState)]
pub(crate) async fn read_all(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user_id): CurrentUser,
) -> AppResult<StatusCode> {
    sqlx::query("UPDATE notifications SET read=1 WHERE recipient_id=? AND read=0")
        .bind(user_id)
        .execute(&db_pool)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// someone else's notification looks exactly like a missing one
async fn update_own(db_pool: &SqlitePool, sql: &'static str, id: Uuid, user_id: Uuid) -> AppResult<StatusCode> {
    let updated = sqlx::query(sql)
        .bind(id)
        .bind(user_id)
        .execute(db_pool)
        .await?
        .rows_affected();

    if updated == 0 {
        return Err(Rejected::NotFound("notification").into());
    }
    Ok(StatusCode::NO_CONTENT)
}
