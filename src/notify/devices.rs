use axum::{debug_handler, extract::{Path, State}, http::StatusCode, Json};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    appresult::{AppResult, Rejected},
    db::{now_millis, PushDestination, UserId},
    session::CurrentUser,
    AppState,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AddDestination {
    token: String,
    platform: String,
}

/// Registering a token someone else held moves it to the caller.
#[debug_handler(state = AppState)]
pub(crate) async fn add(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user_id): CurrentUser,
    Json(AddDestination { token, platform }): Json<AddDestination>,
) -> AppResult<Json<PushDestination>> {
    if token.trim().is_empty() {
        return Err(Rejected::Invalid("token must not be empty".into()).into());
    }

    let destination = sqlx::query_as(
        "INSERT INTO push_destinations (token,user_id,platform,created_at) VALUES (?,?,?,?)
         ON CONFLICT (token) DO UPDATE SET user_id=excluded.user_id, platform=excluded.platform
         RETURNING token,user_id,platform,created_at",
    )
    .bind(&token)
    .bind(user_id)
    .bind(&platform)
    .bind(now_millis())
    .fetch_one(&db_pool)
    .await?;

    Ok(Json(destination))
}

#[debug_handler(state = AppState)]
pub(crate) async fn remove(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user_id): CurrentUser,
    Path(token): Path<String>,
) -> AppResult<StatusCode> {
    sqlx::query("DELETE FROM push_destinations WHERE token=? AND user_id=?")
        .bind(&token)
        .bind(user_id)
        .execute(&db_pool)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(crate) async fn destinations_for(db_pool: &SqlitePool, user_id: UserId) -> sqlx::Result<Vec<PushDestination>> {
    sqlx::query_as("SELECT token,user_id,platform,created_at FROM push_destinations WHERE user_id=?")
        .bind(user_id)
        .fetch_all(db_pool)
        .await
}

/// Drops a stale token, unless it has meanwhile been registered to someone else.
pub(crate) async fn forget(db_pool: &SqlitePool, destination: &PushDestination) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM push_destinations WHERE token=? AND user_id=?")
        .bind(&destination.token)
        .bind(destination.user_id)
        .execute(db_pool)
        .await?;
    Ok(())
}
