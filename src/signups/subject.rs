use axum::{debug_handler, extract::State, Json};
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    appresult::{AppResult, Rejected},
    db::{now_millis, Subject},
    session::{require_admin, CurrentUser},
    AppState,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewSubject {
    title: String,
    max_confirmed: Option<i64>,
}

#[debug_handler(state = AppState)]
pub(crate) async fn create(
    State(db_pool): State<SqlitePool>,
    CurrentUser(user_id): CurrentUser,
    Json(NewSubject { title, max_confirmed }): Json<NewSubject>,
) -> AppResult<Json<Subject>> {
    require_admin(&db_pool, user_id).await?;
    if max_confirmed.is_some_and(|max| max < 0) {
        return Err(Rejected::Invalid("maxConfirmed must not be negative".into()).into());
    }

    let subject = sqlx::query_as(
        "INSERT INTO subjects (id,title,max_confirmed,created_by,created_at) VALUES (?,?,?,?,?)
         RETURNING id,title,max_confirmed,created_by,created_at",
    )
    .bind(Uuid::now_v7())
    .bind(&title)
    .bind(max_confirmed)
    .bind(user_id)
    .bind(now_millis())
    .fetch_one(&db_pool)
    .await?;

    Ok(Json(subject))
}
