use axum::{
    debug_handler,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    appresult::{AppError, AppResult, Rejected},
    db::{self, UserId},
    AppState,
};

pub const USER_ID: &str = "user_id";

/// The signed-in user. Extraction fails with `Unauthenticated`.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub UserId);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|_| Rejected::Unauthenticated)?;

        match session.get::<UserId>(USER_ID).await? {
            Some(user_id) => Ok(CurrentUser(user_id)),
            None => Err(Rejected::Unauthenticated.into()),
        }
    }
}

pub async fn require_admin(db_pool: &SqlitePool, user_id: UserId) -> AppResult<()> {
    match db::find_user(db_pool, user_id).await? {
        Some(user) if user.is_admin && user.active => Ok(()),
        Some(_) => Err(Rejected::Forbidden.into()),
        None => Err(Rejected::Unauthenticated.into()),
    }
}

/// Session issuance belongs to the identity provider; this only exists for
/// local development and tests.
pub fn dev_router() -> Router<AppState> {
    Router::new().route("/session", post(sign_in).delete(sign_out))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignInRequest {
    user_id: UserId,
}

#[debug_handler(state = AppState)]
pub(crate) async fn sign_in(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(SignInRequest { user_id }): Json<SignInRequest>,
) -> AppResult<StatusCode> {
    let Some(user) = db::find_user(&db_pool, user_id).await? else {
        return Err(Rejected::NotFound("user").into());
    };
    if !user.active {
        return Err(Rejected::Forbidden.into());
    }

    session.cycle_id().await?;
    session.insert(USER_ID, user.id).await?;
    tracing::info!(user_id = %user.id, "dev session opened");

    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler]
pub(crate) async fn sign_out(session: Session) -> AppResult<StatusCode> {
    session.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}
