use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

/// Operations refused for a reason the caller can act on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejected {
    #[error("sign in first")]
    Unauthenticated,
    #[error("you are not a participant of this room")]
    NotAParticipant,
    #[error("only administrators may do that")]
    Forbidden,
    #[error("this room was already deleted for you")]
    AlreadyDeleted,
    #[error("no confirmed places left")]
    CapacityExceeded,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid request: {0}")]
    Invalid(String),
}

impl Rejected {
    pub fn code(&self) -> &'static str {
        use Rejected::*;
        match self {
            Unauthenticated => "unauthenticated",
            NotAParticipant => "not_a_participant",
            Forbidden => "forbidden",
            AlreadyDeleted => "already_deleted",
            CapacityExceeded => "capacity_exceeded",
            NotFound(_) => "not_found",
            Invalid(_) => "invalid",
        }
    }

    pub fn status(&self) -> StatusCode {
        use Rejected::*;
        match self {
            Unauthenticated => StatusCode::UNAUTHORIZED,
            NotAParticipant | Forbidden => StatusCode::FORBIDDEN,
            AlreadyDeleted | CapacityExceeded | Invalid(_) => StatusCode::BAD_REQUEST,
            NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl AppError {
    /// The domain rejection behind this error, if it is one.
    pub fn rejection(&self) -> Option<&Rejected> {
        self.0.downcast_ref::<Rejected>()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(rejected) = self.rejection() {
            return (
                rejected.status(),
                Json(json!({ "error": rejected.code(), "message": rejected.to_string() })),
            )
                .into_response();
        }

        tracing::error!(error = %self.0, backtrace = %self.0.backtrace(), "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "internal", "message": "something went wrong" })),
        )
            .into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
