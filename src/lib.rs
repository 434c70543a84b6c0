pub mod appresult;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod events;
pub mod notify;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod signups;
pub mod visibility;

use std::sync::Arc;

use axum::{extract::FromRef, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

pub use appresult::{AppError, AppResult, Rejected};

use broadcast::Broadcaster;
use notify::{push::PushSender, Fanout, FanoutLimits, NotifyQueue};
use registry::ConnectionRegistry;
use signups::CapacityGate;
use visibility::VisibilityGate;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub broadcaster: Broadcaster,
    pub gate: VisibilityGate,
    pub signups: CapacityGate,
    pub notify: NotifyQueue,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, push: Arc<dyn PushSender>, limits: FanoutLimits) -> Self {
        let broadcaster = Broadcaster::new(Arc::new(ConnectionRegistry::new()));
        let fanout = Fanout::new(db_pool.clone(), broadcaster.clone(), push, limits);

        AppState {
            gate: VisibilityGate::new(db_pool.clone()),
            signups: CapacityGate::new(db_pool.clone()),
            notify: NotifyQueue::new(fanout),
            broadcaster,
            db_pool,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AppOptions {
    pub session_idle: time::Duration,
    pub dev_login: bool,
}

pub fn app(state: AppState, options: AppOptions) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(options.session_idle));

    let mut router = Router::new()
        .nest("/rooms", rooms::router())
        .nest("/subjects", signups::router())
        .merge(notify::router())
        .route("/ws", axum::routing::get(rooms::ws::chat_ws));

    if options.dev_login {
        router = router.merge(session::dev_router());
    }

    router
        .with_state(state)
        .layer(session_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
