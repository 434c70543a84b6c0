use std::sync::Arc;

use clap::Parser;
use rollcall::{
    app,
    config::Config,
    db,
    notify::push::{LogPushSender, PushSender, WebhookPushSender},
    AppState,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rollcall=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let db_pool = db::connect(&config.database_url, config.max_connections).await?;

    let push: Arc<dyn PushSender> = match &config.push_webhook_url {
        Some(url) => Arc::new(WebhookPushSender::new(url)?),
        None => Arc::new(LogPushSender),
    };

    let state = AppState::new(db_pool, push, config.fanout_limits());
    let app = app(state, config.app_options());

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
