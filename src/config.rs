use clap::Parser;

use crate::{notify::FanoutLimits, AppOptions};

/// Real-time chat, notification and RSVP service
#[derive(Parser, Debug, Clone)]
#[command(name = "rollcall", version)]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "ROLLCALL_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// SQLite database url
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://rollcall.db")]
    pub database_url: String,

    /// Store connection pool size
    #[arg(long, env = "ROLLCALL_MAX_CONNECTIONS", default_value_t = 16)]
    pub max_connections: u32,

    /// Minutes of inactivity before a session expires
    #[arg(long, env = "ROLLCALL_SESSION_IDLE_MINUTES", default_value_t = 5)]
    pub session_idle_minutes: i64,

    /// Recipients processed at once by a single fanout
    #[arg(long, env = "ROLLCALL_FANOUT_CONCURRENCY", default_value_t = 16)]
    pub fanout_concurrency: usize,

    /// Outbound push calls in flight across the whole process
    #[arg(long, env = "ROLLCALL_PUSH_CONCURRENCY", default_value_t = 32)]
    pub push_concurrency: usize,

    /// Deliver push notifications by POSTing them to this url; log them otherwise
    #[arg(long, env = "ROLLCALL_PUSH_WEBHOOK_URL")]
    pub push_webhook_url: Option<String>,

    /// Structured JSON logs
    #[arg(long, env = "ROLLCALL_JSON_LOGS")]
    pub json_logs: bool,

    /// Expose POST /session for local development
    #[arg(long, env = "ROLLCALL_DEV_LOGIN")]
    pub dev_login: bool,
}

impl Config {
    pub fn fanout_limits(&self) -> FanoutLimits {
        FanoutLimits {
            recipients: self.fanout_concurrency.max(1),
            pushes: self.push_concurrency.max(1),
        }
    }

    pub fn app_options(&self) -> AppOptions {
        AppOptions {
            session_idle: time::Duration::minutes(self.session_idle_minutes),
            dev_login: self.dev_login,
        }
    }
}
