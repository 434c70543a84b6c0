//! Notification fanout: one durable record per recipient, then best-effort
//! push to each of their devices. Recipients fail independently.

mod announce;
mod devices;
mod inbox;
pub mod push;

use std::{collections::HashSet, ops::AddAssign, sync::Arc};

use axum::{
    routing::{delete, get, post},
    Router,
};
use serde::Deserialize;
use serde_json::Value;
use sqlx::{types::Json, SqlitePool};
use tokio::{
    sync::{watch, Semaphore},
    task::JoinSet,
};
use uuid::Uuid;

use crate::{
    appresult::AppResult,
    broadcast::Broadcaster,
    db::{now_millis, Notification, UserId},
    events::ServerEvent,
    AppState,
};
use push::{DeliveryFailure, PushPayload, PushSender};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", get(inbox::list))
        .route("/notifications/read-all", post(inbox::read_all))
        .route("/notifications/{id}/read", post(inbox::read))
        .route("/notifications/{id}/archive", post(inbox::archive))
        .route("/push-destinations", post(devices::add))
        .route("/push-destinations/{token}", delete(devices::remove))
        .route("/announcements", post(announce::announce))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    pub title: String,
    pub body: String,
    pub kind: String,
    pub related_id: Option<Uuid>,
    pub related_type: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyOptions {
    pub send_push: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FanoutLimits {
    /// Recipients worked on at once within one fanout.
    pub recipients: usize,
    /// Push calls in flight across all fanouts.
    pub pushes: usize,
}

impl Default for FanoutLimits {
    fn default() -> Self {
        FanoutLimits { recipients: 16, pushes: 32 }
    }
}

/// Tally of one fanout. `failed` counts recipients left without a durable
/// notification; push failures never count there.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub recipients: usize,
    pub persisted: usize,
    pub failed: usize,
    pub pushes_sent: usize,
    pub push_failures: usize,
}

impl AddAssign for FanoutReport {
    fn add_assign(&mut self, other: Self) {
        self.recipients += other.recipients;
        self.persisted += other.persisted;
        self.failed += other.failed;
        self.pushes_sent += other.pushes_sent;
        self.push_failures += other.push_failures;
    }
}

#[derive(Clone)]
pub struct Fanout {
    db_pool: SqlitePool,
    broadcaster: Broadcaster,
    push: Arc<dyn PushSender>,
    recipient_limit: usize,
    push_permits: Arc<Semaphore>,
}

impl Fanout {
    pub fn new(db_pool: SqlitePool, broadcaster: Broadcaster, push: Arc<dyn PushSender>, limits: FanoutLimits) -> Self {
        Fanout {
            db_pool,
            broadcaster,
            push,
            recipient_limit: limits.recipients.max(1),
            push_permits: Arc::new(Semaphore::new(limits.pushes.max(1))),
        }
    }

    /// Returns once every recipient has either been handled or failed on its
    /// own. Nothing is rolled back.
    pub async fn notify(
        &self,
        recipients: impl IntoIterator<Item = UserId>,
        notification: &NewNotification,
        options: NotifyOptions,
    ) -> FanoutReport {
        let recipients: HashSet<UserId> = recipients.into_iter().collect();
        let notification = Arc::new(notification.clone());
        let slots = Arc::new(Semaphore::new(self.recipient_limit));
        let mut tasks = JoinSet::new();

        for user_id in recipients {
            let Ok(slot) = slots.clone().acquire_owned().await else {
                break;
            };
            let fanout = self.clone();
            let notification = notification.clone();
            tasks.spawn(async move {
                let _slot = slot;
                fanout.deliver(user_id, &notification, options).await
            });
        }

        let mut report = FanoutReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => report += outcome,
                Err(err) => {
                    tracing::error!(error = %err, "recipient delivery aborted");
                    report += FanoutReport { recipients: 1, failed: 1, ..Default::default() };
                }
            }
        }

        tracing::info!(
            kind = %notification.kind,
            recipients = report.recipients,
            persisted = report.persisted,
            failed = report.failed,
            pushes_sent = report.pushes_sent,
            push_failures = report.push_failures,
            "fanout settled"
        );
        report
    }

    /// Fans out to whoever is active right now.
    pub async fn notify_all(&self, notification: &NewNotification, options: NotifyOptions) -> AppResult<FanoutReport> {
        let users: Vec<(UserId,)> = sqlx::query_as("SELECT id FROM users WHERE active=1")
            .fetch_all(&self.db_pool)
            .await?;
        Ok(self.notify(users.into_iter().map(|(id,)| id), notification, options).await)
    }

    async fn deliver(&self, user_id: UserId, new: &NewNotification, options: NotifyOptions) -> FanoutReport {
        let mut report = FanoutReport { recipients: 1, ..Default::default() };

        let notification = match insert_notification(&self.db_pool, user_id, new).await {
            Ok(notification) => notification,
            Err(err) => {
                tracing::warn!(%user_id, error = %err, "notification write failed");
                report.failed = 1;
                return report;
            }
        };
        report.persisted = 1;

        self.broadcaster
            .broadcast_to_user(user_id, &ServerEvent::Notification(notification.clone()));

        if options.send_push {
            let (sent, failed) = self.push_to(user_id, &notification).await;
            report.pushes_sent = sent;
            report.push_failures = failed;
        }
        report
    }

    async fn push_to(&self, user_id: UserId, notification: &Notification) -> (usize, usize) {
        let destinations = match devices::destinations_for(&self.db_pool, user_id).await {
            Ok(destinations) => destinations,
            Err(err) => {
                tracing::warn!(%user_id, error = %err, "push destination lookup failed");
                return (0, 1);
            }
        };

        let payload = PushPayload::from(notification);
        let (mut sent, mut failed) = (0, 0);
        for destination in destinations {
            let result = match self.push_permits.acquire().await {
                Ok(_permit) => self.push.send(&destination, &payload).await,
                Err(_) => break,
            };

            match result {
                Ok(()) => sent += 1,
                Err(DeliveryFailure::Gone) => {
                    failed += 1;
                    tracing::info!(%user_id, platform = %destination.platform, "dropping stale push destination");
                    if let Err(err) = devices::forget(&self.db_pool, &destination).await {
                        tracing::warn!(%user_id, error = %err, "could not drop push destination");
                    }
                }
                Err(err) => {
                    failed += 1;
                    tracing::warn!(%user_id, platform = %destination.platform, error = %err, "push delivery failed");
                }
            }
        }
        (sent, failed)
    }
}

async fn insert_notification(db_pool: &SqlitePool, user_id: UserId, new: &NewNotification) -> sqlx::Result<Notification> {
    sqlx::query_as(
        "INSERT INTO notifications (id,recipient_id,title,body,kind,related_id,related_type,metadata,read,archived,created_at)
         VALUES (?,?,?,?,?,?,?,?,0,0,?)
         RETURNING id,recipient_id,title,body,kind,related_id,related_type,metadata,read,archived,created_at",
    )
    .bind(Uuid::now_v7())
    .bind(user_id)
    .bind(&new.title)
    .bind(&new.body)
    .bind(&new.kind)
    .bind(new.related_id)
    .bind(&new.related_type)
    .bind(new.metadata.clone().map(Json))
    .bind(now_millis())
    .fetch_one(db_pool)
    .await
}

pub enum NotifyJob {
    Users {
        recipients: Vec<UserId>,
        notification: NewNotification,
        options: NotifyOptions,
    },
    Everyone {
        notification: NewNotification,
        options: NotifyOptions,
    },
}

/// Runs fanouts in the background so the triggering request returns at once.
/// Outstanding jobs are counted; `drain` waits for them.
#[derive(Clone)]
pub struct NotifyQueue {
    fanout: Fanout,
    pending: Arc<watch::Sender<usize>>,
}

struct PendingJob(Arc<watch::Sender<usize>>);

impl PendingJob {
    fn start(pending: Arc<watch::Sender<usize>>) -> Self {
        pending.send_modify(|count| *count += 1);
        PendingJob(pending)
    }
}

impl Drop for PendingJob {
    fn drop(&mut self) {
        self.0.send_modify(|count| *count -= 1);
    }
}

impl NotifyQueue {
    pub fn new(fanout: Fanout) -> Self {
        let (pending, _) = watch::channel(0);
        NotifyQueue { fanout, pending: Arc::new(pending) }
    }

    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    pub fn enqueue(&self, job: NotifyJob) {
        let pending = PendingJob::start(self.pending.clone());
        let fanout = self.fanout.clone();

        tokio::spawn(async move {
            let _pending = pending;
            match job {
                NotifyJob::Users { recipients, notification, options } => {
                    fanout.notify(recipients, &notification, options).await;
                }
                NotifyJob::Everyone { notification, options } => {
                    if let Err(err) = fanout.notify_all(&notification, options).await {
                        tracing::error!(error = %err.0, kind = %notification.kind, "broadcast fanout failed");
                    }
                }
            }
        });
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Waits until every queued job has settled.
    pub async fn drain(&self) {
        let mut pending = self.pending.subscribe();
        let _ = pending.wait_for(|count| *count == 0).await;
    }
}
