use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_database::{BookingRepository, DbResult, NotificationRepository};
use shared_models::NotificationRecord;
use shared_utils::Clock;

use crate::error::NotificationError;
use crate::models::{DispatchReport, DispatcherConfig};
use crate::services::sender::{SendError, SenderRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Sent,
    Retried,
    Failed,
    /// The claim expired or the record was cancelled mid-send; another writer owns it now.
    Lost,
}

/// Periodically claims due notifications, hands them to the channel sender and records the outcome.
pub struct Dispatcher {
    notifications: Arc<dyn NotificationRepository>,
    bookings: Arc<dyn BookingRepository>,
    senders: SenderRegistry,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        bookings: Arc<dyn BookingRepository>,
        senders: SenderRegistry,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            notifications,
            bookings,
            senders,
            clock,
            config,
        }
    }

    /// Ticks every `config.interval` until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Dispatcher started (interval {:?}, batch {}, concurrency {})",
            self.config.interval, self.config.batch_size, self.config.concurrency
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.claimed > 0 => info!(
                            "Dispatch tick: {} claimed, {} sent, {} retried, {} failed",
                            report.claimed, report.sent, report.retried, report.failed
                        ),
                        Ok(_) => debug!("Dispatch tick: nothing due"),
                        Err(e) => error!("Dispatch tick failed: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Dispatcher stopping");
                        break;
                    }
                }
            }
        }
    }

    /// One pass over the queue: claim, send concurrently, write back.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<DispatchReport, NotificationError> {
        let now = self.clock.now();
        let lease = ChronoDuration::from_std(self.config.claim_ttl)
            .unwrap_or_else(|_| ChronoDuration::minutes(5));

        let batch = self
            .notifications
            .claim_due(now, self.config.batch_size, now + lease)
            .await?;

        let mut report = DispatchReport {
            claimed: batch.records.len(),
            ..DispatchReport::default()
        };
        if batch.records.is_empty() {
            return Ok(report);
        }

        let token = batch.token;
        let outcomes: Vec<Outcome> = stream::iter(batch.records)
            .map(|record| self.dispatch_one(record, token))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Sent => report.sent += 1,
                Outcome::Retried => report.retried += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Lost => {}
            }
        }

        Ok(report)
    }

    async fn dispatch_one(&self, record: NotificationRecord, token: Uuid) -> Outcome {
        let result = self.deliver(&record).await;

        match self.record_outcome(&record, token, result).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The claim expires and the record becomes due again.
                error!("Failed to record outcome for notification {}: {}", record.id, e);
                Outcome::Lost
            }
        }
    }

    async fn deliver(&self, record: &NotificationRecord) -> Result<(), SendError> {
        if record.delivery_address().is_none() {
            return Err(SendError::Permanent(format!(
                "missing {} recipient address",
                record.notification_type
            )));
        }

        let sender = self.senders.get(record.notification_type).ok_or_else(|| {
            SendError::Permanent(format!(
                "no sender registered for {} notifications",
                record.notification_type
            ))
        })?;

        match timeout(self.config.send_timeout, sender.send(record)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Transient(format!(
                "send timed out after {:?}",
                self.config.send_timeout
            ))),
        }
    }

    async fn record_outcome(
        &self,
        record: &NotificationRecord,
        token: Uuid,
        result: Result<(), SendError>,
    ) -> DbResult<Outcome> {
        let now = self.clock.now();

        let (applied, outcome) = match result {
            Ok(()) => {
                let applied = self.notifications.mark_sent(record.id, token, now).await?;
                if applied && record.is_reminder() {
                    if let Some(booking_id) = record.booking_id {
                        if let Err(e) = self.bookings.mark_reminder_sent(booking_id, now).await {
                            warn!("Could not flag booking {} as reminded: {}", booking_id, e);
                        }
                    }
                }
                debug!("Notification {} sent", record.id);
                (applied, Outcome::Sent)
            }
            Err(SendError::Permanent(msg)) => {
                warn!("Notification {} failed permanently: {}", record.id, msg);
                let applied = self
                    .notifications
                    .mark_failed(record.id, token, record.retry_count, &msg, now)
                    .await?;
                (applied, Outcome::Failed)
            }
            Err(SendError::Transient(msg)) => {
                let attempts = record.retry_count + 1;
                if attempts >= self.config.max_retries {
                    warn!(
                        "Notification {} failed after {} attempts: {}",
                        record.id, attempts, msg
                    );
                    let applied = self
                        .notifications
                        .mark_failed(record.id, token, attempts, &msg, now)
                        .await?;
                    (applied, Outcome::Failed)
                } else {
                    let delay = ChronoDuration::from_std(self.config.backoff(attempts))
                        .unwrap_or_else(|_| ChronoDuration::hours(1));
                    debug!(
                        "Notification {} will retry in {}s (attempt {}): {}",
                        record.id,
                        delay.num_seconds(),
                        attempts,
                        msg
                    );
                    let applied = self
                        .notifications
                        .schedule_retry(record.id, token, attempts, now + delay, &msg, now)
                        .await?;
                    (applied, Outcome::Retried)
                }
            }
        };

        if applied {
            return Ok(outcome);
        }

        match self.notifications.get_notification(record.id).await? {
            Some(current) if current.status.is_terminal() => debug!(
                "Notification {} became {} before its outcome was written",
                record.id, current.status
            ),
            Some(_) => debug!("Notification {} was reclaimed after its lease expired", record.id),
            None => warn!("Notification {} disappeared while being sent", record.id),
        }
        Ok(Outcome::Lost)
    }
}
