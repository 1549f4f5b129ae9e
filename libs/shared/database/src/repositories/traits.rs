use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use shared_models::{
    AvailabilityOverride, Booking, BookingStatus, NewAvailabilityOverride, NewBooking,
    NewNotification, NewScheduleRule, NotificationFilter, NotificationRecord, Provider,
    QueueStats, ScheduleRule,
};

use crate::error::DbResult;

/// Read access to provider schedules plus the clinic-configuration writes that feed them.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get_provider(&self, provider_id: Uuid) -> DbResult<Option<Provider>>;

    async fn insert_provider(&self, provider: &Provider) -> DbResult<()>;

    /// All rules (active or not) for the provider on an ISO day of week.
    async fn rules_for_day(&self, provider_id: Uuid, day_of_week: u8) -> DbResult<Vec<ScheduleRule>>;

    async fn overrides_for_date(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
    ) -> DbResult<Vec<AvailabilityOverride>>;

    /// Inserts the rule in one transaction with its overlap check. An active rule that overlaps
    /// another active rule on the same day fails with `Conflict`.
    async fn insert_rule(&self, provider_id: Uuid, rule: &NewScheduleRule) -> DbResult<ScheduleRule>;

    async fn insert_override(
        &self,
        provider_id: Uuid,
        entry: &NewAvailabilityOverride,
    ) -> DbResult<AvailabilityOverride>;
}

#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn get_booking(&self, booking_id: Uuid) -> DbResult<Option<Booking>>;

    /// Bookings that occupy their slot (everything but cancelled) for the provider on `date`,
    /// optionally skipping one booking.
    async fn slot_holders_on_date(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> DbResult<Vec<Booking>>;

    /// Re-checks overlap and inserts in one transaction. Fails with `Conflict` when the slot is taken.
    async fn insert_if_free(&self, booking: &NewBooking, now: DateTime<Utc>) -> DbResult<Booking>;

    /// Re-checks overlap (ignoring the booking itself) and moves it in one transaction. The same
    /// transaction cancels the booking's pending reminders, which were timed for the old slot.
    async fn move_if_free(
        &self,
        booking_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        now: DateTime<Utc>,
    ) -> DbResult<Booking>;

    /// Compare-and-set on the status column; `Conflict` when the stored status is no longer `expected`.
    async fn update_status(
        &self,
        booking_id: Uuid,
        expected: BookingStatus,
        status: BookingStatus,
        now: DateTime<Utc>,
    ) -> DbResult<Booking>;

    async fn mark_reminder_sent(&self, booking_id: Uuid, now: DateTime<Utc>) -> DbResult<()>;
}

/// Records claimed by one dispatcher pass. Outcome writes must present the same token.
#[derive(Debug, Clone)]
pub struct ClaimedBatch {
    pub token: Uuid,
    pub records: Vec<NotificationRecord>,
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn insert(&self, notification: &NewNotification, now: DateTime<Utc>) -> DbResult<NotificationRecord>;

    /// Inserts a reminder unless a pending one already exists for its (booking, lead-time) pair.
    async fn insert_reminder_if_absent(
        &self,
        notification: &NewNotification,
        now: DateTime<Utc>,
    ) -> DbResult<Option<NotificationRecord>>;

    async fn get_notification(&self, notification_id: Uuid) -> DbResult<Option<NotificationRecord>>;

    async fn pending_reminders(&self, booking_id: Uuid) -> DbResult<Vec<NotificationRecord>>;

    /// Moves every pending reminder of the booking to `cancelled`; returns how many moved.
    async fn cancel_pending_reminders(&self, booking_id: Uuid, now: DateTime<Utc>) -> DbResult<u64>;

    /// Exclusively claims up to `limit` due records, oldest `scheduled_at` first.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        claimed_until: DateTime<Utc>,
    ) -> DbResult<ClaimedBatch>;

    async fn mark_sent(&self, notification_id: Uuid, token: Uuid, now: DateTime<Utc>) -> DbResult<bool>;

    async fn schedule_retry(
        &self,
        notification_id: Uuid,
        token: Uuid,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool>;

    async fn mark_failed(
        &self,
        notification_id: Uuid,
        token: Uuid,
        retry_count: u32,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool>;

    async fn list(&self, filter: &NotificationFilter) -> DbResult<Vec<NotificationRecord>>;

    /// Number of records matching the filter's predicates; `limit` and `offset` are ignored.
    async fn count(&self, filter: &NotificationFilter) -> DbResult<u64>;

    async fn stats(&self, now: DateTime<Utc>) -> DbResult<QueueStats>;
}
