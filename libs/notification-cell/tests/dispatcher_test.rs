use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mockall::mock;
use tokio::sync::watch;

use notification_cell::{
    Dispatcher, DispatcherConfig, ReminderConfig, ReminderPlanner, SendError, Sender,
    SenderRegistry,
};
use shared_database::{BookingRepository, Database, NotificationRepository};
use shared_models::{
    Booking, BookingStatus, NewNotification, NotificationRecord, NotificationStatus,
    NotificationType, RecipientType,
};
use shared_utils::test_utils::{
    hm, monday, seed_weekday_provider, utc, NewBookingBuilder, TestConfig,
};
use shared_utils::{Clock, ManualClock};

mock! {
    pub Gateway {}

    #[async_trait]
    impl Sender for Gateway {
        async fn send(&self, record: &NotificationRecord) -> Result<(), SendError>;
    }
}

struct SlowSender;

#[async_trait]
impl Sender for SlowSender {
    async fn send(&self, _record: &NotificationRecord) -> Result<(), SendError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(())
    }
}

/// Tries to claim the queue itself while a send is in flight, recording how many records it got.
struct RivalClaimSender {
    db: Database,
    rival_at: DateTime<Utc>,
    stolen: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl Sender for RivalClaimSender {
    async fn send(&self, _record: &NotificationRecord) -> Result<(), SendError> {
        let batch = self
            .db
            .claim_due(self.rival_at, 10, self.rival_at + ChronoDuration::minutes(5))
            .await
            .map_err(|e| SendError::Transient(e.to_string()))?;
        self.stolen.lock().unwrap().push(batch.records.len());
        Ok(())
    }
}

struct Harness {
    db: Database,
    clock: ManualClock,
    booking: Booking,
}

fn config() -> DispatcherConfig {
    DispatcherConfig {
        interval: Duration::from_millis(10),
        batch_size: 10,
        concurrency: 4,
        max_retries: 3,
        backoff_base: Duration::from_secs(60),
        backoff_max: Duration::from_secs(3600),
        send_timeout: Duration::from_millis(100),
        claim_ttl: Duration::from_secs(300),
    }
}

/// A confirmed Monday 10:00 booking with both default reminders planned.
async fn harness() -> Harness {
    let db = Database::open_in_memory().unwrap();
    let provider = seed_weekday_provider(&db).await.unwrap();
    let clock = ManualClock::new(utc(2024, 6, 1, 8, 0));
    let booking = db
        .insert_if_free(
            &NewBookingBuilder::new(provider.id).at(monday(), hm(10, 0)).build(),
            clock.now(),
        )
        .await
        .unwrap();

    let planner = ReminderPlanner::new(
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        Arc::new(db.clone()),
        Arc::new(clock.clone()),
        ReminderConfig {
            default_lead_minutes: vec![1440, 120],
        },
    );
    planner.plan(booking.id).await.unwrap();

    Harness { db, clock, booking }
}

impl Harness {
    fn dispatcher(&self, senders: SenderRegistry, config: DispatcherConfig) -> Dispatcher {
        Dispatcher::new(
            Arc::new(self.db.clone()),
            Arc::new(self.db.clone()),
            senders,
            Arc::new(self.clock.clone()),
            config,
        )
    }

    async fn day_before_reminder(&self) -> NotificationRecord {
        self.db
            .pending_reminders(self.booking.id)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.reminder_lead_minutes == Some(1440))
            .unwrap()
    }

    async fn reload(&self, record: &NotificationRecord) -> NotificationRecord {
        self.db.get_notification(record.id).await.unwrap().unwrap()
    }
}

fn email_registry(gateway: MockGateway) -> SenderRegistry {
    SenderRegistry::new().with(NotificationType::Email, Arc::new(gateway))
}

fn reminder_due_at() -> DateTime<Utc> {
    utc(2024, 6, 9, 10, 0)
}

#[tokio::test]
async fn due_reminder_is_sent_and_booking_flagged() {
    let h = harness().await;
    let reminder = h.day_before_reminder().await;

    let mut gateway = MockGateway::new();
    gateway
        .expect_send()
        .withf(|record: &NotificationRecord| record.reminder_lead_minutes == Some(1440))
        .times(1)
        .returning(|_| Ok(()));

    h.clock.set(reminder_due_at());
    let report = h.dispatcher(email_registry(gateway), config()).run_once().await.unwrap();

    assert_eq!(report.claimed, 1);
    assert_eq!(report.sent, 1);

    let stored = h.reload(&reminder).await;
    assert_eq!(stored.status, NotificationStatus::Sent);
    assert_eq!(stored.sent_at, Some(reminder_due_at()));
    assert!(h.db.get_booking(h.booking.id).await.unwrap().unwrap().reminder_sent);
}

#[tokio::test]
async fn nothing_is_claimed_before_it_is_due() {
    let h = harness().await;
    let mut gateway = MockGateway::new();
    gateway.expect_send().times(0);

    h.clock.set(reminder_due_at() - ChronoDuration::seconds(1));
    let report = h.dispatcher(email_registry(gateway), config()).run_once().await.unwrap();
    assert_eq!(report.claimed, 0);
}

#[tokio::test]
async fn transient_failure_backs_off() {
    let h = harness().await;
    let reminder = h.day_before_reminder().await;

    let mut gateway = MockGateway::new();
    gateway
        .expect_send()
        .times(1)
        .returning(|_| Err(SendError::Transient("gateway unavailable".to_string())));

    h.clock.set(reminder_due_at());
    let report = h.dispatcher(email_registry(gateway), config()).run_once().await.unwrap();
    assert_eq!(report.retried, 1);

    let stored = h.reload(&reminder).await;
    assert_eq!(stored.status, NotificationStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(stored.scheduled_at, reminder_due_at() + ChronoDuration::seconds(120));
    assert_eq!(stored.error_message.as_deref(), Some("gateway unavailable"));
}

#[tokio::test]
async fn last_transient_failure_marks_failed() {
    let h = harness().await;
    let reminder = h.day_before_reminder().await;

    let mut gateway = MockGateway::new();
    gateway
        .expect_send()
        .times(3)
        .returning(|_| Err(SendError::Transient("gateway unavailable".to_string())));
    let dispatcher = h.dispatcher(email_registry(gateway), config());

    h.clock.set(reminder_due_at());
    assert_eq!(dispatcher.run_once().await.unwrap().retried, 1);

    h.clock.advance(ChronoDuration::seconds(120));
    assert_eq!(dispatcher.run_once().await.unwrap().retried, 1);
    assert_eq!(h.reload(&reminder).await.retry_count, 2);

    // retry_count is now max_retries - 1, so one more transient failure is final.
    h.clock.advance(ChronoDuration::seconds(240));
    let report = dispatcher.run_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = h.reload(&reminder).await;
    assert_eq!(stored.status, NotificationStatus::Failed);
    assert_eq!(stored.retry_count, 3);
}

#[tokio::test]
async fn permanent_failure_is_immediately_failed() {
    let h = harness().await;
    let reminder = h.day_before_reminder().await;

    let mut gateway = MockGateway::new();
    gateway
        .expect_send()
        .times(1)
        .returning(|_| Err(SendError::Permanent("mailbox does not exist".to_string())));

    h.clock.set(reminder_due_at());
    let report = h.dispatcher(email_registry(gateway), config()).run_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = h.reload(&reminder).await;
    assert_eq!(stored.status, NotificationStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.error_message.as_deref(), Some("mailbox does not exist"));
}

#[tokio::test]
async fn missing_sender_is_permanent() {
    let h = harness().await;
    let reminder = h.day_before_reminder().await;

    h.clock.set(reminder_due_at());
    let report = h.dispatcher(SenderRegistry::new(), config()).run_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let stored = h.reload(&reminder).await;
    assert_eq!(stored.status, NotificationStatus::Failed);
    assert!(stored.error_message.unwrap().contains("no sender"));
}

#[tokio::test]
async fn missing_address_never_reaches_the_sender() {
    let h = harness().await;
    let now = h.clock.now();
    let record = h
        .db
        .insert(
            &NewNotification {
                notification_type: NotificationType::Sms,
                recipient_type: RecipientType::Patient,
                recipient_id: None,
                recipient_email: None,
                recipient_phone: None,
                subject: "Lab results ready".to_string(),
                message: "Please call the clinic".to_string(),
                booking_id: None,
                reminder_lead_minutes: None,
                scheduled_at: now,
            },
            now,
        )
        .await
        .unwrap();

    let mut gateway = MockGateway::new();
    gateway.expect_send().times(0);
    let senders = SenderRegistry::new().with(NotificationType::Sms, Arc::new(gateway));

    let report = h.dispatcher(senders, config()).run_once().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.reload(&record).await.status, NotificationStatus::Failed);
}

#[tokio::test]
async fn send_timeout_counts_as_transient() {
    let h = harness().await;
    let reminder = h.day_before_reminder().await;
    let senders = SenderRegistry::new().with(NotificationType::Email, Arc::new(SlowSender));

    h.clock.set(reminder_due_at());
    let report = h.dispatcher(senders, config()).run_once().await.unwrap();
    assert_eq!(report.retried, 1);

    let stored = h.reload(&reminder).await;
    assert_eq!(stored.retry_count, 1);
    assert!(stored.error_message.unwrap().contains("timed out"));
}

#[tokio::test]
async fn short_claim_ttl_still_covers_a_slow_send() {
    let h = harness().await;
    let config = DispatcherConfig::from(
        &TestConfig {
            send_timeout_seconds: 120,
            claim_ttl_seconds: 60,
            ..TestConfig::default()
        }
        .to_app_config(),
    );
    assert!(config.claim_ttl > config.send_timeout);

    // Past the configured 60s lease but still inside the send timeout.
    let stolen = Arc::new(Mutex::new(Vec::new()));
    let rival = RivalClaimSender {
        db: h.db.clone(),
        rival_at: reminder_due_at() + ChronoDuration::seconds(90),
        stolen: stolen.clone(),
    };
    let senders = SenderRegistry::new().with(NotificationType::Email, Arc::new(rival));

    h.clock.set(reminder_due_at());
    let report = h.dispatcher(senders, config).run_once().await.unwrap();

    assert_eq!(report.sent, 1);
    assert_eq!(*stolen.lock().unwrap(), vec![0]);
}

#[tokio::test]
async fn cancelled_booking_reminders_are_never_sent() {
    let h = harness().await;
    h.db.update_status(h.booking.id, BookingStatus::Confirmed, BookingStatus::Cancelled, h.clock.now())
        .await
        .unwrap();

    let mut gateway = MockGateway::new();
    gateway.expect_send().times(0);

    h.clock.set(utc(2024, 6, 10, 9, 0));
    let report = h.dispatcher(email_registry(gateway), config()).run_once().await.unwrap();
    assert_eq!(report.claimed, 0);
}

#[tokio::test]
async fn every_due_record_in_a_batch_is_processed() {
    let h = harness().await;

    let mut gateway = MockGateway::new();
    gateway.expect_send().times(2).returning(|_| Ok(()));

    h.clock.set(utc(2024, 6, 10, 9, 0));
    let report = h.dispatcher(email_registry(gateway), config()).run_once().await.unwrap();

    assert_eq!(report.claimed, 2);
    assert_eq!(report.sent, 2);
    assert!(h.db.pending_reminders(h.booking.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn run_stops_on_shutdown_signal() {
    let h = harness().await;
    let mut gateway = MockGateway::new();
    gateway.expect_send().returning(|_| Ok(()));

    h.clock.set(utc(2024, 6, 10, 9, 0));
    let dispatcher = Arc::new(h.dispatcher(email_registry(gateway), config()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { dispatcher.run(shutdown_rx).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(2), worker)
        .await
        .expect("dispatcher did not stop")
        .unwrap();

    assert!(h.db.pending_reminders(h.booking.id).await.unwrap().is_empty());
}
