use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use shared_config::AppConfig;

/// Headroom a claim keeps past the send timeout, covering the outcome write.
pub const CLAIM_TTL_MARGIN: Duration = Duration::from_secs(30);

/// Tuning for the delivery loop, derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub interval: Duration,
    pub batch_size: u32,
    pub concurrency: usize,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub send_timeout: Duration,
    pub claim_ttl: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for DispatcherConfig {
    fn from(config: &AppConfig) -> Self {
        let send_timeout = config.send_timeout();
        let configured_ttl = Duration::from_secs(config.dispatch_claim_ttl_seconds);
        // A claim that lapses mid-send lets the next tick claim and send the record again.
        let min_ttl = send_timeout + CLAIM_TTL_MARGIN;
        let claim_ttl = if configured_ttl < min_ttl {
            warn!(
                "Claim TTL {:?} does not outlast the {:?} send timeout; using {:?}",
                configured_ttl, send_timeout, min_ttl
            );
            min_ttl
        } else {
            configured_ttl
        };

        Self {
            interval: config.dispatch_interval(),
            batch_size: config.dispatch_batch_size.max(1),
            concurrency: config.dispatch_concurrency.max(1),
            max_retries: config.dispatch_max_retries.max(1),
            backoff_base: Duration::from_secs(config.dispatch_backoff_base_seconds),
            backoff_max: Duration::from_secs(config.dispatch_backoff_max_seconds),
            send_timeout,
            claim_ttl,
        }
    }
}

impl DispatcherConfig {
    /// `min(base * 2^attempts, max)`, saturating instead of overflowing.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

#[derive(Debug, Clone)]
pub struct ReminderConfig {
    pub default_lead_minutes: Vec<u32>,
}

impl From<&AppConfig> for ReminderConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            default_lead_minutes: config.reminder_lead_minutes.clone(),
        }
    }
}

/// Counts from one dispatcher tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchReport {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Booking lifecycle moments that produce an immediate notification to the patient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BookingEvent {
    Confirmed,
    Rescheduled,
    Cancelled,
}

impl BookingEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingEvent::Confirmed => "confirmed",
            BookingEvent::Rescheduled => "rescheduled",
            BookingEvent::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationListQuery {
    pub status: Option<String>,
    pub recipient_id: Option<Uuid>,
    pub booking_id: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
