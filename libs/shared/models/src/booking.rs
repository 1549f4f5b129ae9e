use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UnknownVariant;
use crate::notification::NotificationType;
use crate::schedule::TimeRange;

// ==============================================================================
// CORE BOOKING MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Booking {
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
    pub patient_email: Option<String>,
    pub patient_phone: Option<String>,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    /// Derived cache of "a reminder has been delivered"; the notifications table is authoritative.
    pub reminder_sent: bool,
    pub reminder_settings: Option<ReminderSettings>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// Appointment start as an instant. Clinic wall-clock times are interpreted as UTC.
    pub fn starts_at(&self) -> DateTime<Utc> {
        self.appointment_date.and_time(self.appointment_time).and_utc()
    }

    /// Occupied time range on `appointment_date`, or `None` for a malformed row crossing midnight.
    pub fn time_range(&self) -> Option<TimeRange> {
        TimeRange::starting_at(self.appointment_time, self.duration_minutes as i64)
    }

    pub fn blocks_slot(&self) -> bool {
        self.status.blocks_slot()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
            BookingStatus::NoShow => "no_show",
        }
    }

    /// Pending and confirmed bookings can still change and receive reminders.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Every booking except a cancelled one keeps its slot occupied. A completed or
    /// no-show visit still happened there, so nothing may be booked on top of it.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled)
    }

    pub fn can_transition_to(&self, target: &BookingStatus) -> bool {
        use BookingStatus::*;
        match (self, target) {
            (Pending, Confirmed) => true,
            (Pending | Confirmed, Cancelled) => true,
            (Pending | Confirmed, Completed) => true,
            (Pending | Confirmed, NoShow) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "cancelled" => Ok(BookingStatus::Cancelled),
            "completed" => Ok(BookingStatus::Completed),
            "no_show" => Ok(BookingStatus::NoShow),
            other => Err(UnknownVariant::new("booking status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Unpaid,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" => Ok(PaymentStatus::Unpaid),
            "paid" => Ok(PaymentStatus::Paid),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(UnknownVariant::new("payment status", other)),
        }
    }
}

/// Per-booking reminder overrides. Absent fields fall back to clinic defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ReminderSettings {
    pub lead_minutes: Option<Vec<u32>>,
    pub channel: Option<NotificationType>,
}

/// Validated row written by the booking store.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub clinic_id: Uuid,
    pub provider_id: Uuid,
    pub service_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
    pub patient_email: Option<String>,
    pub patient_phone: Option<String>,
    pub appointment_date: NaiveDate,
    pub appointment_time: NaiveTime,
    pub duration_minutes: u32,
    pub status: BookingStatus,
    pub reminder_settings: Option<ReminderSettings>,
    pub notes: Option<String>,
}

impl NewBooking {
    pub fn time_range(&self) -> Option<TimeRange> {
        TimeRange::starting_at(self.appointment_time, self.duration_minutes as i64)
    }
}
