use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::UnknownVariant;

// ==============================================================================
// NOTIFICATION QUEUE MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Email,
    Sms,
    Push,
    InApp,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Email => "email",
            NotificationType::Sms => "sms",
            NotificationType::Push => "push",
            NotificationType::InApp => "in_app",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(NotificationType::Email),
            "sms" => Ok(NotificationType::Sms),
            "push" => Ok(NotificationType::Push),
            "in_app" => Ok(NotificationType::InApp),
            other => Err(UnknownVariant::new("notification type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Patient,
    Provider,
    Staff,
    Admin,
}

impl RecipientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecipientType::Patient => "patient",
            RecipientType::Provider => "provider",
            RecipientType::Staff => "staff",
            RecipientType::Admin => "admin",
        }
    }
}

impl FromStr for RecipientType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patient" => Ok(RecipientType::Patient),
            "provider" => Ok(RecipientType::Provider),
            "staff" => Ok(RecipientType::Staff),
            "admin" => Ok(RecipientType::Admin),
            other => Err(UnknownVariant::new("recipient type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Cancelled => "cancelled",
        }
    }

    /// Only `pending` records move; every other status is final.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NotificationStatus::Pending)
    }
}

impl fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            "cancelled" => Ok(NotificationStatus::Cancelled),
            other => Err(UnknownVariant::new("notification status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub notification_type: NotificationType,
    pub recipient_type: RecipientType,
    pub recipient_id: Option<Uuid>,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub booking_id: Option<Uuid>,
    /// Lead-time bucket for reminders; `None` for general notifications.
    pub reminder_lead_minutes: Option<u32>,
    pub status: NotificationStatus,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn is_reminder(&self) -> bool {
        self.booking_id.is_some() && self.reminder_lead_minutes.is_some()
    }

    /// Channel address the record must carry to be deliverable.
    ///
    /// In-app and push records are addressed by recipient id.
    pub fn delivery_address(&self) -> Option<String> {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        match self.notification_type {
            NotificationType::Email => non_empty(&self.recipient_email),
            NotificationType::Sms => non_empty(&self.recipient_phone),
            NotificationType::Push | NotificationType::InApp => {
                self.recipient_id.map(|id| id.to_string())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub notification_type: NotificationType,
    pub recipient_type: RecipientType,
    pub recipient_id: Option<Uuid>,
    pub recipient_email: Option<String>,
    pub recipient_phone: Option<String>,
    pub subject: String,
    pub message: String,
    pub booking_id: Option<Uuid>,
    pub reminder_lead_minutes: Option<u32>,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationFilter {
    pub status: Option<NotificationStatus>,
    pub recipient_id: Option<Uuid>,
    pub booking_id: Option<Uuid>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub due_now: u64,
    pub oldest_due_at: Option<DateTime<Utc>>,
}
