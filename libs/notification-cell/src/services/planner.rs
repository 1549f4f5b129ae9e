use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_database::{BookingRepository, NotificationRepository, ScheduleRepository};
use shared_models::{
    Booking, NewNotification, NotificationRecord, NotificationType, RecipientType,
};
use shared_utils::Clock;

use crate::error::NotificationError;
use crate::models::{BookingEvent, ReminderConfig};

/// Derives reminder records from bookings and keeps them in step with booking changes.
pub struct ReminderPlanner {
    bookings: Arc<dyn BookingRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    notifications: Arc<dyn NotificationRepository>,
    clock: Arc<dyn Clock>,
    config: ReminderConfig,
}

impl ReminderPlanner {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        notifications: Arc<dyn NotificationRepository>,
        clock: Arc<dyn Clock>,
        config: ReminderConfig,
    ) -> Self {
        Self {
            bookings,
            schedules,
            notifications,
            clock,
            config,
        }
    }

    /// Inserts one pending reminder per lead time that is still in the future.
    ///
    /// Lead times that already have a pending reminder are skipped, so calling this twice is harmless.
    #[instrument(skip(self))]
    pub async fn plan(&self, booking_id: Uuid) -> Result<Vec<NotificationRecord>, NotificationError> {
        let booking = self.load_booking(booking_id).await?;
        if !booking.status.is_active() {
            debug!("Booking {} is {}, no reminders planned", booking_id, booking.status);
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let starts_at = booking.starts_at();
        let channel = select_channel(&booking);
        let provider_name = self.provider_name(&booking).await?;

        let mut planned = Vec::new();
        for lead in self.lead_times(&booking) {
            let remind_at = starts_at - Duration::minutes(lead as i64);
            if remind_at < now {
                debug!("Skipping {}-minute reminder for booking {}: already past", lead, booking_id);
                continue;
            }

            let reminder = NewNotification {
                notification_type: channel,
                recipient_type: RecipientType::Patient,
                recipient_id: booking.patient_id,
                recipient_email: booking.patient_email.clone(),
                recipient_phone: booking.patient_phone.clone(),
                subject: "Appointment reminder".to_string(),
                message: reminder_message(&booking, &provider_name, lead),
                booking_id: Some(booking.id),
                reminder_lead_minutes: Some(lead),
                scheduled_at: remind_at,
            };

            if let Some(record) = self
                .notifications
                .insert_reminder_if_absent(&reminder, now)
                .await?
            {
                planned.push(record);
            }
        }

        info!("Planned {} reminders for booking {}", planned.len(), booking_id);
        Ok(planned)
    }

    /// Cancels every pending reminder for the booking and plans again from its current state.
    #[instrument(skip(self))]
    pub async fn regenerate(&self, booking_id: Uuid) -> Result<Vec<NotificationRecord>, NotificationError> {
        let cancelled = self.cancel_all(booking_id).await?;
        debug!("Regenerating reminders for booking {} ({} cancelled)", booking_id, cancelled);
        self.plan(booking_id).await
    }

    /// Sent and failed reminders are left untouched.
    #[instrument(skip(self))]
    pub async fn cancel_all(&self, booking_id: Uuid) -> Result<u64, NotificationError> {
        let cancelled = self
            .notifications
            .cancel_pending_reminders(booking_id, self.clock.now())
            .await?;
        if cancelled > 0 {
            info!("Cancelled {} pending reminders for booking {}", cancelled, booking_id);
        }
        Ok(cancelled)
    }

    /// Queues an immediate, non-reminder notification about a booking lifecycle change.
    #[instrument(skip(self, booking), fields(booking_id = %booking.id))]
    pub async fn notify_booking_event(
        &self,
        booking: &Booking,
        event: BookingEvent,
    ) -> Result<NotificationRecord, NotificationError> {
        let provider_name = self.provider_name(booking).await?;
        let now = self.clock.now();

        let notification = NewNotification {
            notification_type: select_channel(booking),
            recipient_type: RecipientType::Patient,
            recipient_id: booking.patient_id,
            recipient_email: booking.patient_email.clone(),
            recipient_phone: booking.patient_phone.clone(),
            subject: event_subject(event).to_string(),
            message: event_message(booking, &provider_name, event),
            booking_id: Some(booking.id),
            reminder_lead_minutes: None,
            scheduled_at: now,
        };

        let record = self.notifications.insert(&notification, now).await?;
        debug!("Queued {} notification {} for booking {}", event.as_str(), record.id, booking.id);
        Ok(record)
    }

    async fn load_booking(&self, booking_id: Uuid) -> Result<Booking, NotificationError> {
        self.bookings
            .get_booking(booking_id)
            .await?
            .ok_or(NotificationError::BookingNotFound(booking_id))
    }

    async fn provider_name(&self, booking: &Booking) -> Result<String, NotificationError> {
        Ok(self
            .schedules
            .get_provider(booking.provider_id)
            .await?
            .map(|provider| provider.display_name)
            .unwrap_or_else(|| "your provider".to_string()))
    }

    /// Booking overrides win over clinic defaults. Largest lead first, duplicates removed.
    fn lead_times(&self, booking: &Booking) -> Vec<u32> {
        let mut leads = booking
            .reminder_settings
            .as_ref()
            .and_then(|settings| settings.lead_minutes.clone())
            .unwrap_or_else(|| self.config.default_lead_minutes.clone());
        leads.retain(|lead| *lead > 0);
        leads.sort_unstable_by(|a, b| b.cmp(a));
        leads.dedup();
        leads
    }
}

/// Preferred channel if the booking names one, otherwise the best contact the patient left.
pub fn select_channel(booking: &Booking) -> NotificationType {
    if let Some(channel) = booking
        .reminder_settings
        .as_ref()
        .and_then(|settings| settings.channel)
    {
        return channel;
    }

    let has = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
    if has(&booking.patient_email) {
        NotificationType::Email
    } else if has(&booking.patient_phone) {
        NotificationType::Sms
    } else {
        NotificationType::InApp
    }
}

fn describe_lead(lead_minutes: u32) -> String {
    match lead_minutes {
        m if m % 1440 == 0 => match m / 1440 {
            1 => "tomorrow".to_string(),
            days => format!("in {} days", days),
        },
        m if m % 60 == 0 => match m / 60 {
            1 => "in 1 hour".to_string(),
            hours => format!("in {} hours", hours),
        },
        m => format!("in {} minutes", m),
    }
}

fn reminder_message(booking: &Booking, provider_name: &str, lead_minutes: u32) -> String {
    format!(
        "Hi {}, this is a reminder of your appointment with {} {}: {} at {} ({} minutes).",
        booking.patient_name,
        provider_name,
        describe_lead(lead_minutes),
        booking.appointment_date.format("%A %d %B %Y"),
        booking.appointment_time.format("%H:%M"),
        booking.duration_minutes
    )
}

fn event_subject(event: BookingEvent) -> &'static str {
    match event {
        BookingEvent::Confirmed => "Appointment confirmed",
        BookingEvent::Rescheduled => "Appointment rescheduled",
        BookingEvent::Cancelled => "Appointment cancelled",
    }
}

fn event_message(booking: &Booking, provider_name: &str, event: BookingEvent) -> String {
    let when = format!(
        "{} at {}",
        booking.appointment_date.format("%A %d %B %Y"),
        booking.appointment_time.format("%H:%M")
    );
    match event {
        BookingEvent::Confirmed => format!(
            "Hi {}, your appointment with {} on {} is confirmed.",
            booking.patient_name, provider_name, when
        ),
        BookingEvent::Rescheduled => format!(
            "Hi {}, your appointment with {} has been moved to {}.",
            booking.patient_name, provider_name, when
        ),
        BookingEvent::Cancelled => format!(
            "Hi {}, your appointment with {} on {} has been cancelled.",
            booking.patient_name, provider_name, when
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lead_descriptions() {
        assert_eq!(describe_lead(1440), "tomorrow");
        assert_eq!(describe_lead(2880), "in 2 days");
        assert_eq!(describe_lead(120), "in 2 hours");
        assert_eq!(describe_lead(60), "in 1 hour");
        assert_eq!(describe_lead(45), "in 45 minutes");
    }
}
