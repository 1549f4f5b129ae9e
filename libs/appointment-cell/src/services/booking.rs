use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use notification_cell::{BookingEvent, ReminderPlanner};
use schedule_cell::SlotFreeCheck;
use shared_database::BookingRepository;
use shared_models::{Booking, BookingStatus};
use shared_utils::Clock;

use crate::models::{
    BookingError, CreateBookingRequest, RescheduleBookingRequest, MAX_DURATION_MINUTES,
    MAX_LEAD_MINUTES, MAX_LEAD_TIMES,
};
use crate::services::locks::ProviderLocks;

/// Commits booking mutations only after the slot has been checked free under the provider lock.
///
/// The store repeats the overlap check inside its write transaction, so a writer outside this
/// process still cannot double-book; whichever commit comes second gets `Conflict`.
pub struct BookingConflictGuard {
    bookings: Arc<dyn BookingRepository>,
    availability: Arc<dyn SlotFreeCheck>,
    planner: Arc<ReminderPlanner>,
    clock: Arc<dyn Clock>,
    locks: ProviderLocks,
}

impl BookingConflictGuard {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        availability: Arc<dyn SlotFreeCheck>,
        planner: Arc<ReminderPlanner>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bookings,
            availability,
            planner,
            clock,
            locks: ProviderLocks::new(),
        }
    }

    #[instrument(skip(self, request), fields(provider_id = %request.provider_id))]
    pub async fn create_booking(&self, request: CreateBookingRequest) -> Result<Booking, BookingError> {
        validate_create(&request)?;
        let new_booking = request.into_new_booking();

        let booking = {
            let _guard = self.locks.acquire(new_booking.provider_id).await;

            let check = self
                .availability
                .check_slot(
                    new_booking.provider_id,
                    new_booking.appointment_date,
                    new_booking.appointment_time,
                    new_booking.duration_minutes as i64,
                    None,
                )
                .await?;
            if !check.free {
                let reason = check.reason.unwrap_or_else(|| "slot is not available".to_string());
                debug!("Rejecting booking: {}", reason);
                return Err(BookingError::Conflict(reason));
            }

            self.bookings
                .insert_if_free(&new_booking, self.clock.now())
                .await?
        };

        info!(
            "Booking {} created for {} at {}",
            booking.id, booking.appointment_date, booking.appointment_time
        );

        if let Err(e) = self.planner.plan(booking.id).await {
            warn!("Reminder planning failed for booking {}: {}", booking.id, e);
        }
        if booking.status == BookingStatus::Confirmed {
            self.notify(&booking, BookingEvent::Confirmed).await;
        }

        Ok(booking)
    }

    #[instrument(skip(self, request))]
    pub async fn reschedule_booking(
        &self,
        booking_id: Uuid,
        request: RescheduleBookingRequest,
    ) -> Result<Booking, BookingError> {
        let current = self.get_booking(booking_id).await?;
        ensure_active(&current, "rescheduled")?;

        let booking = {
            let _guard = self.locks.acquire(current.provider_id).await;

            let check = self
                .availability
                .check_slot(
                    current.provider_id,
                    request.appointment_date,
                    request.appointment_time,
                    current.duration_minutes as i64,
                    Some(booking_id),
                )
                .await?;
            if !check.free {
                let reason = check.reason.unwrap_or_else(|| "slot is not available".to_string());
                return Err(BookingError::Conflict(reason));
            }

            self.bookings
                .move_if_free(
                    booking_id,
                    request.appointment_date,
                    request.appointment_time,
                    self.clock.now(),
                )
                .await?
        };

        info!(
            "Booking {} moved to {} at {}",
            booking.id, booking.appointment_date, booking.appointment_time
        );

        // The move already cancelled the reminders for the old time; a failure here leaves the
        // booking without reminders rather than with wrong ones.
        if let Err(e) = self.planner.regenerate(booking.id).await {
            warn!("Reminder regeneration failed for booking {}: {}", booking.id, e);
        }
        self.notify(&booking, BookingEvent::Rescheduled).await;

        Ok(booking)
    }

    /// Frees the slot and cancels every pending reminder before returning.
    #[instrument(skip(self))]
    pub async fn cancel_booking(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        let current = self.get_booking(booking_id).await?;
        ensure_active(&current, "cancelled")?;

        let booking = self
            .bookings
            .update_status(booking_id, current.status, BookingStatus::Cancelled, self.clock.now())
            .await?;
        info!("Booking {} cancelled", booking.id);

        // Reminders of inactive bookings are never claimed, so a failure here cannot leak a send.
        if let Err(e) = self.planner.cancel_all(booking.id).await {
            warn!("Could not cancel reminders for booking {}: {}", booking.id, e);
        }
        self.notify(&booking, BookingEvent::Cancelled).await;

        Ok(booking)
    }

    pub async fn get_booking(&self, booking_id: Uuid) -> Result<Booking, BookingError> {
        self.bookings
            .get_booking(booking_id)
            .await?
            .ok_or(BookingError::NotFound(booking_id))
    }

    /// Applies a lifecycle transition. Cancellation goes through `cancel_booking`.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        booking_id: Uuid,
        status: BookingStatus,
    ) -> Result<Booking, BookingError> {
        if status == BookingStatus::Cancelled {
            return self.cancel_booking(booking_id).await;
        }

        let current = self.get_booking(booking_id).await?;
        validate_status_transition(current.status, status)?;

        let booking = self
            .bookings
            .update_status(booking_id, current.status, status, self.clock.now())
            .await?;
        info!("Booking {} moved from {} to {}", booking.id, current.status, status);

        if status.is_terminal() {
            if let Err(e) = self.planner.cancel_all(booking.id).await {
                warn!("Could not cancel reminders for booking {}: {}", booking.id, e);
            }
        } else if status == BookingStatus::Confirmed {
            self.notify(&booking, BookingEvent::Confirmed).await;
        }

        Ok(booking)
    }

    async fn notify(&self, booking: &Booking, event: BookingEvent) {
        if let Err(e) = self.planner.notify_booking_event(booking, event).await {
            warn!(
                "Could not queue {} notification for booking {}: {}",
                event.as_str(),
                booking.id,
                e
            );
        }
    }
}

fn ensure_active(booking: &Booking, action: &str) -> Result<(), BookingError> {
    if booking.status.is_terminal() {
        return Err(BookingError::InvalidState(format!(
            "Booking {} is {} and cannot be {}",
            booking.id, booking.status, action
        )));
    }
    Ok(())
}

pub fn validate_status_transition(
    current: BookingStatus,
    target: BookingStatus,
) -> Result<(), BookingError> {
    if current.can_transition_to(&target) {
        return Ok(());
    }
    warn!("Rejected booking status transition {} -> {}", current, target);
    Err(BookingError::InvalidState(format!(
        "Cannot change booking status from {} to {}",
        current, target
    )))
}

fn validate_create(request: &CreateBookingRequest) -> Result<(), BookingError> {
    if request.patient_name.trim().is_empty() {
        return Err(BookingError::InvalidInput("patient_name must not be empty".to_string()));
    }

    if request.duration_minutes == 0 || request.duration_minutes > MAX_DURATION_MINUTES {
        return Err(BookingError::InvalidInput(format!(
            "duration_minutes must be between 1 and {}",
            MAX_DURATION_MINUTES
        )));
    }

    if !request.initial_status().is_active() {
        return Err(BookingError::InvalidInput(
            "new bookings must be pending or confirmed".to_string(),
        ));
    }

    let leads = request
        .reminder_settings
        .as_ref()
        .and_then(|settings| settings.lead_minutes.as_ref());
    if let Some(leads) = leads {
        if leads.len() > MAX_LEAD_TIMES {
            return Err(BookingError::InvalidInput(format!(
                "at most {} reminder lead times are allowed",
                MAX_LEAD_TIMES
            )));
        }
        if let Some(bad) = leads.iter().find(|lead| **lead == 0 || **lead > MAX_LEAD_MINUTES) {
            return Err(BookingError::InvalidInput(format!(
                "reminder lead time {} must be between 1 and {} minutes",
                bad, MAX_LEAD_MINUTES
            )));
        }
    }

    Ok(())
}
