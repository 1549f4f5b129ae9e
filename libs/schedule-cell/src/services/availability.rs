use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use shared_database::{BookingRepository, DatabaseError, ScheduleRepository};
use shared_models::{
    iso_day_of_week, AvailabilityOverride, Booking, NewAvailabilityOverride, NewScheduleRule,
    Provider, ScheduleRule, TimeRange,
};
use shared_utils::Clock;

use crate::error::AvailabilityError;
use crate::models::{AvailableSlot, SlotCheck, MAX_SLOT_MINUTES};

/// Free/busy decision used by the booking path before it commits a mutation.
#[async_trait]
pub trait SlotFreeCheck: Send + Sync {
    /// `exclude_booking` lets a reschedule ignore the booking's own current slot.
    async fn check_slot(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: i64,
        exclude_booking: Option<Uuid>,
    ) -> Result<SlotCheck, AvailabilityError>;
}

/// A date-specific block taken from an unavailable override. `None` blocks the whole day.
struct Block {
    range: Option<TimeRange>,
    reason: String,
}

enum WindowSource {
    Override,
    Recurring,
}

/// Working windows and blocks that apply to one provider on one date.
struct DayPlan {
    windows: Vec<TimeRange>,
    blocks: Vec<Block>,
    source: WindowSource,
}

impl DayPlan {
    fn blocked_reason(&self, range: &TimeRange) -> Option<&str> {
        self.blocks
            .iter()
            .find(|block| block.range.map_or(true, |blocked| blocked.overlaps(range)))
            .map(|block| block.reason.as_str())
    }

    fn is_blocked_all_day(&self) -> bool {
        self.blocks.iter().any(|block| block.range.is_none())
    }

    fn fits_window(&self, range: &TimeRange) -> bool {
        self.windows.iter().any(|window| window.contains(range))
    }

    fn outside_reason(&self) -> &'static str {
        match self.source {
            WindowSource::Override => "requested time is outside the override availability window",
            WindowSource::Recurring => "requested time is outside the provider's working hours",
        }
    }
}

fn end_of_day() -> NaiveTime {
    NaiveTime::MIN.overflowing_sub_signed(Duration::nanoseconds(1)).0
}

fn validate_duration(duration_minutes: i64, field: &str) -> Result<(), AvailabilityError> {
    if duration_minutes <= 0 {
        return Err(AvailabilityError::InvalidInput(format!(
            "{} must be greater than zero",
            field
        )));
    }
    if duration_minutes > MAX_SLOT_MINUTES {
        return Err(AvailabilityError::InvalidInput(format!(
            "{} must not exceed {} minutes",
            field, MAX_SLOT_MINUTES
        )));
    }
    Ok(())
}

pub struct AvailabilityResolver {
    schedules: Arc<dyn ScheduleRepository>,
    bookings: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
}

impl AvailabilityResolver {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        bookings: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            schedules,
            bookings,
            clock,
        }
    }

    /// Whether `[start_time, start_time + duration)` on `date` can be booked.
    pub async fn is_slot_free(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: i64,
    ) -> Result<SlotCheck, AvailabilityError> {
        self.check_slot(provider_id, date, start_time, duration_minutes, None)
            .await
    }

    /// Free start times on `date`, walking every effective window at `step_minutes`.
    #[instrument(skip(self))]
    pub async fn available_slots(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        duration_minutes: i64,
        step_minutes: i64,
    ) -> Result<Vec<AvailableSlot>, AvailabilityError> {
        validate_duration(duration_minutes, "duration_minutes")?;
        validate_duration(step_minutes, "step_minutes")?;

        let provider = self.require_provider(provider_id).await?;
        if !provider.is_active {
            return Ok(Vec::new());
        }

        let plan = self.plan_day(provider_id, date).await?;
        if plan.is_blocked_all_day() {
            debug!("Provider {} is blocked for all of {}", provider_id, date);
            return Ok(Vec::new());
        }

        let booked = self.bookings.slot_holders_on_date(provider_id, date, None).await?;
        let now = self.clock.now();
        let step = Duration::minutes(step_minutes);
        let mut slots = Vec::new();

        for window in &plan.windows {
            let mut start = window.start;
            while let Some(range) = TimeRange::starting_at(start, duration_minutes) {
                if range.end > window.end {
                    break;
                }

                let in_future = date.and_time(start).and_utc() >= now;
                if in_future
                    && plan.blocked_reason(&range).is_none()
                    && overlapping_booking(&booked, &range).is_none()
                {
                    slots.push(AvailableSlot {
                        start_time: range.start,
                        end_time: range.end,
                        duration_minutes,
                    });
                }

                let (next, wrapped) = start.overflowing_add_signed(step);
                if wrapped != 0 {
                    break;
                }
                start = next;
            }
        }

        slots.sort_by_key(|slot| slot.start_time);
        slots.dedup_by_key(|slot| slot.start_time);

        debug!("Found {} free slots for provider {} on {}", slots.len(), provider_id, date);
        Ok(slots)
    }

    /// Adds a recurring weekly interval. Active intervals on the same day must not overlap.
    #[instrument(skip(self))]
    pub async fn create_schedule_rule(
        &self,
        provider_id: Uuid,
        request: NewScheduleRule,
    ) -> Result<ScheduleRule, AvailabilityError> {
        if !(1..=7).contains(&request.day_of_week) {
            return Err(AvailabilityError::InvalidInput(
                "day_of_week must be between 1 (Monday) and 7 (Sunday)".to_string(),
            ));
        }
        if request.start_time >= request.end_time {
            return Err(AvailabilityError::InvalidInput(
                "start_time must be before end_time".to_string(),
            ));
        }

        self.require_provider(provider_id).await?;

        // The store checks overlap with other active rules inside its write transaction.
        let rule = self
            .schedules
            .insert_rule(provider_id, &request)
            .await
            .map_err(|e| match e {
                DatabaseError::Conflict(msg) => AvailabilityError::Conflict(msg),
                other => AvailabilityError::Database(other),
            })?;
        info!(
            "Schedule rule {} created for provider {} on day {}",
            rule.id, provider_id, rule.day_of_week
        );
        Ok(rule)
    }

    #[instrument(skip(self))]
    pub async fn create_override(
        &self,
        provider_id: Uuid,
        request: NewAvailabilityOverride,
    ) -> Result<AvailabilityOverride, AvailabilityError> {
        match (request.start_time, request.end_time) {
            (Some(start), Some(end)) if start >= end => {
                return Err(AvailabilityError::InvalidInput(
                    "start_time must be before end_time".to_string(),
                ));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(AvailabilityError::InvalidInput(
                    "start_time and end_time must both be set or both be omitted".to_string(),
                ));
            }
            _ => {}
        }

        self.require_provider(provider_id).await?;

        let entry = self.schedules.insert_override(provider_id, &request).await?;
        info!(
            "Availability override {} created for provider {} on {}",
            entry.id, provider_id, entry.override_date
        );
        Ok(entry)
    }

    async fn require_provider(&self, provider_id: Uuid) -> Result<Provider, AvailabilityError> {
        self.schedules
            .get_provider(provider_id)
            .await?
            .ok_or(AvailabilityError::ProviderNotFound(provider_id))
    }

    async fn plan_day(&self, provider_id: Uuid, date: NaiveDate) -> Result<DayPlan, AvailabilityError> {
        let overrides = self.schedules.overrides_for_date(provider_id, date).await?;

        let mut blocks = Vec::new();
        let mut override_windows = Vec::new();
        let mut open_all_day = false;

        for entry in &overrides {
            match (entry.is_available, entry.window()) {
                (false, range) => blocks.push(Block {
                    range,
                    reason: entry
                        .reason
                        .clone()
                        .unwrap_or_else(|| "provider is unavailable".to_string()),
                }),
                (true, Some(window)) => override_windows.push(window),
                (true, None) => open_all_day = true,
            }
        }

        if !override_windows.is_empty() {
            return Ok(DayPlan {
                windows: override_windows,
                blocks,
                source: WindowSource::Override,
            });
        }

        if open_all_day {
            return Ok(DayPlan {
                windows: vec![TimeRange::new(NaiveTime::MIN, end_of_day())],
                blocks,
                source: WindowSource::Override,
            });
        }

        let windows = self
            .schedules
            .rules_for_day(provider_id, iso_day_of_week(date))
            .await?
            .into_iter()
            .filter(|rule| rule.is_active)
            .map(|rule| rule.window())
            .collect();

        Ok(DayPlan {
            windows,
            blocks,
            source: WindowSource::Recurring,
        })
    }
}

fn overlapping_booking<'a>(bookings: &'a [Booking], range: &TimeRange) -> Option<&'a Booking> {
    bookings
        .iter()
        .find(|booking| booking.time_range().is_some_and(|taken| taken.overlaps(range)))
}

#[async_trait]
impl SlotFreeCheck for AvailabilityResolver {
    #[instrument(skip(self))]
    async fn check_slot(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        start_time: NaiveTime,
        duration_minutes: i64,
        exclude_booking: Option<Uuid>,
    ) -> Result<SlotCheck, AvailabilityError> {
        validate_duration(duration_minutes, "duration_minutes")?;

        let range = TimeRange::starting_at(start_time, duration_minutes).ok_or_else(|| {
            AvailabilityError::InvalidInput("appointment must end on the same day".to_string())
        })?;

        if date.and_time(start_time).and_utc() < self.clock.now() {
            return Err(AvailabilityError::InvalidInput(
                "requested slot starts in the past".to_string(),
            ));
        }

        let provider = self.require_provider(provider_id).await?;
        if !provider.is_active {
            return Ok(SlotCheck::busy("provider is not active"));
        }

        // Overrides first, then the recurring schedule, then existing bookings.
        let plan = self.plan_day(provider_id, date).await?;
        if let Some(reason) = plan.blocked_reason(&range) {
            return Ok(SlotCheck::busy(reason));
        }
        if !plan.fits_window(&range) {
            return Ok(SlotCheck::busy(plan.outside_reason()));
        }

        let booked = self
            .bookings
            .slot_holders_on_date(provider_id, date, exclude_booking)
            .await?;
        if let Some(existing) = overlapping_booking(&booked, &range) {
            debug!("Slot {} on {} overlaps booking {}", start_time, date, existing.id);
            return Ok(SlotCheck::busy(format!(
                "overlaps an existing booking from {} to {}",
                existing.appointment_time,
                existing
                    .time_range()
                    .map(|r| r.end)
                    .unwrap_or(existing.appointment_time)
            )));
        }

        Ok(SlotCheck::free())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn end_of_day_contains_last_minute() {
        let whole_day = TimeRange::new(NaiveTime::MIN, end_of_day());
        let last = TimeRange::starting_at(t(23, 0), 59).unwrap();
        assert!(whole_day.contains(&last));
    }

    #[test]
    fn partial_block_only_hits_overlapping_ranges() {
        let plan = DayPlan {
            windows: vec![TimeRange::new(t(9, 0), t(17, 0))],
            blocks: vec![Block {
                range: Some(TimeRange::new(t(12, 0), t(13, 0))),
                reason: "lunch".to_string(),
            }],
            source: WindowSource::Recurring,
        };

        assert_eq!(
            plan.blocked_reason(&TimeRange::new(t(12, 30), t(13, 30))),
            Some("lunch")
        );
        assert_eq!(plan.blocked_reason(&TimeRange::new(t(13, 0), t(13, 30))), None);
        assert!(!plan.is_blocked_all_day());
    }

    #[test]
    fn durations_are_bounded() {
        assert!(validate_duration(0, "duration_minutes").is_err());
        assert!(validate_duration(-15, "duration_minutes").is_err());
        assert!(validate_duration(721, "duration_minutes").is_err());
        assert!(validate_duration(720, "duration_minutes").is_ok());
    }
}
