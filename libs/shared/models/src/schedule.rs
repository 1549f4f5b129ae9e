use chrono::{Datelike, Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// PROVIDER SCHEDULE MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    pub id: Uuid,
    pub display_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
}

/// Weekly recurring working interval. `day_of_week` is ISO numbered, 1 = Monday .. 7 = Sunday.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleRule {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: bool,
}

impl ScheduleRule {
    pub fn window(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }
}

/// Date specific exception to the recurring schedule.
///
/// Both times absent means the override applies to the whole day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailabilityOverride {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub override_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_available: bool,
    pub reason: Option<String>,
}

impl AvailabilityOverride {
    /// `None` for a full-day override.
    pub fn window(&self) -> Option<TimeRange> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(TimeRange::new(start, end)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduleRule {
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAvailabilityOverride {
    pub override_date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub is_available: bool,
    pub reason: Option<String>,
}

// ==============================================================================
// TIME HELPERS
// ==============================================================================

/// Half-open `[start, end)` interval within a single day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Builds the range starting at `start` lasting `duration_minutes`.
    ///
    /// Returns `None` when the duration is not positive or the range would run past midnight.
    pub fn starting_at(start: NaiveTime, duration_minutes: i64) -> Option<Self> {
        if duration_minutes <= 0 {
            return None;
        }
        let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(duration_minutes));
        if wrapped != 0 {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// ISO day of week for a date, 1 = Monday .. 7 = Sunday.
pub fn iso_day_of_week(date: NaiveDate) -> u8 {
    date.weekday().number_from_monday() as u8
}
