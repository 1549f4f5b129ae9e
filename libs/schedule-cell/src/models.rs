use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a free/busy check. `reason` is set whenever `free` is false.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotCheck {
    pub free: bool,
    pub reason: Option<String>,
}

impl SlotCheck {
    pub fn free() -> Self {
        Self { free: true, reason: None }
    }

    pub fn busy(reason: impl Into<String>) -> Self {
        Self {
            free: false,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AvailableSlot {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub duration_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvailableSlotsResponse {
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub slots: Vec<AvailableSlot>,
}

#[derive(Debug, Deserialize)]
pub struct SlotCheckQuery {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i64,
}

#[derive(Debug, Deserialize)]
pub struct AvailableSlotsQuery {
    pub date: NaiveDate,
    pub duration_minutes: Option<i64>,
    pub step_minutes: Option<i64>,
}

pub const DEFAULT_SLOT_MINUTES: i64 = 30;
pub const MAX_SLOT_MINUTES: i64 = 720;
