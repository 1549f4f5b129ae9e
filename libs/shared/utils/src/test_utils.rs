use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::{Database, DbResult, ScheduleRepository};
use shared_models::{BookingStatus, NewBooking, NewScheduleRule, Provider};

/// Monday 2024-06-10, the anchor date used across the scheduling tests.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap_or_default()
}

pub fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or_default()
}

pub struct TestConfig {
    pub max_retries: u32,
    pub backoff_base_seconds: u64,
    pub send_timeout_seconds: u64,
    pub claim_ttl_seconds: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_seconds: 60,
            send_timeout_seconds: 1,
            claim_ttl_seconds: 300,
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            database_path: ":memory:".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            dispatch_max_retries: self.max_retries,
            dispatch_backoff_base_seconds: self.backoff_base_seconds,
            dispatch_send_timeout_seconds: self.send_timeout_seconds,
            dispatch_claim_ttl_seconds: self.claim_ttl_seconds,
            ..AppConfig::default()
        }
    }
}

/// Inserts an active provider working Monday to Friday, 09:00 to 17:00.
pub async fn seed_weekday_provider(db: &Database) -> DbResult<Provider> {
    let provider = Provider {
        id: Uuid::new_v4(),
        display_name: "Dr. Amara Test".to_string(),
        email: Some("amara@clinic.test".to_string()),
        phone: Some("+15550100".to_string()),
        is_active: true,
    };
    db.insert_provider(&provider).await?;

    for day_of_week in 1..=5 {
        db.insert_rule(
            provider.id,
            &NewScheduleRule {
                day_of_week,
                start_time: hm(9, 0),
                end_time: hm(17, 0),
                is_active: Some(true),
            },
        )
        .await?;
    }

    Ok(provider)
}

pub struct NewBookingBuilder {
    booking: NewBooking,
}

impl NewBookingBuilder {
    pub fn new(provider_id: Uuid) -> Self {
        Self {
            booking: NewBooking {
                clinic_id: Uuid::new_v4(),
                provider_id,
                service_id: None,
                patient_id: Some(Uuid::new_v4()),
                patient_name: "Test Patient".to_string(),
                patient_email: Some("patient@example.test".to_string()),
                patient_phone: None,
                appointment_date: monday(),
                appointment_time: hm(9, 0),
                duration_minutes: 30,
                status: BookingStatus::Confirmed,
                reminder_settings: None,
                notes: None,
            },
        }
    }

    pub fn at(mut self, date: NaiveDate, time: NaiveTime) -> Self {
        self.booking.appointment_date = date;
        self.booking.appointment_time = time;
        self
    }

    pub fn duration(mut self, minutes: u32) -> Self {
        self.booking.duration_minutes = minutes;
        self
    }

    pub fn status(mut self, status: BookingStatus) -> Self {
        self.booking.status = status;
        self
    }

    pub fn contact(mut self, email: Option<&str>, phone: Option<&str>) -> Self {
        self.booking.patient_email = email.map(str::to_string);
        self.booking.patient_phone = phone.map(str::to_string);
        self
    }

    pub fn build(self) -> NewBooking {
        self.booking
    }
}
