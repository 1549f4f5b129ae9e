use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::debug;
use uuid::Uuid;

use shared_models::{Booking, BookingStatus, NewBooking, PaymentStatus, TimeRange};

use crate::codec::{
    encode_date, encode_time, encode_ts, get_date, get_enum, get_json, get_opt_uuid, get_time,
    get_ts, get_uuid,
};
use crate::error::{DatabaseError, DbResult};
use crate::repositories::notification::cancel_pending_reminders_in;
use crate::repositories::traits::BookingRepository;
use crate::sqlite::Database;

const BOOKING_COLUMNS: &str = "id, clinic_id, provider_id, service_id, patient_id, patient_name,
    patient_email, patient_phone, appointment_date, appointment_time, duration_minutes, status,
    payment_status, reminder_sent, reminder_settings, notes, created_at, updated_at";

const SLOT_TAKEN: &str = "provider already has a booking overlapping that time";

fn booking_from_row(row: &Row<'_>) -> rusqlite::Result<Booking> {
    Ok(Booking {
        id: get_uuid(row, "id")?,
        clinic_id: get_uuid(row, "clinic_id")?,
        provider_id: get_uuid(row, "provider_id")?,
        service_id: get_opt_uuid(row, "service_id")?,
        patient_id: get_opt_uuid(row, "patient_id")?,
        patient_name: row.get("patient_name")?,
        patient_email: row.get("patient_email")?,
        patient_phone: row.get("patient_phone")?,
        appointment_date: get_date(row, "appointment_date")?,
        appointment_time: get_time(row, "appointment_time")?,
        duration_minutes: row.get("duration_minutes")?,
        status: get_enum::<BookingStatus>(row, "status")?,
        payment_status: get_enum::<PaymentStatus>(row, "payment_status")?,
        reminder_sent: row.get("reminder_sent")?,
        reminder_settings: get_json(row, "reminder_settings")?,
        notes: row.get("notes")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn load(conn: &Connection, booking_id: Uuid) -> DbResult<Option<Booking>> {
    let sql = format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = ?1");
    let booking = conn
        .query_row(&sql, params![booking_id.to_string()], booking_from_row)
        .optional()?;
    Ok(booking)
}

fn load_required(conn: &Connection, booking_id: Uuid) -> DbResult<Booking> {
    load(conn, booking_id)?.ok_or_else(|| DatabaseError::not_found("booking", booking_id))
}

fn slot_holders(
    conn: &Connection,
    provider_id: Uuid,
    date: NaiveDate,
    exclude: Option<Uuid>,
) -> DbResult<Vec<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS} FROM bookings
         WHERE provider_id = ?1 AND appointment_date = ?2
           AND (?3 IS NULL OR id <> ?3)
         ORDER BY appointment_time"
    );
    let mut stmt = conn.prepare(&sql)?;
    let bookings = stmt
        .query_map(
            params![
                provider_id.to_string(),
                encode_date(date),
                exclude.map(|id| id.to_string()),
            ],
            booking_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(bookings.into_iter().filter(Booking::blocks_slot).collect())
}

/// Fails with `Conflict` when `range` overlaps any slot-holding booking of the provider that day.
fn ensure_free(
    conn: &Connection,
    provider_id: Uuid,
    date: NaiveDate,
    range: &TimeRange,
    exclude: Option<Uuid>,
) -> DbResult<()> {
    let clash = slot_holders(conn, provider_id, date, exclude)?
        .into_iter()
        .find(|existing| existing.time_range().is_some_and(|r| r.overlaps(range)));

    match clash {
        Some(existing) => {
            debug!("Slot {} on {} clashes with booking {}", range.start, date, existing.id);
            Err(DatabaseError::Conflict(SLOT_TAKEN.to_string()))
        }
        None => Ok(()),
    }
}

fn requested_range(time: NaiveTime, duration_minutes: u32) -> DbResult<TimeRange> {
    TimeRange::starting_at(time, duration_minutes as i64).ok_or_else(|| {
        DatabaseError::InvalidValue(format!(
            "{duration_minutes} minutes from {time} does not fit within one day"
        ))
    })
}

#[async_trait]
impl BookingRepository for Database {
    async fn get_booking(&self, booking_id: Uuid) -> DbResult<Option<Booking>> {
        self.with_conn(move |conn| load(conn, booking_id)).await
    }

    async fn slot_holders_on_date(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> DbResult<Vec<Booking>> {
        self.with_conn(move |conn| slot_holders(conn, provider_id, date, exclude))
            .await
    }

    async fn insert_if_free(&self, booking: &NewBooking, now: DateTime<Utc>) -> DbResult<Booking> {
        let range = requested_range(booking.appointment_time, booking.duration_minutes)?;
        let id = Uuid::new_v4();
        let settings = booking
            .reminder_settings
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::InvalidValue(e.to_string()))?;
        let booking = booking.clone();

        self.with_immediate_tx(move |tx| {
            ensure_free(tx, booking.provider_id, booking.appointment_date, &range, None)?;

            tx.execute(
                "INSERT INTO bookings (
                    id, clinic_id, provider_id, service_id, patient_id, patient_name,
                    patient_email, patient_phone, appointment_date, appointment_time,
                    duration_minutes, status, payment_status, reminder_sent, reminder_settings,
                    notes, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 'unpaid', 0, ?13, ?14, ?15, ?15)",
                params![
                    id.to_string(),
                    booking.clinic_id.to_string(),
                    booking.provider_id.to_string(),
                    booking.service_id.map(|v| v.to_string()),
                    booking.patient_id.map(|v| v.to_string()),
                    booking.patient_name,
                    booking.patient_email,
                    booking.patient_phone,
                    encode_date(booking.appointment_date),
                    encode_time(booking.appointment_time),
                    booking.duration_minutes,
                    booking.status.as_str(),
                    settings,
                    booking.notes,
                    encode_ts(now),
                ],
            )
            .map_err(|e| DatabaseError::from_write(e, SLOT_TAKEN))?;

            load_required(tx, id)
        })
        .await
    }

    async fn move_if_free(
        &self,
        booking_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        now: DateTime<Utc>,
    ) -> DbResult<Booking> {
        self.with_immediate_tx(move |tx| {
            let current = load_required(tx, booking_id)?;
            if !current.status.is_active() {
                return Err(DatabaseError::Conflict(format!(
                    "booking is {} and cannot be moved",
                    current.status
                )));
            }

            let range = requested_range(time, current.duration_minutes)?;
            ensure_free(tx, current.provider_id, date, &range, Some(booking_id))?;

            tx.execute(
                "UPDATE bookings
                 SET appointment_date = ?2, appointment_time = ?3, reminder_sent = 0, updated_at = ?4
                 WHERE id = ?1",
                params![
                    booking_id.to_string(),
                    encode_date(date),
                    encode_time(time),
                    encode_ts(now),
                ],
            )
            .map_err(|e| DatabaseError::from_write(e, SLOT_TAKEN))?;

            let dropped = cancel_pending_reminders_in(tx, booking_id, now)?;
            debug!("Moved booking {} and cancelled {} stale reminders", booking_id, dropped);

            load_required(tx, booking_id)
        })
        .await
    }

    async fn update_status(
        &self,
        booking_id: Uuid,
        expected: BookingStatus,
        status: BookingStatus,
        now: DateTime<Utc>,
    ) -> DbResult<Booking> {
        self.with_immediate_tx(move |tx| {
            let changed = tx.execute(
                "UPDATE bookings SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
                params![
                    booking_id.to_string(),
                    expected.as_str(),
                    status.as_str(),
                    encode_ts(now),
                ],
            )?;

            let booking = load_required(tx, booking_id)?;
            if changed == 0 {
                return Err(DatabaseError::Conflict(format!(
                    "booking status changed to {} concurrently",
                    booking.status
                )));
            }
            Ok(booking)
        })
        .await
    }

    async fn mark_reminder_sent(&self, booking_id: Uuid, now: DateTime<Utc>) -> DbResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE bookings SET reminder_sent = 1, updated_at = ?2 WHERE id = ?1",
                params![booking_id.to_string(), encode_ts(now)],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::traits::{NotificationRepository, ScheduleRepository};
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use shared_models::{
        NewNotification, NotificationStatus, NotificationType, Provider, RecipientType,
        ReminderSettings,
    };

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
    }

    async fn seeded() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let provider_id = Uuid::new_v4();
        db.insert_provider(&Provider {
            id: provider_id,
            display_name: "Dr. Haddad".to_string(),
            email: None,
            phone: None,
            is_active: true,
        })
        .await
        .unwrap();
        (db, provider_id)
    }

    fn request(provider_id: Uuid, time: NaiveTime, duration: u32) -> NewBooking {
        NewBooking {
            clinic_id: Uuid::new_v4(),
            provider_id,
            service_id: None,
            patient_id: None,
            patient_name: "Ada Byron".to_string(),
            patient_email: Some("ada@example.test".to_string()),
            patient_phone: None,
            appointment_date: date(),
            appointment_time: time,
            duration_minutes: duration,
            status: BookingStatus::Pending,
            reminder_settings: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn overlapping_insert_is_rejected() {
        let (db, provider_id) = seeded().await;
        db.insert_if_free(&request(provider_id, t(9, 0), 30), now()).await.unwrap();

        let clash = db.insert_if_free(&request(provider_id, t(9, 15), 30), now()).await;
        assert_matches!(clash, Err(DatabaseError::Conflict(_)));

        let adjacent = db.insert_if_free(&request(provider_id, t(9, 30), 30), now()).await;
        assert!(adjacent.is_ok());
    }

    #[tokio::test]
    async fn cancelled_booking_frees_its_slot() {
        let (db, provider_id) = seeded().await;
        let booking = db.insert_if_free(&request(provider_id, t(9, 0), 30), now()).await.unwrap();
        db.update_status(booking.id, BookingStatus::Pending, BookingStatus::Cancelled, now())
            .await
            .unwrap();

        let again = db.insert_if_free(&request(provider_id, t(9, 0), 30), now()).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn completed_and_no_show_bookings_keep_their_slot() {
        let (db, provider_id) = seeded().await;
        let completed = db.insert_if_free(&request(provider_id, t(9, 0), 30), now()).await.unwrap();
        db.update_status(completed.id, BookingStatus::Pending, BookingStatus::Completed, now())
            .await
            .unwrap();
        let no_show = db.insert_if_free(&request(provider_id, t(10, 0), 30), now()).await.unwrap();
        db.update_status(no_show.id, BookingStatus::Pending, BookingStatus::NoShow, now())
            .await
            .unwrap();

        for time in [t(9, 0), t(9, 15), t(10, 0)] {
            let clash = db.insert_if_free(&request(provider_id, time, 30), now()).await;
            assert_matches!(clash, Err(DatabaseError::Conflict(_)));
        }

        let holders = db.slot_holders_on_date(provider_id, date(), None).await.unwrap();
        assert_eq!(holders.len(), 2);
    }

    #[tokio::test]
    async fn move_cancels_reminders_timed_for_the_old_slot() {
        let (db, provider_id) = seeded().await;
        let booking = db.insert_if_free(&request(provider_id, t(9, 0), 30), now()).await.unwrap();
        let reminder = NewNotification {
            notification_type: NotificationType::Email,
            recipient_type: RecipientType::Patient,
            recipient_id: None,
            recipient_email: Some("ada@example.test".to_string()),
            recipient_phone: None,
            subject: "Appointment reminder".to_string(),
            message: "See you at 09:00".to_string(),
            booking_id: Some(booking.id),
            reminder_lead_minutes: Some(120),
            scheduled_at: Utc.with_ymd_and_hms(2024, 6, 10, 7, 0, 0).unwrap(),
        };
        let queued = db.insert_reminder_if_absent(&reminder, now()).await.unwrap().unwrap();

        db.move_if_free(booking.id, date(), t(14, 0), now()).await.unwrap();

        assert!(db.pending_reminders(booking.id).await.unwrap().is_empty());
        assert_eq!(
            db.get_notification(queued.id).await.unwrap().unwrap().status,
            NotificationStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn rejected_move_keeps_reminders() {
        let (db, provider_id) = seeded().await;
        let booking = db.insert_if_free(&request(provider_id, t(9, 0), 30), now()).await.unwrap();
        db.insert_if_free(&request(provider_id, t(11, 0), 30), now()).await.unwrap();
        let reminder = NewNotification {
            notification_type: NotificationType::Sms,
            recipient_type: RecipientType::Patient,
            recipient_id: None,
            recipient_email: None,
            recipient_phone: Some("+15550100".to_string()),
            subject: "Appointment reminder".to_string(),
            message: "See you at 09:00".to_string(),
            booking_id: Some(booking.id),
            reminder_lead_minutes: Some(60),
            scheduled_at: Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).unwrap(),
        };
        db.insert_reminder_if_absent(&reminder, now()).await.unwrap();

        let clash = db.move_if_free(booking.id, date(), t(11, 0), now()).await;
        assert_matches!(clash, Err(DatabaseError::Conflict(_)));
        assert_eq!(db.pending_reminders(booking.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn move_ignores_the_booking_itself() {
        let (db, provider_id) = seeded().await;
        let booking = db.insert_if_free(&request(provider_id, t(9, 0), 60), now()).await.unwrap();

        let moved = db.move_if_free(booking.id, date(), t(9, 30), now()).await.unwrap();
        assert_eq!(moved.appointment_time, t(9, 30));
        assert_eq!(moved.created_at, booking.created_at);
    }

    #[tokio::test]
    async fn stale_status_update_is_a_conflict() {
        let (db, provider_id) = seeded().await;
        let booking = db.insert_if_free(&request(provider_id, t(9, 0), 30), now()).await.unwrap();
        db.update_status(booking.id, BookingStatus::Pending, BookingStatus::Confirmed, now())
            .await
            .unwrap();

        let stale = db
            .update_status(booking.id, BookingStatus::Pending, BookingStatus::Cancelled, now())
            .await;
        assert_matches!(stale, Err(DatabaseError::Conflict(_)));
        assert_eq!(
            db.get_booking(booking.id).await.unwrap().unwrap().status,
            BookingStatus::Confirmed
        );
    }

    #[tokio::test]
    async fn reminder_settings_are_stored_as_json() {
        let (db, provider_id) = seeded().await;
        let mut new = request(provider_id, t(11, 0), 30);
        new.reminder_settings = Some(ReminderSettings {
            lead_minutes: Some(vec![60]),
            channel: None,
        });
        let booking = db.insert_if_free(&new, now()).await.unwrap();
        let loaded = db.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(loaded.reminder_settings, new.reminder_settings);
        assert!(!loaded.reminder_sent);

        db.mark_reminder_sent(booking.id, now()).await.unwrap();
        assert!(db.get_booking(booking.id).await.unwrap().unwrap().reminder_sent);
    }

    #[tokio::test]
    async fn booking_past_midnight_is_invalid() {
        let (db, provider_id) = seeded().await;
        let result = db.insert_if_free(&request(provider_id, t(23, 30), 60), now()).await;
        assert_matches!(result, Err(DatabaseError::InvalidValue(_)));
    }
}
