use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_models::{
    NewNotification, NotificationFilter, NotificationRecord, NotificationStatus, NotificationType,
    QueueStats, RecipientType,
};

use crate::codec::{encode_ts, get_enum, get_opt_ts, get_opt_uuid, get_ts, get_uuid};
use crate::error::{DatabaseError, DbResult};
use crate::repositories::traits::{ClaimedBatch, NotificationRepository};
use crate::sqlite::Database;

const NOTIFICATION_COLUMNS: &str = "id, notification_type, recipient_type, recipient_id,
    recipient_email, recipient_phone, subject, message, booking_id, reminder_lead_minutes,
    status, scheduled_at, sent_at, error_message, retry_count, created_at, updated_at";

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 200;

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<NotificationRecord> {
    Ok(NotificationRecord {
        id: get_uuid(row, "id")?,
        notification_type: get_enum::<NotificationType>(row, "notification_type")?,
        recipient_type: get_enum::<RecipientType>(row, "recipient_type")?,
        recipient_id: get_opt_uuid(row, "recipient_id")?,
        recipient_email: row.get("recipient_email")?,
        recipient_phone: row.get("recipient_phone")?,
        subject: row.get("subject")?,
        message: row.get("message")?,
        booking_id: get_opt_uuid(row, "booking_id")?,
        reminder_lead_minutes: row.get("reminder_lead_minutes")?,
        status: get_enum::<NotificationStatus>(row, "status")?,
        scheduled_at: get_ts(row, "scheduled_at")?,
        sent_at: get_opt_ts(row, "sent_at")?,
        error_message: row.get("error_message")?,
        retry_count: row.get("retry_count")?,
        created_at: get_ts(row, "created_at")?,
        updated_at: get_ts(row, "updated_at")?,
    })
}

fn load(conn: &Connection, notification_id: Uuid) -> DbResult<Option<NotificationRecord>> {
    let sql = format!("SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = ?1");
    let record = conn
        .query_row(&sql, params![notification_id.to_string()], notification_from_row)
        .optional()?;
    Ok(record)
}

/// Writes the row; `ON CONFLICT DO NOTHING` makes the pending-reminder unique index a no-op guard.
fn insert_row(
    conn: &Connection,
    id: Uuid,
    notification: &NewNotification,
    now: DateTime<Utc>,
    skip_duplicates: bool,
) -> DbResult<usize> {
    let conflict_clause = if skip_duplicates { " ON CONFLICT DO NOTHING" } else { "" };
    let sql = format!(
        "INSERT INTO notifications (
            id, notification_type, recipient_type, recipient_id, recipient_email,
            recipient_phone, subject, message, booking_id, reminder_lead_minutes,
            status, scheduled_at, retry_count, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', ?11, 0, ?12, ?12){conflict_clause}"
    );

    let changed = conn
        .execute(
            &sql,
            params![
                id.to_string(),
                notification.notification_type.as_str(),
                notification.recipient_type.as_str(),
                notification.recipient_id.map(|v| v.to_string()),
                notification.recipient_email,
                notification.recipient_phone,
                notification.subject,
                notification.message,
                notification.booking_id.map(|v| v.to_string()),
                notification.reminder_lead_minutes,
                encode_ts(notification.scheduled_at),
                encode_ts(now),
            ],
        )
        .map_err(|e| DatabaseError::from_write(e, "a pending reminder already exists for that lead time"))?;
    Ok(changed)
}

fn load_required(conn: &Connection, notification_id: Uuid) -> DbResult<NotificationRecord> {
    load(conn, notification_id)?.ok_or_else(|| DatabaseError::not_found("notification", notification_id))
}

/// Cancels the booking's pending reminders on `conn`, so booking writes can do it in their own
/// transaction. One-off notifications are left alone.
pub(crate) fn cancel_pending_reminders_in(
    conn: &Connection,
    booking_id: Uuid,
    now: DateTime<Utc>,
) -> DbResult<usize> {
    let changed = conn.execute(
        "UPDATE notifications
         SET status = 'cancelled', claim_token = NULL, claimed_until = NULL, updated_at = ?2
         WHERE booking_id = ?1 AND status = 'pending' AND reminder_lead_minutes IS NOT NULL",
        params![booking_id.to_string(), encode_ts(now)],
    )?;
    Ok(changed)
}

const FILTER_PREDICATES: &str = "(?1 IS NULL OR status = ?1)
       AND (?2 IS NULL OR recipient_id = ?2)
       AND (?3 IS NULL OR booking_id = ?3)";

#[async_trait]
impl NotificationRepository for Database {
    async fn insert(&self, notification: &NewNotification, now: DateTime<Utc>) -> DbResult<NotificationRecord> {
        let id = Uuid::new_v4();
        let notification = notification.clone();
        self.with_immediate_tx(move |tx| {
            insert_row(tx, id, &notification, now, false)?;
            load_required(tx, id)
        })
        .await
    }

    async fn insert_reminder_if_absent(
        &self,
        notification: &NewNotification,
        now: DateTime<Utc>,
    ) -> DbResult<Option<NotificationRecord>> {
        let id = Uuid::new_v4();
        let notification = notification.clone();
        self.with_immediate_tx(move |tx| {
            if insert_row(tx, id, &notification, now, true)? == 0 {
                debug!(
                    "Pending reminder for booking {:?} at lead {:?} already queued",
                    notification.booking_id, notification.reminder_lead_minutes
                );
                return Ok(None);
            }
            load_required(tx, id).map(Some)
        })
        .await
    }

    async fn get_notification(&self, notification_id: Uuid) -> DbResult<Option<NotificationRecord>> {
        self.with_conn(move |conn| load(conn, notification_id)).await
    }

    async fn pending_reminders(&self, booking_id: Uuid) -> DbResult<Vec<NotificationRecord>> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE booking_id = ?1 AND status = 'pending' AND reminder_lead_minutes IS NOT NULL
                 ORDER BY scheduled_at"
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(params![booking_id.to_string()], notification_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn cancel_pending_reminders(&self, booking_id: Uuid, now: DateTime<Utc>) -> DbResult<u64> {
        self.with_conn(move |conn| {
            let changed = cancel_pending_reminders_in(conn, booking_id, now)?;
            Ok(changed as u64)
        })
        .await
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
        claimed_until: DateTime<Utc>,
    ) -> DbResult<ClaimedBatch> {
        let token = Uuid::new_v4();
        let now_text = encode_ts(now);

        self.with_immediate_tx(move |tx| {
            // Reminders for bookings that are no longer active are left for the cancel path.
            let sql = format!(
                "SELECT {} FROM notifications n
                 LEFT JOIN bookings b ON b.id = n.booking_id
                 WHERE n.status = 'pending'
                   AND n.scheduled_at <= ?1
                   AND (n.claimed_until IS NULL OR n.claimed_until <= ?1)
                   AND (n.reminder_lead_minutes IS NULL OR b.status IN ('pending', 'confirmed'))
                 ORDER BY n.scheduled_at, n.created_at
                 LIMIT ?2",
                NOTIFICATION_COLUMNS
                    .split(',')
                    .map(|column| format!("n.{}", column.trim()))
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            let mut stmt = tx.prepare(&sql)?;
            let records = stmt
                .query_map(params![now_text, limit], notification_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);

            for record in &records {
                tx.execute(
                    "UPDATE notifications SET claim_token = ?2, claimed_until = ?3 WHERE id = ?1",
                    params![record.id.to_string(), token.to_string(), encode_ts(claimed_until)],
                )?;
            }

            Ok(ClaimedBatch { token, records })
        })
        .await
    }

    async fn mark_sent(&self, notification_id: Uuid, token: Uuid, now: DateTime<Utc>) -> DbResult<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE notifications
                 SET status = 'sent', sent_at = ?3, error_message = NULL,
                     claim_token = NULL, claimed_until = NULL, updated_at = ?3
                 WHERE id = ?1 AND status = 'pending' AND claim_token = ?2",
                params![notification_id.to_string(), token.to_string(), encode_ts(now)],
            )?;
            if changed == 0 {
                warn!("Notification {} was no longer claimed when marking sent", notification_id);
            }
            Ok(changed > 0)
        })
        .await
    }

    async fn schedule_retry(
        &self,
        notification_id: Uuid,
        token: Uuid,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let error_message = error_message.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE notifications
                 SET retry_count = ?3, scheduled_at = ?4, error_message = ?5,
                     claim_token = NULL, claimed_until = NULL, updated_at = ?6
                 WHERE id = ?1 AND status = 'pending' AND claim_token = ?2",
                params![
                    notification_id.to_string(),
                    token.to_string(),
                    retry_count,
                    encode_ts(next_attempt_at),
                    error_message,
                    encode_ts(now),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn mark_failed(
        &self,
        notification_id: Uuid,
        token: Uuid,
        retry_count: u32,
        error_message: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let error_message = error_message.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE notifications
                 SET status = 'failed', retry_count = ?3, error_message = ?4,
                     claim_token = NULL, claimed_until = NULL, updated_at = ?5
                 WHERE id = ?1 AND status = 'pending' AND claim_token = ?2",
                params![
                    notification_id.to_string(),
                    token.to_string(),
                    retry_count,
                    error_message,
                    encode_ts(now),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn list(&self, filter: &NotificationFilter) -> DbResult<Vec<NotificationRecord>> {
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).min(MAX_LIST_LIMIT);
        let offset = filter.offset.unwrap_or(0);
        let filter = filter.clone();

        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {NOTIFICATION_COLUMNS} FROM notifications
                 WHERE {FILTER_PREDICATES}
                 ORDER BY scheduled_at DESC
                 LIMIT ?4 OFFSET ?5"
            );
            let mut stmt = conn.prepare(&sql)?;
            let records = stmt
                .query_map(
                    params![
                        filter.status.map(|s| s.as_str()),
                        filter.recipient_id.map(|v| v.to_string()),
                        filter.booking_id.map(|v| v.to_string()),
                        limit,
                        offset,
                    ],
                    notification_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn count(&self, filter: &NotificationFilter) -> DbResult<u64> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let sql = format!("SELECT COUNT(*) FROM notifications WHERE {FILTER_PREDICATES}");
            let total: i64 = conn.query_row(
                &sql,
                params![
                    filter.status.map(|s| s.as_str()),
                    filter.recipient_id.map(|v| v.to_string()),
                    filter.booking_id.map(|v| v.to_string()),
                ],
                |row| row.get(0),
            )?;
            Ok(total as u64)
        })
        .await
    }

    async fn stats(&self, now: DateTime<Utc>) -> DbResult<QueueStats> {
        self.with_conn(move |conn| {
            let mut stats = QueueStats::default();

            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM notifications GROUP BY status")?;
            let counts = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            for (status, count) in counts {
                let count = count as u64;
                match status.parse::<NotificationStatus>() {
                    Ok(NotificationStatus::Pending) => stats.pending = count,
                    Ok(NotificationStatus::Sent) => stats.sent = count,
                    Ok(NotificationStatus::Failed) => stats.failed = count,
                    Ok(NotificationStatus::Cancelled) => stats.cancelled = count,
                    Err(e) => return Err(DatabaseError::InvalidValue(e.to_string())),
                }
            }

            let (due_now, oldest): (i64, Option<String>) = conn.query_row(
                "SELECT COUNT(*), MIN(scheduled_at) FROM notifications
                 WHERE status = 'pending' AND scheduled_at <= ?1",
                params![encode_ts(now)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            stats.due_now = due_now as u64;
            stats.oldest_due_at = oldest
                .map(|raw| {
                    DateTime::parse_from_rfc3339(&raw)
                        .map(|ts| ts.with_timezone(&Utc))
                        .map_err(|e| DatabaseError::InvalidValue(e.to_string()))
                })
                .transpose()?;

            Ok(stats)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::traits::{BookingRepository, ScheduleRepository};
    use chrono::{Duration, NaiveDate, NaiveTime, TimeZone};
    use shared_models::{BookingStatus, NewBooking, Provider};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 9, h, m, 0).unwrap()
    }

    async fn seeded_booking(db: &Database) -> Uuid {
        let provider_id = Uuid::new_v4();
        db.insert_provider(&Provider {
            id: provider_id,
            display_name: "Dr. Lind".to_string(),
            email: None,
            phone: None,
            is_active: true,
        })
        .await
        .unwrap();

        db.insert_if_free(
            &NewBooking {
                clinic_id: Uuid::new_v4(),
                provider_id,
                service_id: None,
                patient_id: None,
                patient_name: "Grace Hopper".to_string(),
                patient_email: Some("grace@example.test".to_string()),
                patient_phone: None,
                appointment_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
                appointment_time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                duration_minutes: 30,
                status: BookingStatus::Confirmed,
                reminder_settings: None,
                notes: None,
            },
            at(8, 0),
        )
        .await
        .unwrap()
        .id
    }

    fn reminder(booking_id: Uuid, lead: u32, scheduled_at: DateTime<Utc>) -> NewNotification {
        NewNotification {
            notification_type: NotificationType::Email,
            recipient_type: RecipientType::Patient,
            recipient_id: None,
            recipient_email: Some("grace@example.test".to_string()),
            recipient_phone: None,
            subject: "Appointment reminder".to_string(),
            message: "See you tomorrow".to_string(),
            booking_id: Some(booking_id),
            reminder_lead_minutes: Some(lead),
            scheduled_at,
        }
    }

    #[tokio::test]
    async fn duplicate_pending_reminder_is_skipped() {
        let db = Database::open_in_memory().unwrap();
        let booking_id = seeded_booking(&db).await;

        let first = db
            .insert_reminder_if_absent(&reminder(booking_id, 1440, at(10, 0)), at(8, 0))
            .await
            .unwrap();
        let second = db
            .insert_reminder_if_absent(&reminder(booking_id, 1440, at(10, 0)), at(8, 1))
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(db.pending_reminders(booking_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn claims_are_exclusive_until_they_expire() {
        let db = Database::open_in_memory().unwrap();
        let booking_id = seeded_booking(&db).await;
        db.insert_reminder_if_absent(&reminder(booking_id, 1440, at(10, 0)), at(8, 0))
            .await
            .unwrap();

        let lease = at(10, 5);
        let first = db.claim_due(at(10, 0), 10, lease).await.unwrap();
        let second = db.claim_due(at(10, 1), 10, lease).await.unwrap();
        assert_eq!(first.records.len(), 1);
        assert!(second.records.is_empty());

        let after_lease = db.claim_due(at(10, 6), 10, at(10, 11)).await.unwrap();
        assert_eq!(after_lease.records.len(), 1);

        // The expired claim can no longer record an outcome.
        let stale = db.mark_sent(first.records[0].id, first.token, at(10, 6)).await.unwrap();
        assert!(!stale);
        let fresh = db
            .mark_sent(after_lease.records[0].id, after_lease.token, at(10, 7))
            .await
            .unwrap();
        assert!(fresh);
    }

    #[tokio::test]
    async fn future_records_are_not_claimed() {
        let db = Database::open_in_memory().unwrap();
        let booking_id = seeded_booking(&db).await;
        db.insert_reminder_if_absent(&reminder(booking_id, 120, at(12, 0)), at(8, 0))
            .await
            .unwrap();

        let batch = db.claim_due(at(11, 59), 10, at(12, 4)).await.unwrap();
        assert!(batch.records.is_empty());
    }

    #[tokio::test]
    async fn reminders_of_cancelled_bookings_are_not_claimed() {
        let db = Database::open_in_memory().unwrap();
        let booking_id = seeded_booking(&db).await;
        db.insert_reminder_if_absent(&reminder(booking_id, 1440, at(10, 0)), at(8, 0))
            .await
            .unwrap();
        db.update_status(booking_id, BookingStatus::Confirmed, BookingStatus::Cancelled, at(9, 0))
            .await
            .unwrap();

        let batch = db.claim_due(at(10, 0), 10, at(10, 5)).await.unwrap();
        assert!(batch.records.is_empty());
    }

    #[tokio::test]
    async fn retry_then_fail_updates_counters() {
        let db = Database::open_in_memory().unwrap();
        let booking_id = seeded_booking(&db).await;
        let record = db
            .insert_reminder_if_absent(&reminder(booking_id, 1440, at(10, 0)), at(8, 0))
            .await
            .unwrap()
            .unwrap();

        let batch = db.claim_due(at(10, 0), 10, at(10, 5)).await.unwrap();
        let next = at(10, 0) + Duration::seconds(120);
        assert!(db
            .schedule_retry(record.id, batch.token, 1, next, "gateway timeout", at(10, 0))
            .await
            .unwrap());

        let retried = db.get_notification(record.id).await.unwrap().unwrap();
        assert_eq!(retried.status, NotificationStatus::Pending);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.scheduled_at, next);

        let batch = db.claim_due(next, 10, next + Duration::minutes(5)).await.unwrap();
        assert!(db
            .mark_failed(record.id, batch.token, 2, "gateway timeout", next)
            .await
            .unwrap());
        let failed = db.get_notification(record.id).await.unwrap().unwrap();
        assert_eq!(failed.status, NotificationStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("gateway timeout"));
    }

    #[tokio::test]
    async fn cancel_only_touches_pending_reminders() {
        let db = Database::open_in_memory().unwrap();
        let booking_id = seeded_booking(&db).await;
        let sent = db
            .insert_reminder_if_absent(&reminder(booking_id, 1440, at(10, 0)), at(8, 0))
            .await
            .unwrap()
            .unwrap();
        db.insert_reminder_if_absent(&reminder(booking_id, 120, at(12, 0)), at(8, 0))
            .await
            .unwrap();

        let batch = db.claim_due(at(10, 0), 10, at(10, 5)).await.unwrap();
        db.mark_sent(sent.id, batch.token, at(10, 0)).await.unwrap();

        assert_eq!(db.cancel_pending_reminders(booking_id, at(10, 30)).await.unwrap(), 1);
        assert!(db.pending_reminders(booking_id).await.unwrap().is_empty());
        assert_eq!(
            db.get_notification(sent.id).await.unwrap().unwrap().status,
            NotificationStatus::Sent
        );
    }

    #[tokio::test]
    async fn stats_and_filtered_listing() {
        let db = Database::open_in_memory().unwrap();
        let booking_id = seeded_booking(&db).await;
        db.insert_reminder_if_absent(&reminder(booking_id, 1440, at(10, 0)), at(8, 0))
            .await
            .unwrap();
        db.insert_reminder_if_absent(&reminder(booking_id, 120, at(12, 0)), at(8, 0))
            .await
            .unwrap();

        let stats = db.stats(at(11, 0)).await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.due_now, 1);
        assert_eq!(stats.oldest_due_at, Some(at(10, 0)));

        let listed = db
            .list(&NotificationFilter {
                booking_id: Some(booking_id),
                status: Some(NotificationStatus::Pending),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].scheduled_at, at(12, 0));
    }

    #[tokio::test]
    async fn count_ignores_paging() {
        let db = Database::open_in_memory().unwrap();
        let booking_id = seeded_booking(&db).await;
        for (lead, hour) in [(1440, 10), (120, 12), (60, 13)] {
            db.insert_reminder_if_absent(&reminder(booking_id, lead, at(hour, 0)), at(8, 0))
                .await
                .unwrap();
        }

        let page = NotificationFilter {
            booking_id: Some(booking_id),
            limit: Some(1),
            offset: Some(1),
            ..Default::default()
        };
        assert_eq!(db.list(&page).await.unwrap().len(), 1);
        assert_eq!(db.count(&page).await.unwrap(), 3);

        let sent_only = NotificationFilter {
            status: Some(NotificationStatus::Sent),
            ..page
        };
        assert_eq!(db.count(&sent_only).await.unwrap(), 0);
    }
}
