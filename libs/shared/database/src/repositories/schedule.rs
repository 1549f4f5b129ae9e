use async_trait::async_trait;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use shared_models::{
    AvailabilityOverride, NewAvailabilityOverride, NewScheduleRule, Provider, ScheduleRule,
};
use tracing::debug;

use crate::codec::{encode_date, encode_time, get_date, get_opt_time, get_time, get_uuid};
use crate::error::{DatabaseError, DbResult};
use crate::repositories::traits::ScheduleRepository;
use crate::sqlite::Database;

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<Provider> {
    Ok(Provider {
        id: get_uuid(row, "id")?,
        display_name: row.get("display_name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        is_active: row.get("is_active")?,
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleRule> {
    Ok(ScheduleRule {
        id: get_uuid(row, "id")?,
        provider_id: get_uuid(row, "provider_id")?,
        day_of_week: row.get("day_of_week")?,
        start_time: get_time(row, "start_time")?,
        end_time: get_time(row, "end_time")?,
        is_active: row.get("is_active")?,
    })
}

fn override_from_row(row: &Row<'_>) -> rusqlite::Result<AvailabilityOverride> {
    Ok(AvailabilityOverride {
        id: get_uuid(row, "id")?,
        provider_id: get_uuid(row, "provider_id")?,
        override_date: get_date(row, "override_date")?,
        start_time: get_opt_time(row, "start_time")?,
        end_time: get_opt_time(row, "end_time")?,
        is_available: row.get("is_available")?,
        reason: row.get("reason")?,
    })
}

fn rules_on_day(conn: &Connection, provider_id: Uuid, day_of_week: u8) -> DbResult<Vec<ScheduleRule>> {
    let mut stmt = conn.prepare(
        "SELECT id, provider_id, day_of_week, start_time, end_time, is_active
         FROM schedule_rules
         WHERE provider_id = ?1 AND day_of_week = ?2
         ORDER BY start_time",
    )?;
    let rules = stmt
        .query_map(params![provider_id.to_string(), day_of_week], rule_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rules)
}

/// Fails with `Conflict` when an active `rule` overlaps another active rule on its day.
fn ensure_no_overlap(conn: &Connection, rule: &ScheduleRule) -> DbResult<()> {
    if !rule.is_active {
        return Ok(());
    }

    let candidate = rule.window();
    let clash = rules_on_day(conn, rule.provider_id, rule.day_of_week)?
        .into_iter()
        .filter(|existing| existing.is_active)
        .find(|existing| existing.window().overlaps(&candidate));

    match clash {
        Some(existing) => {
            debug!("Rule {} - {} clashes with rule {}", rule.start_time, rule.end_time, existing.id);
            Err(DatabaseError::Conflict(format!(
                "overlaps existing rule {} ({} - {})",
                existing.id, existing.start_time, existing.end_time
            )))
        }
        None => Ok(()),
    }
}

#[async_trait]
impl ScheduleRepository for Database {
    async fn get_provider(&self, provider_id: Uuid) -> DbResult<Option<Provider>> {
        self.with_conn(move |conn| {
            let provider = conn
                .query_row(
                    "SELECT id, display_name, email, phone, is_active FROM providers WHERE id = ?1",
                    params![provider_id.to_string()],
                    provider_from_row,
                )
                .optional()?;
            Ok(provider)
        })
        .await
    }

    async fn insert_provider(&self, provider: &Provider) -> DbResult<()> {
        let provider = provider.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO providers (id, display_name, email, phone, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    provider.id.to_string(),
                    provider.display_name,
                    provider.email,
                    provider.phone,
                    provider.is_active,
                ],
            )
            .map_err(|e| DatabaseError::from_write(e, "provider already exists"))?;
            Ok(())
        })
        .await
    }

    async fn rules_for_day(&self, provider_id: Uuid, day_of_week: u8) -> DbResult<Vec<ScheduleRule>> {
        self.with_conn(move |conn| rules_on_day(conn, provider_id, day_of_week))
            .await
    }

    async fn overrides_for_date(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
    ) -> DbResult<Vec<AvailabilityOverride>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, provider_id, override_date, start_time, end_time, is_available, reason
                 FROM availability_overrides
                 WHERE provider_id = ?1 AND override_date = ?2
                 ORDER BY start_time",
            )?;
            let overrides = stmt
                .query_map(
                    params![provider_id.to_string(), encode_date(date)],
                    override_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(overrides)
        })
        .await
    }

    async fn insert_rule(&self, provider_id: Uuid, rule: &NewScheduleRule) -> DbResult<ScheduleRule> {
        let stored = ScheduleRule {
            id: Uuid::new_v4(),
            provider_id,
            day_of_week: rule.day_of_week,
            start_time: rule.start_time,
            end_time: rule.end_time,
            is_active: rule.is_active.unwrap_or(true),
        };

        self.with_immediate_tx(move |tx| {
            ensure_no_overlap(tx, &stored)?;
            tx.execute(
                "INSERT INTO schedule_rules (id, provider_id, day_of_week, start_time, end_time, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    stored.id.to_string(),
                    stored.provider_id.to_string(),
                    stored.day_of_week,
                    encode_time(stored.start_time),
                    encode_time(stored.end_time),
                    stored.is_active,
                ],
            )?;
            Ok(stored)
        })
        .await
    }

    async fn insert_override(
        &self,
        provider_id: Uuid,
        entry: &NewAvailabilityOverride,
    ) -> DbResult<AvailabilityOverride> {
        let stored = AvailabilityOverride {
            id: Uuid::new_v4(),
            provider_id,
            override_date: entry.override_date,
            start_time: entry.start_time,
            end_time: entry.end_time,
            is_available: entry.is_available,
            reason: entry.reason.clone(),
        };

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO availability_overrides
                    (id, provider_id, override_date, start_time, end_time, is_available, reason)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    stored.id.to_string(),
                    stored.provider_id.to_string(),
                    encode_date(stored.override_date),
                    stored.start_time.map(encode_time),
                    stored.end_time.map(encode_time),
                    stored.is_available,
                    stored.reason,
                ],
            )?;
            Ok(stored)
        })
        .await
    }
}
