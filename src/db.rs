use std::collections::HashMap;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Cycle, Event, PilotRecord, Qualification, ResponseRecord, RollCallValue, RsvpValue, Squadron,
    StatusInterval,
};
use crate::store::AttendanceStore;

/// Event dates are UTC calendar dates, matching `Event::start_date`, whatever
/// the session `TimeZone` is.
const EVENTS_IN_RANGE: &str = r#"
    SELECT id, cycle_id, name, start_datetime,
           COALESCE(discord_message_ids, ARRAY[]::text[]) AS discord_message_ids
    FROM events
    WHERE cycle_id = $1
      AND (start_datetime AT TIME ZONE 'UTC')::date >= $2
      AND (start_datetime AT TIME ZONE 'UTC')::date <= $3
    ORDER BY start_datetime ASC
"#;

/// Read-only access to the squadron operations database.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;
        info!("Database connection pool established");
        Ok(Self { pool })
    }
}

fn response_from_row(row: &PgRow) -> ResponseRecord {
    let discord_event_id: String = row.get("discord_event_id");
    let rsvp: Option<String> = row.get("user_response");
    let roll_call: Option<String> = row.get("roll_call_response");

    let rsvp = rsvp.and_then(|raw| {
        let parsed = RsvpValue::parse(&raw);
        if parsed.is_none() {
            warn!(%discord_event_id, value = %raw, "Ignoring unknown RSVP value");
        }
        parsed
    });
    let roll_call = roll_call.and_then(|raw| {
        let parsed = RollCallValue::parse(&raw);
        if parsed.is_none() {
            warn!(%discord_event_id, value = %raw, "Ignoring unknown roll call value");
        }
        parsed
    });

    ResponseRecord {
        discord_id: row.get("discord_id"),
        recorded_at: row.get("updated_at"),
        discord_event_id,
        rsvp,
        roll_call,
    }
}

impl AttendanceStore for PgStore {
    async fn get_cycle(&self, cycle_id: Uuid) -> Result<Option<Cycle>> {
        let row = sqlx::query("SELECT id, name, start_date, end_date FROM cycles WHERE id = $1")
            .bind(cycle_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Cycle {
            id: row.get("id"),
            name: row.get("name"),
            start_date: row.get("start_date"),
            end_date: row.get("end_date"),
        }))
    }

    async fn list_events(&self, cycle_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<Vec<Event>> {
        let rows = sqlx::query(EVENTS_IN_RANGE)
            .bind(cycle_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Event {
                id: row.get("id"),
                cycle_id: row.get("cycle_id"),
                name: row.get("name"),
                start_datetime: row.get("start_datetime"),
                discord_message_ids: row.get("discord_message_ids"),
            })
            .collect())
    }

    async fn list_pilots(&self) -> Result<Vec<PilotRecord>> {
        let pilot_rows = sqlx::query("SELECT id, callsign, board_number, discord_id FROM pilots")
            .fetch_all(&self.pool)
            .await?;
        let status_rows = sqlx::query(
            r#"
            SELECT ps.pilot_id, ps.start_date, ps.end_date, s.is_active
            FROM pilot_statuses ps
            JOIN statuses s ON s.id = ps.status_id
            ORDER BY ps.start_date ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut intervals: HashMap<Uuid, Vec<StatusInterval>> = HashMap::new();
        for row in status_rows {
            intervals
                .entry(row.get("pilot_id"))
                .or_default()
                .push(StatusInterval {
                    start_date: row.get("start_date"),
                    end_date: row.get("end_date"),
                    is_active: row.get("is_active"),
                });
        }

        Ok(pilot_rows
            .into_iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                PilotRecord {
                    status_intervals: intervals.remove(&id).unwrap_or_default(),
                    id,
                    callsign: row.get("callsign"),
                    board_number: row.get("board_number"),
                    discord_id: row.get("discord_id"),
                }
            })
            .collect())
    }

    async fn squadron_assignments(&self, pilot_ids: &[Uuid]) -> Result<HashMap<Uuid, Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT pilot_id, squadron_id
            FROM pilot_assignments
            WHERE pilot_id = ANY($1) AND end_date IS NULL
            "#,
        )
        .bind(pilot_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("pilot_id"), row.get("squadron_id")))
            .collect())
    }

    async fn qualification_ids(&self, pilot_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Uuid>>> {
        let rows = sqlx::query(
            "SELECT pilot_id, qualification_id FROM pilot_qualifications WHERE pilot_id = ANY($1)",
        )
        .bind(pilot_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for row in rows {
            map.entry(row.get("pilot_id"))
                .or_default()
                .push(row.get("qualification_id"));
        }
        Ok(map)
    }

    async fn list_responses(&self, response_keys: &[String]) -> Result<Vec<ResponseRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT discord_event_id, discord_id, user_response, roll_call_response, updated_at
            FROM discord_event_attendance
            WHERE discord_event_id = ANY($1)
            ORDER BY updated_at ASC
            "#,
        )
        .bind(response_keys)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(response_from_row).collect())
    }

    async fn list_squadrons(&self) -> Result<Vec<Squadron>> {
        let rows = sqlx::query("SELECT id, name, designation FROM squadrons ORDER BY designation")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Squadron {
                id: row.get("id"),
                name: row.get("name"),
                designation: row.get("designation"),
            })
            .collect())
    }

    async fn list_qualifications(&self) -> Result<Vec<Qualification>> {
        let rows = sqlx::query("SELECT id, name, code FROM qualifications ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| Qualification {
                id: row.get("id"),
                name: row.get("name"),
                code: row.get("code"),
            })
            .collect())
    }
}
