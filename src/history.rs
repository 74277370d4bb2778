use std::collections::HashMap;

use futures::future::try_join_all;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::membership;
use crate::models::{Event, Pilot, ResponseRecord};
use crate::store::AttendanceStore;

/// Response histories keyed by `(pilot_id, event_id)`.
pub type Histories = HashMap<(Uuid, Uuid), Vec<ResponseRecord>>;

/// Fetches responses for every event concurrently, then groups them per pilot.
///
/// Every roster pilot active on an event's date gets an entry for that event,
/// empty when they never responded. Rows from anyone else are dropped.
pub async fn collect_histories<S: AttendanceStore>(
    store: &S,
    events: &[Event],
    roster: &[Pilot],
) -> Result<Histories> {
    let fetches = events.iter().map(|event| fetch_event_rows(store, event));
    let fetched = try_join_all(fetches).await?;

    let mut histories = Histories::new();
    for (event, rows) in fetched {
        for (pilot_id, history) in group_responses(event, rows, roster) {
            histories.insert((pilot_id, event.id), history);
        }
    }
    Ok(histories)
}

async fn fetch_event_rows<'a, S: AttendanceStore>(
    store: &'a S,
    event: &'a Event,
) -> Result<(&'a Event, Vec<ResponseRecord>)> {
    let keys = event.response_keys();
    let rows = store
        .list_responses(&keys)
        .await
        .map_err(|e| e.context(&format!("responses for event {}", event.id)))?;
    debug!(event_id = %event.id, channels = keys.len(), rows = rows.len(), "Fetched event responses");
    Ok((event, rows))
}

/// Groups one event's rows by pilot, keeping timestamp order within each pilot.
pub fn group_responses(
    event: &Event,
    rows: Vec<ResponseRecord>,
    roster: &[Pilot],
) -> HashMap<Uuid, Vec<ResponseRecord>> {
    let event_date = event.start_date();
    let mut grouped: HashMap<Uuid, Vec<ResponseRecord>> = roster
        .iter()
        .filter(|pilot| membership::is_active(&pilot.status_intervals, event_date))
        .map(|pilot| (pilot.id, Vec::new()))
        .collect();

    let by_discord: HashMap<&str, Uuid> = roster
        .iter()
        .filter_map(|pilot| pilot.discord_id.as_deref().map(|discord| (discord, pilot.id)))
        .collect();

    let mut unmatched = 0usize;
    for row in rows {
        let history = by_discord
            .get(row.discord_id.as_str())
            .and_then(|pilot_id| grouped.get_mut(pilot_id));
        match history {
            Some(history) => history.push(row),
            None => unmatched += 1,
        }
    }

    for history in grouped.values_mut() {
        history.sort_by_key(|row| row.recorded_at);
    }

    if unmatched > 0 {
        debug!(event_id = %event.id, unmatched, "Skipped responses outside the event roster");
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RollCallValue, RsvpValue, StatusInterval};
    use crate::store::{Snapshot, SnapshotStore};
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 10, 20, 0, 0).unwrap()
    }

    fn pilot(board_number: i32, discord: Option<&str>, active_from: NaiveDate) -> Pilot {
        Pilot {
            id: Uuid::new_v4(),
            callsign: format!("P{board_number}"),
            board_number,
            discord_id: discord.map(str::to_string),
            squadron_id: None,
            qualification_ids: Vec::new(),
            status_intervals: vec![StatusInterval {
                start_date: active_from,
                end_date: None,
                is_active: true,
            }],
        }
    }

    fn row(key: &str, discord: &str, rsvp: Option<RsvpValue>, roll_call: Option<RollCallValue>, at: DateTime<Utc>) -> ResponseRecord {
        ResponseRecord {
            discord_event_id: key.to_string(),
            discord_id: discord.to_string(),
            rsvp,
            roll_call,
            recorded_at: at,
        }
    }

    fn event(message_ids: &[&str]) -> Event {
        Event {
            id: Uuid::new_v4(),
            cycle_id: Uuid::new_v4(),
            name: "Strike".to_string(),
            start_datetime: start(),
            discord_message_ids: message_ids.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[test]
    fn silent_active_pilots_get_empty_histories() {
        let early = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let late = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let responder = pilot(1, Some("d1"), early);
        let silent = pilot(2, Some("d2"), early);
        let unlinked = pilot(3, None, early);
        let not_yet_active = pilot(4, Some("d4"), late);
        let roster = vec![responder.clone(), silent.clone(), unlinked.clone(), not_yet_active.clone()];
        let rows = vec![
            row("m1", "d1", Some(RsvpValue::Accepted), None, start() - Duration::hours(30)),
            row("m1", "d4", Some(RsvpValue::Accepted), None, start() - Duration::hours(30)),
            row("m1", "stranger", Some(RsvpValue::Declined), None, start() - Duration::hours(3)),
        ];

        let grouped = group_responses(&event(&["m1"]), rows, &roster);
        assert_eq!(grouped.len(), 3);
        assert_eq!(grouped[&responder.id].len(), 1);
        assert!(grouped[&silent.id].is_empty());
        assert!(grouped[&unlinked.id].is_empty());
        assert!(!grouped.contains_key(&not_yet_active.id));
    }

    #[test]
    fn rows_from_multiple_postings_merge_in_time_order() {
        let early = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let p = pilot(1, Some("d1"), early);
        let rows = vec![
            row("m2", "d1", Some(RsvpValue::Declined), None, start() - Duration::hours(1)),
            row("m1", "d1", Some(RsvpValue::Accepted), None, start() - Duration::hours(48)),
        ];

        let grouped = group_responses(&event(&["m1", "m2"]), rows, &[p.clone()]);
        let values: Vec<_> = grouped[&p.id].iter().map(|r| r.rsvp).collect();
        assert_eq!(values, vec![Some(RsvpValue::Accepted), Some(RsvpValue::Declined)]);
    }

    #[tokio::test]
    async fn unposted_event_reads_manual_roll_call_bucket() {
        let early = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let p = pilot(1, Some("d1"), early);
        let manual = event(&[]);
        let key = format!("manual-{}", manual.id);
        let store = SnapshotStore::new(Snapshot {
            responses: vec![row(&key, "d1", None, Some(RollCallValue::Present), start())],
            ..Snapshot::default()
        });

        let histories = collect_histories(&store, &[manual.clone()], &[p.clone()])
            .await
            .unwrap();
        let history = &histories[&(p.id, manual.id)];
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].roll_call, Some(RollCallValue::Present));
    }
}
