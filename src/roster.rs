use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::membership;
use crate::models::{Pilot, ReportFilters};
use crate::store::AttendanceStore;

/// Pilots active at some point in `[cycle_start, cycle_end]`, with their current
/// squadron and qualifications attached, sorted by board number.
///
/// Squadron and qualification lookups are batched over the whole candidate set.
pub async fn load_candidates<S: AttendanceStore>(
    store: &S,
    cycle_start: NaiveDate,
    cycle_end: NaiveDate,
) -> Result<Vec<Pilot>> {
    let records = store
        .list_pilots()
        .await
        .map_err(|e| e.context("pilot status history"))?;

    let active: Vec<_> = records
        .into_iter()
        .filter(|record| membership::active_during(&record.status_intervals, cycle_start, cycle_end))
        .collect();
    let pilot_ids: Vec<Uuid> = active.iter().map(|record| record.id).collect();

    let (squadrons, mut qualifications) = if pilot_ids.is_empty() {
        Default::default()
    } else {
        futures::try_join!(
            store.squadron_assignments(&pilot_ids),
            store.qualification_ids(&pilot_ids),
        )
        .map_err(|e| e.context("squadron and qualification lookup"))?
    };

    let mut pilots: Vec<Pilot> = active
        .into_iter()
        .map(|record| Pilot {
            squadron_id: squadrons.get(&record.id).copied(),
            qualification_ids: qualifications.remove(&record.id).unwrap_or_default(),
            id: record.id,
            callsign: record.callsign,
            board_number: record.board_number,
            discord_id: record.discord_id,
            status_intervals: record.status_intervals,
        })
        .collect();
    pilots.sort_by_key(|pilot| pilot.board_number);

    debug!(candidates = pilots.len(), %cycle_start, %cycle_end, "Loaded cycle roster candidates");
    Ok(pilots)
}

pub fn matches_filters(pilot: &Pilot, filters: &ReportFilters) -> bool {
    let squadron_ok = filters.squadron_ids.is_empty()
        || pilot
            .squadron_id
            .is_some_and(|id| filters.squadron_ids.contains(&id));
    let qualification_ok = filters.qualification_ids.is_empty()
        || pilot
            .qualification_ids
            .iter()
            .any(|id| filters.qualification_ids.contains(id));
    let pilot_ok = filters.pilot_ids.is_empty() || filters.pilot_ids.contains(&pilot.id);

    squadron_ok && qualification_ok && pilot_ok
}

/// Keeps board-number order.
pub fn apply_filters(candidates: &[Pilot], filters: &ReportFilters) -> Vec<Pilot> {
    candidates
        .iter()
        .filter(|pilot| matches_filters(pilot, filters))
        .cloned()
        .collect()
}

pub async fn load_roster<S: AttendanceStore>(
    store: &S,
    cycle_start: NaiveDate,
    cycle_end: NaiveDate,
    filters: &ReportFilters,
) -> Result<Vec<Pilot>> {
    let candidates = load_candidates(store, cycle_start, cycle_end).await?;
    Ok(apply_filters(&candidates, filters))
}
