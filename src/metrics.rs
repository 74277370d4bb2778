use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use crate::membership;
use crate::models::{
    AttendanceCounts, Classification, Event, EventMetrics, Pilot, SquadronKey, SquadronMetrics,
};

/// Classifications keyed by `(pilot_id, event_id)`.
pub type Classifications = HashMap<(Uuid, Uuid), Classification>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregates {
    pub event_metrics: Vec<EventMetrics>,
    pub squadron_metrics: Vec<SquadronMetrics>,
}

/// Rounded to the nearest whole percent; zero when there is no one to count.
pub fn percentage(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * part as f64 / total as f64).round() as u32
}

pub fn count<I>(classifications: I, total_pilots: usize) -> AttendanceCounts
where
    I: IntoIterator<Item = Classification>,
{
    let mut counts = AttendanceCounts {
        total_pilots,
        ..AttendanceCounts::default()
    };
    for classification in classifications {
        match classification {
            Classification::Present => counts.attendance_count += 1,
            Classification::NoShow => counts.no_show_count += 1,
            Classification::LastMinuteSnivel => counts.last_minute_snivel_count += 1,
            Classification::AdvancedSnivel => counts.advanced_snivel_count += 1,
            Classification::NoResponse => counts.no_response_count += 1,
        }
    }
    counts.total_snivels_count = counts.last_minute_snivel_count + counts.advanced_snivel_count;
    counts.attendance_percentage = percentage(counts.attendance_count, total_pilots);
    counts
}

/// Per-event and per-squadron totals. Each event is counted over the roster
/// pilots active on its date; nothing carries over between events.
pub fn aggregate(events: &[Event], classifications: &Classifications, roster: &[Pilot]) -> Aggregates {
    let mut aggregates = Aggregates::default();

    for event in events {
        let event_date = event.start_date();
        let considered: Vec<&Pilot> = roster
            .iter()
            .filter(|pilot| membership::is_active(&pilot.status_intervals, event_date))
            .collect();
        let category_of = |pilot: &Pilot| {
            classifications
                .get(&(pilot.id, event.id))
                .copied()
                .unwrap_or(Classification::NoResponse)
        };

        aggregates.event_metrics.push(EventMetrics {
            event_id: event.id,
            event_name: event.name.clone(),
            event_date,
            counts: count(considered.iter().map(|pilot| category_of(*pilot)), considered.len()),
        });

        let mut by_squadron: BTreeMap<SquadronKey, Vec<Classification>> = BTreeMap::new();
        for pilot in &considered {
            by_squadron
                .entry(SquadronKey::of(pilot))
                .or_default()
                .push(category_of(*pilot));
        }
        for (squadron, categories) in by_squadron {
            let total = categories.len();
            aggregates.squadron_metrics.push(SquadronMetrics {
                event_id: event.id,
                squadron,
                counts: count(categories, total),
            });
        }
    }

    aggregates
}

/// Cycle-wide totals across every event's metrics.
pub fn summarize(event_metrics: &[EventMetrics]) -> AttendanceCounts {
    let mut total = event_metrics
        .iter()
        .fold(AttendanceCounts::default(), |mut acc, metrics| {
            let c = &metrics.counts;
            acc.attendance_count += c.attendance_count;
            acc.no_show_count += c.no_show_count;
            acc.last_minute_snivel_count += c.last_minute_snivel_count;
            acc.advanced_snivel_count += c.advanced_snivel_count;
            acc.total_snivels_count += c.total_snivels_count;
            acc.no_response_count += c.no_response_count;
            acc.total_pilots += c.total_pilots;
            acc
        });
    total.attendance_percentage = percentage(total.attendance_count, total.total_pilots);
    total
}
