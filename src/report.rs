use std::collections::HashMap;
use std::fmt::Write;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::classify::{self, EngineConfig};
use crate::error::{ReportError, Result};
use crate::history;
use crate::metrics::{self, Classifications};
use crate::models::{
    AttendanceCounts, Classification, Cycle, Event, EventAttendance, EventMetrics, Pilot,
    PilotAttendance, Qualification, ReportFilters, Squadron, SquadronKey, SquadronMetrics,
};
use crate::roster;
use crate::store::AttendanceStore;

/// Which empty state, if any, a report is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataState {
    /// The cycle has no events in its date range.
    NoEvents,
    /// Events exist but no matching pilot was active on any event date.
    NoPilots,
    Populated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPayload {
    pub cycle: Cycle,
    pub filters: ReportFilters,
    pub events: Vec<Event>,
    pub chart_data: Vec<EventMetrics>,
    pub squadron_metrics: Vec<SquadronMetrics>,
    pub attendance: Vec<EventAttendance>,
    pub summary: AttendanceCounts,
    pub roster_size: usize,
    pub squadrons: Vec<Squadron>,
    pub qualifications: Vec<Qualification>,
    /// Every pilot active during the cycle, ignoring filters.
    pub pilots: Vec<Pilot>,
}

impl ReportPayload {
    pub fn data_state(&self) -> DataState {
        if self.events.is_empty() {
            DataState::NoEvents
        } else if self.chart_data.iter().all(|m| m.counts.total_pilots == 0) {
            DataState::NoPilots
        } else {
            DataState::Populated
        }
    }

    pub fn squadron_metrics_for(&self, event_id: Uuid) -> impl Iterator<Item = &SquadronMetrics> {
        self.squadron_metrics
            .iter()
            .filter(move |metrics| metrics.event_id == event_id)
    }
}

/// Runs the whole pipeline for one cycle and filter set against the current data.
pub async fn generate_report<S: AttendanceStore>(
    store: &S,
    config: &EngineConfig,
    cycle_id: Uuid,
    filters: &ReportFilters,
) -> Result<ReportPayload> {
    let cycle = store
        .get_cycle(cycle_id)
        .await
        .map_err(|e| e.context("cycle lookup"))?
        .ok_or_else(|| ReportError::NotFound(cycle_id.to_string()))?;

    let (events, squadrons, qualifications) = futures::try_join!(
        store.list_events(cycle.id, cycle.start_date, cycle.end_date),
        store.list_squadrons(),
        store.list_qualifications(),
    )
    .map_err(|e| e.context("cycle events and lookups"))?;

    let candidates = roster::load_candidates(store, cycle.start_date, cycle.end_date).await?;
    let roster = roster::apply_filters(&candidates, filters);
    let histories = history::collect_histories(store, &events, &roster).await?;

    let starts: HashMap<Uuid, _> = events.iter().map(|e| (e.id, e.start_datetime)).collect();
    let classifications: Classifications = histories
        .iter()
        .filter_map(|(&(pilot_id, event_id), rows)| {
            let start = starts.get(&event_id)?;
            Some(((pilot_id, event_id), classify::classify_with(config, rows, *start)))
        })
        .collect();

    let aggregates = metrics::aggregate(&events, &classifications, &roster);
    let attendance = events
        .iter()
        .map(|event| EventAttendance {
            event_id: event.id,
            pilots: roster
                .iter()
                .filter_map(|pilot| {
                    let key = (pilot.id, event.id);
                    Some(PilotAttendance {
                        pilot_id: pilot.id,
                        callsign: pilot.callsign.clone(),
                        board_number: pilot.board_number,
                        squadron: SquadronKey::of(pilot),
                        classification: *classifications.get(&key)?,
                        history: histories.get(&key).cloned().unwrap_or_default(),
                    })
                })
                .collect(),
        })
        .collect();

    info!(
        cycle = %cycle.name,
        events = events.len(),
        candidates = candidates.len(),
        roster = roster.len(),
        "Built attendance report"
    );

    Ok(ReportPayload {
        summary: metrics::summarize(&aggregates.event_metrics),
        roster_size: roster.len(),
        chart_data: aggregates.event_metrics,
        squadron_metrics: aggregates.squadron_metrics,
        attendance,
        cycle,
        filters: filters.clone(),
        events,
        squadrons,
        qualifications,
        pilots: candidates,
    })
}

pub const CSV_HEADER: [&str; 8] = [
    "Event Name",
    "Event Date",
    "Attendance Count",
    "Total Pilots",
    "Attendance %",
    "No Show Count",
    "Last Minute Snivel Count",
    "Advanced Snivel Count",
];

/// One quoted row per event.
pub fn export_csv(chart_data: &[EventMetrics]) -> anyhow::Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .quote_style(csv::QuoteStyle::Always)
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for metrics in chart_data {
        let c = &metrics.counts;
        writer.write_record([
            metrics.event_name.clone(),
            metrics.event_date.format("%Y-%m-%d").to_string(),
            c.attendance_count.to_string(),
            c.total_pilots.to_string(),
            c.attendance_percentage.to_string(),
            c.no_show_count.to_string(),
            c.last_minute_snivel_count.to_string(),
            c.advanced_snivel_count.to_string(),
        ])?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

/// Pilots ranked by total snivels across the report, most first.
pub fn snivel_leaders(payload: &ReportPayload) -> Vec<(&str, i32, usize)> {
    let mut tally: HashMap<Uuid, (&str, i32, usize)> = HashMap::new();
    for event in &payload.attendance {
        for pilot in &event.pilots {
            if matches!(
                pilot.classification,
                Classification::LastMinuteSnivel | Classification::AdvancedSnivel
            ) {
                tally
                    .entry(pilot.pilot_id)
                    .or_insert((pilot.callsign.as_str(), pilot.board_number, 0))
                    .2 += 1;
            }
        }
    }

    let mut leaders: Vec<_> = tally.into_values().collect();
    leaders.sort_by(|a, b| b.2.cmp(&a.2).then(a.1.cmp(&b.1)));
    leaders
}

pub fn build_markdown(payload: &ReportPayload) -> String {
    let mut output = String::new();
    let cycle = &payload.cycle;

    let _ = writeln!(output, "# Attendance Report: {}", cycle.name);
    let _ = writeln!(
        output,
        "Cycle {} to {} ({} pilots in scope)",
        cycle.start_date, cycle.end_date, payload.roster_size
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Event Attendance");

    match payload.data_state() {
        DataState::NoEvents => {
            let _ = writeln!(output, "No events scheduled in this cycle.");
        }
        DataState::NoPilots => {
            let _ = writeln!(output, "No active pilots match the selected filters.");
        }
        DataState::Populated => {
            for metrics in &payload.chart_data {
                let c = &metrics.counts;
                let _ = writeln!(
                    output,
                    "- {} ({}): {}/{} present ({}%), {} no-show, {} last-minute snivels, {} advanced snivels, {} no response",
                    metrics.event_name,
                    metrics.event_date,
                    c.attendance_count,
                    c.total_pilots,
                    c.attendance_percentage,
                    c.no_show_count,
                    c.last_minute_snivel_count,
                    c.advanced_snivel_count,
                    c.no_response_count
                );
            }
        }
    }

    let summary = &payload.summary;
    let _ = writeln!(output);
    let _ = writeln!(output, "## Cycle Totals");
    let _ = writeln!(
        output,
        "- Attendance: {} of {} pilot-events ({}%)",
        summary.attendance_count, summary.total_pilots, summary.attendance_percentage
    );
    let _ = writeln!(output, "- Snivels: {}", summary.total_snivels_count);
    let _ = writeln!(output, "- No-shows: {}", summary.no_show_count);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Most Frequent Snivels");
    let leaders = snivel_leaders(payload);
    if leaders.is_empty() {
        let _ = writeln!(output, "No snivels recorded for this cycle.");
    } else {
        for (callsign, board_number, snivels) in leaders.iter().take(5) {
            let _ = writeln!(output, "- {callsign} ({board_number}): {snivels}");
        }
    }

    output
}
