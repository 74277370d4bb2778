//! Attendance classification for one pilot on one event.
//!
//! The category comes from an ordered rule table: the first rule whose
//! predicate holds wins, and a pilot matching none is `NoResponse`.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Classification, ResponseRecord, RollCallValue, RsvpValue};

/// Tunables for the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long before event start a withdrawal counts as last-minute.
    pub snivel_window: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            snivel_window: Duration::hours(2),
        }
    }
}

/// The facts about a history that the rules look at.
#[derive(Debug, Clone)]
pub struct Evidence {
    /// RSVP values with their timestamps, oldest first.
    pub rsvps: Vec<(RsvpValue, DateTime<Utc>)>,
    pub latest_rsvp: Option<RsvpValue>,
    pub latest_roll_call: Option<RollCallValue>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl Evidence {
    pub fn gather(history: &[ResponseRecord], event_start: DateTime<Utc>, config: &EngineConfig) -> Self {
        let rsvps: Vec<_> = history
            .iter()
            .filter_map(|row| row.rsvp.map(|value| (value, row.recorded_at)))
            .collect();
        let latest_roll_call = history.iter().filter_map(|row| row.roll_call).last();

        Self {
            latest_rsvp: rsvps.last().map(|(value, _)| *value),
            rsvps,
            latest_roll_call,
            window_start: event_start - config.snivel_window,
            window_end: event_start,
        }
    }

    fn roll_call_present(&self) -> bool {
        self.latest_roll_call == Some(RollCallValue::Present)
    }

    fn in_snivel_window(&self, at: DateTime<Utc>) -> bool {
        self.window_start <= at && at <= self.window_end
    }
}

pub type Rule = fn(&Evidence) -> bool;

/// Evaluated top to bottom; order is the tie-break policy.
pub const RULES: [(Classification, Rule); 4] = [
    (Classification::Present, marked_present),
    (Classification::LastMinuteSnivel, withdrew_last_minute),
    (Classification::AdvancedSnivel, withdrew_in_advance),
    (Classification::NoShow, accepted_but_absent),
];

pub fn marked_present(evidence: &Evidence) -> bool {
    evidence.roll_call_present()
}

/// Any accepted -> declined/tentative step landing inside the window, not only the latest.
pub fn withdrew_last_minute(evidence: &Evidence) -> bool {
    evidence.rsvps.windows(2).any(|pair| {
        let (prev, _) = pair[0];
        let (curr, at) = pair[1];
        prev == RsvpValue::Accepted && curr.is_withdrawal() && evidence.in_snivel_window(at)
    })
}

pub fn withdrew_in_advance(evidence: &Evidence) -> bool {
    !evidence.roll_call_present() && evidence.latest_rsvp.is_some_and(RsvpValue::is_withdrawal)
}

pub fn accepted_but_absent(evidence: &Evidence) -> bool {
    !evidence.roll_call_present() && evidence.latest_rsvp == Some(RsvpValue::Accepted)
}

pub fn classify_evidence(evidence: &Evidence) -> Classification {
    RULES
        .iter()
        .find(|(_, rule)| rule(evidence))
        .map_or(Classification::NoResponse, |(category, _)| *category)
}

pub fn classify_with(
    config: &EngineConfig,
    history: &[ResponseRecord],
    event_start: DateTime<Utc>,
) -> Classification {
    classify_evidence(&Evidence::gather(history, event_start, config))
}

/// `history` must be one pilot's rows for one event, oldest first.
pub fn classify(history: &[ResponseRecord], event_start: DateTime<Utc>) -> Classification {
    classify_with(&EngineConfig::default(), history, event_start)
}
