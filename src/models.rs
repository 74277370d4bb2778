use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInterval {
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
}

/// A pilot as the store knows it, before squadron and qualification lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PilotRecord {
    pub id: Uuid,
    pub callsign: String,
    pub board_number: i32,
    pub discord_id: Option<String>,
    #[serde(default)]
    pub status_intervals: Vec<StatusInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pilot {
    pub id: Uuid,
    pub callsign: String,
    pub board_number: i32,
    pub discord_id: Option<String>,
    pub squadron_id: Option<Uuid>,
    pub qualification_ids: Vec<Uuid>,
    pub status_intervals: Vec<StatusInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub cycle_id: Uuid,
    pub name: String,
    pub start_datetime: DateTime<Utc>,
    /// One entry per posting of the event to a messaging channel.
    #[serde(default)]
    pub discord_message_ids: Vec<String>,
}

impl Event {
    pub fn start_date(&self) -> NaiveDate {
        self.start_datetime.date_naive()
    }

    /// Response-channel identifiers, falling back to the manual roll-call bucket.
    pub fn response_keys(&self) -> Vec<String> {
        if self.discord_message_ids.is_empty() {
            vec![format!("manual-{}", self.id)]
        } else {
            self.discord_message_ids.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: Uuid,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Squadron {
    pub id: Uuid,
    pub name: String,
    pub designation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualification {
    pub id: Uuid,
    pub name: String,
    pub code: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RsvpValue {
    Accepted,
    Declined,
    Tentative,
}

impl RsvpValue {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accepted" => Some(Self::Accepted),
            "declined" => Some(Self::Declined),
            "tentative" => Some(Self::Tentative),
            _ => None,
        }
    }

    /// Declined or tentative: the pilot is backing out.
    pub fn is_withdrawal(self) -> bool {
        matches!(self, Self::Declined | Self::Tentative)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollCallValue {
    Present,
    Absent,
    Tentative,
}

impl RollCallValue {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "present" => Some(Self::Present),
            "absent" => Some(Self::Absent),
            "tentative" => Some(Self::Tentative),
            _ => None,
        }
    }
}

/// One raw RSVP and/or roll-call observation for a pilot on an event posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub discord_event_id: String,
    pub discord_id: String,
    pub rsvp: Option<RsvpValue>,
    pub roll_call: Option<RollCallValue>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Classification {
    Present,
    NoShow,
    LastMinuteSnivel,
    AdvancedSnivel,
    NoResponse,
}

impl Classification {
    pub const ALL: [Classification; 5] = [
        Classification::Present,
        Classification::NoShow,
        Classification::LastMinuteSnivel,
        Classification::AdvancedSnivel,
        Classification::NoResponse,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Classification::Present => "Present",
            Classification::NoShow => "No Show",
            Classification::LastMinuteSnivel => "Last Minute Snivel",
            Classification::AdvancedSnivel => "Advanced Snivel",
            Classification::NoResponse => "No Response",
        }
    }
}

/// User-selected narrowing of a report. Empty sets mean "no filter".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportFilters {
    #[serde(default)]
    pub squadron_ids: BTreeSet<Uuid>,
    #[serde(default)]
    pub qualification_ids: BTreeSet<Uuid>,
    #[serde(default)]
    pub pilot_ids: BTreeSet<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SquadronKey {
    Assigned(Uuid),
    Unassigned,
}

impl SquadronKey {
    pub fn of(pilot: &Pilot) -> Self {
        pilot
            .squadron_id
            .map_or(SquadronKey::Unassigned, SquadronKey::Assigned)
    }
}

impl fmt::Display for SquadronKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SquadronKey::Assigned(id) => write!(f, "{id}"),
            SquadronKey::Unassigned => f.write_str("unassigned"),
        }
    }
}

impl Serialize for SquadronKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Counts shared by per-event and per-squadron metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceCounts {
    pub attendance_count: usize,
    pub no_show_count: usize,
    pub last_minute_snivel_count: usize,
    pub advanced_snivel_count: usize,
    pub total_snivels_count: usize,
    pub no_response_count: usize,
    pub total_pilots: usize,
    pub attendance_percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventMetrics {
    pub event_id: Uuid,
    pub event_name: String,
    pub event_date: NaiveDate,
    #[serde(flatten)]
    pub counts: AttendanceCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SquadronMetrics {
    pub event_id: Uuid,
    pub squadron: SquadronKey,
    #[serde(flatten)]
    pub counts: AttendanceCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PilotAttendance {
    pub pilot_id: Uuid,
    pub callsign: String,
    pub board_number: i32,
    pub squadron: SquadronKey,
    pub classification: Classification,
    pub history: Vec<ResponseRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventAttendance {
    pub event_id: Uuid,
    pub pilots: Vec<PilotAttendance>,
}
