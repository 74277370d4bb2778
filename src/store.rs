//! Read-only data access consumed by the reporting engine

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ReportError, Result};
use crate::models::{Cycle, Event, PilotRecord, Qualification, ResponseRecord, Squadron};

/// Queries the engine needs from the persistence layer.
///
/// Batch lookups take the whole pilot-id or response-key set so a roster of
/// any size costs one query per concern.
pub trait AttendanceStore: Send + Sync {
    fn get_cycle(&self, cycle_id: Uuid) -> impl Future<Output = Result<Option<Cycle>>> + Send;

    /// Events of `cycle_id` starting on a date within `[from, to]`, ordered by start.
    fn list_events(
        &self,
        cycle_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> impl Future<Output = Result<Vec<Event>>> + Send;

    /// Every pilot with their status-interval history.
    fn list_pilots(&self) -> impl Future<Output = Result<Vec<PilotRecord>>> + Send;

    /// Current squadron per pilot; pilots without an assignment are absent.
    fn squadron_assignments(
        &self,
        pilot_ids: &[Uuid],
    ) -> impl Future<Output = Result<HashMap<Uuid, Uuid>>> + Send;

    fn qualification_ids(
        &self,
        pilot_ids: &[Uuid],
    ) -> impl Future<Output = Result<HashMap<Uuid, Vec<Uuid>>>> + Send;

    /// Response rows for the given channel identifiers, oldest first.
    fn list_responses(
        &self,
        response_keys: &[String],
    ) -> impl Future<Output = Result<Vec<ResponseRecord>>> + Send;

    fn list_squadrons(&self) -> impl Future<Output = Result<Vec<Squadron>>> + Send;

    fn list_qualifications(&self) -> impl Future<Output = Result<Vec<Qualification>>> + Send;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SquadronAssignment {
    pub pilot_id: Uuid,
    pub squadron_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PilotQualification {
    pub pilot_id: Uuid,
    pub qualification_id: Uuid,
}

/// A point-in-time export of everything the engine reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub cycles: Vec<Cycle>,
    pub events: Vec<Event>,
    pub pilots: Vec<PilotRecord>,
    pub squadron_assignments: Vec<SquadronAssignment>,
    pub pilot_qualifications: Vec<PilotQualification>,
    pub responses: Vec<ResponseRecord>,
    pub squadrons: Vec<Squadron>,
    pub qualifications: Vec<Qualification>,
}

/// In-memory store over a [`Snapshot`].
#[derive(Debug, Clone, Default)]
pub struct SnapshotStore {
    snapshot: Snapshot,
}

impl SnapshotStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ReportError::Fetch(format!("reading {}: {e}", path.display())))?;
        let snapshot: Snapshot = serde_json::from_str(&raw)?;
        Ok(Self::new(snapshot))
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl AttendanceStore for SnapshotStore {
    async fn get_cycle(&self, cycle_id: Uuid) -> Result<Option<Cycle>> {
        Ok(self
            .snapshot
            .cycles
            .iter()
            .find(|cycle| cycle.id == cycle_id)
            .cloned())
    }

    async fn list_events(&self, cycle_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .snapshot
            .events
            .iter()
            .filter(|event| event.cycle_id == cycle_id)
            .filter(|event| (from..=to).contains(&event.start_date()))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.start_datetime);
        Ok(events)
    }

    async fn list_pilots(&self) -> Result<Vec<PilotRecord>> {
        Ok(self.snapshot.pilots.clone())
    }

    async fn squadron_assignments(&self, pilot_ids: &[Uuid]) -> Result<HashMap<Uuid, Uuid>> {
        Ok(self
            .snapshot
            .squadron_assignments
            .iter()
            .filter(|row| pilot_ids.contains(&row.pilot_id))
            .map(|row| (row.pilot_id, row.squadron_id))
            .collect())
    }

    async fn qualification_ids(&self, pilot_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Uuid>>> {
        let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for row in &self.snapshot.pilot_qualifications {
            if pilot_ids.contains(&row.pilot_id) {
                map.entry(row.pilot_id).or_default().push(row.qualification_id);
            }
        }
        Ok(map)
    }

    async fn list_responses(&self, response_keys: &[String]) -> Result<Vec<ResponseRecord>> {
        let mut rows: Vec<ResponseRecord> = self
            .snapshot
            .responses
            .iter()
            .filter(|row| response_keys.contains(&row.discord_event_id))
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.recorded_at);
        Ok(rows)
    }

    async fn list_squadrons(&self) -> Result<Vec<Squadron>> {
        Ok(self.snapshot.squadrons.clone())
    }

    async fn list_qualifications(&self) -> Result<Vec<Qualification>> {
        Ok(self.snapshot.qualifications.clone())
    }
}
