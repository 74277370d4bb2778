//! Request coordination for attendance reports
//!
//! Identical concurrent requests share one computation, and only the most
//! recently started request may publish its result.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::EngineConfig;
use crate::error::Result;
use crate::models::ReportFilters;
use crate::report::{self, ReportPayload};
use crate::store::AttendanceStore;

type SharedReport = Shared<BoxFuture<'static, Result<Arc<ReportPayload>>>>;

/// Dedup key. Filters are sets, so equal selections compare equal in any order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub cycle_id: Uuid,
    pub filters: ReportFilters,
}

#[derive(Debug, Clone, Default)]
pub enum ReportState {
    #[default]
    Idle,
    Loading,
    Ready(Arc<ReportPayload>),
    Failed(String),
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Committed(Arc<ReportPayload>),
    /// A newer request started before this one finished; its result was dropped.
    Superseded,
}

struct InFlight {
    entry_id: u64,
    future: SharedReport,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    state: ReportState,
}

pub struct ReportCoordinator<S> {
    store: Arc<S>,
    config: EngineConfig,
    in_flight: Mutex<HashMap<RequestKey, InFlight>>,
    next_entry: AtomicU64,
    slot: RwLock<Slot>,
}

impl<S: AttendanceStore + 'static> ReportCoordinator<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            in_flight: Mutex::new(HashMap::new()),
            next_entry: AtomicU64::new(1),
            slot: RwLock::new(Slot::default()),
        }
    }

    pub fn state(&self) -> ReportState {
        self.slot.read().state.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Builds (or joins) the report for `cycle_id` and `filters`.
    ///
    /// Called on cycle selection, refresh, and every filter change. Errors of a
    /// superseded request are dropped along with its result.
    pub async fn fetch_report(&self, cycle_id: Uuid, filters: ReportFilters) -> Result<FetchOutcome> {
        let generation = {
            let mut slot = self.slot.write();
            slot.generation += 1;
            slot.state = ReportState::Loading;
            slot.generation
        };
        info!(%cycle_id, generation, "Report requested");

        let key = RequestKey { cycle_id, filters };
        let (entry_id, future) = self.join_or_start(&key);
        let mut pending = Pending {
            coordinator: self,
            key,
            entry_id,
            generation,
            settled: false,
        };
        let result = future.await;
        pending.settled = true;
        drop(pending);

        let mut slot = self.slot.write();
        if slot.generation != generation {
            debug!(%cycle_id, generation, latest = slot.generation, "Discarding superseded report");
            return Ok(FetchOutcome::Superseded);
        }

        match result {
            Ok(payload) => {
                slot.state = ReportState::Ready(Arc::clone(&payload));
                Ok(FetchOutcome::Committed(payload))
            }
            Err(err) => {
                warn!(%cycle_id, error = %err, "Report request failed");
                slot.state = ReportState::Failed(err.to_string());
                Err(err)
            }
        }
    }

    fn join_or_start(&self, key: &RequestKey) -> (u64, SharedReport) {
        let mut in_flight = self.in_flight.lock();
        if let Some(entry) = in_flight.get(key) {
            debug!(cycle_id = %key.cycle_id, "Joining in-flight report request");
            return (entry.entry_id, entry.future.clone());
        }

        let store = Arc::clone(&self.store);
        let config = self.config;
        let cycle_id = key.cycle_id;
        let filters = key.filters.clone();
        let future = async move {
            report::generate_report(store.as_ref(), &config, cycle_id, &filters)
                .await
                .map(Arc::new)
        }
        .boxed()
        .shared();

        let entry_id = self.next_entry.fetch_add(1, Ordering::Relaxed);
        in_flight.insert(
            key.clone(),
            InFlight {
                entry_id,
                future: future.clone(),
            },
        );
        (entry_id, future)
    }

    /// Drops the dedup entry unless a newer computation already replaced it.
    fn finish(&self, key: &RequestKey, entry_id: u64) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|entry| entry.entry_id == entry_id) {
            in_flight.remove(key);
        }
    }

    /// Undoes `Loading` for a request whose caller stopped waiting.
    fn abandon(&self, generation: u64) {
        let mut slot = self.slot.write();
        if slot.generation == generation && matches!(slot.state, ReportState::Loading) {
            slot.state = ReportState::Idle;
        }
    }
}

/// Cleans up after a `fetch_report` call, including one dropped mid-await.
struct Pending<'a, S: AttendanceStore + 'static> {
    coordinator: &'a ReportCoordinator<S>,
    key: RequestKey,
    entry_id: u64,
    generation: u64,
    settled: bool,
}

impl<S: AttendanceStore + 'static> Drop for Pending<'_, S> {
    fn drop(&mut self) {
        self.coordinator.finish(&self.key, self.entry_id);
        if !self.settled {
            debug!(cycle_id = %self.key.cycle_id, generation = self.generation, "Report request abandoned");
            self.coordinator.abandon(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReportError;
    use crate::models::{
        Cycle, Event, PilotRecord, Qualification, ResponseRecord, Squadron, StatusInterval,
    };
    use crate::store::{Snapshot, SnapshotStore, SquadronAssignment};
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Wraps a snapshot with call counting, scripted delays and failures.
    struct ScriptedStore {
        inner: SnapshotStore,
        cycle_calls: AtomicUsize,
        delays: Mutex<VecDeque<Duration>>,
        fail_pilots: bool,
    }

    impl ScriptedStore {
        fn new(inner: SnapshotStore, delays: &[u64]) -> Self {
            Self {
                inner,
                cycle_calls: AtomicUsize::new(0),
                delays: Mutex::new(delays.iter().map(|ms| Duration::from_millis(*ms)).collect()),
                fail_pilots: false,
            }
        }
    }

    impl AttendanceStore for ScriptedStore {
        async fn get_cycle(&self, cycle_id: Uuid) -> Result<Option<Cycle>> {
            self.cycle_calls.fetch_add(1, Ordering::SeqCst);
            let delay = self.delays.lock().pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.inner.get_cycle(cycle_id).await
        }

        async fn list_events(&self, cycle_id: Uuid, from: NaiveDate, to: NaiveDate) -> Result<Vec<Event>> {
            self.inner.list_events(cycle_id, from, to).await
        }

        async fn list_pilots(&self) -> Result<Vec<PilotRecord>> {
            if self.fail_pilots {
                return Err(ReportError::Fetch("connection reset".to_string()));
            }
            self.inner.list_pilots().await
        }

        async fn squadron_assignments(&self, pilot_ids: &[Uuid]) -> Result<HashMap<Uuid, Uuid>> {
            self.inner.squadron_assignments(pilot_ids).await
        }

        async fn qualification_ids(&self, pilot_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Uuid>>> {
            self.inner.qualification_ids(pilot_ids).await
        }

        async fn list_responses(&self, response_keys: &[String]) -> Result<Vec<ResponseRecord>> {
            self.inner.list_responses(response_keys).await
        }

        async fn list_squadrons(&self) -> Result<Vec<Squadron>> {
            self.inner.list_squadrons().await
        }

        async fn list_qualifications(&self) -> Result<Vec<Qualification>> {
            self.inner.list_qualifications().await
        }
    }

    fn snapshot() -> (SnapshotStore, Uuid, Uuid) {
        let cycle = Cycle {
            id: Uuid::new_v4(),
            name: "Cycle 3".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2025, 10, 31).unwrap(),
        };
        let squadron = Uuid::new_v4();
        let pilots: Vec<PilotRecord> = (0..6)
            .map(|n| PilotRecord {
                id: Uuid::new_v4(),
                callsign: format!("P{n}"),
                board_number: 100 + n,
                discord_id: None,
                status_intervals: vec![StatusInterval {
                    start_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                    end_date: None,
                    is_active: true,
                }],
            })
            .collect();
        let assignments = pilots
            .iter()
            .take(2)
            .map(|p| SquadronAssignment { pilot_id: p.id, squadron_id: squadron })
            .collect();
        let event = Event {
            id: Uuid::new_v4(),
            cycle_id: cycle.id,
            name: "Night Trap".to_string(),
            start_datetime: Utc.with_ymd_and_hms(2025, 10, 9, 21, 0, 0).unwrap(),
            discord_message_ids: Vec::new(),
        };
        let store = SnapshotStore::new(Snapshot {
            cycles: vec![cycle.clone()],
            events: vec![event],
            pilots,
            squadron_assignments: assignments,
            ..Snapshot::default()
        });
        (store, cycle.id, squadron)
    }

    #[tokio::test]
    async fn newer_request_wins_over_slower_older_one() {
        let (inner, cycle_id, squadron) = snapshot();
        let coordinator = ReportCoordinator::new(
            Arc::new(ScriptedStore::new(inner, &[60, 0])),
            EngineConfig::default(),
        );
        let narrowed = ReportFilters {
            squadron_ids: [squadron].into(),
            ..ReportFilters::default()
        };

        let (first, second) = tokio::join!(
            coordinator.fetch_report(cycle_id, ReportFilters::default()),
            coordinator.fetch_report(cycle_id, narrowed.clone()),
        );

        assert!(matches!(first.unwrap(), FetchOutcome::Superseded));
        assert!(matches!(second.unwrap(), FetchOutcome::Committed(_)));
        match coordinator.state() {
            ReportState::Ready(payload) => {
                assert_eq!(payload.filters, narrowed);
                assert_eq!(payload.chart_data[0].counts.total_pilots, 2);
            }
            other => panic!("expected ready state, got {other:?}"),
        }
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn identical_concurrent_requests_share_one_computation() {
        let (inner, cycle_id, _) = snapshot();
        let store = Arc::new(ScriptedStore::new(inner, &[20]));
        let coordinator = ReportCoordinator::new(Arc::clone(&store), EngineConfig::default());

        let (a, b) = tokio::join!(
            coordinator.fetch_report(cycle_id, ReportFilters::default()),
            coordinator.fetch_report(cycle_id, ReportFilters::default()),
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(store.cycle_calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.in_flight(), 0);

        let again = coordinator
            .fetch_report(cycle_id, ReportFilters::default())
            .await
            .unwrap();
        assert!(matches!(again, FetchOutcome::Committed(_)));
        assert_eq!(store.cycle_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fetch_failure_surfaces_and_marks_state() {
        let (inner, cycle_id, _) = snapshot();
        let mut store = ScriptedStore::new(inner, &[]);
        store.fail_pilots = true;
        let coordinator = ReportCoordinator::new(Arc::new(store), EngineConfig::default());

        let err = coordinator
            .fetch_report(cycle_id, ReportFilters::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReportError::Fetch("pilot status history: connection reset".to_string())
        );
        assert!(matches!(coordinator.state(), ReportState::Failed(msg) if msg.contains("connection reset")));
    }

    #[tokio::test]
    async fn superseded_failure_does_not_overwrite_newer_report() {
        let (inner, cycle_id, _) = snapshot();
        let coordinator = ReportCoordinator::new(
            Arc::new(ScriptedStore::new(inner, &[60, 0])),
            EngineConfig::default(),
        );
        let missing = Uuid::new_v4();

        let (first, second) = tokio::join!(
            coordinator.fetch_report(missing, ReportFilters::default()),
            coordinator.fetch_report(cycle_id, ReportFilters::default()),
        );

        assert!(matches!(first.unwrap(), FetchOutcome::Superseded));
        assert!(matches!(second.unwrap(), FetchOutcome::Committed(_)));
        match coordinator.state() {
            ReportState::Ready(payload) => assert_eq!(payload.cycle.id, cycle_id),
            other => panic!("expected ready state, got {other:?}"),
        }
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn abandoned_request_leaves_no_loading_state() {
        let (inner, cycle_id, _) = snapshot();
        let coordinator = ReportCoordinator::new(
            Arc::new(ScriptedStore::new(inner, &[200])),
            EngineConfig::default(),
        );

        let timed_out = tokio::time::timeout(
            Duration::from_millis(20),
            coordinator.fetch_report(cycle_id, ReportFilters::default()),
        )
        .await;

        assert!(timed_out.is_err());
        assert!(matches!(coordinator.state(), ReportState::Idle));
        assert_eq!(coordinator.in_flight(), 0);

        let retry = coordinator
            .fetch_report(cycle_id, ReportFilters::default())
            .await
            .unwrap();
        assert!(matches!(retry, FetchOutcome::Committed(_)));
        assert!(matches!(coordinator.state(), ReportState::Ready(_)));
    }

    #[tokio::test]
    async fn missing_cycle_is_reported() {
        let (inner, _, _) = snapshot();
        let coordinator = ReportCoordinator::new(
            Arc::new(ScriptedStore::new(inner, &[])),
            EngineConfig::default(),
        );
        let missing = Uuid::new_v4();

        let err = coordinator
            .fetch_report(missing, ReportFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::NotFound(_)));
        assert!(matches!(coordinator.state(), ReportState::Failed(_)));
    }
}
