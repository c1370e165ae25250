// Distress beacon session machine
//
// idle -> active -> completed. At most one active session. Every state
// change is written to the store first; the cached session, the ACK loop
// and the periodic trigger only move after the write succeeds.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::ack::AckLoop;
use super::schedule::BeaconScheduler;
use super::BeaconError;
use crate::clock::Clock;
use crate::message::{GpsFix, Severity};
use crate::store::{BeaconPosition, BeaconSession, BeaconStatus, MeshStore};

pub const INITIAL_INTERVAL_MINUTES: u32 = 5;
pub const ACKNOWLEDGED_INTERVAL_MINUTES: u32 = 15;
pub const DEFAULT_DRILL_MAX_TRANSMITS: u32 = 3;

const HOUR_MS: u64 = 60 * 60 * 1000;

/// Minutes between transmissions. Slows down to save battery over time.
pub fn beacon_interval_minutes(started_at: u64, now: u64, acknowledged: bool) -> u32 {
    if acknowledged {
        return ACKNOWLEDGED_INTERVAL_MINUTES;
    }
    let elapsed = now.saturating_sub(started_at);
    if elapsed < 6 * HOUR_MS {
        5
    } else if elapsed < 24 * HOUR_MS {
        15
    } else {
        30
    }
}

/// What a recorded transmission did to the session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransmissionOutcome {
    pub session: BeaconSession,
    pub interval_changed: bool,
    /// Drill reached its transmit limit and stopped
    pub completed: bool,
}

pub struct BeaconMachine {
    store: MeshStore,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn BeaconScheduler>,
    ack: AckLoop,
    drill_max_transmits: u32,
    active: Option<BeaconSession>,
}

impl BeaconMachine {
    pub fn new(
        store: MeshStore,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn BeaconScheduler>,
        ack: AckLoop,
    ) -> Self {
        Self {
            store,
            clock,
            scheduler,
            ack,
            drill_max_transmits: DEFAULT_DRILL_MAX_TRANSMITS,
            active: None,
        }
    }

    pub fn with_drill_limit(mut self, max_transmits: u32) -> Self {
        self.drill_max_transmits = max_transmits;
        self
    }

    /// Pick up a session left active by a previous run and re-arm its trigger
    pub fn restore(&mut self) -> Result<Option<&BeaconSession>, BeaconError> {
        let session = self.store.active_beacon_session()?;
        if let Some(session) = &session {
            info!(
                "Resuming beacon session {} ({} transmissions so far)",
                session.id, session.transmit_count
            );
            self.scheduler.register(minutes(session.interval_minutes));
        }
        self.active = session;
        Ok(self.active.as_ref())
    }

    pub fn active_session(&self) -> Option<&BeaconSession> {
        self.active.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn ack_loop(&self) -> &AckLoop {
        &self.ack
    }

    /// Position trail of the active session, oldest first
    pub fn positions(&self) -> Result<Vec<BeaconPosition>, BeaconError> {
        match &self.active {
            Some(session) => Ok(self.store.beacon_positions(session.id)?),
            None => Ok(Vec::new()),
        }
    }

    /// Start a new session. The caller sends the initial alert.
    pub fn activate(
        &mut self,
        codes: Vec<String>,
        freetext: Option<String>,
        severity: Severity,
        is_drill: bool,
    ) -> Result<&BeaconSession, BeaconError> {
        if let Some(existing) = &self.active {
            return Err(BeaconError::AlreadyActive(existing.id));
        }
        if let Some(existing) = self.store.active_beacon_session()? {
            return Err(BeaconError::AlreadyActive(existing.id));
        }

        let draft = BeaconSession {
            id: 0,
            original_codes: codes,
            original_freetext: freetext,
            severity,
            is_drill,
            started_at: self.clock.now_ms(),
            acknowledged_at: None,
            cancelled_at: None,
            ack_node_id: None,
            ack_display_name: None,
            interval_minutes: INITIAL_INTERVAL_MINUTES,
            transmit_count: 0,
            max_transmits: is_drill.then_some(self.drill_max_transmits),
            status: BeaconStatus::Active,
        };
        let session = self.store.insert_beacon_session(draft)?;
        info!(
            "Beacon session {} activated ({}{})",
            session.id,
            session.severity,
            if is_drill { ", drill" } else { "" }
        );

        self.scheduler.register(minutes(session.interval_minutes));
        Ok(self.active.insert(session))
    }

    /// Record one periodic transmission at `position`
    pub fn record_transmission(
        &mut self,
        position: GpsFix,
    ) -> Result<TransmissionOutcome, BeaconError> {
        let current = self.active.as_ref().ok_or(BeaconError::NoActiveSession)?;
        let now = self.clock.now_ms();

        let mut updated = current.clone();
        updated.transmit_count += 1;
        updated.interval_minutes =
            beacon_interval_minutes(updated.started_at, now, updated.is_acknowledged());
        let completed = updated
            .max_transmits
            .is_some_and(|max| updated.transmit_count >= max);
        if completed {
            updated.status = BeaconStatus::Completed;
        }
        let interval_changed = updated.interval_minutes != current.interval_minutes;

        let fix = BeaconPosition {
            id: 0,
            session_id: updated.id,
            lat: position.lat,
            lon: position.lon,
            timestamp: now,
        };
        self.store.record_beacon_transmission(&updated, fix)?;

        if completed {
            info!(
                "Drill beacon {} finished after {} transmissions",
                updated.id, updated.transmit_count
            );
            self.ack.clear();
            self.scheduler.unregister();
            self.active = None;
        } else {
            if interval_changed {
                debug!(
                    "Beacon interval {} -> {} min",
                    current.interval_minutes, updated.interval_minutes
                );
                self.rearm(updated.interval_minutes);
            }
            self.active = Some(updated.clone());
        }

        Ok(TransmissionOutcome {
            session: updated,
            interval_changed,
            completed,
        })
    }

    /// Someone answered with B02. Slows the beacon and resolves the ACK loop.
    pub fn acknowledge(
        &mut self,
        node_id: &str,
        display_name: Option<&str>,
    ) -> Result<&BeaconSession, BeaconError> {
        let current = self.active.as_ref().ok_or(BeaconError::NoActiveSession)?;

        let mut updated = current.clone();
        updated.acknowledged_at = Some(self.clock.now_ms());
        updated.ack_node_id = Some(node_id.to_string());
        updated.ack_display_name = display_name.map(str::to_string);
        updated.interval_minutes = ACKNOWLEDGED_INTERVAL_MINUTES;
        self.store.update_beacon_session(&updated)?;

        if updated.interval_minutes != current.interval_minutes {
            self.rearm(updated.interval_minutes);
        }
        self.ack.acknowledge(node_id, display_name);
        info!("Beacon session {} acknowledged by {}", updated.id, node_id);
        Ok(self.active.insert(updated))
    }

    /// Stop the active session. Returns the cancelled session, or `None` when idle.
    ///
    /// The ACK timer and periodic trigger are stopped before this returns.
    pub fn cancel(&mut self) -> Result<Option<BeaconSession>, BeaconError> {
        let Some(current) = self.active.as_ref() else {
            return Ok(None);
        };

        let mut cancelled = current.clone();
        cancelled.status = BeaconStatus::Completed;
        cancelled.cancelled_at = Some(self.clock.now_ms());
        if let Err(e) = self.store.update_beacon_session(&cancelled) {
            warn!("Could not persist cancellation of beacon {}: {}", cancelled.id, e);
            return Err(e.into());
        }

        self.ack.clear();
        self.scheduler.unregister();
        self.active = None;
        info!("Beacon session {} cancelled", cancelled.id);
        Ok(Some(cancelled))
    }

    fn rearm(&self, interval_minutes: u32) {
        self.scheduler.unregister();
        self.scheduler.register(minutes(interval_minutes));
    }
}

fn minutes(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::{AckState, ManualTrigger};
    use crate::clock::ManualClock;
    use crate::store::backend::FailingStorage;

    struct Harness {
        machine: BeaconMachine,
        store: MeshStore,
        clock: Arc<ManualClock>,
        trigger: Arc<ManualTrigger>,
    }

    fn harness() -> Harness {
        harness_on(MeshStore::in_memory())
    }

    fn harness_on(store: MeshStore) -> Harness {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let trigger = Arc::new(ManualTrigger::new());
        let machine = machine(&store, &clock, &trigger);
        Harness {
            machine,
            store,
            clock,
            trigger,
        }
    }

    fn machine(
        store: &MeshStore,
        clock: &Arc<ManualClock>,
        trigger: &Arc<ManualTrigger>,
    ) -> BeaconMachine {
        BeaconMachine::new(store.clone(), clock.clone(), trigger.clone(), AckLoop::default())
    }

    /// Harness whose store can be told to refuse session writes
    fn flaky_harness() -> (Harness, FailingStorage) {
        let backend = FailingStorage::new();
        let h = harness_on(MeshStore::new(Arc::new(backend.clone())));
        (h, backend)
    }

    fn codes() -> Vec<String> {
        vec!["M01".to_string(), "T01".to_string()]
    }

    const FIX: GpsFix = GpsFix {
        lat: 48.652,
        lon: 20.1305,
    };

    #[test]
    fn test_interval_schedule() {
        let start = 0;
        assert_eq!(beacon_interval_minutes(start, 0, false), 5);
        assert_eq!(beacon_interval_minutes(start, 6 * HOUR_MS - 1, false), 5);
        assert_eq!(beacon_interval_minutes(start, 6 * HOUR_MS, false), 15);
        assert_eq!(beacon_interval_minutes(start, 24 * HOUR_MS, false), 30);
        assert_eq!(beacon_interval_minutes(start, 48 * HOUR_MS, true), 15);
        assert_eq!(beacon_interval_minutes(start, 0, true), 15);
    }

    #[test]
    fn test_activate_defaults() {
        let mut h = harness();
        let session = h
            .machine
            .activate(codes(), Some("2pax".into()), Severity::Mayday, false)
            .unwrap()
            .clone();

        assert_eq!(session.interval_minutes, 5);
        assert_eq!(session.transmit_count, 0);
        assert_eq!(session.max_transmits, None);
        assert_eq!(session.status, BeaconStatus::Active);
        assert_eq!(h.trigger.interval(), Some(Duration::from_secs(300)));
        assert_eq!(h.store.active_beacon_session().unwrap(), Some(session));
    }

    #[test]
    fn test_activate_twice_fails() {
        let mut h = harness();
        let first = h.machine.activate(codes(), None, Severity::Mayday, false).unwrap().id;

        let err = h
            .machine
            .activate(vec!["W01".into()], None, Severity::Safety, false)
            .unwrap_err();
        assert!(matches!(err, BeaconError::AlreadyActive(id) if id == first));
        let active = h.machine.active_session().unwrap();
        assert_eq!(active.id, first);
        assert_eq!(active.original_codes, codes());
        assert_eq!(h.trigger.registrations(), 1);
    }

    #[test]
    fn test_escalation_over_time() {
        let mut h = harness();
        h.machine.activate(codes(), None, Severity::Mayday, false).unwrap();

        let outcome = h.machine.record_transmission(FIX).unwrap();
        assert!(!outcome.interval_changed);
        assert_eq!(outcome.session.transmit_count, 1);

        h.clock.advance(Duration::from_secs(6 * 3600));
        let outcome = h.machine.record_transmission(FIX).unwrap();
        assert!(outcome.interval_changed);
        assert_eq!(outcome.session.interval_minutes, 15);
        assert_eq!(h.trigger.interval(), Some(Duration::from_secs(900)));

        h.clock.advance(Duration::from_secs(18 * 3600));
        let outcome = h.machine.record_transmission(FIX).unwrap();
        assert_eq!(outcome.session.interval_minutes, 30);
        assert_eq!(h.machine.positions().unwrap().len(), 3);
    }

    #[test]
    fn test_acknowledge_slows_beacon() {
        let mut h = harness();
        h.machine.activate(codes(), None, Severity::Mayday, false).unwrap();
        let session = h.machine.acknowledge("!rescue", Some("Horska sluzba")).unwrap().clone();

        assert_eq!(session.interval_minutes, 15);
        assert_eq!(session.ack_node_id.as_deref(), Some("!rescue"));
        assert!(session.acknowledged_at.is_some());
        assert_eq!(h.machine.ack_loop().state(), AckState::Acknowledged);
        assert_eq!(h.trigger.interval(), Some(Duration::from_secs(900)));

        // Stays at 15 even inside the first six hours
        let outcome = h.machine.record_transmission(FIX).unwrap();
        assert_eq!(outcome.session.interval_minutes, 15);
        assert!(!outcome.interval_changed);
    }

    #[test]
    fn test_acknowledge_without_session() {
        let mut h = harness();
        assert!(matches!(
            h.machine.acknowledge("!x", None),
            Err(BeaconError::NoActiveSession)
        ));
        assert!(matches!(
            h.machine.record_transmission(FIX),
            Err(BeaconError::NoActiveSession)
        ));
    }

    #[test]
    fn test_drill_auto_stop() {
        let mut h = harness();
        let session = h
            .machine
            .activate(vec!["D01".into(), "M01".into()], None, Severity::Mayday, true)
            .unwrap()
            .clone();
        assert_eq!(session.max_transmits, Some(3));

        assert!(!h.machine.record_transmission(FIX).unwrap().completed);
        assert!(!h.machine.record_transmission(FIX).unwrap().completed);
        let outcome = h.machine.record_transmission(FIX).unwrap();

        assert!(outcome.completed);
        assert_eq!(outcome.session.status, BeaconStatus::Completed);
        assert!(!h.machine.is_active());
        assert_eq!(h.trigger.interval(), None);
        assert_eq!(h.machine.ack_loop().state(), AckState::Idle);
        assert_eq!(h.store.active_beacon_session().unwrap(), None);
        assert_eq!(h.store.beacon_positions(session.id).unwrap().len(), 3);
    }

    #[test]
    fn test_custom_drill_limit() {
        let mut h = harness();
        h.machine = machine(&h.store, &h.clock, &h.trigger).with_drill_limit(1);
        h.machine.activate(vec!["D02".into()], None, Severity::Routine, true).unwrap();
        assert!(h.machine.record_transmission(FIX).unwrap().completed);
    }

    #[test]
    fn test_cancel() {
        let mut h = harness();
        assert_eq!(h.machine.cancel().unwrap(), None);

        h.machine.activate(codes(), None, Severity::Mayday, false).unwrap();
        let cancelled = h.machine.cancel().unwrap().unwrap();

        assert_eq!(cancelled.status, BeaconStatus::Completed);
        assert!(cancelled.cancelled_at.is_some());
        assert_eq!(h.trigger.interval(), None);
        assert!(!h.machine.is_active());

        // A new session may start afterwards
        assert!(h.machine.activate(codes(), None, Severity::Mayday, false).is_ok());
    }

    #[test]
    fn test_restore_resumes() {
        let mut h = harness();
        let id = h.machine.activate(codes(), None, Severity::Urgent, false).unwrap().id;
        h.clock.advance(Duration::from_secs(7 * 3600));
        h.machine.record_transmission(FIX).unwrap();

        let trigger = Arc::new(ManualTrigger::new());
        let mut restarted = machine(&h.store, &h.clock, &trigger);
        let restored = restarted.restore().unwrap().cloned().unwrap();

        assert_eq!(restored.id, id);
        assert_eq!(restored.transmit_count, 1);
        assert_eq!(trigger.interval(), Some(Duration::from_secs(900)));
        assert!(matches!(
            restarted.activate(codes(), None, Severity::Mayday, false),
            Err(BeaconError::AlreadyActive(_))
        ));
    }

    #[test]
    fn test_failed_activate_changes_nothing() {
        let (mut h, backend) = flaky_harness();
        backend.fail_writes_under("beacon_sessions/");

        let err = h
            .machine
            .activate(codes(), None, Severity::Mayday, false)
            .unwrap_err();
        assert!(matches!(err, BeaconError::Store(_)));
        assert!(!h.machine.is_active());
        assert_eq!(h.trigger.registrations(), 0);
        assert_eq!(h.machine.ack_loop().state(), AckState::Idle);
        assert!(h.store.beacon_sessions().unwrap().is_empty());

        backend.heal();
        assert!(h.machine.activate(codes(), None, Severity::Mayday, false).is_ok());
    }

    #[test]
    fn test_failed_transmission_leaves_no_orphan_position() {
        let (mut h, backend) = flaky_harness();
        let session = h
            .machine
            .activate(codes(), None, Severity::Mayday, false)
            .unwrap()
            .clone();
        backend.fail_writes_under("beacon_sessions/");

        assert!(h.machine.record_transmission(FIX).is_err());
        assert_eq!(h.machine.active_session().unwrap().transmit_count, 0);
        assert_eq!(h.store.beacon_session(session.id).unwrap().unwrap().transmit_count, 0);
        assert!(h.store.beacon_positions(session.id).unwrap().is_empty());

        backend.heal();
        let outcome = h.machine.record_transmission(FIX).unwrap();
        assert_eq!(outcome.session.transmit_count, 1);
        assert_eq!(h.store.beacon_positions(session.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_acknowledge_keeps_session() {
        let (mut h, backend) = flaky_harness();
        let before = h
            .machine
            .activate(codes(), None, Severity::Mayday, false)
            .unwrap()
            .clone();
        h.machine.ack_loop().start(h.clock.now_ms());
        backend.fail_writes_under("beacon_sessions/");

        assert!(h.machine.acknowledge("!rescue", Some("Horska sluzba")).is_err());
        assert_eq!(h.machine.active_session(), Some(&before));
        assert_eq!(h.trigger.interval(), Some(Duration::from_secs(300)));
        assert_eq!(h.trigger.registrations(), 1);
        assert_eq!(h.machine.ack_loop().state(), AckState::Waiting);
        assert_eq!(h.store.active_beacon_session().unwrap(), Some(before));
    }

    #[tokio::test]
    async fn test_failed_cancel_keeps_beacon_running() {
        let (mut h, backend) = flaky_harness();
        let before = h
            .machine
            .activate(codes(), None, Severity::Mayday, false)
            .unwrap()
            .clone();
        h.machine.ack_loop().start(h.clock.now_ms());
        backend.fail_writes_under("beacon_sessions/");

        assert!(h.machine.cancel().is_err());
        assert_eq!(h.machine.active_session(), Some(&before));
        assert_eq!(h.trigger.interval(), Some(Duration::from_secs(300)));
        assert_eq!(h.machine.ack_loop().state(), AckState::Waiting);
        assert!(h.machine.ack_loop().has_live_timer());
        assert_eq!(h.store.active_beacon_session().unwrap(), Some(before));
    }
}
