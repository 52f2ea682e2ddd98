//! Read cycle: `Idle -> Pending -> Sent -> Received -> Idle`.

use super::{CycleState, Dispatcher, ReadOutcome, SyncEngine, lowercase_results};
use crate::client::BulkResponse;
use crate::models::point::{Actor, error_value, is_error_value};
use crate::models::status::{ConnectionError, SyncStatus};
use crate::services::scheduler::{Scheduler, Timer};
use log::{debug, warn};
use std::time::Duration;

impl<S: Scheduler, D: Dispatcher> SyncEngine<S, D> {
    /// Arm the next poll after `delay`. Re-arming before it fires replaces the
    /// pending poll. Does nothing without observers or while a read is in flight.
    pub fn start_refresh(&mut self, delay: Duration) -> bool {
        if !self.active || !self.events.has_subscribers() {
            debug!("read cycle: refresh skipped, no observers");
            return false;
        }
        if self.read == CycleState::Sent {
            return false;
        }
        self.scheduler.schedule(Timer::Refresh, delay);
        self.set_read_state(CycleState::Pending);
        true
    }

    /// Cancel the pending poll. A read already in flight keeps its `Sent` state
    /// and still completes, so a second read cannot start before it answers.
    pub fn stop_refresh(&mut self) {
        self.scheduler.cancel(Timer::Refresh);
        if self.read != CycleState::Sent {
            self.set_read_state(CycleState::Idle);
        }
    }

    pub(super) fn fire_refresh(&mut self) {
        if self.read != CycleState::Pending {
            return;
        }
        let references = self.stat.references(false);
        if references.is_empty() {
            debug!("read cycle: no references to read");
            self.set_read_state(CycleState::Idle);
            return;
        }
        debug!("read cycle: reading {} reference(s)", references.len());
        self.dispatcher.bulk_read(references);
        self.set_read_state(CycleState::Sent);
    }

    /// Apply the answer to the read in flight.
    pub fn on_read_complete(&mut self, response: BulkResponse) -> ReadOutcome {
        if !self.active {
            debug!("read cycle: response after shutdown ignored");
            return ReadOutcome::Ignored;
        }
        self.set_read_state(CycleState::Received);

        if let Some(error) = ConnectionError::from_status(response.status) {
            self.stale = false;
            return self.read_failed(error);
        }

        if self.stale {
            debug!("read cycle: response predates a write, discarded");
            self.stale = false;
            self.set_read_state(CycleState::Idle);
            self.start_refresh(Duration::ZERO);
            return ReadOutcome::Discarded;
        }

        let results = lowercase_results(&response);
        let mut updates = Vec::new();
        for (role, point) in self.stat.get_points(false) {
            let Some(result) = results.get(&point.reference().to_lowercase()) else {
                continue;
            };
            let value = match (&result.value, &result.error_text) {
                (Some(value), _) => value.clone(),
                (None, Some(text)) => error_value(text),
                (None, None) => continue,
            };
            updates.push((role, value));
        }

        let mut status = SyncStatus::Ok;
        for (role, value) in updates {
            if is_error_value(&value) {
                status = SyncStatus::Point(value.clone());
            }
            self.stat.apply(role, &value, Actor::System);
        }

        self.read_budget.reset();
        self.emit_status(status);
        self.emit_data();
        self.set_read_state(CycleState::Idle);
        self.start_refresh(self.settings.poll_interval);
        ReadOutcome::Applied
    }

    fn read_failed(&mut self, error: ConnectionError) -> ReadOutcome {
        if self.read_budget.consume() {
            warn!(
                "read cycle: {} ({}), {} retr{} left",
                error,
                error.code(),
                self.read_budget.remaining(),
                if self.read_budget.remaining() == 1 { "y" } else { "ies" }
            );
            self.emit_status(SyncStatus::Connection(error));
            self.set_read_state(CycleState::Idle);
            self.start_refresh(self.settings.poll_interval);
            ReadOutcome::Retrying
        } else {
            warn!("read cycle: {} ({}), polling stopped", error, error.code());
            self.read_budget.reset();
            self.emit_status(SyncStatus::Connection(error));
            self.stop_refresh();
            ReadOutcome::Halted
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::client::{BulkResponse, PointResult};
    use crate::models::role::PointRole;
    use crate::models::stat::tests::{BLINDS_REF, FAN_REF, LIGHTS_REF, SETPOINT_REF, TEMP_REF};
    use crate::models::status::{ConnectionError, SyncStatus};
    use crate::services::events::SyncEvent;
    use crate::services::scheduler::{Scheduler, Timer};
    use crate::services::sync::testing::*;
    use crate::services::sync::{CycleState, ReadOutcome};
    use std::time::Duration;

    #[test]
    fn repeated_start_refresh_yields_one_read() {
        let (mut engine, _rx) = engine();
        assert!(engine.start_refresh(Duration::from_millis(500)));
        advance(&mut engine, Duration::from_millis(300));
        assert!(engine.start_refresh(Duration::from_millis(500)));
        advance(&mut engine, Duration::from_millis(300));
        assert!(engine.dispatcher().reads.is_empty());

        advance(&mut engine, Duration::from_secs(1));
        assert_eq!(engine.dispatcher().reads.len(), 1);
        assert_eq!(engine.read_state(), CycleState::Sent);
        assert_eq!(engine.dispatcher().reads[0].len(), 5);
    }

    #[test]
    fn start_refresh_needs_an_observer_and_no_read_in_flight() {
        let mut unobserved = crate::services::sync::SyncEngine::new(
            crate::models::stat::tests::loaded_stat(),
            Default::default(),
            crate::services::scheduler::ManualScheduler::default(),
            RecordingDispatcher::default(),
        );
        assert!(!unobserved.start_refresh(Duration::ZERO));
        assert_eq!(unobserved.read_state(), CycleState::Idle);

        let (mut engine, _rx) = engine();
        engine.start_refresh(Duration::ZERO);
        advance(&mut engine, Duration::ZERO);
        assert!(!engine.start_refresh(Duration::ZERO));
        assert!(!engine.scheduler().is_scheduled(Timer::Refresh));
    }

    #[test]
    fn empty_stat_does_not_read() {
        let (mut engine, _rx) = engine();
        engine.stat_mut().load_from_representation(&serde_json::json!({ "empty": {} }));
        engine.start_refresh(Duration::ZERO);
        advance(&mut engine, Duration::ZERO);
        assert!(engine.dispatcher().reads.is_empty());
        assert_eq!(engine.read_state(), CycleState::Idle);
    }

    #[test]
    fn successful_read_applies_values_case_insensitively() {
        let (mut engine, rx) = engine();
        engine.start_refresh(Duration::ZERO);
        advance(&mut engine, Duration::ZERO);

        let upper = TEMP_REF.to_uppercase();
        let outcome = engine.on_read_complete(values(&[
            (upper.as_str(), "20.8"),
            (BLINDS_REF, "75"),
            ("/.bacnet/Other/1/analog-value,1", "99"),
        ]));
        assert_eq!(outcome, ReadOutcome::Applied);
        assert_eq!(engine.stat().point(PointRole::Temp).value(), "20.8");
        assert_eq!(engine.stat().point(PointRole::Blinds).value(), "75");
        assert_eq!(engine.stat().point(PointRole::TempSetpoint).value(), "22");
        assert_eq!(
            drain(&rx),
            vec![SyncEvent::StatusUpdated(SyncStatus::Ok), SyncEvent::DataUpdated]
        );
        assert_eq!(engine.read_state(), CycleState::Pending);
        assert_eq!(engine.scheduler().due_in(Timer::Refresh), Some(Duration::from_secs(10)));
    }

    #[test]
    fn read_keeps_pending_user_edit() {
        let (mut engine, _rx) = engine();
        engine.start_refresh(Duration::ZERO);
        advance(&mut engine, Duration::ZERO);
        engine.set_value(PointRole::TempSetpoint, "25");

        engine.on_read_complete(values(&[(SETPOINT_REF, "22.5")]));
        let setpoint = engine.stat().point(PointRole::TempSetpoint);
        assert_eq!(setpoint.value(), "25");
        assert_eq!(setpoint.old_value(), "22.5");
        assert!(setpoint.is_dirty());
    }

    #[test]
    fn point_errors_become_the_status() {
        let (mut engine, rx) = engine();
        engine.start_refresh(Duration::ZERO);
        advance(&mut engine, Duration::ZERO);

        let mut response = values(&[(TEMP_REF, "QERR_CLASS_OBJECT::QERR_CODE_UNKNOWN_OBJECT")]);
        response.values.insert(
            FAN_REF.to_string(),
            PointResult {
                value: None,
                error_text: Some("CLASS_OS::QERR_CODE_DEVICE_OFFLINE".to_string()),
            },
        );
        engine.on_read_complete(response);

        assert_eq!(engine.stat().formatted(PointRole::Fan), "QERR_CLASS_OS::QERR_CODE_DEVICE_OFFLINE");
        let events = drain(&rx);
        // the fan slot comes after temperature, so its error is the last one seen
        assert_eq!(
            events[0],
            SyncEvent::StatusUpdated(SyncStatus::Point("QERR_CLASS_OS::QERR_CODE_DEVICE_OFFLINE".to_string()))
        );
        assert_eq!(events[1], SyncEvent::DataUpdated);
    }

    #[test]
    fn failures_retry_then_halt() {
        let (mut engine, rx) = engine();
        engine.start_refresh(Duration::ZERO);

        for _ in 0..3 {
            advance(&mut engine, Duration::from_secs(10));
            assert_eq!(engine.read_state(), CycleState::Sent);
            assert_eq!(engine.on_read_complete(BulkResponse::failed(401)), ReadOutcome::Retrying);
            assert_eq!(engine.read_state(), CycleState::Pending);
        }
        advance(&mut engine, Duration::from_secs(10));
        assert_eq!(engine.on_read_complete(BulkResponse::failed(401)), ReadOutcome::Halted);
        assert_eq!(engine.read_state(), CycleState::Idle);
        assert!(!engine.scheduler().is_scheduled(Timer::Refresh));

        let statuses: Vec<_> = drain(&rx);
        assert_eq!(statuses.len(), 4);
        assert!(statuses.iter().all(|e| *e == SyncEvent::StatusUpdated(SyncStatus::Connection(ConnectionError::Unauthorized))));

        advance(&mut engine, Duration::from_secs(60));
        assert_eq!(engine.dispatcher().reads.len(), 4);
    }

    #[test]
    fn success_resets_the_budget() {
        let (mut engine, _rx) = engine();
        engine.start_refresh(Duration::ZERO);
        for status in [500, 500, 200, 500, 500, 500] {
            advance(&mut engine, Duration::from_secs(10));
            let response = if status == 200 { values(&[]) } else { BulkResponse::failed(status) };
            assert_ne!(engine.on_read_complete(response), ReadOutcome::Halted);
        }
        advance(&mut engine, Duration::from_secs(10));
        assert_eq!(engine.on_read_complete(BulkResponse::failed(0)), ReadOutcome::Halted);
    }

    #[test]
    fn read_started_before_a_write_is_discarded() {
        let (mut engine, rx) = engine();
        engine.start_refresh(Duration::ZERO);
        advance(&mut engine, Duration::ZERO);
        assert_eq!(engine.read_state(), CycleState::Sent);

        engine.set_value(PointRole::Lights1, "active");
        advance(&mut engine, Duration::from_secs(1));
        assert!(engine.is_stale());
        assert_eq!(engine.dispatcher().writes.len(), 1);
        drain(&rx);

        let outcome = engine.on_read_complete(values(&[(LIGHTS_REF, "inactive"), (TEMP_REF, "30")]));
        assert_eq!(outcome, ReadOutcome::Discarded);
        assert!(!engine.is_stale());
        assert_eq!(engine.stat().point(PointRole::Lights1).value(), "active");
        assert_eq!(engine.stat().point(PointRole::Temp).value(), "21.3");
        assert!(drain(&rx).is_empty());
        assert_eq!(engine.scheduler().due_in(Timer::Refresh), Some(Duration::ZERO));
    }

    #[test]
    fn stopping_keeps_the_read_in_flight() {
        let mut engine = crate::services::sync::SyncEngine::new(
            crate::models::stat::tests::loaded_stat(),
            Default::default(),
            crate::services::scheduler::ManualScheduler::default(),
            RecordingDispatcher::default(),
        );
        let (id, _rx) = engine.subscribe();
        engine.start_refresh(Duration::ZERO);
        advance(&mut engine, Duration::ZERO);
        assert_eq!(engine.read_state(), CycleState::Sent);

        assert!(engine.unsubscribe(id));
        assert_eq!(engine.read_state(), CycleState::Sent);
        assert!(!engine.scheduler().is_scheduled(Timer::Refresh));

        let outcome = engine.on_read_complete(values(&[(TEMP_REF, "19.5")]));
        assert_eq!(outcome, ReadOutcome::Applied);
        assert_eq!(engine.stat().point(PointRole::Temp).value(), "19.5");
        assert_eq!(engine.read_state(), CycleState::Idle);
        assert!(!engine.scheduler().is_scheduled(Timer::Refresh));
        assert_eq!(engine.dispatcher().reads.len(), 1);
    }
}
