//! Write cycle: `Idle -> Pending -> Sent -> Received -> Idle`.
//!
//! Edits are coalesced by the debounce timer, sent as one batch and cleared
//! optimistically the moment the batch leaves. A failed point is rolled back
//! to its last confirmed value unless the user edited it again meanwhile.

use super::{CycleState, Dispatcher, SyncEngine, WriteOutcome, lowercase_results};
use crate::client::BulkResponse;
use crate::models::point::error_value;
use crate::models::role::PointRole;
use crate::models::status::{ConnectionError, SyncStatus};
use crate::services::scheduler::{Scheduler, Timer};
use log::{debug, warn};

impl<S: Scheduler, D: Dispatcher> SyncEngine<S, D> {
    /// (Re)start the write debounce.
    pub(super) fn arm_write(&mut self) {
        if !self.active {
            return;
        }
        self.scheduler.schedule(Timer::Write, self.settings.write_debounce);
        if self.write == CycleState::Idle {
            self.set_write_state(CycleState::Pending);
        }
    }

    pub(super) fn fire_write(&mut self) {
        if self.write == CycleState::Sent {
            debug!("write cycle: previous batch in flight, postponed");
            self.scheduler.schedule(Timer::Write, self.settings.write_debounce);
            return;
        }

        // The edit wins over whatever the read cycle is doing.
        self.scheduler.cancel(Timer::Refresh);
        match self.read {
            CycleState::Pending => self.set_read_state(CycleState::Idle),
            CycleState::Sent => self.stale = true,
            _ => {}
        }

        let payload = self.stat.to_reference_value_map(true);
        if payload.is_empty() {
            debug!("write cycle: nothing dirty");
            self.set_write_state(CycleState::Idle);
            self.start_refresh(self.settings.poll_interval);
            return;
        }

        self.write_batch = self
            .stat
            .get_points(true)
            .into_iter()
            .map(|(role, point)| (role, point.value().to_string()))
            .collect();
        debug!("write cycle: writing {} reference(s)", payload.len());
        self.dispatcher.bulk_write(payload);
        self.set_write_state(CycleState::Sent);
        self.stat.mark_all_non_dirty();
    }

    /// Settle the batch in flight and schedule a reconciling read.
    pub fn on_write_complete(&mut self, response: BulkResponse) -> WriteOutcome {
        if !self.active {
            debug!("write cycle: response after shutdown ignored");
            return WriteOutcome::Ignored;
        }
        self.set_write_state(CycleState::Received);
        let batch = std::mem::take(&mut self.write_batch);
        // An edit made while the batch was in flight has already re-armed the debounce.
        if self.scheduler.is_scheduled(Timer::Write) {
            self.set_write_state(CycleState::Pending);
        } else {
            self.set_write_state(CycleState::Idle);
        }

        let outcome = if let Some(error) = ConnectionError::from_status(response.status) {
            self.write_failed(error, &batch)
        } else if let Some(text) = response.error_text.as_deref() {
            warn!("write cycle: request rejected: {}", text);
            self.write_budget.reset();
            self.emit_status(SyncStatus::Point(text.to_string()));
            WriteOutcome::Settled
        } else {
            self.write_budget.reset();
            let results = lowercase_results(&response);
            let failed: Vec<(PointRole, String)> = self
                .stat
                .get_points(false)
                .into_iter()
                .filter_map(|(role, point)| {
                    let text = results.get(&point.reference().to_lowercase())?.error_text.as_deref()?;
                    Some((role, error_value(text)))
                })
                .collect();

            let mut status = SyncStatus::Ok;
            for (role, error) in failed {
                warn!("write cycle: {} rejected: {}", role.key(), error);
                self.stat.point_mut(role).restore_if_not_dirty();
                status = SyncStatus::Point(error);
            }
            self.emit_status(status);
            self.emit_data();
            WriteOutcome::Settled
        };

        self.start_refresh(self.settings.post_write_refresh);
        outcome
    }

    fn write_failed(&mut self, error: ConnectionError, batch: &[(PointRole, String)]) -> WriteOutcome {
        self.emit_status(SyncStatus::Connection(error));
        if self.write_budget.consume() {
            warn!(
                "write cycle: {} ({}), retrying {} point(s)",
                error,
                error.code(),
                batch.len()
            );
            for (role, sent) in batch {
                let point = self.stat.point_mut(*role);
                if point.value() == sent {
                    point.set_dirty(true);
                }
            }
            self.arm_write();
            WriteOutcome::Retrying
        } else {
            warn!("write cycle: {} ({}), batch rolled back", error, error.code());
            self.write_budget.reset();
            for (role, _) in batch {
                self.stat.point_mut(*role).restore_if_not_dirty();
            }
            self.emit_data();
            WriteOutcome::RolledBack
        }
    }
}
