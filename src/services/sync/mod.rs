//! Per-stat synchronization engine.
//!
//! One `SyncEngine` owns one [`Stat`] and drives two independent cycles
//! against the gateway:
//! - the read cycle ([`poll`]) polls every set-up reference on a fixed interval;
//! - the write cycle ([`put`]) debounces user edits into one bulk write.
//!
//! The engine never blocks and never touches the network itself. Requests go
//! out through a [`Dispatcher`]; their completions, like timer fires, are fed
//! back by the owner through `on_read_complete` / `on_write_complete` /
//! `on_timer`, all on the owner's thread. The state guards below are the only
//! thing limiting each cycle to one request in flight.

pub mod poll;
pub mod put;

use crate::client::BulkResponse;
use crate::models::point::Actor;
use crate::models::role::PointRole;
use crate::models::stat::Stat;
use crate::models::status::SyncStatus;
use crate::services::events::{EventBus, SubscriberId, SyncEvent};
use crate::services::scheduler::{Scheduler, Timer};
use log::{debug, info};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::mpsc::Receiver;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_WRITE_DEBOUNCE: Duration = Duration::from_secs(1);
pub const DEFAULT_POST_WRITE_REFRESH: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    pub write_debounce: Duration,
    /// Delay before reconciling with the server after a write settled.
    pub post_write_refresh: Duration,
    /// Consecutive classified failures tolerated per cycle.
    pub retry_budget: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            poll_interval: DEFAULT_POLL_INTERVAL,
            write_debounce: DEFAULT_WRITE_DEBOUNCE,
            post_write_refresh: DEFAULT_POST_WRITE_REFRESH,
            retry_budget: DEFAULT_RETRY_BUDGET,
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CycleState {
    #[default]
    Idle,
    /// Timer armed, nothing sent yet.
    Pending,
    /// Request in flight.
    Sent,
    /// Response being applied.
    Received,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    initial: u32,
    remaining: u32,
}

impl RetryBudget {
    pub fn new(initial: u32) -> Self {
        RetryBudget {
            initial,
            remaining: initial,
        }
    }

    /// Take one retry; false once the budget is spent.
    pub fn consume(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }

    pub fn reset(&mut self) {
        self.remaining = self.initial;
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

/// Sends bulk requests without waiting for them. Each request must later be
/// answered through the matching `on_*_complete` call on the engine.
pub trait Dispatcher {
    fn bulk_read(&mut self, references: BTreeSet<String>);
    fn bulk_write(&mut self, values: BTreeMap<String, String>);
}

/// What a read response did to the read cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Applied,
    /// A write started while the read was in flight.
    Discarded,
    Retrying,
    /// Budget spent; polling stays off until restarted.
    Halted,
    Ignored,
}

/// What a write response did to the write cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Settled,
    Retrying,
    /// Budget spent; the batch was rolled back.
    RolledBack,
    Ignored,
}

pub struct SyncEngine<S: Scheduler, D: Dispatcher> {
    stat: Stat,
    settings: SyncSettings,
    scheduler: S,
    dispatcher: D,
    events: EventBus,
    active: bool,
    read: CycleState,
    write: CycleState,
    read_budget: RetryBudget,
    write_budget: RetryBudget,
    /// The read in flight started before the current write and must be discarded.
    stale: bool,
    /// Points sent with the write in flight, with the values sent.
    write_batch: Vec<(PointRole, String)>,
}

impl<S: Scheduler, D: Dispatcher> SyncEngine<S, D> {
    pub fn new(stat: Stat, settings: SyncSettings, scheduler: S, dispatcher: D) -> Self {
        SyncEngine {
            stat,
            settings,
            scheduler,
            dispatcher,
            events: EventBus::new(),
            active: true,
            read: CycleState::Idle,
            write: CycleState::Idle,
            read_budget: RetryBudget::new(settings.retry_budget),
            write_budget: RetryBudget::new(settings.retry_budget),
            stale: false,
            write_batch: Vec::new(),
        }
    }

    pub fn stat(&self) -> &Stat {
        &self.stat
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn read_state(&self) -> CycleState {
        self.read
    }

    pub fn write_state(&self) -> CycleState {
        self.write
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn subscribe(&mut self) -> (SubscriberId, Receiver<SyncEvent>) {
        self.events.subscribe()
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let removed = self.events.unsubscribe(id);
        if !self.events.has_subscribers() {
            self.stop_refresh();
        }
        removed
    }

    fn emit_status(&mut self, status: SyncStatus) {
        self.events.emit(SyncEvent::StatusUpdated(status));
    }

    fn emit_data(&mut self) {
        self.events.emit(SyncEvent::DataUpdated);
    }

    /// Replace the stat's contents with a freshly fetched representation.
    pub fn load(&mut self, doc: &Value) -> SyncStatus {
        let status = self.stat.load_from_representation(doc);
        self.write_batch.clear();
        self.emit_status(status.clone());
        self.emit_data();
        status
    }

    /// User edit of one slot. Arms the write debounce when the value changed.
    pub fn set_value(&mut self, role: PointRole, value: &str) -> bool {
        let changed = self.stat.apply(role, value, Actor::User);
        if changed {
            self.arm_write();
        }
        changed
    }

    /// User switch between fan auto and manual mode.
    pub fn set_fan_manual(&mut self, manual: bool) -> bool {
        let changed = self.stat.set_fan_manual(manual);
        if changed {
            self.arm_write();
        }
        changed
    }

    /// Dispatch a fired timer to its cycle. Ignored once the engine is shut down.
    pub fn on_timer(&mut self, timer: Timer) {
        if !self.active {
            return;
        }
        match timer {
            Timer::Refresh => self.fire_refresh(),
            Timer::Write => self.fire_write(),
        }
    }

    /// Stop polling, throw away unsent edits and show the last confirmed values.
    /// Used when a connection failure becomes terminal.
    pub fn halt_and_restore(&mut self) {
        self.stop_refresh();
        self.stat.restore_all_to_last_known();
        self.emit_data();
    }

    /// Detach every observer and stop both cycles. Responses still in flight
    /// are ignored when they arrive.
    pub fn shutdown(&mut self) {
        self.stop_refresh();
        self.scheduler.cancel(Timer::Write);
        if self.write != CycleState::Sent {
            self.write = CycleState::Idle;
        }
        self.events.clear();
        self.active = false;
        info!("Sync engine for \"{}\" shut down", self.stat.name());
    }

    fn log_transition(&self, cycle: &str, from: CycleState, to: CycleState) {
        if from != to {
            debug!("{} cycle: {:?} -> {:?}", cycle, from, to);
        }
    }

    fn set_read_state(&mut self, state: CycleState) {
        self.log_transition("read", self.read, state);
        self.read = state;
    }

    fn set_write_state(&mut self, state: CycleState) {
        self.log_transition("write", self.write, state);
        self.write = state;
    }

    #[cfg(test)]
    pub(crate) fn stat_mut(&mut self) -> &mut Stat {
        &mut self.stat
    }
}

/// Case-insensitive lookup table over a bulk response.
fn lowercase_results(response: &BulkResponse) -> BTreeMap<String, &crate::client::PointResult> {
    response
        .values
        .iter()
        .map(|(reference, result)| (reference.to_lowercase(), result))
        .collect()
}
