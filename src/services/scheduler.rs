//! Cancellable delayed callbacks for the two sync timers.
//!
//! Scheduling a timer that is already pending replaces it; that is all the
//! debouncing the cycles need.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timer {
    Refresh,
    Write,
}

pub trait Scheduler {
    /// Arm `timer` to fire after `delay`, replacing any pending arm.
    fn schedule(&mut self, timer: Timer, delay: Duration);
    fn cancel(&mut self, timer: Timer);
    fn is_scheduled(&self, timer: Timer) -> bool;
}

type Notify = Arc<dyn Fn(Timer, u64) + Send + Sync>;

/// Real timers: every arm sleeps on its own thread and then reports
/// `(timer, generation)` through `notify`. The owning loop hands the pair back
/// to [`ThreadScheduler::accept`], which drops fires that were replaced or
/// cancelled in the meantime.
pub struct ThreadScheduler {
    notify: Notify,
    next_generation: u64,
    armed: BTreeMap<Timer, u64>,
}

impl ThreadScheduler {
    pub fn new(notify: impl Fn(Timer, u64) + Send + Sync + 'static) -> Self {
        ThreadScheduler {
            notify: Arc::new(notify),
            next_generation: 0,
            armed: BTreeMap::new(),
        }
    }

    /// Returns true when the fire is the current arm of `timer`, disarming it.
    pub fn accept(&mut self, timer: Timer, generation: u64) -> bool {
        if self.armed.get(&timer) == Some(&generation) {
            self.armed.remove(&timer);
            true
        } else {
            false
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(&mut self, timer: Timer, delay: Duration) {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.armed.insert(timer, generation);

        let notify = Arc::clone(&self.notify);
        thread::spawn(move || {
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            notify(timer, generation);
        });
    }

    fn cancel(&mut self, timer: Timer) {
        self.armed.remove(&timer);
    }

    fn is_scheduled(&self, timer: Timer) -> bool {
        self.armed.contains_key(&timer)
    }
}

/// Deterministic clock for tests: nothing fires until the test pops it.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ManualScheduler {
    now: Duration,
    due: BTreeMap<Timer, Duration>,
    arms: usize,
}

#[cfg(test)]
impl ManualScheduler {
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Total number of `schedule` calls so far.
    pub fn arms(&self) -> usize {
        self.arms
    }

    pub fn due_in(&self, timer: Timer) -> Option<Duration> {
        self.due.get(&timer).map(|at| at.saturating_sub(self.now))
    }

    /// Earliest timer due no later than `until`; the clock moves to its due
    /// time and the timer is disarmed.
    pub fn pop_due(&mut self, until: Duration) -> Option<Timer> {
        let (timer, at) = self
            .due
            .iter()
            .filter(|(_, at)| **at <= until)
            .min_by_key(|(timer, at)| (**at, **timer))
            .map(|(t, at)| (*t, *at))?;
        self.due.remove(&timer);
        self.now = self.now.max(at);
        Some(timer)
    }

    pub fn set_now(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }
}

#[cfg(test)]
impl Scheduler for ManualScheduler {
    fn schedule(&mut self, timer: Timer, delay: Duration) {
        self.arms += 1;
        self.due.insert(timer, self.now + delay);
    }

    fn cancel(&mut self, timer: Timer) {
        self.due.remove(&timer);
    }

    fn is_scheduled(&self, timer: Timer) -> bool {
        self.due.contains_key(&timer)
    }
}
