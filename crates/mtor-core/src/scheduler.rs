//! Cooperative task scheduling.
//!
//! The registry never blocks. Its only deferred work is the coalesced commit
//! (a microtask) and the delayed reset of `bind_with_init` (a timer). Both go
//! through a [`Scheduler`] that the host drives:
//!
//! - [`Scheduler::run_microtasks`] is the microtask checkpoint. Call it once
//!   the current turn of work is finished.
//! - [`Scheduler::run_due_timers`] fires expired timers, draining microtasks
//!   after each one, like an event loop turn.
//!
//! Time comes from a [`Clock`]; tests install a [`ManualClock`] and move it
//! forward explicitly.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use slotmap::{SlotMap, new_key_type};
use web_time::{Duration, Instant};

pub trait Clock: 'static {
    fn now(&self) -> Instant;
}

pub struct SystemClock;
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock you can drive deterministically. Clones share the same time.
#[derive(Clone)]
pub struct ManualClock(Rc<Cell<Instant>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(Instant::now())))
    }

    pub fn advance(&self, by: Duration) {
        self.0.set(self.0.get() + by);
    }

    pub fn set(&self, t: Instant) {
        self.0.set(t);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.0.get()
    }
}

new_key_type! {
    pub struct TimerId;
}

type Task = Box<dyn FnOnce()>;

struct Timer {
    due: Instant,
    seq: u64,
    task: Task,
}

pub struct Scheduler {
    clock: Box<dyn Clock>,
    microtasks: RefCell<VecDeque<Task>>,
    timers: RefCell<SlotMap<TimerId, Timer>>,
    next_seq: Cell<u64>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    pub fn with_clock(clock: impl Clock) -> Self {
        Self {
            clock: Box::new(clock),
            microtasks: RefCell::new(VecDeque::new()),
            timers: RefCell::new(SlotMap::with_key()),
            next_seq: Cell::new(0),
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn queue_microtask(&self, task: impl FnOnce() + 'static) {
        self.microtasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.borrow().len()
    }

    /// Runs queued microtasks until the queue is empty, including tasks queued
    /// by the ones being run. Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under a short borrow so the task can queue more work.
            let next = self.microtasks.borrow_mut().pop_front();
            let Some(task) = next else { break };
            task();
            ran += 1;
        }
        ran
    }

    pub fn set_timeout(&self, delay: Duration, task: impl FnOnce() + 'static) -> TimerId {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.timers.borrow_mut().insert(Timer {
            due: self.now() + delay,
            seq,
            task: Box::new(task),
        })
    }

    /// Returns false if the timer already fired or was cleared.
    pub fn clear_timeout(&self, id: TimerId) -> bool {
        self.timers.borrow_mut().remove(id).is_some()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().values().map(|t| t.due).min()
    }

    /// Fires every timer whose deadline has passed, earliest first (ties in
    /// scheduling order), draining microtasks after each. Returns how many
    /// timers fired.
    pub fn run_due_timers(&self) -> usize {
        let mut fired = 0;
        loop {
            let now = self.now();
            let next = {
                let timers = self.timers.borrow();
                timers
                    .iter()
                    .filter(|(_, t)| t.due <= now)
                    .min_by_key(|(_, t)| (t.due, t.seq))
                    .map(|(id, _)| id)
            };
            let Some(id) = next else { break };
            let Some(timer) = self.timers.borrow_mut().remove(id) else {
                break;
            };
            (timer.task)();
            self.run_microtasks();
            fired += 1;
        }
        fired
    }
}
