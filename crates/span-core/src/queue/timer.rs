//! Scheduled wake-ups: [`Timer`], its wait-set entry, and the fire payload.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::event::{EventTarget, TargetId};
use crate::queue::QueueCore;

/// Payload carried by every [`EventType::TIMER`](crate::EventType::TIMER)
/// event.
///
/// `count` is the total number of times the timer has fired, including this
/// fire; a repeating timer that fell behind delivers one event per elapsed
/// interval, so consecutive counts let a handler detect missed cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    /// 1 for the first fire, incrementing per fire.
    pub count: u64,
    /// Which timer fired; lets the queue scrub this timer's pending fires on
    /// cancellation without touching sibling timers on the same target.
    pub(super) seq: u64,
}

/// State shared between a [`Timer`] handle, its wait-set entries, and any
/// in-flight fire bookkeeping.
pub(super) struct TimerShared {
    /// Creation-order sequence; doubles as the deadline tie-break.
    pub(super) seq: u64,
    pub(super) fire_target: TargetId,
    pub(super) cancelled: AtomicBool,
    pub(super) fired: AtomicU64,
}

impl TimerShared {
    pub(super) fn new(seq: u64, fire_target: TargetId) -> TimerShared {
        TimerShared {
            seq,
            fire_target,
            cancelled: AtomicBool::new(false),
            fired: AtomicU64::new(0),
        }
    }
}

/// One entry in the queue's time-ordered wait set.
pub(super) struct TimerEntry {
    pub(super) deadline: Instant,
    pub(super) interval: Duration,
    pub(super) repeating: bool,
    pub(super) shared: Arc<TimerShared>,
}

// Ordered by (deadline, creation sequence) so equal deadlines fire in
// creation order, deterministically.
impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.shared.seq == other.shared.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.shared.seq.cmp(&other.shared.seq))
    }
}

/// A scheduled, possibly repeating wake-up source; itself an event target.
///
/// Created by [`EventQueue::create_timer`](crate::EventQueue::create_timer)
/// and owned exclusively by whichever component asked for it.  Fires by
/// posting [`EventType::TIMER`](crate::EventType::TIMER) events carrying a
/// [`TimerFired`] payload; handler lookup proceeds exactly as for any other
/// target.
///
/// Dropping the timer cancels any scheduled fire atomically with respect to
/// the dispatch loop: a fire already pulled off the queue completes, but no
/// further fire is ever scheduled, including when a repeating timer is
/// destroyed from inside its own fire handler.
pub struct Timer {
    shared: Arc<TimerShared>,
    queue: Weak<QueueCore>,
    target: EventTarget,
}

impl Timer {
    pub(super) fn new(shared: Arc<TimerShared>, queue: Weak<QueueCore>, target: EventTarget) -> Timer {
        Timer {
            shared,
            queue,
            target,
        }
    }

    /// The timer's own event target.  When the timer was created without an
    /// explicit fire target, this is where its fires are addressed.
    pub fn target(&self) -> &EventTarget {
        &self.target
    }

    /// Where this timer's fire events are addressed.
    pub fn fire_target(&self) -> TargetId {
        self.shared.fire_target
    }

    /// How many times this timer has fired so far.
    pub fn times_fired(&self) -> u64 {
        self.shared.fired.load(Ordering::Relaxed)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
        if let Some(core) = self.queue.upgrade() {
            core.destroy_timer(&self.shared);
        }
        // `self.target` drops afterwards, removing any handlers registered on
        // the timer itself.
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("seq", &self.shared.seq)
            .field("fire_target", &self.shared.fire_target)
            .field("times_fired", &self.times_fired())
            .finish()
    }
}
