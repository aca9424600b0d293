//! The [`EventQueue`] multiplexer: handler registrations, cross-thread event
//! posting, timers, and the bounded wait that feeds the dispatch loop.
//!
//! # Design
//!
//! One queue owns three shared mutable structures (the handler table, the
//! pending-event FIFO, and the timer wait set), all behind a single internal
//! mutex.  Producer threads (socket readers, platform hook
//! callbacks) contend only on short enqueue critical sections; user handler
//! code always runs with that lock *released*, on the single dispatch thread,
//! so a handler may freely register, unregister, post, create timers, or
//! destroy targets (including its own) mid-invocation.
//!
//! The only blocking point in the subsystem is
//! [`EventQueue::wait_for_event`], bounded by the caller's timeout or the
//! next timer deadline, whichever is sooner.  Every post notifies the
//! condvar, which is what makes [`EventQueue::wake`] able to interrupt a
//! blocked wait early.

mod dispatch;
mod timer;

pub use dispatch::DispatchLoop;
pub use timer::{Timer, TimerFired};

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::event::{Event, EventTarget, EventType, TargetId};
use timer::{TimerEntry, TimerShared};

/// A registered callback.  Boxed `FnMut` because handlers usually carry
/// mutable connection state; `Send` because registration may happen off the
/// dispatch thread.
type BoxedHandler = Box<dyn FnMut(&mut Event) + Send>;

/// Handlers live behind their own mutex so the queue lock can be released
/// before invocation and so a handler that unregisters or replaces itself
/// mid-invocation does not invalidate the executing closure.
type HandlerSlot = Arc<Mutex<BoxedHandler>>;

/// The shared mutable state; owned exclusively by [`QueueCore`].
struct QueueState {
    handlers: HashMap<(TargetId, EventType), HandlerSlot>,
    pending: VecDeque<Event>,
    /// Soonest-deadline-first; ties broken by timer creation order.
    timers: BinaryHeap<Reverse<TimerEntry>>,
    next_timer_seq: u64,
}

impl QueueState {
    fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse(entry)| entry.deadline)
    }
}

/// Interior of an [`EventQueue`], shared by its clones and back-referenced
/// (weakly) by registered targets and timers.
pub(crate) struct QueueCore {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl QueueCore {
    /// Removes every handler registration for `target`, scrubs the pending
    /// FIFO of events addressed to it (releasing their payloads), and cancels
    /// timers that fire at it.  Infallible; this is the primitive
    /// [`EventTarget`]'s drop relies on, so it may run from inside a handler
    /// invocation for this same target.
    pub(crate) fn remove_handlers_for(&self, target: TargetId) {
        let mut state = self.state.lock();
        QueueCore::purge_target(&mut state, target);
    }

    /// The body of [`remove_handlers_for`](QueueCore::remove_handlers_for),
    /// for callers that already hold the state lock.
    fn purge_target(state: &mut QueueState, target: TargetId) {
        let handlers_before = state.handlers.len();
        state.handlers.retain(|&(t, _), _| t != target);
        let removed_handlers = handlers_before - state.handlers.len();

        let pending_before = state.pending.len();
        state.pending.retain(|event| event.target() != target);
        let scrubbed_events = pending_before - state.pending.len();

        let mut cancelled_timers = 0usize;
        state.timers.retain(|Reverse(entry)| {
            if entry.shared.fire_target == target {
                entry.shared.cancelled.store(true, Ordering::Relaxed);
                cancelled_timers += 1;
                false
            } else {
                true
            }
        });

        if removed_handlers + scrubbed_events + cancelled_timers > 0 {
            debug!(
                target_id = %target,
                removed_handlers,
                scrubbed_events,
                cancelled_timers,
                "target purged from queue"
            );
        }
    }

    /// Cancels one timer: removes its wait-set entry and scrubs its pending
    /// fire events.  An already-dequeued fire is unaffected (it completes);
    /// nothing further is ever scheduled for this timer.
    pub(crate) fn destroy_timer(&self, shared: &TimerShared) {
        let mut state = self.state.lock();
        state
            .timers
            .retain(|Reverse(entry)| entry.shared.seq != shared.seq);
        state.pending.retain(|event| {
            !(event.event_type() == EventType::TIMER
                && event
                    .payload_ref::<TimerFired>()
                    .is_some_and(|fired| fired.seq == shared.seq))
        });
    }

    /// Moves every due timer fire into the pending FIFO, in non-decreasing
    /// deadline order with creation-order tie-break.  A repeating timer that
    /// fell several intervals behind fires once per elapsed interval.
    fn service_timers(state: &mut QueueState, now: Instant) {
        loop {
            let due = match state.timers.peek() {
                Some(Reverse(entry)) => {
                    entry.shared.cancelled.load(Ordering::Relaxed) || entry.deadline <= now
                }
                None => false,
            };
            if !due {
                break;
            }
            let Some(Reverse(mut entry)) = state.timers.pop() else {
                break;
            };
            if entry.shared.cancelled.load(Ordering::Relaxed) {
                continue;
            }

            let count = entry.shared.fired.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(
                timer_seq = entry.shared.seq,
                target_id = %entry.shared.fire_target,
                count,
                "timer fired"
            );
            state.pending.push_back(Event::with_payload(
                EventType::TIMER,
                entry.shared.fire_target,
                TimerFired {
                    count,
                    seq: entry.shared.seq,
                },
            ));

            if entry.repeating {
                // Re-arm relative to the missed deadline, not `now`, so the
                // fire cadence does not drift under a slow dispatch thread.
                entry.deadline += entry.interval;
                state.timers.push(Reverse(entry));
            }
        }
    }
}

/// The central multiplexer.
///
/// Cheaply clonable handle; all clones share one queue.  Exactly one thread,
/// the dispatch thread, may call [`wait_for_event`](EventQueue::wait_for_event)
/// and [`dispatch_event`](EventQueue::dispatch_event); every other operation
/// is safe from any thread.
#[derive(Clone)]
pub struct EventQueue {
    core: Arc<QueueCore>,
}

impl EventQueue {
    pub fn new() -> EventQueue {
        EventQueue {
            core: Arc::new(QueueCore {
                state: Mutex::new(QueueState {
                    handlers: HashMap::new(),
                    pending: VecDeque::new(),
                    timers: BinaryHeap::new(),
                    next_timer_seq: 0,
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Registers `handler` for events of `event_type` addressed to `target`,
    /// replacing any prior handler for that (target, type) pair.
    ///
    /// O(1) amortized; has no effect on a dispatch currently in flight.  The
    /// queue records itself as the target's owner so the target's destruction
    /// automatically purges everything registered here.
    ///
    /// The back-reference is kept consistent with the handler table by
    /// updating both under the state lock; concurrent register/unregister
    /// calls for the same target from different threads serialize here.
    pub fn register_handler<F>(&self, target: &EventTarget, event_type: EventType, handler: F)
    where
        F: FnMut(&mut Event) + Send + 'static,
    {
        let slot: HandlerSlot = Arc::new(Mutex::new(Box::new(handler)));
        let replaced = {
            let mut state = self.core.state.lock();
            target.attach(&self.core);
            state
                .handlers
                .insert((target.id(), event_type), slot)
                .is_some()
        };
        debug!(target_id = %target.id(), event_type = %event_type, replaced, "handler registered");
    }

    /// Removes the handler for one (target, type) pair, if any.  If that was
    /// the target's last registration, its back-reference is cleared in the
    /// same critical section so a racing register cannot be orphaned.
    pub fn unregister_handler(&self, target: &EventTarget, event_type: EventType) {
        {
            let mut state = self.core.state.lock();
            state.handlers.remove(&(target.id(), event_type));
            if !state.handlers.keys().any(|&(t, _)| t == target.id()) {
                target.detach();
            }
        }
        debug!(target_id = %target.id(), event_type = %event_type, "handler unregistered");
    }

    /// Removes *all* handlers for `target` and purges its pending events and
    /// timers.  Equivalent to what happens automatically when the target is
    /// dropped.
    pub fn remove_handlers(&self, target: &EventTarget) {
        let mut state = self.core.state.lock();
        QueueCore::purge_target(&mut state, target.id());
        target.detach();
    }

    /// Enqueues `event` for eventual dispatch.  Thread-safe; never blocks the
    /// caller beyond the internal critical section, and never invokes handler
    /// code.  Events posted by one thread are delivered in post order.
    pub fn post_event(&self, event: Event) {
        trace!(event_type = %event.event_type(), target_id = %event.target(), "event posted");
        self.core.state.lock().pending.push_back(event);
        self.core.ready.notify_one();
    }

    /// Posts a payload-carrying event addressed to `target`.
    pub fn post<P: std::any::Any + Send>(
        &self,
        target: &EventTarget,
        event_type: EventType,
        payload: P,
    ) {
        self.post_event(Event::with_payload(event_type, target.id(), payload));
    }

    /// Interrupts a blocked [`wait_for_event`](EventQueue::wait_for_event)
    /// even when no meaningful event is pending.  Used for shutdown and for
    /// urgent re-evaluation of wait conditions.
    pub fn wake(&self) {
        self.post_event(Event::wake());
    }

    /// Posts a quit event; [`DispatchLoop::run`] exits when it dequeues one.
    pub fn post_quit(&self) {
        self.post_event(Event::quit());
    }

    /// Blocks the calling (dispatch) thread until an event is ready (a
    /// posted event or a due timer fire) or until `timeout` elapses,
    /// returning `None` on timeout.
    ///
    /// This is the single suspension point in the subsystem.  The internal
    /// wait is additionally bounded by the next timer deadline, and any
    /// concurrent post (including [`wake`](EventQueue::wake)) ends it early.
    pub fn wait_for_event(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        let mut state = self.core.state.lock();
        loop {
            QueueCore::service_timers(&mut state, Instant::now());
            if let Some(event) = state.pending.pop_front() {
                return Some(event);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let wait_until = match state.next_timer_deadline() {
                Some(timer_deadline) => deadline.min(timer_deadline),
                None => deadline,
            };
            // Spurious wake-ups and timeouts are both fine: the loop re-checks
            // timers and the pending FIFO either way.
            let _ = self.core.ready.wait_until(&mut state, wait_until);
        }
    }

    /// Looks up the handler for (event.target, event.type) and invokes it
    /// with the queue lock released.  Returns whether a handler ran.
    ///
    /// An event whose target is no longer registered (destroyed since the
    /// event was enqueued, or never claimed) is silently dropped, releasing
    /// its payload.  A panicking handler is contained and logged;
    /// one misbehaving handler must not stop delivery of unrelated events.
    pub fn dispatch_event(&self, mut event: Event) -> bool {
        if event.event_type() == EventType::WAKE {
            trace!("wake event discarded");
            return false;
        }
        let slot = self
            .core
            .state
            .lock()
            .handlers
            .get(&(event.target(), event.event_type()))
            .cloned();
        let Some(slot) = slot else {
            trace!(
                event_type = %event.event_type(),
                target_id = %event.target(),
                "no handler registered, event dropped"
            );
            return false;
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut handler = slot.lock();
            (*handler)(&mut event);
        }));
        if outcome.is_err() {
            error!(
                event_type = %event.event_type(),
                target_id = %event.target(),
                "handler panicked; delivery of other events continues"
            );
        }
        true
    }

    /// Creates a timer that posts [`EventType::TIMER`] events every
    /// `interval` (once, if `repeating` is false).
    ///
    /// Fires are addressed to `target` if given, otherwise to the timer's own
    /// embedded target ([`Timer::target`]).  Dropping the returned [`Timer`]
    /// cancels it atomically with respect to the dispatch loop: an
    /// already-dequeued fire completes, nothing further is scheduled.
    pub fn create_timer(
        &self,
        interval: Duration,
        repeating: bool,
        target: Option<&EventTarget>,
    ) -> Timer {
        assert!(
            interval > Duration::ZERO,
            "timer interval must be non-zero"
        );
        let own_target = EventTarget::new();
        let fire_target = target.map_or_else(|| own_target.id(), EventTarget::id);
        let shared = {
            let mut state = self.core.state.lock();
            let seq = state.next_timer_seq;
            state.next_timer_seq += 1;
            let shared = Arc::new(TimerShared::new(seq, fire_target));
            state.timers.push(Reverse(TimerEntry {
                deadline: Instant::now() + interval,
                interval,
                repeating,
                shared: Arc::clone(&shared),
            }));
            shared
        };
        // The new deadline may be sooner than the bound of a wait already in
        // progress on the dispatch thread.
        self.core.ready.notify_one();
        debug!(
            timer_seq = shared.seq,
            target_id = %fire_target,
            interval_ms = interval.as_millis() as u64,
            repeating,
            "timer created"
        );
        Timer::new(shared, Arc::downgrade(&self.core), own_target)
    }

    /// Number of events posted (or fired) but not yet dequeued.
    pub fn pending_events(&self) -> usize {
        self.core.state.lock().pending.len()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        EventQueue::new()
    }
}
