//! [`EventTarget`]: pure identity plus cleanup-on-destruction.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::event::types::TargetId;
use crate::queue::QueueCore;

/// Identity object addressable as the source or destination of events.
///
/// A target carries no behavior of its own.  Components that want to receive
/// events embed one, register handlers for it on an [`EventQueue`], and hand
/// its [`id`](EventTarget::id) to whoever posts to them.
///
/// The target holds a non-owning back-reference to the queue that currently
/// has handlers registered for it (empty if none), set by the queue at
/// registration time.  On drop the target instructs that queue to remove
/// every handler and purge every pending event addressed to it *before* the
/// surrounding object's memory is reclaimed.  This replaces scattered
/// "remember to unregister me" bookkeeping in every collaborator, and it is
/// safe to run from inside one of the target's own handler invocations (an
/// object destroying itself in response to an event it is handling is the
/// common case).
///
/// Because registration borrows `&EventTarget`, registering a handler for an
/// already-destroyed target is unrepresentable; the only residual hazard is
/// posting to a stale [`TargetId`], which the dispatch loop silently drops at
/// lookup.
///
/// [`EventQueue`]: crate::EventQueue
pub struct EventTarget {
    id: TargetId,
    queue: Mutex<Weak<QueueCore>>,
}

impl EventTarget {
    /// Creates a target with a fresh identity and no queue association.
    pub fn new() -> EventTarget {
        EventTarget {
            id: TargetId::next(),
            queue: Mutex::new(Weak::new()),
        }
    }

    /// The target's identity, used to address events to it.
    pub fn id(&self) -> TargetId {
        self.id
    }

    /// Records the queue that now holds handlers for this target.
    ///
    /// A target belongs to at most one queue at a time; attaching to a second
    /// live queue is a contract violation and fails loudly.  The queue calls
    /// this (and [`detach`](EventTarget::detach)) while holding its state
    /// lock, keeping the back-reference consistent with the handler table.
    pub(crate) fn attach(&self, core: &Arc<QueueCore>) {
        let mut slot = self.queue.lock();
        if let Some(existing) = slot.upgrade() {
            assert!(
                Arc::ptr_eq(&existing, core),
                "event target {} is already registered with a different queue",
                self.id
            );
            return;
        }
        *slot = Arc::downgrade(core);
    }

    /// Clears the back-reference after the queue removed all handlers.
    pub(crate) fn detach(&self) {
        *self.queue.lock() = Weak::new();
    }
}

impl Default for EventTarget {
    fn default() -> Self {
        EventTarget::new()
    }
}

impl Drop for EventTarget {
    fn drop(&mut self) {
        let queue = self.queue.get_mut().upgrade();
        if let Some(core) = queue {
            core.remove_handlers_for(self.id);
        }
    }
}

impl fmt::Debug for EventTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventTarget({})", self.id)
    }
}
