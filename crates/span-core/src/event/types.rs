//! Event type ids and target ids.
//!
//! Both are plain integers behind newtypes.  Event type ids come from a
//! global registry so independently compiled collaborators (protocol layer,
//! platform hooks, clipboard) can each claim their own types without
//! coordinating a shared enum.  Target ids come from a process-wide atomic
//! counter and are never reused, so a stale id held by an in-flight event can
//! never alias a newer target.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Names of the reserved event types, indexed by id.
const RESERVED_NAMES: [&str; 5] = [
    "wake",
    "quit",
    "timer",
    "stream_readable",
    "stream_writable",
];

/// Names of dynamically registered event types, indexed by `id - RESERVED`.
static REGISTERED_NAMES: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

/// Identifies one kind of event.
///
/// Handlers are registered per (target, event type) pair, so two collaborators
/// using different types never observe each other's events even when they
/// share a target.
///
/// A handful of ids are reserved by the core; everything else is allocated
/// through [`EventType::register`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType(u32);

impl EventType {
    /// Interrupts a blocked [`wait_for_event`](crate::EventQueue::wait_for_event)
    /// without carrying any meaning of its own; the dispatch loop discards it.
    pub const WAKE: EventType = EventType(0);

    /// Tells the dispatch loop to exit.
    pub const QUIT: EventType = EventType(1);

    /// Posted when a timer fires, addressed to the timer's fire target.
    pub const TIMER: EventType = EventType(2);

    /// A watched stream has bytes (or an end-of-stream condition) to read.
    pub const STREAM_READABLE: EventType = EventType(3);

    /// A watched stream that had reported `WouldBlock` on write has space again.
    pub const STREAM_WRITABLE: EventType = EventType(4);

    /// Allocates a fresh event type with a name used in logs.
    ///
    /// Thread-safe; each call returns a distinct id.  Collaborators typically
    /// call this once from a `OnceLock` initializer.
    pub fn register(name: &'static str) -> EventType {
        let mut names = REGISTERED_NAMES.lock();
        let id = RESERVED_NAMES.len() + names.len();
        names.push(name);
        EventType(id as u32)
    }

    /// The raw id.
    pub fn id(self) -> u32 {
        self.0
    }

    /// The name given at registration, for logging.
    pub fn name(self) -> &'static str {
        let idx = self.0 as usize;
        if idx < RESERVED_NAMES.len() {
            RESERVED_NAMES[idx]
        } else {
            REGISTERED_NAMES
                .lock()
                .get(idx - RESERVED_NAMES.len())
                .copied()
                .unwrap_or("unregistered")
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventType({}:{})", self.0, self.name())
    }
}

/// Process-wide counter for target ids.  Starts at 1; 0 is [`TargetId::NONE`].
static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of an [`EventTarget`](crate::EventTarget).
///
/// Ids are allocated with a `fetch_add` on a shared atomic (the same pattern
/// as a wire sequence counter) and never reused, so comparing ids is
/// equivalent to comparing object identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl TargetId {
    /// The null target, used by events that address no one (wake, quit).
    pub const NONE: TargetId = TargetId(0);

    pub(crate) fn next() -> TargetId {
        // Relaxed is enough: ids are identity, not synchronization.
        TargetId(NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_types_have_stable_names() {
        assert_eq!(EventType::WAKE.name(), "wake");
        assert_eq!(EventType::QUIT.name(), "quit");
        assert_eq!(EventType::TIMER.name(), "timer");
        assert_eq!(EventType::STREAM_READABLE.name(), "stream_readable");
        assert_eq!(EventType::STREAM_WRITABLE.name(), "stream_writable");
    }

    #[test]
    fn registered_types_are_distinct_and_named() {
        let a = EventType::register("alpha");
        let b = EventType::register("beta");
        assert_ne!(a, b);
        assert_eq!(a.name(), "alpha");
        assert_eq!(b.name(), "beta");
        assert!(a.id() >= RESERVED_NAMES.len() as u32);
    }

    #[test]
    fn target_ids_are_unique() {
        let a = TargetId::next();
        let b = TargetId::next();
        assert_ne!(a, b);
        assert_ne!(a, TargetId::NONE);
    }
}
