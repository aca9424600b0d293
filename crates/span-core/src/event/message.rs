//! The [`Event`] message type.

use std::any::Any;
use std::fmt;

use crate::event::types::{EventType, TargetId};

/// A typed, targeted, payload-bearing message delivered by the queue to at
/// most one handler per delivery.
///
/// An event is immutable once posted.  Its payload is an owned `Any` box:
/// ownership transfers to the queue on post and to the handler on dispatch.
/// If the event is never delivered (its target was destroyed first), the
/// payload is released when the event is scrubbed; payload release never
/// depends on target liveness.
pub struct Event {
    event_type: EventType,
    target: TargetId,
    payload: Option<Box<dyn Any + Send>>,
}

impl Event {
    /// Creates a payload-free event addressed to `target`.
    pub fn new(event_type: EventType, target: TargetId) -> Event {
        Event {
            event_type,
            target,
            payload: None,
        }
    }

    /// Creates an event carrying an owned payload.
    pub fn with_payload<P: Any + Send>(event_type: EventType, target: TargetId, payload: P) -> Event {
        Event {
            event_type,
            target,
            payload: Some(Box::new(payload)),
        }
    }

    /// A wake event: interrupts a blocked wait, addressed to no one.
    pub fn wake() -> Event {
        Event::new(EventType::WAKE, TargetId::NONE)
    }

    /// A quit event: tells the dispatch loop to exit.
    pub fn quit() -> Event {
        Event::new(EventType::QUIT, TargetId::NONE)
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Borrows the payload if it is a `T`.
    pub fn payload_ref<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref()?.downcast_ref()
    }

    /// Takes ownership of the payload if it is a `T`.
    ///
    /// On a type mismatch the payload stays in place and `None` is returned,
    /// so a handler probing for the wrong type does not destroy the data.
    pub fn take_payload<T: Any + Send>(&mut self) -> Option<T> {
        match self.payload.take()?.downcast::<T>() {
            Ok(boxed) => Some(*boxed),
            Err(other) => {
                self.payload = Some(other);
                None
            }
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_type", &self.event_type)
            .field("target", &self.target)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_payload_moves_ownership_once() {
        let mut event = Event::with_payload(EventType::WAKE, TargetId::NONE, 42u32);
        assert!(event.has_payload());
        assert_eq!(event.take_payload::<u32>(), Some(42));
        assert!(!event.has_payload());
        assert_eq!(event.take_payload::<u32>(), None);
    }

    #[test]
    fn take_payload_with_wrong_type_keeps_payload() {
        let mut event = Event::with_payload(EventType::WAKE, TargetId::NONE, "hello");
        assert_eq!(event.take_payload::<u32>(), None);
        assert_eq!(event.take_payload::<&str>(), Some("hello"));
    }

    #[test]
    fn payload_ref_does_not_consume() {
        let event = Event::with_payload(EventType::TIMER, TargetId::NONE, 7i64);
        assert_eq!(event.payload_ref::<i64>(), Some(&7));
        assert!(event.has_payload());
    }
}
