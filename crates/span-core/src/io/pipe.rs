//! An in-memory connected stream pair.
//!
//! `pipe()` returns two ends of a full-duplex, capacity-bounded byte channel
//! that honors the whole [`Stream`] contract, including readiness events:
//! when an end is watched, bytes arriving from the peer (or the peer closing)
//! post `STREAM_READABLE` to its target, and a full write side regaining
//! space posts `STREAM_WRITABLE`.  Used by tests and by loopback
//! collaborators that want to talk to themselves through the dispatch loop.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::event::{Event, EventTarget, EventType, TargetId};
use crate::io::buffer::StreamBuffer;
use crate::io::error::{StreamError, StreamResult};
use crate::io::stream::{Stream, StreamState};
use crate::queue::EventQueue;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum End {
    A,
    B,
}

impl End {
    fn peer(self) -> End {
        match self {
            End::A => End::B,
            End::B => End::A,
        }
    }
}

struct EndState {
    closed: bool,
    /// A write from this end hit `WouldBlock`; the next has-space transition
    /// (or a later `watch`) owes it a `STREAM_WRITABLE` event.
    write_blocked: bool,
    /// Where to post readiness events once this end is watched.
    notify: Option<(EventQueue, TargetId)>,
}

struct PipeShared {
    /// Per-direction byte cap; writes beyond it report `WouldBlock`.
    capacity: usize,
    a_to_b: StreamBuffer,
    b_to_a: StreamBuffer,
    a: EndState,
    b: EndState,
}

impl PipeShared {
    fn end(&self, end: End) -> &EndState {
        match end {
            End::A => &self.a,
            End::B => &self.b,
        }
    }

    fn end_mut(&mut self, end: End) -> &mut EndState {
        match end {
            End::A => &mut self.a,
            End::B => &mut self.b,
        }
    }

    /// The buffer `end` reads from.
    fn incoming(&self, end: End) -> &StreamBuffer {
        match end {
            End::A => &self.b_to_a,
            End::B => &self.a_to_b,
        }
    }

    fn incoming_mut(&mut self, end: End) -> &mut StreamBuffer {
        match end {
            End::A => &mut self.b_to_a,
            End::B => &mut self.a_to_b,
        }
    }

    /// The buffer `end` writes into.
    fn outgoing(&self, end: End) -> &StreamBuffer {
        match end {
            End::A => &self.a_to_b,
            End::B => &self.b_to_a,
        }
    }

    fn outgoing_mut(&mut self, end: End) -> &mut StreamBuffer {
        match end {
            End::A => &mut self.a_to_b,
            End::B => &mut self.b_to_a,
        }
    }
}

/// One end of an in-memory stream pair; see [`pipe`].
pub struct PipeStream {
    shared: Arc<Mutex<PipeShared>>,
    end: End,
    target: EventTarget,
}

/// Creates a connected pair with `capacity` bytes of buffering per direction.
pub fn pipe(capacity: usize) -> (PipeStream, PipeStream) {
    assert!(capacity > 0, "pipe capacity must be non-zero");
    let shared = Arc::new(Mutex::new(PipeShared {
        capacity,
        a_to_b: StreamBuffer::new(),
        b_to_a: StreamBuffer::new(),
        a: EndState {
            closed: false,
            write_blocked: false,
            notify: None,
        },
        b: EndState {
            closed: false,
            write_blocked: false,
            notify: None,
        },
    }));
    (
        PipeStream {
            shared: Arc::clone(&shared),
            end: End::A,
            target: EventTarget::new(),
        },
        PipeStream {
            shared,
            end: End::B,
            target: EventTarget::new(),
        },
    )
}

impl PipeStream {
    /// Starts posting readiness events for this end to `queue`, addressed to
    /// [`target`](Stream::target).  Edges that fired before the watch are
    /// replayed immediately: a readable event if data (or the peer's close)
    /// is already observable, a writable event if a write hit `WouldBlock`
    /// and the peer has since drained below capacity.
    pub fn watch(&self, queue: &EventQueue) {
        let (already_readable, already_writable) = {
            let mut shared = self.shared.lock();
            shared.end_mut(self.end).notify = Some((queue.clone(), self.target.id()));
            let readable =
                !shared.incoming(self.end).is_empty() || shared.end(self.end.peer()).closed;
            let writable = shared.end(self.end).write_blocked
                && shared.outgoing(self.end).len() < shared.capacity;
            if writable {
                shared.end_mut(self.end).write_blocked = false;
            }
            (readable, writable)
        };
        if already_readable {
            queue.post_event(Event::new(EventType::STREAM_READABLE, self.target.id()));
        }
        if already_writable {
            queue.post_event(Event::new(EventType::STREAM_WRITABLE, self.target.id()));
        }
    }

    fn close_inner(&mut self) {
        let notify = {
            let mut shared = self.shared.lock();
            if shared.end(self.end).closed {
                return;
            }
            shared.end_mut(self.end).closed = true;
            // The peer observes our close as end-of-stream on its next read.
            shared.end(self.end.peer()).notify.clone()
        };
        if let Some((queue, target)) = notify {
            queue.post_event(Event::new(EventType::STREAM_READABLE, target));
        }
    }
}

impl Stream for PipeStream {
    fn read(&mut self, buf: &mut [u8]) -> StreamResult<usize> {
        let mut shared = self.shared.lock();
        if shared.end(self.end).closed {
            return Err(StreamError::Closed);
        }
        let capacity = shared.capacity;
        let peer_closed = shared.end(self.end.peer()).closed;
        let incoming = shared.incoming_mut(self.end);
        if incoming.is_empty() {
            return if peer_closed {
                Err(StreamError::EndOfStream)
            } else {
                Err(StreamError::WouldBlock)
            };
        }
        let n = incoming.read_into(buf);
        let has_space = incoming.len() < capacity;
        let peer = self.end.peer();
        // Only a writer that actually hit WouldBlock is owed a writable
        // event; if it has not watched yet, the flag stays set so `watch`
        // replays the edge.
        let notify = if has_space && shared.end(peer).write_blocked {
            let dest = shared.end(peer).notify.clone();
            if dest.is_some() {
                shared.end_mut(peer).write_blocked = false;
            }
            dest
        } else {
            None
        };
        drop(shared);
        if let Some((queue, target)) = notify {
            queue.post_event(Event::new(EventType::STREAM_WRITABLE, target));
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> StreamResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let mut shared = self.shared.lock();
        if shared.end(self.end).closed {
            return Err(StreamError::Closed);
        }
        if shared.end(self.end.peer()).closed {
            return Err(StreamError::Fatal(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer end closed",
            )));
        }
        let capacity = shared.capacity;
        let space = capacity.saturating_sub(shared.outgoing(self.end).len());
        if space == 0 {
            shared.end_mut(self.end).write_blocked = true;
            return Err(StreamError::WouldBlock);
        }
        let n = data.len().min(space);
        let outgoing = shared.outgoing_mut(self.end);
        let was_empty = outgoing.is_empty();
        outgoing.write(&data[..n]);
        let notify = if was_empty {
            shared.end(self.end.peer()).notify.clone()
        } else {
            None
        };
        drop(shared);
        if let Some((queue, target)) = notify {
            queue.post_event(Event::new(EventType::STREAM_READABLE, target));
        }
        Ok(n)
    }

    fn close(&mut self) {
        self.close_inner();
    }

    fn state(&self) -> StreamState {
        let shared = self.shared.lock();
        if shared.end(self.end).closed {
            StreamState::Closed
        } else if shared.end(self.end.peer()).closed && shared.incoming(self.end).is_empty() {
            StreamState::AtEndOfStream
        } else {
            StreamState::Open
        }
    }

    fn target(&self) -> &EventTarget {
        &self.target
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        self.close_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pipe_reports_would_block_repeatedly() {
        let (mut a, _b) = pipe(64);
        let mut buf = [0u8; 8];
        assert!(matches!(a.read(&mut buf), Err(StreamError::WouldBlock)));
        assert!(matches!(a.read(&mut buf), Err(StreamError::WouldBlock)));
        assert_eq!(a.state(), StreamState::Open);
    }

    #[test]
    fn bytes_cross_the_pipe() {
        let (mut a, mut b) = pipe(64);
        assert_eq!(a.write(b"ping").unwrap(), 4);
        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"ping");
        assert!(matches!(b.read(&mut buf), Err(StreamError::WouldBlock)));
    }

    #[test]
    fn full_pipe_reports_would_block_then_accepts_partial() {
        let (mut a, mut b) = pipe(4);
        assert_eq!(a.write(b"abcdef").unwrap(), 4);
        assert!(matches!(a.write(b"gh"), Err(StreamError::WouldBlock)));
        let mut buf = [0u8; 2];
        assert_eq!(b.read(&mut buf).unwrap(), 2);
        assert_eq!(a.write(b"gh").unwrap(), 2);
    }

    #[test]
    fn peer_close_surfaces_end_of_stream_after_drain() {
        let (mut a, mut b) = pipe(64);
        a.write(b"bye").unwrap();
        a.close();
        let mut buf = [0u8; 8];
        assert_eq!(b.state(), StreamState::Open);
        assert_eq!(b.read(&mut buf).unwrap(), 3);
        assert!(matches!(b.read(&mut buf), Err(StreamError::EndOfStream)));
        assert_eq!(b.state(), StreamState::AtEndOfStream);
    }

    #[test]
    fn local_close_is_terminal_for_both_directions() {
        let (mut a, _b) = pipe(64);
        a.close();
        let mut buf = [0u8; 8];
        assert!(matches!(a.read(&mut buf), Err(StreamError::Closed)));
        assert!(matches!(a.write(b"x"), Err(StreamError::Closed)));
        assert_eq!(a.state(), StreamState::Closed);
    }

    #[test]
    fn write_to_closed_peer_is_fatal() {
        let (mut a, b) = pipe(64);
        drop(b);
        assert!(matches!(a.write(b"x"), Err(StreamError::Fatal(_))));
    }
}
