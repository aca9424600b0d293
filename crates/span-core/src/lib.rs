//! # span-core
//!
//! Runtime core for SpanLink: the event dispatch and non-blocking stream I/O
//! subsystem shared by the server and client processes.
//!
//! SpanLink is a software KVM: one machine owns the physical keyboard, mouse,
//! and clipboard, and peers receive input over the network.  Every other
//! subsystem (protocol framing, platform input hooks, clipboard conversion,
//! screen-edge detection) is a *consumer* of this crate: each registers as an
//! event target and relies on the queue's ordering, cancellation, and
//! lifecycle guarantees.
//!
//! This crate has zero dependencies on OS input APIs, UI frameworks, or
//! network sockets.
//!
//! # Architecture overview
//!
//! - **`event`** – Identity and message types.  An [`EventTarget`] is a pure
//!   identity object that can send and receive events; an [`Event`] is a
//!   typed, targeted, payload-bearing message; [`EventType`] is a small
//!   registry of type ids with a handful of reserved values (wake, quit,
//!   timer, stream readiness).
//!
//! - **`queue`** – The central multiplexer.  An [`EventQueue`] accepts handler
//!   registrations keyed by (target, event type), accepts posted events from
//!   any thread, drives timers, and hands events to the single dispatch
//!   thread.  [`DispatchLoop`] is the run-loop that pulls one event at a time
//!   and invokes the matching handler.
//!
//! - **`io`** – The non-blocking stream contract.  A [`Stream`] never blocks
//!   its caller: reads and writes either transfer bytes or fail with one of
//!   the closed set of conditions in [`StreamError`] (`Closed`,
//!   `EndOfStream`, `WouldBlock`) that callers branch on explicitly, with
//!   fatal transport errors kept on a separate channel.
//!
//! # Threading model
//!
//! Exactly one dispatch thread per [`EventQueue`] runs handler callbacks.
//! Producer threads (socket readers, platform hook callbacks) only ever
//! *post*; they never execute handler code.  The only blocking point in the
//! subsystem is [`EventQueue::wait_for_event`], which is always bounded by a
//! timeout or the next timer deadline and can be interrupted early by
//! [`EventQueue::wake`].

pub mod event;
pub mod io;
pub mod queue;

// Re-export the most-used types at the crate root so callers can write
// `span_core::EventQueue` instead of `span_core::queue::EventQueue`.
pub use event::{Event, EventTarget, EventType, TargetId};
pub use io::{
    drain_into, pipe, DrainOutcome, PipeStream, Stream, StreamBuffer, StreamError, StreamResult,
    StreamState,
};
pub use queue::{DispatchLoop, EventQueue, Timer, TimerFired};
