//! [`DispatchLoop`]: the run-loop that pulls due events and invokes handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::event::EventType;
use crate::queue::EventQueue;

/// Upper bound on one iteration's wait, so the shutdown flag is re-checked
/// periodically even when nothing is happening.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// The single-threaded consumer of an [`EventQueue`].
///
/// Owned by the process, not by the queue.  Exactly one thread runs
/// [`run`](DispatchLoop::run); handlers execute on it to completion without
/// preemption, so a slow handler stalls all delivery on this queue.  Handlers
/// must therefore never block on I/O; they use the `WouldBlock` stream
/// contract and re-arm via the queue instead.
///
/// Shutdown: either post a quit event
/// ([`EventQueue::post_quit`]) or clear the flag returned by
/// [`shutdown_flag`](DispatchLoop::shutdown_flag) and call
/// [`EventQueue::wake`] to end the current wait early.
pub struct DispatchLoop {
    queue: EventQueue,
    running: Arc<AtomicBool>,
}

impl DispatchLoop {
    pub fn new(queue: EventQueue) -> DispatchLoop {
        DispatchLoop {
            queue,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// The queue this loop drains.
    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Flag shared with other threads; store `false` (then wake the queue)
    /// to request shutdown.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Runs until a quit event is dequeued or the shutdown flag clears.
    ///
    /// Each iteration waits (bounded) for the next event, drops it if its
    /// target is no longer registered, and otherwise invokes the registered
    /// handler, which may post new events, create or cancel timers, and
    /// destroy targets, including its own.
    pub fn run(&self) {
        info!("dispatch loop running");
        while self.running.load(Ordering::Relaxed) {
            let Some(event) = self.queue.wait_for_event(SHUTDOWN_POLL_INTERVAL) else {
                continue;
            };
            if event.event_type() == EventType::QUIT {
                self.running.store(false, Ordering::Relaxed);
                break;
            }
            self.queue.dispatch_event(event);
        }
        info!("dispatch loop stopped");
    }

    /// Single-steps the loop: waits up to `timeout` for one event and
    /// dispatches it.  Returns whether an event was dequeued at all (even one
    /// that was dropped unhandled).  A quit event clears the running flag.
    pub fn run_once(&self, timeout: Duration) -> bool {
        let Some(event) = self.queue.wait_for_event(timeout) else {
            return false;
        };
        if event.event_type() == EventType::QUIT {
            self.running.store(false, Ordering::Relaxed);
            return true;
        }
        self.queue.dispatch_event(event);
        true
    }
}
