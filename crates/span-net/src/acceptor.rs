//! [`TcpAcceptor`]: a listening socket that posts accepted links as events.

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use span_core::event::{Event, EventTarget, EventType, TargetId};
use span_core::EventQueue;

use crate::error::NetError;
use crate::link::TcpLink;

/// How often the accept thread re-checks its shutdown flag while idle.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

static CONNECTION_ACCEPTED: OnceLock<EventType> = OnceLock::new();

/// The event type posted once per accepted connection.  The payload is the
/// new [`TcpLink`]; take it with
/// [`Event::take_payload::<TcpLink>`](span_core::Event::take_payload).
pub fn connection_accepted() -> EventType {
    *CONNECTION_ACCEPTED.get_or_init(|| EventType::register("connection_accepted"))
}

/// Owns a listening TCP socket and a background accept thread.
///
/// Each inbound connection becomes a [`connection_accepted`] event addressed
/// to [`target`](TcpAcceptor::target) on the queue given at bind time, so
/// connection setup happens on the dispatch thread.  Dropping the acceptor
/// stops the thread and closes the listener.
pub struct TcpAcceptor {
    local_addr: SocketAddr,
    target: EventTarget,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TcpAcceptor {
    /// Binds `addr` and starts accepting.  Bind to port 0 to let the OS pick
    /// (see [`local_addr`](TcpAcceptor::local_addr)).
    pub fn bind(addr: SocketAddr, queue: &EventQueue) -> Result<TcpAcceptor, NetError> {
        let listener =
            TcpListener::bind(addr).map_err(|source| NetError::BindFailed { addr, source })?;
        let local_addr = listener.local_addr().map_err(NetError::Setup)?;
        // Non-blocking accept plus a short sleep keeps the thread responsive
        // to shutdown without an OS-specific listener timeout.
        listener.set_nonblocking(true).map_err(NetError::Setup)?;

        let target = EventTarget::new();
        let running = Arc::new(AtomicBool::new(true));
        let thread = thread::Builder::new()
            .name("span-net-accept".into())
            .spawn({
                let queue = queue.clone();
                let running = Arc::clone(&running);
                let target_id = target.id();
                move || accept_loop(listener, queue, target_id, running)
            })
            .map_err(NetError::Setup)?;

        info!(%local_addr, "listening");
        Ok(TcpAcceptor {
            local_addr,
            target,
            running,
            thread: Some(thread),
        })
    }

    /// The bound address, with the OS-assigned port when bound to port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The identity [`connection_accepted`] events are addressed to.
    pub fn target(&self) -> &EventTarget {
        &self.target
    }
}

impl Drop for TcpAcceptor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    queue: EventQueue,
    target_id: TargetId,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((socket, peer)) => {
                debug!(%peer, "connection accepted");
                match TcpLink::from_stream(socket) {
                    Ok(link) => {
                        queue.post_event(Event::with_payload(
                            connection_accepted(),
                            target_id,
                            link,
                        ));
                    }
                    Err(error) => {
                        warn!(%peer, %error, "failed to set up accepted connection");
                    }
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(error) => {
                error!(%error, "accept failed, listener shutting down");
                break;
            }
        }
    }
}
