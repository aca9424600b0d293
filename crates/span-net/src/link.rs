//! [`TcpLink`]: the stream contract over a connected TCP socket.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use span_core::event::{Event, EventTarget, EventType, TargetId};
use span_core::io::{Stream, StreamBuffer, StreamError, StreamResult, StreamState};
use span_core::EventQueue;

use crate::error::NetError;

/// Upper bound on buffered-but-unsent bytes; writes beyond it report
/// `WouldBlock` until the writer thread catches up.
const OUTBOUND_CAPACITY: usize = 256 * 1024;

/// Size of one blocking socket read.
const READ_CHUNK: usize = 8192;

/// How long [`TcpLink::close`] lets the writer thread flush buffered bytes
/// before cutting the socket out from under it.  Keeps teardown bounded when
/// the peer has stopped reading and the kernel send buffer is full.
const CLOSE_FLUSH_GRACE: Duration = Duration::from_secs(1);

struct Inbound {
    buffer: StreamBuffer,
    eof: bool,
    /// Sticky: once the reader thread fails, every subsequent read reports
    /// `Fatal` with this kind.
    failure: Option<io::ErrorKind>,
    notify: Option<(EventQueue, TargetId)>,
}

struct Outbound {
    buffer: StreamBuffer,
    /// No further writes accepted; the writer thread drains and exits.
    closed: bool,
    failed: bool,
    error: Option<io::Error>,
    /// A write reported `WouldBlock`; the next has-space transition (or a
    /// later `watch`) owes the caller a `STREAM_WRITABLE` event.
    blocked: bool,
    notify: Option<(EventQueue, TargetId)>,
}

struct LinkShared {
    inbound: Mutex<Inbound>,
    outbound: Mutex<Outbound>,
    /// Signals the writer thread that bytes (or a close) arrived.
    outbound_ready: Condvar,
}

/// A non-blocking stream over a connected TCP socket.
///
/// The socket itself is serviced by two dedicated threads: a reader filling
/// the inbound buffer with blocking reads, and a writer draining the bounded
/// outbound buffer.  The owner of the link only ever touches those buffers,
/// so [`read`](Stream::read) and [`write`](Stream::write) return immediately
/// with bytes, `WouldBlock`, `EndOfStream`, `Closed`, or a `Fatal` socket
/// error, per the stream contract.
///
/// Call [`watch`](TcpLink::watch) to have readiness posted to an event queue.
pub struct TcpLink {
    shared: Arc<LinkShared>,
    socket: TcpStream,
    peer: SocketAddr,
    target: EventTarget,
    closed: bool,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl TcpLink {
    /// Connects to `addr` and starts the service threads.
    pub fn connect(addr: SocketAddr) -> Result<TcpLink, NetError> {
        let socket =
            TcpStream::connect(addr).map_err(|source| NetError::ConnectFailed { addr, source })?;
        TcpLink::from_stream(socket).map_err(NetError::Setup)
    }

    /// Wraps an already-connected socket (e.g. one handed over by
    /// [`TcpAcceptor`](crate::TcpAcceptor)).
    pub fn from_stream(socket: TcpStream) -> io::Result<TcpLink> {
        socket.set_nodelay(true)?;
        // Sockets accepted from a non-blocking listener may inherit the
        // non-blocking flag on some platforms; the service threads need
        // blocking reads and writes.
        socket.set_nonblocking(false)?;
        let peer = socket.peer_addr()?;
        let shared = Arc::new(LinkShared {
            inbound: Mutex::new(Inbound {
                buffer: StreamBuffer::new(),
                eof: false,
                failure: None,
                notify: None,
            }),
            outbound: Mutex::new(Outbound {
                buffer: StreamBuffer::new(),
                closed: false,
                failed: false,
                error: None,
                blocked: false,
                notify: None,
            }),
            outbound_ready: Condvar::new(),
        });

        let reader = {
            let socket = socket.try_clone()?;
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("span-net-read-{peer}"))
                .spawn(move || reader_loop(socket, shared, peer))?
        };
        let writer = {
            let socket = socket.try_clone()?;
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("span-net-write-{peer}"))
                .spawn(move || writer_loop(socket, shared, peer))?
        };

        debug!(%peer, "link established");
        Ok(TcpLink {
            shared,
            socket,
            peer,
            target: EventTarget::new(),
            closed: false,
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Starts posting readiness events for this link to `queue`, addressed to
    /// [`target`](Stream::target).  Edges that fired before the watch are
    /// replayed immediately: a readable event if bytes or an end-of-stream
    /// condition already arrived, a writable event if a write hit
    /// `WouldBlock` and space has since come back.
    pub fn watch(&self, queue: &EventQueue) {
        let already_readable = {
            let mut inbound = self.shared.inbound.lock();
            inbound.notify = Some((queue.clone(), self.target.id()));
            !inbound.buffer.is_empty() || inbound.eof || inbound.failure.is_some()
        };
        let already_writable = {
            let mut outbound = self.shared.outbound.lock();
            outbound.notify = Some((queue.clone(), self.target.id()));
            if outbound.blocked && outbound.buffer.len() < OUTBOUND_CAPACITY {
                outbound.blocked = false;
                true
            } else {
                false
            }
        };
        if already_readable {
            queue.post_event(Event::new(EventType::STREAM_READABLE, self.target.id()));
        }
        if already_writable {
            queue.post_event(Event::new(EventType::STREAM_WRITABLE, self.target.id()));
        }
    }

    fn close_inner(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared.outbound.lock().closed = true;
        self.shared.outbound_ready.notify_one();
        // Let the writer drain what was buffered before the close, but only
        // for a bounded grace: a peer that stopped reading leaves the writer
        // stuck in a kernel send, and close runs on the dispatch thread.
        // After the grace the shutdown fails that send and unblocks the join.
        if let Some(writer) = self.writer.take() {
            let deadline = Instant::now() + CLOSE_FLUSH_GRACE;
            while !writer.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            let _ = self.socket.shutdown(Shutdown::Both);
            let _ = writer.join();
        } else {
            let _ = self.socket.shutdown(Shutdown::Both);
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        debug!(peer = %self.peer, "link closed");
    }
}

impl Stream for TcpLink {
    fn read(&mut self, buf: &mut [u8]) -> StreamResult<usize> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        let mut inbound = self.shared.inbound.lock();
        if !inbound.buffer.is_empty() {
            return Ok(inbound.buffer.read_into(buf));
        }
        // Sticky: a dead link must keep reporting Fatal, never fall back to
        // WouldBlock (which would invite a retry that can never succeed).
        if let Some(kind) = inbound.failure {
            return Err(StreamError::Fatal(io::Error::from(kind)));
        }
        if inbound.eof {
            return Err(StreamError::EndOfStream);
        }
        Err(StreamError::WouldBlock)
    }

    fn write(&mut self, data: &[u8]) -> StreamResult<usize> {
        if self.closed {
            return Err(StreamError::Closed);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let mut outbound = self.shared.outbound.lock();
        if outbound.failed {
            let error = outbound
                .error
                .take()
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "link writer failed"));
            return Err(StreamError::Fatal(error));
        }
        let space = OUTBOUND_CAPACITY.saturating_sub(outbound.buffer.len());
        if space == 0 {
            outbound.blocked = true;
            return Err(StreamError::WouldBlock);
        }
        let n = data.len().min(space);
        outbound.buffer.write(&data[..n]);
        drop(outbound);
        self.shared.outbound_ready.notify_one();
        Ok(n)
    }

    fn close(&mut self) {
        self.close_inner();
    }

    fn state(&self) -> StreamState {
        if self.closed {
            return StreamState::Closed;
        }
        let inbound = self.shared.inbound.lock();
        if inbound.eof && inbound.buffer.is_empty() {
            StreamState::AtEndOfStream
        } else {
            StreamState::Open
        }
    }

    fn target(&self) -> &EventTarget {
        &self.target
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.close_inner();
    }
}

fn post_readable(notify: Option<(EventQueue, TargetId)>) {
    if let Some((queue, target)) = notify {
        queue.post_event(Event::new(EventType::STREAM_READABLE, target));
    }
}

fn reader_loop(mut socket: TcpStream, shared: Arc<LinkShared>, peer: SocketAddr) {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match socket.read(&mut chunk) {
            Ok(0) => {
                let notify = {
                    let mut inbound = shared.inbound.lock();
                    inbound.eof = true;
                    inbound.notify.clone()
                };
                post_readable(notify);
                debug!(%peer, "peer closed its write side");
                break;
            }
            Ok(n) => {
                let notify = {
                    let mut inbound = shared.inbound.lock();
                    let was_empty = inbound.buffer.is_empty();
                    inbound.buffer.write(&chunk[..n]);
                    if was_empty {
                        inbound.notify.clone()
                    } else {
                        None
                    }
                };
                post_readable(notify);
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => {
                warn!(%peer, %error, "read failed");
                let notify = {
                    let mut inbound = shared.inbound.lock();
                    inbound.failure = Some(error.kind());
                    inbound.notify.clone()
                };
                post_readable(notify);
                break;
            }
        }
    }
}

fn writer_loop(mut socket: TcpStream, shared: Arc<LinkShared>, peer: SocketAddr) {
    loop {
        let mut outbound = shared.outbound.lock();
        while outbound.buffer.is_empty() && !outbound.closed && !outbound.failed {
            shared.outbound_ready.wait(&mut outbound);
        }
        if outbound.failed || (outbound.closed && outbound.buffer.is_empty()) {
            break;
        }
        let n = outbound.buffer.len().min(READ_CHUNK);
        let chunk = outbound.buffer.peek(n).to_vec();
        outbound.buffer.pop(n);
        // Only a caller that actually hit WouldBlock is owed a writable event.
        let notify = if outbound.blocked && outbound.buffer.len() < OUTBOUND_CAPACITY {
            outbound.blocked = false;
            outbound.notify.clone()
        } else {
            None
        };
        drop(outbound);

        if let Some((queue, target)) = notify {
            queue.post_event(Event::new(EventType::STREAM_WRITABLE, target));
        }
        if let Err(error) = socket.write_all(&chunk) {
            warn!(%peer, %error, "write failed");
            let mut outbound = shared.outbound.lock();
            outbound.failed = true;
            outbound.error = Some(error);
            break;
        }
    }
}
