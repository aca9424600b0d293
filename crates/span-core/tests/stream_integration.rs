//! Integration tests for the stream contract wired through the event queue:
//! readiness events, WouldBlock retry, and end-of-stream observation.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use span_core::{
    drain_into, pipe, DrainOutcome, EventQueue, EventType, PipeStream, Stream, StreamBuffer,
    StreamError,
};

fn pump_until(queue: &EventQueue, budget: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + budget;
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return done();
        }
        if let Some(event) = queue.wait_for_event(Duration::from_millis(20)) {
            queue.dispatch_event(event);
        }
    }
}

#[test]
fn data_arrival_wakes_the_dispatch_thread() {
    let queue = EventQueue::new();
    let (mut writer_end, reader_end) = pipe(1024);
    reader_end.watch(&queue);

    let reader = Arc::new(Mutex::new(reader_end));
    let inbox = Arc::new(Mutex::new(StreamBuffer::new()));
    {
        let handler_reader = Arc::clone(&reader);
        let inbox = Arc::clone(&inbox);
        let guard = reader.lock();
        queue.register_handler(guard.target(), EventType::STREAM_READABLE, move |_| {
            let mut stream = handler_reader.lock();
            let mut inbox = inbox.lock();
            drain_into(&mut *stream, &mut inbox).expect("drain");
        });
        drop(guard);
    }

    let worker = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        writer_end.write(b"input event").expect("pipe write");
        writer_end
    });

    let started = Instant::now();
    assert!(pump_until(&queue, Duration::from_secs(2), || {
        inbox.lock().len() == 11
    }));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(inbox.lock().peek(11), b"input event");
    drop(worker.join().unwrap());
}

#[test]
fn would_block_then_retry_after_readiness() {
    let queue = EventQueue::new();
    let (mut a, mut b) = pipe(1024);

    // First attempt: nothing there, zero bytes, no side effects.
    let mut buf = [0u8; 16];
    assert!(matches!(b.read(&mut buf), Err(StreamError::WouldBlock)));
    assert!(matches!(b.read(&mut buf), Err(StreamError::WouldBlock)));

    // Re-arm readiness interest, then let data arrive.
    b.watch(&queue);
    a.write(b"retry").expect("pipe write");

    let event = queue
        .wait_for_event(Duration::from_secs(1))
        .expect("readable event");
    assert_eq!(event.event_type(), EventType::STREAM_READABLE);
    assert_eq!(event.target(), b.target().id());

    // The very same call now returns the expected byte count.
    assert_eq!(b.read(&mut buf).expect("read"), 5);
    assert_eq!(&buf[..5], b"retry");
}

#[test]
fn watch_after_data_already_arrived_posts_immediately() {
    let queue = EventQueue::new();
    let (mut a, b) = pipe(1024);
    a.write(b"early").expect("pipe write");

    b.watch(&queue);
    let event = queue
        .wait_for_event(Duration::from_millis(100))
        .expect("missed edge");
    assert_eq!(event.event_type(), EventType::STREAM_READABLE);
    assert_eq!(event.target(), b.target().id());
}

#[test]
fn peer_close_is_observed_as_end_of_stream_through_the_queue() {
    let queue = EventQueue::new();
    let (mut a, reader_end) = pipe(1024);
    reader_end.watch(&queue);

    let reader: Arc<Mutex<PipeStream>> = Arc::new(Mutex::new(reader_end));
    let inbox = Arc::new(Mutex::new(StreamBuffer::new()));
    let saw_eos = Arc::new(AtomicBool::new(false));
    {
        let handler_reader = Arc::clone(&reader);
        let inbox = Arc::clone(&inbox);
        let saw_eos = Arc::clone(&saw_eos);
        let guard = reader.lock();
        queue.register_handler(guard.target(), EventType::STREAM_READABLE, move |_| {
            let mut stream = handler_reader.lock();
            let mut inbox = inbox.lock();
            match drain_into(&mut *stream, &mut inbox).expect("drain") {
                DrainOutcome::EndOfStream => saw_eos.store(true, Ordering::Relaxed),
                DrainOutcome::Drained => {}
            }
        });
        drop(guard);
    }

    a.write(b"last words").expect("pipe write");
    a.close();

    assert!(pump_until(&queue, Duration::from_secs(2), || {
        saw_eos.load(Ordering::Relaxed)
    }));
    assert_eq!(inbox.lock().peek(10), b"last words");
}

#[test]
fn watch_replays_a_missed_writable_edge() {
    let queue = EventQueue::new();
    let (mut a, mut b) = pipe(4);

    assert_eq!(a.write(b"full").expect("fill"), 4);
    assert!(matches!(a.write(b"x"), Err(StreamError::WouldBlock)));

    // The peer drains before the writer ever watches; the has-space
    // transition happens with nobody listening.
    let mut buf = [0u8; 4];
    assert_eq!(b.read(&mut buf).expect("drain"), 4);

    a.watch(&queue);
    let event = queue
        .wait_for_event(Duration::from_millis(100))
        .expect("missed writable edge");
    assert_eq!(event.event_type(), EventType::STREAM_WRITABLE);
    assert_eq!(event.target(), a.target().id());
    assert_eq!(a.write(b"more").expect("retry"), 4);
}

#[test]
fn writable_event_arrives_when_a_full_pipe_drains() {
    let queue = EventQueue::new();
    let (writer_end, mut b) = pipe(4);
    writer_end.watch(&queue);

    let writable_seen = Arc::new(AtomicU32::new(0));
    let writer = Arc::new(Mutex::new(writer_end));
    {
        let writable_seen = Arc::clone(&writable_seen);
        let guard = writer.lock();
        queue.register_handler(guard.target(), EventType::STREAM_WRITABLE, move |_| {
            writable_seen.fetch_add(1, Ordering::Relaxed);
        });
        drop(guard);
    }

    {
        let mut w = writer.lock();
        assert_eq!(w.write(b"full").expect("fill"), 4);
        assert!(matches!(w.write(b"x"), Err(StreamError::WouldBlock)));
    }

    let mut buf = [0u8; 4];
    assert_eq!(b.read(&mut buf).expect("drain"), 4);

    assert!(pump_until(&queue, Duration::from_secs(1), || {
        writable_seen.load(Ordering::Relaxed) == 1
    }));

    // Space is genuinely back.
    assert_eq!(writer.lock().write(b"more").expect("retry"), 4);
}
