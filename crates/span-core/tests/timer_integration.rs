//! Integration tests for timer scheduling, ordering, and cancellation.
//!
//! Timing margins are deliberately generous (intervals of tens of
//! milliseconds, sleeps well past the deadline under test) so the assertions
//! hold on loaded CI machines.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use span_core::{EventQueue, EventTarget, EventType, TargetId, Timer, TimerFired};

/// Collects every timer event currently due, without blocking.
fn drain_timer_events(queue: &EventQueue) -> Vec<(TargetId, u64)> {
    let mut fires = Vec::new();
    while let Some(mut event) = queue.wait_for_event(Duration::ZERO) {
        if event.event_type() == EventType::TIMER {
            let fired = event.take_payload::<TimerFired>().expect("timer payload");
            fires.push((event.target(), fired.count));
        }
    }
    fires
}

#[test]
fn one_shot_timer_fires_exactly_once() {
    let queue = EventQueue::new();
    let timer = queue.create_timer(Duration::from_millis(20), false, None);

    thread::sleep(Duration::from_millis(120));
    let fires = drain_timer_events(&queue);
    assert_eq!(fires.len(), 1);
    assert_eq!(fires[0].0, timer.target().id());
    assert_eq!(fires[0].1, 1);
    assert_eq!(timer.times_fired(), 1);

    // Left un-destroyed: it must still never fire again.
    thread::sleep(Duration::from_millis(100));
    assert!(drain_timer_events(&queue).is_empty());
    assert_eq!(timer.times_fired(), 1);
}

#[test]
fn repeating_timer_fires_once_per_elapsed_interval() {
    let queue = EventQueue::new();
    // No handler registered: delivered-but-unhandled fires are simply
    // dropped after lookup, without error.
    let timer = queue.create_timer(Duration::from_millis(50), true, None);

    thread::sleep(Duration::from_millis(175));
    let fires = drain_timer_events(&queue);
    assert_eq!(fires.len(), 3, "expected 3 fires in 3.5 intervals");
    assert_eq!(timer.times_fired(), 3);
    let counts: Vec<u64> = fires.iter().map(|&(_, count)| count).collect();
    assert_eq!(counts, vec![1, 2, 3]);
}

#[test]
fn fires_are_delivered_in_deadline_order_with_creation_tie_break() {
    let queue = EventQueue::new();
    let slow_first = queue.create_timer(Duration::from_millis(60), false, None);
    let slow_second = queue.create_timer(Duration::from_millis(60), false, None);
    let fast = queue.create_timer(Duration::from_millis(20), false, None);

    thread::sleep(Duration::from_millis(150));
    let fires = drain_timer_events(&queue);
    let order: Vec<TargetId> = fires.into_iter().map(|(target, _)| target).collect();
    assert_eq!(
        order,
        vec![
            fast.target().id(),
            slow_first.target().id(),
            slow_second.target().id(),
        ]
    );
}

#[test]
fn destroyed_timer_never_fires() {
    let queue = EventQueue::new();
    let timer = queue.create_timer(Duration::from_millis(30), false, None);
    drop(timer);

    thread::sleep(Duration::from_millis(100));
    assert!(drain_timer_events(&queue).is_empty());
}

#[test]
fn destroying_a_repeating_timer_in_its_own_handler_stops_further_fires() {
    let queue = EventQueue::new();
    let timer = queue.create_timer(Duration::from_millis(20), true, None);

    let calls = Arc::new(AtomicU32::new(0));
    let slot: Arc<Mutex<Option<Timer>>> = Arc::new(Mutex::new(None));
    {
        let calls = Arc::clone(&calls);
        let slot = Arc::clone(&slot);
        queue.register_handler(timer.target(), EventType::TIMER, move |_| {
            calls.fetch_add(1, Ordering::Relaxed);
            // Destruction during the timer's own firing must not re-arm.
            slot.lock().take();
        });
    }
    *slot.lock() = Some(timer);

    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        if let Some(event) = queue.wait_for_event(Duration::from_millis(20)) {
            queue.dispatch_event(event);
        }
    }

    assert_eq!(calls.load(Ordering::Relaxed), 1, "timer fired after cancel");
    assert!(slot.lock().is_none());
    assert_eq!(queue.pending_events(), 0);
}

#[test]
fn cancellation_scrubs_pending_fires_but_not_siblings() {
    let queue = EventQueue::new();
    let shared_target = EventTarget::new();
    let doomed = queue.create_timer(Duration::from_millis(10), false, Some(&shared_target));
    let survivor = queue.create_timer(Duration::from_millis(10), false, Some(&shared_target));

    // Let both fire into the pending queue, then cancel one before dispatch.
    thread::sleep(Duration::from_millis(80));
    assert_eq!(queue.pending_events(), 0); // not serviced yet: no wait happened
    queue.wake();
    let _ = queue.wait_for_event(Duration::ZERO); // services timers, pops wake
    assert_eq!(queue.pending_events(), 2);

    drop(doomed);
    let fires = drain_timer_events(&queue);
    assert_eq!(fires.len(), 1, "sibling fire must survive the scrub");
    drop(survivor);
}

#[test]
fn timer_with_explicit_target_fires_at_that_target() {
    let queue = EventQueue::new();
    let owner = EventTarget::new();
    let fired = Arc::new(AtomicU32::new(0));
    {
        let fired = Arc::clone(&fired);
        queue.register_handler(&owner, EventType::TIMER, move |event| {
            let payload = event.take_payload::<TimerFired>().expect("timer payload");
            fired.store(payload.count as u32, Ordering::Relaxed);
        });
    }

    let timer = queue.create_timer(Duration::from_millis(20), false, Some(&owner));
    assert_eq!(timer.fire_target(), owner.id());

    let deadline = Instant::now() + Duration::from_secs(1);
    while fired.load(Ordering::Relaxed) == 0 && Instant::now() < deadline {
        if let Some(event) = queue.wait_for_event(Duration::from_millis(20)) {
            queue.dispatch_event(event);
        }
    }
    assert_eq!(fired.load(Ordering::Relaxed), 1);
}

#[test]
fn dropping_the_fire_target_cancels_the_timer() {
    let queue = EventQueue::new();
    let owner = EventTarget::new();
    queue.register_handler(&owner, EventType::TIMER, |_| {});
    let timer = queue.create_timer(Duration::from_millis(20), true, Some(&owner));

    drop(owner);
    thread::sleep(Duration::from_millis(100));
    assert!(drain_timer_events(&queue).is_empty());
    assert_eq!(timer.times_fired(), 0);
}
