//! Event Queue Tests.
//!
//! Verifies that events in flight leave in arrival-cycle order, with ties broken by
//! scheduling order.

use memhier_core::protocol::{Command, EventId, MemEvent};
use memhier_core::sim::queue::EventQueue;
use pretty_assertions::assert_eq;

fn event(seq: u64) -> MemEvent {
    MemEvent::new(EventId { origin: 1, seq }, "cpu0", 0, 0, Command::GetS, 64)
}

/// Nothing leaves before its arrival cycle.
#[test]
fn holds_until_due() {
    let mut queue = EventQueue::new();
    queue.push(5, 0, event(0));
    assert_eq!(queue.next_time(), Some(5));
    assert!(queue.pop_ready(4).is_none());
    assert_eq!(queue.len(), 1);

    let (dst, ev) = queue.pop_ready(5).expect("due at 5");
    assert_eq!(dst, 0);
    assert_eq!(ev.id.seq, 0);
    assert!(queue.is_empty());
}

/// Earlier arrivals leave first regardless of scheduling order.
#[test]
fn ordered_by_time() {
    let mut queue = EventQueue::new();
    queue.push(9, 2, event(0));
    queue.push(3, 1, event(1));
    queue.push(6, 0, event(2));

    let order: Vec<u64> = std::iter::from_fn(|| queue.pop_ready(10))
        .map(|(_, e)| e.id.seq)
        .collect();
    assert_eq!(order, vec![1, 2, 0]);
}

/// Events due in the same cycle keep the order they were scheduled in.
#[test]
fn ties_keep_schedule_order() {
    let mut queue = EventQueue::new();
    for seq in 0..8 {
        queue.push(4, 0, event(seq));
    }
    let order: Vec<u64> = std::iter::from_fn(|| queue.pop_ready(4))
        .map(|(_, e)| e.id.seq)
        .collect();
    assert_eq!(order, (0..8).collect::<Vec<_>>());
}

/// Overdue events are still delivered.
#[test]
fn overdue_events_delivered() {
    let mut queue = EventQueue::new();
    queue.push(1, 3, event(0));
    assert_eq!(queue.pop_ready(100).map(|(dst, _)| dst), Some(3));
    assert_eq!(queue.next_time(), None);
}
