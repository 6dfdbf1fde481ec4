use riskd_schemas::Event;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

struct OrderedEvent(Event);

impl PartialEq for OrderedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.0.order_key() == other.0.order_key()
    }
}
impl Eq for OrderedEvent {}

impl PartialOrd for OrderedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the lowest (priority,
        // timestamp, monotonic_seq) key — the highest-priority event — pops
        // first.
        other.0.order_key().cmp(&self.0.order_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    DroppedPriority6,
    Overflow,
}

/// Bounded priority queue ordered by `(priority, timestamp, monotonic_seq)`.
/// At capacity, priority-6 (heartbeat) events are dropped silently; any
/// other event arriving at capacity is an overflow the caller must escalate.
pub struct EventQueue {
    capacity: usize,
    heap: BinaryHeap<OrderedEvent>,
    warned_at_high_water: bool,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        EventQueue {
            capacity,
            heap: BinaryHeap::new(),
            warned_at_high_water: false,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn try_enqueue(&mut self, event: Event) -> EnqueueOutcome {
        if self.heap.len() >= self.capacity {
            return if event.priority == 6 {
                tracing::debug!(event_id = %event.event_id, "dropping heartbeat at full queue");
                EnqueueOutcome::DroppedPriority6
            } else {
                tracing::error!(event_id = %event.event_id, priority = event.priority, "queue overflow");
                EnqueueOutcome::Overflow
            };
        }
        self.heap.push(OrderedEvent(event));
        self.check_high_water();
        EnqueueOutcome::Accepted
    }

    pub fn pop(&mut self) -> Option<Event> {
        let popped = self.heap.pop().map(|oe| oe.0);
        if self.heap.len() * 10 < self.capacity * 8 {
            self.warned_at_high_water = false;
        }
        popped
    }

    fn check_high_water(&mut self) {
        if !self.warned_at_high_water && self.heap.len() * 10 >= self.capacity * 8 {
            self.warned_at_high_water = true;
            tracing::warn!(depth = self.heap.len(), capacity = self.capacity, "event queue at 80% capacity");
        }
    }
}
