use std::collections::{HashSet, VecDeque};
use uuid::Uuid;

/// Fixed-size LRU of already-dispatched event ids. Bounded so duplicate
/// detection has constant memory regardless of stream length; events older
/// than the window are assumed not to recur (producers redeliver promptly).
pub struct DedupLru {
    capacity: usize,
    order: VecDeque<Uuid>,
    seen: HashSet<Uuid>,
}

impl DedupLru {
    pub fn new(capacity: usize) -> Self {
        DedupLru {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Returns `true` if `id` was already recorded (a duplicate); otherwise
    /// records it and returns `false`.
    pub fn check_and_record(&mut self, id: Uuid) -> bool {
        if self.seen.contains(&id) {
            return true;
        }
        self.order.push_back(id);
        self.seen.insert(id);
        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        false
    }
}
