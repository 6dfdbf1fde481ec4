use riskd_schemas::{ErrorState, Event};
use std::future::Future;
use tokio::sync::mpsc;

use crate::dedup::DedupLru;
use crate::queue::{EnqueueOutcome, EventQueue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Queued,
    Duplicate,
    DroppedLowPriority,
    Overflow,
}

/// Owns the bounded priority queue and the dedup LRU. Producers (broker
/// adapter I/O, timer source, the HTTP control surface) only ever call
/// [`EventCore::ingest`]; only the single dispatch task calls
/// [`EventCore::next`].
pub struct EventCore {
    queue: EventQueue,
    dedup: DedupLru,
    error_state: ErrorState,
}

impl EventCore {
    pub fn new(queue_capacity: usize, dedup_size: usize) -> Self {
        EventCore {
            queue: EventQueue::new(queue_capacity),
            dedup: DedupLru::new(dedup_size),
            error_state: ErrorState::Normal,
        }
    }

    pub fn error_state(&self) -> ErrorState {
        self.error_state
    }

    pub fn depth(&self) -> usize {
        self.queue.len()
    }

    pub fn ingest(&mut self, event: Event) -> IngestOutcome {
        if self.dedup.check_and_record(event.event_id) {
            return IngestOutcome::Duplicate;
        }
        match self.queue.try_enqueue(event) {
            EnqueueOutcome::Accepted => IngestOutcome::Queued,
            EnqueueOutcome::DroppedPriority6 => IngestOutcome::DroppedLowPriority,
            EnqueueOutcome::Overflow => {
                self.error_state = ErrorState::Safe;
                IngestOutcome::Overflow
            }
        }
    }

    pub fn next(&mut self) -> Option<Event> {
        self.queue.pop()
    }
}

/// Drive the single-consumer dispatch loop: pull inbound events off
/// `source`, admit them into `core`, then drain everything ready in
/// priority order before awaiting the next inbound event. `handle` is
/// awaited to completion before the next event in the drained batch is
/// processed, matching the single-writer ordering guarantee over account
/// state.
pub async fn run_dispatch_loop<H, Fut>(mut core: EventCore, mut source: mpsc::Receiver<Event>, mut handle: H)
where
    H: FnMut(Event) -> Fut,
    Fut: Future<Output = ()>,
{
    while let Some(event) = source.recv().await {
        core.ingest(event);
        while let Some(ready) = core.next() {
            handle(ready).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use riskd_schemas::EventPayload;
    use uuid::Uuid;

    fn tick(seq: u64) -> Event {
        Event::new("acct-1", "timer", Utc::now(), seq, Uuid::new_v4(), EventPayload::TimeTick)
    }

    #[test]
    fn duplicate_event_id_is_not_requeued() {
        let mut core = EventCore::new(10, 10);
        let event = tick(1);
        let dup = event.clone();
        assert_eq!(core.ingest(event), IngestOutcome::Queued);
        assert_eq!(core.ingest(dup), IngestOutcome::Duplicate);
        assert_eq!(core.depth(), 1);
    }

    #[test]
    fn overflow_of_non_heartbeat_enters_safe_state() {
        let mut core = EventCore::new(1, 10);
        assert_eq!(core.ingest(tick(1)), IngestOutcome::Queued);
        assert_eq!(core.ingest(tick(2)), IngestOutcome::Overflow);
        assert_eq!(core.error_state(), ErrorState::Safe);
    }

    #[tokio::test]
    async fn dispatch_loop_processes_events_in_priority_order() {
        let core = EventCore::new(10, 10);
        let (tx, rx) = mpsc::channel(10);
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        tx.send(tick(1)).await.unwrap();
        tx.send(tick(2)).await.unwrap();
        drop(tx);

        run_dispatch_loop(core, rx, |event| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().unwrap().push(event.monotonic_seq);
            }
        })
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }
}
