use super::record::LedgerRecord;
use std::collections::HashMap;
use tokio::sync::{Mutex, Notify};

struct QueueState {
    next_expected: u32,
    records: HashMap<u32, LedgerRecord>,
}

impl QueueState {
    fn new(next_expected: u32) -> Self {
        Self {
            next_expected,
            records: HashMap::new(),
        }
    }
}

/// Async queue that only releases records in ascending sequence order.
///
/// Producers block once `capacity` records are buffered, except for the record
/// the consumer is waiting on, which is always admitted.
pub struct OrderedLedgerQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl OrderedLedgerQueue {
    pub fn new(next_expected: u32, capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be greater than zero");
        Self {
            state: Mutex::new(QueueState::new(next_expected)),
            notify: Notify::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn push(&self, record: LedgerRecord) {
        let mut pending = Some(record);
        loop {
            let notified = self.notify.notified();
            let mut state = self.state.lock().await;
            let Some(sequence) = pending.as_ref().map(LedgerRecord::sequence) else {
                return;
            };
            if sequence < state.next_expected {
                tracing::trace!(sequence, "discarding record below the delivery frontier");
                return;
            }
            let has_room = state.records.len() < self.capacity;
            let is_next_expected = sequence == state.next_expected;
            if has_room || is_next_expected {
                if let Some(record) = pending.take() {
                    state.records.insert(sequence, record);
                }
                drop(state);
                self.notify.notify_waiters();
                return;
            }
            drop(state);
            notified.await;
        }
    }

    pub async fn pop_next(&self) -> LedgerRecord {
        loop {
            if let Some(record) = self.try_pop_next().await {
                self.notify.notify_waiters();
                return record;
            }
            #[cfg(test)]
            {
                test_hooks::pause_in_gap(self as *const Self as usize).await;
            }
            let notified = self.notify.notified();
            if let Some(record) = self.try_pop_next().await {
                self.notify.notify_waiters();
                return record;
            }
            notified.await;
        }
    }

    pub async fn try_pop_next(&self) -> Option<LedgerRecord> {
        let mut state = self.state.lock().await;
        let expected = state.next_expected;
        let record = state.records.remove(&expected)?;
        state.next_expected = expected.saturating_add(1);
        Some(record)
    }

    pub async fn clear(&self) {
        self.state.lock().await.records.clear();
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }

    pub async fn has_ready_record(&self) -> bool {
        let state = self.state.lock().await;
        state.records.contains_key(&state.next_expected)
    }

    pub async fn next_expected(&self) -> u32 {
        self.state.lock().await.next_expected
    }
}
