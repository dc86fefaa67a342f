use crate::buffer::record::LedgerRecord;

#[derive(Debug)]
pub(super) enum FileOutcome {
    Ready(Vec<LedgerRecord>),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DeliveryOutcome {
    Delivered(usize),
    Cancelled,
}

/// Distance, in files, between two consecutive files handled by one worker.
pub fn worker_stride(worker_count: usize) -> u64 {
    worker_count.max(1) as u64
}
