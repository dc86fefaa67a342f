use bytes::Bytes;
use std::time::SystemTime;

/// A sequentially numbered ledger snapshot. The content is opaque to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    sequence: u32,
    content: Bytes,
}

impl LedgerRecord {
    pub fn new(sequence: u32, content: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            content: content.into(),
        }
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn into_content(self) -> Bytes {
        self.content
    }
}

/// Envelope handed to every stage of the processor chain for a single record.
///
/// One message is built per record and lent to each stage in turn, so stages
/// observe the same payload and timestamp.
#[derive(Debug, Clone)]
pub struct Message {
    payload: LedgerRecord,
    timestamp: SystemTime,
}

impl Message {
    pub fn new(payload: LedgerRecord, timestamp: SystemTime) -> Self {
        Self { payload, timestamp }
    }

    pub fn payload(&self) -> &LedgerRecord {
        &self.payload
    }

    pub fn sequence(&self) -> u32 {
        self.payload.sequence()
    }

    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    pub fn into_payload(self) -> LedgerRecord {
        self.payload
    }
}
