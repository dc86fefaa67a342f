//! Ledger store plumbing: the partition/file schema, the store and connector
//! traits consumed by fetch workers, and an in-memory store.

pub mod client;
pub mod memory;
pub mod schema;

pub use client::{FetchError, FileFetchError, LedgerStore, LedgerStoreConnector, StoreParams};
pub use memory::MemoryLedgerStore;
pub use schema::{DataStoreSchema, LedgerFile};
