//! Processor orchestration covering range selection, retrieval loops,
//! lifecycle management, stage dispatch, and worker pool coordination.

pub(crate) mod backoff;
pub mod chain;
pub mod fetcher;
pub(crate) mod lifecycle;
pub mod range;
pub(crate) mod worker_pool;
