//! Fetch worker split across focused submodules:
//! - `types`: outcomes and stride helpers shared by the worker loop
//! - `shared`: state every worker of a run holds a handle to
//! - `process`: worker struct plus the run/deliver loop
//! - `fetch`: single-file fetch with retry, polling and validation
//! - `tests`: worker unit tests

mod fetch;
mod process;
mod shared;
mod types;


pub use process::Worker;
pub use shared::{WorkerShared, WorkerSharedParams};
pub use types::worker_stride;
