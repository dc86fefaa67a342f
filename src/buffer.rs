//! Record types, the ordered read-ahead buffer, and the fetch workers that
//! fill it.

pub mod ordered_queue;
pub mod record;
pub mod worker;
