pub mod buffer;
pub mod processor;
pub mod runtime;
pub mod store;

pub use buffer::ordered_queue::OrderedLedgerQueue;
pub use buffer::record::{LedgerRecord, Message};
pub use processor::chain::{ProcessorChain, SLOW_STAGE_THRESHOLD};
pub use processor::fetcher::{BufferedRetriever, ConsumeFuture, LedgerConsumer, RetrieverOptions};
pub use processor::range::{LedgerRange, RangeError};
pub use runtime::config::{
    ConfigError, ConfigMap, SourceConfig, SourceConfigBuilder, SourceConfigParams,
};
pub use runtime::error::SourceError;
pub use runtime::progress::{RateSample, RateTracker};
pub use runtime::runner::Runner;
pub use runtime::source::{
    BufferedStorageSource, LedgerSource, PluginKind, RunSummary, SourceFuture,
};
pub use runtime::stage::{LedgerStage, StageContext, StageError, StageFuture};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use store::{
    DataStoreSchema, FetchError, FileFetchError, LedgerFile, LedgerStore, LedgerStoreConnector,
    MemoryLedgerStore, StoreParams,
};
