use crate::processor::range::RangeError;
use crate::store::client::StoreParams;
use crate::store::schema::DataStoreSchema;
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_BUFFER_SIZE: u32 = 1024;
pub const DEFAULT_NUM_WORKERS: u32 = 10;
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_RETRY_WAIT_SECS: u32 = 5;
pub const DEFAULT_LEDGERS_PER_FILE: u32 = 64;
pub const DEFAULT_FILES_PER_PARTITION: u32 = 10;

/// Dynamic configuration handed over by the host.
pub type ConfigMap = Map<String, Value>;

/// Validated configuration for a buffered storage run.
///
/// Instances are only produced by [`SourceConfig::new`], the builder, or
/// [`SourceConfig::from_map`], so every consumer sees defaulted, validated values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    bucket_name: String,
    network: String,
    buffer_size: u32,
    num_workers: u32,
    retry_limit: u32,
    retry_wait_secs: u32,
    start_ledger: u32,
    end_ledger: u32,
    ledgers_per_file: u32,
    files_per_partition: u32,
}

pub struct SourceConfigParams {
    pub bucket_name: String,
    pub network: String,
    pub buffer_size: u32,
    pub num_workers: u32,
    pub retry_limit: u32,
    pub retry_wait_secs: u32,
    pub start_ledger: u32,
    pub end_ledger: u32,
    pub ledgers_per_file: u32,
    pub files_per_partition: u32,
}

impl SourceConfig {
    pub fn builder() -> SourceConfigBuilder {
        SourceConfigBuilder::default()
    }

    /// Constructs a configuration from concrete values.
    ///
    /// Zero-valued tuning fields fall back to their defaults; `end_ledger == 0`
    /// keeps its meaning of "no end".
    pub fn new(params: SourceConfigParams) -> Result<Self, ConfigError> {
        let SourceConfigParams {
            bucket_name,
            network,
            buffer_size,
            num_workers,
            retry_limit,
            retry_wait_secs,
            start_ledger,
            end_ledger,
            ledgers_per_file,
            files_per_partition,
        } = params;

        let config = Self {
            bucket_name,
            network,
            buffer_size: or_default(buffer_size, DEFAULT_BUFFER_SIZE),
            num_workers: or_default(num_workers, DEFAULT_NUM_WORKERS),
            retry_limit: or_default(retry_limit, DEFAULT_RETRY_LIMIT),
            retry_wait_secs: or_default(retry_wait_secs, DEFAULT_RETRY_WAIT_SECS),
            start_ledger,
            end_ledger,
            ledgers_per_file: or_default(ledgers_per_file, DEFAULT_LEDGERS_PER_FILE),
            files_per_partition: or_default(files_per_partition, DEFAULT_FILES_PER_PARTITION),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parses the host's loosely typed configuration map.
    ///
    /// `start_ledger`, `bucket_name` and `network` are required. Numeric values
    /// may arrive as integers or integral floats and must fit in a `u32`.
    pub fn from_map(map: &ConfigMap) -> Result<Self, ConfigError> {
        let mut builder = Self::builder()
            .start_ledger(required_u32(map, "start_ledger")?)
            .bucket_name(required_string(map, "bucket_name")?)
            .network(required_string(map, "network")?);

        if let Some(value) = optional_u32(map, "end_ledger")? {
            builder = builder.end_ledger(value);
        }
        if let Some(value) = optional_u32(map, "buffer_size")? {
            builder = builder.buffer_size(value);
        }
        if let Some(value) = optional_u32(map, "num_workers")? {
            builder = builder.num_workers(value);
        }
        if let Some(value) = optional_u32(map, "retry_limit")? {
            builder = builder.retry_limit(value);
        }
        if let Some(value) = optional_u32(map, "retry_wait")? {
            builder = builder.retry_wait_secs(value);
        }
        if let Some(value) = optional_u32(map, "ledgers_per_file")? {
            builder = builder.ledgers_per_file(value);
        }
        if let Some(value) = optional_u32(map, "files_per_partition")? {
            builder = builder.files_per_partition(value);
        }

        builder.build()
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Maximum number of records held in the read-ahead buffer.
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub fn num_workers(&self) -> u32 {
        self.num_workers
    }

    /// Retries allowed after the initial attempt of a file fetch.
    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// Fixed delay between fetch attempts, also used as the poll interval at the tip.
    pub fn retry_wait(&self) -> Duration {
        Duration::from_secs(u64::from(self.retry_wait_secs))
    }

    pub fn start_ledger(&self) -> u32 {
        self.start_ledger
    }

    /// Zero when the run is unbounded.
    pub fn end_ledger(&self) -> u32 {
        self.end_ledger
    }

    pub fn ledgers_per_file(&self) -> u32 {
        self.ledgers_per_file
    }

    pub fn files_per_partition(&self) -> u32 {
        self.files_per_partition
    }

    pub fn schema(&self) -> DataStoreSchema {
        DataStoreSchema::new(self.ledgers_per_file, self.files_per_partition)
    }

    pub fn store_params(&self) -> StoreParams {
        StoreParams {
            network: self.network.clone(),
            bucket_name: self.bucket_name.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_not_empty(&self.bucket_name, "bucket_name")?;
        ensure_not_empty(&self.network, "network")?;

        if self.end_ledger != 0 && self.end_ledger < self.start_ledger {
            return Err(ConfigError::Range(RangeError {
                start: self.start_ledger,
                end: self.end_ledger,
            }));
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct SourceConfigBuilder {
    bucket_name: Option<String>,
    network: Option<String>,
    buffer_size: Option<u32>,
    num_workers: Option<u32>,
    retry_limit: Option<u32>,
    retry_wait_secs: Option<u32>,
    start_ledger: Option<u32>,
    end_ledger: Option<u32>,
    ledgers_per_file: Option<u32>,
    files_per_partition: Option<u32>,
}

impl SourceConfigBuilder {
    pub fn bucket_name(mut self, bucket: impl Into<String>) -> Self {
        self.bucket_name = Some(bucket.into());
        self
    }

    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = Some(network.into());
        self
    }

    pub fn buffer_size(mut self, records: u32) -> Self {
        self.buffer_size = Some(records);
        self
    }

    pub fn num_workers(mut self, workers: u32) -> Self {
        self.num_workers = Some(workers);
        self
    }

    pub fn retry_limit(mut self, retries: u32) -> Self {
        self.retry_limit = Some(retries);
        self
    }

    pub fn retry_wait_secs(mut self, seconds: u32) -> Self {
        self.retry_wait_secs = Some(seconds);
        self
    }

    pub fn start_ledger(mut self, sequence: u32) -> Self {
        self.start_ledger = Some(sequence);
        self
    }

    pub fn end_ledger(mut self, sequence: u32) -> Self {
        self.end_ledger = Some(sequence);
        self
    }

    pub fn ledgers_per_file(mut self, ledgers: u32) -> Self {
        self.ledgers_per_file = Some(ledgers);
        self
    }

    pub fn files_per_partition(mut self, files: u32) -> Self {
        self.files_per_partition = Some(files);
        self
    }

    pub fn build(self) -> Result<SourceConfig, ConfigError> {
        let params = SourceConfigParams {
            bucket_name: self.bucket_name.ok_or(ConfigError::Missing("bucket_name"))?,
            network: self.network.ok_or(ConfigError::Missing("network"))?,
            start_ledger: self
                .start_ledger
                .ok_or(ConfigError::Missing("start_ledger"))?,
            end_ledger: self.end_ledger.unwrap_or(0),
            buffer_size: self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE),
            num_workers: self.num_workers.unwrap_or(DEFAULT_NUM_WORKERS),
            retry_limit: self.retry_limit.unwrap_or(DEFAULT_RETRY_LIMIT),
            retry_wait_secs: self.retry_wait_secs.unwrap_or(DEFAULT_RETRY_WAIT_SECS),
            ledgers_per_file: self.ledgers_per_file.unwrap_or(DEFAULT_LEDGERS_PER_FILE),
            files_per_partition: self
                .files_per_partition
                .unwrap_or(DEFAULT_FILES_PER_PARTITION),
        };

        SourceConfig::new(params)
    }
}

/// Rejected configuration, raised before any I/O takes place.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    Missing(&'static str),
    InvalidType {
        key: &'static str,
        expected: &'static str,
    },
    InvalidNumber {
        key: &'static str,
        value: Value,
    },
    Empty(&'static str),
    Range(RangeError),
}

impl ConfigError {
    /// Configuration key the error refers to.
    pub fn key(&self) -> &'static str {
        match self {
            ConfigError::Missing(key) | ConfigError::Empty(key) => *key,
            ConfigError::InvalidType { key, .. } | ConfigError::InvalidNumber { key, .. } => *key,
            ConfigError::Range(_) => "end_ledger",
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "{key} must be specified"),
            ConfigError::InvalidType { key, expected } => {
                write!(f, "{key} must be {expected}")
            }
            ConfigError::InvalidNumber { key, value } => {
                write!(f, "{key} value {value} is not a valid unsigned 32-bit integer")
            }
            ConfigError::Empty(key) => write!(f, "{key} cannot be empty"),
            ConfigError::Range(err) => write!(f, "invalid ledger range: {err}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Range(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RangeError> for ConfigError {
    fn from(err: RangeError) -> Self {
        ConfigError::Range(err)
    }
}

/// Converts a JSON number to `u32` without truncation.
///
/// Integral floats such as `100.0` are accepted; negative, fractional,
/// non-finite and oversized values are rejected.
pub fn coerce_u32(key: &'static str, value: &Value) -> Result<u32, ConfigError> {
    let Value::Number(number) = value else {
        return Err(ConfigError::InvalidType {
            key,
            expected: "a number",
        });
    };

    let invalid = || ConfigError::InvalidNumber {
        key,
        value: value.clone(),
    };

    if let Some(unsigned) = number.as_u64() {
        return u32::try_from(unsigned).map_err(|_| invalid());
    }
    if let Some(signed) = number.as_i64() {
        return u32::try_from(signed).map_err(|_| invalid());
    }
    match number.as_f64() {
        Some(float)
            if float.is_finite()
                && float.fract() == 0.0
                && (0.0..=f64::from(u32::MAX)).contains(&float) =>
        {
            Ok(float as u32)
        }
        _ => Err(invalid()),
    }
}

fn required_u32(map: &ConfigMap, key: &'static str) -> Result<u32, ConfigError> {
    optional_u32(map, key)?.ok_or(ConfigError::Missing(key))
}

fn optional_u32(map: &ConfigMap, key: &'static str) -> Result<Option<u32>, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => coerce_u32(key, value).map(Some),
    }
}

fn required_string(map: &ConfigMap, key: &'static str) -> Result<String, ConfigError> {
    match map.get(key) {
        None | Some(Value::Null) => Err(ConfigError::Missing(key)),
        Some(Value::String(value)) => Ok(value.clone()),
        Some(_) => Err(ConfigError::InvalidType {
            key,
            expected: "a string",
        }),
    }
}

fn or_default(value: u32, default: u32) -> u32 {
    if value == 0 {
        default
    } else {
        value
    }
}

fn ensure_not_empty(value: &str, key: &'static str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Empty(key));
    }
    Ok(())
}
