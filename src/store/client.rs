//! Abstractions over the remote ledger store. The concrete object-store client
//! lives outside this crate; workers only see [`LedgerStore`].

use crate::buffer::record::LedgerRecord;
use crate::store::schema::LedgerFile;
use anyhow::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Connection parameters identifying one ledger data lake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreParams {
    pub network: String,
    pub bucket_name: String,
}

/// Read access to a partitioned ledger store.
pub trait LedgerStore: Send + Sync {
    /// Fetches and decodes every record of `file`.
    ///
    /// Returns `Ok(None)` when the file has not been published yet.
    fn get_file<'a>(&'a self, file: &'a LedgerFile)
        -> BoxFuture<'a, Result<Option<Vec<LedgerRecord>>>>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for Arc<S> {
    fn get_file<'a>(
        &'a self,
        file: &'a LedgerFile,
    ) -> BoxFuture<'a, Result<Option<Vec<LedgerRecord>>>> {
        (**self).get_file(file)
    }
}

/// Builds a store handle from connection parameters when a run starts.
pub trait LedgerStoreConnector: Send + Sync {
    fn connect(&self, params: &StoreParams) -> Result<Arc<dyn LedgerStore>>;
}

impl<F> LedgerStoreConnector for F
where
    F: Fn(&StoreParams) -> Result<Arc<dyn LedgerStore>> + Send + Sync,
{
    fn connect(&self, params: &StoreParams) -> Result<Arc<dyn LedgerStore>> {
        self(params)
    }
}

/// Raised once a file fetch has exhausted its retry budget.
#[derive(Debug)]
pub struct FetchError {
    file: LedgerFile,
    attempts: usize,
    source: anyhow::Error,
}

impl FetchError {
    pub fn new(file: LedgerFile, attempts: usize, source: anyhow::Error) -> Self {
        Self {
            file,
            attempts,
            source,
        }
    }

    pub fn file(&self) -> &LedgerFile {
        &self.file
    }

    /// Total attempts made, including the initial one.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn into_source(self) -> anyhow::Error {
        self.source
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to fetch ledger file {} after {} attempts: {}",
            self.file, self.attempts, self.source
        )
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Failure modes a worker distinguishes while fetching a single file.
#[derive(Debug)]
pub enum FileFetchError {
    /// The file is absent from a bounded range.
    Missing { key: String },
    /// The file does not contain exactly the sequences its span promises.
    Malformed {
        key: String,
        expected: u32,
        found: Option<u32>,
    },
}

impl fmt::Display for FileFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFetchError::Missing { key } => write!(f, "ledger file {key} does not exist"),
            FileFetchError::Malformed {
                key,
                expected,
                found: Some(found),
            } => write!(
                f,
                "ledger file {key} is malformed: expected sequence {expected}, found {found}"
            ),
            FileFetchError::Malformed {
                key,
                expected,
                found: None,
            } => write!(
                f,
                "ledger file {key} is malformed: sequence {expected} is missing"
            ),
        }
    }
}

impl std::error::Error for FileFetchError {}
