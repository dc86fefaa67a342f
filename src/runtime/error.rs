use crate::runtime::stage::StageError;
use crate::store::client::FetchError;
use anyhow::Error as AnyError;
use std::fmt;

/// Everything a run of the source can end with, besides success.
#[derive(Debug)]
pub enum SourceError {
    Fetch(FetchError),
    Stage(StageError),
    /// The run was stopped on purpose; not a failure.
    Cancelled,
    NotInitialized,
    AlreadyRunning,
    /// The store connector could not produce a store handle.
    Store(AnyError),
    /// A background task died unexpectedly (panic or join failure).
    Internal(AnyError),
}

impl SourceError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SourceError::Cancelled)
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Fetch(err) => fmt::Display::fmt(err, f),
            SourceError::Stage(err) => fmt::Display::fmt(err, f),
            SourceError::Cancelled => write!(f, "ledger source cancelled"),
            SourceError::NotInitialized => write!(f, "ledger source has not been initialized"),
            SourceError::AlreadyRunning => write!(f, "ledger source is already running"),
            SourceError::Store(err) => write!(f, "failed to connect to ledger store: {err}"),
            SourceError::Internal(err) => write!(f, "internal pipeline failure: {err}"),
        }
    }
}

impl std::error::Error for SourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SourceError::Fetch(err) => Some(err),
            SourceError::Stage(err) => Some(err),
            SourceError::Store(err) | SourceError::Internal(err) => Some(err.as_ref()),
            SourceError::Cancelled | SourceError::NotInitialized | SourceError::AlreadyRunning => {
                None
            }
        }
    }
}

impl From<FetchError> for SourceError {
    fn from(err: FetchError) -> Self {
        SourceError::Fetch(err)
    }
}

impl From<StageError> for SourceError {
    fn from(err: StageError) -> Self {
        SourceError::Stage(err)
    }
}
