use crate::buffer::record::Message;
use anyhow::Error as AnyError;
use core::future::Future;
use core::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type StageFuture<'a> = Pin<Box<dyn Future<Output = Result<(), AnyError>> + Send + 'a>>;

/// A processing stage fed by the source, one record at a time, in sequence order.
///
/// Stages run strictly one after another; a stage never observes a record
/// before every earlier stage accepted it.
pub trait LedgerStage: Send + Sync + 'static {
    /// Identifier used in logs and errors. Defaults to the implementing type's name.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Handles one record. Any error is fatal to the whole run.
    fn process<'a>(&'a mut self, ctx: &'a StageContext, message: &'a Message)
        -> StageFuture<'a>;
}

impl<S: LedgerStage + ?Sized> LedgerStage for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn process<'a>(
        &'a mut self,
        ctx: &'a StageContext,
        message: &'a Message,
    ) -> StageFuture<'a> {
        (**self).process(ctx, message)
    }
}

/// Per-invocation context handed to a stage alongside the message.
#[derive(Debug, Clone)]
pub struct StageContext {
    index: usize,
    name: Arc<str>,
    sequence: u32,
    cancellation: CancellationToken,
}

impl StageContext {
    pub fn new(index: usize, name: Arc<str>, sequence: u32, cancellation: CancellationToken) -> Self {
        Self {
            index,
            name,
            sequence,
            cancellation,
        }
    }

    /// Position of the stage in registration order.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Fires when the run is being cancelled; long-running stages should watch it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Failure of a single stage while processing a record. Always fatal.
#[derive(Debug)]
pub struct StageError {
    index: usize,
    name: Arc<str>,
    sequence: u32,
    source: AnyError,
}

impl StageError {
    pub fn new(index: usize, name: Arc<str>, sequence: u32, source: AnyError) -> Self {
        Self {
            index,
            name,
            sequence,
            source,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl core::fmt::Display for StageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "stage {} ({}) failed on ledger {}: {}",
            self.index, self.name, self.sequence, self.source
        )
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
