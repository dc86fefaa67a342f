//! Sequential stage dispatch for delivered ledgers.

use crate::buffer::record::Message;
use crate::runtime::error::SourceError;
use crate::runtime::stage::{LedgerStage, StageContext, StageError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Stages taking longer than this on a single ledger are reported.
pub const SLOW_STAGE_THRESHOLD: Duration = Duration::from_secs(1);

pub(crate) struct RegisteredStage {
    index: usize,
    name: Arc<str>,
    stage: Box<dyn LedgerStage>,
}

/// Ordered, append-only list of stages. Every ledger visits each stage once,
/// in registration order, and the first failure stops the chain.
#[derive(Default)]
pub struct ProcessorChain {
    stages: Vec<RegisteredStage>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage named after [`LedgerStage::name`].
    pub fn register(&mut self, stage: Box<dyn LedgerStage>) -> usize {
        let name = Arc::<str>::from(stage.name());
        self.push(name, stage)
    }

    /// Appends a stage under an explicit name.
    pub fn register_named(&mut self, name: impl Into<Arc<str>>, stage: Box<dyn LedgerStage>) -> usize {
        self.push(name.into(), stage)
    }

    fn push(&mut self, name: Arc<str>, stage: Box<dyn LedgerStage>) -> usize {
        let index = self.stages.len();
        tracing::debug!(index, stage = %name, "registered processing stage");
        self.stages.push(RegisteredStage { index, name, stage });
        index
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| &*stage.name).collect()
    }

    /// Runs `message` through every stage in order.
    ///
    /// Cancellation is checked before each stage and also interrupts a stage
    /// that is still running.
    pub async fn dispatch(
        &mut self,
        message: &Message,
        cancellation: &CancellationToken,
    ) -> Result<(), SourceError> {
        let sequence = message.sequence();

        for registered in &mut self.stages {
            if cancellation.is_cancelled() {
                return Err(SourceError::Cancelled);
            }

            let ctx = StageContext::new(
                registered.index,
                registered.name.clone(),
                sequence,
                cancellation.child_token(),
            );
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    ctx.cancellation().cancel();
                    return Err(SourceError::Cancelled);
                }
                result = registered.stage.process(&ctx, message) => result,
            };

            let elapsed = started.elapsed();
            if elapsed > SLOW_STAGE_THRESHOLD {
                tracing::warn!(
                    target: "ledgerstream::chain",
                    index = registered.index,
                    stage = %registered.name,
                    sequence,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "slow processing stage"
                );
            }

            if let Err(source) = result {
                tracing::error!(
                    target: "ledgerstream::chain",
                    index = registered.index,
                    stage = %registered.name,
                    sequence,
                    error = %source,
                    "processing stage failed"
                );
                return Err(StageError::new(
                    registered.index,
                    registered.name.clone(),
                    sequence,
                    source,
                )
                .into());
            }

            tracing::debug!(
                target: "ledgerstream::chain",
                index = registered.index,
                stage = %registered.name,
                sequence,
                elapsed_ms = elapsed.as_millis() as u64,
                "stage processed ledger"
            );
        }

        Ok(())
    }
}
