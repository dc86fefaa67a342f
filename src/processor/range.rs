use crate::runtime::config::SourceConfig;
use std::fmt;

/// Ledger sequences a run should cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerRange {
    /// Inclusive `[start, end]`.
    Bounded { start: u32, end: u32 },
    /// Everything from `start` onward, following the store as it grows.
    Unbounded { start: u32 },
}

impl LedgerRange {
    pub fn bounded(start: u32, end: u32) -> Result<Self, RangeError> {
        if end < start {
            return Err(RangeError { start, end });
        }
        Ok(Self::Bounded { start, end })
    }

    pub fn unbounded(start: u32) -> Self {
        Self::Unbounded { start }
    }

    /// Selects the range described by a validated configuration.
    ///
    /// An `end_ledger` of zero means the run never ends on its own.
    pub fn from_config(config: &SourceConfig) -> Self {
        match config.end_ledger() {
            0 => Self::Unbounded {
                start: config.start_ledger(),
            },
            end => Self::Bounded {
                start: config.start_ledger(),
                end,
            },
        }
    }

    pub fn start(&self) -> u32 {
        match *self {
            Self::Bounded { start, .. } | Self::Unbounded { start } => start,
        }
    }

    pub fn end(&self) -> Option<u32> {
        match *self {
            Self::Bounded { end, .. } => Some(end),
            Self::Unbounded { .. } => None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Self::Bounded { .. })
    }

    pub fn contains(&self, sequence: u32) -> bool {
        sequence >= self.start() && self.end().map_or(true, |end| sequence <= end)
    }

    /// Number of sequences in a bounded range.
    pub fn len(&self) -> Option<u64> {
        self.end()
            .map(|end| u64::from(end) - u64::from(self.start()) + 1)
    }
}

impl fmt::Display for LedgerRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bounded { start, end } => write!(f, "[{start}, {end}]"),
            Self::Unbounded { start } => write!(f, "[{start}, latest)"),
        }
    }
}

/// A bounded range whose end precedes its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeError {
    pub start: u32,
    pub end: u32,
}

impl fmt::Display for RangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "end ledger {} must not be lower than start ledger {}",
            self.end, self.start
        )
    }
}

impl std::error::Error for RangeError {}
