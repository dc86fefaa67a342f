//! Layout arithmetic for the partitioned ledger store: which file holds a given
//! sequence, which partition holds that file, and the object key both map to.

use std::fmt;

/// Suffix appended to every ledger file object key.
pub const FILE_SUFFIX: &str = ".xdr.zstd";

/// Describes how ledgers are grouped into files and files into partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataStoreSchema {
    ledgers_per_file: u32,
    files_per_partition: u32,
}

impl DataStoreSchema {
    /// Zero values are clamped to one so the arithmetic below never divides by zero.
    pub fn new(ledgers_per_file: u32, files_per_partition: u32) -> Self {
        Self {
            ledgers_per_file: ledgers_per_file.max(1),
            files_per_partition: files_per_partition.max(1),
        }
    }

    pub fn ledgers_per_file(&self) -> u32 {
        self.ledgers_per_file
    }

    pub fn files_per_partition(&self) -> u32 {
        self.files_per_partition
    }

    /// First sequence stored in the file that holds `sequence`.
    pub fn file_start(&self, sequence: u32) -> u32 {
        (sequence / self.ledgers_per_file) * self.ledgers_per_file
    }

    /// Last sequence stored in the file that holds `sequence`.
    pub fn file_end(&self, sequence: u32) -> u32 {
        self.file_start(sequence)
            .saturating_add(self.ledgers_per_file - 1)
    }

    fn partition_size(&self) -> u32 {
        self.ledgers_per_file
            .saturating_mul(self.files_per_partition)
    }

    /// First sequence stored in the partition that holds `sequence`.
    pub fn partition_start(&self, sequence: u32) -> u32 {
        let size = self.partition_size();
        (sequence / size) * size
    }

    /// Last sequence stored in the partition that holds `sequence`.
    pub fn partition_end(&self, sequence: u32) -> u32 {
        self.partition_start(sequence)
            .saturating_add(self.partition_size() - 1)
    }

    /// Object key of the file that holds `sequence`.
    ///
    /// Keys are prefixed with `u32::MAX - start` in upper-case hex so that a
    /// lexicographic listing returns the most recent files first, e.g.
    /// `FFFFFFFF--0-639/FFFFFF7F--128-191.xdr.zstd`.
    pub fn object_key(&self, sequence: u32) -> String {
        let mut key = String::new();
        if self.files_per_partition > 1 {
            let start = self.partition_start(sequence);
            let end = self.partition_end(sequence);
            key.push_str(&format!("{:08X}--{start}-{end}/", u32::MAX - start));
        }

        let start = self.file_start(sequence);
        let end = self.file_end(sequence);
        key.push_str(&format!("{:08X}--{start}", u32::MAX - start));
        if start != end {
            key.push_str(&format!("-{end}"));
        }
        key.push_str(FILE_SUFFIX);
        key
    }

    /// Describes the file that holds `sequence`.
    pub fn file_for(&self, sequence: u32) -> LedgerFile {
        LedgerFile {
            start: self.file_start(sequence),
            end: self.file_end(sequence),
            key: self.object_key(sequence),
        }
    }

    /// Start of the `index`-th file counted from the file holding `first`.
    ///
    /// Returns `None` once the offset leaves the `u32` sequence space.
    pub fn nth_file_start(&self, first: u32, index: u64) -> Option<u32> {
        let base = u64::from(self.file_start(first));
        let offset = index.checked_mul(u64::from(self.ledgers_per_file))?;
        u32::try_from(base.checked_add(offset)?).ok()
    }

    /// Number of files needed to cover `[start, end]`.
    pub fn files_between(&self, start: u32, end: u32) -> u64 {
        if end < start {
            return 0;
        }
        let first = u64::from(self.file_start(start));
        let last = u64::from(self.file_start(end));
        (last - first) / u64::from(self.ledgers_per_file) + 1
    }
}

impl Default for DataStoreSchema {
    fn default() -> Self {
        Self::new(64, 10)
    }
}

/// One object in the store, covering the inclusive span `[start, end]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerFile {
    pub start: u32,
    pub end: u32,
    pub key: String,
}

impl LedgerFile {
    pub fn contains(&self, sequence: u32) -> bool {
        (self.start..=self.end).contains(&sequence)
    }
}

impl fmt::Display for LedgerFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}, {}]", self.key, self.start, self.end)
    }
}
