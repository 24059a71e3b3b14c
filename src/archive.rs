//! The archive-side collaborator contract: everything the core needs
//! from the hierarchical storage client library. Out of scope per
//! spec.md §1 (directory ops, stat, rename, ...) is intentionally absent
//! from this trait — only the primitives the data-movement core itself
//! drives are named here.

use std::os::unix::io::RawFd;

use crate::error::DsiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PioOp {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HintPriority {
    Required,
    HighlyDesired,
}

/// Storage-class placement hints derived from the advertised allocation
/// size (spec.md §4.7). `max_priority` is never `Required`: a required
/// maximum would exclude any storage class whose per-class cap sits
/// below the hinted size.
#[derive(Debug, Clone, Copy)]
pub struct CreationHints {
    pub min_file_size: u64,
    pub min_priority: HintPriority,
    pub max_file_size: u64,
    pub max_priority: HintPriority,
}

/// An open archive-side file. Opaque beyond the raw descriptor the
/// transfer state needs to track (spec.md §3's "Transfer state").
pub struct ArchiveFile {
    pub fd: RawFd,
    pub stripe_width: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteStatus {
    Ok,
    /// The archive's distinguished "end of transfer requested" status;
    /// normalized to success before any error latch is consulted
    /// (spec.md §9, SPEC_FULL.md §2).
    EndRequested,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecuteResult {
    pub bytes_moved: u64,
    pub gap_length: u64,
    pub status: ExecuteStatus,
}

/// Outcome handed back by a `data_callout` invocation (spec.md §4.3).
pub enum DataCalloutOutcome {
    Moved(usize),
    /// Request early termination; the archive stops calling back and
    /// `pio_register` returns.
    Stop,
}

pub type DataCallout<'a> = dyn FnMut(&mut [u8], u64) -> DataCalloutOutcome + Send + 'a;

/// The archive client library, as the core needs it. A real
/// implementation wraps the HPSS client API; tests supply an in-memory
/// fake.
pub trait Archive: Send + Sync {
    fn open_for_writing(
        &self,
        path: &str,
        truncate: bool,
        hints: Option<CreationHints>,
    ) -> Result<ArchiveFile, DsiError>;

    fn open_for_reading(&self, path: &str) -> Result<ArchiveFile, DsiError>;

    fn stat_size(&self, path: &str) -> Result<u64, DsiError>;

    /// Whether the file's fileset itself pins a storage class, in which
    /// case re-applying hints after a truncating open must be skipped
    /// (spec.md §4.7).
    fn fileset_pins_storage_class(&self, file: &ArchiveFile) -> Result<bool, DsiError>;

    fn set_class_by_hints(&self, file: &ArchiveFile, hints: &CreationHints) -> Result<(), DsiError>;

    fn close(&self, file: ArchiveFile) -> Result<(), DsiError>;

    /// Coordinator-thread primitive: move up to `length` bytes at
    /// `offset` for `op`, returning how much actually moved and whether a
    /// gap (hole) was reported.
    fn pio_execute(
        &self,
        file: &ArchiveFile,
        op: PioOp,
        offset: u64,
        length: i64,
    ) -> Result<ExecuteResult, DsiError>;

    /// Coordinator-thread primitive: end the coordinator's half of the
    /// stripe group once its outer loop has drained every range.
    fn pio_end_coordinator(&self, file: &ArchiveFile);

    /// Mover-thread primitive: register for callbacks and block until the
    /// coordinator ends the group or `data_callout` requests a stop,
    /// invoking `data_callout` once per block in strictly ascending
    /// file-offset order.
    fn pio_register(
        &self,
        file: &ArchiveFile,
        op: PioOp,
        block_size: usize,
        data_callout: &mut DataCallout<'_>,
    ) -> Result<(), DsiError>;

    fn get_uda(&self, file: &ArchiveFile, key: &str) -> Result<Option<String>, DsiError>;
    fn set_uda(&self, file: &ArchiveFile, key: &str, value: &str) -> Result<(), DsiError>;
}
