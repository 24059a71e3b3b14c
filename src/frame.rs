//! The frame-side collaborator contract (spec.md §6, "From the frame,
//! the core consumes...").

use std::time::Duration;

use dsi_io::{Buffer, BufferHandle};

use crate::error::DsiError;

pub struct ReadOutcome {
    /// Where in the transfer this chunk belongs. Parallel data channels
    /// can complete out of request order, so the frame — not the order
    /// `register_read` was called in — is the source of truth for this.
    pub transfer_offset: u64,
    pub bytes_read: usize,
    pub eof: bool,
    pub error: Option<DsiError>,
}

pub struct WriteOutcome {
    pub error: Option<DsiError>,
}

pub type ReadCompletion = Box<dyn FnOnce(Buffer, BufferHandle, ReadOutcome) + Send>;
pub type WriteCompletion = Box<dyn FnOnce(Buffer, BufferHandle, WriteOutcome) + Send>;

/// The host file-transfer server, as the core needs it. `register_read`
/// and `register_write` post an I/O request and return immediately; the
/// frame invokes the supplied completion exactly once, from whatever
/// thread it uses for I/O completion (never the caller's thread in a real
/// frame, though a test fake may call it inline).
pub trait Frame: Send + Sync {
    fn register_read(&self, buf: Buffer, handle: BufferHandle, on_complete: ReadCompletion);

    fn register_write(
        &self,
        buf: Buffer,
        handle: BufferHandle,
        offset: u64,
        stripe_idx: i32,
        on_complete: WriteCompletion,
    );

    fn begin_transfer(&self);
    fn finished_transfer(&self, result: Result<(), DsiError>);

    fn get_optimal_concurrency(&self) -> usize;
    fn get_block_size(&self) -> usize;

    /// `None` signals the frame has no further range: end of transfer.
    fn get_read_range(&self) -> Option<(u64, i64)>;
    fn get_write_range(&self) -> Option<(u64, i64)>;

    fn intermediate_command(&self, msg: &str) -> Result<(), DsiError>;

    /// Must never be called while holding an engine or pool mutex
    /// (spec.md §9's marker contract).
    fn update_perf_marker(&self, offset: u64, length: u64);
    fn update_restart_marker(&self, offset: u64, length: u64);

    fn get_update_interval(&self) -> Duration;
}
