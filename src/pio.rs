//! Lifecycle around the archive's parallel-I/O primitive (spec.md §4.3):
//! start, launch coordinator thread, launch mover thread, register
//! callback, teardown. Both threads are joinable (spec.md §9's
//! detached-vs-joinable redesign note) — `pio_start` does not return
//! until `transfer_complete_cb` has fired.

use std::thread;

use dsi_io::OPEN_END;

use crate::archive::{Archive, ArchiveFile, DataCalloutOutcome, ExecuteStatus, PioOp};
use crate::error::DsiError;

/// What `range_complete_cb` decides once a range has fully drained.
pub enum RangeAdvance {
    Next { offset: u64, length: i64 },
    EndOfTransfer,
}

/// Runs the coordinator and mover threads for one parallel-I/O session
/// and blocks until both have joined, then invokes `transfer_complete_cb`
/// exactly once with the combined outcome (spec.md §4.3's shutdown
/// ordering guarantee: by the time `transfer_complete_cb` runs, no
/// callout can still be executing).
///
/// `initial_length == 0` is a legal no-op: `transfer_complete_cb(Ok(()))`
/// fires immediately and neither thread is launched.
#[allow(clippy::too_many_arguments)]
pub fn pio_start<A: Archive + ?Sized>(
    archive: &A,
    file: &ArchiveFile,
    op: PioOp,
    block_size: usize,
    initial_offset: u64,
    initial_length: i64,
    mut data_callout: impl FnMut(&mut [u8], u64) -> DataCalloutOutcome + Send,
    mut range_complete_cb: impl FnMut(u64, i64) -> RangeAdvance + Send,
    transfer_complete_cb: impl FnOnce(Result<(), DsiError>),
) {
    if initial_length == 0 {
        transfer_complete_cb(Ok(()));
        return;
    }

    let (coord_res, mover_res) = thread::scope(|scope| {
        let coord = scope.spawn(|| {
            coordinator_loop(archive, file, op, initial_offset, initial_length, &mut range_complete_cb)
        });
        let mover = scope.spawn(|| mover_loop(archive, file, op, block_size, &mut data_callout));

        let coord_res = coord
            .join()
            .unwrap_or_else(|_| Err(DsiError::Protocol("PIO coordinator thread panicked".into())));
        let mover_res = mover
            .join()
            .unwrap_or_else(|_| Err(DsiError::Protocol("PIO mover thread panicked".into())));
        (coord_res, mover_res)
    });

    // Mirrors pio_thread in the original: the launcher's own (mover-side)
    // result is preferred over the coordinator's, since the mover is the
    // thread that actually relayed bytes through the data callout.
    let result = mover_res.and(coord_res);
    transfer_complete_cb(result);
}

fn coordinator_loop<A: Archive + ?Sized>(
    archive: &A,
    file: &ArchiveFile,
    op: PioOp,
    mut offset: u64,
    mut length: i64,
    range_complete_cb: &mut (dyn FnMut(u64, i64) -> RangeAdvance + Send),
) -> Result<(), DsiError> {
    // `pio_end_coordinator` must run on every exit from this loop, error or
    // not — the mover is parked inside `pio_register` waiting for either a
    // new range or the group to end, so skipping it here deadlocks the
    // mover's join forever (mirrors the original's `cleanup` path, which
    // always reaches `hpss_PIOEnd` even after a `hpss_PIOExecute` error).
    let result = loop {
        let exec = match archive.pio_execute(file, op, offset, length) {
            Ok(exec) => exec,
            Err(err) => break Err(err),
        };
        debug_assert!(matches!(exec.status, ExecuteStatus::Ok | ExecuteStatus::EndRequested));

        let advance = exec.bytes_moved + exec.gap_length;
        offset += advance;
        if length != OPEN_END {
            length = (length - advance as i64).max(0);
        }

        match range_complete_cb(offset, length) {
            RangeAdvance::Next { offset: o, length: l } => {
                offset = o;
                length = l;
            }
            RangeAdvance::EndOfTransfer => break Ok(()),
        }
    };

    archive.pio_end_coordinator(file);
    result
}

fn mover_loop<A: Archive + ?Sized>(
    archive: &A,
    file: &ArchiveFile,
    op: PioOp,
    block_size: usize,
    data_callout: &mut (dyn FnMut(&mut [u8], u64) -> DataCalloutOutcome + Send),
) -> Result<(), DsiError> {
    let mut relay = |buf: &mut [u8], offset: u64| data_callout(buf, offset);
    archive.pio_register(file, op, block_size, &mut relay)
}
