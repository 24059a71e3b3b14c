//! Translation of perf/restart-range bookkeeping into frame callbacks
//! (spec.md §4.8). Kept as free functions rather than a struct: the only
//! state worth naming is the contract that neither of these may be
//! called while holding an engine or pool mutex, and a function-level
//! contract documents that better than a type would.

use crate::frame::Frame;

/// Incremental byte-count update for progress reporting. Emitted once per
/// mover-callout iteration, in non-decreasing file-offset order for a
/// single transfer (spec.md §5).
pub fn perf_marker(frame: &dyn Frame, file_offset: u64, byte_count: u64) {
    if byte_count > 0 {
        frame.update_perf_marker(file_offset, byte_count);
    }
}

/// Checkpoint emitted from `range_complete_cb`, not from the mover
/// callout, so a range is only checkpointed once the archive has
/// acknowledged its completion (spec.md §4.8, open question #2: the
/// source emits before `pio_end` durably lands the range, and this port
/// keeps that exact ordering rather than inventing stronger durability).
pub fn restart_marker(frame: &dyn Frame, transfer_offset: u64, byte_count: u64) {
    if byte_count > 0 {
        frame.update_restart_marker(transfer_offset, byte_count);
    }
}
