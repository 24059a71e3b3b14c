//! RETR engine: archive -> frame pump (spec.md §4.5, grounded against
//! `source/module/retr.c`).

use std::sync::{Arc, Mutex};

use dsi_io::{fill_for_retr, BufferPool, RangeList, OPEN_END};

use crate::archive::{Archive, DataCalloutOutcome, PioOp};
use crate::error::{DsiError, ErrorLatch};
use crate::frame::Frame;
use crate::markers;
use crate::pio::{self, RangeAdvance};
use crate::policy;

struct RetrEngine {
    frame: Arc<dyn Frame>,
    pool: BufferPool,
    error: ErrorLatch,
    current_offset: Mutex<u64>,
    ranges: Mutex<RangeList>,
}

/// Send a file from the archive to the frame, including holes in a
/// sparse source file filled with zero bytes (spec.md §4.5). Every
/// restart range the frame hands over (drained via repeated
/// `get_read_range` calls) is collected into one internal schedule up
/// front; `range_complete_cb` both fills the tail gap of the just-drained
/// range and pops the next one, so `pio_start` only ever runs once per
/// transfer regardless of how many disjoint ranges were requested.
pub fn retr<A: Archive + ?Sized>(archive: &A, frame: Arc<dyn Frame>, path: &str) -> Result<(), DsiError> {
    let file = policy::open_for_reading(archive, path)?;
    let file_size = archive.stat_size(path)?;
    frame.begin_transfer();

    let mut requests = Vec::new();
    while let Some(r) = frame.get_read_range() {
        requests.push(r);
    }
    if requests.is_empty() {
        requests.push((0, OPEN_END));
    }

    let mut ranges = match fill_for_retr(&requests, file_size) {
        Ok(r) => r,
        Err(e) => {
            let _ = archive.close(file);
            return Err(DsiError::Policy(e.to_string()));
        }
    };

    let first = ranges.pop();
    let Some(first) = first else {
        frame.finished_transfer(Ok(()));
        let _ = archive.close(file);
        return Ok(());
    };

    let block_size = frame.get_block_size();
    let concurrency = frame.get_optimal_concurrency().max(1);
    let engine = Arc::new(RetrEngine {
        frame: Arc::clone(&frame),
        pool: BufferPool::new(block_size, concurrency),
        error: ErrorLatch::new(),
        current_offset: Mutex::new(first.offset),
        ranges: Mutex::new(ranges),
    });

    let mut pio_result = Ok(());
    {
        let engine_dc = Arc::clone(&engine);
        let engine_rc = Arc::clone(&engine);
        pio::pio_start(
            archive,
            &file,
            PioOp::Read,
            block_size,
            first.offset,
            first.length,
            move |buf, offset| mover_callout(&engine_dc, buf, offset),
            move |offset, length| range_complete(&engine_rc, offset, length),
            |r| pio_result = r,
        );
    }

    let outcome = engine.error.resolve(pio_result);
    frame.finished_transfer(outcome.clone());
    engine.pool.wait_until_drained(|| engine.error.is_set());
    let _ = archive.close(file);
    outcome
}

fn mover_callout(engine: &Arc<RetrEngine>, buf: &mut [u8], offset: u64) -> DataCalloutOutcome {
    debug_assert_eq!(
        offset,
        *engine.current_offset.lock().unwrap(),
        "archive produced data out of order"
    );

    if engine.error.is_set() {
        return DataCalloutOutcome::Stop;
    }

    write_chunk(engine, offset, buf);

    *engine.current_offset.lock().unwrap() = offset + buf.len() as u64;

    if engine.error.is_set() {
        DataCalloutOutcome::Stop
    } else {
        DataCalloutOutcome::Moved(buf.len())
    }
}

/// Hand one block of bytes to the frame through the pool's free-list
/// discipline. Used both for real archive-sourced bytes and for the
/// synthetic zero-fill source a hole produces (spec.md §9: the two
/// sources are indistinguishable past this point).
fn write_chunk(engine: &Arc<RetrEngine>, offset: u64, bytes: &[u8]) {
    let (handle, mut out) = engine.pool.get_or_alloc_free_buffer(|| engine.frame.get_optimal_concurrency());
    out.as_mut_slice()[..bytes.len()].copy_from_slice(bytes);
    out.set_valid_length(bytes.len());

    let engine2 = Arc::clone(engine);
    engine.frame.register_write(
        out,
        handle,
        offset,
        0,
        Box::new(move |buf, handle, outcome| {
            if let Some(err) = outcome.error {
                engine2.error.set(err);
            }
            engine2.pool.release_free(handle, buf);
        }),
    );
    markers::perf_marker(&*engine.frame, offset, bytes.len() as u64);
}

fn fill_hole(engine: &Arc<RetrEngine>, mut offset: u64, mut remaining: usize) {
    let block_size = engine.pool.block_size();
    let zeros = vec![0u8; block_size];
    while remaining > 0 && !engine.error.is_set() {
        let chunk = remaining.min(block_size);
        write_chunk(engine, offset, &zeros[..chunk]);
        offset += chunk as u64;
        remaining -= chunk;
    }
}

fn range_complete(engine: &Arc<RetrEngine>, offset: u64, length: i64) -> RangeAdvance {
    let gap = {
        let current = *engine.current_offset.lock().unwrap();
        offset.saturating_sub(current)
    };
    if gap > 0 && !engine.error.is_set() {
        fill_hole(engine, offset - gap, gap as usize);
    }
    *engine.current_offset.lock().unwrap() = offset;

    if engine.error.is_set() {
        return RangeAdvance::EndOfTransfer;
    }

    if length > 0 {
        return RangeAdvance::Next { offset, length };
    }

    let next = engine.ranges.lock().unwrap().pop();
    match next {
        Some(r) => {
            *engine.current_offset.lock().unwrap() = r.offset;
            RangeAdvance::Next { offset: r.offset, length: r.length }
        }
        None => RangeAdvance::EndOfTransfer,
    }
}
