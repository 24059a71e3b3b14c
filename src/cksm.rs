//! CKSM engine: archive -> streaming digest, no frame payload output
//! (spec.md §4.6, grounded against `source/module/cksm.c`).

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use dsi_io::{fill_for_cksm, BufferPool, OPEN_END};
use openssl::hash::{Hasher, MessageDigest};

use crate::archive::{Archive, ArchiveFile, DataCalloutOutcome, PioOp};
use crate::error::{DsiError, ErrorLatch};
use crate::frame::Frame;
use crate::pio::{self, RangeAdvance};
use crate::policy;

const UDA_ALGORITHM: &str = "/hpss/user/cksum/algorithm";
const UDA_CHECKSUM: &str = "/hpss/user/cksum/checksum";
const UDA_LASTUPDATE: &str = "/hpss/user/cksum/lastupdate";
const UDA_ERRORS: &str = "/hpss/user/cksum/errors";
const UDA_STATE: &str = "/hpss/user/cksum/state";
const UDA_APP: &str = "/hpss/user/cksum/app";
const UDA_FILESIZE: &str = "/hpss/user/cksum/filesize";

/// Invalidate a stale cached digest. Called at STOR start (not CKSM
/// start, per spec.md §6): once the file's content can change, any
/// previously persisted digest is no longer trustworthy.
pub fn clear_cached_checksum<A: Archive + ?Sized>(archive: &A, file: &ArchiveFile) -> Result<(), DsiError> {
    if archive.get_uda(file, UDA_STATE)?.is_some() {
        archive.set_uda(file, UDA_STATE, "Invalid")?;
    }
    Ok(())
}

fn cached_whole_file_digest<A: Archive + ?Sized>(archive: &A, file: &ArchiveFile) -> Result<Option<String>, DsiError> {
    if archive.get_uda(file, UDA_STATE)?.as_deref() != Some("Valid") {
        return Ok(None);
    }
    if archive.get_uda(file, UDA_ALGORITHM)?.as_deref() != Some("md5") {
        return Ok(None);
    }
    archive.get_uda(file, UDA_CHECKSUM)
}

fn persist_digest<A: Archive + ?Sized>(archive: &A, file: &ArchiveFile, digest_hex: &str, file_size: u64) -> Result<(), DsiError> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    archive.set_uda(file, UDA_ALGORITHM, "md5")?;
    archive.set_uda(file, UDA_CHECKSUM, digest_hex)?;
    archive.set_uda(file, UDA_LASTUPDATE, &now.to_string())?;
    archive.set_uda(file, UDA_ERRORS, "0")?;
    archive.set_uda(file, UDA_STATE, "Valid")?;
    archive.set_uda(file, UDA_APP, "GridFTP")?;
    archive.set_uda(file, UDA_FILESIZE, &file_size.to_string())?;
    Ok(())
}

struct CksmEngine {
    frame: Arc<dyn Frame>,
    pool: BufferPool,
    error: ErrorLatch,
    hasher: Mutex<Hasher>,
    bytes_digested: Mutex<u64>,
    last_report: Mutex<Instant>,
    update_interval: Duration,
}

/// Digest `path` over `request` (`None` means the whole file). Persists
/// the digest to UDA only when the request covers the whole file and
/// `persist` is set (spec.md §4.6, §6's `UDAChecksumSupport` config key).
pub fn cksm<A: Archive + ?Sized>(
    archive: &A,
    frame: Arc<dyn Frame>,
    path: &str,
    request: Option<(u64, i64)>,
    persist: bool,
) -> Result<String, DsiError> {
    let whole_file = matches!(request, None | Some((0, OPEN_END)));

    let file = policy::open_for_reading(archive, path)?;

    if whole_file {
        if let Some(cached) = cached_whole_file_digest(archive, &file)? {
            let _ = archive.close(file);
            return Ok(cached);
        }
    }

    let file_size = archive.stat_size(path)?;
    let mut ranges = match fill_for_cksm(request, file_size) {
        Ok(r) => r,
        Err(e) => {
            let _ = archive.close(file);
            return Err(DsiError::Policy(e.to_string()));
        }
    };

    let first = ranges.pop();
    let Some(first) = first else {
        let _ = archive.close(file);
        return finalize_empty(archive, &file, whole_file, persist, file_size);
    };

    let block_size = frame.get_block_size();
    let engine = Arc::new(CksmEngine {
        frame: Arc::clone(&frame),
        pool: BufferPool::new(block_size, frame.get_optimal_concurrency().max(1)),
        error: ErrorLatch::new(),
        hasher: Mutex::new(Hasher::new(MessageDigest::md5()).map_err(|e| DsiError::Protocol(e.to_string()))?),
        bytes_digested: Mutex::new(0),
        last_report: Mutex::new(Instant::now()),
        update_interval: frame.get_update_interval(),
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
            move |buf, _offset| mover_callout(&engine_dc, buf),
            move |offset, length| range_complete(&engine_rc, offset, length, &mut ranges),
            |r| pio_result = r,
        );
    }

    let outcome = engine.error.resolve(pio_result);
    engine.pool.wait_until_drained(|| engine.error.is_set());

    let result = outcome.and_then(|()| {
        let digest = engine
            .hasher
            .lock()
            .unwrap()
            .finish()
            .map_err(|e| DsiError::Protocol(e.to_string()))?;
        Ok(hex_encode(&digest))
    });

    if let (Ok(digest), true, true) = (&result, whole_file, persist) {
        if let Err(e) = persist_digest(archive, &file, digest, file_size) {
            log::warn!("failed to persist checksum UDA for {path}: {e}");
        }
    }

    let _ = archive.close(file);
    result
}

fn finalize_empty<A: Archive + ?Sized>(
    archive: &A,
    file: &ArchiveFile,
    whole_file: bool,
    persist: bool,
    file_size: u64,
) -> Result<String, DsiError> {
    let digest = Hasher::new(MessageDigest::md5())
        .and_then(|mut h| h.finish())
        .map_err(|e| DsiError::Protocol(e.to_string()))?;
    let hex = hex_encode(&digest);
    if whole_file && persist {
        if let Err(e) = persist_digest(archive, file, &hex, file_size) {
            log::warn!("failed to persist checksum UDA: {e}");
        }
    }
    Ok(hex)
}

fn mover_callout(engine: &Arc<CksmEngine>, buf: &mut [u8]) -> DataCalloutOutcome {
    if engine.error.is_set() {
        return DataCalloutOutcome::Stop;
    }
    if let Err(e) = engine.hasher.lock().unwrap().update(buf) {
        engine.error.set(DsiError::Protocol(e.to_string()));
        return DataCalloutOutcome::Stop;
    }

    let total = {
        let mut bytes = engine.bytes_digested.lock().unwrap();
        *bytes += buf.len() as u64;
        *bytes
    };

    let should_report = {
        let mut last = engine.last_report.lock().unwrap();
        let elapsed = last.elapsed();
        if !engine.update_interval.is_zero() && elapsed >= engine.update_interval {
            *last = Instant::now();
            true
        } else {
            false
        }
    };
    if should_report {
        let _ = engine.frame.intermediate_command(&format!("{total} bytes checksummed"));
    }

    DataCalloutOutcome::Moved(buf.len())
}

fn range_complete(
    engine: &Arc<CksmEngine>,
    offset: u64,
    length: i64,
    ranges: &mut dsi_io::RangeList,
) -> RangeAdvance {
    if engine.error.is_set() || length == 0 {
        match ranges.pop() {
            Some(r) if !engine.error.is_set() => RangeAdvance::Next { offset: r.offset, length: r.length },
            _ => RangeAdvance::EndOfTransfer,
        }
    } else {
        RangeAdvance::Next { offset, length }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
