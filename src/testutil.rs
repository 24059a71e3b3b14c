//! In-memory fakes for [`Frame`] and [`Archive`] used by every engine's
//! test module. Not part of the crate's public surface: the real
//! collaborators are supplied by the frame process and the archive
//! client library, both out of scope per spec.md §1.

use std::collections::{HashMap, HashSet, VecDeque};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use dsi_io::{Buffer, BufferHandle};

use crate::archive::{
    Archive, ArchiveFile, CreationHints, DataCallout, DataCalloutOutcome, ExecuteResult,
    ExecuteStatus, PioOp,
};
use crate::error::DsiError;
use crate::frame::{Frame, ReadCompletion, ReadOutcome, WriteCompletion, WriteOutcome};

/// A file as the fake archive sees it: a flat byte vector plus a set of
/// hole regions that reads must report as gaps rather than data.
struct FileRecord {
    content: Vec<u8>,
    holes: Vec<(u64, u64)>,
    pinned_class: bool,
    uda: HashMap<String, String>,
}

/// Coordinator/mover rendezvous for one open file's parallel-I/O
/// session, standing in for the synchronization the real archive client
/// library performs internally between `hpss_PIOExecute` and the
/// participant registered through `hpss_PIORegister`.
struct Bridge {
    state: Mutex<BridgeState>,
    cond: Condvar,
}

#[derive(Default)]
struct BridgeState {
    block_size: Option<usize>,
    pending: Option<(u64, i64)>,
    result: Option<ExecuteResult>,
    ended: bool,
}

impl Bridge {
    fn new() -> Self {
        Bridge {
            state: Mutex::new(BridgeState::default()),
            cond: Condvar::new(),
        }
    }
}

pub struct FakeArchive {
    files: Mutex<HashMap<String, FileRecord>>,
    fd_paths: Mutex<HashMap<RawFd, String>>,
    bridges: Mutex<HashMap<RawFd, Arc<Bridge>>>,
    next_fd: AtomicI32,
    open_hints: Mutex<Option<CreationHints>>,
    cos_reapplied: Mutex<HashSet<RawFd>>,
    stripe_width: u32,
    fail_execute: Mutex<Option<String>>,
}

impl FakeArchive {
    pub fn new() -> Self {
        FakeArchive {
            files: Mutex::new(HashMap::new()),
            fd_paths: Mutex::new(HashMap::new()),
            bridges: Mutex::new(HashMap::new()),
            next_fd: AtomicI32::new(3),
            open_hints: Mutex::new(None),
            cos_reapplied: Mutex::new(HashSet::new()),
            stripe_width: 4,
            fail_execute: Mutex::new(None),
        }
    }

    pub fn put_file(&self, path: &str, content: Vec<u8>) {
        self.files.lock().unwrap().insert(
            path.to_string(),
            FileRecord {
                content,
                holes: Vec::new(),
                pinned_class: false,
                uda: HashMap::new(),
            },
        );
    }

    /// Mark `[offset, offset+len)` of `path`'s content as a sparse hole:
    /// reads over that span report a gap instead of calling the data
    /// callout.
    pub fn put_hole(&self, path: &str, offset: u64, len: u64) {
        self.files
            .lock()
            .unwrap()
            .get_mut(path)
            .expect("file must exist")
            .holes
            .push((offset, len));
    }

    pub fn file_content(&self, path: &str) -> Vec<u8> {
        self.files.lock().unwrap().get(path).unwrap().content.clone()
    }

    pub fn uda(&self, path: &str, key: &str) -> Option<String> {
        self.files.lock().unwrap().get(path)?.uda.get(key).cloned()
    }

    pub fn pin_storage_class(&self, path: &str) {
        self.files.lock().unwrap().get_mut(path).unwrap().pinned_class = true;
    }

    pub fn last_open_hints(&self) -> Option<CreationHints> {
        *self.open_hints.lock().unwrap()
    }

    pub fn cos_reapplied(&self, file: &ArchiveFile) -> bool {
        self.cos_reapplied.lock().unwrap().contains(&file.fd)
    }

    /// Force the next `pio_execute` call to return an archive error,
    /// simulating a mid-transfer archive-side failure.
    pub fn fail_next_execute(&self, message: &str) {
        *self.fail_execute.lock().unwrap() = Some(message.to_string());
    }

    fn bridge_for(&self, fd: RawFd) -> Arc<Bridge> {
        self.bridges
            .lock()
            .unwrap()
            .entry(fd)
            .or_insert_with(|| Arc::new(Bridge::new()))
            .clone()
    }

    fn path_for(&self, fd: RawFd) -> String {
        self.fd_paths.lock().unwrap().get(&fd).unwrap().clone()
    }
}

impl Default for FakeArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive for FakeArchive {
    fn open_for_writing(
        &self,
        path: &str,
        truncate: bool,
        hints: Option<CreationHints>,
    ) -> Result<ArchiveFile, DsiError> {
        *self.open_hints.lock().unwrap() = hints;
        let mut files = self.files.lock().unwrap();
        if truncate || !files.contains_key(path) {
            files.insert(
                path.to_string(),
                FileRecord {
                    content: Vec::new(),
                    holes: Vec::new(),
                    pinned_class: false,
                    uda: HashMap::new(),
                },
            );
        }
        drop(files);
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.fd_paths.lock().unwrap().insert(fd, path.to_string());
        Ok(ArchiveFile { fd, stripe_width: self.stripe_width })
    }

    fn open_for_reading(&self, path: &str) -> Result<ArchiveFile, DsiError> {
        if !self.files.lock().unwrap().contains_key(path) {
            return Err(DsiError::Archive { op: "open", message: format!("{path} not found") });
        }
        let fd = self.next_fd.fetch_add(1, Ordering::SeqCst);
        self.fd_paths.lock().unwrap().insert(fd, path.to_string());
        Ok(ArchiveFile { fd, stripe_width: self.stripe_width })
    }

    fn stat_size(&self, path: &str) -> Result<u64, DsiError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|f| f.content.len() as u64)
            .ok_or_else(|| DsiError::Archive { op: "stat", message: format!("{path} not found") })
    }

    fn fileset_pins_storage_class(&self, file: &ArchiveFile) -> Result<bool, DsiError> {
        let path = self.path_for(file.fd);
        Ok(self.files.lock().unwrap().get(&path).map(|f| f.pinned_class).unwrap_or(false))
    }

    fn set_class_by_hints(&self, file: &ArchiveFile, _hints: &CreationHints) -> Result<(), DsiError> {
        self.cos_reapplied.lock().unwrap().insert(file.fd);
        Ok(())
    }

    fn close(&self, file: ArchiveFile) -> Result<(), DsiError> {
        self.fd_paths.lock().unwrap().remove(&file.fd);
        self.bridges.lock().unwrap().remove(&file.fd);
        Ok(())
    }

    fn pio_execute(
        &self,
        file: &ArchiveFile,
        op: PioOp,
        offset: u64,
        length: i64,
    ) -> Result<ExecuteResult, DsiError> {
        if let Some(message) = self.fail_execute.lock().unwrap().take() {
            return Err(DsiError::Archive { op: "execute", message });
        }
        debug_assert_ne!(length, dsi_io::OPEN_END, "fakes require a resolved length");

        let bridge = self.bridge_for(file.fd);
        let mut state = bridge.state.lock().unwrap();
        while state.block_size.is_none() && !state.ended {
            state = bridge.cond.wait(state).unwrap();
        }
        if state.ended {
            return Ok(ExecuteResult { bytes_moved: 0, gap_length: 0, status: ExecuteStatus::EndRequested });
        }
        state.pending = Some((offset, length));
        bridge.cond.notify_all();
        loop {
            if let Some(result) = state.result.take() {
                return Ok(result);
            }
            state = bridge.cond.wait(state).unwrap();
        }
    }

    fn pio_end_coordinator(&self, file: &ArchiveFile) {
        let bridge = self.bridge_for(file.fd);
        let mut state = bridge.state.lock().unwrap();
        state.ended = true;
        bridge.cond.notify_all();
    }

    fn pio_register(
        &self,
        file: &ArchiveFile,
        op: PioOp,
        block_size: usize,
        data_callout: &mut DataCallout<'_>,
    ) -> Result<(), DsiError> {
        let bridge = self.bridge_for(file.fd);
        {
            let mut state = bridge.state.lock().unwrap();
            state.block_size = Some(block_size);
            bridge.cond.notify_all();
        }

        let path = self.path_for(file.fd);

        loop {
            let (offset, length) = {
                let mut state = bridge.state.lock().unwrap();
                loop {
                    if let Some(req) = state.pending.take() {
                        break req;
                    }
                    if state.ended {
                        return Ok(());
                    }
                    state = bridge.cond.wait(state).unwrap();
                }
            };

            let (result, stopped) =
                self.move_range(&path, op, offset, length, block_size, data_callout);

            let mut state = bridge.state.lock().unwrap();
            state.result = Some(result);
            if stopped {
                state.ended = true;
            }
            bridge.cond.notify_all();
            if stopped {
                return Ok(());
            }
        }
    }

    fn get_uda(&self, file: &ArchiveFile, key: &str) -> Result<Option<String>, DsiError> {
        let path = self.path_for(file.fd);
        Ok(self.files.lock().unwrap().get(&path).and_then(|f| f.uda.get(key).cloned()))
    }

    fn set_uda(&self, file: &ArchiveFile, key: &str, value: &str) -> Result<(), DsiError> {
        let path = self.path_for(file.fd);
        self.files
            .lock()
            .unwrap()
            .get_mut(&path)
            .unwrap()
            .uda
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

impl FakeArchive {
    /// Drive one `pio_execute` round: move up to `length` bytes from
    /// `offset`, stopping at a block boundary just before any hole and
    /// reporting it as a gap rather than calling `data_callout` over it.
    /// Returns the round's result and whether the callout asked to stop.
    fn move_range(
        &self,
        path: &str,
        op: PioOp,
        offset: u64,
        length: i64,
        block_size: usize,
        data_callout: &mut DataCallout<'_>,
    ) -> (ExecuteResult, bool) {
        let mut remaining = length as u64;
        let mut cursor = offset;
        let mut moved = 0u64;

        while remaining > 0 {
            if let Some(hole_end) = self.hole_covering(path, cursor) {
                let gap = (hole_end - cursor).min(remaining);
                return (
                    ExecuteResult { bytes_moved: moved, gap_length: gap, status: ExecuteStatus::Ok },
                    false,
                );
            }

            let until_next_hole = self.distance_to_next_hole(path, cursor).unwrap_or(u64::MAX);
            let chunk = (block_size as u64).min(remaining).min(until_next_hole);
            if chunk == 0 {
                break;
            }

            let mut buf = vec![0u8; chunk as usize];
            if op == PioOp::Read {
                let files = self.files.lock().unwrap();
                let content = &files.get(path).unwrap().content;
                let start = cursor as usize;
                let end = (start + chunk as usize).min(content.len());
                buf[..end - start].copy_from_slice(&content[start..end]);
            }

            let outcome = data_callout(&mut buf, cursor);
            match outcome {
                DataCalloutOutcome::Moved(n) => {
                    if op == PioOp::Write && n > 0 {
                        let mut files = self.files.lock().unwrap();
                        let content = &mut files.get_mut(path).unwrap().content;
                        let end = cursor as usize + n;
                        if content.len() < end {
                            content.resize(end, 0);
                        }
                        content[cursor as usize..end].copy_from_slice(&buf[..n]);
                    }
                    moved += n as u64;
                    cursor += n as u64;
                    remaining -= n as u64;
                    if (n as u64) < chunk {
                        break;
                    }
                }
                DataCalloutOutcome::Stop => {
                    return (
                        ExecuteResult { bytes_moved: moved, gap_length: 0, status: ExecuteStatus::EndRequested },
                        true,
                    );
                }
            }
        }

        (ExecuteResult { bytes_moved: moved, gap_length: 0, status: ExecuteStatus::Ok }, false)
    }

    fn hole_covering(&self, path: &str, offset: u64) -> Option<u64> {
        let files = self.files.lock().unwrap();
        files.get(path)?.holes.iter().find_map(|&(o, l)| {
            if offset >= o && offset < o + l {
                Some(o + l)
            } else {
                None
            }
        })
    }

    fn distance_to_next_hole(&self, path: &str, offset: u64) -> Option<u64> {
        let files = self.files.lock().unwrap();
        files
            .get(path)?
            .holes
            .iter()
            .filter(|&&(o, _)| o > offset)
            .map(|&(o, _)| o - offset)
            .min()
    }
}

/// In-memory frame fake. STOR tests feed it `upload` bytes consumed
/// through `register_read`; RETR/CKSM tests read back what landed in
/// `writes` through `register_write`.
pub struct FakeFrame {
    optimal_concurrency: Mutex<usize>,
    block_size: usize,
    upload: Mutex<(Vec<u8>, usize)>,
    upload_error_at: Mutex<Option<usize>>,
    writes: Mutex<Vec<(u64, Vec<u8>)>>,
    write_error_after: Mutex<Option<usize>>,
    read_ranges: Mutex<VecDeque<(u64, i64)>>,
    write_ranges: Mutex<VecDeque<(u64, i64)>>,
    finished: Mutex<Option<Result<(), DsiError>>>,
    perf_markers: Mutex<Vec<(u64, u64)>>,
    restart_markers: Mutex<Vec<(u64, u64)>>,
    intermediate: Mutex<Vec<String>>,
    update_interval: Duration,
}

impl FakeFrame {
    pub fn new(block_size: usize, optimal_concurrency: usize) -> Self {
        FakeFrame {
            optimal_concurrency: Mutex::new(optimal_concurrency),
            block_size,
            upload: Mutex::new((Vec::new(), 0)),
            upload_error_at: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
            write_error_after: Mutex::new(None),
            read_ranges: Mutex::new(VecDeque::new()),
            write_ranges: Mutex::new(VecDeque::new()),
            finished: Mutex::new(None),
            perf_markers: Mutex::new(Vec::new()),
            restart_markers: Mutex::new(Vec::new()),
            intermediate: Mutex::new(Vec::new()),
            update_interval: Duration::from_secs(0),
        }
    }

    pub fn with_upload(self, data: Vec<u8>) -> Self {
        *self.upload.lock().unwrap() = (data, 0);
        self
    }

    pub fn fail_upload_after(self, bytes: usize) -> Self {
        *self.upload_error_at.lock().unwrap() = Some(bytes);
        self
    }

    pub fn fail_write_after(self, count: usize) -> Self {
        *self.write_error_after.lock().unwrap() = Some(count);
        self
    }

    pub fn push_write_range(&self, offset: u64, length: i64) {
        self.write_ranges.lock().unwrap().push_back((offset, length));
    }

    pub fn push_read_range(&self, offset: u64, length: i64) {
        self.read_ranges.lock().unwrap().push_back((offset, length));
    }

    pub fn writes(&self) -> Vec<(u64, Vec<u8>)> {
        self.writes.lock().unwrap().clone()
    }

    pub fn finished_result(&self) -> Option<Result<(), DsiError>> {
        self.finished.lock().unwrap().clone()
    }

    pub fn perf_markers(&self) -> Vec<(u64, u64)> {
        self.perf_markers.lock().unwrap().clone()
    }

    pub fn restart_markers(&self) -> Vec<(u64, u64)> {
        self.restart_markers.lock().unwrap().clone()
    }

    pub fn intermediate_messages(&self) -> Vec<String> {
        self.intermediate.lock().unwrap().clone()
    }
}

impl Frame for FakeFrame {
    fn register_read(&self, mut buf: Buffer, handle: BufferHandle, on_complete: ReadCompletion) {
        let mut upload = self.upload.lock().unwrap();
        let (data, pos) = &mut *upload;

        if let Some(fail_at) = *self.upload_error_at.lock().unwrap() {
            if *pos >= fail_at {
                let transfer_offset = *pos as u64;
                on_complete(
                    buf,
                    handle,
                    ReadOutcome {
                        transfer_offset,
                        bytes_read: 0,
                        eof: false,
                        error: Some(DsiError::Frame("simulated client abort".into())),
                    },
                );
                return;
            }
        }

        let transfer_offset = *pos as u64;
        let cap = buf.capacity();
        let remaining = data.len() - *pos;
        let take = remaining.min(cap);
        buf.as_mut_slice()[..take].copy_from_slice(&data[*pos..*pos + take]);
        buf.set_valid_length(take);
        *pos += take;
        let eof = *pos >= data.len();
        drop(upload);

        on_complete(buf, handle, ReadOutcome { transfer_offset, bytes_read: take, eof, error: None });
    }

    fn register_write(
        &self,
        buf: Buffer,
        handle: BufferHandle,
        offset: u64,
        _stripe_idx: i32,
        on_complete: WriteCompletion,
    ) {
        let mut error_after = self.write_error_after.lock().unwrap();
        if let Some(remaining) = *error_after {
            if remaining == 0 {
                on_complete(buf, handle, WriteOutcome { error: Some(DsiError::Frame("simulated write failure".into())) });
                return;
            }
            *error_after = Some(remaining - 1);
        }
        drop(error_after);

        self.writes.lock().unwrap().push((offset, buf.as_slice().to_vec()));
        on_complete(buf, handle, WriteOutcome { error: None });
    }

    fn begin_transfer(&self) {}

    fn finished_transfer(&self, result: Result<(), DsiError>) {
        *self.finished.lock().unwrap() = Some(result);
    }

    fn get_optimal_concurrency(&self) -> usize {
        *self.optimal_concurrency.lock().unwrap()
    }

    fn get_block_size(&self) -> usize {
        self.block_size
    }

    fn get_read_range(&self) -> Option<(u64, i64)> {
        self.read_ranges.lock().unwrap().pop_front()
    }

    fn get_write_range(&self) -> Option<(u64, i64)> {
        self.write_ranges.lock().unwrap().pop_front()
    }

    fn intermediate_command(&self, msg: &str) -> Result<(), DsiError> {
        self.intermediate.lock().unwrap().push(msg.to_string());
        Ok(())
    }

    fn update_perf_marker(&self, offset: u64, length: u64) {
        self.perf_markers.lock().unwrap().push((offset, length));
    }

    fn update_restart_marker(&self, offset: u64, length: u64) {
        self.restart_markers.lock().unwrap().push((offset, length));
    }

    fn get_update_interval(&self) -> Duration {
        self.update_interval
    }
}
