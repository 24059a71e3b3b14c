use anyhow::{bail, Error};

/// Designates the open end of a file: "transfer everything from this
/// range's offset to wherever the file currently ends."
pub const OPEN_END: i64 = i64::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Range {
    pub offset: u64,
    pub length: i64,
}

impl Range {
    fn end(&self) -> Option<u64> {
        if self.length == OPEN_END {
            None
        } else {
            Some(self.offset + self.length as u64)
        }
    }
}

/// Ordered, non-overlapping (offset, length) intervals describing what
/// remains to be transferred. A `length` of [`OPEN_END`] marks the tail
/// range as unbounded.
#[derive(Default)]
pub struct RangeList {
    ranges: Vec<Range>,
}

impl RangeList {
    pub fn new() -> Self {
        RangeList { ranges: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn peek(&self) -> Option<Range> {
        self.ranges.first().copied()
    }

    pub fn pop(&mut self) -> Option<Range> {
        if self.ranges.is_empty() {
            None
        } else {
            Some(self.ranges.remove(0))
        }
    }

    /// Insert `(offset, length)`, coalescing with any abutting neighbor.
    /// Rejects a zero length and rejects ranges that overlap an existing
    /// one (the caller is responsible for never presenting overlapping
    /// restart ranges).
    pub fn insert(&mut self, offset: u64, length: i64) -> Result<(), Error> {
        if length == 0 {
            bail!("range list insert: zero-length range");
        }
        let new = Range { offset, length };
        let new_end = new.end();

        let idx = self
            .ranges
            .binary_search_by_key(&offset, |r| r.offset)
            .unwrap_or_else(|i| i);

        if let Some(prev) = idx.checked_sub(1).and_then(|i| self.ranges.get(i)) {
            if let Some(prev_end) = prev.end() {
                if prev_end > offset {
                    bail!("range list insert: overlaps preceding range");
                }
            } else {
                bail!("range list insert: preceding range is already open-ended");
            }
        }
        if let Some(next) = self.ranges.get(idx) {
            if let Some(end) = new_end {
                if end > next.offset {
                    bail!("range list insert: overlaps following range");
                }
            } else {
                bail!("range list insert: new range is open-ended but a later range exists");
            }
        }

        self.ranges.insert(idx, new);
        self.coalesce_around(idx);
        Ok(())
    }

    fn coalesce_around(&mut self, idx: usize) {
        // Merge with the following neighbor first so indices stay valid.
        if idx + 1 < self.ranges.len() {
            let cur_end = self.ranges[idx].end();
            if let Some(end) = cur_end {
                if end == self.ranges[idx + 1].offset {
                    let merged_len = self.ranges[idx + 1].end().map(|e| (e - self.ranges[idx].offset) as i64);
                    self.ranges[idx].length = merged_len.unwrap_or(OPEN_END);
                    self.ranges.remove(idx + 1);
                }
            }
        }
        if idx > 0 {
            let prev_end = self.ranges[idx - 1].end();
            if prev_end == Some(self.ranges[idx].offset) {
                let merged_len = self.ranges[idx].end().map(|e| (e - self.ranges[idx - 1].offset) as i64);
                self.ranges[idx - 1].length = merged_len.unwrap_or(OPEN_END);
                self.ranges.remove(idx);
            }
        }
    }

    /// Remove `(offset, length)` from the list, splitting a node if the
    /// deleted span falls strictly inside it.
    pub fn delete(&mut self, offset: u64, length: i64) -> Result<(), Error> {
        if length == 0 {
            bail!("range list delete: zero-length range");
        }
        let del_end_excl = if length == OPEN_END { None } else { Some(offset + length as u64) };

        let idx = self
            .ranges
            .iter()
            .position(|r| {
                r.offset <= offset
                    && match (r.end(), del_end_excl) {
                        (None, _) => true,
                        (Some(e), None) => e > offset,
                        (Some(e), Some(de)) => e >= de,
                    }
            })
            .ok_or_else(|| anyhow::format_err!("range list delete: no covering range"))?;

        let r = self.ranges[idx];
        let left = Range { offset: r.offset, length: (offset - r.offset) as i64 };
        let right = match (r.end(), del_end_excl) {
            (None, Some(de)) => Some(Range { offset: de, length: OPEN_END }),
            (Some(e), Some(de)) if e > de => Some(Range { offset: de, length: (e - de) as i64 }),
            (Some(_), Some(_)) => None,
            (None, None) => unreachable!("both open-ended: delete would be unbounded"),
            (Some(_), None) => None,
        };

        self.ranges.remove(idx);
        let mut insert_at = idx;
        if left.length > 0 {
            self.ranges.insert(insert_at, left);
            insert_at += 1;
        }
        if let Some(right) = right {
            self.ranges.insert(insert_at, right);
        }
        Ok(())
    }

    /// Translate a cumulative transfer-offset (bytes moved so far, as the
    /// frame counts them) into the absolute file offset it corresponds
    /// to, walking the ranges in order. `None` if `transfer_offset` is
    /// past everything currently scheduled.
    pub fn transfer_to_file_offset(&self, transfer_offset: u64) -> Option<u64> {
        let mut consumed = 0u64;
        for r in &self.ranges {
            let len = match r.length {
                OPEN_END => return Some(r.offset + (transfer_offset - consumed)),
                l => l as u64,
            };
            if transfer_offset < consumed + len {
                return Some(r.offset + (transfer_offset - consumed));
            }
            consumed += len;
        }
        None
    }

    /// Inverse of [`transfer_to_file_offset`]: given an absolute file
    /// offset, how many transfer-bytes precede it across the scheduled
    /// ranges. `None` if `file_offset` does not fall within any range.
    pub fn file_to_transfer_offset(&self, file_offset: u64) -> Option<u64> {
        let mut consumed = 0u64;
        for r in &self.ranges {
            match r.end() {
                Some(end) if file_offset < end => {
                    if file_offset >= r.offset {
                        return Some(consumed + (file_offset - r.offset));
                    }
                    return None;
                }
                Some(end) => consumed += end - r.offset,
                None => {
                    if file_offset >= r.offset {
                        return Some(consumed + (file_offset - r.offset));
                    }
                    return None;
                }
            }
        }
        None
    }
}

/// Clip a frame-supplied `(offset, length)` request (`length == -1`
/// meaning open end) against a known file extent, or leave it open when
/// no extent is known (STOR, where the upload defines the file's length).
fn clip(offset: u64, length: i64, file_size: Option<u64>) -> Range {
    if length == OPEN_END {
        match file_size {
            Some(size) if size > offset => Range { offset, length: (size - offset) as i64 },
            Some(_) => Range { offset, length: 0 },
            None => Range { offset, length: OPEN_END },
        }
    } else {
        Range { offset, length }
    }
}

/// Build the range list for a STOR (frame-to-archive) transfer: the
/// file's final length is not known in advance, so an open-ended request
/// is carried through as open-ended.
pub fn fill_for_stor(requests: &[(u64, i64)]) -> Result<RangeList, Error> {
    let mut list = RangeList::new();
    for &(offset, length) in requests {
        let r = clip(offset, length, None);
        if r.length != 0 {
            list.insert(r.offset, r.length)?;
        }
    }
    Ok(list)
}

/// Build the range list for a RETR (archive-to-frame) transfer, clipping
/// open-ended and out-of-range requests against the file's known size.
pub fn fill_for_retr(requests: &[(u64, i64)], file_size: u64) -> Result<RangeList, Error> {
    let mut list = RangeList::new();
    for &(offset, length) in requests {
        let r = clip(offset, length, Some(file_size));
        if r.length != 0 {
            list.insert(r.offset, r.length)?;
        }
    }
    Ok(list)
}

/// Build the (single-range) list for a CKSM transfer: `None` requests the
/// whole file.
pub fn fill_for_cksm(request: Option<(u64, i64)>, file_size: u64) -> Result<RangeList, Error> {
    let mut list = RangeList::new();
    let (offset, length) = request.unwrap_or((0, OPEN_END));
    let r = clip(offset, length, Some(file_size));
    if r.length != 0 {
        list.insert(r.offset, r.length)?;
    }
    Ok(list)
}
