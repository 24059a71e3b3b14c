/// A fixed-capacity byte buffer moved between the free list, the ready
/// list, and whichever collaborator (frame or archive) currently owns it.
///
/// Ownership in this port replaces the source's sentinel-tagged raw
/// pointer: a `Buffer` only ever exists in one place at a time, so a
/// callback that still references one after release is a type error, not
/// a runtime bug to be guarded against. `BufferHandle` (see `pool`)
/// carries the generation check that plays the sentinel's original role
/// for callbacks that must name a buffer without holding it.
pub struct Buffer {
    data: Vec<u8>,
    pub transfer_offset: u64,
    pub valid_length: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            data: vec![0u8; capacity],
            transfer_offset: 0,
            valid_length: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// The full, writable backing store, regardless of `valid_length`.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The portion of the buffer holding meaningful bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.valid_length]
    }

    pub fn set_valid_length(&mut self, len: usize) {
        assert!(len <= self.data.len(), "valid_length exceeds capacity");
        self.valid_length = len;
    }
}
