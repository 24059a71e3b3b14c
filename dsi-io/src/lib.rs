//! Buffer pool and restart-range bookkeeping shared by the STOR, RETR and
//! CKSM engines. This crate knows nothing about the frame, the archive,
//! or parallel I/O; it only provides the data structures those layers
//! coordinate through.

mod buffer;
mod pool;
mod range_list;

pub use buffer::Buffer;
pub use pool::{BufferHandle, BufferPool};
pub use range_list::{fill_for_cksm, fill_for_retr, fill_for_stor, Range, RangeList, OPEN_END};
