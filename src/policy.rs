//! Storage-class hint selection from an advertised allocation size
//! (spec.md §4.7, detailed against `source/module/stor.c`'s
//! `stor_open_for_writing`/`stor_can_change_cos`).

use crate::archive::{Archive, ArchiveFile, CreationHints, HintPriority};
use crate::error::DsiError;

/// Open (or create) a file for a STOR transfer, applying the creation
/// hints the advertised allocation size implies.
///
/// - `alloc_size > 0` and `truncate`: both size hints are set to
///   `alloc_size`; the minimum is `Required` (the archive must place the
///   file where it fits), the maximum only `HighlyDesired` (a required
///   maximum would exclude any class whose cap sits below the hint).
/// - `alloc_size > 0` and not `truncate` (restart onto an existing
///   object): the minimum hint still applies, but the object already has
///   a class, so the maximum side must not be re-hinted.
/// - `alloc_size == 0`: no hints at all.
///
/// After a truncating open, the hints are re-applied via
/// `set_class_by_hints` unless the file's fileset already pins a class.
pub fn open_for_writing<A: Archive + ?Sized>(
    archive: &A,
    path: &str,
    alloc_size: u64,
    truncate: bool,
) -> Result<ArchiveFile, DsiError> {
    let hints = if alloc_size != 0 && truncate {
        Some(CreationHints {
            min_file_size: alloc_size,
            min_priority: HintPriority::Required,
            max_file_size: alloc_size,
            max_priority: HintPriority::HighlyDesired,
        })
    } else {
        None
    };

    let file = archive.open_for_writing(path, truncate, hints)?;

    if let (true, Some(hints)) = (truncate, hints) {
        if !archive.fileset_pins_storage_class(&file)? {
            archive.set_class_by_hints(&file, &hints)?;
        }
    }

    Ok(file)
}

/// Open a file for reading. No hints are used for READ (spec.md §4.7);
/// the file's stripe width, read back from the open, feeds `pio_start`.
pub fn open_for_reading<A: Archive + ?Sized>(
    archive: &A,
    path: &str,
) -> Result<ArchiveFile, DsiError> {
    archive.open_for_reading(path)
}
