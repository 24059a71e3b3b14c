//! Data-movement core for a GridFTP HPSS storage interface: the
//! bidirectional byte pump bridging a wide-area transfer server's
//! callback-oriented frame API and an archive's parallel-I/O primitive
//! (spec.md §1-§2).
//!
//! The crate exports five entry points mirroring the host frame's
//! function-pointer table (spec.md §6): [`init`]/[`destroy`] manage a
//! [`Session`], and [`send`]/[`recv`]/[`command`]/[`stat`] each run one
//! short-lived transfer or request to completion before returning. Only
//! the CKSM verb of `command` and the PIO-driven engines are implemented
//! here; every other verb and all of `stat` delegate to collaborators the
//! frame/archive client library supplies (spec.md §1's explicit
//! out-of-scope list).

pub mod archive;
pub mod cksm;
pub mod config;
pub mod error;
pub mod frame;
pub mod markers;
pub mod pio;
pub mod policy;
pub mod retr;
pub mod session;
pub mod stor;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

pub use error::DsiError;
pub use session::{Identity, Session};

use archive::Archive;
use frame::Frame;

/// `init(session_info)`: authenticate and load configuration, returning
/// an opaque session handle (spec.md §6). Config discovery/parsing is
/// delegated to [`config::load`]; a parse failure is a hard session-init
/// error (SPEC_FULL.md §2), not a fallback to defaults.
pub fn init(identity: Identity) -> Result<Session, DsiError> {
    let config = config::load().map_err(|e| DsiError::User(e.to_string()))?;
    session::init(identity, config)
}

/// `destroy(session)` (spec.md §6).
pub fn destroy(session: Session) {
    session::destroy(session)
}

/// `send(op, transfer_info)`: archive → frame (spec.md §6's naming is
/// frame-centric — "send" means send *to* the frame, i.e. RETR).
pub fn send<A: Archive + ?Sized>(
    _session: &Session,
    archive: &A,
    frame: Arc<dyn Frame>,
    path: &str,
) -> Result<(), DsiError> {
    retr::retr(archive, frame, path)
}

/// `recv(op, transfer_info)`: frame → archive (STOR).
pub fn recv<A: Archive + ?Sized>(
    _session: &Session,
    archive: &A,
    frame: Arc<dyn Frame>,
    path: &str,
    alloc_size: u64,
    truncate: bool,
) -> Result<(), DsiError> {
    stor::stor(archive, frame, path, alloc_size, truncate)
}

/// A `command(op, cmd_info)` request (spec.md §6). Only [`Command::Cksm`]
/// is implemented by this core; every other verb named in spec.md §1
/// (mkdir, rmdir, delete, rename, chmod, chgrp, utime, symlink, truncate,
/// stage) is represented as [`Command::Delegated`] and handed to whatever
/// collaborator the frame wires up for it.
pub enum Command<'a> {
    Cksm {
        path: &'a str,
        request: Option<(u64, i64)>,
        persist: bool,
    },
    Delegated {
        verb: &'a str,
        args: &'a [String],
    },
}

/// Out-of-scope command verbs (spec.md §1: "Directory listing, stat,
/// rename, chmod, chgrp, chown, mkdir, rmdir, unlink, symlink, utime,
/// truncate, and the STAGE command").
pub trait CommandDelegate: Send + Sync {
    fn run(&self, verb: &str, args: &[String]) -> Result<String, DsiError>;
}

/// `command(op, cmd_info)`: calls `finished_command(result, response)` on
/// the frame in the real ABI; here the response is simply the return
/// value, since this crate is a Rust library rather than a C callback
/// table.
pub fn command<A: Archive + ?Sized>(
    _session: &Session,
    archive: &A,
    frame: Arc<dyn Frame>,
    delegate: &dyn CommandDelegate,
    cmd: Command<'_>,
) -> Result<String, DsiError> {
    match cmd {
        Command::Cksm { path, request, persist } => cksm::cksm(archive, frame, path, request, persist),
        Command::Delegated { verb, args } => delegate.run(verb, args),
    }
}

/// One entry of a `stat` response (spec.md §6: `finished_stat(result,
/// entries, n)`).
#[derive(Debug, Clone)]
pub struct StatEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: u64,
}

/// Directory listing and file stat are out of scope for this core
/// (spec.md §1); `stat` is kept as an entry point so the exported table
/// matches spec.md §6, but delegates entirely.
pub trait StatDelegate: Send + Sync {
    fn stat(&self, path: &str, file_only: bool, use_symlink_info: bool) -> Result<Vec<StatEntry>, DsiError>;
}

/// `stat(op, stat_info)` (spec.md §6).
pub fn stat(
    _session: &Session,
    delegate: &dyn StatDelegate,
    path: &str,
    file_only: bool,
    use_symlink_info: bool,
) -> Result<Vec<StatEntry>, DsiError> {
    delegate.stat(path, file_only, use_symlink_info)
}
