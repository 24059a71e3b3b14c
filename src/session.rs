//! Per-session handle linking configuration and the identity the frame
//! already authenticated (spec.md §3's "Session scaffold", §6's
//! `init`/`destroy`). Credential acquisition and identity masquerade are
//! the frame's and the archive client library's job, not this crate's
//! (spec.md §1) — `Session` only carries what survived authentication far
//! enough to be useful for session-scoped logging and config lookups.

use crate::config::Config;
use crate::error::DsiError;

/// What the frame hands the core once it has authenticated a user,
/// matching spec.md §6's `init(session_info)` input: "authenticated
/// identity, desired home".
#[derive(Debug, Clone)]
pub struct Identity {
    pub login_name: String,
    pub home: String,
}

/// Opaque session handle returned by [`init`]. Holds no archive or frame
/// connection state of its own — those are supplied fresh to every
/// `send`/`recv`/`command`/`stat` call (spec.md §2: each entry point
/// "constructs a short-lived engine instance").
pub struct Session {
    pub config: Config,
    pub identity: Identity,
}

/// Construct a session, failing per spec.md §7's "User errors" category
/// on an empty identity and, per SPEC_FULL.md §2, treating a config parse
/// failure as a hard session-init error rather than falling back to
/// defaults.
pub fn init(identity: Identity, config: Config) -> Result<Session, DsiError> {
    if identity.login_name.is_empty() {
        return Err(DsiError::User("session init: empty login name".into()));
    }
    log::info!("session initialized for {}", identity.login_name);
    Ok(Session { config, identity })
}

pub fn destroy(session: Session) {
    log::info!("session destroyed for {}", session.identity.login_name);
}
