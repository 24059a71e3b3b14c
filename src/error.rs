use std::sync::Mutex;

/// The error kinds the core distinguishes at its external boundary. Each
/// variant maps to a stable code the frame's error taxonomy expects;
/// internal plumbing between modules of a single transfer uses
/// `anyhow::Error` and is converted to one of these only when it reaches
/// a point the frame observes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DsiError {
    #[error("memory exhausted: {0}")]
    MemoryExhausted(String),

    #[error("archive error during {op}: {message}")]
    Archive { op: &'static str, message: String },

    #[error("frame error: {0}")]
    Frame(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("policy violation: {0}")]
    Policy(String),

    #[error("user error: {0}")]
    User(String),
}

/// Centralizes the "first error wins" rule so the coordinator thread, the
/// mover thread, and the engine's launcher thread can all publish a
/// failure without racing to decide whose sticks. A successful archive
/// or frame callback can never override an error already latched here.
#[derive(Default)]
pub struct ErrorLatch {
    slot: Mutex<Option<DsiError>>,
}

impl ErrorLatch {
    pub fn new() -> Self {
        ErrorLatch { slot: Mutex::new(None) }
    }

    /// Records `err` if, and only if, nothing has been latched yet.
    pub fn set(&self, err: DsiError) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    pub fn get(&self) -> Option<DsiError> {
        self.slot.lock().unwrap().clone()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    /// The engine's own latched error takes precedence over whatever the
    /// PIO driver itself reports, except when the engine never latched
    /// anything, in which case the PIO-level result is all there is.
    pub fn resolve(&self, pio_result: Result<(), DsiError>) -> Result<(), DsiError> {
        match self.get() {
            Some(err) => Err(err),
            None => pio_result,
        }
    }
}
