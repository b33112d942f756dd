//! RelayChannel trait: the outbound seam to the peripheral transport.
//! Implementations own delivery (and any retry policy); the engine makes one
//! attempt per ingested event and only reports the outcome.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay timed out after {0:?}")]
    Timeout(Duration),

    #[error("relay io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("relay channel closed")]
    Closed,

    #[error("peripheral rejected frame: {0}")]
    Rejected(String),
}

/// Accepts one encoded frame for delivery to the peripheral.
pub trait RelayChannel: Send + Sync {
    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<(), RelayError>> + Send;
}

impl<T: RelayChannel> RelayChannel for Arc<T> {
    fn send(&self, frame: &[u8]) -> impl Future<Output = Result<(), RelayError>> + Send {
        (**self).send(frame)
    }
}

// ─── In-memory channel ───────────────────────────────────────────────

/// Records every frame it is handed. Can be switched to fail or to stall,
/// which makes it the stand-in transport for pipeline tests.
#[derive(Debug, Default)]
pub struct MemoryRelay {
    frames: Mutex<Vec<Vec<u8>>>,
    mode: Mutex<MemoryRelayMode>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemoryRelayMode {
    #[default]
    Accept,
    /// Record the frame, then report `Rejected`.
    Reject,
    /// Never complete (exercises caller timeouts). Nothing is recorded.
    Stall,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: MemoryRelayMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn sent_count(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl RelayChannel for MemoryRelay {
    async fn send(&self, frame: &[u8]) -> Result<(), RelayError> {
        let mode = *self.mode.lock().unwrap_or_else(PoisonError::into_inner);
        if mode == MemoryRelayMode::Stall {
            std::future::pending::<()>().await;
        }
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.to_vec());
        match mode {
            MemoryRelayMode::Reject => Err(RelayError::Rejected("memory relay set to reject".into())),
            _ => Ok(()),
        }
    }
}
