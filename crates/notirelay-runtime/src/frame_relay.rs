//! Frame transports for the daemon: a device/FIFO writer and a log sink.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use notirelay_daemon::relay::{RelayChannel, RelayError};

/// Where encoded reminder frames go.
#[derive(Debug)]
pub enum FrameRelay {
    /// Append frames to a path: a serial tty, a FIFO read by a BLE bridge, or a plain file.
    Device(DeviceRelay),
    /// Log each frame as hex. Used when no output path is configured.
    Log,
}

impl FrameRelay {
    pub fn from_path(path: Option<PathBuf>) -> Self {
        match path {
            Some(path) => Self::Device(DeviceRelay::new(path)),
            None => Self::Log,
        }
    }
}

impl RelayChannel for FrameRelay {
    async fn send(&self, frame: &[u8]) -> Result<(), RelayError> {
        match self {
            Self::Device(device) => device.write_frame(frame).await,
            Self::Log => {
                tracing::info!(len = frame.len(), frame = %hex::encode(frame), "reminder frame");
                Ok(())
            }
        }
    }
}

// ─── Device ──────────────────────────────────────────────────────────

/// Lazily opened append handle. A failed write drops the handle so the
/// next frame reopens the path (a FIFO reader may have restarted).
#[derive(Debug)]
pub struct DeviceRelay {
    path: PathBuf,
    handle: Mutex<Option<File>>,
}

impl DeviceRelay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            handle: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_frame(&self, frame: &[u8]) -> Result<(), RelayError> {
        let mut handle = self.handle.lock().await;
        if handle.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            tracing::debug!(path = %self.path.display(), "opened relay output");
            *handle = Some(file);
        }
        let Some(file) = handle.as_mut() else {
            return Err(RelayError::Closed);
        };

        let written = async {
            file.write_all(frame).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = written {
            *handle = None;
            return Err(e.into());
        }
        Ok(())
    }
}
