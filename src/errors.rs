use std::io;
use thiserror::Error;

/// Integrity failures of a single `$<payload>*<CC>` line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("framing error: {0}")]
    Framing(String),
    #[error("checksum mismatch: computed {computed:02X}, received {received:02X}")]
    ChecksumMismatch { computed: u8, received: u8 },
    #[error("malformed checksum field: {0:?}")]
    MalformedChecksum(String),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serial error: {0}")]
    Serial(#[from] serialport::Error),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("device disconnected")]
    Disconnected,
    #[error("corrupt frame: {0}")]
    Frame(#[from] FrameError),
    #[error("device rejected command: ERR,{code}")]
    DeviceRejected { code: String },
    #[error("malformed data point: {0:?}")]
    MalformedPoint(String),
    #[error("device not ready: {0}")]
    NotReady(String),
    #[error("invalid session state: {0}")]
    InvalidState(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// True for failures of the link itself rather than of what travelled over it.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            DriverError::Io(_)
                | DriverError::Serial(_)
                | DriverError::Timeout(_)
                | DriverError::Disconnected
        )
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;
