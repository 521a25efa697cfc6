//! Error types for device detection

use thiserror::Error;
use usbu_model::Transport;

/// Errors that can occur during detection
#[derive(Debug, Error)]
pub enum DetectError {
    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// A whole backend cannot run on this host
    #[error("{} unavailable: {reason}", .transport.name())]
    BackendUnavailable { transport: Transport, reason: String },

    /// The BLE listen overran its window and was abandoned
    #[error("BLE scan timed out after {after_ms}ms")]
    BleTimedOut { after_ms: u64 },

    /// Reading the OS device tree failed
    #[error("topology query failed: {0}")]
    Topology(String),

    /// A blocking scan task panicked or was cancelled
    #[error("scan task failed: {0}")]
    TaskFailed(String),

    /// Serial port error
    #[error("serial port error: {0}")]
    SerialPort(#[from] serialport::Error),
}

impl DetectError {
    pub(crate) fn unavailable(transport: Transport, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            transport,
            reason: reason.into(),
        }
    }
}
