//! Structured, non-fatal scan warnings
//!
//! Per-device and per-backend failures never abort a scan. They are
//! collected here and travel with the scan result so callers can report
//! a degraded scan without treating it as an error.

use std::fmt;

use serde::{Deserialize, Serialize};
use usbu_model::Transport;

use crate::error::DetectError;

/// Category of a scan warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Backend missing on this host (no libusb, no BLE stack)
    BackendUnavailable,
    /// Backend started but failed as a whole
    BackendFailed,
    /// BLE listen exceeded its window
    TimedOut,
    /// A single device refused access and was skipped
    AccessDenied,
    /// A single device failed with an I/O error and was skipped
    DeviceIo,
    /// OS topology could not be read; records are unannotated
    Topology,
}

/// A non-fatal problem encountered during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub transport: Option<Transport>,
    pub kind: WarningKind,
    /// Device location, e.g. `bus 1 addr 7`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub message: String,
}

impl ScanWarning {
    /// Warning for a backend that failed as a whole
    pub fn backend(transport: Transport, error: &DetectError) -> Self {
        let kind = match error {
            DetectError::BackendUnavailable { .. } => WarningKind::BackendUnavailable,
            DetectError::BleTimedOut { .. } => WarningKind::TimedOut,
            _ => WarningKind::BackendFailed,
        };
        Self {
            transport: Some(transport),
            kind,
            device: None,
            message: error.to_string(),
        }
    }

    /// Warning for a topology annotation failure
    pub fn topology(error: &DetectError) -> Self {
        Self {
            transport: Some(Transport::Usb),
            kind: WarningKind::Topology,
            device: None,
            message: error.to_string(),
        }
    }

    /// True if this warning says the BLE backend could not deliver results
    pub fn is_ble_unavailable(&self) -> bool {
        self.transport == Some(Transport::Ble)
            && matches!(
                self.kind,
                WarningKind::BackendUnavailable | WarningKind::TimedOut | WarningKind::BackendFailed
            )
    }
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(transport) = self.transport {
            write!(f, "[{}] ", transport.name())?;
        }
        if let Some(device) = &self.device {
            write!(f, "{}: ", device)?;
        }
        f.write_str(&self.message)
    }
}
