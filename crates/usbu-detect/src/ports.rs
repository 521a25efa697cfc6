//! Serial port listing
//!
//! Live OS port enumeration through `serialport`, plus the USB location of
//! each port where the platform exposes it (sysfs on Linux). The listing is
//! always fetched fresh; port names are volatile and never cached.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serialport::{available_ports, SerialPortType};
use tracing::{debug, info};

use crate::classes::adapter_name;
use crate::error::DetectError;

/// Where a port's USB device sits on the bus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbLocation {
    pub bus: Option<u8>,
    pub address: Option<u8>,
    #[serde(default)]
    pub port_path: Vec<u8>,
}

/// Information about a serial port
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub port_name: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB serial number (if available)
    pub serial: Option<String>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
    /// USB location, on platforms that expose it
    pub location: Option<UsbLocation>,
}

impl PortEntry {
    /// Create from serialport crate's port info
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port_name: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial: usb.serial_number.clone(),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
                location: None,
            },
            _ => Self {
                port_name: name,
                ..Default::default()
            },
        }
    }

    /// A USB serial port with the given IDs
    pub fn usb(port_name: impl Into<String>, vid: u16, pid: u16) -> Self {
        Self {
            port_name: port_name.into(),
            vid: Some(vid),
            pid: Some(pid),
            ..Default::default()
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_location(mut self, bus: u8, address: u8, port_path: Vec<u8>) -> Self {
        self.location = Some(UsbLocation {
            bus: Some(bus),
            address: Some(address),
            port_path,
        });
        self
    }

    pub fn is_usb(&self) -> bool {
        self.vid.is_some() && self.pid.is_some()
    }

    pub fn matches_ids(&self, vid: u16, pid: u16) -> bool {
        self.vid == Some(vid) && self.pid == Some(pid)
    }

    /// Product string, else the adapter chip family, else "Unknown"
    pub fn display_label(&self) -> String {
        if let Some(product) = self.product.as_deref().filter(|p| !p.is_empty()) {
            return product.to_string();
        }
        match self.vid.and_then(adapter_name) {
            Some(chip) => format!("{} serial adapter", chip),
            None => "Unknown".to_string(),
        }
    }
}

/// Port scanner configuration
#[derive(Debug, Clone)]
pub struct PortScannerConfig {
    /// Skip ports whose name contains any of these
    pub skip_patterns: Vec<String>,
}

impl Default for PortScannerConfig {
    fn default() -> Self {
        Self {
            skip_patterns: vec![
                // Bluetooth ports on macOS
                "Bluetooth".to_string(),
                // Debug/logging ports
                "debug".to_string(),
            ],
        }
    }
}

/// Where port listings come from
#[derive(Debug, Clone)]
pub enum PortSource {
    /// The operating system
    System,
    /// A fixed listing
    Simulated(Vec<PortEntry>),
    /// Enumeration always fails with this message
    Unavailable(String),
}

/// Serial port scanner
#[derive(Debug, Clone)]
pub struct PortScanner {
    config: PortScannerConfig,
    source: PortSource,
}

impl PortScanner {
    /// Create a new scanner over the system ports with default configuration
    pub fn new() -> Self {
        Self::with_config(PortScannerConfig::default())
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: PortScannerConfig) -> Self {
        Self {
            config,
            source: PortSource::System,
        }
    }

    pub fn with_source(mut self, source: PortSource) -> Self {
        self.source = source;
        self
    }

    /// Scanner over a fixed listing
    pub fn simulated(ports: Vec<PortEntry>) -> Self {
        Self::new().with_source(PortSource::Simulated(ports))
    }

    /// Enumerate all available serial ports (blocking)
    pub fn enumerate_ports(&self) -> Result<Vec<PortEntry>, DetectError> {
        debug!("Enumerating serial ports...");
        let ports = match &self.source {
            PortSource::System => system_ports()?,
            PortSource::Simulated(ports) => ports.clone(),
            PortSource::Unavailable(reason) => {
                return Err(DetectError::EnumerationFailed(reason.clone()))
            }
        };

        let result: Vec<_> = ports
            .into_iter()
            .filter(|p| !self.should_skip_port(p))
            .collect();

        if result.is_empty() {
            info!("No serial ports found");
        } else {
            info!("Found {} serial port(s)", result.len());
            for port in &result {
                debug!("  {} - {}", port.port_name, port.display_label());
            }
        }

        Ok(result)
    }

    /// True if a port with this name is currently listed
    pub fn is_port_present(&self, port_name: &str) -> Result<bool, DetectError> {
        Ok(self
            .enumerate_ports()?
            .iter()
            .any(|p| same_port_name(&p.port_name, port_name)))
    }

    /// Check if a port should be skipped
    fn should_skip_port(&self, port: &PortEntry) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.port_name.contains(pattern.as_str()))
    }
}

impl Default for PortScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Port names compare case-insensitively on Windows (`com5` is `COM5`)
pub fn same_port_name(a: &str, b: &str) -> bool {
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn system_ports() -> Result<Vec<PortEntry>, DetectError> {
    let ports = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let mut entry = PortEntry::from_serialport(p.port_name, &p.port_type);
            if entry.is_usb() {
                entry.location = port_location(&entry.port_name);
            }
            entry
        })
        .collect())
}

#[cfg(target_os = "linux")]
fn port_location(port_name: &str) -> Option<UsbLocation> {
    sysfs_location(Path::new("/sys"), port_name)
}

#[cfg(not(target_os = "linux"))]
fn port_location(_port_name: &str) -> Option<UsbLocation> {
    None
}

/// Resolve a tty's USB device under a sysfs root
///
/// `<root>/class/tty/<name>/device` points into the device tree; the first
/// ancestor holding `busnum`/`devnum` is the USB device itself.
pub fn sysfs_location(sysfs_root: &Path, port_name: &str) -> Option<UsbLocation> {
    let name = Path::new(port_name).file_name()?.to_str()?;
    let link = sysfs_root.join("class").join("tty").join(name).join("device");
    let device = std::fs::canonicalize(link).ok()?;

    let usb_dir = device
        .ancestors()
        .find(|dir| dir.join("busnum").is_file() && dir.join("devnum").is_file())?;

    let read_num = |file: &str| -> Option<u8> {
        std::fs::read_to_string(usb_dir.join(file))
            .ok()?
            .trim()
            .parse()
            .ok()
    };

    let port_path = usb_dir
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(parse_sysfs_device_name)
        .map(|(_, path)| path)
        .unwrap_or_default();

    Some(UsbLocation {
        bus: read_num("busnum"),
        address: read_num("devnum"),
        port_path,
    })
}

/// Parse a sysfs USB device name (`1-2.3`) into bus and port path
///
/// Root hubs (`usb1`) and interface nodes (`1-2.3:1.0`) are not devices
/// with a port path and yield `None`.
pub fn parse_sysfs_device_name(name: &str) -> Option<(u8, Vec<u8>)> {
    if name.contains(':') {
        return None;
    }
    let (bus, ports) = name.split_once('-')?;
    let bus = bus.parse().ok()?;
    let path = ports
        .split('.')
        .map(|p| p.parse().ok())
        .collect::<Option<Vec<u8>>>()?;
    Some((bus, path))
}
