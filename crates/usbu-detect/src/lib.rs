//! Device Detection Library
//!
//! This crate enumerates attached devices per transport and lists the
//! serial ports they expose:
//!
//! - **USB**: descriptors through libusb, failing per device, not per scan
//! - **BLE**: time-bounded advertisement listen (`ble` feature)
//! - **Topology**: hub/port chain and host controller from the Windows
//!   device tree; a no-op elsewhere
//! - **Ports**: live serial port listing with USB location where available
//!
//! # Example
//!
//! ```rust,no_run
//! use usbu_detect::PortScanner;
//!
//! let scanner = PortScanner::new();
//! let ports = scanner.enumerate_ports().unwrap();
//!
//! for port in ports {
//!     println!("Found port: {} ({})", port.port_name, port.display_label());
//! }
//! ```

pub mod ble;
pub mod classes;
pub mod error;
pub mod ports;
pub mod scanner;
pub mod topology;
pub mod usb;
pub mod warning;

pub use ble::{BleRecord, BleScanner, BleSource};
pub use error::DetectError;
pub use ports::{PortEntry, PortScanner, PortScannerConfig, PortSource, UsbLocation};
pub use scanner::{DeviceScanner, RawScan, ScanBackend};
pub use topology::{TopologyEntry, TopologySource};
pub use usb::{DeviceFault, FaultKind, UsbRecord, UsbScan, UsbScanner, UsbSource};
pub use warning::{ScanWarning, WarningKind};
