//! USB descriptor enumeration
//!
//! Devices are read through libusb (`rusb`). Every device is read
//! independently: a device whose descriptor cannot be read is skipped and
//! reported as a [`ScanWarning`], and a device that cannot be opened still
//! produces a record, just without string descriptors.

use std::fmt;

use rusb::{Device, DeviceDescriptor, UsbContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};
use usbu_model::{normalize_serial, Topology, Transport};

use crate::classes::summarize_classes;
use crate::error::DetectError;
use crate::warning::{ScanWarning, WarningKind};

/// Raw record for one USB device, before unification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbRecord {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    pub bus: Option<u8>,
    pub address: Option<u8>,
    /// Hub port numbers from the root hub down to the device
    pub port_path: Vec<u8>,
    pub class_guess: Option<String>,
    /// Filled in by the topology annotator on hosts that support it
    pub topology: Option<Topology>,
}

impl UsbRecord {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            ..Default::default()
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_location(mut self, bus: u8, address: u8, port_path: Vec<u8>) -> Self {
        self.bus = Some(bus);
        self.address = Some(address);
        self.port_path = port_path;
        self
    }

    pub fn with_strings(mut self, manufacturer: &str, product: &str) -> Self {
        self.manufacturer = Some(manufacturer.to_string());
        self.product = Some(product.to_string());
        self
    }
}

/// Why a single device was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    AccessDenied,
    Io,
}

/// A per-device failure; the device is skipped, the scan continues
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFault {
    pub bus: u8,
    pub address: u8,
    pub kind: FaultKind,
    pub message: String,
}

impl DeviceFault {
    pub fn new(bus: u8, address: u8, kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            bus,
            address,
            kind,
            message: message.into(),
        }
    }

    fn from_rusb(bus: u8, address: u8, error: rusb::Error) -> Self {
        let kind = match error {
            rusb::Error::Access => FaultKind::AccessDenied,
            _ => FaultKind::Io,
        };
        Self::new(bus, address, kind, error.to_string())
    }

    fn into_warning(self) -> ScanWarning {
        ScanWarning {
            transport: Some(Transport::Usb),
            kind: match self.kind {
                FaultKind::AccessDenied => WarningKind::AccessDenied,
                FaultKind::Io => WarningKind::DeviceIo,
            },
            device: Some(format!("bus {} addr {}", self.bus, self.address)),
            message: self.message,
        }
    }
}

impl fmt::Display for DeviceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus {} addr {}: {}", self.bus, self.address, self.message)
    }
}

/// Result of one USB enumeration pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbScan {
    pub records: Vec<UsbRecord>,
    pub warnings: Vec<ScanWarning>,
}

impl UsbScan {
    fn collect(outcomes: impl IntoIterator<Item = Result<UsbRecord, DeviceFault>>) -> Self {
        let mut scan = UsbScan::default();
        for outcome in outcomes {
            match outcome {
                Ok(record) => scan.records.push(record),
                Err(fault) => {
                    warn!("Skipping USB device {}", fault);
                    scan.warnings.push(fault.into_warning());
                }
            }
        }
        scan
    }
}

/// Where USB records come from
#[derive(Debug, Clone)]
pub enum UsbSource {
    /// The host's libusb
    Libusb,
    /// Fixed device list, including injected per-device faults
    Simulated(Vec<Result<UsbRecord, DeviceFault>>),
    /// No descriptor access on this host
    Unavailable(String),
}

/// USB backend
#[derive(Debug, Clone)]
pub struct UsbScanner {
    source: UsbSource,
}

impl UsbScanner {
    /// Scanner over the host's libusb
    pub fn new() -> Self {
        Self {
            source: UsbSource::Libusb,
        }
    }

    pub fn with_source(source: UsbSource) -> Self {
        Self { source }
    }

    /// Scanner that returns the given devices
    pub fn simulated(records: Vec<UsbRecord>) -> Self {
        Self::with_source(UsbSource::Simulated(records.into_iter().map(Ok).collect()))
    }

    /// Enumerate attached devices (blocking)
    pub fn scan(&self) -> Result<UsbScan, DetectError> {
        let scan = match &self.source {
            UsbSource::Libusb => scan_libusb()?,
            UsbSource::Simulated(devices) => UsbScan::collect(devices.iter().cloned()),
            UsbSource::Unavailable(reason) => {
                return Err(DetectError::unavailable(Transport::Usb, reason.clone()))
            }
        };

        info!(
            "USB scan found {} device(s), skipped {}",
            scan.records.len(),
            scan.warnings.len()
        );
        Ok(scan)
    }

    /// Live presence check, nothing is persisted
    pub fn is_connected(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<bool, DetectError> {
        let wanted = normalize_serial(serial);
        Ok(self.scan()?.records.iter().any(|r| {
            r.vendor_id == vendor_id
                && r.product_id == product_id
                && match &wanted {
                    Some(s) => normalize_serial(r.serial.as_deref()).as_ref() == Some(s),
                    None => true,
                }
        }))
    }
}

impl Default for UsbScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn scan_libusb() -> Result<UsbScan, DetectError> {
    let devices = rusb::devices().map_err(|e| {
        DetectError::unavailable(Transport::Usb, format!("libusb enumeration failed: {}", e))
    })?;

    debug!("libusb reports {} device(s)", devices.len());
    Ok(UsbScan::collect(devices.iter().map(|d| read_device(&d))))
}

fn read_device<T: UsbContext>(device: &Device<T>) -> Result<UsbRecord, DeviceFault> {
    let bus = device.bus_number();
    let address = device.address();

    let descriptor = device
        .device_descriptor()
        .map_err(|e| DeviceFault::from_rusb(bus, address, e))?;

    // Root hubs and some virtual devices have no port numbers
    let port_path = device.port_numbers().unwrap_or_default();

    let mut record = UsbRecord {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        bus: Some(bus),
        address: Some(address),
        port_path,
        class_guess: interface_classes(device, &descriptor),
        ..Default::default()
    };

    read_strings(device, &descriptor, &mut record);

    trace!(
        "USB {:04x}:{:04x} bus {} addr {} path {:?}",
        record.vendor_id,
        record.product_id,
        bus,
        address,
        record.port_path
    );
    Ok(record)
}

/// Fill string descriptors, tolerating devices that refuse to be opened
fn read_strings<T: UsbContext>(
    device: &Device<T>,
    descriptor: &DeviceDescriptor,
    record: &mut UsbRecord,
) {
    let handle = match device.open() {
        Ok(handle) => handle,
        Err(e) => {
            debug!(
                "Cannot open {:04x}:{:04x} for string descriptors: {}",
                record.vendor_id, record.product_id, e
            );
            return;
        }
    };

    if descriptor.manufacturer_string_index().is_some() {
        record.manufacturer = handle.read_manufacturer_string_ascii(descriptor).ok();
    }
    if descriptor.product_string_index().is_some() {
        record.product = handle.read_product_string_ascii(descriptor).ok();
    }
    if descriptor.serial_number_string_index().is_some() {
        record.serial = handle
            .read_serial_number_string_ascii(descriptor)
            .ok()
            .and_then(|s| normalize_serial(Some(&s)));
    }
}

fn interface_classes<T: UsbContext>(
    device: &Device<T>,
    descriptor: &DeviceDescriptor,
) -> Option<String> {
    let mut codes = Vec::new();
    for index in 0..descriptor.num_configurations() {
        let Ok(config) = device.config_descriptor(index) else {
            continue;
        };
        for interface in config.interfaces() {
            codes.extend(interface.descriptors().map(|d| d.class_code()));
        }
    }
    summarize_classes(codes)
}
