//! Snapshot records and scan generations
//!
//! A [`Snapshot`] is the canonical record of one physical device as seen
//! by one scan cycle. The transport is part of the type: a USB snapshot
//! always carries a vendor/product pair, a BLE snapshot never does, and
//! neither can hold the other's payload fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{normalize_serial, IdentityTag};
use crate::usb_id::{format_usb_id, hex};

/// Transport a device was discovered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Usb,
    Ble,
}

impl Transport {
    pub fn name(&self) -> &'static str {
        match self {
            Transport::Usb => "USB",
            Transport::Ble => "BLE",
        }
    }
}

/// Hub/controller placement reported by the OS device tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// `Port_#NNNN` / `Hub_#NNNN` tokens from root to device
    #[serde(default)]
    pub hub_chain: Vec<String>,
    /// Name of the owning host controller
    #[serde(default)]
    pub controller_name: Option<String>,
    /// Raw location string the chain was parsed from
    #[serde(default)]
    pub location_information: Option<String>,
}

/// Snapshot of a USB device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsbSnapshot {
    #[serde(with = "hex")]
    pub vendor_id: u16,
    #[serde(with = "hex")]
    pub product_id: u16,
    #[serde(default)]
    pub serial: Option<String>,
    /// Manufacturer string descriptor as reported by the device
    #[serde(default)]
    pub manufacturer: Option<String>,
    /// Product string descriptor as reported by the device
    #[serde(default)]
    pub product: Option<String>,
    /// Vendor name from the ID database
    #[serde(default)]
    pub vendor_name: Option<String>,
    /// Product name from the ID database
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub bus: Option<u8>,
    #[serde(default)]
    pub address: Option<u8>,
    #[serde(default)]
    pub port_path: Vec<u8>,
    /// Interface classes, e.g. `CDC-ACM,HID`
    #[serde(default)]
    pub class_guess: Option<String>,
    #[serde(default)]
    pub topology: Option<Topology>,
    pub captured_at: DateTime<Utc>,
}

/// Snapshot of a BLE peripheral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleSnapshot {
    pub ble_address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub rssi: Option<i16>,
    #[serde(default)]
    pub service_uuids: Vec<String>,
    pub captured_at: DateTime<Utc>,
}

/// Canonical record for one device from one scan cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum Snapshot {
    Usb(UsbSnapshot),
    Ble(BleSnapshot),
}

impl Snapshot {
    pub fn transport(&self) -> Transport {
        match self {
            Snapshot::Usb(_) => Transport::Usb,
            Snapshot::Ble(_) => Transport::Ble,
        }
    }

    pub fn vendor_id(&self) -> Option<u16> {
        match self {
            Snapshot::Usb(usb) => Some(usb.vendor_id),
            Snapshot::Ble(_) => None,
        }
    }

    pub fn product_id(&self) -> Option<u16> {
        match self {
            Snapshot::Usb(usb) => Some(usb.product_id),
            Snapshot::Ble(_) => None,
        }
    }

    /// Serial number, with placeholder values treated as absent
    pub fn serial(&self) -> Option<String> {
        match self {
            Snapshot::Usb(usb) => normalize_serial(usb.serial.as_deref()),
            Snapshot::Ble(_) => None,
        }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        match self {
            Snapshot::Usb(usb) => usb.captured_at,
            Snapshot::Ble(ble) => ble.captured_at,
        }
    }

    pub fn as_usb(&self) -> Option<&UsbSnapshot> {
        match self {
            Snapshot::Usb(usb) => Some(usb),
            Snapshot::Ble(_) => None,
        }
    }

    pub fn as_ble(&self) -> Option<&BleSnapshot> {
        match self {
            Snapshot::Usb(_) => None,
            Snapshot::Ble(ble) => Some(ble),
        }
    }

    /// Short display key: `0x1234:0x5678` or `BLE:<address>`
    pub fn key(&self) -> String {
        match self {
            Snapshot::Usb(usb) => format!(
                "{}:{}",
                format_usb_id(usb.vendor_id),
                format_usb_id(usb.product_id)
            ),
            Snapshot::Ble(ble) => {
                let token = if ble.ble_address.is_empty() {
                    ble.name.as_deref().unwrap_or("-")
                } else {
                    ble.ble_address.as_str()
                };
                format!("BLE:{}", token)
            }
        }
    }

    /// Derived disambiguation key
    pub fn identity_tag(&self) -> IdentityTag {
        match self {
            Snapshot::Usb(usb) => IdentityTag::for_usb(
                usb.vendor_id,
                usb.product_id,
                usb.serial.as_deref(),
                &usb.port_path,
                usb.bus,
                usb.address,
            ),
            Snapshot::Ble(ble) => IdentityTag::for_ble(&ble.ble_address, ble.name.as_deref()),
        }
    }

    /// True for a USB snapshot with this vendor/product and, if given, serial
    pub fn matches_identity(&self, vendor_id: u16, product_id: u16, serial: Option<&str>) -> bool {
        let Snapshot::Usb(usb) = self else {
            return false;
        };
        if usb.vendor_id != vendor_id || usb.product_id != product_id {
            return false;
        }
        match normalize_serial(serial) {
            Some(wanted) => self.serial().as_deref() == Some(wanted.as_str()),
            None => true,
        }
    }

    /// Copy of this snapshot stamped with a different capture time
    pub fn restamped(&self, captured_at: DateTime<Utc>) -> Snapshot {
        let mut copy = self.clone();
        match &mut copy {
            Snapshot::Usb(usb) => usb.captured_at = captured_at,
            Snapshot::Ble(ble) => ble.captured_at = captured_at,
        }
        copy
    }
}

/// The complete, ordered set of snapshots from one scan cycle
///
/// Generations are immutable once built; a new scan produces a new value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation {
    snapshots: Vec<Snapshot>,
}

impl Generation {
    pub fn new(snapshots: Vec<Snapshot>) -> Self {
        Self { snapshots }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn usb(&self) -> impl Iterator<Item = &UsbSnapshot> {
        self.snapshots.iter().filter_map(Snapshot::as_usb)
    }

    pub fn ble(&self) -> impl Iterator<Item = &BleSnapshot> {
        self.snapshots.iter().filter_map(Snapshot::as_ble)
    }

    /// Snapshots matching a vendor/product pair and optional serial
    pub fn matching<'a>(
        &'a self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&'a str>,
    ) -> impl Iterator<Item = &'a Snapshot> + 'a {
        self.snapshots
            .iter()
            .filter(move |s| s.matches_identity(vendor_id, product_id, serial))
    }

    /// Latest capture time across the generation
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        self.snapshots.iter().map(Snapshot::captured_at).max()
    }

    /// Copy with every snapshot stamped at `captured_at`
    ///
    /// Two scans of an unchanged host compare equal after restamping.
    pub fn restamped(&self, captured_at: DateTime<Utc>) -> Generation {
        Generation::new(
            self.snapshots
                .iter()
                .map(|s| s.restamped(captured_at))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Generation {
    type Item = &'a Snapshot;
    type IntoIter = std::slice::Iter<'a, Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.snapshots.iter()
    }
}

impl From<Vec<Snapshot>> for Generation {
    fn from(snapshots: Vec<Snapshot>) -> Self {
        Self::new(snapshots)
    }
}
