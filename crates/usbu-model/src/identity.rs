//! Identity tags
//!
//! A vendor/product pair is not enough to tell two units of the same model
//! apart. The identity tag folds the most specific distinguishing fields we
//! have into a single comparable key, in priority order: serial number, then
//! hub port path, then bus/address.
//!
//! Tags are derived, never authoritative: they are recomputed from snapshot
//! fields whenever needed and only ever compared for equality.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::usb_id::format_usb_id;

/// Separator between tag components
const SEPARATOR: &str = " | ";

/// Serial values that devices (or older store files) use to mean "none"
const PLACEHOLDER_SERIALS: &[&str] = &["-", "取得不可"];

/// Normalize a serial number, mapping blank and placeholder values to `None`
pub fn normalize_serial(serial: Option<&str>) -> Option<String> {
    let trimmed = serial?.trim();
    if trimmed.is_empty() || PLACEHOLDER_SERIALS.contains(&trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Synthesized disambiguation key for a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityTag(String);

impl IdentityTag {
    /// Build the tag for a USB device
    ///
    /// Serial wins over port path; bus and address are appended when known,
    /// and the vendor/product pair always closes the tag.
    pub fn for_usb(
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
        port_path: &[u8],
        bus: Option<u8>,
        address: Option<u8>,
    ) -> Self {
        let mut parts = Vec::with_capacity(4);

        if let Some(serial) = normalize_serial(serial) {
            parts.push(format!("SER:{}", serial));
        } else if !port_path.is_empty() {
            parts.push(format!("PORT:{}", format_port_path(port_path)));
        }
        if let Some(bus) = bus {
            parts.push(format!("BUS:{}", bus));
        }
        if let Some(address) = address {
            parts.push(format!("ADDR:{}", address));
        }
        if parts.is_empty() {
            parts.push("UNIDENTIFIED".to_string());
        }
        parts.push(format!(
            "VIDPID:{}:{}",
            format_usb_id(vendor_id),
            format_usb_id(product_id)
        ));

        Self(parts.join(SEPARATOR))
    }

    /// Build the tag for a BLE peripheral
    pub fn for_ble(address: &str, name: Option<&str>) -> Self {
        let mut parts = Vec::with_capacity(2);
        if !address.is_empty() {
            parts.push(format!("ADDR:{}", address));
        }
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            parts.push(format!("NAME:{}", name));
        }
        if parts.is_empty() {
            parts.push("UNIDENTIFIED".to_string());
        }
        Self(parts.join(SEPARATOR))
    }

    /// Wrap a tag string obtained earlier (e.g. from a `find` result)
    pub fn from_raw(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if neither serial, port path nor bus/address contributed
    pub fn is_unidentified(&self) -> bool {
        self.0.starts_with("UNIDENTIFIED")
    }
}

impl fmt::Display for IdentityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render a hub port path as `1-4-2`
pub fn format_port_path(path: &[u8]) -> String {
    path.iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_serial_takes_priority_over_port_path() {
        let tag = IdentityTag::for_usb(0x1234, 0x5678, Some("ABCDEF123"), &[1, 2], Some(1), Some(7));
        assert_eq!(
            tag.as_str(),
            "SER:ABCDEF123 | BUS:1 | ADDR:7 | VIDPID:0x1234:0x5678"
        );
    }

    #[test]
    fn test_port_path_used_without_serial() {
        let tag = IdentityTag::for_usb(0x03e7, 0x2485, None, &[2, 1, 4], Some(3), None);
        assert_eq!(tag.as_str(), "PORT:2-1-4 | BUS:3 | VIDPID:0x03e7:0x2485");
    }

    #[test]
    fn test_unidentified_when_nothing_distinguishes() {
        let tag = IdentityTag::for_usb(0x03e7, 0x2485, Some("  "), &[], None, None);
        assert!(tag.is_unidentified());
        assert_eq!(tag.as_str(), "UNIDENTIFIED | VIDPID:0x03e7:0x2485");
    }

    #[test]
    fn test_placeholder_serials_are_ignored() {
        assert_eq!(normalize_serial(Some("-")), None);
        assert_eq!(normalize_serial(Some("取得不可")), None);
        assert_eq!(normalize_serial(Some(" A1 ")), Some("A1".to_string()));
        assert_eq!(normalize_serial(None), None);
    }

    #[test]
    fn test_ble_tag() {
        let tag = IdentityTag::for_ble("C4:7C:8D:6A:12:34", Some("Flower care"));
        assert_eq!(tag.as_str(), "ADDR:C4:7C:8D:6A:12:34 | NAME:Flower care");
        assert!(IdentityTag::for_ble("", None).is_unidentified());
    }

    proptest! {
        #[test]
        fn usb_tag_always_ends_with_vidpid(
            vid: u16,
            pid: u16,
            path in prop::collection::vec(1u8..16, 0..5),
            bus in prop::option::of(any::<u8>()),
        ) {
            let tag = IdentityTag::for_usb(vid, pid, None, &path, bus, None);
            let expected = format!("VIDPID:{}:{}", format_usb_id(vid), format_usb_id(pid));
            prop_assert!(tag.as_str().ends_with(&expected));
        }

        #[test]
        fn different_port_paths_give_different_tags(
            a in prop::collection::vec(1u8..16, 1..5),
            b in prop::collection::vec(1u8..16, 1..5),
        ) {
            prop_assume!(a != b);
            let ta = IdentityTag::for_usb(1, 2, None, &a, Some(1), None);
            let tb = IdentityTag::for_usb(1, 2, None, &b, Some(1), None);
            prop_assert_ne!(ta, tb);
        }
    }
}
