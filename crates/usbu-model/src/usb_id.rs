//! USB vendor/product identifier text handling
//!
//! The snapshot store writes identifiers as `0x`-prefixed lowercase hex so
//! the file stays readable and hand-editable. Readers are lenient: bare hex
//! and plain JSON integers are accepted too.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserializer, Serializer};

use crate::error::ModelError;

/// Parse a USB identifier from `0x25a4`, `0X25A4` or `25a4`
pub fn parse_usb_id(text: &str) -> Result<u16, ModelError> {
    let trimmed = text.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if digits.is_empty() || digits.len() > 4 {
        return Err(ModelError::InvalidUsbId(text.to_string()));
    }

    u16::from_str_radix(digits, 16).map_err(|_| ModelError::InvalidUsbId(text.to_string()))
}

/// Format a USB identifier the way the store writes it (`0x25a4`)
pub fn format_usb_id(id: u16) -> String {
    format!("0x{:04x}", id)
}

/// Serde adapter for `u16` identifiers stored as hex strings
pub mod hex {
    use super::*;

    pub fn serialize<S: Serializer>(id: &u16, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_usb_id(*id))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        deserializer.deserialize_any(UsbIdVisitor)
    }
}

struct UsbIdVisitor;

impl<'de> Visitor<'de> for UsbIdVisitor {
    type Value = u16;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a USB identifier as hex string or integer")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u16, E> {
        parse_usb_id(v).map_err(E::custom)
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u16, E> {
        u16::try_from(v).map_err(|_| E::custom(format!("USB identifier out of range: {}", v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u16, E> {
        u16::try_from(v).map_err(|_| E::custom(format!("USB identifier out of range: {}", v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "hex")]
        id: u16,
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(parse_usb_id("0x25a4"), Ok(0x25a4));
        assert_eq!(parse_usb_id("0X25A4"), Ok(0x25a4));
        assert_eq!(parse_usb_id("25a4"), Ok(0x25a4));
        assert_eq!(parse_usb_id(" 3e7 "), Ok(0x03e7));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_usb_id("").is_err());
        assert!(parse_usb_id("0x").is_err());
        assert!(parse_usb_id("0x12345").is_err());
        assert!(parse_usb_id("-").is_err());
        assert!(parse_usb_id("zzzz").is_err());
    }

    #[test]
    fn test_serde_writes_prefixed_hex() {
        let json = serde_json::to_string(&Holder { id: 0x03e7 }).unwrap();
        assert_eq!(json, r#"{"id":"0x03e7"}"#);
    }

    #[test]
    fn test_serde_accepts_integer() {
        let holder: Holder = serde_json::from_str(r#"{"id":4660}"#).unwrap();
        assert_eq!(holder.id, 0x1234);

        let err = serde_json::from_str::<Holder>(r#"{"id":70000}"#);
        assert!(err.is_err());
    }

    proptest! {
        #[test]
        fn formatted_ids_parse_back(id: u16) {
            prop_assert_eq!(parse_usb_id(&format_usb_id(id)), Ok(id));
        }
    }
}
