//! USB class codes and common USB-to-serial adapter chips
//!
//! Interface class names feed the snapshot's `class_guess`; adapter chip
//! names are used as display hints for serial ports that report no product
//! string of their own.

/// USB interface class codes we name explicitly
pub mod class_code {
    pub const CDC: u8 = 0x02;
    pub const HID: u8 = 0x03;
    pub const MASS_STORAGE: u8 = 0x08;
    pub const HUB: u8 = 0x09;
    pub const CDC_DATA: u8 = 0x0A;
    pub const APPLICATION: u8 = 0xFE;
    pub const VENDOR: u8 = 0xFF;
}

/// Short name for an interface class code
pub fn class_name(code: u8) -> String {
    match code {
        class_code::CDC => "CDC-ACM".to_string(),
        class_code::HID => "HID".to_string(),
        class_code::MASS_STORAGE => "MSC".to_string(),
        class_code::HUB => "Hub".to_string(),
        class_code::CDC_DATA => "CDC-Data".to_string(),
        class_code::APPLICATION => "USBTMC".to_string(),
        class_code::VENDOR => "Vendor".to_string(),
        other => format!("0x{:02X}", other),
    }
}

/// Join interface classes into a `class_guess`, keeping first-seen order
pub fn summarize_classes(codes: impl IntoIterator<Item = u8>) -> Option<String> {
    let mut names: Vec<String> = Vec::new();
    for code in codes {
        let name = class_name(code);
        if !names.contains(&name) {
            names.push(name);
        }
    }
    if names.is_empty() {
        None
    } else {
        Some(names.join(","))
    }
}

/// Known USB-to-serial bridge chips: (vendor ID, product IDs, chip family)
const SERIAL_ADAPTERS: &[(u16, &[u16], &str)] = &[
    (0x0403, &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015], "FTDI"),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], "CP210x"),
    (0x1A86, &[0x7523, 0x5523], "CH340"),
    (0x067B, &[0x2303], "PL2303"),
];

/// Chip family for a vendor ID, if it is a known serial bridge vendor
pub fn adapter_name(vid: u16) -> Option<&'static str> {
    SERIAL_ADAPTERS
        .iter()
        .find(|(v, _, _)| *v == vid)
        .map(|(_, _, name)| *name)
}

/// Check if a VID/PID is a known USB-to-serial bridge
pub fn is_known_serial_adapter(vid: u16, pid: u16) -> bool {
    SERIAL_ADAPTERS
        .iter()
        .any(|(v, pids, _)| *v == vid && pids.contains(&pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names() {
        assert_eq!(class_name(0x02), "CDC-ACM");
        assert_eq!(class_name(0xFE), "USBTMC");
        assert_eq!(class_name(0x0E), "0x0E");
    }

    #[test]
    fn test_summarize_dedupes_in_order() {
        assert_eq!(
            summarize_classes([0x02, 0x0A, 0x02, 0x03]),
            Some("CDC-ACM,CDC-Data,HID".to_string())
        );
        assert_eq!(summarize_classes([]), None);
    }

    #[test]
    fn test_adapters() {
        assert_eq!(adapter_name(0x0403), Some("FTDI"));
        assert!(is_known_serial_adapter(0x1A86, 0x7523));
        assert!(!is_known_serial_adapter(0x1A86, 0x0001));
        assert_eq!(adapter_name(0x25A4), None);
    }
}
