//! Text rendering for the terminal

use std::io::{self, Write};

use serde::Serialize;
use usbu_detect::PortEntry;
use usbu_model::{format_usb_id, Snapshot};
use usbu_sync::DeviceConnection;

/// Write `value` to stdout as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

/// One line per snapshot: key, best-known name, serial and location
pub fn snapshot_line(snapshot: &Snapshot) -> String {
    let mut parts = vec![snapshot.key()];
    match snapshot {
        Snapshot::Usb(usb) => {
            let name = usb
                .product
                .as_deref()
                .or(usb.product_name.as_deref())
                .unwrap_or("Unknown device");
            match usb.manufacturer.as_deref().or(usb.vendor_name.as_deref()) {
                Some(vendor) => parts.push(format!("{} {}", vendor, name)),
                None => parts.push(name.to_string()),
            }
            if let Some(serial) = snapshot.serial() {
                parts.push(format!("serial {}", serial));
            }
            if let (Some(bus), Some(address)) = (usb.bus, usb.address) {
                parts.push(format!("bus {} addr {}", bus, address));
            }
            if let Some(classes) = &usb.class_guess {
                parts.push(classes.clone());
            }
        }
        Snapshot::Ble(ble) => {
            parts.push(ble.name.clone().unwrap_or_else(|| "(unnamed)".to_string()));
            if let Some(rssi) = ble.rssi {
                parts.push(format!("{} dBm", rssi));
            }
        }
    }
    parts.join("  ")
}

/// Snapshot line followed by its identity tag
pub fn snapshot_block(snapshot: &Snapshot) -> String {
    format!("{}\n    tag: {}", snapshot_line(snapshot), snapshot.identity_tag())
}

pub fn port_line(port: &PortEntry) -> String {
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => {
            let mut line = format!(
                "{}  {}:{}  {}",
                port.port_name,
                format_usb_id(vid),
                format_usb_id(pid),
                port.display_label()
            );
            if let Some(serial) = &port.serial {
                line.push_str(&format!("  serial {}", serial));
            }
            line
        }
        _ => format!("{}  {}", port.port_name, port.display_label()),
    }
}

pub fn connection_block(connection: &DeviceConnection) -> String {
    format!(
        "{}\n    tag: {}\n    port: {}",
        snapshot_line(&connection.snapshot),
        connection.identity_tag,
        connection.port.as_deref().unwrap_or("(none)")
    )
}

/// Render bytes as space-separated hex
pub fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
