//! Folding raw backend records into a generation

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;
use usbu_detect::{BleRecord, UsbRecord};
use usbu_model::{normalize_serial, BleSnapshot, Generation, Snapshot, UsbIdsDatabase, UsbSnapshot};

/// Builds one [`Generation`] per scan cycle
///
/// Output order is deterministic: USB devices by vendor, product, bus,
/// address and port path, then BLE peripherals by address. Two scans of an
/// unchanged host therefore produce the same sequence.
#[derive(Debug, Clone)]
pub struct Unifier {
    ids: Arc<UsbIdsDatabase>,
}

impl Unifier {
    pub fn new(ids: Arc<UsbIdsDatabase>) -> Self {
        Self { ids }
    }

    pub fn ids(&self) -> &Arc<UsbIdsDatabase> {
        &self.ids
    }

    pub fn unify(
        &self,
        usb: &[UsbRecord],
        ble: &[BleRecord],
        captured_at: DateTime<Utc>,
    ) -> Generation {
        let mut usb_snapshots: Vec<UsbSnapshot> =
            usb.iter().map(|r| self.usb_snapshot(r, captured_at)).collect();
        usb_snapshots.sort_by(|a, b| {
            (a.vendor_id, a.product_id, a.bus, a.address, &a.port_path, &a.serial).cmp(&(
                b.vendor_id,
                b.product_id,
                b.bus,
                b.address,
                &b.port_path,
                &b.serial,
            ))
        });

        let mut ble_snapshots: Vec<BleSnapshot> =
            ble.iter().map(|r| ble_snapshot(r, captured_at)).collect();
        ble_snapshots.sort_by(|a, b| {
            (&a.ble_address, &a.name).cmp(&(&b.ble_address, &b.name))
        });

        debug!(
            "Unified {} USB and {} BLE record(s)",
            usb_snapshots.len(),
            ble_snapshots.len()
        );
        usb_snapshots
            .into_iter()
            .map(Snapshot::Usb)
            .chain(ble_snapshots.into_iter().map(Snapshot::Ble))
            .collect::<Vec<_>>()
            .into()
    }

    fn usb_snapshot(&self, record: &UsbRecord, captured_at: DateTime<Utc>) -> UsbSnapshot {
        let (vendor_name, product_name) = self.ids.lookup(record.vendor_id, record.product_id);
        UsbSnapshot {
            vendor_id: record.vendor_id,
            product_id: record.product_id,
            serial: normalize_serial(record.serial.as_deref()),
            manufacturer: clean(record.manufacturer.as_deref()),
            product: clean(record.product.as_deref()),
            vendor_name,
            product_name,
            bus: record.bus,
            address: record.address,
            port_path: record.port_path.clone(),
            class_guess: record.class_guess.clone(),
            topology: record.topology.clone(),
            captured_at,
        }
    }
}

fn ble_snapshot(record: &BleRecord, captured_at: DateTime<Utc>) -> BleSnapshot {
    let mut service_uuids = record.service_uuids.clone();
    service_uuids.sort();
    service_uuids.dedup();
    BleSnapshot {
        ble_address: record.address.trim().to_string(),
        name: clean(record.name.as_deref()),
        rssi: record.rssi,
        service_uuids,
        captured_at,
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use usbu_model::Transport;

    const IDS: &str = "\
1234  Acme Corp
\t5678  Widget Serial
25a4  Zebra Labs
";

    fn unifier() -> Unifier {
        Unifier::new(Arc::new(UsbIdsDatabase::from_text(IDS)))
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap()
    }

    #[test]
    fn test_usb_fields_and_names() {
        let record = UsbRecord::new(0x1234, 0x5678)
            .with_serial(" ABCDEF123 ")
            .with_strings("ACME ", "")
            .with_location(1, 7, vec![2, 1]);
        let generation = unifier().unify(&[record], &[], ts());

        let usb = generation.snapshots()[0].as_usb().unwrap();
        assert_eq!(usb.serial.as_deref(), Some("ABCDEF123"));
        assert_eq!(usb.manufacturer.as_deref(), Some("ACME"));
        assert_eq!(usb.product, None);
        assert_eq!(usb.vendor_name.as_deref(), Some("Acme Corp"));
        assert_eq!(usb.product_name.as_deref(), Some("Widget Serial"));
        assert_eq!(usb.captured_at, ts());
    }

    #[test]
    fn test_unknown_ids_leave_names_empty() {
        let generation = unifier().unify(&[UsbRecord::new(0x25a4, 0x9311)], &[], ts());
        let usb = generation.snapshots()[0].as_usb().unwrap();
        assert_eq!(usb.vendor_name.as_deref(), Some("Zebra Labs"));
        assert_eq!(usb.product_name, None);
    }

    #[test]
    fn test_order_is_deterministic() {
        let usb = vec![
            UsbRecord::new(0x25a4, 0x9311).with_location(2, 3, vec![1]),
            UsbRecord::new(0x03e7, 0x2485).with_location(1, 9, vec![4]),
            UsbRecord::new(0x03e7, 0x2485).with_location(1, 5, vec![3]),
        ];
        let ble = vec![BleRecord::new("BB:00"), BleRecord::new("AA:00")];

        let first = unifier().unify(&usb, &ble, ts());
        let mut reversed_usb = usb.clone();
        reversed_usb.reverse();
        let second = unifier().unify(&reversed_usb, &ble, ts());
        assert_eq!(first, second);

        let keys: Vec<_> = first.iter().map(|s| s.key()).collect();
        assert_eq!(
            keys,
            vec![
                "0x03e7:0x2485",
                "0x03e7:0x2485",
                "0x25a4:0x9311",
                "BLE:AA:00",
                "BLE:BB:00"
            ]
        );
        assert_eq!(first.snapshots()[0].as_usb().unwrap().address, Some(5));
        assert_eq!(first.snapshots()[3].transport(), Transport::Ble);
    }

    #[test]
    fn test_ble_carries_no_ids() {
        let generation = unifier().unify(&[], &[BleRecord::new("AA").with_name("Tag")], ts());
        let snap = &generation.snapshots()[0];
        assert_eq!(snap.vendor_id(), None);
        assert_eq!(snap.product_id(), None);
        assert_eq!(snap.as_ble().unwrap().name.as_deref(), Some("Tag"));
    }
}
