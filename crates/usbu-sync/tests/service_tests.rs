//! Integration tests for the snapshot service
//!
//! These run the full scan -> store -> resolve path over simulated
//! backends and a temporary store:
//! - Scans of an unchanged host are stable and survive a restart
//! - Partial backend failure still commits; total failure does not
//! - Identical units resolve only when an identity tag separates them
//! - Serials confirm ports through the stored generation

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use usbu_detect::{
    BleRecord, BleScanner, DeviceScanner, PortEntry, PortScanner, ScanBackend, UsbRecord,
    UsbScanner, UsbSource,
};
use usbu_model::{IdentityTag, UsbIdsDatabase};
use usbu_sync::{
    ExchangeOptions, Resolution, ResolveQuery, ServiceError, SnapshotRepository, SnapshotService,
    Unifier,
};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    pub fn store_path(dir: &tempfile::TempDir) -> std::path::PathBuf {
        dir.path().join("usb_devices.json")
    }

    /// Service over fixed USB devices, an optional BLE scanner and fixed ports
    pub fn service(
        store: &Path,
        usb: Vec<UsbRecord>,
        ble: Option<BleScanner>,
        ports: Vec<PortEntry>,
    ) -> SnapshotService {
        service_with(
            store,
            ScanBackend::Usb(UsbScanner::simulated(usb)),
            ble,
            ports,
        )
    }

    pub fn service_with(
        store: &Path,
        usb: ScanBackend,
        ble: Option<BleScanner>,
        ports: Vec<PortEntry>,
    ) -> SnapshotService {
        let mut scanner = DeviceScanner::new().with_backend(usb);
        if let Some(ble) = ble {
            scanner = scanner.with_backend(ScanBackend::Ble(ble));
        }
        SnapshotService::new(
            scanner,
            PortScanner::simulated(ports),
            Unifier::new(Arc::new(UsbIdsDatabase::unavailable())),
            SnapshotRepository::new(store),
        )
    }

    /// Two units of the same model on different hub ports
    pub fn twin_devices() -> Vec<UsbRecord> {
        vec![
            UsbRecord::new(0x03e7, 0x2485).with_location(1, 3, vec![1]),
            UsbRecord::new(0x03e7, 0x2485).with_location(1, 5, vec![2]),
        ]
    }

    pub fn twin_ports_located() -> Vec<PortEntry> {
        vec![
            PortEntry::usb("COM7", 0x03e7, 0x2485).with_location(1, 3, vec![1]),
            PortEntry::usb("COM8", 0x03e7, 0x2485).with_location(1, 5, vec![2]),
        ]
    }

    pub fn twin_ports_bare() -> Vec<PortEntry> {
        vec![
            PortEntry::usb("COM7", 0x03e7, 0x2485),
            PortEntry::usb("COM8", 0x03e7, 0x2485),
        ]
    }
}

use helpers::*;

// ============================================================================
// Scan and Persistence Tests
// ============================================================================

#[tokio::test]
async fn test_scan_is_stable_for_unchanged_host() {
    let dir = tempfile::tempdir().unwrap();
    let usb = vec![
        UsbRecord::new(0x25a4, 0x9311),
        UsbRecord::new(0x1234, 0x5678).with_serial("ABCDEF123"),
    ];
    let ble = BleScanner::simulated(vec![BleRecord::new("AA:BB:CC:DD:EE:FF").with_name("Tag")]);
    let service = service(&store_path(&dir), usb, Some(ble), vec![]);

    let first = service.scan().await.unwrap();
    let second = service.scan().await.unwrap();

    let at = Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap();
    assert_eq!(first.generation.len(), 3);
    assert_eq!(
        first.generation.restamped(at),
        second.generation.restamped(at)
    );
    assert!(!first.is_degraded());
}

#[tokio::test]
async fn test_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    let usb = vec![UsbRecord::new(0x1234, 0x5678)
        .with_serial("ABCDEF123")
        .with_location(2, 4, vec![3])
        .with_strings("Acme", "Widget")];

    let report = service(&path, usb, None, vec![]).scan().await.unwrap();
    assert!(report.persisted);

    let reloaded = SnapshotRepository::new(&path).load().unwrap();
    assert_eq!(&reloaded, report.generation.as_ref());
}

#[tokio::test]
async fn test_save_of_loaded_generation_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    let ble = BleScanner::simulated(vec![BleRecord::new("11:22:33:44:55:66").with_rssi(-60)]);
    service(&path, twin_devices(), Some(ble), vec![])
        .scan()
        .await
        .unwrap();

    let before = fs::read(&path).unwrap();
    let repository = SnapshotRepository::new(&path);
    let loaded = repository.load().unwrap();
    repository.save(&loaded).unwrap();

    assert_eq!(fs::read(&path).unwrap(), before);
}

#[tokio::test]
async fn test_ble_unavailable_still_commits_usb() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    let service = service(
        &path,
        vec![UsbRecord::new(0x25a4, 0x9311)],
        Some(BleScanner::unavailable("no BLE stack")),
        vec![],
    );

    let report = service.scan().await.unwrap();
    assert!(report.persisted);
    assert!(report.is_degraded());
    assert!(report.ble_unavailable());
    assert_eq!(report.generation.len(), 1);

    let stored = service.latest().await.unwrap();
    assert_eq!(stored.usb().count(), 1);
    assert_eq!(stored.ble().count(), 0);
}

#[tokio::test]
async fn test_total_failure_keeps_previous_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    service(&path, vec![UsbRecord::new(0x25a4, 0x9311)], None, vec![])
        .scan()
        .await
        .unwrap();
    let before = fs::read(&path).unwrap();

    let broken = service_with(
        &path,
        ScanBackend::Usb(UsbScanner::with_source(UsbSource::Unavailable(
            "libusb missing".to_string(),
        ))),
        Some(BleScanner::unavailable("no BLE stack")),
        vec![],
    );
    let report = broken.scan().await.unwrap();

    assert!(!report.persisted);
    assert!(report.generation.is_empty());
    assert_eq!(report.warnings.len(), 2);
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(broken.latest().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_scans_leave_a_readable_store() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(service(&store_path(&dir), twin_devices(), None, vec![]));

    let (a, b, c) = tokio::join!(service.scan(), service.scan(), service.scan());
    assert!(a.is_ok() && b.is_ok() && c.is_ok());

    let stored = service.latest().await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(!dir.path().join(".usb_devices.json.tmp").exists());
}

#[tokio::test]
async fn test_latest_reflects_hand_edits() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    let service = service(&path, vec![UsbRecord::new(0x25a4, 0x9311)], None, vec![]);
    service.scan().await.unwrap();

    fs::write(&path, "[]").unwrap();
    assert!(service.latest().await.unwrap().is_empty());

    fs::write(&path, "{ oops").unwrap();
    assert!(matches!(
        service.latest().await,
        Err(ServiceError::Store(_))
    ));
}

// ============================================================================
// Query Tests
// ============================================================================

#[tokio::test]
async fn test_find_by_identity() {
    let dir = tempfile::tempdir().unwrap();
    let usb = vec![
        UsbRecord::new(0x1234, 0x5678).with_serial("ABCDEF123"),
        UsbRecord::new(0x1234, 0x5678).with_serial("OTHER"),
    ];
    let service = service(&store_path(&dir), usb, None, vec![]);
    service.scan().await.unwrap();

    let all = service
        .find_all_by_identity(0x1234, 0x5678, None)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let one = service
        .find_by_identity(0x1234, 0x5678, Some(" ABCDEF123 "))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(one.serial().as_deref(), Some("ABCDEF123"));

    assert!(service
        .find_by_identity(0xdead, 0xbeef, None)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_is_connected_is_live() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    let service = service(
        &path,
        vec![UsbRecord::new(0x1234, 0x5678).with_serial("ABCDEF123")],
        None,
        vec![],
    );

    assert!(service.is_connected(0x1234, 0x5678, None).await.unwrap());
    assert!(service
        .is_connected(0x1234, 0x5678, Some("ABCDEF123"))
        .await
        .unwrap());
    assert!(!service
        .is_connected(0x1234, 0x5678, Some("NOPE"))
        .await
        .unwrap());
    // Nothing was scanned into the store
    assert!(!path.exists());
}

#[tokio::test]
async fn test_is_connected_without_usb_backend() {
    let dir = tempfile::tempdir().unwrap();
    let service = SnapshotService::new(
        DeviceScanner::new().with_backend(ScanBackend::Ble(BleScanner::simulated(vec![]))),
        PortScanner::simulated(vec![]),
        Unifier::new(Arc::new(UsbIdsDatabase::unavailable())),
        SnapshotRepository::new(store_path(&dir)),
    );
    assert!(matches!(
        service.is_connected(0x1234, 0x5678, None).await,
        Err(ServiceError::NoUsbBackend)
    ));
}

#[tokio::test]
async fn test_connections_pair_units_with_ports() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(
        &store_path(&dir),
        twin_devices(),
        None,
        twin_ports_located(),
    );
    service.scan().await.unwrap();

    let connections = service.connections(0x03e7, 0x2485, None).await.unwrap();
    let ports: Vec<_> = connections.iter().map(|c| c.port.as_deref()).collect();
    assert_eq!(ports, vec![Some("COM7"), Some("COM8")]);
    assert_ne!(connections[0].identity_tag, connections[1].identity_tag);
}

// ============================================================================
// Resolution Tests
// ============================================================================

#[tokio::test]
async fn test_single_device_resolves() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(
        &store_path(&dir),
        vec![UsbRecord::new(0x25a4, 0x9311)],
        None,
        vec![
            PortEntry::usb("COM3", 0x25a4, 0x9311),
            PortEntry::usb("COM4", 0x0403, 0x6001),
        ],
    );
    service.scan().await.unwrap();

    let resolution = service
        .resolve(&ResolveQuery::new(0x25a4, 0x9311))
        .await
        .unwrap();
    assert_eq!(resolution.port_name(), Some("COM3"));
}

#[tokio::test]
async fn test_identical_units_are_ambiguous_without_location() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&store_path(&dir), twin_devices(), None, twin_ports_bare());
    service.scan().await.unwrap();

    let resolution = service
        .resolve(&ResolveQuery::new(0x03e7, 0x2485))
        .await
        .unwrap();
    assert!(matches!(resolution, Resolution::Ambiguous(_)));
    assert_eq!(resolution.candidate_names(), vec!["COM7", "COM8"]);
}

#[tokio::test]
async fn test_identity_tag_selects_one_unit() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(
        &store_path(&dir),
        twin_devices(),
        None,
        twin_ports_located(),
    );
    service.scan().await.unwrap();

    let unpinned = service
        .resolve(&ResolveQuery::new(0x03e7, 0x2485))
        .await
        .unwrap();
    assert_eq!(unpinned.candidate_names(), vec!["COM7", "COM8"]);

    let tag = IdentityTag::from_raw("PORT:2 | BUS:1 | ADDR:5 | VIDPID:0x03e7:0x2485");
    let pinned = service
        .resolve(&ResolveQuery::new(0x03e7, 0x2485).with_identity_tag(tag))
        .await
        .unwrap();
    assert_eq!(pinned.port_name(), Some("COM8"));
}

#[tokio::test]
async fn test_stale_generation_never_picks_a_twin() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    // Last scan saw one unit; a second identical one has been plugged in since
    service(
        &path,
        vec![UsbRecord::new(0x03e7, 0x2485).with_location(1, 3, vec![1])],
        None,
        vec![],
    )
    .scan()
    .await
    .unwrap();

    let service = service(&path, twin_devices(), None, twin_ports_located());
    let resolution = service
        .resolve(&ResolveQuery::new(0x03e7, 0x2485))
        .await
        .unwrap();
    assert!(matches!(resolution, Resolution::Ambiguous(_)));
    assert_eq!(resolution.candidate_names(), vec!["COM7", "COM8"]);
}

#[tokio::test]
async fn test_unlocated_port_keeps_pinned_tag_ambiguous() {
    let dir = tempfile::tempdir().unwrap();
    let ports = vec![
        PortEntry::usb("COM7", 0x03e7, 0x2485).with_location(1, 3, vec![1]),
        PortEntry::usb("COM8", 0x03e7, 0x2485),
    ];
    let service = service(&store_path(&dir), twin_devices(), None, ports);
    service.scan().await.unwrap();

    let tag = IdentityTag::from_raw("PORT:1 | BUS:1 | ADDR:3 | VIDPID:0x03e7:0x2485");
    let resolution = service
        .resolve(&ResolveQuery::new(0x03e7, 0x2485).with_identity_tag(tag))
        .await
        .unwrap();
    assert_eq!(resolution.candidate_names(), vec!["COM7", "COM8"]);
}

#[tokio::test]
async fn test_serial_resolves_to_reporting_port() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(
        &store_path(&dir),
        vec![UsbRecord::new(0x1234, 0x5678).with_serial("ABCDEF123")],
        None,
        vec![
            PortEntry::usb("COM6", 0x1234, 0x5678).with_serial("ZZZ999"),
            PortEntry::usb("COM5", 0x1234, 0x5678).with_serial("ABCDEF123"),
        ],
    );

    let query = ResolveQuery::new(0x1234, 0x5678).with_serial("ABCDEF123");
    let resolution = service.resolve(&query).await.unwrap();
    assert_eq!(resolution.port_name(), Some("COM5"));
}

#[tokio::test]
async fn test_refresh_confirms_serial_through_fresh_scan() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    // The port layer reports no serials; only the scan knows who is where
    let service = service(
        &path,
        vec![
            UsbRecord::new(0x1234, 0x5678)
                .with_serial("ABCDEF123")
                .with_location(2, 4, vec![3]),
            UsbRecord::new(0x1234, 0x5678)
                .with_serial("OTHER")
                .with_location(2, 6, vec![4]),
        ],
        None,
        vec![
            PortEntry::usb("COM5", 0x1234, 0x5678).with_location(2, 4, vec![3]),
            PortEntry::usb("COM6", 0x1234, 0x5678).with_location(2, 6, vec![4]),
        ],
    );
    let query = ResolveQuery::new(0x1234, 0x5678).with_serial("ABCDEF123");

    // Empty store: nothing can confirm the serial yet
    assert_eq!(service.resolve(&query).await.unwrap(), Resolution::NotFound);

    let refreshed = query.refreshed(true);
    let resolution = service.resolve(&refreshed).await.unwrap();
    assert_eq!(resolution.port_name(), Some("COM5"));
    assert!(path.exists());
}

#[tokio::test]
async fn test_send_command_refuses_to_guess() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(&store_path(&dir), twin_devices(), None, twin_ports_bare());
    service.scan().await.unwrap();
    let options = ExchangeOptions::default();

    let err = service
        .send_command(&ResolveQuery::new(0x03e7, 0x2485), b"PING", &options)
        .await
        .unwrap_err();
    match err {
        ServiceError::Ambiguous { candidates, .. } => {
            assert_eq!(candidates, vec!["COM7".to_string(), "COM8".to_string()])
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }

    let err = service
        .send_command(&ResolveQuery::new(0xdead, 0xbeef), b"PING", &options)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

// ============================================================================
// Property Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;
    use usbu_model::Generation;
    use usbu_sync::resolve_against;

    fn port_list() -> impl Strategy<Value = Vec<PortEntry>> {
        prop::collection::vec(
            (prop_oneof![Just(0x03e7u16), Just(0x1234u16)], 0u8..3),
            0..6,
        )
        .prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (vid, serial))| {
                    let port = PortEntry::usb(format!("COM{}", i + 1), vid, 0x2485);
                    match serial {
                        0 => port,
                        n => port.with_serial(format!("SN{}", n)),
                    }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn resolution_only_names_matching_ports(ports in port_list(), with_serial: bool) {
            let mut query = ResolveQuery::new(0x03e7, 0x2485);
            if with_serial {
                query = query.with_serial("SN1");
            }
            let resolution = resolve_against(&query, &ports, &Generation::empty());

            for name in resolution.candidate_names() {
                let port = ports.iter().find(|p| p.port_name == name).unwrap();
                prop_assert!(port.matches_ids(0x03e7, 0x2485));
                if with_serial {
                    prop_assert_eq!(port.serial.as_deref(), Some("SN1"));
                }
            }
        }

        #[test]
        fn resolution_count_follows_candidates(count in 0usize..5) {
            let ports: Vec<PortEntry> = (0..count)
                .map(|i| PortEntry::usb(format!("COM{}", i + 1), 0x03e7, 0x2485))
                .collect();
            let resolution = resolve_against(
                &ResolveQuery::new(0x03e7, 0x2485),
                &ports,
                &Generation::empty(),
            );
            match count {
                0 => prop_assert_eq!(resolution, Resolution::NotFound),
                1 => prop_assert_eq!(resolution.port_name(), Some("COM1")),
                n => prop_assert_eq!(resolution.candidate_names().len(), n),
            }
        }
    }
}
