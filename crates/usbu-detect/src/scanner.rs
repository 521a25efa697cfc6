//! Combined device scan
//!
//! Runs every configured backend concurrently and folds their results into
//! one [`RawScan`]. A backend that fails contributes a warning instead of
//! records; it never takes the others down with it.

use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use usbu_model::Transport;

use crate::ble::{BleRecord, BleScanner};
use crate::error::DetectError;
use crate::topology::TopologySource;
use crate::usb::{UsbRecord, UsbScan, UsbScanner};
use crate::warning::{ScanWarning, WarningKind};

/// One scanning backend
#[derive(Debug, Clone)]
pub enum ScanBackend {
    Usb(UsbScanner),
    Ble(BleScanner),
}

impl ScanBackend {
    pub fn transport(&self) -> Transport {
        match self {
            ScanBackend::Usb(_) => Transport::Usb,
            ScanBackend::Ble(_) => Transport::Ble,
        }
    }

    async fn run(self) -> BackendOutcome {
        match self {
            ScanBackend::Usb(scanner) => {
                let result = tokio::task::spawn_blocking(move || scanner.scan())
                    .await
                    .map_err(|e| DetectError::TaskFailed(e.to_string()))
                    .and_then(|r| r);
                BackendOutcome::Usb(result)
            }
            ScanBackend::Ble(scanner) => BackendOutcome::Ble(scanner.scan().await),
        }
    }
}

enum BackendOutcome {
    Usb(Result<UsbScan, DetectError>),
    Ble(Result<Vec<BleRecord>, DetectError>),
}

/// Raw per-transport records from one scan cycle
#[derive(Debug, Clone, Default)]
pub struct RawScan {
    pub usb: Vec<UsbRecord>,
    pub ble: Vec<BleRecord>,
    pub warnings: Vec<ScanWarning>,
    /// Backends that produced no records because they failed
    pub failed: Vec<Transport>,
    /// Number of backends that were run
    pub attempted: usize,
}

impl RawScan {
    /// True when backends ran and every one of them failed
    pub fn all_backends_failed(&self) -> bool {
        self.attempted > 0 && self.failed.len() >= self.attempted
    }

    fn backend_failed(&mut self, transport: Transport, error: &DetectError) {
        warn!("{} backend failed: {}", transport.name(), error);
        self.failed.push(transport);
        self.warnings.push(ScanWarning::backend(transport, error));
    }
}

/// Scans all configured backends and annotates USB topology
#[derive(Debug, Clone)]
pub struct DeviceScanner {
    backends: Vec<ScanBackend>,
    topology: TopologySource,
}

impl DeviceScanner {
    /// Scanner with no backends and no topology source
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            topology: TopologySource::Unsupported,
        }
    }

    /// USB over libusb, BLE if given, and the platform topology source
    pub fn platform(ble: Option<BleScanner>) -> Self {
        let scanner = Self::new()
            .with_backend(ScanBackend::Usb(UsbScanner::new()))
            .with_topology(TopologySource::platform());
        match ble {
            Some(ble) => scanner.with_backend(ScanBackend::Ble(ble)),
            None => scanner,
        }
    }

    pub fn with_backend(mut self, backend: ScanBackend) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_topology(mut self, topology: TopologySource) -> Self {
        self.topology = topology;
        self
    }

    pub fn backends(&self) -> &[ScanBackend] {
        &self.backends
    }

    /// The USB backend, if one is configured
    pub fn usb(&self) -> Option<&UsbScanner> {
        self.backends.iter().find_map(|b| match b {
            ScanBackend::Usb(usb) => Some(usb),
            ScanBackend::Ble(_) => None,
        })
    }

    /// Run all backends concurrently and combine their results
    pub async fn scan(&self) -> RawScan {
        let mut tasks = JoinSet::new();
        for (index, backend) in self.backends.iter().cloned().enumerate() {
            let transport = backend.transport();
            tasks.spawn(async move { (index, transport, backend.run().await) });
        }

        let mut outcomes = Vec::with_capacity(self.backends.len());
        let mut raw = RawScan {
            attempted: self.backends.len(),
            ..Default::default()
        };
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    warn!("Scan task failed: {}", e);
                    raw.warnings.push(ScanWarning {
                        transport: None,
                        kind: WarningKind::BackendFailed,
                        device: None,
                        message: DetectError::TaskFailed(e.to_string()).to_string(),
                    });
                }
            }
        }
        // Completion order varies; fold in configuration order
        outcomes.sort_by_key(|(index, _, _)| *index);
        if outcomes.len() < raw.attempted {
            for backend in &self.backends {
                if !outcomes.iter().any(|(_, t, _)| *t == backend.transport()) {
                    raw.failed.push(backend.transport());
                }
            }
        }

        for (_, transport, outcome) in outcomes {
            match outcome {
                BackendOutcome::Usb(Ok(scan)) => {
                    raw.usb.extend(scan.records);
                    raw.warnings.extend(scan.warnings);
                }
                BackendOutcome::Ble(Ok(records)) => raw.ble.extend(records),
                BackendOutcome::Usb(Err(e)) | BackendOutcome::Ble(Err(e)) => {
                    raw.backend_failed(transport, &e)
                }
            }
        }

        self.annotate_topology(&mut raw).await;

        info!(
            "Scan cycle: {} USB, {} BLE, {} warning(s)",
            raw.usb.len(),
            raw.ble.len(),
            raw.warnings.len()
        );
        raw
    }

    async fn annotate_topology(&self, raw: &mut RawScan) {
        if !self.topology.is_supported() || raw.usb.is_empty() {
            return;
        }

        let source = self.topology.clone();
        let mut records = raw.usb.clone();
        let annotated = tokio::task::spawn_blocking(move || {
            source.annotate(&mut records).map(|count| (count, records))
        })
        .await
        .map_err(|e| DetectError::TaskFailed(e.to_string()))
        .and_then(|r| r);

        match annotated {
            Ok((count, records)) => {
                debug!("Device tree annotated {} record(s)", count);
                raw.usb = records;
            }
            Err(e) => {
                warn!("Topology annotation skipped: {}", e);
                raw.warnings.push(ScanWarning::topology(&e));
            }
        }
    }
}

impl Default for DeviceScanner {
    fn default() -> Self {
        Self::new()
    }
}
