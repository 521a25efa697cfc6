//! Snapshot service
//!
//! The single entry point consumers use. It runs scan cycles, commits each
//! generation to the repository and answers identity and port queries from
//! the latest stored generation plus a live port listing.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use usbu_detect::{
    BleScanner, BleSource, DeviceScanner, PortEntry, PortScanner, PortScannerConfig, ScanWarning,
};
use usbu_model::{Generation, IdentityTag, Snapshot, UsbIdsDatabase};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::exchange::{send_to_port, ExchangeOptions, ExchangeReply};
use crate::repository::SnapshotRepository;
use crate::resolver::{port_for_snapshot, resolve_against, Resolution, ResolveQuery};
use crate::unifier::Unifier;

/// Outcome of one scan cycle
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub generation: Arc<Generation>,
    /// Non-fatal problems: skipped devices, missing or failed backends
    pub warnings: Vec<ScanWarning>,
    /// False when every backend failed and the store was left untouched
    pub persisted: bool,
}

impl ScanReport {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn ble_unavailable(&self) -> bool {
        self.warnings.iter().any(ScanWarning::is_ble_unavailable)
    }
}

/// A stored device and the port it currently sits on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceConnection {
    pub snapshot: Snapshot,
    pub identity_tag: IdentityTag,
    pub port: Option<String>,
}

/// Orchestrates scanning, persistence and resolution
#[derive(Debug)]
pub struct SnapshotService {
    scanner: DeviceScanner,
    ports: PortScanner,
    unifier: Unifier,
    repository: Arc<SnapshotRepository>,
    /// Serializes scan cycles so generations commit in order
    scan_lock: Mutex<()>,
}

impl SnapshotService {
    pub fn new(
        scanner: DeviceScanner,
        ports: PortScanner,
        unifier: Unifier,
        repository: SnapshotRepository,
    ) -> Self {
        Self {
            scanner,
            ports,
            unifier,
            repository: Arc::new(repository),
            scan_lock: Mutex::new(()),
        }
    }

    /// Service over the platform backends described by `config`
    pub fn from_config(config: &ServiceConfig) -> Self {
        let ids = match &config.usb_ids_path {
            Some(path) => UsbIdsDatabase::from_path(path),
            None => UsbIdsDatabase::discover(),
        };
        let ble = config.ble.enabled.then(|| {
            BleScanner::with_source(
                BleSource::Platform {
                    adapter: config.ble.adapter.clone(),
                },
                config.ble.window(),
            )
        });
        let ports = PortScanner::with_config(PortScannerConfig {
            skip_patterns: config.port_skip_patterns.clone(),
        });

        Self::new(
            DeviceScanner::platform(ble),
            ports,
            Unifier::new(Arc::new(ids)),
            SnapshotRepository::new(&config.snapshot_path),
        )
    }

    pub fn repository(&self) -> &SnapshotRepository {
        &self.repository
    }

    pub fn unifier(&self) -> &Unifier {
        &self.unifier
    }

    /// Run one scan cycle and commit its generation
    ///
    /// Backend failures become warnings. If every backend failed, the
    /// previous generation stays authoritative and nothing is written.
    pub async fn scan(&self) -> Result<ScanReport, ServiceError> {
        let _cycle = self.scan_lock.lock().await;

        let raw = self.scanner.scan().await;
        let all_failed = raw.all_backends_failed();
        let captured_at = Utc::now();
        let unifier = self.unifier.clone();
        let (usb, ble, warnings) = (raw.usb, raw.ble, raw.warnings);
        let generation = Arc::new(
            tokio::task::spawn_blocking(move || unifier.unify(&usb, &ble, captured_at)).await?,
        );

        let persisted = if all_failed {
            warn!("Every backend failed; keeping the stored generation");
            false
        } else {
            let repository = Arc::clone(&self.repository);
            let to_save = Arc::clone(&generation);
            tokio::task::spawn_blocking(move || repository.save(&to_save)).await??;
            true
        };

        info!(
            "Scan produced {} snapshot(s) with {} warning(s)",
            generation.len(),
            warnings.len()
        );
        Ok(ScanReport {
            generation,
            warnings,
            persisted,
        })
    }

    /// The most recently stored generation, re-read from the store
    pub async fn latest(&self) -> Result<Arc<Generation>, ServiceError> {
        let repository = Arc::clone(&self.repository);
        let generation = tokio::task::spawn_blocking(move || repository.load()).await??;
        Ok(Arc::new(generation))
    }

    /// First stored snapshot with this identity
    pub async fn find_by_identity(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<Option<Snapshot>, ServiceError> {
        Ok(self
            .find_all_by_identity(vendor_id, product_id, serial)
            .await?
            .into_iter()
            .next())
    }

    /// Every stored snapshot with this identity
    pub async fn find_all_by_identity(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<Vec<Snapshot>, ServiceError> {
        let generation = self.latest().await?;
        Ok(generation
            .matching(vendor_id, product_id, serial)
            .cloned()
            .collect())
    }

    /// Live serial port listing
    pub async fn list_ports(&self) -> Result<Vec<PortEntry>, ServiceError> {
        let ports = self.ports.clone();
        Ok(tokio::task::spawn_blocking(move || ports.enumerate_ports()).await??)
    }

    /// Live USB presence check; nothing is stored
    pub async fn is_connected(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<bool, ServiceError> {
        let usb = self.scanner.usb().cloned().ok_or(ServiceError::NoUsbBackend)?;
        let serial = serial.map(str::to_string);
        Ok(tokio::task::spawn_blocking(move || {
            usb.is_connected(vendor_id, product_id, serial.as_deref())
        })
        .await??)
    }

    /// Every stored unit with this identity and its current port
    pub async fn connections(
        &self,
        vendor_id: u16,
        product_id: u16,
        serial: Option<&str>,
    ) -> Result<Vec<DeviceConnection>, ServiceError> {
        let snapshots = self
            .find_all_by_identity(vendor_id, product_id, serial)
            .await?;
        let ports = self.list_ports().await?;

        Ok(snapshots
            .into_iter()
            .map(|snapshot| {
                let port = snapshot
                    .as_usb()
                    .and_then(|usb| port_for_snapshot(usb, &ports))
                    .map(|p| p.port_name.clone());
                DeviceConnection {
                    identity_tag: snapshot.identity_tag(),
                    snapshot,
                    port,
                }
            })
            .collect())
    }

    /// Resolve an identity to its live port
    ///
    /// With `refresh`, a scan runs first and its save completes before the
    /// store is read.
    pub async fn resolve(&self, query: &ResolveQuery) -> Result<Resolution, ServiceError> {
        if query.refresh {
            self.scan().await?;
        }
        let generation = self.latest().await?;
        let ports = self.list_ports().await?;
        Ok(resolve_against(query, &ports, &generation))
    }

    /// Resolve `query`, then write `payload` to its port and read the answer
    pub async fn send_command(
        &self,
        query: &ResolveQuery,
        payload: &[u8],
        options: &ExchangeOptions,
    ) -> Result<ExchangeReply, ServiceError> {
        let port = match self.resolve(query).await? {
            Resolution::Found(port) => port,
            Resolution::NotFound => return Err(ServiceError::NotFound(query.to_string())),
            ambiguous @ Resolution::Ambiguous(_) => {
                return Err(ServiceError::Ambiguous {
                    target: query.to_string(),
                    candidates: ambiguous
                        .candidate_names()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                })
            }
        };

        info!("Sending {} byte(s) to {} on {}", payload.len(), query, port.port_name);
        send_to_port(&port.port_name, payload, options).await
    }
}
