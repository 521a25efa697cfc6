//! Bluetooth LE advertisement scanning
//!
//! BLE is an optional backend. The listen is time-bounded: the scanner
//! collects advertisements for its window, and the whole operation is
//! abandoned with [`DetectError::BleTimedOut`] if it runs past the window
//! plus a grace period (a wedged adapter must not stall the scan cycle).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use usbu_model::Transport;

use crate::error::DetectError;

/// Default advertisement listen window
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(5000);

/// Extra time allowed past the window before the listen is cancelled
pub const DEFAULT_GRACE: Duration = Duration::from_millis(2000);

/// Raw record for one advertising peripheral
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BleRecord {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    pub service_uuids: Vec<String>,
}

impl BleRecord {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }
}

/// Where BLE records come from
#[derive(Debug, Clone)]
pub enum BleSource {
    /// The host BLE stack, optionally pinned to one adapter by name
    Platform { adapter: Option<String> },
    /// Fixed records, delivered after `delay`
    Simulated {
        records: Vec<BleRecord>,
        delay: Duration,
    },
    /// BLE disabled or missing on this host
    Unavailable(String),
}

/// BLE backend
#[derive(Debug, Clone)]
pub struct BleScanner {
    source: BleSource,
    window: Duration,
    grace: Duration,
}

impl BleScanner {
    /// Scanner over the host BLE stack
    pub fn new(window: Duration) -> Self {
        Self::with_source(BleSource::Platform { adapter: None }, window)
    }

    pub fn with_source(source: BleSource, window: Duration) -> Self {
        Self {
            source,
            window,
            grace: DEFAULT_GRACE,
        }
    }

    /// Scanner that immediately returns the given records
    pub fn simulated(records: Vec<BleRecord>) -> Self {
        Self::with_source(
            BleSource::Simulated {
                records,
                delay: Duration::ZERO,
            },
            DEFAULT_WINDOW,
        )
    }

    /// Scanner that always reports BLE as unavailable
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::with_source(BleSource::Unavailable(reason.into()), DEFAULT_WINDOW)
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Listen for advertisements, bounded by window + grace
    pub async fn scan(&self) -> Result<Vec<BleRecord>, DetectError> {
        let limit = self.window + self.grace;
        let records = match tokio::time::timeout(limit, self.listen()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("BLE listen overran {:?}, abandoning", limit);
                return Err(DetectError::BleTimedOut {
                    after_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                });
            }
        };

        info!("BLE scan found {} peripheral(s)", records.len());
        Ok(dedupe(records))
    }

    async fn listen(&self) -> Result<Vec<BleRecord>, DetectError> {
        match &self.source {
            BleSource::Platform { adapter } => platform::listen(adapter.as_deref(), self.window).await,
            BleSource::Simulated { records, delay } => {
                debug!("Simulated BLE listen, {} record(s)", records.len());
                tokio::time::sleep(*delay).await;
                Ok(records.clone())
            }
            BleSource::Unavailable(reason) => {
                Err(DetectError::unavailable(Transport::Ble, reason.clone()))
            }
        }
    }
}

/// Keep the first record per address; later advertisements only fill gaps
fn dedupe(records: Vec<BleRecord>) -> Vec<BleRecord> {
    let mut out: Vec<BleRecord> = Vec::with_capacity(records.len());
    for record in records {
        match out.iter_mut().find(|r| !r.address.is_empty() && r.address == record.address) {
            Some(existing) => {
                if existing.name.is_none() {
                    existing.name = record.name;
                }
                if existing.rssi.is_none() {
                    existing.rssi = record.rssi;
                }
                for uuid in record.service_uuids {
                    if !existing.service_uuids.contains(&uuid) {
                        existing.service_uuids.push(uuid);
                    }
                }
            }
            None => out.push(record),
        }
    }
    out
}

#[cfg(feature = "ble")]
mod platform {
    use std::time::Duration;

    use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
    use btleplug::platform::{Adapter, Manager};
    use tracing::{debug, trace};
    use usbu_model::Transport;

    use super::BleRecord;
    use crate::error::DetectError;

    fn failed(error: btleplug::Error) -> DetectError {
        DetectError::unavailable(Transport::Ble, error.to_string())
    }

    async fn pick_adapter(manager: &Manager, wanted: Option<&str>) -> Result<Adapter, DetectError> {
        let adapters = manager.adapters().await.map_err(failed)?;
        let Some(wanted) = wanted else {
            return adapters
                .into_iter()
                .next()
                .ok_or_else(|| DetectError::unavailable(Transport::Ble, "no BLE adapter found"));
        };

        for adapter in adapters {
            let info = adapter.adapter_info().await.map_err(failed)?;
            if info.contains(wanted) {
                return Ok(adapter);
            }
        }
        Err(DetectError::unavailable(
            Transport::Ble,
            format!("BLE adapter '{}' not found", wanted),
        ))
    }

    pub(super) async fn listen(
        adapter: Option<&str>,
        window: Duration,
    ) -> Result<Vec<BleRecord>, DetectError> {
        let manager = Manager::new().await.map_err(failed)?;
        let central = pick_adapter(&manager, adapter).await?;
        debug!("Listening for BLE advertisements for {:?}", window);

        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(failed)?;
        tokio::time::sleep(window).await;

        let peripherals = central.peripherals().await.map_err(failed)?;
        let mut records = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            // Peripherals that vanished mid-scan have no properties left
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            trace!("BLE {} {:?} rssi {:?}", props.address, props.local_name, props.rssi);
            records.push(BleRecord {
                address: props.address.to_string(),
                name: props.local_name,
                rssi: props.rssi,
                service_uuids: props.services.iter().map(|u| u.to_string()).collect(),
            });
        }

        if let Err(e) = central.stop_scan().await {
            debug!("Failed to stop BLE scan: {}", e);
        }
        Ok(records)
    }
}

#[cfg(not(feature = "ble"))]
mod platform {
    use std::time::Duration;

    use usbu_model::Transport;

    use super::BleRecord;
    use crate::error::DetectError;

    pub(super) async fn listen(
        _adapter: Option<&str>,
        _window: Duration,
    ) -> Result<Vec<BleRecord>, DetectError> {
        Err(DetectError::unavailable(
            Transport::Ble,
            "built without BLE support (enable the `ble` feature)",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_scan() {
        let scanner = BleScanner::simulated(vec![
            BleRecord::new("AA:BB:CC:DD:EE:FF").with_name("Sensor").with_rssi(-60),
            BleRecord::new("11:22:33:44:55:66"),
        ]);
        let records = scanner.scan().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name.as_deref(), Some("Sensor"));
    }

    #[tokio::test]
    async fn test_unavailable_scan() {
        let err = BleScanner::unavailable("disabled").scan().await.unwrap_err();
        assert!(matches!(
            err,
            DetectError::BackendUnavailable {
                transport: Transport::Ble,
                ..
            }
        ));
        assert_eq!(err.to_string(), "BLE unavailable: disabled");
    }

    #[tokio::test]
    async fn test_overrun_is_cancelled() {
        let scanner = BleScanner::with_source(
            BleSource::Simulated {
                records: vec![BleRecord::new("AA")],
                delay: Duration::from_secs(5),
            },
            Duration::from_millis(20),
        )
        .with_grace(Duration::from_millis(20));

        let started = std::time::Instant::now();
        let err = scanner.scan().await.unwrap_err();
        assert!(matches!(err, DetectError::BleTimedOut { after_ms: 40 }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_dedupe_merges_repeat_advertisements() {
        let mut second = BleRecord::new("AA").with_name("Tag");
        second.service_uuids.push("180f".to_string());
        let merged = dedupe(vec![BleRecord::new("AA").with_rssi(-70), second, BleRecord::new("BB")]);

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name.as_deref(), Some("Tag"));
        assert_eq!(merged[0].rssi, Some(-70));
        assert_eq!(merged[0].service_uuids, vec!["180f".to_string()]);
    }

    #[cfg(not(feature = "ble"))]
    #[tokio::test]
    async fn test_platform_without_feature_is_unavailable() {
        let scanner = BleScanner::new(Duration::from_millis(10));
        let err = scanner.scan().await.unwrap_err();
        assert!(matches!(err, DetectError::BackendUnavailable { .. }));
    }
}
