//! Device Snapshot Service
//!
//! This crate turns raw detection results into durable, queryable state:
//!
//! - **Unifier**: folds USB and BLE records into one ordered [`Generation`](usbu_model::Generation)
//! - **SnapshotRepository**: atomic JSON store holding the latest generation
//! - **Resolver**: maps a durable identity (VID, PID, serial) to a live COM port
//! - **SnapshotService**: the entry point tying scanning, storage and
//!   resolution together
//!
//! # Example
//!
//! ```rust,no_run
//! use usbu_sync::{ResolveQuery, Resolution, ServiceConfig, SnapshotService};
//!
//! # async fn run() -> Result<(), usbu_sync::ServiceError> {
//! let service = SnapshotService::from_config(&ServiceConfig::load());
//! service.scan().await?;
//!
//! let query = ResolveQuery::new(0x1234, 0x5678).with_serial("ABCDEF123");
//! if let Resolution::Found(port) = service.resolve(&query).await? {
//!     println!("{}", port.port_name);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod exchange;
pub mod repository;
pub mod resolver;
pub mod service;
pub mod unifier;

pub use config::{BleSettings, ServiceConfig};
pub use error::{ServiceError, StoreError};
pub use exchange::{ExchangeOptions, ExchangeReply, ReadMode};
pub use repository::{SnapshotRepository, DEFAULT_STORE_FILE};
pub use resolver::{resolve_against, ResolveQuery, Resolution};
pub use service::{DeviceConnection, ScanReport, SnapshotService};
pub use unifier::Unifier;
