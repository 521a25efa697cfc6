//! Device Snapshot Model
//!
//! This crate defines the canonical record produced for every attached
//! device on each scan cycle, and the helpers needed to reason about device
//! identity:
//!
//! - **Snapshot**: one device, one transport (USB or BLE), immutable once built
//! - **Generation**: the ordered set of snapshots from a single scan cycle
//! - **IdentityTag**: a synthesized key used to tell identical units apart
//! - **UsbIdsDatabase**: lazy, reloadable vendor/product name lookup (usb.ids)
//!
//! # Example
//!
//! ```rust
//! use usbu_model::{parse_usb_id, IdentityTag};
//!
//! let vid = parse_usb_id("0x1234").unwrap();
//! let pid = parse_usb_id("5678").unwrap();
//!
//! let tag = IdentityTag::for_usb(vid, pid, None, &[1, 4], Some(3), Some(9));
//! assert_eq!(tag.as_str(), "PORT:1-4 | BUS:3 | ADDR:9 | VIDPID:0x1234:0x5678");
//! ```

pub mod error;
pub mod identity;
pub mod ids;
pub mod snapshot;
pub mod usb_id;

pub use error::ModelError;
pub use identity::{normalize_serial, IdentityTag};
pub use ids::{UsbIdsDatabase, USB_IDS_ENV};
pub use snapshot::{BleSnapshot, Generation, Snapshot, Topology, Transport, UsbSnapshot};
pub use usb_id::{format_usb_id, parse_usb_id};
