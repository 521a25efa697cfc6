//! USB topology annotation from the Windows device tree
//!
//! On Windows, WMI exposes each USB device's `LocationInformation`
//! (`Port_#0003.Hub_#0006`) and the host controller it hangs off. Those are
//! folded into matching [`UsbRecord`]s. Other platforms have no such source
//! and annotation is a no-op.

use tracing::{debug, info};
use usbu_model::{normalize_serial, Topology};

use crate::error::DetectError;
use crate::usb::UsbRecord;

/// One device from the OS device tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyEntry {
    pub vendor_id: u16,
    pub product_id: u16,
    /// The device tree carries no bus/address; `None` matches any record
    pub bus: Option<u8>,
    pub address: Option<u8>,
    /// Serial parsed from the PnP instance ID
    pub serial: Option<String>,
    pub topology: Topology,
}

impl TopologyEntry {
    fn matches_location(&self, record: &UsbRecord) -> bool {
        self.vendor_id == record.vendor_id
            && self.product_id == record.product_id
            && self.bus.map_or(true, |b| record.bus == Some(b))
            && self.address.map_or(true, |a| record.address == Some(a))
    }

    fn matches_serial(&self, record: &UsbRecord) -> bool {
        match (&self.serial, normalize_serial(record.serial.as_deref())) {
            (Some(ours), Some(theirs)) => ours.eq_ignore_ascii_case(&theirs),
            _ => false,
        }
    }
}

/// Where topology comes from, chosen once at startup
#[derive(Debug, Clone, Default)]
pub enum TopologySource {
    /// No device tree on this platform
    #[default]
    Unsupported,
    /// Windows Management Instrumentation
    #[cfg(windows)]
    Wmi,
    /// Fixed entries (or a fixed failure)
    Simulated(Result<Vec<TopologyEntry>, String>),
}

impl TopologySource {
    /// The source for the running platform
    pub fn platform() -> Self {
        #[cfg(windows)]
        {
            Self::Wmi
        }
        #[cfg(not(windows))]
        {
            Self::Unsupported
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }

    /// Read the device tree (blocking)
    pub fn entries(&self) -> Result<Vec<TopologyEntry>, DetectError> {
        match self {
            Self::Unsupported => Ok(Vec::new()),
            #[cfg(windows)]
            Self::Wmi => wmi_tree::entries(),
            Self::Simulated(Ok(entries)) => Ok(entries.clone()),
            Self::Simulated(Err(reason)) => Err(DetectError::Topology(reason.clone())),
        }
    }

    /// Read the device tree and annotate `records` in place
    ///
    /// Returns the number of records annotated.
    pub fn annotate(&self, records: &mut [UsbRecord]) -> Result<usize, DetectError> {
        if !self.is_supported() || records.is_empty() {
            return Ok(0);
        }
        let entries = self.entries()?;
        Ok(apply(records, &entries))
    }
}

/// Attach topology from `entries` to every matching record
///
/// An entry whose PnP serial equals the record's serial wins; otherwise the
/// first entry with the same vendor/product (and bus/address, when known)
/// is used.
pub fn apply(records: &mut [UsbRecord], entries: &[TopologyEntry]) -> usize {
    let mut annotated = 0;
    for record in records.iter_mut() {
        let candidates: Vec<&TopologyEntry> =
            entries.iter().filter(|e| e.matches_location(record)).collect();
        let chosen = candidates
            .iter()
            .find(|e| e.matches_serial(record))
            .or_else(|| candidates.first());

        if let Some(entry) = chosen {
            record.topology = Some(entry.topology.clone());
            annotated += 1;
        }
    }
    info!("Topology annotated {} of {} USB record(s)", annotated, records.len());
    annotated
}

/// Extract `Port_#NNNN` / `Hub_#NNNN` tokens in order of appearance
pub fn parse_location_chain(location: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let bytes = location.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let rest = &location[i..];
        let prefix = ["Port_#", "Hub_#"]
            .into_iter()
            .find(|p| rest.get(..p.len()).is_some_and(|head| head.eq_ignore_ascii_case(p)));
        if let Some(prefix) = prefix {
            let digits = rest[prefix.len()..]
                .bytes()
                .take_while(u8::is_ascii_digit)
                .count();
            if digits > 0 {
                let end = prefix.len() + digits;
                chain.push(rest[..end].to_string());
                i += end;
                continue;
            }
        }
        i += rest.chars().next().map_or(1, char::len_utf8);
    }
    chain
}

/// Vendor/product pair from a PnP device ID (`USB\VID_1234&PID_5678\...`)
pub fn parse_pnp_ids(device_id: &str) -> Option<(u16, u16)> {
    let upper = device_id.to_ascii_uppercase();
    let vid_at = upper.find("VID_")? + 4;
    let pid_at = vid_at + upper[vid_at..].find("PID_")? + 4;
    let vid = u16::from_str_radix(upper.get(vid_at..vid_at + 4)?, 16).ok()?;
    let pid = u16::from_str_radix(upper.get(pid_at..pid_at + 4)?, 16).ok()?;
    Some((vid, pid))
}

/// Serial from the last PnP instance ID segment, uppercased
///
/// Windows synthesizes instance IDs like `5&1A2B3C&0&3` for devices without
/// a serial; anything containing `&` is treated as no serial.
pub fn parse_pnp_serial(device_id: &str) -> Option<String> {
    let last = device_id.rsplit(['\\', '#']).next()?.trim();
    if last.contains('&') {
        return None;
    }
    normalize_serial(Some(last)).map(|s| s.to_ascii_uppercase())
}

/// Build an entry from one PnP device row
pub fn entry_from_pnp(
    device_id: &str,
    location_information: Option<&str>,
    controller_name: Option<String>,
) -> Option<TopologyEntry> {
    if !device_id.to_ascii_uppercase().starts_with("USB\\") {
        return None;
    }
    let (vendor_id, product_id) = parse_pnp_ids(device_id)?;
    let location = location_information.map(str::trim).filter(|l| !l.is_empty());

    debug!("Topology entry {} at {:?}", device_id, location);
    Some(TopologyEntry {
        vendor_id,
        product_id,
        bus: None,
        address: None,
        serial: parse_pnp_serial(device_id),
        topology: Topology {
            hub_chain: location.map(parse_location_chain).unwrap_or_default(),
            controller_name,
            location_information: location.map(str::to_string),
        },
    })
}

#[cfg(windows)]
mod wmi_tree {
    use std::collections::HashMap;

    use serde::Deserialize;
    use wmi::{COMLibrary, WMIConnection};

    use super::{entry_from_pnp, TopologyEntry};
    use crate::error::DetectError;

    #[derive(Deserialize, Debug)]
    #[serde(rename = "Win32_PnPEntity")]
    #[allow(non_snake_case)]
    struct PnpEntity {
        DeviceID: Option<String>,
        LocationInformation: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename = "Win32_USBController")]
    #[allow(non_snake_case)]
    struct UsbController {
        DeviceID: Option<String>,
        Name: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename = "Win32_USBControllerDevice")]
    #[allow(non_snake_case)]
    struct UsbControllerDevice {
        Antecedent: Option<String>,
        Dependent: Option<String>,
    }

    fn failed(error: wmi::WMIError) -> DetectError {
        DetectError::Topology(error.to_string())
    }

    /// `...DeviceID="USB\\VID_1234..."` → `USB\VID_1234...`
    fn reference_device_id(path: &str) -> Option<String> {
        let start = path.find("DeviceID=\"")? + "DeviceID=\"".len();
        let end = start + path[start..].find('"')?;
        Some(path[start..end].replace("\\\\", "\\"))
    }

    pub(super) fn entries() -> Result<Vec<TopologyEntry>, DetectError> {
        let com = COMLibrary::new().map_err(failed)?;
        let conn = WMIConnection::new(com).map_err(failed)?;

        let controller_names: HashMap<String, String> = conn
            .query::<UsbController>()
            .map_err(failed)?
            .into_iter()
            .filter_map(|c| {
                let id = c.DeviceID?;
                let name = c.Name.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| id.clone());
                Some((id.to_ascii_uppercase(), name))
            })
            .collect();

        let mut owner: HashMap<String, String> = HashMap::new();
        for link in conn.query::<UsbControllerDevice>().map_err(failed)? {
            let (Some(ant), Some(dep)) = (link.Antecedent, link.Dependent) else {
                continue;
            };
            if let (Some(ctrl), Some(dev)) = (reference_device_id(&ant), reference_device_id(&dep)) {
                let name = controller_names
                    .get(&ctrl.to_ascii_uppercase())
                    .cloned()
                    .unwrap_or(ctrl);
                owner.entry(dev.to_ascii_uppercase()).or_insert(name);
            }
        }

        Ok(conn
            .query::<PnpEntity>()
            .map_err(failed)?
            .into_iter()
            .filter_map(|dev| {
                let id = dev.DeviceID?;
                let controller = owner.get(&id.to_ascii_uppercase()).cloned();
                entry_from_pnp(&id, dev.LocationInformation.as_deref(), controller)
            })
            .collect())
    }
}
