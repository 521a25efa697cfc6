//! COM port resolution
//!
//! Port names are volatile: they move across reconnects, reboots and hub
//! rearrangements. Resolution starts from the durable identity (vendor ID,
//! product ID, optional serial) and reconciles it against a live port
//! listing, using the latest generation to confirm or disambiguate.
//!
//! The resolver never guesses. When several ports remain after every
//! available disambiguator has been applied, the answer is
//! [`Resolution::Ambiguous`] with all of them.

use std::collections::BTreeSet;
use std::fmt;

use tracing::{debug, trace};
use usbu_detect::{PortEntry, UsbLocation};
use usbu_model::{format_usb_id, normalize_serial, Generation, IdentityTag, UsbSnapshot};

/// Identity to resolve to a live port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveQuery {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: Option<String>,
    /// Exact unit to select among otherwise identical devices
    pub identity_tag: Option<IdentityTag>,
    /// Run a fresh scan (and save it) before resolving
    pub refresh: bool,
}

impl ResolveQuery {
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            serial: None,
            identity_tag: None,
            refresh: false,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn with_identity_tag(mut self, tag: IdentityTag) -> Self {
        self.identity_tag = Some(tag);
        self
    }

    pub fn refreshed(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Serial with whitespace and placeholders normalized away
    pub fn wanted_serial(&self) -> Option<String> {
        normalize_serial(self.serial.as_deref())
    }
}

impl fmt::Display for ResolveQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}",
            format_usb_id(self.vendor_id),
            format_usb_id(self.product_id)
        )?;
        if let Some(serial) = self.wanted_serial() {
            write!(f, " serial {}", serial)?;
        }
        if let Some(tag) = &self.identity_tag {
            write!(f, " [{}]", tag)?;
        }
        Ok(())
    }
}

/// Outcome of a resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(PortEntry),
    NotFound,
    Ambiguous(Vec<PortEntry>),
}

impl Resolution {
    pub fn port_name(&self) -> Option<&str> {
        match self {
            Resolution::Found(port) => Some(&port.port_name),
            _ => None,
        }
    }

    /// Names of every port the resolution points at
    pub fn candidate_names(&self) -> Vec<&str> {
        match self {
            Resolution::Found(port) => vec![port.port_name.as_str()],
            Resolution::NotFound => Vec::new(),
            Resolution::Ambiguous(ports) => ports.iter().map(|p| p.port_name.as_str()).collect(),
        }
    }

    fn from_candidates(mut candidates: Vec<PortEntry>) -> Option<Self> {
        match candidates.len() {
            0 => Some(Resolution::NotFound),
            1 => candidates.pop().map(Resolution::Found),
            _ => None,
        }
    }
}

/// True if a snapshot and a port location describe the same bus position
///
/// Port paths decide when both sides have one (bus must not contradict);
/// otherwise bus and address must both be known and equal.
pub fn same_location(usb: &UsbSnapshot, location: &UsbLocation) -> bool {
    if !usb.port_path.is_empty() && !location.port_path.is_empty() {
        let bus_agrees = match (usb.bus, location.bus) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        return bus_agrees && usb.port_path == location.port_path;
    }
    matches!(
        (usb.bus, usb.address, location.bus, location.address),
        (Some(b1), Some(a1), Some(b2), Some(a2)) if b1 == b2 && a1 == a2
    )
}

/// Snapshot in `generation` sitting where `port` is
fn associated_snapshot<'a>(
    port: &PortEntry,
    generation: &'a Generation,
    vendor_id: u16,
    product_id: u16,
) -> Option<&'a UsbSnapshot> {
    let location = port.location.as_ref()?;
    generation
        .usb()
        .filter(|usb| usb.vendor_id == vendor_id && usb.product_id == product_id)
        .find(|usb| same_location(usb, location))
}

fn snapshot_tag(usb: &UsbSnapshot) -> IdentityTag {
    IdentityTag::for_usb(
        usb.vendor_id,
        usb.product_id,
        usb.serial.as_deref(),
        &usb.port_path,
        usb.bus,
        usb.address,
    )
}

/// Live port currently associated with a stored snapshot
///
/// Location wins, then a matching reported serial. A serial-less snapshot
/// without location only gets a port when exactly one port carries its IDs.
pub fn port_for_snapshot<'a>(usb: &UsbSnapshot, ports: &'a [PortEntry]) -> Option<&'a PortEntry> {
    let same_ids: Vec<&PortEntry> = ports
        .iter()
        .filter(|p| p.matches_ids(usb.vendor_id, usb.product_id))
        .collect();

    if let Some(port) = same_ids
        .iter()
        .find(|p| p.location.as_ref().is_some_and(|l| same_location(usb, l)))
    {
        return Some(*port);
    }

    match normalize_serial(usb.serial.as_deref()) {
        Some(serial) => same_ids
            .into_iter()
            .find(|p| normalize_serial(p.serial.as_deref()).as_deref() == Some(serial.as_str())),
        None if same_ids.len() == 1 => same_ids.into_iter().next(),
        None => None,
    }
}

/// Resolve `query` against a live port listing and the latest generation
///
/// Pure: performs no I/O.
pub fn resolve_against(
    query: &ResolveQuery,
    ports: &[PortEntry],
    generation: &Generation,
) -> Resolution {
    let (vid, pid) = (query.vendor_id, query.product_id);
    let wanted = query.wanted_serial();

    let mut candidates: Vec<PortEntry> = ports
        .iter()
        .filter(|p| p.matches_ids(vid, pid))
        .cloned()
        .collect();
    trace!(
        "{} port(s) match {}:{}",
        candidates.len(),
        format_usb_id(vid),
        format_usb_id(pid)
    );

    if let Some(wanted) = &wanted {
        candidates.retain(|port| match normalize_serial(port.serial.as_deref()) {
            Some(reported) => &reported == wanted,
            // The port layer does not surface a serial; confirm through the
            // snapshot at the same location
            None => associated_snapshot(port, generation, vid, pid)
                .is_some_and(|usb| normalize_serial(usb.serial.as_deref()).as_ref() == Some(wanted)),
        });
    }

    if let Some(resolution) = Resolution::from_candidates(candidates.clone()) {
        debug!("Resolved {} -> {:?}", query, resolution.candidate_names());
        return resolution;
    }

    // Identity-tag fallback. Only caller data may narrow: a pinned tag, or
    // the stored units carrying the requested serial.
    let target_tags: BTreeSet<IdentityTag> = match (&query.identity_tag, &wanted) {
        (Some(pinned), _) => BTreeSet::from([pinned.clone()]),
        (None, Some(serial)) => generation
            .matching(vid, pid, Some(serial))
            .map(|s| s.identity_tag())
            .collect(),
        (None, None) => BTreeSet::new(),
    };

    let tags: Vec<Option<IdentityTag>> = candidates
        .iter()
        .map(|port| associated_snapshot(port, generation, vid, pid).map(snapshot_tag))
        .collect();
    // A live port with no stored unit could be the target itself
    let unaccounted = tags.iter().any(Option::is_none);

    let narrowed: Vec<PortEntry> = candidates
        .iter()
        .zip(&tags)
        .filter(|(_, tag)| tag.as_ref().is_some_and(|t| target_tags.contains(t)))
        .map(|(port, _)| port.clone())
        .collect();

    let resolution = match narrowed.len() {
        0 => Resolution::Ambiguous(candidates),
        _ if unaccounted => {
            debug!(
                "{} of {} candidate(s) for {} have no stored unit",
                tags.iter().filter(|t| t.is_none()).count(),
                candidates.len(),
                query
            );
            Resolution::Ambiguous(candidates)
        }
        1 => Resolution::from_candidates(narrowed).unwrap_or(Resolution::NotFound),
        _ => Resolution::Ambiguous(narrowed),
    };
    debug!("Resolved {} -> {:?}", query, resolution.candidate_names());
    resolution
}
