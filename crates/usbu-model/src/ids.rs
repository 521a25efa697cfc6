//! Vendor/product name lookup backed by a `usb.ids` file
//!
//! The database is process-wide read-only state: it is located once,
//! parsed lazily on first lookup, and can be dropped with [`UsbIdsDatabase::reload`]
//! so the next lookup re-reads the file. A missing or unreadable file is not
//! an error; every lookup simply answers "unknown".

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

/// Environment variable that overrides the database location
pub const USB_IDS_ENV: &str = "USB_IDS_PATH";

const FILE_NAME: &str = "usb.ids";

/// OS-conventional install locations, checked last
const SYSTEM_PATHS: &[&str] = &[
    "/usr/share/hwdata/usb.ids",
    "/usr/share/misc/usb.ids",
    "/var/lib/usbutils/usb.ids",
    "/opt/homebrew/share/hwdata/usb.ids",
    "/opt/local/share/hwdata/usb.ids",
];

#[derive(Debug, Default)]
struct VendorEntry {
    name: String,
    products: HashMap<u16, String>,
}

#[derive(Debug, Default)]
struct IdTable {
    vendors: HashMap<u16, VendorEntry>,
}

impl IdTable {
    /// Parse the vendor/product section of a usb.ids file
    ///
    /// Vendor lines are `vvvv  Name`, product lines are `\tpppp  Name`.
    /// Interface lines (two tabs) and the trailing class/language sections
    /// are skipped.
    fn parse(text: &str) -> Self {
        let mut vendors: HashMap<u16, VendorEntry> = HashMap::new();
        let mut current: Option<u16> = None;

        for line in text.lines() {
            if line.is_empty() || line.starts_with('#') || line.starts_with("\t\t") {
                continue;
            }

            if let Some(rest) = line.strip_prefix('\t') {
                let Some(vendor) = current else { continue };
                if let Some((pid, name)) = split_id_line(rest) {
                    if let Some(entry) = vendors.get_mut(&vendor) {
                        entry.products.insert(pid, name.to_string());
                    }
                }
                continue;
            }

            // Anything else at column 0 is either a vendor or the start of a
            // non-vendor section ("C 00 ...", "HID 01 ..."), which ends the
            // current vendor.
            current = split_id_line(line).map(|(vid, name)| {
                vendors.entry(vid).or_default().name = name.to_string();
                vid
            });
        }

        Self { vendors }
    }

    fn lookup(&self, vendor_id: u16, product_id: u16) -> (Option<String>, Option<String>) {
        match self.vendors.get(&vendor_id) {
            Some(vendor) => (
                Some(vendor.name.clone()).filter(|n| !n.is_empty()),
                vendor.products.get(&product_id).cloned(),
            ),
            None => (None, None),
        }
    }
}

/// Split `1d6b  Linux Foundation` into (0x1d6b, "Linux Foundation")
fn split_id_line(line: &str) -> Option<(u16, &str)> {
    let (id, name) = line.split_once(char::is_whitespace)?;
    if id.len() != 4 || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let id = u16::from_str_radix(id, 16).ok()?;
    Some((id, name.trim()))
}

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Inline(String),
    None,
}

/// Lazily parsed usb.ids database
#[derive(Debug)]
pub struct UsbIdsDatabase {
    source: Source,
    table: RwLock<Option<Arc<IdTable>>>,
}

impl UsbIdsDatabase {
    /// Locate the database using the standard search order
    pub fn discover() -> Self {
        match candidate_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => {
                info!("Using usb.ids database at {}", path.display());
                Self::from_path(path)
            }
            None => {
                info!("No usb.ids database found, vendor names will be unknown");
                Self::unavailable()
            }
        }
    }

    /// Use a specific file
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::File(path.into()),
            table: RwLock::new(None),
        }
    }

    /// Use in-memory database text
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            source: Source::Inline(text.into()),
            table: RwLock::new(None),
        }
    }

    /// A database that knows no names
    pub fn unavailable() -> Self {
        Self {
            source: Source::None,
            table: RwLock::new(None),
        }
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            Source::File(path) => Some(path),
            _ => None,
        }
    }

    /// Resolve (vendor name, product name)
    pub fn lookup(&self, vendor_id: u16, product_id: u16) -> (Option<String>, Option<String>) {
        self.table().lookup(vendor_id, product_id)
    }

    /// Drop the parsed table; the next lookup re-reads the source
    pub fn reload(&self) {
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        *guard = None;
        debug!("usb.ids cache cleared");
    }

    fn table(&self) -> Arc<IdTable> {
        if let Some(table) = self
            .table
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Arc::clone(table);
        }

        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        if let Some(table) = guard.as_ref() {
            return Arc::clone(table);
        }

        let table = Arc::new(self.load());
        *guard = Some(Arc::clone(&table));
        table
    }

    fn load(&self) -> IdTable {
        match &self.source {
            Source::File(path) => match std::fs::read(path) {
                Ok(bytes) => {
                    // usb.ids is mostly ASCII but carries some Latin-1 names
                    let table = IdTable::parse(&String::from_utf8_lossy(&bytes));
                    debug!(
                        "Parsed {} vendors from {}",
                        table.vendors.len(),
                        path.display()
                    );
                    table
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", path.display(), e);
                    IdTable::default()
                }
            },
            Source::Inline(text) => IdTable::parse(text),
            Source::None => IdTable::default(),
        }
    }
}

/// Candidate database locations in lookup order
///
/// Environment override, next to the executable, working directory, then
/// OS-conventional install paths.
pub fn candidate_paths() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(env_path) = std::env::var_os(USB_IDS_ENV).filter(|v| !v.is_empty()) {
        candidates.push(PathBuf::from(env_path));
    }
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(dir.join(FILE_NAME));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(FILE_NAME));
    }
    candidates.extend(SYSTEM_PATHS.iter().map(PathBuf::from));
    if let Some(program_data) = std::env::var_os("ProgramData") {
        candidates.push(PathBuf::from(program_data).join(FILE_NAME));
    }

    candidates
}
