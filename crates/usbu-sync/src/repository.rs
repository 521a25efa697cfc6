//! Durable snapshot store
//!
//! The store is a single JSON array of snapshot records, rewritten wholesale
//! on every save. Saves go through a temporary file in the same directory
//! that is synced and then renamed over the target, so a reader sees either
//! the previous generation or the new one, never a torn write.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;
use tracing::{debug, info};
use usbu_model::{Generation, Snapshot};

use crate::error::StoreError;

/// Default store file name
pub const DEFAULT_STORE_FILE: &str = "usb_devices.json";

/// JSON file holding the latest generation
#[derive(Debug)]
pub struct SnapshotRepository {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the most recently saved generation
    ///
    /// A missing file is a first run and yields an empty generation. A file
    /// holding one record object instead of an array is accepted.
    pub fn load(&self) -> Result<Generation, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No store at {}, starting empty", self.path.display());
                return Ok(Generation::empty());
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let malformed = |source| StoreError::Malformed {
            path: self.path.clone(),
            source,
        };
        let value: Value = serde_json::from_str(&text).map_err(malformed)?;
        let snapshots: Vec<Snapshot> = match value {
            Value::Array(_) => serde_json::from_value(value).map_err(malformed)?,
            other => vec![serde_json::from_value(other).map_err(malformed)?],
        };

        debug!(
            "Loaded {} snapshot(s) from {}",
            snapshots.len(),
            self.path.display()
        );
        Ok(Generation::new(snapshots))
    }

    /// Replace the stored generation
    ///
    /// On failure the previous file is left untouched.
    pub fn save(&self, generation: &Generation) -> Result<(), StoreError> {
        let mut text = serde_json::to_string_pretty(generation).map_err(StoreError::Encode)?;
        text.push('\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let tmp = self.temp_path();
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };

        let result = write_synced(&tmp, text.as_bytes()).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(source) = result {
            let _ = fs::remove_file(&tmp);
            return Err(write_err(source));
        }

        info!(
            "Saved {} snapshot(s) to {}",
            generation.len(),
            self.path.display()
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_STORE_FILE.to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_RECORD: &str = r#"{
  "transport": "usb",
  "vendor_id": "0x25a4",
  "product_id": "0x9311",
  "serial": null,
  "captured_at": "2026-05-04T09:30:00Z"
}"#;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SnapshotRepository::new(dir.path().join("usb_devices.json"));
        assert!(repo.load().unwrap().is_empty());
    }

    #[test]
    fn test_single_object_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb_devices.json");
        fs::write(&path, ONE_RECORD).unwrap();

        let generation = SnapshotRepository::new(&path).load().unwrap();
        assert_eq!(generation.len(), 1);
        assert_eq!(generation.snapshots()[0].vendor_id(), Some(0x25a4));
    }

    #[test]
    fn test_integer_ids_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb_devices.json");
        fs::write(
            &path,
            r#"[{"transport":"usb","vendor_id":9636,"product_id":"9311","captured_at":"2026-05-04T09:30:00Z"}]"#,
        )
        .unwrap();

        let generation = SnapshotRepository::new(&path).load().unwrap();
        assert_eq!(generation.snapshots()[0].vendor_id(), Some(0x25a4));
        assert_eq!(generation.snapshots()[0].product_id(), Some(0x9311));
    }

    #[test]
    fn test_malformed_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb_devices.json");
        fs::write(&path, "[{\"transport\": \"usb\"").unwrap();
        assert!(matches!(
            SnapshotRepository::new(&path).load(),
            Err(StoreError::Malformed { .. })
        ));

        fs::write(&path, "\"just a string\"").unwrap();
        assert!(matches!(
            SnapshotRepository::new(&path).load(),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unwritable_location_keeps_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SnapshotRepository::new(dir.path().join("missing").join("usb_devices.json"));
        let err = repo.save(&Generation::empty()).unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));
        assert!(!dir.path().join("missing").exists());
    }

    #[test]
    fn test_save_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usb_devices.json");
        fs::write(&path, format!("[{}]", ONE_RECORD)).unwrap();

        let repo = SnapshotRepository::new(&path);
        repo.save(&Generation::empty()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]\n");
        assert!(!dir.path().join(".usb_devices.json.tmp").exists());
    }
}
