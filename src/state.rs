//! File-backed state store
//!
//! The state file is a JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "serial": 7,
//!   "last_updated": "2026-01-01T00:00:00Z",
//!   "records": { "aws_vpc.main": { ... } }
//! }
//! ```
//!
//! Every write replaces the file atomically: the document is written to a
//! temporary file in the same directory, synced, then renamed over the
//! original.

use chrono::{DateTime, Utc};
use declarative::{Address, Error, Result, StateRecord, StateSnapshot, StateStore};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// State format version written by this build
pub const STATE_VERSION: u32 = 1;

// ============================================================================
// State Document
// ============================================================================

/// On-disk form of the state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    pub version: u32,
    /// Increases by one on every write
    pub serial: u64,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub records: BTreeMap<Address, StateRecord>,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            last_updated: Utc::now(),
            records: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

impl StateDocument {
    /// Parse a state document, rejecting unknown versions
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let corrupt = |message: String| {
            Error::StateCorruption(format!("{}: {message}", origin.display()))
        };

        let probe: VersionProbe =
            serde_json::from_str(content).map_err(|e| corrupt(format!("not valid JSON: {e}")))?;
        match probe.version {
            Some(STATE_VERSION) => {}
            Some(other) => {
                return Err(corrupt(format!(
                    "unsupported state version {other} (expected {STATE_VERSION})"
                )));
            }
            None => return Err(corrupt("missing state version".into())),
        }

        serde_json::from_str(content).map_err(|e| corrupt(format!("unreadable records: {e}")))
    }
}

// ============================================================================
// FileStateStore
// ============================================================================

/// [`StateStore`] persisted to a single JSON file
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    document: StateDocument,
}

impl FileStateStore {
    /// Open the store at `path`; a missing file is an empty state.
    pub fn open(path: &Path) -> Result<Self> {
        let document = match fs::read_to_string(path) {
            Ok(content) => {
                let document = StateDocument::parse(&content, path)?;
                log::debug!(
                    "Loaded state from {} (serial {}, {} records)",
                    path.display(),
                    document.serial,
                    document.records.len()
                );
                document
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("State file {} does not exist, starting empty", path.display());
                StateDocument::default()
            }
            Err(e) => return Err(Error::Store(e)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            document,
        })
    }

    /// Path of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current serial number
    pub fn serial(&self) -> u64 {
        self.document.serial
    }

    /// When the state was last written
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.document.last_updated
    }

    /// Bump the serial and write the document. On failure the serial and
    /// timestamp are restored; the caller restores the records.
    fn persist(&mut self) -> Result<()> {
        let (serial, last_updated) = (self.document.serial, self.document.last_updated);
        self.document.serial += 1;
        self.document.last_updated = Utc::now();

        let written = self.write();
        if written.is_err() {
            self.document.serial = serial;
            self.document.last_updated = last_updated;
        }
        written
    }

    fn write(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let content = serde_json::to_vec_pretty(&self.document)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&content)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Store(e.error))?;

        log::trace!(
            "Wrote state serial {} to {}",
            self.document.serial,
            self.path.display()
        );
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, address: &Address) -> Result<Option<StateRecord>> {
        Ok(self.document.records.get(address).cloned())
    }

    fn put(&mut self, record: StateRecord) -> Result<()> {
        let previous = self
            .document
            .records
            .insert(record.address.clone(), record.clone());
        if let Err(e) = self.persist() {
            // Keep memory consistent with disk
            match previous {
                Some(old) => self.document.records.insert(record.address, old),
                None => self.document.records.remove(&record.address),
            };
            return Err(e);
        }
        Ok(())
    }

    fn delete(&mut self, address: &Address) -> Result<()> {
        let Some(previous) = self.document.records.remove(address) else {
            return Ok(());
        };
        if let Err(e) = self.persist() {
            self.document.records.insert(address.clone(), previous);
            return Err(e);
        }
        Ok(())
    }

    fn snapshot(&self) -> Result<StateSnapshot> {
        Ok(StateSnapshot {
            records: self.document.records.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{Attr, Value, Values};
    use tempfile::TempDir;

    fn record(address: &str, provider_id: &str) -> StateRecord {
        let address: Address = address.parse().unwrap();
        StateRecord {
            resource_type: address.resource_type.clone(),
            address,
            provider_id: provider_id.to_string(),
            attributes: [("cidr_block".to_string(), Attr::Value(Value::from("10.0.0.0/16")))]
                .into_iter()
                .collect(),
            outputs: Values::new(),
            dependencies: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = TempDir::new().unwrap();
        let store = FileStateStore::open(&dir.path().join("none.state.json")).unwrap();
        assert!(store.snapshot().unwrap().is_empty());
        assert_eq!(store.serial(), 0);
    }

    #[test]
    fn test_writes_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("infra.state.json");

        let mut store = FileStateStore::open(&path).unwrap();
        store.put(record("aws_vpc.main", "vpc-1")).unwrap();
        store.put(record("aws_subnet.public[0]", "subnet-1")).unwrap();
        store.delete(&"aws_vpc.main".parse().unwrap()).unwrap();
        assert_eq!(store.serial(), 3);

        let reopened = FileStateStore::open(&path).unwrap();
        assert_eq!(reopened.serial(), 3);
        let snapshot = reopened.snapshot().unwrap();
        assert_eq!(snapshot.len(), 1);
        let subnet = snapshot.get(&"aws_subnet.public[0]".parse().unwrap()).unwrap();
        assert_eq!(subnet.provider_id, "subnet-1");
        assert_eq!(snapshot, store.snapshot().unwrap());
    }

    #[test]
    fn test_delete_missing_record_does_not_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.state.json");
        let mut store = FileStateStore::open(&path).unwrap();
        store.delete(&"aws_vpc.main".parse().unwrap()).unwrap();
        assert_eq!(store.serial(), 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_write_restores_memory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.state.json");
        let mut store = FileStateStore::open(&path).unwrap();
        store.put(record("aws_vpc.main", "vpc-1")).unwrap();
        let before = (store.serial(), store.last_updated(), store.snapshot().unwrap());

        // A directory in place of the state file makes the rename fail
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), "").unwrap();

        assert!(store.put(record("aws_subnet.app", "subnet-1")).is_err());
        assert_eq!((store.serial(), store.last_updated(), store.snapshot().unwrap()), before);

        assert!(store.delete(&"aws_vpc.main".parse().unwrap()).is_err());
        assert_eq!((store.serial(), store.last_updated(), store.snapshot().unwrap()), before);
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.state.json");
        let mut store = FileStateStore::open(&path).unwrap();
        store.put(record("aws_vpc.main", "vpc-1")).unwrap();
        store.put(record("aws_vpc.main", "vpc-2")).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_unparseable_file_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.state.json");
        fs::write(&path, "{ not json").unwrap();
        let err = FileStateStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::StateCorruption(_)));
    }

    #[test]
    fn test_unknown_version_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.state.json");
        fs::write(
            &path,
            r#"{"version": 99, "serial": 1, "last_updated": "2026-01-01T00:00:00Z", "records": {}}"#,
        )
        .unwrap();
        let err = FileStateStore::open(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported state version 99"));
    }

    #[test]
    fn test_bad_address_key_is_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.state.json");
        fs::write(
            &path,
            r#"{"version": 1, "serial": 1, "last_updated": "2026-01-01T00:00:00Z", "records": {"not an address": {}}}"#,
        )
        .unwrap();
        let err = FileStateStore::open(&path).unwrap_err();
        assert!(matches!(err, Error::StateCorruption(_)));
    }
}
