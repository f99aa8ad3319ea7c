//! Durable record storage - one entry per identity

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use zebu_core::{Identity, NameRecord, ZebuError, ZebuResult};

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "tmp";

/// One stored entry as found at load time
#[derive(Debug)]
pub struct StoredEntry {
    /// Storage key the entry was found under (the owner identity string)
    pub key: String,
    /// Decoded record, or why it could not be read
    pub record: ZebuResult<NameRecord>,
}

/// Durable backing for the record directory
///
/// Listing failures are infrastructure failures and return `Err`; a single
/// unreadable entry is reported inside its [`StoredEntry`] instead.
pub trait RecordStorage: Send + Sync {
    /// List and decode every stored entry
    fn load_all(&self) -> ZebuResult<Vec<StoredEntry>>;

    /// Replace the stored entry for `record.owner`
    fn put(&self, record: &NameRecord) -> ZebuResult<()>;
}

/// Storage key for an owner
pub fn storage_key(owner: &Identity) -> String {
    owner.to_string()
}

/// One JSON file per identity under a directory
#[derive(Debug)]
pub struct FileRecordStorage {
    root: PathBuf,
}

impl FileRecordStorage {
    /// Open (creating if needed) a record directory
    pub fn open(root: impl Into<PathBuf>) -> ZebuResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| ZebuError::Storage(format!("create {}: {e}", root.display())))?;
        Ok(FileRecordStorage { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, owner: &Identity) -> PathBuf {
        self.root
            .join(storage_key(owner))
            .with_extension(RECORD_EXTENSION)
    }
}

impl RecordStorage for FileRecordStorage {
    fn load_all(&self) -> ZebuResult<Vec<StoredEntry>> {
        let dir = fs::read_dir(&self.root)
            .map_err(|e| ZebuError::Storage(format!("list {}: {e}", self.root.display())))?;

        let mut entries = Vec::new();
        for entry in dir {
            let entry =
                entry.map_err(|e| ZebuError::Storage(format!("list {}: {e}", self.root.display())))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem() else {
                continue;
            };
            let Some(key) = stem.to_str().map(str::to_string) else {
                tracing::warn!(path = %path.display(), "record file name is not valid UTF-8");
                entries.push(StoredEntry {
                    key: stem.to_string_lossy().into_owned(),
                    record: Err(ZebuError::Storage(format!(
                        "{}: file name is not valid UTF-8",
                        path.display()
                    ))),
                });
                continue;
            };
            let record = fs::read(&path)
                .map_err(|e| ZebuError::Storage(format!("read {}: {e}", path.display())))
                .and_then(|bytes| NameRecord::decode(&bytes));
            entries.push(StoredEntry { key, record });
        }
        Ok(entries)
    }

    fn put(&self, record: &NameRecord) -> ZebuResult<()> {
        let bytes = record.encode()?;
        let path = self.path_for(&record.owner);
        let tmp = path.with_extension(TEMP_EXTENSION);

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        write().map_err(|e| ZebuError::Storage(format!("write {}: {e}", path.display())))
    }
}

/// In-memory storage, for tests and ephemeral replicas
#[derive(Debug, Default)]
pub struct MemoryRecordStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: Mutex<bool>,
}

impl MemoryRecordStorage {
    pub fn new() -> Self {
        MemoryRecordStorage::default()
    }

    /// Store raw bytes under a key, bypassing encoding
    pub fn insert_raw(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.entries.lock().insert(key.into(), bytes);
    }

    /// Stored record for an owner, if any
    pub fn get(&self, owner: &Identity) -> Option<NameRecord> {
        self.entries
            .lock()
            .get(&storage_key(owner))
            .and_then(|bytes| NameRecord::decode(bytes).ok())
    }

    /// Make subsequent writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock() = fail;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl RecordStorage for MemoryRecordStorage {
    fn load_all(&self) -> ZebuResult<Vec<StoredEntry>> {
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|(key, bytes)| StoredEntry {
                key: key.clone(),
                record: NameRecord::decode(bytes),
            })
            .collect())
    }

    fn put(&self, record: &NameRecord) -> ZebuResult<()> {
        if *self.fail_writes.lock() {
            return Err(ZebuError::Storage("writes disabled".into()));
        }
        let bytes = record.encode()?;
        self.entries.lock().insert(storage_key(&record.owner), bytes);
        Ok(())
    }
}
