use crate::error::{MonitorError, MonitorResult};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Durable string key-value store shared by the foreground tracker and the
/// background relay.
///
/// `compare_and_swap` must be atomic with respect to every other call on the
/// same store; the decision engine relies on it to fire at most once when both
/// contexts see the crossing at the same time.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> MonitorResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> MonitorResult<()>;

    fn remove(&self, key: &str) -> MonitorResult<()>;

    /// Write `new` only if the current value equals `expected` (`None` = absent).
    /// Returns whether the write happened.
    fn compare_and_swap(&self, key: &str, expected: Option<&str>, new: &str)
        -> MonitorResult<bool>;
}

/// In-process store; used by tests and by hosts that bring their own durability
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unavailable backing store for reads
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Simulate an unavailable backing store for writes
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MonitorResult<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.values
            .lock()
            .map_err(|_| MonitorError::Internal("Failed to acquire store lock".to_string()))
    }

    fn check_read(&self) -> MonitorResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MonitorError::StorageError("read unavailable".to_string()));
        }
        Ok(())
    }

    fn check_write(&self) -> MonitorResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(MonitorError::StorageError("write unavailable".to_string()));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> MonitorResult<Option<String>> {
        self.check_read()?;
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> MonitorResult<()> {
        self.check_write()?;
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> MonitorResult<()> {
        self.check_write()?;
        self.lock()?.remove(key);
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> MonitorResult<bool> {
        self.check_read()?;
        self.check_write()?;
        let mut values = self.lock()?;
        if values.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        values.insert(key.to_string(), new.to_string());
        Ok(true)
    }
}

/// Store backed by a single JSON object on disk.
///
/// Every operation re-reads the file so a relay running in another process
/// sees current values. Writes go to a sibling temp file and are renamed into
/// place, so a crash mid-write leaves the previous contents intact.
pub struct JsonFileStore {
    path: PathBuf,
    guard: Arc<Mutex<()>>,
}

// One lock per state file, shared by every handle in the process
lazy_static::lazy_static! {
    static ref FILE_LOCKS: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> = Mutex::new(HashMap::new());
}

fn lock_for(path: &Path) -> MonitorResult<Arc<Mutex<()>>> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let key = match (fs::canonicalize(dir), path.file_name()) {
        (Ok(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    };

    let mut locks = FILE_LOCKS
        .lock()
        .map_err(|_| MonitorError::Internal("Failed to acquire file lock table".to_string()))?;
    Ok(locks.entry(key).or_default().clone())
}

impl JsonFileStore {
    pub fn open<P: AsRef<Path>>(path: P) -> MonitorResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let guard = lock_for(&path)?;
        Ok(JsonFileStore { path, guard })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> MonitorResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            MonitorError::StorageError(format!("{}: {}", self.path.display(), e))
        })
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> MonitorResult<()> {
        let json = serde_json::to_string_pretty(map)
            .map_err(|e| MonitorError::Internal(format!("JSON serialization failed: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn lock(&self) -> MonitorResult<std::sync::MutexGuard<'_, ()>> {
        self.guard
            .lock()
            .map_err(|_| MonitorError::Internal("Failed to acquire file store lock".to_string()))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> MonitorResult<Option<String>> {
        let _guard = self.lock()?;
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> MonitorResult<()> {
        let _guard = self.lock()?;
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }

    fn remove(&self, key: &str) -> MonitorResult<()> {
        let _guard = self.lock()?;
        let mut map = self.read_map()?;
        if map.remove(key).is_some() {
            self.write_map(&map)?;
        }
        Ok(())
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> MonitorResult<bool> {
        let _guard = self.lock()?;
        let mut map = self.read_map()?;
        if map.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        map.insert(key.to_string(), new.to_string());
        self.write_map(&map)?;
        Ok(true)
    }
}
