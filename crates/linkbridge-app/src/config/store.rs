//! Dual-replica configuration store
//!
//! The configuration lives in two TOML documents. Each document is a set of
//! groups (tables) holding integer or string keys. `[cfg] write_cnt` records
//! how many writes the document has seen. At open time the replica with the
//! higher counter becomes authoritative (replica 0 wins ties) and is copied
//! over the other. Every write goes to the authoritative replica first and is
//! then copied to the other, each step followed by a sync. A power loss can
//! corrupt at most one replica, and the next open recovers from the other.
//!
//! All operations are serialized by one lock.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use fs2::FileExt;
use toml::{Table, Value};

use linkbridge_core::prelude::*;

/// Group holding store bookkeeping
pub const COUNTER_GROUP: &str = "cfg";
/// Key of the write counter inside [`COUNTER_GROUP`]
pub const COUNTER_KEY: &str = "write_cnt";

/// Longest string value accepted by `set_str`
pub const MAX_STRING_LEN: usize = 4096;

/// A typed configuration scalar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValue {
    Int(i64),
    Str(String),
}

impl ConfigValue {
    fn to_toml(&self) -> Value {
        match self {
            ConfigValue::Int(v) => Value::Integer(*v),
            ConfigValue::Str(s) => Value::String(s.clone()),
        }
    }

    fn same_type(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ConfigValue::Int(_), Value::Integer(_)) | (ConfigValue::Str(_), Value::String(_))
        )
    }
}

struct StoreState {
    replicas: [PathBuf; 2],
    active: usize,
}

impl StoreState {
    fn active_path(&self) -> &Path {
        &self.replicas[self.active]
    }

    fn standby_path(&self) -> &Path {
        &self.replicas[1 - self.active]
    }
}

/// Process-wide configuration store
pub struct ConfigStore {
    state: Mutex<StoreState>,
}

impl ConfigStore {
    /// Open the store, recovering from whichever replica is newest.
    ///
    /// A missing replica is created empty. An unparseable replica is deleted
    /// and rebuilt from the other one. Fails only when neither replica is usable.
    pub fn open(primary: impl Into<PathBuf>, backup: impl Into<PathBuf>) -> Result<Self> {
        let replicas = [primary.into(), backup.into()];
        let counters = [init_replica(&replicas[0]), init_replica(&replicas[1])];

        let active = match counters {
            [None, None] => {
                error!(
                    "Both configuration replicas unusable: {} / {}",
                    replicas[0].display(),
                    replicas[1].display()
                );
                return Err(Error::ConfigUnavailable);
            }
            [Some(_), None] => 0,
            [None, Some(_)] => 1,
            [Some(first), Some(second)] => {
                if second > first {
                    1
                } else {
                    0
                }
            }
        };

        info!(
            "Configuration replica {} is authoritative ({}), write counters {:?}",
            active,
            replicas[active].display(),
            counters
        );

        let state = StoreState { replicas, active };
        let contents = fs::read_to_string(state.active_path())?;
        if let Err(e) = write_atomic(state.standby_path(), &contents) {
            warn!(
                "Standby replica {} not refreshed: {}",
                state.standby_path().display(),
                e
            );
        }

        Ok(Self {
            state: Mutex::new(state),
        })
    }

    /// Run `op` against `store` on the blocking pool.
    ///
    /// Every write syncs both replicas to flash; async callers go through
    /// here so the runtime worker is not held while that happens.
    pub async fn blocking<T, F>(store: &Arc<Self>, op: F) -> Result<T>
    where
        F: FnOnce(&ConfigStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(store);
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| Error::config(format!("Configuration task failed: {e}")))?
    }

    /// Integer at (`group`, `key`), writing `default` back when absent
    pub fn get_int(&self, group: &str, key: &str, default: i64) -> i64 {
        match self.get_or_heal(group, key, ConfigValue::Int(default)) {
            ConfigValue::Int(v) => v,
            ConfigValue::Str(_) => default,
        }
    }

    /// String at (`group`, `key`), writing `default` back when absent
    pub fn get_str(&self, group: &str, key: &str, default: &str) -> String {
        match self.get_or_heal(group, key, ConfigValue::Str(default.to_string())) {
            ConfigValue::Str(s) => s,
            ConfigValue::Int(_) => default.to_string(),
        }
    }

    pub fn set_int(&self, group: &str, key: &str, value: i64) -> Result<()> {
        let mut state = self.lock();
        write_value(&mut state, group, key, &ConfigValue::Int(value))
    }

    pub fn set_str(&self, group: &str, key: &str, value: &str) -> Result<()> {
        if value.len() > MAX_STRING_LEN {
            return Err(Error::config_invalid(format!(
                "{group}.{key}: {} bytes exceeds {MAX_STRING_LEN}",
                value.len()
            )));
        }
        let mut state = self.lock();
        write_value(&mut state, group, key, &ConfigValue::Str(value.to_string()))
    }

    /// Current write counter of the authoritative replica
    pub fn write_count(&self) -> i64 {
        let mut state = self.lock();
        let doc = load_active(&mut state);
        counter_of(&doc).unwrap_or(0)
    }

    /// Index of the authoritative replica
    pub fn active_replica(&self) -> usize {
        self.lock().active
    }

    pub fn replica_paths(&self) -> [PathBuf; 2] {
        self.lock().replicas.clone()
    }

    fn get_or_heal(&self, group: &str, key: &str, default: ConfigValue) -> ConfigValue {
        let mut state = self.lock();
        let doc = load_active(&mut state);

        if let Some(found) = lookup(&doc, group, key) {
            if default.same_type(found) {
                return match found {
                    Value::Integer(v) => ConfigValue::Int(*v),
                    Value::String(s) => ConfigValue::Str(s.clone()),
                    _ => default,
                };
            }
            warn!("{}.{} has the wrong type, resetting to default", group, key);
        } else {
            debug!("{}.{} missing, writing default {:?}", group, key, default);
        }

        if let Err(e) = write_value(&mut state, group, key, &default) {
            error!("Failed to persist default for {}.{}: {}", group, key, e);
        }
        default
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // A panic while holding the lock leaves the files consistent, so the
        // poisoned state is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ─────────────────────────────────────────────────────────────────
// Document helpers
// ─────────────────────────────────────────────────────────────────

fn lookup<'a>(doc: &'a Table, group: &str, key: &str) -> Option<&'a Value> {
    doc.get(group)?.as_table()?.get(key)
}

fn counter_of(doc: &Table) -> Option<i64> {
    lookup(doc, COUNTER_GROUP, COUNTER_KEY)?.as_integer()
}

fn insert(doc: &mut Table, group: &str, key: &str, value: Value) {
    let table = match doc.get_mut(group) {
        Some(Value::Table(table)) => table,
        _ => {
            doc.insert(group.to_string(), Value::Table(Table::new()));
            match doc.get_mut(group) {
                Some(Value::Table(table)) => table,
                _ => unreachable!("group table was just inserted"),
            }
        }
    };
    // Replacing the entry drops any value of a different type.
    table.insert(key.to_string(), value);
}

fn parse(path: &Path) -> Result<Table> {
    let text = fs::read_to_string(path)?;
    text.parse::<Table>().map_err(|e| {
        warn!("{} does not parse: {}", path.display(), e);
        Error::ReplicaCorrupt {
            path: path.to_path_buf(),
        }
    })
}

/// Document of the authoritative replica. Falls back to the standby replica
/// (and makes it authoritative) if the active file became unreadable.
fn load_active(state: &mut StoreState) -> Table {
    match parse(state.active_path()) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Active replica unreadable ({}), trying standby", e);
            match parse(state.standby_path()) {
                Ok(doc) => {
                    state.active = 1 - state.active;
                    doc
                }
                Err(_) => Table::new(),
            }
        }
    }
}

/// Set one value and propagate it to both replicas
fn write_value(state: &mut StoreState, group: &str, key: &str, value: &ConfigValue) -> Result<()> {
    let mut doc = load_active(state);
    insert(&mut doc, group, key, value.to_toml());

    let is_counter = group == COUNTER_GROUP && key == COUNTER_KEY;
    if !is_counter {
        let next = counter_of(&doc)
            .and_then(|c| c.checked_add(1))
            .filter(|&c| c > 0)
            .unwrap_or(1);
        insert(&mut doc, COUNTER_GROUP, COUNTER_KEY, Value::Integer(next));
    }

    let contents = toml::to_string(&doc)
        .map_err(|e| Error::config(format!("Failed to serialize configuration: {e}")))?;

    write_atomic(state.active_path(), &contents)?;
    if !is_counter {
        write_atomic(state.standby_path(), &contents)?;
    }
    trace!("{}.{} = {:?}", group, key, value);
    Ok(())
}

/// Bring one replica to a usable state and report its write counter.
///
/// Returns `None` if the replica is unusable for this open.
fn init_replica(path: &Path) -> Option<i64> {
    if !path.exists() {
        info!("Creating empty configuration replica {}", path.display());
        if let Err(e) = write_atomic(path, "") {
            error!("Cannot create {}: {}", path.display(), e);
            return None;
        }
    }

    let mut doc = match parse(path) {
        Ok(doc) => doc,
        Err(e) => {
            error!("Discarding configuration replica: {}", e);
            let _ = fs::remove_file(path);
            return None;
        }
    };

    match counter_of(&doc) {
        Some(counter) => Some(counter),
        None => {
            insert(&mut doc, COUNTER_GROUP, COUNTER_KEY, Value::Integer(0));
            let contents = toml::to_string(&doc).ok()?;
            match write_atomic(path, &contents) {
                Ok(()) => Some(0),
                Err(e) => {
                    error!("Cannot initialize counter in {}: {}", path.display(), e);
                    None
                }
            }
        }
    }
}

/// Replace `path` with `contents`: write a locked temp file, sync it, rename
/// it into place and sync the directory.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::config(format!("Failed to create config directory: {e}")))?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .map_err(|e| Error::config(format!("Failed to open {}: {e}", temp_path.display())))?;
    file.lock_exclusive()
        .map_err(|e| Error::config(format!("Failed to lock {}: {e}", temp_path.display())))?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {e}")))?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(dir: &tempfile::TempDir) -> (PathBuf, PathBuf) {
        (dir.path().join("jlink.toml"), dir.path().join("jlink.bak.toml"))
    }

    fn counter_in(path: &Path) -> Option<i64> {
        counter_of(&parse(path).ok()?)
    }

    #[test]
    fn test_open_creates_both_replicas() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        let store = ConfigStore::open(&a, &b).unwrap();

        assert!(a.exists() && b.exists());
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.active_replica(), 0);
    }

    #[test]
    fn test_set_then_get_returns_value() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        let store = ConfigStore::open(&a, &b).unwrap();

        store.set_str("wifi", "sta_ssid", "lab-net").unwrap();
        store.set_int("wifi", "mode", 2).unwrap();

        assert_eq!(store.get_str("wifi", "sta_ssid", "jlink"), "lab-net");
        assert_eq!(store.get_int("wifi", "mode", 1), 2);
    }

    #[test]
    fn test_counter_increases_and_replicas_converge() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        let store = ConfigStore::open(&a, &b).unwrap();

        let mut last = store.write_count();
        for i in 0..5 {
            store.set_int("main", "state_last", i).unwrap();
            let now = store.write_count();
            assert!(now > last, "counter must strictly increase");
            last = now;
            assert_eq!(counter_in(&a), counter_in(&b));
        }
        assert_eq!(fs::read_to_string(&a).unwrap(), fs::read_to_string(&b).unwrap());
    }

    #[test]
    fn test_default_miss_writes_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        let store = ConfigStore::open(&a, &b).unwrap();

        let before = store.write_count();
        assert_eq!(store.get_int("key", "long_press_ms", 1000), 1000);
        assert_eq!(store.write_count(), before + 1);

        // Now present: no further write
        assert_eq!(store.get_int("key", "long_press_ms", 1000), 1000);
        assert_eq!(store.write_count(), before + 1);

        // Persisted for a fresh open
        drop(store);
        let store = ConfigStore::open(&a, &b).unwrap();
        assert_eq!(store.get_int("key", "long_press_ms", 5), 1000);
    }

    #[test]
    fn test_type_mismatch_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        let store = ConfigStore::open(&a, &b).unwrap();

        store.set_str("wifi", "mode", "station").unwrap();
        store.set_int("wifi", "mode", 1).unwrap();
        assert_eq!(store.get_int("wifi", "mode", 0), 1);

        // A read with a different type heals to the requested default
        assert_eq!(store.get_str("wifi", "mode", "x"), "x");
        assert_eq!(store.get_str("wifi", "mode", "y"), "x");
    }

    #[test]
    fn test_open_prefers_higher_counter() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        fs::write(&a, "[cfg]\nwrite_cnt = 3\n[wifi]\nsta_ssid = \"old\"\n").unwrap();
        fs::write(&b, "[cfg]\nwrite_cnt = 7\n[wifi]\nsta_ssid = \"new\"\n").unwrap();

        let store = ConfigStore::open(&a, &b).unwrap();
        assert_eq!(store.active_replica(), 1);
        assert_eq!(store.get_str("wifi", "sta_ssid", ""), "new");
        assert_eq!(counter_in(&a), Some(7));
    }

    #[test]
    fn test_unwritable_standby_does_not_fail_open() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        fs::write(&a, "[cfg]\nwrite_cnt = 5\n[wifi]\nsta_ssid = \"lab\"\n").unwrap();
        // A non-empty directory in place of the standby file cannot be
        // replaced by rename
        fs::create_dir_all(b.join("occupied")).unwrap();

        let store = ConfigStore::open(&a, &b).unwrap();
        assert_eq!(store.active_replica(), 0);
        assert_eq!(store.get_str("wifi", "sta_ssid", ""), "lab");
        assert!(b.is_dir());
    }

    #[tokio::test]
    async fn test_blocking_runs_off_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        let store = Arc::new(ConfigStore::open(&a, &b).unwrap());

        let count = ConfigStore::blocking(&store, |store| {
            store.set_str("wifi", "sta_ssid", "lab")?;
            Ok(store.write_count())
        })
        .await
        .unwrap();

        assert_eq!(count, 1);
        assert_eq!(store.get_str("wifi", "sta_ssid", ""), "lab");
    }

    #[test]
    fn test_tie_prefers_replica_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        fs::write(&a, "[cfg]\nwrite_cnt = 4\n[main]\nstate_last = 2\n").unwrap();
        fs::write(&b, "[cfg]\nwrite_cnt = 4\n[main]\nstate_last = 3\n").unwrap();

        let store = ConfigStore::open(&a, &b).unwrap();
        assert_eq!(store.active_replica(), 0);
        assert_eq!(store.get_int("main", "state_last", 0), 2);
    }

    #[test]
    fn test_corrupt_replica_recovers_from_other() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        fs::write(&a, "[cfg\nwrite_cnt = = 9").unwrap();
        fs::write(&b, "[cfg]\nwrite_cnt = 2\n[wifi]\nap_ssid = \"J-Link\"\n").unwrap();

        let store = ConfigStore::open(&a, &b).unwrap();
        assert_eq!(store.active_replica(), 1);
        assert_eq!(store.get_str("wifi", "ap_ssid", ""), "J-Link");
        assert_eq!(counter_in(&a), Some(2));
    }

    #[test]
    fn test_both_replicas_corrupt_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        fs::write(&a, "not = [toml").unwrap();
        fs::write(&b, "===").unwrap();

        let err = ConfigStore::open(&a, &b).err().unwrap();
        assert!(matches!(err, Error::ConfigUnavailable));
        // Both were discarded, so the next open starts fresh
        assert!(ConfigStore::open(&a, &b).is_ok());
    }

    #[test]
    fn test_counter_write_is_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        let store = ConfigStore::open(&a, &b).unwrap();

        store.set_int(COUNTER_GROUP, COUNTER_KEY, 41).unwrap();
        assert_eq!(store.write_count(), 41);
        store.set_int("main", "state_last", 1).unwrap();
        assert_eq!(store.write_count(), 42);
    }

    #[test]
    fn test_counter_wraps_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        fs::write(&a, format!("[cfg]\nwrite_cnt = {}\n", i64::MAX)).unwrap();
        let store = ConfigStore::open(&a, &b).unwrap();

        store.set_int("main", "state_last", 1).unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn test_oversized_string_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        let store = ConfigStore::open(&a, &b).unwrap();

        let huge = "x".repeat(MAX_STRING_LEN + 1);
        assert!(store.set_str("wifi", "sta_ssid", &huge).is_err());
    }

    #[test]
    fn test_concurrent_writers_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b) = paths(&dir);
        let store = Arc::new(ConfigStore::open(&a, &b).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..10 {
                        store
                            .set_int("stress", &format!("t{t}"), i)
                            .expect("write should succeed");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.write_count(), 40);
        for t in 0..4 {
            assert_eq!(store.get_int("stress", &format!("t{t}"), -1), 9);
        }
    }
}
