//! Partition registry - lifecycle of every partition in one environment

use super::catalog::{self, PartitionMeta, RawDatabase};
use super::partition::PartitionHandle;
use super::txn::WriteTxn;
use super::{PartitionOptions, RegistryConfig};
use crate::reclaim::ReaderLockReclaimer;
use crate::types::EnvironmentStats;
use crate::{Result, TideError};
use heed::types::Bytes;
use heed::{Env, EnvFlags, EnvOpenOptions};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Reserved name of the internal metadata partition
pub const SYSTEM_PARTITION: &str = "__system";

/// Partition registry
///
/// Owns the environment, the map of open partition handles and the
/// reserved system partition. Partition names move through
/// `create -> open -> close -> open ...` and leave only through `drop`.
pub struct PartitionRegistry {
    config: RegistryConfig,
    env: RwLock<Option<Env>>,
    system: PartitionHandle,
    partitions: RwLock<HashMap<String, PartitionHandle>>,
    reclaimer: Mutex<Option<ReaderLockReclaimer>>,
    closed: AtomicBool,
}

impl PartitionRegistry {
    /// Open (or initialize) the environment at `config.path`
    pub fn open(config: RegistryConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.path)?;

        let mut options = EnvOpenOptions::new();
        options
            .map_size(config.map_size)
            .max_dbs(config.max_dbs)
            .max_readers(config.max_readers);
        if config.no_sync {
            // Commits stay atomic, only durability is relaxed
            unsafe {
                options.flags(EnvFlags::NO_SYNC);
            }
        }
        let env = unsafe { options.open(&config.path)? };

        let mut wtxn = env.write_txn()?;
        let system_db: RawDatabase = env.create_database(&mut wtxn, Some(SYSTEM_PARTITION))?;
        wtxn.commit()?;

        let system = PartitionHandle::new(
            SYSTEM_PARTITION,
            system_db,
            env.clone(),
            PartitionOptions::default(),
        );
        let reclaimer = ReaderLockReclaimer::new(env.clone(), config.reclaim.clone());

        info!("Opened partition registry at {:?}", config.path);

        Ok(Self {
            config,
            env: RwLock::new(Some(env)),
            system,
            partitions: RwLock::new(HashMap::new()),
            reclaimer: Mutex::new(Some(reclaimer)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Reserved metadata partition
    pub fn system(&self) -> &PartitionHandle {
        &self.system
    }

    fn env(&self, op: &'static str) -> Result<Env> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TideError::EnvironmentClosed { op });
        }
        self.env
            .read()
            .clone()
            .ok_or(TideError::EnvironmentClosed { op })
    }

    fn catalog(&self) -> RawDatabase {
        self.system.database()
    }

    /// Create a new partition
    ///
    /// Fails with `AlreadyExists` if the name is on disk, open, or reserved.
    pub fn create_partition(&self, name: &str, options: PartitionOptions) -> Result<PartitionHandle> {
        const OP: &str = "create_partition";
        let env = self.env(OP)?;
        validate_name(OP, name)?;
        if name == SYSTEM_PARTITION {
            return Err(TideError::already_exists(OP, name));
        }

        if self.partitions.read().contains_key(name) {
            return Err(TideError::already_exists(OP, name));
        }

        let mut wtxn = env.write_txn()?;
        if catalog::get(&wtxn, self.catalog(), name)?.is_some() {
            return Err(TideError::already_exists(OP, name));
        }

        // Writer first, then the map. Sub-database handles are only opened
        // while the map lock is held.
        let mut partitions = self.partitions.write();
        let slot = catalog::allocate_slot(&mut wtxn, self.catalog())?;
        let db: RawDatabase = env.create_database(&mut wtxn, Some(slot.as_str()))?;
        catalog::put(
            &mut wtxn,
            self.catalog(),
            &PartitionMeta::new(name, &slot, options.codec()),
        )?;
        wtxn.commit()?;

        let handle = partitions
            .entry(name.to_string())
            .or_insert_with(|| PartitionHandle::new(name, db, env, options))
            .clone();
        drop(partitions);

        debug!("Partition {} stored in {}", name, slot);
        info!("Created partition: {}", name);

        Ok(handle)
    }

    /// Open an existing partition
    ///
    /// A partition that is already open is returned as cached; `options`
    /// are then ignored. Encoding and compression always come from the
    /// partition's catalog record.
    pub fn open_partition(&self, name: &str, options: PartitionOptions) -> Result<PartitionHandle> {
        const OP: &str = "open_partition";
        let env = self.env(OP)?;
        validate_name(OP, name)?;
        if name == SYSTEM_PARTITION {
            return Err(TideError::not_found(OP, name));
        }

        if let Some(handle) = self.cached(name, &options) {
            return Ok(handle);
        }

        let mut partitions = self.partitions.write();
        // Another caller may have opened it between the two locks
        if let Some(handle) = partitions.get(name) {
            return Ok(handle.clone());
        }

        let rtxn = env.read_txn()?;
        let meta = catalog::get(&rtxn, self.catalog(), name)?
            .ok_or_else(|| TideError::not_found(OP, name))?;
        let db: RawDatabase = env
            .open_database(&rtxn, Some(meta.slot.as_str()))?
            .ok_or_else(|| TideError::not_found(OP, name))?;
        // Makes the database handle usable outside this transaction
        rtxn.commit()?;

        let mut options = options;
        if options.codec() != meta.codec() {
            debug!(
                "Partition {} keeps its persisted codec {:?}, ignoring {:?}",
                name,
                meta.codec(),
                options.codec()
            );
            options.encoding = meta.encoding;
            options.compression = meta.compression;
        }

        let handle = PartitionHandle::new(name, db, env, options);
        partitions.insert(name.to_string(), handle.clone());

        info!("Opened partition: {}", name);

        Ok(handle)
    }

    fn cached(&self, name: &str, options: &PartitionOptions) -> Option<PartitionHandle> {
        let partitions = self.partitions.read();
        let handle = partitions.get(name)?;
        if handle.options() != options {
            debug!(
                "Partition {} already open, ignoring reopen options {:?}",
                name, options
            );
        }
        Some(handle.clone())
    }

    /// Open a partition, creating it if it does not exist
    pub fn open_or_create_partition(
        &self,
        name: &str,
        options: PartitionOptions,
    ) -> Result<PartitionHandle> {
        match self.open_partition(name, options.clone()) {
            Err(e) if e.is_not_found() => match self.create_partition(name, options.clone()) {
                // Lost a race with a concurrent create
                Err(TideError::AlreadyExists { .. }) => self.open_partition(name, options),
                created => created,
            },
            opened => opened,
        }
    }

    /// Close an open partition; its data stays on disk
    pub fn close_partition(&self, name: &str) -> Result<()> {
        const OP: &str = "close_partition";
        self.env(OP)?;

        let handle = self
            .partitions
            .write()
            .remove(name)
            .ok_or_else(|| TideError::not_found(OP, name))?;

        // The entry is already gone, so a failed close only leaves a log line
        if let Err(e) = handle.close() {
            warn!("Failed to close partition {}: {}", name, e);
        }

        info!("Closed partition: {}", name);

        Ok(())
    }

    /// Drop a partition and all of its data
    ///
    /// The partition must exist on disk; it does not have to be open.
    pub fn drop_partition(&self, name: &str, confirm: bool) -> Result<()> {
        const OP: &str = "drop_partition";
        let env = self.env(OP)?;
        if !confirm {
            return Err(TideError::ConfirmationRequired {
                op: OP,
                name: name.to_string(),
            });
        }
        validate_name(OP, name)?;
        if name == SYSTEM_PARTITION {
            return Err(TideError::not_found(OP, name));
        }

        let mut wtxn = env.write_txn()?;
        let meta = catalog::get(&wtxn, self.catalog(), name)?
            .ok_or_else(|| TideError::not_found(OP, name))?;

        let mut partitions = self.partitions.write();
        match env.open_database::<Bytes, Bytes>(&wtxn, Some(meta.slot.as_str()))? {
            Some(db) => db.clear(&mut wtxn)?,
            None => warn!("Partition {} has a catalog record but no data", name),
        }
        catalog::delete(&mut wtxn, self.catalog(), name)?;
        catalog::release_slot(&mut wtxn, self.catalog(), &meta.slot)?;
        wtxn.commit()?;

        let removed = partitions.remove(name);
        drop(partitions);
        if let Some(handle) = removed {
            if let Err(e) = handle.close() {
                warn!("Failed to close dropped partition {}: {}", name, e);
            }
        }

        info!("Dropped partition: {}", name);

        Ok(())
    }

    /// Names of every partition on disk, system partition excluded
    pub fn list_partitions(&self) -> Result<HashSet<String>> {
        let env = self.env("list_partitions")?;
        let rtxn = env.read_txn()?;
        let names = catalog::names(&rtxn, self.catalog())?;
        Ok(names.into_iter().collect())
    }

    /// Check if a partition exists on disk
    pub fn has_partition(&self, name: &str) -> Result<bool> {
        let env = self.env("has_partition")?;
        if name == SYSTEM_PARTITION {
            return Ok(false);
        }
        let rtxn = env.read_txn()?;
        Ok(catalog::get(&rtxn, self.catalog(), name)?.is_some())
    }

    /// Names of the partitions currently open in this process
    pub fn open_partitions(&self) -> Vec<String> {
        self.partitions.read().keys().cloned().collect()
    }

    /// Get environment statistics
    pub fn stats(&self) -> Result<EnvironmentStats> {
        let env = self.env("stats")?;
        let info = env.info();
        let disk_size_bytes = env.real_disk_size()?;
        let total_partitions = self.list_partitions()?.len();
        let reclaimed_reader_slots = self
            .reclaimer
            .lock()
            .as_ref()
            .map_or(0, |reclaimer| reclaimer.reclaimed());

        Ok(EnvironmentStats {
            path: env.path().to_path_buf(),
            map_size: info.map_size,
            last_page_number: info.last_page_number,
            last_txn_id: info.last_txn_id,
            readers: info.number_of_readers,
            max_readers: info.maximum_number_of_readers,
            disk_size_bytes,
            open_partitions: self.partitions.read().len(),
            total_partitions,
            reclaimed_reader_slots,
        })
    }

    /// Run `f` inside one write transaction spanning every partition
    ///
    /// Commits when `f` returns `Ok`, aborts otherwise. `f` may open
    /// partitions; creating or dropping one from inside `f` waits on the
    /// writer `f` already holds.
    pub fn transaction_sync<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<R>,
    {
        let env = self.env("transaction")?;
        run_write(&env, f)
    }

    /// Run `f` inside one environment-wide write transaction on a blocking
    /// worker thread
    pub async fn transaction<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let env = self.env("transaction")?;
        tokio::task::spawn_blocking(move || run_write(&env, f)).await?
    }

    /// Check if the registry has been shut down
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop reclamation, close every partition, then close the environment
    ///
    /// Individual close failures are logged and do not stop the sequence.
    /// Calling it again is a no-op.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Partition registry already shut down");
            return;
        }

        if let Some(reclaimer) = self.reclaimer.lock().take() {
            reclaimer.shutdown();
        }

        let handles: Vec<_> = self.partitions.write().drain().collect();
        let mut failed = 0;
        for (name, handle) in &handles {
            if let Err(e) = handle.close() {
                warn!("Failed to close partition {} during shutdown: {}", name, e);
                failed += 1;
            }
        }
        if let Err(e) = self.system.close() {
            warn!("Failed to close system partition: {}", e);
        }

        if let Some(env) = self.env.write().take() {
            let closing = env.prepare_for_closing();
            let timeout = Duration::from_millis(self.config.close_timeout_ms);
            if !closing.wait_timeout(timeout) {
                warn!(
                    "Environment at {:?} still referenced after {:?}, closing when released",
                    self.config.path, timeout
                );
            }
        }

        info!(
            "Partition registry shut down ({} partitions closed, {} failed)",
            handles.len() - failed,
            failed
        );
    }
}

impl Drop for PartitionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_write<R, F>(env: &Env, f: F) -> Result<R>
where
    F: FnOnce(&mut WriteTxn<'_>) -> Result<R>,
{
    let mut txn = WriteTxn::begin(env)?;
    let out = f(&mut txn)?;
    txn.commit()?;
    Ok(out)
}

fn validate_name(op: &'static str, name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.len() > crate::config::MAX_PARTITION_NAME_LEN {
        "name is too long"
    } else if name.contains('\0') {
        "name contains a NUL byte"
    } else {
        return Ok(());
    };

    Err(TideError::InvalidName {
        op,
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Compression, ValueEncoding};
    use serde::{Deserialize, Serialize};
    use std::sync::{mpsc, Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_target(false)
            .with_test_writer()
            .try_init();
    }

    fn test_config(temp_dir: &TempDir) -> RegistryConfig {
        init_tracing();
        let mut config = RegistryConfig::new(temp_dir.path());
        config.map_size = 32 * 1024 * 1024;
        config.reclaim.periodic_interval_ms = 0;
        config
    }

    #[test]
    fn test_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();

        let users = registry
            .create_partition("users", PartitionOptions::default())
            .unwrap();
        let ada = User { name: "Ada".into() };
        users.put_sync("u:1", &ada).unwrap();
        assert_eq!(users.get::<User>("u:1").unwrap(), Some(ada));

        assert!(registry.has_partition("users").unwrap());
        let names: Vec<_> = registry.list_partitions().unwrap().into_iter().collect();
        assert_eq!(names, vec!["users".to_string()]);

        registry.drop_partition("users", true).unwrap();
        assert!(registry.list_partitions().unwrap().is_empty());
        assert!(!users.is_open());
    }

    #[test]
    fn test_create_twice_and_reserved_name() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();

        registry
            .create_partition("events", PartitionOptions::default())
            .unwrap();
        assert!(matches!(
            registry.create_partition("events", PartitionOptions::default()),
            Err(TideError::AlreadyExists { .. })
        ));

        // Closed but still on disk
        registry.close_partition("events").unwrap();
        assert!(matches!(
            registry.create_partition("events", PartitionOptions::default()),
            Err(TideError::AlreadyExists { .. })
        ));

        assert!(matches!(
            registry.create_partition(SYSTEM_PARTITION, PartitionOptions::default()),
            Err(TideError::AlreadyExists { .. })
        ));
        assert!(matches!(
            registry.open_partition(SYSTEM_PARTITION, PartitionOptions::default()),
            Err(TideError::NotFound { .. })
        ));
        assert!(!registry.list_partitions().unwrap().contains(SYSTEM_PARTITION));
        assert!(!registry.has_partition(SYSTEM_PARTITION).unwrap());
    }

    #[test]
    fn test_invalid_names() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();

        for name in ["".to_string(), "a\0b".to_string(), "x".repeat(300)] {
            assert!(matches!(
                registry.create_partition(&name, PartitionOptions::default()),
                Err(TideError::InvalidName { .. })
            ));
        }
    }

    #[test]
    fn test_open_paths() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();

        let err = registry
            .open_partition("ghost", PartitionOptions::default())
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("ghost"));
        assert!(err.to_string().contains("open_partition"));

        let created = registry
            .create_partition("metrics", PartitionOptions::default())
            .unwrap();
        let opened = registry
            .open_partition("metrics", PartitionOptions::default().read_only())
            .unwrap();
        // Cached handle, reopen options ignored
        assert!(!opened.is_read_only());
        opened.put_sync("cpu", &0.5).unwrap();
        assert_eq!(created.get::<f64>("cpu").unwrap(), Some(0.5));
    }

    #[test]
    fn test_open_or_create() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();

        let first = registry
            .open_or_create_partition("sessions", PartitionOptions::default())
            .unwrap();
        first.put_sync("s", &1).unwrap();
        let second = registry
            .open_or_create_partition("sessions", PartitionOptions::default())
            .unwrap();
        assert_eq!(second.get::<i32>("s").unwrap(), Some(1));
        assert_eq!(registry.list_partitions().unwrap().len(), 1);
    }

    #[test]
    fn test_close_twice() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();

        assert!(matches!(
            registry.close_partition("never"),
            Err(TideError::NotFound { .. })
        ));

        registry
            .create_partition("logs", PartitionOptions::default())
            .unwrap();
        registry.close_partition("logs").unwrap();
        assert!(matches!(
            registry.close_partition("logs"),
            Err(TideError::NotFound { .. })
        ));
        assert!(registry.has_partition("logs").unwrap());
    }

    #[test]
    fn test_drop_requires_confirmation() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();

        let cache = registry
            .create_partition("cache", PartitionOptions::default())
            .unwrap();
        cache.put_sync("k", &"v").unwrap();

        assert!(matches!(
            registry.drop_partition("cache", false),
            Err(TideError::ConfirmationRequired { .. })
        ));
        assert!(registry.has_partition("cache").unwrap());
        assert_eq!(cache.get::<String>("k").unwrap(), Some("v".to_string()));

        assert!(matches!(
            registry.drop_partition("missing", true),
            Err(TideError::NotFound { .. })
        ));

        registry.drop_partition("cache", true).unwrap();
        assert!(matches!(
            registry.open_partition("cache", PartitionOptions::default()),
            Err(TideError::NotFound { .. })
        ));
    }

    #[test]
    fn test_drop_closed_partition_and_recreate() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();

        let p = registry
            .create_partition("archive", PartitionOptions::default())
            .unwrap();
        p.put_sync("old", &1).unwrap();
        registry.close_partition("archive").unwrap();

        registry.drop_partition("archive", true).unwrap();
        assert!(!registry.has_partition("archive").unwrap());

        let fresh = registry
            .create_partition("archive", PartitionOptions::default())
            .unwrap();
        assert_eq!(fresh.get::<i32>("old").unwrap(), None);
        assert_eq!(fresh.count(crate::RangeSpec::all()).unwrap(), 0);
    }

    #[test]
    fn test_drop_recycles_sub_databases() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.max_dbs = 8;
        let registry = PartitionRegistry::open(config).unwrap();

        let live: Vec<_> = (0..3)
            .map(|i| {
                let p = registry
                    .create_partition(&format!("live_{}", i), PartitionOptions::default())
                    .unwrap();
                p.put_sync("id", &i).unwrap();
                p
            })
            .collect();

        // Far more create/drop cycles than the environment has sub-databases
        for i in 0..40 {
            let name = format!("bucket_{}", i);
            let p = registry
                .create_partition(&name, PartitionOptions::default())
                .unwrap();
            assert_eq!(p.count(crate::RangeSpec::all()).unwrap(), 0);
            p.put_sync("seq", &i).unwrap();
            if i % 2 == 0 {
                registry.close_partition(&name).unwrap();
            }
            registry.drop_partition(&name, true).unwrap();
        }

        for (i, p) in live.iter().enumerate() {
            assert_eq!(p.get::<usize>("id").unwrap(), Some(i));
        }
        let names = registry.list_partitions().unwrap();
        assert_eq!(names.len(), 3);
        assert!(names.contains("live_0"));
        drop(live);
        registry.shutdown();

        // Recycled slots survive a restart
        let mut config = test_config(&temp_dir);
        config.max_dbs = 8;
        let registry = PartitionRegistry::open(config).unwrap();
        for i in 0..3 {
            let p = registry
                .open_partition(&format!("live_{}", i), PartitionOptions::default())
                .unwrap();
            assert_eq!(p.get::<usize>("id").unwrap(), Some(i));
        }
        let fresh = registry
            .create_partition("after_restart", PartitionOptions::default())
            .unwrap();
        assert_eq!(fresh.count(crate::RangeSpec::all()).unwrap(), 0);
    }

    #[test]
    fn test_lifecycle_calls_while_a_writer_is_active() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(PartitionRegistry::open(test_config(&temp_dir)).unwrap());
        let a = registry
            .create_partition("a", PartitionOptions::default())
            .unwrap();
        registry
            .create_partition("c", PartitionOptions::default())
            .unwrap();
        registry.close_partition("c").unwrap();

        let (tx, rx) = mpsc::channel();

        // Holds the writer, then opens a partition that is not cached
        let writer = {
            let registry = registry.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                let result = a.transaction_sync(|txn| {
                    txn.put("k", &1)?;
                    thread::sleep(Duration::from_millis(200));
                    registry.open_partition("c", PartitionOptions::default())?;
                    Ok(())
                });
                tx.send(("writer", result.is_ok())).unwrap();
            })
        };

        // Needs the writer while the first thread holds it
        let creator = {
            let registry = registry.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                let created = registry.create_partition("b", PartitionOptions::default());
                let dropped = created.and_then(|_| registry.drop_partition("b", true));
                tx.send(("creator", dropped.is_ok())).unwrap();
            })
        };

        for _ in 0..2 {
            let (who, ok) = rx
                .recv_timeout(Duration::from_secs(10))
                .expect("lifecycle call blocked on the writer");
            assert!(ok, "{} failed", who);
        }
        writer.join().unwrap();
        creator.join().unwrap();

        assert_eq!(
            registry.list_partitions().unwrap(),
            ["a", "c"].iter().map(|s| s.to_string()).collect::<HashSet<_>>()
        );
    }

    #[test]
    fn test_concurrent_open_or_create_shares_one_handle() {
        let temp_dir = TempDir::new().unwrap();
        let registry = Arc::new(PartitionRegistry::open(test_config(&temp_dir)).unwrap());
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let workers: Vec<_> = (0..threads)
            .map(|i| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let p = registry
                        .open_or_create_partition("shared", PartitionOptions::default())
                        .unwrap();
                    p.put_sync(format!("t{}", i), &i).unwrap();
                    p
                })
            })
            .collect();
        let handles: Vec<PartitionHandle> =
            workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_eq!(registry.list_partitions().unwrap().len(), 1);
        assert_eq!(registry.open_partitions(), vec!["shared".to_string()]);
        for p in &handles {
            assert_eq!(p.count(crate::RangeSpec::all()).unwrap(), threads as u64);
        }

        // Every caller got the same shared handle
        registry.close_partition("shared").unwrap();
        assert!(handles.iter().all(|p| !p.is_open()));
    }

    #[test]
    fn test_environment_transaction_spans_partitions() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();
        let orders = registry
            .create_partition("orders", PartitionOptions::default())
            .unwrap();
        let stock = registry
            .create_partition("stock", PartitionOptions::default())
            .unwrap();
        stock.put_sync("widget", &5).unwrap();

        registry
            .transaction_sync(|txn| {
                let left: i32 = txn.get(&stock, "widget")?.unwrap_or(0);
                txn.put(&stock, "widget", &(left - 1))?;
                txn.put(&orders, "o:1", &"widget")?;
                Ok(())
            })
            .unwrap();
        assert_eq!(stock.get::<i32>("widget").unwrap(), Some(4));
        assert!(orders.has("o:1").unwrap());

        let aborted: Result<()> = registry.transaction_sync(|txn| {
            txn.delete(&stock, "widget")?;
            Err(TideError::Encoding("abort".into()))
        });
        assert!(aborted.is_err());
        assert!(stock.has("widget").unwrap());
    }

    #[test]
    fn test_stats() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();
        registry
            .create_partition("a", PartitionOptions::default())
            .unwrap();
        registry
            .create_partition("b", PartitionOptions::default())
            .unwrap();
        registry.close_partition("b").unwrap();

        let stats = registry.stats().unwrap();
        assert_eq!(stats.open_partitions, 1);
        assert_eq!(stats.total_partitions, 2);
        assert!(stats.disk_size_bytes > 0);
        assert_eq!(stats.map_size, 32 * 1024 * 1024);
    }

    #[test]
    fn test_shutdown_twice() {
        let temp_dir = TempDir::new().unwrap();
        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();
        let p = registry
            .create_partition("t", PartitionOptions::default())
            .unwrap();

        registry.shutdown();
        registry.shutdown();

        assert!(registry.is_closed());
        assert!(!p.is_open());
        assert!(!registry.system().is_open());
        assert!(matches!(
            registry.list_partitions(),
            Err(TideError::EnvironmentClosed { .. })
        ));
        assert!(matches!(
            registry.create_partition("u", PartitionOptions::default()),
            Err(TideError::EnvironmentClosed { .. })
        ));
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();
            let options = PartitionOptions::default()
                .with_encoding(ValueEncoding::Bincode)
                .with_compression(Compression::Lz4);
            let p = registry.create_partition("durable", options).unwrap();
            p.put_sync("answer", &42u64).unwrap();
            registry.shutdown();
        }

        let registry = PartitionRegistry::open(test_config(&temp_dir)).unwrap();
        assert!(registry.has_partition("durable").unwrap());

        // Codec comes from the catalog, not from the default options
        let p = registry
            .open_partition("durable", PartitionOptions::default())
            .unwrap();
        assert_eq!(p.codec().encoding, ValueEncoding::Bincode);
        assert_eq!(p.codec().compression, Compression::Lz4);
        assert_eq!(p.get::<u64>("answer").unwrap(), Some(42));
    }

    #[tokio::test]
    async fn test_async_transaction_and_reclaimer() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(&temp_dir);
        config.reclaim.periodic_interval_ms = 60_000;
        let registry = PartitionRegistry::open(config).unwrap();
        let p = registry
            .create_partition("jobs", PartitionOptions::default())
            .unwrap();

        let handle = p.clone();
        registry
            .transaction(move |txn| txn.put(&handle, "j:1", &"queued"))
            .await
            .unwrap();
        assert_eq!(p.get::<String>("j:1").unwrap(), Some("queued".to_string()));

        assert!(registry
            .reclaimer
            .lock()
            .as_ref()
            .map_or(false, |r| r.is_running()));
        registry.shutdown();
        assert!(registry.reclaimer.lock().is_none());
    }
}
