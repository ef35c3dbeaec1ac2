//! Environment: one open storage instance.
//!
//! An [`Environment`] owns a single engine environment handle. The handle is
//! either null or valid; every operation on a null handle fails with
//! [`Error::NotOpen`]. The wrapper is cheap to clone and can be shared across
//! threads; transactions keep a clone as their back-reference.
//!
//! # Example
//!
//! ```rust,no_run
//! use mapkv::{Binding, EnvOptions, Environment};
//!
//! # fn main() -> Result<(), mapkv::Error> {
//! let binding = Binding::new()?;
//! let env = Environment::open_with(binding, "./data", &EnvOptions::default())?;
//!
//! env.write(|txn| txn.set("greeting", "hello"))?;
//! let value = env.read(|txn| txn.get("greeting"))?;
//! assert_eq!(value.as_deref(), Some(&b"hello"[..]));
//!
//! env.close()?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::binding::{Binding, EnvInfo, Stat, MDB_env, MDB_txn};
use crate::config::EnvOptions;
use crate::flags::{EnvFlags, TxnFlags};
use crate::txn::Transaction;
use crate::{Error, Result};

/// The environment slot: null, created, or created and opened.
struct EnvHandle {
    raw: *mut MDB_env,
    opened: bool,
}

// SAFETY: the engine's environment handle may be used from any thread; every
// change to the slot itself happens under the RwLock write guard.
unsafe impl Send for EnvHandle {}
unsafe impl Sync for EnvHandle {}

struct EnvInner {
    binding: Binding,
    handle: RwLock<EnvHandle>,
    /// Native transactions (including reset ones) currently holding a handle.
    live_txns: AtomicUsize,
}

impl Drop for EnvInner {
    fn drop(&mut self) {
        let handle = self.handle.get_mut();
        if !handle.raw.is_null() {
            // SAFETY: no transaction can be alive; each holds a clone of this Arc.
            unsafe { self.binding.env_close(handle.raw) };
            handle.raw = ptr::null_mut();
            log::debug!("Environment released on drop");
        }
    }
}

/// Handle to one open storage environment.
#[derive(Clone)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handle = self.inner.handle.read();
        f.debug_struct("Environment")
            .field("created", &!handle.raw.is_null())
            .field("opened", &handle.opened)
            .field("live_txns", &self.open_transactions())
            .finish()
    }
}

impl Environment {
    /// Creates a new environment wrapper and allocates its native handle.
    pub fn new(binding: Binding) -> Result<Self> {
        let env = Self {
            inner: Arc::new(EnvInner {
                binding,
                handle: RwLock::new(EnvHandle { raw: ptr::null_mut(), opened: false }),
                live_txns: AtomicUsize::new(0),
            }),
        };
        env.create()?;
        Ok(env)
    }

    /// Creates, configures and opens an environment in one step.
    ///
    /// A missing directory is created when `options.create_if_missing` is set
    /// and the store is directory-backed.
    ///
    /// # Arguments
    ///
    /// * `binding` - Engine entry points
    /// * `path` - Store directory, or the data file itself with `NO_SUB_DIR`
    /// * `options` - Map size, reader and keyspace limits, flags and file mode
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for options that fail validation,
    /// [`Error::Io`] when the directory is missing and may not be created,
    /// and an engine error if the native open fails. On failure no handle
    /// is left behind.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mapkv::{Binding, EnvOptions, Environment};
    ///
    /// # fn main() -> Result<(), mapkv::Error> {
    /// let options = EnvOptions::default().map_size(64 << 20).max_dbs(8);
    /// let env = Environment::open_with(Binding::new()?, "./data", &options)?;
    /// env.write(|txn| txn.set("greeting", "hello"))?;
    /// env.close()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn open_with<P: AsRef<Path>>(binding: Binding, path: P, options: &EnvOptions) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();

        // A single-file store is created by the engine itself
        if !path.exists() && !options.flags.contains(EnvFlags::NO_SUB_DIR) {
            if options.create_if_missing {
                std::fs::create_dir_all(path)?;
            } else {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("environment directory does not exist: {:?}", path),
                )));
            }
        }

        let env = Self::new(binding)?;
        env.configure(options)?;
        env.open(path, options.flags, options.mode)?;
        Ok(env)
    }

    /// Returns the binding this environment was created with.
    pub fn binding(&self) -> &Binding {
        &self.inner.binding
    }

    /// Allocates a new native handle. Only valid while no handle exists,
    /// i.e. on a fresh wrapper or after [`close`](Self::close).
    pub fn create(&self) -> Result<()> {
        let mut handle = self.inner.handle.write();
        if !handle.raw.is_null() {
            return Err(Error::invalid_state("environment handle already created"));
        }
        handle.raw = self.inner.binding.env_create()?;
        handle.opened = false;
        Ok(())
    }

    /// Applies map size, reader and keyspace limits. Call before [`open`](Self::open).
    pub fn configure(&self, options: &EnvOptions) -> Result<()> {
        self.set_map_size(options.map_size)?;
        self.set_max_readers(options.max_readers)?;
        self.set_max_dbs(options.max_dbs)
    }

    /// Associates the handle with storage at `path`.
    ///
    /// If `path` is an existing regular file the single-file flag is added,
    /// so file- and directory-backed stores open the same way. On failure the
    /// native handle is released and must be re-created.
    pub fn open<P: AsRef<Path>>(&self, path: P, flags: EnvFlags, mode: u32) -> Result<()> {
        let path = path.as_ref();
        let mut flags = flags;
        if path.is_file() {
            flags |= EnvFlags::NO_SUB_DIR;
        }

        let mut handle = self.inner.handle.write();
        if handle.raw.is_null() {
            return Err(Error::NotOpen);
        }
        if handle.opened {
            return Err(Error::invalid_state("environment is already open"));
        }

        // SAFETY: the handle is created and not yet opened.
        let result = unsafe { self.inner.binding.env_open(handle.raw, path, flags, mode) };
        match result {
            Ok(()) => {
                handle.opened = true;
                log::info!("Opened environment at {:?} with flags {:?}", path, flags);
                Ok(())
            }
            Err(e) => {
                // SAFETY: a handle whose open failed must be discarded.
                unsafe { self.inner.binding.env_close(handle.raw) };
                handle.raw = ptr::null_mut();
                log::warn!("Failed to open environment at {:?}: {}", path, e);
                Err(e)
            }
        }
    }

    /// Releases the native handle. Closing twice is a no-op.
    ///
    /// Fails with [`Error::TransactionsOpen`] while any native transaction is
    /// alive; closing does not cascade to them.
    pub fn close(&self) -> Result<()> {
        let mut handle = self.inner.handle.write();
        let live = self.open_transactions();
        if live > 0 {
            return Err(Error::TransactionsOpen(live));
        }
        if handle.raw.is_null() {
            return Ok(());
        }
        // SAFETY: no transaction holds the handle and the write guard excludes new ones.
        unsafe { self.inner.binding.env_close(handle.raw) };
        handle.raw = ptr::null_mut();
        handle.opened = false;
        log::debug!("Environment closed");
        Ok(())
    }

    /// True once the handle is created and opened.
    pub fn is_open(&self) -> bool {
        let handle = self.inner.handle.read();
        !handle.raw.is_null() && handle.opened
    }

    /// Number of native transactions currently alive against this environment.
    pub fn open_transactions(&self) -> usize {
        self.inner.live_txns.load(Ordering::SeqCst)
    }

    fn with_created<R>(&self, f: impl FnOnce(*mut MDB_env) -> Result<R>) -> Result<R> {
        let handle = self.inner.handle.read();
        if handle.raw.is_null() {
            return Err(Error::NotOpen);
        }
        f(handle.raw)
    }

    fn with_open<R>(&self, f: impl FnOnce(*mut MDB_env) -> Result<R>) -> Result<R> {
        let handle = self.inner.handle.read();
        if handle.raw.is_null() || !handle.opened {
            return Err(Error::NotOpen);
        }
        f(handle.raw)
    }

    /// Sets the memory map size.
    pub fn set_map_size(&self, size: usize) -> Result<()> {
        // SAFETY: with_created only hands out a live handle.
        self.with_created(|env| unsafe { self.inner.binding.env_set_map_size(env, size) })
    }

    /// Sets the maximum number of reader slots. Only valid before open.
    pub fn set_max_readers(&self, readers: u32) -> Result<()> {
        self.with_created(|env| unsafe { self.inner.binding.env_set_max_readers(env, readers) })
    }

    /// Sets the maximum number of named keyspaces. Only valid before open.
    pub fn set_max_dbs(&self, dbs: u32) -> Result<()> {
        self.with_created(|env| unsafe { self.inner.binding.env_set_max_dbs(env, dbs) })
    }

    /// Returns the maximum number of reader slots.
    pub fn max_readers(&self) -> Result<u32> {
        self.with_created(|env| unsafe { self.inner.binding.env_get_max_readers(env) })
    }

    /// Returns the largest key the engine accepts, in bytes.
    pub fn max_key_size(&self) -> Result<usize> {
        self.with_created(|env| Ok(unsafe { self.inner.binding.env_get_max_key_size(env) }))
    }

    /// Returns statistics for the environment's main B-tree.
    pub fn stat(&self) -> Result<Stat> {
        self.with_open(|env| unsafe { self.inner.binding.env_stat(env) })
    }

    /// Returns environment-wide counters.
    pub fn info(&self) -> Result<EnvInfo> {
        self.with_open(|env| unsafe { self.inner.binding.env_info(env) })
    }

    /// Flushes buffers to disk; `force` syncs even with `NO_SYNC` set.
    pub fn sync(&self, force: bool) -> Result<()> {
        self.with_open(|env| unsafe { self.inner.binding.env_sync(env, force) })
    }

    /// Copies the environment to `path` while it stays open.
    pub fn copy<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.with_open(|env| unsafe { self.inner.binding.env_copy(env, path) })?;
        log::info!("Copied environment to {:?}", path);
        Ok(())
    }

    /// Copies the environment to an open file descriptor.
    #[cfg(unix)]
    pub fn copy_fd(&self, fd: std::os::unix::io::RawFd) -> Result<()> {
        self.with_open(|env| unsafe { self.inner.binding.env_copy_fd(env, fd) })
    }

    /// Turns runtime flags on or off.
    pub fn set_flags(&self, flags: EnvFlags, on: bool) -> Result<()> {
        self.with_open(|env| unsafe { self.inner.binding.env_set_flags(env, flags, on) })
    }

    /// Returns the current environment flags.
    pub fn flags(&self) -> Result<EnvFlags> {
        self.with_open(|env| unsafe { self.inner.binding.env_get_flags(env) })
    }

    /// Returns the path the environment was opened with.
    pub fn path(&self) -> Result<PathBuf> {
        self.with_open(|env| unsafe { self.inner.binding.env_get_path(env) })
    }

    /// Releases a keyspace slot environment-wide.
    ///
    /// Only permitted while no native transaction is alive, since any of them
    /// may still reference the slot.
    pub fn close_database(&self, dbi: u32) -> Result<()> {
        let handle = self.inner.handle.write();
        let live = self.open_transactions();
        if live > 0 {
            return Err(Error::TransactionsOpen(live));
        }
        if handle.raw.is_null() || !handle.opened {
            return Err(Error::NotOpen);
        }
        // SAFETY: the write guard excludes new transactions and none are alive.
        unsafe { self.inner.binding.dbi_close(handle.raw, dbi) };
        Ok(())
    }

    /// Begins a transaction bound to this environment.
    ///
    /// `write == false` forces [`TxnFlags::READ_ONLY`] regardless of `flags`.
    pub fn transaction(&self, flags: TxnFlags, write: bool) -> Result<Transaction> {
        let flags = if write { flags } else { flags | TxnFlags::READ_ONLY };
        Transaction::new(self.clone(), None, flags)
    }

    /// Begins a read-only transaction.
    pub fn begin_ro(&self) -> Result<Transaction> {
        self.transaction(TxnFlags::empty(), false)
    }

    /// Begins a write transaction.
    pub fn begin_rw(&self) -> Result<Transaction> {
        self.transaction(TxnFlags::empty(), true)
    }

    /// Runs `f` in a read-only transaction that is always released.
    pub fn read<R>(&self, f: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
        self.begin_ro()?.run(f)
    }

    /// Runs `f` in a write transaction; commits on `Ok`, aborts on `Err`.
    pub fn write<R>(&self, f: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
        self.begin_rw()?.run(f)
    }

    /// Begins a native transaction and counts it as live.
    pub(crate) fn begin_native(&self, parent: *mut MDB_txn, flags: TxnFlags) -> Result<*mut MDB_txn> {
        let env = {
            let handle = self.inner.handle.read();
            if handle.raw.is_null() || !handle.opened {
                return Err(Error::NotOpen);
            }
            // Counted under the guard, so close() can no longer free the handle.
            self.inner.live_txns.fetch_add(1, Ordering::SeqCst);
            handle.raw
        };
        // The guard is dropped before a write begin blocks on the engine's writer lock.
        // SAFETY: env stays open while live_txns is nonzero.
        match unsafe { self.inner.binding.txn_begin(env, parent, flags) } {
            Ok(txn) => {
                debug_assert_eq!(unsafe { self.inner.binding.txn_env(txn) }, env);
                Ok(txn)
            }
            Err(e) => {
                self.inner.live_txns.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Records that a native transaction handle has been freed.
    pub(crate) fn release_native(&self) {
        self.inner.live_txns.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn binding() -> Binding {
        Binding::new().unwrap()
    }

    #[test]
    fn test_env_open_and_close() {
        let temp_dir = TempDir::new().unwrap();
        let env = Environment::open_with(binding(), temp_dir.path(), &EnvOptions::default()).unwrap();
        assert!(env.is_open());
        assert_eq!(env.path().unwrap(), temp_dir.path());

        env.close().unwrap();
        assert!(!env.is_open());
        // Closing twice is a no-op
        env.close().unwrap();
        assert!(matches!(env.stat(), Err(Error::NotOpen)));
    }

    #[test]
    fn test_env_recreate_after_close() {
        let temp_dir = TempDir::new().unwrap();
        let env = Environment::new(binding()).unwrap();
        assert!(env.create().is_err());

        env.open(temp_dir.path(), EnvFlags::empty(), 0o644).unwrap();
        env.close().unwrap();

        env.create().unwrap();
        env.open(temp_dir.path(), EnvFlags::empty(), 0o644).unwrap();
        assert!(env.is_open());
    }

    #[cfg(unix)]
    #[test]
    fn test_env_open_mode_applies_to_data_file() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let options = EnvOptions::default().mode(0o600);
        let env = Environment::open_with(binding(), temp_dir.path(), &options).unwrap();
        env.write(|txn| txn.set("k", "v")).unwrap();

        let meta = std::fs::metadata(temp_dir.path().join("data.mdb")).unwrap();
        assert_eq!(meta.permissions().mode() & 0o077, 0);
    }

    #[test]
    fn test_env_single_file_detection() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("store.mdb");
        let options = EnvOptions::default().flags(EnvFlags::NO_SUB_DIR);
        let env = Environment::open_with(binding(), &file, &options).unwrap();
        env.write(|txn| txn.set("k", "v")).unwrap();
        env.close().unwrap();
        assert!(file.is_file());

        // Reopening the file without the flag detects the single-file layout
        let env = Environment::open_with(binding(), &file, &EnvOptions::default()).unwrap();
        assert!(env.flags().unwrap().contains(EnvFlags::NO_SUB_DIR));
        assert_eq!(env.read(|txn| txn.get("k")).unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn test_env_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("store");
        let options = EnvOptions::default().create_if_missing(false);
        assert!(Environment::open_with(binding(), &path, &options).is_err());

        let env = Environment::open_with(binding(), &path, &EnvOptions::default()).unwrap();
        assert!(env.is_open());
    }

    #[test]
    fn test_env_close_refused_with_open_transaction() {
        let temp_dir = TempDir::new().unwrap();
        let env = Environment::open_with(binding(), temp_dir.path(), &EnvOptions::default()).unwrap();

        let txn = env.begin_ro().unwrap();
        assert_eq!(env.open_transactions(), 1);
        assert!(matches!(env.close(), Err(Error::TransactionsOpen(1))));

        txn.abort();
        assert_eq!(env.open_transactions(), 0);
        env.close().unwrap();
    }

    #[test]
    fn test_env_stat_and_info() {
        let temp_dir = TempDir::new().unwrap();
        let options = EnvOptions::default().map_size(4 * 1024 * 1024).max_readers(8);
        let env = Environment::open_with(binding(), temp_dir.path(), &options).unwrap();

        env.write(|txn| {
            txn.set("a", "1")?;
            txn.set("b", "2")
        })
        .unwrap();

        let stat = env.stat().unwrap();
        assert!(stat.page_size > 0);
        assert_eq!(stat.entries, 2);

        let info = env.info().unwrap();
        assert_eq!(info.map_size, 4 * 1024 * 1024);
        assert_eq!(info.max_readers, 8);
        assert!(info.last_txn_id >= 1);
        assert_eq!(env.max_readers().unwrap(), 8);
        assert!(env.max_key_size().unwrap() > 0);
    }

    #[test]
    fn test_env_copy() {
        let temp_dir = TempDir::new().unwrap();
        let backup_dir = TempDir::new().unwrap();
        let env = Environment::open_with(binding(), temp_dir.path(), &EnvOptions::default()).unwrap();
        env.write(|txn| txn.set("backup", "me")).unwrap();
        env.sync(true).unwrap();
        env.copy(backup_dir.path()).unwrap();

        let copy = Environment::open_with(binding(), backup_dir.path(), &EnvOptions::default()).unwrap();
        assert_eq!(copy.read(|txn| txn.get("backup")).unwrap().as_deref(), Some(&b"me"[..]));
    }

    #[test]
    fn test_env_runtime_flags() {
        let temp_dir = TempDir::new().unwrap();
        let env = Environment::open_with(binding(), temp_dir.path(), &EnvOptions::default()).unwrap();
        env.set_flags(EnvFlags::NO_SYNC, true).unwrap();
        assert!(env.flags().unwrap().contains(EnvFlags::NO_SYNC));
        env.set_flags(EnvFlags::NO_SYNC, false).unwrap();
        assert!(!env.flags().unwrap().contains(EnvFlags::NO_SYNC));
    }

    #[test]
    fn test_transaction_on_closed_env() {
        let temp_dir = TempDir::new().unwrap();
        let env = Environment::open_with(binding(), temp_dir.path(), &EnvOptions::default()).unwrap();
        env.close().unwrap();
        assert!(matches!(env.begin_ro(), Err(Error::NotOpen)));
    }
}
