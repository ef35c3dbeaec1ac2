//! Typed adapter over the engine's C entry points.
//!
//! Every fallible call goes through [`Binding::check`], which turns a nonzero
//! status into [`Error::Engine`] using the engine's own message for the code.
//! Teardown calls (`env_close`, `txn_abort`, `txn_reset`, `cursor_close`,
//! `dbi_close`) are void in the engine and stay infallible here.
//!
//! Raw handles are passed through unchecked; the owning wrappers in
//! [`crate::env`], [`crate::txn`], [`crate::database`] and [`crate::cursor`]
//! are responsible for only handing in live handles.

use std::ffi::{CStr, CString};
use std::mem::MaybeUninit;
use std::path::{Path, PathBuf};
use std::ptr;

use bytes::Bytes;
use libc::{c_char, c_int, c_uint, c_void};
use lmdb_sys as ffi;
use serde::Serialize;

use crate::error::{Error, ErrorKind, Result};
use crate::flags::{DatabaseFlags, EnvFlags, TxnFlags, WriteFlags};

pub(crate) use ffi::{MDB_cursor, MDB_dbi, MDB_env, MDB_txn};

/// Major version of the engine ABI this crate is written against.
const SUPPORTED_MAJOR: i32 = 0;

/// B-tree statistics for an environment or a keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stat {
    /// Size of a database page in bytes.
    pub page_size: u32,
    /// Depth (height) of the B-tree.
    pub depth: u32,
    /// Number of internal (non-leaf) pages.
    pub branch_pages: usize,
    /// Number of leaf pages.
    pub leaf_pages: usize,
    /// Number of overflow pages.
    pub overflow_pages: usize,
    /// Number of data items.
    pub entries: usize,
}

impl From<ffi::MDB_stat> for Stat {
    fn from(stat: ffi::MDB_stat) -> Self {
        Self {
            page_size: stat.ms_psize,
            depth: stat.ms_depth,
            branch_pages: stat.ms_branch_pages,
            leaf_pages: stat.ms_leaf_pages,
            overflow_pages: stat.ms_overflow_pages,
            entries: stat.ms_entries,
        }
    }
}

/// Environment-wide counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnvInfo {
    /// Size of the memory map in bytes.
    pub map_size: usize,
    /// ID of the last used page.
    pub last_page: usize,
    /// ID of the last committed transaction.
    pub last_txn_id: usize,
    /// Maximum number of reader slots.
    pub max_readers: u32,
    /// Number of reader slots in use.
    pub num_readers: u32,
}

impl From<ffi::MDB_envinfo> for EnvInfo {
    fn from(info: ffi::MDB_envinfo) -> Self {
        Self {
            map_size: info.me_mapsize,
            last_page: info.me_last_pgno,
            last_txn_id: info.me_last_txnid,
            max_readers: info.me_maxreaders,
            num_readers: info.me_numreaders,
        }
    }
}

/// Version of the linked engine library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Version {
    /// Major version.
    pub major: i32,
    /// Minor version.
    pub minor: i32,
    /// Patch level.
    pub patch: i32,
    /// Human readable version string.
    pub text: String,
}

/// Handle to the engine's function table.
///
/// Constructed once by the owning application and passed to every
/// [`Environment`](crate::Environment) it creates.
#[derive(Debug, Clone, Copy)]
pub struct Binding {
    major: i32,
    minor: i32,
    patch: i32,
}

fn val(data: &[u8]) -> ffi::MDB_val {
    ffi::MDB_val { mv_size: data.len(), mv_data: data.as_ptr() as *mut c_void }
}

fn empty_val() -> ffi::MDB_val {
    ffi::MDB_val { mv_size: 0, mv_data: ptr::null_mut() }
}

/// Copies engine-owned memory out before the transaction can move it.
unsafe fn copy_out(val: &ffi::MDB_val) -> Bytes {
    if val.mv_data.is_null() || val.mv_size == 0 {
        return Bytes::new();
    }
    Bytes::copy_from_slice(std::slice::from_raw_parts(val.mv_data as *const u8, val.mv_size))
}

fn path_to_cstring(path: &Path) -> Result<CString> {
    #[cfg(unix)]
    let raw = {
        use std::os::unix::ffi::OsStrExt;
        path.as_os_str().as_bytes().to_vec()
    };
    #[cfg(not(unix))]
    let raw = path
        .to_str()
        .ok_or_else(|| Error::invalid_argument(format!("path is not valid UTF-8: {:?}", path)))?
        .as_bytes()
        .to_vec();

    CString::new(raw)
        .map_err(|_| Error::invalid_argument(format!("path contains a NUL byte: {:?}", path)))
}

impl Binding {
    /// Binds to the linked engine, rejecting an incompatible major version.
    pub fn new() -> Result<Self> {
        let (major, minor, patch, text) = Self::query_version();
        if major != SUPPORTED_MAJOR {
            return Err(Error::Engine {
                kind: ErrorKind::VersionMismatch,
                code: ffi::MDB_VERSION_MISMATCH,
                message: format!("unsupported engine version {}", text),
            });
        }
        log::debug!("Bound to {}", text);
        Ok(Self { major, minor, patch })
    }

    fn query_version() -> (i32, i32, i32, String) {
        let (mut major, mut minor, mut patch): (c_int, c_int, c_int) = (0, 0, 0);
        // SAFETY: mdb_version only writes the three out-parameters and returns a static string.
        let text = unsafe {
            let raw = ffi::mdb_version(&mut major, &mut minor, &mut patch);
            CStr::from_ptr(raw).to_string_lossy().into_owned()
        };
        (major, minor, patch, text)
    }

    /// Returns the version of the linked engine.
    pub fn version(&self) -> Version {
        let (_, _, _, text) = Self::query_version();
        Version { major: self.major, minor: self.minor, patch: self.patch, text }
    }

    /// Returns the engine's message for a status code.
    pub fn strerror(&self, code: i32) -> String {
        // SAFETY: mdb_strerror returns a pointer to a static or thread-local string.
        unsafe { CStr::from_ptr(ffi::mdb_strerror(code)).to_string_lossy().into_owned() }
    }

    /// Builds the structured error for a nonzero status.
    pub(crate) fn error(&self, code: c_int) -> Error {
        Error::Engine { kind: ErrorKind::from_code(code), code, message: self.strerror(code) }
    }

    /// Converts an engine status into a `Result`.
    pub(crate) fn check(&self, code: c_int) -> Result<()> {
        if code == ffi::MDB_SUCCESS {
            Ok(())
        } else {
            Err(self.error(code))
        }
    }

    // Environment

    pub(crate) fn env_create(&self) -> Result<*mut MDB_env> {
        let mut env = ptr::null_mut();
        // SAFETY: the out-parameter is a valid pointer slot.
        self.check(unsafe { ffi::mdb_env_create(&mut env) })?;
        Ok(env)
    }

    pub(crate) unsafe fn env_open(
        &self,
        env: *mut MDB_env,
        path: &Path,
        flags: EnvFlags,
        mode: u32,
    ) -> Result<()> {
        let path = path_to_cstring(path)?;
        self.check(ffi::mdb_env_open(env, path.as_ptr(), flags.bits(), mode as ffi::mode_t))
    }

    pub(crate) unsafe fn env_copy(&self, env: *mut MDB_env, path: &Path) -> Result<()> {
        let path = path_to_cstring(path)?;
        self.check(ffi::mdb_env_copy(env, path.as_ptr()))
    }

    #[cfg(unix)]
    pub(crate) unsafe fn env_copy_fd(
        &self,
        env: *mut MDB_env,
        fd: std::os::unix::io::RawFd,
    ) -> Result<()> {
        self.check(ffi::mdb_env_copyfd(env, fd))
    }

    pub(crate) unsafe fn env_stat(&self, env: *mut MDB_env) -> Result<Stat> {
        let mut stat = MaybeUninit::<ffi::MDB_stat>::uninit();
        self.check(ffi::mdb_env_stat(env, stat.as_mut_ptr()))?;
        Ok(stat.assume_init().into())
    }

    pub(crate) unsafe fn env_info(&self, env: *mut MDB_env) -> Result<EnvInfo> {
        let mut info = MaybeUninit::<ffi::MDB_envinfo>::uninit();
        self.check(ffi::mdb_env_info(env, info.as_mut_ptr()))?;
        Ok(info.assume_init().into())
    }

    pub(crate) unsafe fn env_sync(&self, env: *mut MDB_env, force: bool) -> Result<()> {
        self.check(ffi::mdb_env_sync(env, force as c_int))
    }

    pub(crate) unsafe fn env_close(&self, env: *mut MDB_env) {
        ffi::mdb_env_close(env)
    }

    pub(crate) unsafe fn env_set_flags(
        &self,
        env: *mut MDB_env,
        flags: EnvFlags,
        on: bool,
    ) -> Result<()> {
        self.check(ffi::mdb_env_set_flags(env, flags.bits(), on as c_int))
    }

    pub(crate) unsafe fn env_get_flags(&self, env: *mut MDB_env) -> Result<EnvFlags> {
        let mut flags: c_uint = 0;
        self.check(ffi::mdb_env_get_flags(env, &mut flags))?;
        Ok(EnvFlags::from_bits_truncate(flags))
    }

    pub(crate) unsafe fn env_get_path(&self, env: *mut MDB_env) -> Result<PathBuf> {
        let mut path: *const c_char = ptr::null();
        self.check(ffi::mdb_env_get_path(env, &mut path))?;
        if path.is_null() {
            return Err(Error::NotOpen);
        }
        Ok(PathBuf::from(CStr::from_ptr(path).to_string_lossy().into_owned()))
    }

    pub(crate) unsafe fn env_set_map_size(&self, env: *mut MDB_env, size: usize) -> Result<()> {
        self.check(ffi::mdb_env_set_mapsize(env, size))
    }

    pub(crate) unsafe fn env_set_max_readers(&self, env: *mut MDB_env, readers: u32) -> Result<()> {
        self.check(ffi::mdb_env_set_maxreaders(env, readers))
    }

    pub(crate) unsafe fn env_get_max_readers(&self, env: *mut MDB_env) -> Result<u32> {
        let mut readers: c_uint = 0;
        self.check(ffi::mdb_env_get_maxreaders(env, &mut readers))?;
        Ok(readers)
    }

    pub(crate) unsafe fn env_set_max_dbs(&self, env: *mut MDB_env, dbs: u32) -> Result<()> {
        self.check(ffi::mdb_env_set_maxdbs(env, dbs))
    }

    pub(crate) unsafe fn env_get_max_key_size(&self, env: *mut MDB_env) -> usize {
        ffi::mdb_env_get_maxkeysize(env).max(0) as usize
    }

    // Transactions

    pub(crate) unsafe fn txn_begin(
        &self,
        env: *mut MDB_env,
        parent: *mut MDB_txn,
        flags: TxnFlags,
    ) -> Result<*mut MDB_txn> {
        let mut txn = ptr::null_mut();
        self.check(ffi::mdb_txn_begin(env, parent, flags.bits(), &mut txn))?;
        Ok(txn)
    }

    pub(crate) unsafe fn txn_env(&self, txn: *mut MDB_txn) -> *mut MDB_env {
        ffi::mdb_txn_env(txn)
    }

    /// Commits and frees the handle, whatever the outcome.
    pub(crate) unsafe fn txn_commit(&self, txn: *mut MDB_txn) -> Result<()> {
        self.check(ffi::mdb_txn_commit(txn))
    }

    pub(crate) unsafe fn txn_abort(&self, txn: *mut MDB_txn) {
        ffi::mdb_txn_abort(txn)
    }

    pub(crate) unsafe fn txn_reset(&self, txn: *mut MDB_txn) {
        ffi::mdb_txn_reset(txn)
    }

    pub(crate) unsafe fn txn_renew(&self, txn: *mut MDB_txn) -> Result<()> {
        self.check(ffi::mdb_txn_renew(txn))
    }

    // Keyspaces

    pub(crate) unsafe fn dbi_open(
        &self,
        txn: *mut MDB_txn,
        name: Option<&str>,
        flags: DatabaseFlags,
    ) -> Result<MDB_dbi> {
        let name = name
            .map(|n| {
                CString::new(n).map_err(|_| {
                    Error::invalid_argument(format!("keyspace name contains a NUL byte: {:?}", n))
                })
            })
            .transpose()?;
        let name_ptr = name.as_ref().map_or(ptr::null(), |n| n.as_ptr());
        let mut dbi: MDB_dbi = 0;
        self.check(ffi::mdb_dbi_open(txn, name_ptr, flags.bits(), &mut dbi))?;
        Ok(dbi)
    }

    pub(crate) unsafe fn dbi_stat(&self, txn: *mut MDB_txn, dbi: MDB_dbi) -> Result<Stat> {
        let mut stat = MaybeUninit::<ffi::MDB_stat>::uninit();
        self.check(ffi::mdb_stat(txn, dbi, stat.as_mut_ptr()))?;
        Ok(stat.assume_init().into())
    }

    pub(crate) unsafe fn dbi_flags(&self, txn: *mut MDB_txn, dbi: MDB_dbi) -> Result<DatabaseFlags> {
        let mut flags: c_uint = 0;
        self.check(ffi::mdb_dbi_flags(txn, dbi, &mut flags))?;
        Ok(DatabaseFlags::from_bits_truncate(flags))
    }

    pub(crate) unsafe fn dbi_close(&self, env: *mut MDB_env, dbi: MDB_dbi) {
        ffi::mdb_dbi_close(env, dbi)
    }

    /// Empties the keyspace, or deletes it and closes `dbi` when `delete` is set.
    pub(crate) unsafe fn dbi_drop(&self, txn: *mut MDB_txn, dbi: MDB_dbi, delete: bool) -> Result<()> {
        self.check(ffi::mdb_drop(txn, dbi, delete as c_int))
    }

    // Records

    pub(crate) unsafe fn get(&self, txn: *mut MDB_txn, dbi: MDB_dbi, key: &[u8]) -> Result<Bytes> {
        let mut key = val(key);
        let mut data = empty_val();
        self.check(ffi::mdb_get(txn, dbi, &mut key, &mut data))?;
        Ok(copy_out(&data))
    }

    pub(crate) unsafe fn put(
        &self,
        txn: *mut MDB_txn,
        dbi: MDB_dbi,
        key: &[u8],
        value: &[u8],
        flags: WriteFlags,
    ) -> Result<()> {
        let mut key = val(key);
        let mut data = val(value);
        self.check(ffi::mdb_put(txn, dbi, &mut key, &mut data, flags.bits()))
    }

    /// Reserves `len` bytes for `key` and returns the engine-owned buffer.
    ///
    /// The buffer is valid until the next write in `txn` or its resolution.
    pub(crate) unsafe fn put_reserve(
        &self,
        txn: *mut MDB_txn,
        dbi: MDB_dbi,
        key: &[u8],
        len: usize,
        flags: WriteFlags,
    ) -> Result<*mut u8> {
        let mut key = val(key);
        let mut data = ffi::MDB_val { mv_size: len, mv_data: ptr::null_mut() };
        let flags = flags | WriteFlags::RESERVE;
        self.check(ffi::mdb_put(txn, dbi, &mut key, &mut data, flags.bits()))?;
        Ok(data.mv_data as *mut u8)
    }

    pub(crate) unsafe fn del(
        &self,
        txn: *mut MDB_txn,
        dbi: MDB_dbi,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> Result<()> {
        let mut key = val(key);
        let mut data = value.map(val);
        let data_ptr = data.as_mut().map_or(ptr::null_mut(), |d| d as *mut ffi::MDB_val);
        self.check(ffi::mdb_del(txn, dbi, &mut key, data_ptr))
    }

    // Cursors

    pub(crate) unsafe fn cursor_open(
        &self,
        txn: *mut MDB_txn,
        dbi: MDB_dbi,
    ) -> Result<*mut MDB_cursor> {
        let mut cursor = ptr::null_mut();
        self.check(ffi::mdb_cursor_open(txn, dbi, &mut cursor))?;
        Ok(cursor)
    }

    pub(crate) unsafe fn cursor_close(&self, cursor: *mut MDB_cursor) {
        ffi::mdb_cursor_close(cursor)
    }

    pub(crate) unsafe fn cursor_renew(&self, txn: *mut MDB_txn, cursor: *mut MDB_cursor) -> Result<()> {
        self.check(ffi::mdb_cursor_renew(txn, cursor))
    }

    pub(crate) unsafe fn cursor_get(
        &self,
        cursor: *mut MDB_cursor,
        key: Option<&[u8]>,
        value: Option<&[u8]>,
        op: c_uint,
    ) -> Result<(Bytes, Bytes)> {
        let mut key = key.map_or_else(empty_val, val);
        let mut data = value.map_or_else(empty_val, val);
        self.check(ffi::mdb_cursor_get(cursor, &mut key, &mut data, op))?;
        Ok((copy_out(&key), copy_out(&data)))
    }

    pub(crate) unsafe fn cursor_put(
        &self,
        cursor: *mut MDB_cursor,
        key: &[u8],
        value: &[u8],
        flags: WriteFlags,
    ) -> Result<()> {
        let mut key = val(key);
        let mut data = val(value);
        self.check(ffi::mdb_cursor_put(cursor, &mut key, &mut data, flags.bits()))
    }

    /// Stores `items.len() / item_size` fixed-size duplicates; returns how many were written.
    pub(crate) unsafe fn cursor_put_multiple(
        &self,
        cursor: *mut MDB_cursor,
        key: &[u8],
        items: &[u8],
        item_size: usize,
        flags: WriteFlags,
    ) -> Result<usize> {
        let mut key = val(key);
        let mut data = [
            ffi::MDB_val { mv_size: item_size, mv_data: items.as_ptr() as *mut c_void },
            ffi::MDB_val { mv_size: items.len() / item_size, mv_data: ptr::null_mut() },
        ];
        let flags = flags | WriteFlags::MULTIPLE;
        self.check(ffi::mdb_cursor_put(cursor, &mut key, data.as_mut_ptr(), flags.bits()))?;
        Ok(data[1].mv_size)
    }

    pub(crate) unsafe fn cursor_del(&self, cursor: *mut MDB_cursor, flags: WriteFlags) -> Result<()> {
        self.check(ffi::mdb_cursor_del(cursor, flags.bits()))
    }

    pub(crate) unsafe fn cursor_count(&self, cursor: *mut MDB_cursor) -> Result<usize> {
        let mut count: libc::size_t = 0;
        self.check(ffi::mdb_cursor_count(cursor, &mut count))?;
        Ok(count)
    }
}
