//! Keyspace handles scoped to a transaction.

use std::fmt;

use bytes::Bytes;

use crate::binding::{MDB_dbi, Stat};
use crate::cursor::Cursor;
use crate::error::ResultExt;
use crate::flags::{DatabaseFlags, WriteFlags};
use crate::txn::Transaction;
use crate::{Error, Result};

/// A named (or default) keyspace opened within one transaction.
///
/// The handle borrows its transaction and becomes stale as soon as that
/// transaction commits, aborts or resets; every call then fails with
/// [`Error::StaleHandle`].
pub struct Database<'txn> {
    txn: &'txn Transaction,
    dbi: MDB_dbi,
    generation: u64,
    name: Option<String>,
}

impl fmt::Debug for Database<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("dbi", &self.dbi)
            .field("generation", &self.generation)
            .finish()
    }
}

impl PartialEq for Database<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.txn, other.txn) && self.dbi == other.dbi && self.generation == other.generation
    }
}

impl Eq for Database<'_> {}

impl<'txn> Database<'txn> {
    pub(crate) fn new(txn: &'txn Transaction, dbi: MDB_dbi, generation: u64, name: Option<String>) -> Self {
        Self { txn, dbi, generation, name }
    }

    /// Keyspace name; `None` for the default keyspace.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Engine keyspace identifier.
    pub fn handle(&self) -> u32 {
        self.dbi
    }

    /// The transaction this handle belongs to.
    pub fn transaction(&self) -> &'txn Transaction {
        self.txn
    }

    /// True until the owning transaction resolves or resets.
    pub fn is_valid(&self) -> bool {
        self.txn.raw_at(self.generation).is_ok()
    }

    /// Returns the value stored under `key`.
    ///
    /// A missing key is an error of kind [`ErrorKind::NotFound`](crate::ErrorKind::NotFound);
    /// use [`find`](Self::find) to get an `Option` instead.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Result<Bytes> {
        let txn = self.txn.raw_at(self.generation)?;
        // SAFETY: raw_at only returns the handle of the active transaction.
        unsafe { self.txn.binding().get(txn, self.dbi, key.as_ref()) }
    }

    /// Returns the value stored under `key`, or `None` if absent.
    pub fn find<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Bytes>> {
        self.get(key).optional()
    }

    /// True if `key` is present.
    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.find(key)?.is_some())
    }

    /// Stores `value` under `key`.
    ///
    /// `RESERVE` and `MULTIPLE` need their own call shapes, see
    /// [`reserve`](Self::reserve) and [`Cursor::put_multiple`].
    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V, flags: WriteFlags) -> Result<()> {
        if flags.intersects(WriteFlags::SPECIAL) {
            return Err(Error::invalid_argument("RESERVE and MULTIPLE are not plain put flags"));
        }
        let txn = self.txn.raw_at(self.generation)?;
        // SAFETY: see get
        unsafe { self.txn.binding().put(txn, self.dbi, key.as_ref(), value.as_ref(), flags) }
    }

    /// Stores `value` under `key`, overwriting any existing value.
    pub fn set<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> Result<()> {
        self.put(key, value, WriteFlags::empty())
    }

    /// Reserves `len` bytes under `key` and lets `fill` write them in place.
    ///
    /// The transaction refuses every other operation while `fill` runs.
    pub fn reserve<K, F>(&self, key: K, len: usize, flags: WriteFlags, fill: F) -> Result<()>
    where
        K: AsRef<[u8]>,
        F: FnOnce(&mut [u8]),
    {
        if flags.intersects(WriteFlags::SPECIAL) {
            return Err(Error::invalid_argument("reserve sets RESERVE itself"));
        }
        let txn = self.txn.raw_at(self.generation)?;
        // SAFETY: see get
        let data = unsafe { self.txn.binding().put_reserve(txn, self.dbi, key.as_ref(), len, flags) }?;
        if len == 0 {
            fill(&mut []);
            return Ok(());
        }
        let _busy = BusyGuard::new(self.txn);
        // SAFETY: the engine handed out `len` writable bytes that stay valid
        // until the next write in this transaction, which `busy` forbids.
        let buf = unsafe { std::slice::from_raw_parts_mut(data, len) };
        fill(buf);
        Ok(())
    }

    /// Removes `key` and all of its values; missing keys fail with `NotFound`.
    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<()> {
        let txn = self.txn.raw_at(self.generation)?;
        // SAFETY: see get
        unsafe { self.txn.binding().del(txn, self.dbi, key.as_ref(), None) }
    }

    /// Removes one `key`/`value` pair from a `DUP_SORT` keyspace.
    pub fn delete_value<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> Result<()> {
        let txn = self.txn.raw_at(self.generation)?;
        // SAFETY: see get
        unsafe { self.txn.binding().del(txn, self.dbi, key.as_ref(), Some(value.as_ref())) }
    }

    /// Removes `key`, returning `false` if it was absent.
    pub fn remove<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        Ok(self.delete(key).optional()?.is_some())
    }

    /// B-tree statistics for this keyspace.
    pub fn stat(&self) -> Result<Stat> {
        let txn = self.txn.raw_at(self.generation)?;
        // SAFETY: see get
        unsafe { self.txn.binding().dbi_stat(txn, self.dbi) }
    }

    /// Flags the keyspace was created with.
    pub fn flags(&self) -> Result<DatabaseFlags> {
        let txn = self.txn.raw_at(self.generation)?;
        // SAFETY: see get
        unsafe { self.txn.binding().dbi_flags(txn, self.dbi) }
    }

    /// Deletes every record but keeps the keyspace.
    pub fn empty(&self) -> Result<()> {
        let txn = self.txn.raw_at(self.generation)?;
        // SAFETY: see get
        unsafe { self.txn.binding().dbi_drop(txn, self.dbi, false) }?;
        log::debug!("Emptied keyspace {:?}", self.name);
        Ok(())
    }

    /// Deletes the keyspace itself, consuming the handle.
    ///
    /// Other handles to the same keyspace fail at the engine afterwards.
    pub fn drop_keyspace(self) -> Result<()> {
        let txn = self.txn.raw_at(self.generation)?;
        // SAFETY: see get
        unsafe { self.txn.binding().dbi_drop(txn, self.dbi, true) }?;
        self.txn.forget_primary(self.dbi);
        log::debug!("Dropped keyspace {:?}", self.name);
        Ok(())
    }

    /// Releases this handle without touching the stored data.
    ///
    /// Consuming `self` is the whole release: the handle owns no native
    /// resource of its own, and the borrow on the transaction ends here.
    /// The engine keeps the keyspace identifier registered, so reopening it
    /// later is cheap. Freeing the identifier itself is an environment-wide
    /// operation; see
    /// [`Environment::close_database`](crate::Environment::close_database).
    pub fn close(self) {}

    /// Opens a cursor over this keyspace.
    pub fn cursor(&self) -> Result<Cursor<'txn>> {
        Cursor::open(self.txn, self.dbi, self.generation)
    }
}

/// Marks the transaction busy until dropped, including on unwind.
struct BusyGuard<'a>(&'a Transaction);

impl<'a> BusyGuard<'a> {
    fn new(txn: &'a Transaction) -> Self {
        txn.set_busy(true);
        Self(txn)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.set_busy(false);
    }
}
