//! Ordered traversal and positional writes over one keyspace.
//!
//! Positioning calls that run off either end of the keyspace return
//! `Ok(None)`. Exact lookups ([`CursorOp::Set`], [`CursorOp::SetKey`],
//! [`CursorOp::GetBoth`]) report a missing key as an error of kind
//! [`ErrorKind::NotFound`](crate::ErrorKind::NotFound), like
//! [`Database::get`](crate::Database::get).
//!
//! # Example
//!
//! ```rust,no_run
//! use mapkv::{Binding, EnvOptions, Environment};
//!
//! # fn main() -> Result<(), mapkv::Error> {
//! let env = Environment::open_with(Binding::new()?, "./data", &EnvOptions::default())?;
//! let txn = env.begin_ro()?;
//! let mut cursor = txn.cursor()?;
//! for entry in cursor.iter_from("user:") {
//!     let (key, value) = entry?;
//!     println!("{:?} => {:?}", key, value);
//! }
//! # Ok(())
//! # }
//! ```

use std::iter::FusedIterator;

use bytes::Bytes;
use libc::c_uint;
use lmdb_sys as ffi;

use crate::binding::{MDB_cursor, MDB_dbi};
use crate::flags::WriteFlags;
use crate::txn::Transaction;
use crate::{Error, ErrorKind, Result};

/// A key/value pair read through a cursor.
pub type Entry = (Bytes, Bytes);

/// Positioning operations understood by [`Cursor::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorOp {
    /// First record.
    First,
    /// First value of the current key (`DUP_SORT`).
    FirstDup,
    /// Exact key and value (`DUP_SORT`).
    GetBoth,
    /// Exact key, nearest value at or after the given one (`DUP_SORT`).
    GetBothRange,
    /// Record at the current position.
    GetCurrent,
    /// Up to a page of values at the current key (`DUP_FIXED`).
    GetMultiple,
    /// Last record.
    Last,
    /// Last value of the current key (`DUP_SORT`).
    LastDup,
    /// Next record.
    Next,
    /// Next value of the current key (`DUP_SORT`).
    NextDup,
    /// Next page of values (`DUP_FIXED`).
    NextMultiple,
    /// First value of the next key (`DUP_SORT`).
    NextNoDup,
    /// Previous record.
    Prev,
    /// Previous value of the current key (`DUP_SORT`).
    PrevDup,
    /// Last value of the previous key (`DUP_SORT`).
    PrevNoDup,
    /// Exact key; the returned key is the one passed in.
    Set,
    /// Exact key; the returned key is the stored one.
    SetKey,
    /// First key at or after the given one.
    SetRange,
}

impl CursorOp {
    fn code(self) -> c_uint {
        match self {
            CursorOp::First => ffi::MDB_FIRST,
            CursorOp::FirstDup => ffi::MDB_FIRST_DUP,
            CursorOp::GetBoth => ffi::MDB_GET_BOTH,
            CursorOp::GetBothRange => ffi::MDB_GET_BOTH_RANGE,
            CursorOp::GetCurrent => ffi::MDB_GET_CURRENT,
            CursorOp::GetMultiple => ffi::MDB_GET_MULTIPLE,
            CursorOp::Last => ffi::MDB_LAST,
            CursorOp::LastDup => ffi::MDB_LAST_DUP,
            CursorOp::Next => ffi::MDB_NEXT,
            CursorOp::NextDup => ffi::MDB_NEXT_DUP,
            CursorOp::NextMultiple => ffi::MDB_NEXT_MULTIPLE,
            CursorOp::NextNoDup => ffi::MDB_NEXT_NODUP,
            CursorOp::Prev => ffi::MDB_PREV,
            CursorOp::PrevDup => ffi::MDB_PREV_DUP,
            CursorOp::PrevNoDup => ffi::MDB_PREV_NODUP,
            CursorOp::Set => ffi::MDB_SET,
            CursorOp::SetKey => ffi::MDB_SET_KEY,
            CursorOp::SetRange => ffi::MDB_SET_RANGE,
        }
    }

    /// Exact lookups treat a miss as an error rather than the end of a sequence.
    fn is_exact(self) -> bool {
        matches!(self, CursorOp::Set | CursorOp::SetKey | CursorOp::GetBoth)
    }
}

/// A positioned handle over one keyspace of a transaction.
pub struct Cursor<'txn> {
    txn: &'txn Transaction,
    raw: *mut MDB_cursor,
    dbi: MDB_dbi,
    generation: u64,
    read_only: bool,
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("dbi", &self.dbi)
            .field("generation", &self.generation)
            .field("read_only", &self.read_only)
            .finish()
    }
}

impl<'txn> Cursor<'txn> {
    pub(crate) fn open(txn: &'txn Transaction, dbi: MDB_dbi, generation: u64) -> Result<Self> {
        let raw_txn = txn.raw_at(generation)?;
        // SAFETY: raw_at only returns the handle of the active transaction.
        let raw = unsafe { txn.binding().cursor_open(raw_txn, dbi) }?;
        Ok(Self { txn, raw, dbi, generation, read_only: txn.is_read_only() })
    }

    fn live(&self) -> Result<()> {
        self.txn.raw_at(self.generation).map(|_| ())
    }

    fn writable(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::invalid_state("cursor writes need a write transaction"));
        }
        self.live()
    }

    /// Engine keyspace identifier the cursor walks.
    pub fn database_handle(&self) -> u32 {
        self.dbi
    }

    /// Runs one positioning operation.
    ///
    /// `key` and `value` are inputs for the ops that take them (`Set*`,
    /// `GetBoth*`) and are ignored otherwise.
    pub fn get(&mut self, op: CursorOp, key: Option<&[u8]>, value: Option<&[u8]>) -> Result<Option<Entry>> {
        match self.position(op, key, value) {
            Err(e) if op.is_exact() || e.kind() != ErrorKind::NotFound => Err(e),
            Err(_) => Ok(None),
            Ok(entry) => Ok(Some(entry)),
        }
    }

    fn position(&mut self, op: CursorOp, key: Option<&[u8]>, value: Option<&[u8]>) -> Result<Entry> {
        self.live()?;
        // SAFETY: the cursor belongs to the live transaction checked above.
        unsafe { self.txn.binding().cursor_get(self.raw, key, value, op.code()) }
    }

    /// Moves to the first record.
    pub fn first(&mut self) -> Result<Option<Entry>> {
        self.get(CursorOp::First, None, None)
    }

    /// Moves to the last record.
    pub fn last(&mut self) -> Result<Option<Entry>> {
        self.get(CursorOp::Last, None, None)
    }

    /// Advances one record; `None` past the end.
    pub fn next(&mut self) -> Result<Option<Entry>> {
        self.get(CursorOp::Next, None, None)
    }

    /// Steps back one record; `None` before the start.
    pub fn prev(&mut self) -> Result<Option<Entry>> {
        self.get(CursorOp::Prev, None, None)
    }

    /// Record at the current position.
    pub fn current(&mut self) -> Result<Entry> {
        self.position(CursorOp::GetCurrent, None, None)
    }

    /// Moves to exactly `key`; fails with `NotFound` if it is absent.
    pub fn set<K: AsRef<[u8]>>(&mut self, key: K) -> Result<Entry> {
        self.position(CursorOp::SetKey, Some(key.as_ref()), None)
    }

    /// Moves to the first key at or after `key`.
    pub fn set_range<K: AsRef<[u8]>>(&mut self, key: K) -> Result<Option<Entry>> {
        self.get(CursorOp::SetRange, Some(key.as_ref()), None)
    }

    /// Next value of the current key in a `DUP_SORT` keyspace.
    pub fn next_dup(&mut self) -> Result<Option<Entry>> {
        self.get(CursorOp::NextDup, None, None)
    }

    /// First value of the next key in a `DUP_SORT` keyspace.
    pub fn next_nodup(&mut self) -> Result<Option<Entry>> {
        self.get(CursorOp::NextNoDup, None, None)
    }

    /// Writes through the cursor, leaving it positioned on the new record.
    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V, flags: WriteFlags) -> Result<()> {
        if flags.intersects(WriteFlags::SPECIAL) {
            return Err(Error::invalid_argument("RESERVE and MULTIPLE are not plain put flags"));
        }
        self.writable()?;
        // SAFETY: see position
        unsafe { self.txn.binding().cursor_put(self.raw, key.as_ref(), value.as_ref(), flags) }
    }

    /// Stores consecutive `item_size`-byte values of `items` as duplicates of
    /// `key` in a `DUP_FIXED` keyspace. Returns the number stored.
    pub fn put_multiple<K: AsRef<[u8]>>(
        &mut self,
        key: K,
        items: &[u8],
        item_size: usize,
        flags: WriteFlags,
    ) -> Result<usize> {
        if item_size == 0 || items.len() % item_size != 0 {
            return Err(Error::invalid_argument(format!(
                "{} bytes is not a whole number of {}-byte items",
                items.len(),
                item_size
            )));
        }
        if items.is_empty() {
            return Ok(0);
        }
        self.writable()?;
        // SAFETY: see position
        unsafe { self.txn.binding().cursor_put_multiple(self.raw, key.as_ref(), items, item_size, flags) }
    }

    /// Deletes the record at the current position.
    ///
    /// With `NO_DUP_DATA` every value of the current key is removed.
    pub fn delete(&mut self, flags: WriteFlags) -> Result<()> {
        self.writable()?;
        // SAFETY: see position
        unsafe { self.txn.binding().cursor_del(self.raw, flags) }
    }

    /// Number of values stored under the current key.
    pub fn count(&self) -> Result<usize> {
        self.live()?;
        // SAFETY: see position
        unsafe { self.txn.binding().cursor_count(self.raw) }
    }

    /// Rebinds a read-only cursor to its transaction's current snapshot,
    /// typically after [`Transaction::reset`] and [`Transaction::renew`].
    pub fn renew(&mut self) -> Result<()> {
        if !self.read_only {
            return Err(Error::invalid_state("only read-only cursors can be renewed"));
        }
        let raw_txn = self.txn.raw()?;
        // SAFETY: read-only cursors outlive their snapshot and may be rebound
        // to any active read-only transaction.
        unsafe { self.txn.binding().cursor_renew(raw_txn, self.raw) }?;
        self.generation = self.txn.generation();
        Ok(())
    }

    /// Iterates every record in key order.
    pub fn iter(&mut self) -> Iter<'_, 'txn> {
        Iter::new(self, CursorOp::First, None, CursorOp::Next)
    }

    /// Iterates every record in reverse key order.
    pub fn iter_rev(&mut self) -> Iter<'_, 'txn> {
        Iter::new(self, CursorOp::Last, None, CursorOp::Prev)
    }

    /// Iterates records from the first key at or after `key`.
    pub fn iter_from<K: AsRef<[u8]>>(&mut self, key: K) -> Iter<'_, 'txn> {
        let key = key.as_ref().to_vec();
        Iter::new(self, CursorOp::SetRange, Some(key), CursorOp::Next)
    }

    /// Iterates the values of `key`; empty if the key is absent.
    pub fn iter_dup_of<K: AsRef<[u8]>>(&mut self, key: K) -> Iter<'_, 'txn> {
        let key = key.as_ref().to_vec();
        Iter::new(self, CursorOp::SetKey, Some(key), CursorOp::NextDup)
    }
}

impl Drop for Cursor<'_> {
    fn drop(&mut self) {
        // Write-transaction cursors are freed by the engine when their
        // transaction ends; read-only ones always need an explicit close.
        if self.read_only || self.txn.holds(self.generation) {
            // SAFETY: the cursor has not been freed by the engine, see above.
            unsafe { self.txn.binding().cursor_close(self.raw) };
        }
    }
}

/// Iterator over cursor records, created by [`Cursor::iter`] and friends.
///
/// Yields `Err` at most once, then stops.
pub struct Iter<'c, 'txn> {
    cursor: &'c mut Cursor<'txn>,
    start: Option<(CursorOp, Option<Vec<u8>>)>,
    step: CursorOp,
    done: bool,
}

impl<'c, 'txn> Iter<'c, 'txn> {
    fn new(cursor: &'c mut Cursor<'txn>, op: CursorOp, key: Option<Vec<u8>>, step: CursorOp) -> Self {
        Self { cursor, start: Some((op, key)), step, done: false }
    }
}

impl Iterator for Iter<'_, '_> {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let result = match self.start.take() {
            Some((op, key)) => self.cursor.position(op, key.as_deref(), None),
            None => self.cursor.position(self.step, None, None),
        };
        match result {
            Ok(entry) => Some(Ok(entry)),
            Err(e) => {
                self.done = true;
                if e.kind() == ErrorKind::NotFound {
                    None
                } else {
                    Some(Err(e))
                }
            }
        }
    }
}

impl FusedIterator for Iter<'_, '_> {}
