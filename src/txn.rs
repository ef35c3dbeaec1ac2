//! Transactions and their state machine.
//!
//! ```text
//!            begin()                 commit()
//!   (new) ──────────► Active ─────────────────► Committed
//!                      │  ▲  ╲   abort()
//!              reset() │  │   ╲───────────────► Aborted
//!                      ▼  │ renew()
//!                      Reset
//!
//!   Committed / Aborted ──begin()──► Active   (wrapper reuse)
//! ```
//!
//! Every transition out of `Active` bumps the transaction's generation.
//! [`Database`] and [`Cursor`] handles remember the generation they were
//! opened in and fail with [`Error::StaleHandle`] once it has moved on, so a
//! handle can never reach the engine after its transaction is gone.
//!
//! Nested transactions keep a weak link to their parent; the parent keeps
//! weak links to its children and aborts any still-active child before it
//! resolves itself. While a child is active the parent refuses every other
//! operation.

use std::cell::Cell;
use std::cell::RefCell;
use std::ptr;
use std::rc::{Rc, Weak};

use bytes::Bytes;

use crate::binding::{Binding, MDB_dbi, MDB_txn};
use crate::cursor::Cursor;
use crate::database::Database;
use crate::env::Environment;
use crate::error::ResultExt;
use crate::flags::{DatabaseFlags, TxnFlags, WriteFlags};
use crate::{Error, Result};

/// Lifecycle state of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Holds a live snapshot and accepts operations.
    Active,
    /// Read-only transaction whose snapshot was released by `reset()`.
    Reset,
    /// Committed; no native handle.
    Committed,
    /// Aborted (or failed to commit); no native handle.
    Aborted,
}

impl TxnState {
    /// True for `Committed` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

pub(crate) struct TxnInner {
    env: Environment,
    raw: Cell<*mut MDB_txn>,
    state: Cell<TxnState>,
    generation: Cell<u64>,
    flags: Cell<TxnFlags>,
    parent: RefCell<Option<Weak<TxnInner>>>,
    children: RefCell<Vec<Weak<TxnInner>>>,
    primary: Cell<Option<MDB_dbi>>,
    /// Set while an engine-owned reserve buffer is handed out.
    busy: Cell<bool>,
}

impl TxnInner {
    fn binding(&self) -> &Binding {
        self.env.binding()
    }

    fn has_active_child(&self) -> bool {
        self.children
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .any(|child| !child.state.get().is_terminal())
    }

    fn raw_for_use(&self) -> Result<*mut MDB_txn> {
        match self.state.get() {
            TxnState::Active => {}
            TxnState::Reset => return Err(Error::stale("transaction is reset; renew it first")),
            TxnState::Committed | TxnState::Aborted => {
                return Err(Error::stale("transaction is already finished"))
            }
        }
        if self.busy.get() {
            return Err(Error::invalid_state("a reserved value is still being filled"));
        }
        if self.has_active_child() {
            return Err(Error::invalid_state("transaction has an active child transaction"));
        }
        Ok(self.raw.get())
    }

    fn raw_at(&self, generation: u64) -> Result<*mut MDB_txn> {
        if generation != self.generation.get() {
            return Err(Error::stale("handle was opened in an earlier transaction"));
        }
        self.raw_for_use()
    }

    /// Aborts children first; the engine would otherwise free them behind our back.
    fn resolve_children(&self) {
        let children: Vec<_> = self.children.borrow_mut().drain(..).collect();
        for child in children.iter().filter_map(Weak::upgrade) {
            if !child.state.get().is_terminal() {
                log::debug!("Aborting active child before its parent resolves");
                child.abort();
            }
        }
    }

    /// Invalidates every Database and Cursor handed out so far.
    fn invalidate(&self) {
        self.generation.set(self.generation.get() + 1);
        self.primary.set(None);
    }

    fn begin(self: &Rc<Self>, parent: Option<Rc<TxnInner>>, flags: TxnFlags) -> Result<()> {
        match self.state.get() {
            TxnState::Active => return Err(Error::invalid_state("transaction is already active")),
            TxnState::Reset => self.abort(),
            TxnState::Committed | TxnState::Aborted => {}
        }

        let parent_raw = match &parent {
            Some(p) => p.raw_for_use()?,
            None => ptr::null_mut(),
        };
        let raw = self.env.begin_native(parent_raw, flags)?;

        self.raw.set(raw);
        self.flags.set(flags);
        self.state.set(TxnState::Active);

        let me = Rc::downgrade(self);
        if let Some(p) = &parent {
            let mut children = p.children.borrow_mut();
            children.retain(|c| c.strong_count() > 0 && !c.ptr_eq(&me));
            children.push(me);
        }
        *self.parent.borrow_mut() = parent.as_ref().map(Rc::downgrade);

        log::debug!("Transaction began (flags {:?}, nested: {})", flags, parent.is_some());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        match self.state.get() {
            TxnState::Committed | TxnState::Aborted => return Ok(()),
            TxnState::Reset => {
                self.abort();
                return Ok(());
            }
            TxnState::Active => {}
        }
        if self.busy.get() {
            return Err(Error::invalid_state("a reserved value is still being filled"));
        }

        self.resolve_children();
        self.invalidate();
        let raw = self.raw.replace(ptr::null_mut());
        // SAFETY: raw is the live handle of an active transaction with no children.
        let result = unsafe { self.binding().txn_commit(raw) };
        self.env.release_native();

        match result {
            Ok(()) => {
                self.state.set(TxnState::Committed);
                log::debug!("Transaction committed");
                Ok(())
            }
            Err(e) => {
                // The engine frees the handle on failed commits too.
                self.state.set(TxnState::Aborted);
                log::warn!("Transaction commit failed: {}", e);
                Err(e)
            }
        }
    }

    fn abort(&self) {
        if self.state.get().is_terminal() {
            return;
        }
        self.resolve_children();
        self.invalidate();
        let raw = self.raw.replace(ptr::null_mut());
        if !raw.is_null() {
            // SAFETY: raw is live (active or reset) and its children are gone.
            unsafe { self.binding().txn_abort(raw) };
            self.env.release_native();
        }
        self.state.set(TxnState::Aborted);
        log::debug!("Transaction aborted");
    }
}

impl Drop for TxnInner {
    fn drop(&mut self) {
        if !self.state.get().is_terminal() {
            if self.flags.get().contains(TxnFlags::READ_ONLY) {
                log::debug!("Read transaction dropped while {:?}; aborting", self.state.get());
            } else {
                log::warn!("Write transaction dropped without commit; aborting");
            }
            self.abort();
        }
    }
}

/// An atomic unit of work with snapshot isolation.
///
/// A `Transaction` is bound to the thread that created it. Dropping it while
/// active aborts it; [`run`](Transaction::run) commits on success and aborts
/// on failure.
pub struct Transaction {
    inner: Rc<TxnInner>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("state", &self.inner.state.get())
            .field("flags", &self.inner.flags.get())
            .field("generation", &self.inner.generation.get())
            .finish()
    }
}

impl Transaction {
    pub(crate) fn new(env: Environment, parent: Option<&Transaction>, flags: TxnFlags) -> Result<Self> {
        let inner = Rc::new(TxnInner {
            env,
            raw: Cell::new(ptr::null_mut()),
            state: Cell::new(TxnState::Aborted),
            generation: Cell::new(0),
            flags: Cell::new(flags),
            parent: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            primary: Cell::new(None),
            busy: Cell::new(false),
        });
        inner.begin(parent.map(|p| Rc::clone(&p.inner)), flags)?;
        Ok(Self { inner })
    }

    /// Begins a new native transaction in this wrapper.
    ///
    /// Valid from `Committed` or `Aborted`; a reset transaction is aborted
    /// first. Fails with an engine error on reader-slot exhaustion, map-full
    /// or thread incompatibility.
    pub fn begin(&self, parent: Option<&Transaction>, flags: TxnFlags) -> Result<()> {
        self.inner.begin(parent.map(|p| Rc::clone(&p.inner)), flags)
    }

    /// Begins a child transaction whose engine parent is `self`.
    pub fn transaction(&self, flags: TxnFlags) -> Result<Transaction> {
        Transaction::new(self.inner.env.clone(), Some(self), flags)
    }

    /// Commits. A no-op on a finished transaction.
    ///
    /// Active children are aborted and every Database/Cursor handle opened
    /// here is invalidated before the engine commit. On failure the
    /// transaction ends up `Aborted`.
    pub fn commit(&self) -> Result<()> {
        self.inner.commit()
    }

    /// Aborts, discarding every uncommitted write. Always succeeds.
    pub fn abort(&self) {
        self.inner.abort()
    }

    /// Releases the snapshot of a read-only transaction, keeping the wrapper.
    pub fn reset(&self) -> Result<()> {
        if !self.is_read_only() {
            return Err(Error::invalid_state("only read-only transactions can be reset"));
        }
        if self.inner.state.get() != TxnState::Active {
            return Err(Error::invalid_state("only an active transaction can be reset"));
        }
        self.inner.invalidate();
        // SAFETY: the transaction is active and read-only, so it has no children.
        unsafe { self.inner.binding().txn_reset(self.inner.raw.get()) };
        self.inner.state.set(TxnState::Reset);
        log::debug!("Transaction reset");
        Ok(())
    }

    /// Acquires a fresh snapshot after [`reset`](Self::reset).
    pub fn renew(&self) -> Result<()> {
        if self.inner.state.get() != TxnState::Reset {
            return Err(Error::invalid_state("renew requires a reset transaction"));
        }
        // SAFETY: a reset transaction still owns its native handle.
        unsafe { self.inner.binding().txn_renew(self.inner.raw.get()) }?;
        self.inner.state.set(TxnState::Active);
        log::debug!("Transaction renewed");
        Ok(())
    }

    /// Runs `f` inside this transaction: commits on `Ok`, aborts on `Err`.
    ///
    /// A finished transaction is begun again with its previous parent and
    /// flags, and a reset one is renewed, so the wrapper can be reused for
    /// several scoped blocks.
    ///
    /// # Arguments
    ///
    /// * `f` - Body of the transaction; its `Err` aborts
    ///
    /// # Errors
    ///
    /// Returns the error from `f` after aborting, or the engine error from
    /// restarting or committing. A failed commit leaves the transaction
    /// aborted. [`Error::StaleHandle`] means the parent of a finished child
    /// is already gone.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mapkv::{Binding, EnvOptions, Environment};
    ///
    /// # fn main() -> Result<(), mapkv::Error> {
    /// let env = Environment::open_with(Binding::new()?, "./data", &EnvOptions::default())?;
    /// let txn = env.begin_rw()?;
    /// txn.run(|txn| txn.set("a", "1"))?;
    /// // Committed above; the same wrapper begins again
    /// let found = txn.run(|txn| txn.contains("a"))?;
    /// assert!(found);
    /// # Ok(())
    /// # }
    /// ```
    pub fn run<R>(&self, f: impl FnOnce(&Transaction) -> Result<R>) -> Result<R> {
        self.restart()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }

    fn restart(&self) -> Result<()> {
        match self.inner.state.get() {
            TxnState::Active => Ok(()),
            TxnState::Reset => self.renew(),
            TxnState::Committed | TxnState::Aborted => {
                let link = self.inner.parent.borrow().clone();
                let parent = match link {
                    Some(weak) => {
                        Some(weak.upgrade().ok_or_else(|| Error::stale("parent transaction is gone"))?)
                    }
                    None => None,
                };
                self.inner.begin(parent, self.inner.flags.get())
            }
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.inner.state.get()
    }

    /// True while the transaction accepts operations.
    pub fn is_active(&self) -> bool {
        self.inner.state.get() == TxnState::Active
    }

    /// True if the transaction was begun read-only.
    pub fn is_read_only(&self) -> bool {
        self.inner.flags.get().contains(TxnFlags::READ_ONLY)
    }

    /// Flags the current (or last) native transaction was begun with.
    pub fn flags(&self) -> TxnFlags {
        self.inner.flags.get()
    }

    /// The environment this transaction belongs to.
    pub fn environment(&self) -> &Environment {
        &self.inner.env
    }

    /// Opens a keyspace; `None` names the environment's default keyspace.
    pub fn database(&self, name: Option<&str>, flags: DatabaseFlags) -> Result<Database<'_>> {
        let raw = self.inner.raw_for_use()?;
        // SAFETY: raw_for_use only returns the handle of an active transaction.
        let dbi = unsafe { self.inner.binding().dbi_open(raw, name, flags) }?;
        Ok(Database::new(self, dbi, self.inner.generation.get(), name.map(str::to_owned)))
    }

    /// The memoized default keyspace of this transaction.
    pub fn primary_database(&self) -> Result<Database<'_>> {
        if let Some(dbi) = self.inner.primary.get() {
            self.inner.raw_for_use()?;
            return Ok(Database::new(self, dbi, self.inner.generation.get(), None));
        }
        let db = self.database(None, DatabaseFlags::empty())?;
        self.inner.primary.set(Some(db.handle()));
        Ok(db)
    }

    /// Looks up `key` in the primary database; `None` if absent.
    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Bytes>> {
        self.primary_database()?.get(key).optional()
    }

    /// Stores `value` under `key` in the primary database, overwriting.
    pub fn set<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> Result<()> {
        self.primary_database()?.put(key, value, WriteFlags::empty())
    }

    /// Stores `value` under `key` in the primary database with explicit flags.
    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V, flags: WriteFlags) -> Result<()> {
        self.primary_database()?.put(key, value, flags)
    }

    /// Removes `key` from the primary database; `false` if it was absent.
    pub fn delete<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        self.primary_database()?.remove(key)
    }

    /// True if `key` is present in the primary database.
    pub fn contains<K: AsRef<[u8]>>(&self, key: K) -> Result<bool> {
        self.primary_database()?.contains(key)
    }

    /// Opens a cursor over the primary database.
    pub fn cursor(&self) -> Result<Cursor<'_>> {
        self.primary_database()?.cursor()
    }

    pub(crate) fn binding(&self) -> &Binding {
        self.inner.binding()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.inner.generation.get()
    }

    pub(crate) fn raw(&self) -> Result<*mut MDB_txn> {
        self.inner.raw_for_use()
    }

    pub(crate) fn raw_at(&self, generation: u64) -> Result<*mut MDB_txn> {
        self.inner.raw_at(generation)
    }

    /// True while the native handle behind `generation` is still owned by this wrapper.
    pub(crate) fn holds(&self, generation: u64) -> bool {
        generation == self.inner.generation.get() && !self.inner.state.get().is_terminal()
    }

    pub(crate) fn forget_primary(&self, dbi: MDB_dbi) {
        if self.inner.primary.get() == Some(dbi) {
            self.inner.primary.set(None);
        }
    }

    pub(crate) fn set_busy(&self, busy: bool) {
        self.inner.busy.set(busy);
    }
}
