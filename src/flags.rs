//! Typed bitmasks for the engine's open, transaction and write flags.

use bitflags::bitflags;
use libc::c_uint;

bitflags! {
    /// Flags accepted when opening an environment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
    #[serde(transparent)]
    pub struct EnvFlags: c_uint {
        /// Use a fixed address for the memory map.
        const FIXED_MAP = lmdb_sys::MDB_FIXEDMAP;
        /// The path names a single file instead of a directory.
        const NO_SUB_DIR = lmdb_sys::MDB_NOSUBDIR;
        /// Open the environment read-only.
        const READ_ONLY = lmdb_sys::MDB_RDONLY;
        /// Don't flush system buffers to disk when committing.
        const NO_SYNC = lmdb_sys::MDB_NOSYNC;
        /// Flush system buffers but omit the metadata flush.
        const NO_META_SYNC = lmdb_sys::MDB_NOMETASYNC;
        /// Use a writeable memory map.
        const WRITE_MAP = lmdb_sys::MDB_WRITEMAP;
        /// Use asynchronous flushes with `WRITE_MAP`.
        const MAP_ASYNC = lmdb_sys::MDB_MAPASYNC;
        /// Tie reader slots to transactions instead of threads.
        const NO_TLS = lmdb_sys::MDB_NOTLS;
        /// Leave locking to the caller.
        const NO_LOCK = lmdb_sys::MDB_NOLOCK;
        /// Turn off readahead.
        const NO_READAHEAD = lmdb_sys::MDB_NORDAHEAD;
        /// Don't initialize malloc'd memory before writing.
        const NO_MEM_INIT = lmdb_sys::MDB_NOMEMINIT;
    }
}

bitflags! {
    /// Flags accepted when beginning a transaction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TxnFlags: c_uint {
        /// The transaction will not perform any writes.
        const READ_ONLY = lmdb_sys::MDB_RDONLY;
    }
}

bitflags! {
    /// Flags accepted when opening a keyspace.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DatabaseFlags: c_uint {
        /// Compare keys in reverse byte order.
        const REVERSE_KEY = lmdb_sys::MDB_REVERSEKEY;
        /// Allow duplicate values per key, kept sorted.
        const DUP_SORT = lmdb_sys::MDB_DUPSORT;
        /// Keys are native-endian unsigned integers.
        const INTEGER_KEY = lmdb_sys::MDB_INTEGERKEY;
        /// Duplicate values all have the same size.
        const DUP_FIXED = lmdb_sys::MDB_DUPFIXED;
        /// Duplicate values are native-endian unsigned integers.
        const INTEGER_DUP = lmdb_sys::MDB_INTEGERDUP;
        /// Compare duplicate values in reverse byte order.
        const REVERSE_DUP = lmdb_sys::MDB_REVERSEDUP;
        /// Create the keyspace if it doesn't exist.
        const CREATE = lmdb_sys::MDB_CREATE;
    }
}

bitflags! {
    /// Flags accepted by record and cursor writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteFlags: c_uint {
        /// Fail with `KeyExists` if the key is already present.
        const NO_OVERWRITE = lmdb_sys::MDB_NOOVERWRITE;
        /// Fail with `KeyExists` if the key/value pair is already present.
        const NO_DUP_DATA = lmdb_sys::MDB_NODUPDATA;
        /// Replace the record at the cursor's current position.
        const CURRENT = lmdb_sys::MDB_CURRENT;
        /// Reserve space for the value without copying it.
        const RESERVE = lmdb_sys::MDB_RESERVE;
        /// Append at the end of the keyspace; input must be sorted.
        const APPEND = lmdb_sys::MDB_APPEND;
        /// Append a duplicate at the end of its key; input must be sorted.
        const APPEND_DUP = lmdb_sys::MDB_APPENDDUP;
        /// Store several fixed-size duplicates in one call.
        const MULTIPLE = lmdb_sys::MDB_MULTIPLE;
    }
}

impl WriteFlags {
    /// Flags that need a dedicated call shape rather than a plain put.
    pub(crate) const SPECIAL: WriteFlags = WriteFlags::RESERVE.union(WriteFlags::MULTIPLE);
}
