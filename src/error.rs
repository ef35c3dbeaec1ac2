//! Error types for mapkv.
//!
//! Every nonzero status returned by the engine becomes an [`Error::Engine`]
//! carrying the numeric code, the engine's own message and a classified
//! [`ErrorKind`]. The remaining variants describe misuse of this layer's
//! handles or failures of the surrounding tooling.

use std::io;

use thiserror::Error;

/// The result type used throughout mapkv.
pub type Result<T> = std::result::Result<T, Error>;

/// Classified engine status, plus the handle-scope kinds raised by this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key/data pair not found.
    NotFound,
    /// Key/data pair already exists.
    KeyExists,
    /// Requested page not found.
    PageNotFound,
    /// Located page was of the wrong type.
    Corrupted,
    /// Update of meta page failed or environment had a fatal error.
    Panic,
    /// Environment version mismatch.
    VersionMismatch,
    /// File is not a valid storage file.
    Invalid,
    /// Environment map size reached.
    MapFull,
    /// Environment maximum keyspace count reached.
    DbsFull,
    /// Environment maximum reader count reached.
    ReadersFull,
    /// Too many thread-local storage keys in use.
    TlsFull,
    /// Transaction has too many dirty pages.
    TxnFull,
    /// Cursor stack too deep.
    CursorFull,
    /// Page has not enough space.
    PageFull,
    /// Database contents grew beyond the environment map size.
    MapResized,
    /// Operation and keyspace flags are incompatible.
    Incompatible,
    /// Invalid reuse of a reader locktable slot.
    BadRslot,
    /// Transaction must abort, has a child, or is invalid.
    BadTxn,
    /// Unsupported size of key, keyspace name or data.
    BadValSize,
    /// The keyspace handle was changed unexpectedly.
    BadDbi,
    /// An operating system error (positive `errno`).
    Os,
    /// The environment handle is not open.
    NotOpen,
    /// A handle was used outside the scope that owns it.
    StaleHandle,
    /// Anything this layer cannot classify further.
    Other,
}

/// Coarse grouping of [`ErrorKind`]s by what the caller can do about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The key is absent.
    Absent,
    /// A no-overwrite write hit an existing key.
    Conflict,
    /// On-disk inconsistency; must not be retried.
    Fatal,
    /// A resource limit was reached; recoverable by caller action.
    Exhausted,
    /// The call or the environment is misused; fix the call.
    Misuse,
    /// A handle was used outside its valid scope.
    Scope,
    /// The operating system refused the operation.
    System,
}

impl ErrorKind {
    /// Classifies an engine status code.
    pub fn from_code(code: i32) -> Self {
        match code {
            lmdb_sys::MDB_NOTFOUND => ErrorKind::NotFound,
            lmdb_sys::MDB_KEYEXIST => ErrorKind::KeyExists,
            lmdb_sys::MDB_PAGE_NOTFOUND => ErrorKind::PageNotFound,
            lmdb_sys::MDB_CORRUPTED => ErrorKind::Corrupted,
            lmdb_sys::MDB_PANIC => ErrorKind::Panic,
            lmdb_sys::MDB_VERSION_MISMATCH => ErrorKind::VersionMismatch,
            lmdb_sys::MDB_INVALID => ErrorKind::Invalid,
            lmdb_sys::MDB_MAP_FULL => ErrorKind::MapFull,
            lmdb_sys::MDB_DBS_FULL => ErrorKind::DbsFull,
            lmdb_sys::MDB_READERS_FULL => ErrorKind::ReadersFull,
            lmdb_sys::MDB_TLS_FULL => ErrorKind::TlsFull,
            lmdb_sys::MDB_TXN_FULL => ErrorKind::TxnFull,
            lmdb_sys::MDB_CURSOR_FULL => ErrorKind::CursorFull,
            lmdb_sys::MDB_PAGE_FULL => ErrorKind::PageFull,
            lmdb_sys::MDB_MAP_RESIZED => ErrorKind::MapResized,
            lmdb_sys::MDB_INCOMPATIBLE => ErrorKind::Incompatible,
            lmdb_sys::MDB_BAD_RSLOT => ErrorKind::BadRslot,
            lmdb_sys::MDB_BAD_TXN => ErrorKind::BadTxn,
            lmdb_sys::MDB_BAD_VALSIZE => ErrorKind::BadValSize,
            lmdb_sys::MDB_BAD_DBI => ErrorKind::BadDbi,
            libc::EINVAL => ErrorKind::Invalid,
            code if code > 0 => ErrorKind::Os,
            _ => ErrorKind::Other,
        }
    }

    /// Returns the category this kind belongs to.
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::NotFound => ErrorCategory::Absent,
            ErrorKind::KeyExists => ErrorCategory::Conflict,
            ErrorKind::Corrupted | ErrorKind::Panic | ErrorKind::PageNotFound => {
                ErrorCategory::Fatal
            }
            ErrorKind::MapFull
            | ErrorKind::DbsFull
            | ErrorKind::ReadersFull
            | ErrorKind::TlsFull
            | ErrorKind::TxnFull
            | ErrorKind::CursorFull
            | ErrorKind::PageFull
            | ErrorKind::MapResized => ErrorCategory::Exhausted,
            ErrorKind::Invalid
            | ErrorKind::BadValSize
            | ErrorKind::Incompatible
            | ErrorKind::VersionMismatch
            | ErrorKind::Other => ErrorCategory::Misuse,
            ErrorKind::BadTxn
            | ErrorKind::BadRslot
            | ErrorKind::BadDbi
            | ErrorKind::NotOpen
            | ErrorKind::StaleHandle => ErrorCategory::Scope,
            ErrorKind::Os => ErrorCategory::System,
        }
    }
}

/// The error type for mapkv operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine returned a nonzero status.
    #[error("engine error {code}: {message}")]
    Engine {
        /// Classified status.
        kind: ErrorKind,
        /// Raw status code as returned by the engine.
        code: i32,
        /// The engine's message for `code`.
        message: String,
    },

    /// The environment handle has not been created or was closed.
    #[error("environment is not open")]
    NotOpen,

    /// A transaction, keyspace or cursor handle outlived its scope.
    #[error("stale handle: {0}")]
    StaleHandle(String),

    /// The handle is in the wrong state for the requested operation.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An invalid argument was provided.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The environment cannot be closed while native transactions are alive.
    #[error("{0} transaction(s) still open against the environment")]
    TransactionsOpen(usize),

    /// An I/O error occurred outside the engine.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A Lua script failed.
    #[error("script error: {0}")]
    Script(String),
}

impl Error {
    /// Creates a stale handle error.
    pub fn stale(what: impl Into<String>) -> Self {
        Error::StaleHandle(what.into())
    }

    /// Creates an invalid state error.
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Returns the classified kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Engine { kind, .. } => *kind,
            Error::NotOpen => ErrorKind::NotOpen,
            Error::StaleHandle(_) => ErrorKind::StaleHandle,
            Error::InvalidState(_) | Error::TransactionsOpen(_) => ErrorKind::BadTxn,
            Error::InvalidArgument(_) => ErrorKind::Invalid,
            Error::Io(_) => ErrorKind::Os,
            Error::Serialization(_) | Error::Script(_) => ErrorKind::Other,
        }
    }

    /// Returns the engine status code, if this error came from the engine.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True if the key was absent.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// True if the caller may retry after freeing resources.
    pub fn is_retryable(&self) -> bool {
        self.kind().category() == ErrorCategory::Exhausted
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Maps the not-found case of a result onto `Option`.
pub trait ResultExt<T> {
    /// Turns `Err(NotFound)` into `Ok(None)` and leaves every other error intact.
    fn optional(self) -> Result<Option<T>>;
}

impl<T> ResultExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
