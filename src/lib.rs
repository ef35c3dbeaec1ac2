//! # mapkv - Handle-safe bindings over the LMDB memory-mapped key-value engine
//!
//! mapkv opens an embedded, memory-mapped, transactional storage environment
//! and layers resource-lifecycle and scripting semantics on top of the
//! engine's raw handle API. Every native handle is owned by exactly one Rust
//! value and released deterministically on every exit path.
//!
//! ## Architecture
//!
//! Control flows strictly downward through the layers:
//!
//! - **Binding**: typed adapter over the engine's C entry points; turns
//!   nonzero statuses into [`Error::Engine`]
//! - **Environment**: one open storage instance, shared across threads
//! - **Transaction**: nested ACID transactions with snapshot isolation
//! - **Database**: a named or default keyspace within a transaction
//! - **Cursor**: ordered, positionable iteration over a keyspace
//! - **Batch**: conditional point operations run atomically with a report
//! - **Script**: Lua scripts run inside one write transaction
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use mapkv::{Binding, DatabaseFlags, EnvOptions, Environment};
//!
//! # fn main() -> Result<(), mapkv::Error> {
//! // The application owns the binding and the environment
//! let binding = Binding::new()?;
//! let env = Environment::open_with(binding, "./data", &EnvOptions::default())?;
//!
//! // Scoped write: commits on Ok, aborts on Err
//! env.write(|txn| {
//!     txn.set("key1", "value1")?;
//!     let users = txn.database(Some("users"), DatabaseFlags::CREATE)?;
//!     users.set("alice", "admin")?;
//!     Ok(())
//! })?;
//!
//! // Snapshot read
//! if let Some(value) = env.read(|txn| txn.get("key1"))? {
//!     println!("Found: {:?}", value);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod batch;
pub mod binding;
pub mod config;
pub mod cursor;
pub mod database;
pub mod env;
pub mod error;
pub mod flags;
pub mod script;
pub mod service;
pub mod txn;
pub mod value;

pub use binding::{Binding, EnvInfo, Stat, Version};
pub use config::EnvOptions;
pub use cursor::{Cursor, CursorOp, Entry};
pub use database::Database;
pub use env::Environment;
pub use error::{Error, ErrorCategory, ErrorKind, Result, ResultExt};
pub use flags::{DatabaseFlags, EnvFlags, TxnFlags, WriteFlags};
pub use txn::{Transaction, TxnState};
pub use value::{Codec, Value};
