//! Lua scripts that run inside one write transaction.
//!
//! A script sees a global `db` table bound to a keyspace of the current
//! transaction:
//!
//! | Function | Returns |
//! |---|---|
//! | `db.get(key)` | value string, or `nil` |
//! | `db.put(key, value)` | nothing |
//! | `db.delete(key)` | `true` if the key existed |
//! | `db.contains(key)` | boolean |
//!
//! Reads observe the script's own earlier writes. Normal completion commits;
//! any Lua error, including hitting the timeout, aborts the transaction.
//!
//! # Example
//!
//! ```rust,no_run
//! use mapkv::script::LuaExecutor;
//! use mapkv::{Binding, EnvOptions, Environment};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), mapkv::Error> {
//! let env = Environment::open_with(Binding::new()?, "./data", &EnvOptions::default())?;
//! let executor = LuaExecutor::new(env, Some(Duration::from_secs(5)));
//!
//! // Transfer credits between accounts
//! executor.execute(r#"
//!     local balance1 = tonumber(db.get("account:1:balance"))
//!     local balance2 = tonumber(db.get("account:2:balance"))
//!     if balance1 < 100 then
//!         error("Insufficient balance")
//!     end
//!     db.put("account:1:balance", tostring(balance1 - 100))
//!     db.put("account:2:balance", tostring(balance2 + 100))
//! "#)?;
//! # Ok(())
//! # }
//! ```

pub mod lua_executor;

pub use lua_executor::LuaExecutor;
