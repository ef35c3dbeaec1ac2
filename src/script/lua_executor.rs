//! LuaExecutor binds a Lua VM to an engine transaction.

use std::time::{Duration, Instant};

use mlua::Lua;

use crate::database::Database;
use crate::env::Environment;
use crate::flags::DatabaseFlags;
use crate::txn::Transaction;
use crate::{Error, Result};

/// Runs Lua scripts against an environment, one write transaction per script.
///
/// # Example
///
/// ```rust,no_run
/// use mapkv::script::LuaExecutor;
/// use mapkv::{Binding, EnvOptions, Environment};
///
/// # fn main() -> Result<(), mapkv::Error> {
/// let env = Environment::open_with(Binding::new()?, "./data", &EnvOptions::default())?;
/// let executor = LuaExecutor::new(env, None);
///
/// let result = executor.execute_with_result(r#"
///     db.put("counter", "1")
///     return "Operation completed"
/// "#)?;
/// assert_eq!(result, Some("Operation completed".to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LuaExecutor {
    env: Environment,

    /// Maximum script execution time
    timeout: Option<Duration>,

    /// Keyspace bound to `db`; the default keyspace when `None`
    database: Option<String>,
}

impl LuaExecutor {
    /// Creates a new LuaExecutor over the default keyspace.
    pub fn new(env: Environment, timeout: Option<Duration>) -> Self {
        Self { env, timeout, database: None }
    }

    /// Binds `db` to the named keyspace, creating it on first use.
    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    /// Sets the timeout for script execution.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Gets the current timeout setting.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Executes a script, committing its writes if it completes.
    ///
    /// The script runs in a fresh Lua state with `db` bound to this
    /// executor's keyspace inside one write transaction.
    ///
    /// # Arguments
    ///
    /// * `script` - Lua source to run
    ///
    /// # Errors
    ///
    /// Returns [`Error::Script`] if the script fails to compile, raises an
    /// error or runs past the timeout. Engine failures from `db` calls come
    /// back the same way. In every error case the transaction is aborted
    /// and nothing the script wrote is kept.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use mapkv::script::LuaExecutor;
    /// use mapkv::{Binding, EnvOptions, Environment};
    ///
    /// # fn main() -> Result<(), mapkv::Error> {
    /// let env = Environment::open_with(Binding::new()?, "./data", &EnvOptions::default())?;
    /// let executor = LuaExecutor::new(env.clone(), None);
    ///
    /// executor.execute(r#"db.put("key1", "value1")"#)?;
    ///
    /// // Rolled back: key2 is never written
    /// assert!(executor.execute(r#"db.put("key2", "x") error("boom")"#).is_err());
    /// assert!(!env.read(|txn| txn.contains("key2"))?);
    /// # Ok(())
    /// # }
    /// ```
    pub fn execute(&self, script: &str) -> Result<()> {
        self.execute_with_result(script).map(|_| ())
    }

    /// Executes a script and returns its return value rendered as a string.
    ///
    /// `nil` (or no return) gives `None`.
    pub fn execute_with_result(&self, script: &str) -> Result<Option<String>> {
        let start_time = Instant::now();
        let lua = Lua::new();

        if let Some(timeout) = self.timeout {
            lua.set_hook(
                mlua::HookTriggers { every_nth_instruction: Some(1000), ..Default::default() },
                move |_lua, _debug| {
                    if start_time.elapsed() > timeout {
                        Err(mlua::Error::RuntimeError("Script execution timeout".to_string()))
                    } else {
                        Ok(())
                    }
                },
            );
        }

        let txn = self.env.begin_rw()?;
        let result = self.run(&lua, &txn, script);

        match result {
            Ok(value) => {
                txn.commit()?;
                log::info!("Lua script executed successfully in {:?}", start_time.elapsed());
                Ok(value)
            }
            Err(e) => {
                txn.abort();
                log::warn!("Lua script failed: {}", e);
                Err(e)
            }
        }
    }

    fn open<'t>(&self, txn: &'t Transaction) -> Result<Database<'t>> {
        match &self.database {
            None => txn.primary_database(),
            Some(name) => txn.database(Some(name.as_str()), DatabaseFlags::CREATE),
        }
    }

    fn run(&self, lua: &Lua, txn: &Transaction, script: &str) -> Result<Option<String>> {
        let db = self.open(txn)?;
        let db = &db;

        let result = lua.scope(|scope| {
            let table = lua.create_table()?;

            table.set(
                "get",
                scope.create_function(move |lua, key: mlua::String<'_>| {
                    match db.find(key.as_bytes()).map_err(mlua::Error::external)? {
                        Some(value) => Ok(mlua::Value::String(lua.create_string(&value)?)),
                        None => Ok(mlua::Value::Nil),
                    }
                })?,
            )?;
            table.set(
                "put",
                scope.create_function(move |_, (key, value): (mlua::String<'_>, mlua::String<'_>)| {
                    db.set(key.as_bytes(), value.as_bytes()).map_err(mlua::Error::external)
                })?,
            )?;
            table.set(
                "delete",
                scope.create_function(move |_, key: mlua::String<'_>| {
                    db.remove(key.as_bytes()).map_err(mlua::Error::external)
                })?,
            )?;
            table.set(
                "contains",
                scope.create_function(move |_, key: mlua::String<'_>| {
                    db.contains(key.as_bytes()).map_err(mlua::Error::external)
                })?,
            )?;

            lua.globals().set("db", table)?;
            let value = lua.load(script).set_name("script").eval::<mlua::Value<'_>>()?;
            Ok(render(value))
        });

        result.map_err(|e| Error::Script(format!("Lua script failed: {}", e)))
    }
}

fn render(value: mlua::Value<'_>) -> Option<String> {
    match value {
        mlua::Value::Nil => None,
        mlua::Value::String(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        mlua::Value::Boolean(b) => Some(b.to_string()),
        mlua::Value::Integer(i) => Some(i.to_string()),
        mlua::Value::Number(n) => Some(n.to_string()),
        other => Some(format!("{:?}", other)),
    }
}
