//! Typed point-access, batch and dump operations for an external front end.
//!
//! [`KvService`] is what a network layer would call per request; it owns no
//! routing or parsing. [`ErrorResponse`] and [`SuccessResponse`] are the JSON
//! bodies such a layer returns.

use bytes::Bytes;
use serde::Serialize;

use crate::batch::{BatchExecutor, BatchReport, BatchRequest, Dump};
use crate::env::Environment;
use crate::error::ResultExt;
use crate::flags::DatabaseFlags;
use crate::txn::Transaction;
use crate::{Database, Error, ErrorKind, Result};

/// Service name reported when none is configured.
pub const DEFAULT_NAME: &str = "!";

/// Answer of [`KvService::info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    /// Crate version.
    pub version: String,
    /// Configured service name.
    pub name: String,
}

/// Body returned after a successful point write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuccessResponse {
    /// Always `"success"`.
    pub message: &'static str,
    /// Operation that succeeded: `set`, `delete` or `transaction`.
    pub success: &'static str,
    /// Key the operation applied to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Batch report for `transaction`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<BatchReport>,
}

impl SuccessResponse {
    fn new(success: &'static str, key: Option<&str>) -> Self {
        Self { message: "success", success, key: key.map(str::to_owned), report: None }
    }
}

/// Body returned when an operation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// Always `"exception"`.
    pub message: &'static str,
    /// `not_found` or `engine_error`.
    pub exception: &'static str,
    /// Engine status code, when the engine produced the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    /// Error message, absent for plain misses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Key the request was about.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl ErrorResponse {
    /// Builds the body for `err` raised while handling `key`.
    pub fn from_error(err: &Error, key: Option<&str>) -> Self {
        let key = key.map(str::to_owned);
        if err.kind() == ErrorKind::NotFound {
            return Self { message: "exception", exception: "not_found", errno: None, msg: None, key };
        }
        let msg = match err {
            Error::Engine { message, .. } => message.clone(),
            other => other.to_string(),
        };
        Self { message: "exception", exception: "engine_error", errno: err.code(), msg: Some(msg), key }
    }

    /// Body for a key that is absent.
    pub fn not_found(key: &str) -> Self {
        Self {
            message: "exception",
            exception: "not_found",
            errno: None,
            msg: None,
            key: Some(key.to_owned()),
        }
    }

    /// HTTP-style status: 404 for misses, 500 otherwise.
    pub fn status(&self) -> u16 {
        if self.exception == "not_found" {
            404
        } else {
            500
        }
    }
}

/// Point-access service over one keyspace.
#[derive(Debug, Clone)]
pub struct KvService {
    env: Environment,
    name: String,
    database: Option<String>,
}

impl KvService {
    /// Service over the environment's default keyspace.
    pub fn new(env: Environment) -> Self {
        Self { env, name: DEFAULT_NAME.to_string(), database: None }
    }

    /// Sets the reported service name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Targets a named keyspace; writes create it if needed.
    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    /// The environment behind the service.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    fn open<'t>(&self, txn: &'t Transaction) -> Result<Database<'t>> {
        match &self.database {
            None => txn.primary_database(),
            Some(name) => {
                let flags = if txn.is_read_only() { DatabaseFlags::empty() } else { DatabaseFlags::CREATE };
                txn.database(Some(name.as_str()), flags)
            }
        }
    }

    fn executor(&self) -> BatchExecutor {
        let executor = BatchExecutor::new(self.env.clone());
        match &self.database {
            Some(name) => executor.with_database(name.clone()),
            None => executor,
        }
    }

    /// Version and name of the service.
    pub fn info(&self) -> ServiceInfo {
        ServiceInfo { version: env!("CARGO_PKG_VERSION").to_string(), name: self.name.clone() }
    }

    /// Value stored under `key`, or `None`.
    ///
    /// A named keyspace that was never written reads as empty.
    pub fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.env.read(|txn| match self.open(txn).optional()? {
            Some(db) => db.find(key),
            None => Ok(None),
        })
    }

    /// Stores `value` under `key`.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<SuccessResponse> {
        self.env.write(|txn| self.open(txn)?.set(key, value))?;
        Ok(SuccessResponse::new("set", Some(key)))
    }

    /// Removes `key`; a missing key is an error of kind `NotFound`.
    pub fn delete(&self, key: &str) -> Result<SuccessResponse> {
        self.env.write(|txn| self.open(txn)?.delete(key))?;
        Ok(SuccessResponse::new("delete", Some(key)))
    }

    /// Runs a batch request.
    pub fn execute(&self, request: &BatchRequest) -> Result<SuccessResponse> {
        let report = self.executor().execute(request)?;
        Ok(SuccessResponse { report: Some(report), ..SuccessResponse::new("transaction", None) })
    }

    /// Ordered snapshot of the keyspace.
    pub fn dump(&self) -> Result<Dump> {
        match self.executor().dump() {
            Err(e) if e.is_not_found() && self.database.is_some() => Ok(Dump::default()),
            other => other,
        }
    }

    /// The keyspace as a batch request that recreates it.
    pub fn dump_script(&self) -> Result<BatchRequest> {
        self.dump()?.to_request()
    }
}
