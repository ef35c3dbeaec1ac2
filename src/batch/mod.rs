//! Batch scripts: ordered conditional point operations run in one transaction.
//!
//! A [`BatchRequest`] is a list of `contains` / `set` / `delete` steps. The
//! [`BatchExecutor`] applies them in order inside a single transaction and
//! returns a [`BatchReport`] with one entry per processed step:
//!
//! - a miss on a step whose `abort` flag is set (the default) aborts the
//!   whole transaction and stops processing;
//! - a miss with `abort: false` is recorded and processing continues;
//! - a malformed step (missing `action` or `key`, unknown action, `set`
//!   without a value) is recorded as `invalid` and always aborts.
//!
//! If every step goes through, the transaction commits.
//!
//! # Wire format
//!
//! ```json
//! {"write": true, "steps": [
//!     {"action": "delete", "key": "a", "abort": false},
//!     {"action": "set", "key": "b", "value": "v"}
//! ]}
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use mapkv::batch::{BatchExecutor, BatchRequest};
//! use mapkv::{Binding, EnvOptions, Environment};
//!
//! # fn main() -> Result<(), mapkv::Error> {
//! let env = Environment::open_with(Binding::new()?, "./data", &EnvOptions::default())?;
//! let mut request = BatchRequest::new(true);
//! request.set("key1", "value1");
//! request.delete("stale");
//!
//! let report = BatchExecutor::new(env).execute(&request)?;
//! println!("committed: {}", report.committed);
//! # Ok(())
//! # }
//! ```

mod dump;
mod executor;

pub use dump::{Dump, DumpEntry};
pub use executor::BatchExecutor;

use serde::{Deserialize, Serialize};

/// Operation performed by one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Succeeds if the key is present.
    Contains,
    /// Writes the step's value under its key.
    Set,
    /// Removes the key.
    Delete,
}

impl Action {
    /// Parses the wire name of an action.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "contains" => Some(Action::Contains),
            "set" => Some(Action::Set),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }

    /// Wire name of the action.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Contains => "contains",
            Action::Set => "set",
            Action::Delete => "delete",
        }
    }
}

/// Value carried by a `set` step: a JSON string or an array of bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepValue {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl StepValue {
    /// Text when `bytes` is valid UTF-8, raw bytes otherwise.
    pub fn from_stored(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => StepValue::Text(text.to_owned()),
            Err(_) => StepValue::Bytes(bytes.to_vec()),
        }
    }
}

impl AsRef<[u8]> for StepValue {
    fn as_ref(&self) -> &[u8] {
        match self {
            StepValue::Text(text) => text.as_bytes(),
            StepValue::Bytes(bytes) => bytes,
        }
    }
}

fn default_abort() -> bool {
    true
}

/// One step of a batch request.
///
/// Fields are optional on the wire so that malformed steps can be reported
/// instead of failing the whole request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStep {
    /// `contains`, `set` or `delete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Key the step applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Value for `set`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<StepValue>,
    /// Abort the batch if the key is missing. Default: true
    #[serde(default = "default_abort")]
    pub abort: bool,
}

impl BatchStep {
    fn new(action: Action, key: &str, value: Option<StepValue>) -> Self {
        Self { action: Some(action.as_str().to_owned()), key: Some(key.to_owned()), value, abort: true }
    }

    /// A `contains` step.
    pub fn contains(key: &str) -> Self {
        Self::new(Action::Contains, key, None)
    }

    /// A `set` step.
    pub fn set(key: &str, value: StepValue) -> Self {
        Self::new(Action::Set, key, Some(value))
    }

    /// A `delete` step.
    pub fn delete(key: &str) -> Self {
        Self::new(Action::Delete, key, None)
    }

    /// Sets whether a miss aborts the batch.
    pub fn abort_on_miss(mut self, abort: bool) -> Self {
        self.abort = abort;
        self
    }
}

/// A batch of steps plus the transaction mode to run them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Run in a write transaction. Default: false
    #[serde(default)]
    pub write: bool,
    /// Steps in execution order.
    #[serde(default)]
    pub steps: Vec<BatchStep>,
}

impl BatchRequest {
    /// Creates an empty request.
    pub fn new(write: bool) -> Self {
        Self { write, steps: Vec::new() }
    }

    /// Parses a JSON request.
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Renders the request as JSON.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Appends a step.
    pub fn push(&mut self, step: BatchStep) -> &mut Self {
        self.steps.push(step);
        self
    }

    /// Appends a `contains` step.
    pub fn contains(&mut self, key: &str) -> &mut Self {
        self.push(BatchStep::contains(key))
    }

    /// Appends a `set` step with a text value.
    pub fn set(&mut self, key: &str, value: &str) -> &mut Self {
        self.push(BatchStep::set(key, StepValue::Text(value.to_owned())))
    }

    /// Appends a `delete` step.
    pub fn delete(&mut self, key: &str) -> &mut Self {
        self.push(BatchStep::delete(key))
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if there are no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Result of one processed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The step took effect.
    Success,
    /// The key was absent.
    NotFound,
    /// The step was malformed.
    Invalid,
}

/// Report entry for one processed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    /// Action as given; `None` if missing.
    pub action: Option<String>,
    /// Key as given; `None` if missing.
    pub key: Option<String>,
    /// What happened.
    pub outcome: Outcome,
    /// True if this step aborted the batch.
    pub aborted: bool,
}

/// Audit trail of a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// One entry per processed step, in order.
    pub steps_processed: Vec<StepReport>,
    /// True if the transaction committed.
    pub committed: bool,
}

impl BatchReport {
    /// True if a step aborted the batch.
    pub fn aborted(&self) -> bool {
        self.steps_processed.last().is_some_and(|step| step.aborted)
    }
}
