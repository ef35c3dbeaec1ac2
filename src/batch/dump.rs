use bytes::Bytes;

use super::{BatchRequest, BatchStep, StepValue};
use crate::{Error, Result};

/// One record of a [`Dump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpEntry {
    /// Stored key.
    pub key: Bytes,
    /// Stored value.
    pub value: Bytes,
}

/// Ordered snapshot of a keyspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dump {
    /// Records in key order.
    pub entries: Vec<DumpEntry>,
}

impl Dump {
    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the keyspace was empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builds a write batch that recreates these records when replayed.
    ///
    /// Keys travel as strings in the batch protocol, so a non-UTF-8 key is an
    /// error. Values keep their bytes either way.
    pub fn to_request(&self) -> Result<BatchRequest> {
        let mut request = BatchRequest::new(true);
        for entry in &self.entries {
            let key = std::str::from_utf8(&entry.key).map_err(|_| {
                Error::Serialization(format!("key {:?} is not valid UTF-8", entry.key))
            })?;
            request.push(BatchStep::set(key, StepValue::from_stored(&entry.value)));
        }
        Ok(request)
    }
}
