use std::time::Instant;

use super::{Action, BatchReport, BatchRequest, BatchStep, Dump, DumpEntry, Outcome, StepReport};
use crate::database::Database;
use crate::env::Environment;
use crate::flags::{DatabaseFlags, TxnFlags};
use crate::error::ResultExt;
use crate::txn::Transaction;
use crate::{Error, Result};

/// Runs batch requests against one keyspace of an environment.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    env: Environment,
    database: Option<String>,
}

impl BatchExecutor {
    /// Executor over the environment's default keyspace.
    pub fn new(env: Environment) -> Self {
        Self { env, database: None }
    }

    /// Targets the named keyspace instead; write batches create it if needed.
    pub fn with_database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    /// The environment this executor writes to.
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

    /// Executes `request` in a single transaction.
    ///
    /// Misses and malformed steps end up in the report; engine failures
    /// abort the transaction and are returned as errors. A read-only batch
    /// against a keyspace that was never created sees it as empty.
    pub fn execute(&self, request: &BatchRequest) -> Result<BatchReport> {
        let start = Instant::now();
        let txn = self.env.transaction(TxnFlags::empty(), request.write)?;
        let db = if request.write { Some(self.open(&txn)?) } else { self.open(&txn).optional()? };

        let mut report = BatchReport { steps_processed: Vec::with_capacity(request.len()), committed: false };
        for (index, step) in request.steps.iter().enumerate() {
            let outcome = match apply(db.as_ref(), step) {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::warn!("Batch step {} failed, aborting: {}", index, e);
                    txn.abort();
                    return Err(e);
                }
            };
            let aborted = match outcome {
                Outcome::Success => false,
                Outcome::NotFound => step.abort,
                Outcome::Invalid => true,
            };
            report.steps_processed.push(StepReport {
                action: step.action.clone(),
                key: step.key.clone(),
                outcome,
                aborted,
            });
            if aborted {
                log::warn!("Batch aborted at step {} ({:?})", index, outcome);
                txn.abort();
                return Ok(report);
            }
        }

        txn.commit()?;
        report.committed = true;
        log::debug!("Batch of {} steps committed in {:?}", request.len(), start.elapsed());
        Ok(report)
    }

    /// Snapshots every record of the keyspace in key order.
    pub fn dump(&self) -> Result<Dump> {
        let txn = self.env.begin_ro()?;
        let db = self.open(&txn)?;
        let mut cursor = db.cursor()?;
        let entries = cursor
            .iter()
            .map(|entry| entry.map(|(key, value)| DumpEntry { key, value }))
            .collect::<Result<Vec<_>>>()?;
        drop(cursor);
        txn.commit()?;
        Ok(Dump { entries })
    }
}

fn apply(db: Option<&Database<'_>>, step: &BatchStep) -> Result<Outcome> {
    let (Some(action), Some(key)) = (step.action.as_deref(), step.key.as_deref()) else {
        return Ok(Outcome::Invalid);
    };
    let found = match (Action::parse(action), db) {
        (None, _) => return Ok(Outcome::Invalid),
        (Some(Action::Set), _) if step.value.is_none() => return Ok(Outcome::Invalid),
        // Missing keyspace in a read-only batch: nothing to find
        (Some(Action::Contains | Action::Delete), None) => false,
        (Some(Action::Set), None) => {
            return Err(Error::invalid_state("set in a read-only batch"));
        }
        (Some(Action::Contains), Some(db)) => db.contains(key)?,
        (Some(Action::Delete), Some(db)) => db.remove(key)?,
        (Some(Action::Set), Some(db)) => match &step.value {
            Some(value) => {
                db.set(key, value)?;
                true
            }
            None => return Ok(Outcome::Invalid),
        },
    };
    Ok(if found { Outcome::Success } else { Outcome::NotFound })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::StepValue;
    use crate::{Binding, EnvOptions};
    use tempfile::TempDir;

    fn setup() -> (TempDir, Environment) {
        let temp_dir = TempDir::new().unwrap();
        let env = Environment::open_with(Binding::new().unwrap(), temp_dir.path(), &EnvOptions::default())
            .unwrap();
        (temp_dir, env)
    }

    #[test]
    fn test_all_steps_commit() {
        let (_dir, env) = setup();
        let executor = BatchExecutor::new(env.clone());
        let mut request = BatchRequest::new(true);
        request.set("a", "1").set("b", "2").contains("a").delete("b");

        let report = executor.execute(&request).unwrap();
        assert!(report.committed);
        assert!(!report.aborted());
        assert_eq!(report.steps_processed.len(), 4);
        assert!(report.steps_processed.iter().all(|s| s.outcome == Outcome::Success));

        env.read(|txn| {
            assert!(txn.contains("a")?);
            assert!(!txn.contains("b")?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_miss_aborts_by_default() {
        let (_dir, env) = setup();
        let executor = BatchExecutor::new(env.clone());
        let mut request = BatchRequest::new(true);
        request.set("x", "1").delete("a").set("b", "v");

        let report = executor.execute(&request).unwrap();
        assert!(!report.committed);
        assert_eq!(report.steps_processed.len(), 2);
        let last = &report.steps_processed[1];
        assert_eq!(last.key.as_deref(), Some("a"));
        assert_eq!(last.outcome, Outcome::NotFound);
        assert!(last.aborted);

        env.read(|txn| {
            assert!(!txn.contains("x")?);
            assert!(!txn.contains("b")?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_miss_continues_without_abort_flag() {
        let (_dir, env) = setup();
        let executor = BatchExecutor::new(env.clone());
        let mut request = BatchRequest::new(true);
        request.push(BatchStep::delete("a").abort_on_miss(false)).set("b", "v");

        let report = executor.execute(&request).unwrap();
        assert!(report.committed);
        assert_eq!(report.steps_processed[0].outcome, Outcome::NotFound);
        assert!(!report.steps_processed[0].aborted);
        assert_eq!(report.steps_processed[1].outcome, Outcome::Success);
        assert_eq!(env.read(|txn| txn.get("b")).unwrap().as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn test_malformed_step_always_aborts() {
        let (_dir, env) = setup();
        let executor = BatchExecutor::new(env.clone());

        let missing_key = BatchStep { action: Some("set".into()), key: None, value: None, abort: false };
        let unknown = BatchStep { action: Some("upsert".into()), key: Some("k".into()), value: None, abort: false };
        let no_value = BatchStep { action: Some("set".into()), key: Some("k".into()), value: None, abort: false };
        let no_action = BatchStep { action: None, key: Some("d".into()), value: None, abort: false };

        for bad in [missing_key, unknown, no_value, no_action] {
            let mut request = BatchRequest::new(true);
            request.set("before", "1").push(bad);
            let report = executor.execute(&request).unwrap();
            assert!(!report.committed);
            let last = report.steps_processed.last().unwrap();
            assert_eq!(last.outcome, Outcome::Invalid);
            assert!(last.aborted);
        }
        assert!(!env.read(|txn| txn.contains("before")).unwrap());
    }

    #[test]
    fn test_read_only_batch() {
        let (_dir, env) = setup();
        env.write(|txn| txn.set("a", "1")).unwrap();
        let executor = BatchExecutor::new(env.clone());

        let mut request = BatchRequest::new(false);
        request.contains("a");
        assert!(executor.execute(&request).unwrap().committed);

        // Writes are rejected by the engine and surface as errors
        let mut request = BatchRequest::new(false);
        request.set("b", "2");
        assert!(executor.execute(&request).is_err());
        assert_eq!(env.open_transactions(), 0);
    }

    #[test]
    fn test_named_keyspace_and_dump() {
        let (_dir, env) = setup();
        let executor = BatchExecutor::new(env.clone()).with_database("items");
        let mut request = BatchRequest::new(true);
        request
            .set("b", "2")
            .set("a", "1")
            .push(BatchStep::set("raw", StepValue::Bytes(vec![0xff])));
        executor.execute(&request).unwrap();

        let dump = executor.dump().unwrap();
        let keys: Vec<_> = dump.entries.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys, vec!["a", "b", "raw"]);
        assert_eq!(dump.entries[2].value.as_ref(), &[0xff]);

        // The default keyspace only holds the keyspace record
        assert!(!env.read(|txn| txn.contains("a")).unwrap());
    }
}
