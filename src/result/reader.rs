//! Result reader
//!
//! Resolves every pending mutation of a completed batch from its result
//! table, then hands back the dependents parked on the batch so the
//! encoding context can re-encode them.

use super::table::ResultTable;
use crate::batch::{Batch, Dependent};
use crate::errors::{WriteError, WriteResult};
use crate::observability::{log_event, Event, MetricsRegistry, Severity};

pub(crate) struct ResultReader;

impl ResultReader {
    /// Resolve `batch` with the coordinator's outcome.
    ///
    /// A batch-level error, or a table too short for the batch, fails every
    /// pending mutation with the same error.
    pub fn resolve(
        batch: &mut Batch,
        outcome: WriteResult<Vec<u8>>,
        metrics: &MetricsRegistry,
    ) -> Vec<Dependent> {
        match outcome {
            Ok(bytes) => match ResultTable::new(&bytes, batch.count()) {
                Ok(table) => {
                    let mut failed = 0u64;
                    for (index, pending) in batch.promises().iter().enumerate() {
                        let result = match table.entry(index as u32) {
                            Some(entry) => entry.into_result(),
                            None => Err(WriteError::ResultTableTruncated {
                                expected: batch.count() as usize,
                                actual: index,
                            }),
                        };
                        if result.is_err() {
                            failed += 1;
                        }
                        pending.resolve(result);
                    }
                    metrics.add_mutations_failed(failed);
                    log_event(
                        Severity::Trace,
                        Event::BatchResolved,
                        &[
                            ("batch_id", &batch.id().to_string()),
                            ("count", &batch.count().to_string()),
                            ("failed", &failed.to_string()),
                        ],
                    );
                    batch.set_result_table(bytes);
                }
                Err(error) => Self::fail_all(batch, error, metrics),
            },
            Err(error) => Self::fail_all(batch, error, metrics),
        }
        batch.take_dependents()
    }

    fn fail_all(batch: &Batch, error: WriteError, metrics: &MetricsRegistry) {
        for pending in batch.promises() {
            pending.resolve(Err(error.clone()));
        }
        metrics.add_mutations_failed(batch.count() as u64);
        log_event(
            Severity::Error,
            Event::BatchFailed,
            &[
                ("batch_id", &batch.id().to_string()),
                ("code", error.code()),
                ("count", &batch.count().to_string()),
                ("error", &error.to_string()),
            ],
        );
    }
}
