//! Encoding context
//!
//! A `WriteContext` owns the active batch, the batches it has flushed and
//! not yet resolved, its flush scheduler and the schema it encodes
//! against. Mutation calls encode synchronously under one lock and never
//! suspend; only awaiting a `PendingMutation` does.
//!
//! Lock order: context state, then a pending mutation's own state.
//!
//! Dropping the last handle seals the active batch and submits it; its
//! mutations still resolve through their handles. Dependents that would
//! need the context to be re-encoded fail with `ContextClosed`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use tokio::runtime::{Handle, RuntimeFlavor};
use uuid::Uuid;

use super::scheduler::FlushScheduler;
use super::state::{Batch, Dependent};
use crate::config::WriterConfig;
use crate::coordinator::Coordinator;
use crate::errors::{WriteError, WriteResult};
use crate::mutation::{encode_mutation, EncodeInterrupt, FieldValue, MutationRequest, PendingMutation, Reference};
use crate::observability::{log_event, Event, MetricsRegistry, Severity};
use crate::result::ResultReader;
use crate::schema::Schema;

struct ContextState {
    schema: Arc<Schema>,
    active: Batch,
    /// Sealed batches awaiting their result table, by batch id
    in_flight: HashMap<u64, Batch>,
}

struct ContextInner {
    id: Uuid,
    config: WriterConfig,
    state: parking_lot::Mutex<ContextState>,
    scheduler: FlushScheduler,
    coordinator: Coordinator,
    runtime: Handle,
    metrics: Arc<MetricsRegistry>,
}

/// Entry point for mutation calls.
///
/// Cheap to clone; clones share the same active batch.
#[derive(Clone)]
pub struct WriteContext {
    inner: Arc<ContextInner>,
}

impl WriteContext {
    /// Create a context encoding against `schema` and flushing to
    /// `coordinator`. Must be called inside a tokio runtime.
    ///
    /// A zero flush delay needs a current-thread runtime, where the flush
    /// trigger cannot run before the submitting task yields. Mutation calls
    /// must come from tasks of that runtime. A positive delay works on any
    /// runtime.
    pub fn new(config: WriterConfig, schema: Schema, coordinator: Coordinator) -> WriteResult<Self> {
        config.validate()?;
        schema.check()?;
        let runtime = Handle::try_current().map_err(|_| WriteError::NoRuntime)?;
        if config.flush_delay().is_zero() && runtime.runtime_flavor() != RuntimeFlavor::CurrentThread {
            return Err(WriteError::UnsupportedRuntime(
                "zero flush delay requires a current-thread runtime".into(),
            ));
        }
        let active = Batch::new(schema.hash, config.initial_buffer_bytes, config.max_buffer_bytes)?;
        let id = Uuid::new_v4();

        log_event(
            Severity::Info,
            Event::ContextCreated,
            &[
                ("context_id", &id.to_string()),
                ("flush_delay_ms", &config.flush_delay_ms.to_string()),
                ("schema_hash", &format!("{:016x}", schema.hash)),
            ],
        );

        Ok(Self {
            inner: Arc::new(ContextInner {
                id,
                scheduler: FlushScheduler::new(config.flush_delay()),
                metrics: coordinator.metrics(),
                config,
                state: parking_lot::Mutex::new(ContextState {
                    schema: Arc::new(schema),
                    active,
                    in_flight: HashMap::new(),
                }),
                coordinator,
                runtime,
            }),
        })
    }

    /// Create a row of `type_name`
    pub fn create<I, K>(&self, type_name: &str, fields: I) -> WriteResult<PendingMutation>
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        self.submit(MutationRequest::create(type_name, fields))
    }

    /// Update a row by real id or by pending mutation
    pub fn update<I, K>(
        &self,
        type_name: &str,
        target: impl Into<Reference>,
        fields: I,
    ) -> WriteResult<PendingMutation>
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        self.submit(MutationRequest::update(type_name, target, fields))
    }

    /// Delete a row by real id or by pending mutation
    pub fn delete(&self, type_name: &str, target: impl Into<Reference>) -> WriteResult<PendingMutation> {
        self.submit(MutationRequest::delete(type_name, target))
    }

    /// Encode a mutation into the active batch.
    ///
    /// Encode-time failures (validation, value too large, failed
    /// dependency) are returned here. A mutation whose reference is not
    /// resolvable yet is still returned as a handle; it is encoded once
    /// the reference resolves.
    pub fn submit(&self, request: MutationRequest) -> WriteResult<PendingMutation> {
        let pending = PendingMutation::new();
        let mut state = self.inner.state.lock();
        self.inner.encode_locked(&mut state, &pending, request)?;
        Ok(pending)
    }

    /// Seal the active batch and hand it to the coordinator now.
    ///
    /// No-op when the active batch is empty.
    pub fn flush(&self) -> WriteResult<()> {
        let mut state = self.inner.state.lock();
        self.inner.flush_locked(&mut state)
    }

    /// Swap the schema. The active batch is flushed first so a batch
    /// never mixes schema hashes; in-flight batches keep theirs.
    pub fn set_schema(&self, schema: Schema) -> WriteResult<()> {
        schema.check()?;
        let mut state = self.inner.state.lock();
        self.inner.flush_locked(&mut state)?;
        let previous = state.schema.hash;
        state.active = self.inner.fresh_batch(schema.hash)?;
        state.schema = Arc::new(schema);

        log_event(
            Severity::Info,
            Event::SchemaSwapped,
            &[
                ("context_id", &self.inner.id.to_string()),
                ("from", &format!("{:016x}", previous)),
                ("to", &format!("{:016x}", state.schema.hash)),
            ],
        );
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn config(&self) -> &WriterConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.inner.metrics.clone()
    }

    /// Mutations in the active batch
    pub fn active_count(&self) -> u32 {
        self.inner.state.lock().active.count()
    }

    /// Encoded length of the active batch, header included
    pub fn active_len(&self) -> usize {
        self.inner.state.lock().active.encoded_len()
    }

    /// Flushed batches still awaiting results
    pub fn in_flight_batches(&self) -> usize {
        self.inner.state.lock().in_flight.len()
    }

    pub fn schema_hash(&self) -> u64 {
        self.inner.state.lock().schema.hash
    }

    /// Whether a flush trigger is armed
    pub fn flush_pending(&self) -> bool {
        self.inner.scheduler.is_armed()
    }
}

impl fmt::Debug for WriteContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteContext")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .finish()
    }
}

impl ContextInner {
    fn fresh_batch(&self, schema_hash: u64) -> WriteResult<Batch> {
        Batch::new(
            schema_hash,
            self.config.initial_buffer_bytes,
            self.config.max_buffer_bytes,
        )
    }

    /// Encode `request` for `pending` into the active batch.
    ///
    /// On overflow the active batch is flushed and the encode retried
    /// once against the fresh batch. Synchronous failures resolve
    /// `pending` with the same error they return.
    fn encode_locked(
        self: &Arc<Self>,
        state: &mut ContextState,
        pending: &PendingMutation,
        request: MutationRequest,
    ) -> WriteResult<()> {
        loop {
            let batch_id = state.active.id();
            let schema = state.schema.clone();
            let encoded = match state.active.buffer_mut() {
                Some(buffer) => encode_mutation(buffer, &schema, &request, batch_id),
                None => {
                    state.active = self.fresh_batch(schema.hash)?;
                    continue;
                }
            };

            match encoded {
                Ok(encoded) => {
                    state.active.append(pending, encoded.type_id);
                    self.metrics.increment_mutations_encoded();
                    self.schedule();
                    return Ok(());
                }
                Err(EncodeInterrupt::Overflow(overflow)) => {
                    if state.active.is_empty() {
                        let error = WriteError::ValueTooLarge {
                            size: overflow.requested,
                            max: overflow.max,
                        };
                        return Err(self.reject(pending, error));
                    }
                    self.metrics.increment_overflow_flushes();
                    log_event(
                        Severity::Info,
                        Event::OverflowFlush,
                        &[
                            ("batch_id", &batch_id.to_string()),
                            ("count", &state.active.count().to_string()),
                            ("requested", &overflow.requested.to_string()),
                        ],
                    );
                    if let Err(error) = self.flush_locked(state) {
                        return Err(self.reject(pending, error));
                    }
                }
                Err(EncodeInterrupt::Blocked(thrower)) => {
                    let dependent = Dependent {
                        pending: pending.clone(),
                        request,
                    };
                    self.park(state, dependent, thrower);
                    return Ok(());
                }
                Err(EncodeInterrupt::Rejected(error)) => {
                    return Err(self.reject(pending, error));
                }
            }
        }
    }

    fn reject(&self, pending: &PendingMutation, error: WriteError) -> WriteError {
        pending.resolve(Err(error.clone()));
        self.metrics.add_mutations_failed(1);
        error
    }

    /// Park a mutation behind the root of its blocker chain.
    ///
    /// The root's batch re-encodes it on resolution. If the root is not a
    /// batch of this context, a task waits on the blocker instead.
    fn park(self: &Arc<Self>, state: &mut ContextState, dependent: Dependent, thrower: PendingMutation) {
        let root = thrower.root();
        dependent.pending.mark_blocked(thrower.clone());
        self.metrics.increment_mutations_blocked();
        log_event(
            Severity::Trace,
            Event::MutationBlocked,
            &[
                ("blocker", &thrower.handle_id().to_string()),
                ("handle", &dependent.pending.handle_id().to_string()),
                ("root", &root.handle_id().to_string()),
            ],
        );

        let root_batch = match root.result() {
            Some(_) => None,
            None => root.batch_id(),
        };
        let owner = match root_batch {
            Some(batch_id) if state.active.id() == batch_id => Some(&mut state.active),
            Some(batch_id) => state.in_flight.get_mut(&batch_id),
            None => None,
        };
        match owner {
            Some(batch) => batch.park(dependent),
            None => {
                let inner = Arc::clone(self);
                self.runtime.spawn(async move {
                    let _ = thrower.wait().await;
                    let mut state = inner.state.lock();
                    let _ = inner.encode_locked(&mut state, &dependent.pending, dependent.request);
                });
            }
        }
    }

    /// Seal the active batch, swap in a fresh one and submit the sealed
    /// batch to the coordinator.
    fn flush_locked(self: &Arc<Self>, state: &mut ContextState) -> WriteResult<()> {
        if state.active.is_empty() {
            return Ok(());
        }
        let fresh = self.fresh_batch(state.schema.hash)?;
        let mut batch = std::mem::replace(&mut state.active, fresh);
        let Some(sealed) = batch.seal() else {
            return Ok(());
        };
        let batch_id = batch.id();
        let bytes = sealed.payload.len();
        let count = sealed.count;
        state.in_flight.insert(batch_id, batch);

        self.metrics.record_flush(bytes as u64);
        log_event(
            Severity::Trace,
            Event::BatchSealed,
            &[
                ("batch_id", &batch_id.to_string()),
                ("bytes", &bytes.to_string()),
                ("context_id", &self.id.to_string()),
                ("count", &count.to_string()),
            ],
        );

        let reply = self.coordinator.submit(sealed);
        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            let outcome = reply.await.unwrap_or(Err(WriteError::CoordinatorClosed));
            inner.complete(batch_id, outcome);
        });
        Ok(())
    }

    /// Resolve a completed batch and re-encode its dependents
    fn complete(self: &Arc<Self>, batch_id: u64, outcome: WriteResult<Vec<u8>>) {
        let mut state = self.state.lock();
        let Some(mut batch) = state.in_flight.remove(&batch_id) else {
            return;
        };
        let dependents = ResultReader::resolve(&mut batch, outcome, &self.metrics);
        for dependent in dependents {
            // failures are delivered through the dependent's handle
            let _ = self.encode_locked(&mut state, &dependent.pending, dependent.request);
        }
    }

    /// Arm the flush trigger if it is not armed yet
    fn schedule(self: &Arc<Self>) {
        let weak: Weak<ContextInner> = Arc::downgrade(self);
        self.scheduler.schedule(&self.runtime, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            inner.scheduler.disarm();
            let mut state = inner.state.lock();
            if let Err(error) = inner.flush_locked(&mut state) {
                log_event(
                    Severity::Error,
                    Event::BatchFailed,
                    &[
                        ("code", error.code()),
                        ("context_id", &inner.id.to_string()),
                        ("error", &error.to_string()),
                    ],
                );
            }
        });
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.scheduler.disarm();
        let schema_hash = self.state.get_mut().schema.hash;
        // A failed swap drops the active batch, which fails its mutations.
        let Ok(fresh) = self.fresh_batch(schema_hash) else {
            return;
        };
        let state = self.state.get_mut();
        let mut batch = std::mem::replace(&mut state.active, fresh);
        let in_flight = state.in_flight.len();

        log_event(
            Severity::Info,
            Event::ContextClosed,
            &[
                ("batch_id", &batch.id().to_string()),
                ("context_id", &self.id.to_string()),
                ("count", &batch.count().to_string()),
                ("in_flight", &in_flight.to_string()),
            ],
        );

        let Some(sealed) = batch.seal() else {
            return;
        };
        self.metrics.record_flush(sealed.payload.len() as u64);
        let reply = self.coordinator.submit(sealed);
        let metrics = Arc::clone(&self.metrics);
        // If the runtime is gone the task is dropped with the batch, which
        // fails the batch's mutations.
        self.runtime.spawn(async move {
            let outcome = reply.await.unwrap_or(Err(WriteError::CoordinatorClosed));
            let dependents = ResultReader::resolve(&mut batch, outcome, &metrics);
            metrics.add_mutations_failed(dependents.len() as u64);
            for dependent in dependents {
                dependent.pending.resolve(Err(WriteError::ContextClosed));
            }
        });
    }
}
