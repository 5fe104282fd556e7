//! Coordinator event loop
//!
//! One tokio task owns the region table, the worker slots and every job in
//! flight. Submissions, completions and snapshots arrive as events on an
//! unbounded channel, so allocation and routing decisions are serialized
//! without a lock.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::arena::{ArenaRegion, RegionTable, SharedArena};
use super::dispatch::{route, Route, WorkerSlot};
use super::status::{COMPLETION_DONE, COMPLETION_WORKER_DIED};
use super::worker::{StorageCore, WorkerHandle, WorkerMessage, WorkerPayload, WorkerTicket};
use crate::batch::SealedBatch;
use crate::config::WriterConfig;
use crate::errors::{WriteError, WriteResult};
use crate::observability::{log_event, Event, MetricsRegistry, Severity};

/// Reply channel carrying a batch's raw result table
pub(crate) type BatchReply = oneshot::Receiver<WriteResult<Vec<u8>>>;

enum CoordinatorEvent {
    Submit {
        batch: SealedBatch,
        reply: oneshot::Sender<WriteResult<Vec<u8>>>,
    },
    Completed {
        job_id: u64,
        worker: usize,
        code: u32,
    },
    Snapshot(oneshot::Sender<CoordinatorSnapshot>),
    Shutdown,
}

/// Point-in-time view of the coordinator
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorSnapshot {
    /// Regions currently occupying the arena, sorted by offset
    #[serde(skip)]
    pub live_regions: Vec<ArenaRegion>,
    /// Batches submitted and not yet completed
    pub jobs_in_flight: usize,
    /// Batches waiting for a worker
    pub held: usize,
    /// Workers still in the pool
    pub live_workers: usize,
    /// Bytes outstanding per live worker
    pub worker_remaining: Vec<usize>,
}

struct CoordinatorShared {
    events: mpsc::UnboundedSender<CoordinatorEvent>,
    metrics: Arc<MetricsRegistry>,
}

impl Drop for CoordinatorShared {
    fn drop(&mut self) {
        let _ = self.events.send(CoordinatorEvent::Shutdown);
    }
}

/// Handle to the worker coordinator.
///
/// Cloning is cheap. The event loop stops when the last handle is dropped
/// or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct Coordinator {
    shared: Arc<CoordinatorShared>,
}

impl Coordinator {
    /// Spawn the worker threads and the event loop on the current runtime.
    pub fn start(config: &WriterConfig, core: Arc<dyn StorageCore>) -> WriteResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| WriteError::NoRuntime)?;

        let mut workers = Vec::with_capacity(config.worker_count);
        for index in 0..config.worker_count {
            workers.push(WorkerHandle::spawn(index, core.clone())?);
        }

        let (events, receiver) = mpsc::unbounded_channel();
        let metrics = Arc::new(MetricsRegistry::new());
        let event_loop = CoordinatorLoop {
            arena: Arc::new(SharedArena::new(config.arena_bytes)),
            regions: RegionTable::new(config.arena_bytes, config.region_alignment),
            slots: (0..workers.len()).map(WorkerSlot::new).collect(),
            workers,
            jobs: HashMap::new(),
            held: VecDeque::new(),
            last_failed: 0,
            events: events.clone(),
            metrics: metrics.clone(),
        };
        runtime.spawn(event_loop.run(receiver));

        log_event(
            Severity::Info,
            Event::CoordinatorStarted,
            &[
                ("arena_bytes", &config.arena_bytes.to_string()),
                ("workers", &config.worker_count.to_string()),
            ],
        );

        Ok(Self {
            shared: Arc::new(CoordinatorShared { events, metrics }),
        })
    }

    /// Counters shared by the coordinator and every context attached to it
    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.shared.metrics.clone()
    }

    /// Stop the event loop; unfinished batches fail with `CoordinatorClosed`
    pub fn shutdown(&self) {
        let _ = self.shared.events.send(CoordinatorEvent::Shutdown);
    }

    /// Hand a sealed batch over for placement and dispatch
    pub(crate) fn submit(&self, batch: SealedBatch) -> BatchReply {
        let (reply, receiver) = oneshot::channel();
        // A closed loop drops `reply`, which the receiver sees as closed.
        let _ = self
            .shared
            .events
            .send(CoordinatorEvent::Submit { batch, reply });
        receiver
    }

    /// Current arena and worker state
    pub async fn snapshot(&self) -> WriteResult<CoordinatorSnapshot> {
        let (reply, receiver) = oneshot::channel();
        self.shared
            .events
            .send(CoordinatorEvent::Snapshot(reply))
            .map_err(|_| WriteError::CoordinatorClosed)?;
        receiver.await.map_err(|_| WriteError::CoordinatorClosed)
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("closed", &self.shared.events.is_closed())
            .finish()
    }
}

/// Where a job's bytes live
enum JobPayload {
    Shared { offset: usize, len: usize },
    Private(Arc<[u8]>),
}

struct Job {
    payload: JobPayload,
    types: BTreeSet<u16>,
    len: usize,
    reply: oneshot::Sender<WriteResult<Vec<u8>>>,
    worker: Option<usize>,
    ticket: Option<Arc<WorkerTicket>>,
}

struct CoordinatorLoop {
    arena: Arc<SharedArena>,
    regions: RegionTable,
    workers: Vec<WorkerHandle>,
    slots: Vec<WorkerSlot>,
    /// batch id -> job
    jobs: HashMap<u64, Job>,
    /// Jobs not routed to a worker yet, in submission order
    held: VecDeque<u64>,
    last_failed: usize,
    events: mpsc::UnboundedSender<CoordinatorEvent>,
    metrics: Arc<MetricsRegistry>,
}

impl CoordinatorLoop {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<CoordinatorEvent>) {
        while let Some(event) = receiver.recv().await {
            match event {
                CoordinatorEvent::Submit { batch, reply } => self.on_submit(batch, reply),
                CoordinatorEvent::Completed {
                    job_id,
                    worker,
                    code,
                } => self.on_completed(job_id, worker, code),
                CoordinatorEvent::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
                CoordinatorEvent::Shutdown => break,
            }
        }
        self.close();
    }

    fn on_submit(&mut self, batch: SealedBatch, reply: oneshot::Sender<WriteResult<Vec<u8>>>) {
        let payload = self.place(batch.batch_id, &batch.payload);
        self.jobs.insert(
            batch.batch_id,
            Job {
                payload,
                types: batch.types,
                len: batch.payload.len(),
                reply,
                worker: None,
                ticket: None,
            },
        );
        self.held.push_back(batch.batch_id);
        self.pump();
    }

    /// Copy the batch into a free arena region, detaching undispatched
    /// regions until one fits. Falls back to a private buffer.
    fn place(&mut self, key: u64, bytes: &[u8]) -> JobPayload {
        if bytes.len() <= self.regions.arena_size() {
            loop {
                if let Some(region) = self.regions.try_claim(key, bytes.len()) {
                    self.arena.write(region.offset, bytes);
                    return JobPayload::Shared {
                        offset: region.offset,
                        len: bytes.len(),
                    };
                }
                match self.regions.detach_candidate() {
                    Some(victim) => self.detach(victim),
                    None => break,
                }
            }
        }
        self.metrics.increment_private_placements();
        log_event(
            Severity::Warn,
            Event::RegionPrivate,
            &[("batch_id", &key.to_string()), ("bytes", &bytes.len().to_string())],
        );
        JobPayload::Private(Arc::from(bytes))
    }

    fn detach(&mut self, key: u64) {
        let Some(region) = self.regions.detach(key) else {
            return;
        };
        if let Some(job) = self.jobs.get_mut(&key) {
            if let JobPayload::Shared { offset, len } = job.payload {
                job.payload = JobPayload::Private(Arc::from(self.arena.read(offset, len)));
            }
        }
        self.metrics.increment_regions_detached();
        log_event(
            Severity::Info,
            Event::RegionDetached,
            &[
                ("batch_id", &key.to_string()),
                ("offset", &region.offset.to_string()),
                ("size", &region.size.to_string()),
            ],
        );
    }

    /// Route held jobs in order. A job that cannot be routed blocks later
    /// jobs touching any of its types, so per-type order is kept.
    fn pump(&mut self) {
        let mut blocked_types: BTreeSet<u16> = BTreeSet::new();
        let mut still_held = VecDeque::new();
        while let Some(job_id) = self.held.pop_front() {
            let Some(job) = self.jobs.get(&job_id) else {
                continue;
            };
            let types = job.types.clone();
            if types.iter().any(|t| blocked_types.contains(t)) {
                blocked_types.extend(types);
                still_held.push_back(job_id);
                continue;
            }
            match route(&self.slots, &types) {
                Route::Worker(index) => self.enqueue(index, job_id),
                Route::Hold => {
                    blocked_types.extend(types);
                    still_held.push_back(job_id);
                }
                Route::NoWorkers => {
                    let worker = self.last_failed;
                    self.fail_job(job_id, WriteError::WorkerFailure { worker });
                }
            }
        }
        self.held = still_held;
    }

    fn enqueue(&mut self, index: usize, job_id: u64) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        job.worker = Some(index);
        let slot = &mut self.slots[index];
        slot.add_work(&job.types, job.len);
        if slot.current.is_none() {
            self.start(index, job_id);
        } else {
            slot.queue.push_back(job_id);
        }
    }

    /// Hand a job to its worker and watch its status cell
    fn start(&mut self, index: usize, job_id: u64) {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return;
        };
        let payload = match &job.payload {
            JobPayload::Shared { offset, len } => {
                self.regions.mark_dispatched(job_id);
                WorkerPayload::Shared {
                    arena: self.arena.clone(),
                    offset: *offset,
                    len: *len,
                }
            }
            JobPayload::Private(bytes) => WorkerPayload::Private(bytes.clone()),
        };
        let ticket = Arc::new(WorkerTicket::new());
        job.ticket = Some(ticket.clone());
        self.slots[index].current = Some(job_id);

        let message = WorkerMessage {
            payload,
            ticket: ticket.clone(),
        };
        if self.workers[index].send(message).is_err() {
            let _ = self.events.send(CoordinatorEvent::Completed {
                job_id,
                worker: index,
                code: COMPLETION_WORKER_DIED,
            });
            return;
        }

        let events = self.events.clone();
        tokio::spawn(async move {
            let code = ticket.status.wait_complete().await;
            let _ = events.send(CoordinatorEvent::Completed {
                job_id,
                worker: index,
                code,
            });
        });
    }

    fn on_completed(&mut self, job_id: u64, worker: usize, code: u32) {
        if code == COMPLETION_DONE {
            let Some(job) = self.jobs.remove(&job_id) else {
                return;
            };
            self.regions.release(job_id);
            let outcome = match &job.ticket {
                Some(ticket) => ticket.take_result(),
                None => Err(WriteError::Core("batch completed without dispatch".into())),
            };
            let slot = &mut self.slots[worker];
            slot.finish_work(&job.types, job.len);
            slot.current = None;
            let _ = job.reply.send(outcome);

            if let Some(next) = self.slots[worker].queue.pop_front() {
                self.start(worker, next);
            }
        } else {
            self.metrics.increment_worker_failures();
            self.last_failed = worker;
            self.fail_job(job_id, WriteError::WorkerFailure { worker });
            self.evict(worker);
        }
        self.pump();
    }

    /// Remove a dead worker and put its queued jobs back in front
    fn evict(&mut self, worker: usize) {
        let slot = &mut self.slots[worker];
        if !slot.alive {
            return;
        }
        slot.alive = false;
        slot.current = None;
        slot.remaining = 0;
        slot.affinity.clear();
        let requeued: Vec<u64> = slot.queue.drain(..).collect();
        for job_id in requeued.iter().rev() {
            if let Some(job) = self.jobs.get_mut(job_id) {
                job.worker = None;
            }
            self.held.push_front(*job_id);
        }
        self.workers[worker].close();

        log_event(
            Severity::Error,
            Event::WorkerEvicted,
            &[
                ("requeued", &requeued.len().to_string()),
                ("worker", &worker.to_string()),
            ],
        );
    }

    fn fail_job(&mut self, job_id: u64, error: WriteError) {
        let Some(job) = self.jobs.remove(&job_id) else {
            return;
        };
        self.regions.release(job_id);
        if let Some(index) = job.worker {
            let slot = &mut self.slots[index];
            if slot.alive {
                slot.finish_work(&job.types, job.len);
                if slot.current == Some(job_id) {
                    slot.current = None;
                }
            }
        }
        let _ = job.reply.send(Err(error));
    }

    fn snapshot(&self) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            live_regions: self.regions.live_regions(),
            jobs_in_flight: self.jobs.len(),
            held: self.held.len(),
            live_workers: self.slots.iter().filter(|s| s.alive).count(),
            worker_remaining: self
                .slots
                .iter()
                .filter(|s| s.alive)
                .map(|s| s.remaining)
                .collect(),
        }
    }

    fn close(&mut self) {
        for (_, job) in self.jobs.drain() {
            let _ = job.reply.send(Err(WriteError::CoordinatorClosed));
        }
        for worker in &mut self.workers {
            worker.close();
        }
        log_event(Severity::Info, Event::CoordinatorStopped, &[]);
    }
}
