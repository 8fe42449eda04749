//! Command queues of the host driver.
//!
//! Enqueued commands are batched until the queue is flushed. Flushing hands
//! each command to a dependency gate that spawns it on the rayon pool once
//! every event it waits on is terminal. In-order queues chain each command
//! behind the previous one; out-of-order queues only honor explicit wait
//! lists, so their independent commands run concurrently. Enqueueing a
//! command that waits on a batched command of another queue issues that
//! queue's batch.
//!
//! Commands never block on storage locks. A kernel waiting for its
//! work-groups lets its rayon worker pick up other jobs, and such a job may
//! need memory the kernel holds; it is spawned again instead.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::error::{Error, InvalidCommandQueueSnafu, Result};
use crate::handle::{DeviceId, RawContext, RawEvent, RawQueue};
use crate::host::event::HostEvent;
use crate::host::kernel::{self, BoundArg, COMMAND_FAULT, KernelFn, NdRange};
use crate::host::memory::{HostMem, Mapping, Rect, StagingBuffer, Storage};
use crate::types::{EventStatus, QueueProperties};

/// Host pointer carried by a transfer command.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HostPtr(pub *mut u8);

// SAFETY: the enqueue contract keeps the pointee valid and untouched by the
// host until the command's event completes. Only the running command
// dereferences it.
unsafe impl Send for HostPtr {}

/// Work a queue runs on the rayon pool.
pub(crate) enum Command {
    Write { storage: Arc<Storage>, rect: Rect, src: HostPtr },
    Read { storage: Arc<Storage>, rect: Rect, dst: HostPtr },
    Copy { src: Arc<Storage>, dst: Arc<Storage>, src_offset: usize, dst_offset: usize, len: usize },
    Map { storage: Arc<Storage>, rect: Rect, staging: Arc<StagingBuffer>, fill: bool },
    Unmap { mem: Arc<HostMem>, mapping: Mapping },
    Kernel { func: KernelFn, args: Vec<BoundArg>, range: NdRange },
    Graphics { mems: Vec<Arc<HostMem>>, acquire: bool },
    Marker,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::Write { .. } => "write",
            Command::Read { .. } => "read",
            Command::Copy { .. } => "copy",
            Command::Map { .. } => "map",
            Command::Unmap { .. } => "unmap",
            Command::Kernel { .. } => "kernel",
            Command::Graphics { .. } => "graphics",
            Command::Marker => "marker",
        }
    }

    /// Run the command. `None` means a storage it needs is locked and
    /// nothing was done.
    fn execute(&self) -> Option<Result<()>> {
        match self {
            Command::Write { storage, rect, src } => {
                let mut device = storage.try_write()?;
                // SAFETY: see HostPtr.
                let host = unsafe { std::slice::from_raw_parts(src.0, rect.host_len()) };
                rect.upload(host, &mut device);
            }
            Command::Read { storage, rect, dst } => {
                let device = storage.try_read()?;
                // SAFETY: see HostPtr.
                let host = unsafe { std::slice::from_raw_parts_mut(dst.0, rect.host_len()) };
                rect.download(&device, host);
            }
            Command::Copy { src, dst, src_offset, dst_offset, len } => {
                let (from, to) = (*src_offset..src_offset + len, *dst_offset..dst_offset + len);
                if Arc::ptr_eq(src, dst) {
                    dst.try_write()?.copy_within(from, to.start);
                } else {
                    let source = src.try_read()?;
                    dst.try_write()?[to].copy_from_slice(&source[from]);
                }
            }
            Command::Map { storage, rect, staging, fill } => {
                if *fill {
                    let device = storage.try_read()?;
                    // SAFETY: the host cannot see the staging buffer before this event completes.
                    rect.download(&device, unsafe { staging.as_mut_slice() });
                }
            }
            Command::Unmap { mem, mapping } => {
                if mapping.flags.writes_device() {
                    let mut device = mem.storage.try_write()?;
                    // SAFETY: the host gave the mapped pointer back when it enqueued the unmap.
                    mapping.rect.upload(unsafe { mapping.staging.as_slice() }, &mut device);
                }
            }
            Command::Kernel { func, args, range } => return kernel::dispatch(func, args, *range),
            Command::Graphics { mems, acquire } => mems.iter().for_each(|mem| mem.set_acquired(*acquire)),
            Command::Marker => {}
        }
        Some(Ok(()))
    }
}

/// Counts commands that were enqueued but have not completed yet.
#[derive(Debug, Default)]
struct Tracker {
    state: Mutex<TrackerState>,
    idle: Condvar,
}

#[derive(Debug, Default)]
struct TrackerState {
    outstanding: usize,
    /// First failure since the last `finish`.
    failure: Option<Error>,
}

impl Tracker {
    fn begin(&self) {
        self.state.lock().outstanding += 1;
    }

    fn done(&self, failure: Option<Error>) {
        let mut state = self.state.lock();
        state.outstanding -= 1;
        if state.failure.is_none() {
            state.failure = failure;
        }
        if state.outstanding == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            self.idle.wait(&mut state);
        }
        state.failure.take().map_or(Ok(()), Err)
    }
}

struct Job {
    event: Arc<HostEvent>,
    command: Command,
    tracker: Arc<Tracker>,
}

impl Job {
    fn run(self) {
        self.event.advance(EventStatus::Running);
        let name = self.command.name();
        let result = match panic::catch_unwind(AssertUnwindSafe(|| self.command.execute())) {
            Ok(Some(result)) => result,
            Ok(None) => {
                tracing::trace!(event = %self.event.id(), command = name, "memory busy, respawning");
                std::thread::yield_now();
                rayon::spawn(move || self.run());
                return;
            }
            Err(_) => {
                tracing::warn!(event = %self.event.id(), command = name, "command panicked");
                Err(Error::DeviceFailure { code: COMMAND_FAULT })
            }
        };

        match &result {
            Ok(()) => {
                self.event.complete(EventStatus::Complete);
            }
            Err(err) => {
                tracing::debug!(event = %self.event.id(), command = name, %err, "command failed");
                self.event.complete(EventStatus::Error(err.code()));
            }
        }
        self.tracker.done(result.err());
    }

    fn fail(self, err: Error) {
        tracing::debug!(event = %self.event.id(), %err, "command abandoned");
        self.event.complete(EventStatus::Error(err.code()));
        self.tracker.done(Some(err));
    }
}

/// Spawns a job on the rayon pool once all of its dependencies are terminal.
struct Gate {
    remaining: AtomicUsize,
    failed: AtomicBool,
    job: Mutex<Option<Job>>,
}

impl Gate {
    fn arrive(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let Some(job) = self.job.lock().take() else { return };
        if self.failed.load(Ordering::Acquire) {
            job.fail(Error::ExecStatusErrorForEventsInWaitList);
        } else {
            rayon::spawn(move || job.run());
        }
    }
}

struct Dependency {
    event: Arc<HostEvent>,
    /// Whether a failure of `event` fails the dependent command. Implicit
    /// in-order chaining only orders.
    propagate: bool,
}

struct Pending {
    event: Arc<HostEvent>,
    command: Command,
    deps: SmallVec<[Dependency; 4]>,
}

#[derive(Default)]
struct Batch {
    pending: Vec<Pending>,
    /// Most recent command, for in-order chaining.
    last: Option<Arc<HostEvent>>,
    /// Commands not known to be terminal, for markers on out-of-order queues.
    recent: Vec<Arc<HostEvent>>,
    closed: bool,
}

/// A live command queue.
pub(crate) struct HostQueue {
    pub id: RawQueue,
    pub context: RawContext,
    pub device: DeviceId,
    pub properties: QueueProperties,
    batch: Mutex<Batch>,
    tracker: Arc<Tracker>,
}

impl std::fmt::Debug for HostQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostQueue")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

impl HostQueue {
    pub fn new(id: RawQueue, context: RawContext, device: DeviceId, properties: QueueProperties) -> Arc<Self> {
        Arc::new(Self {
            id,
            context,
            device,
            properties,
            batch: Mutex::new(Batch::default()),
            tracker: Arc::new(Tracker::default()),
        })
    }

    pub fn in_order(&self) -> bool {
        !self.properties.contains(QueueProperties::OUT_OF_ORDER_EXEC_MODE_ENABLE)
    }

    pub fn profiling(&self) -> bool {
        self.properties.contains(QueueProperties::PROFILING_ENABLE)
    }

    /// Add a command to the pending batch.
    ///
    /// `wait_list` failures propagate to the command. A `barrier` with an
    /// empty wait list additionally waits for every earlier command.
    pub fn enqueue(
        self: &Arc<Self>,
        id: RawEvent,
        command: Command,
        wait_list: Vec<Arc<HostEvent>>,
        barrier: bool,
    ) -> Result<Arc<HostEvent>> {
        // A dependency still batched on another queue would never be issued otherwise.
        for dep in wait_list.iter().filter(|dep| !dep.is_on(self)) {
            dep.issue();
        }

        let event = Arc::new(HostEvent::new_command(id, self.context, Arc::downgrade(self), self.profiling()));
        let mut deps: SmallVec<[Dependency; 4]> =
            wait_list.iter().map(|event| Dependency { event: Arc::clone(event), propagate: true }).collect();

        let mut batch = self.batch.lock();
        snafu::ensure!(!batch.closed, InvalidCommandQueueSnafu);

        batch.recent.retain(|event| !event.status().is_terminal());
        if self.in_order() {
            if let Some(last) = &batch.last {
                deps.push(Dependency { event: Arc::clone(last), propagate: false });
            }
        } else if barrier && wait_list.is_empty() {
            deps.extend(batch.recent.iter().map(|event| Dependency { event: Arc::clone(event), propagate: false }));
        }

        tracing::trace!(queue = %self.id, event = %id, command = command.name(), deps = deps.len(), "enqueue");
        self.tracker.begin();
        batch.last = Some(Arc::clone(&event));
        batch.recent.push(Arc::clone(&event));
        batch.pending.push(Pending { event: Arc::clone(&event), command, deps });
        Ok(event)
    }

    /// Issue the pending batch. Does not wait.
    pub fn flush(&self) {
        let pending = std::mem::take(&mut self.batch.lock().pending);
        for Pending { event, command, deps } in pending {
            event.advance(EventStatus::Submitted);
            let gate = Arc::new(Gate {
                remaining: AtomicUsize::new(deps.len() + 1),
                failed: AtomicBool::new(false),
                job: Mutex::new(Some(Job { event, command, tracker: Arc::clone(&self.tracker) })),
            });
            for Dependency { event, propagate } in deps {
                let gate = Arc::clone(&gate);
                event.on_complete(Box::new(move |status| {
                    if propagate && matches!(status, EventStatus::Error(_)) {
                        gate.failed.store(true, Ordering::Release);
                    }
                    gate.arrive();
                }));
            }
            gate.arrive();
        }
    }

    /// Flush and block until every enqueued command is terminal. Reports the
    /// first command failure since the previous call.
    pub fn finish(&self) -> Result<()> {
        self.flush();
        self.tracker.wait_idle()
    }

    /// Stop accepting commands. Issued commands still run to completion.
    pub fn shutdown(&self) {
        self.batch.lock().closed = true;
        self.flush();
    }
}
