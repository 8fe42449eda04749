//! Completion tokens of the host driver.
//!
//! A [`HostEvent`] is a single-writer, multi-reader latch: exactly one
//! producer moves it to a terminal status (the running command for command
//! events, the host for user events) and any number of threads may wait on
//! it or hang continuations off it.
//!
//! Waiting uses a `parking_lot` mutex/condvar pair, like a one-shot timeline
//! signal whose target value is "terminal".

use std::sync::{Arc, Weak};
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};

use crate::driver::EventCallback;
use crate::error::{Error, InvalidOperationSnafu, ProfilingInfoNotAvailableSnafu, Result};
use crate::handle::{RawContext, RawEvent};
use crate::host::queue::HostQueue;
use crate::types::{EventStatus, ProfilingInfo};

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds since the first timestamp taken in this process.
pub(crate) fn timestamp() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

#[derive(Debug)]
enum Origin {
    User,
    Command { queue: Weak<HostQueue>, profiling: bool },
}

struct EventState {
    status: EventStatus,
    times: ProfilingInfo,
    callbacks: Vec<EventCallback>,
}

pub(crate) struct HostEvent {
    id: RawEvent,
    context: RawContext,
    origin: Origin,
    state: Mutex<EventState>,
    condvar: Condvar,
}

impl std::fmt::Debug for HostEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostEvent").field("id", &self.id).field("status", &self.status()).finish()
    }
}

impl HostEvent {
    /// A user event starts out submitted and stays there until the host completes it.
    pub fn new_user(id: RawEvent, context: RawContext) -> Self {
        Self::with_origin(id, context, Origin::User, EventStatus::Submitted)
    }

    pub fn new_command(id: RawEvent, context: RawContext, queue: Weak<HostQueue>, profiling: bool) -> Self {
        Self::with_origin(id, context, Origin::Command { queue, profiling }, EventStatus::Queued)
    }

    fn with_origin(id: RawEvent, context: RawContext, origin: Origin, status: EventStatus) -> Self {
        let times = ProfilingInfo { queued: timestamp(), ..Default::default() };
        Self {
            id,
            context,
            origin,
            state: Mutex::new(EventState { status, times, callbacks: Vec::new() }),
            condvar: Condvar::new(),
        }
    }

    pub fn id(&self) -> RawEvent {
        self.id
    }

    pub fn context(&self) -> RawContext {
        self.context
    }

    pub fn is_user(&self) -> bool {
        matches!(self.origin, Origin::User)
    }

    pub fn status(&self) -> EventStatus {
        self.state.lock().status
    }

    /// Move a command event forward to `Submitted` or `Running`.
    pub fn advance(&self, status: EventStatus) {
        let mut state = self.state.lock();
        match (state.status, status) {
            (EventStatus::Queued, EventStatus::Submitted) => state.times.submit = timestamp(),
            (EventStatus::Queued | EventStatus::Submitted, EventStatus::Running) => {
                let now = timestamp();
                if state.times.submit == 0 {
                    state.times.submit = now;
                }
                state.times.start = now;
            }
            _ => return,
        }
        state.status = status;
    }

    /// Move to a terminal status and run pending continuations.
    ///
    /// Returns `false` if the event was already terminal.
    pub fn complete(&self, status: EventStatus) -> bool {
        debug_assert!(status.is_terminal());
        let callbacks = {
            let mut state = self.state.lock();
            if state.status.is_terminal() {
                return false;
            }
            let now = timestamp();
            if state.times.submit == 0 {
                state.times.submit = now;
            }
            if state.times.start == 0 {
                state.times.start = now;
            }
            state.times.end = now;
            state.status = status;
            self.condvar.notify_all();
            std::mem::take(&mut state.callbacks)
        };

        tracing::trace!(event = %self.id, ?status, "event completed");
        for callback in callbacks {
            callback(status);
        }
        true
    }

    /// Complete a user event on behalf of the host.
    pub fn set_user_status(&self, status: EventStatus) -> Result<()> {
        snafu::ensure!(self.is_user() && status.is_terminal(), InvalidOperationSnafu);
        snafu::ensure!(self.complete(status), InvalidOperationSnafu);
        Ok(())
    }

    /// Run `callback` once this event is terminal (immediately if it already is).
    pub fn on_complete(&self, callback: EventCallback) {
        let status = {
            let mut state = self.state.lock();
            if !state.status.is_terminal() {
                state.callbacks.push(callback);
                return;
            }
            state.status
        };
        callback(status);
    }

    /// Issue the owning queue's pending batch if this command is still in it.
    pub fn issue(&self) {
        if let Origin::Command { queue, .. } = &self.origin
            && self.status() == EventStatus::Queued
            && let Some(queue) = queue.upgrade()
        {
            queue.flush();
        }
    }

    /// Whether this is a command event of `queue`.
    pub fn is_on(&self, queue: &HostQueue) -> bool {
        matches!(&self.origin, Origin::Command { queue: owner, .. } if std::ptr::eq(owner.as_ptr(), queue))
    }

    /// Block until terminal. Pending commands of the owning queue are issued
    /// first so the wait cannot stall on an unflushed batch.
    pub fn wait(&self) -> Result<()> {
        self.issue();
        let mut state = self.state.lock();
        while !state.status.is_terminal() {
            self.condvar.wait(&mut state);
        }
        match state.status {
            EventStatus::Error(code) => Err(Error::from_code(code)),
            _ => Ok(()),
        }
    }

    pub fn profiling_info(&self) -> Result<ProfilingInfo> {
        let profiling = matches!(self.origin, Origin::Command { profiling: true, .. });
        let state = self.state.lock();
        snafu::ensure!(profiling && state.status == EventStatus::Complete, ProfilingInfoNotAvailableSnafu);
        Ok(state.times)
    }
}

/// Block until every event in `events` is terminal.
pub(crate) fn wait_all(events: &[Arc<HostEvent>]) -> Result<()> {
    let mut failed = false;
    for event in events {
        failed |= event.wait().is_err();
    }
    snafu::ensure!(!failed, crate::error::ExecStatusErrorForEventsInWaitListSnafu);
    Ok(())
}
