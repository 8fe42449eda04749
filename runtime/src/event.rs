//! Completion tokens for submitted commands.

use std::sync::Arc;

use gantry_driver::{Driver, EventStatus, ProfilingInfo, RawEvent};
use smallvec::SmallVec;
use snafu::ResultExt;

use crate::error::{Error, OperationSnafu, Result};
use crate::handle::Owned;

/// Dependency list in native form.
pub(crate) type WaitList = SmallVec<[RawEvent; 8]>;

/// Completion token of one enqueued command, or a user event completed by
/// the host.
///
/// An event can be passed as a dependency of later commands on any queue of
/// the same context. Releasing an event neither cancels nor waits for the
/// command behind it.
#[derive(Debug)]
pub struct Event {
    handle: Owned<RawEvent>,
}

impl Event {
    pub(crate) fn new(driver: Arc<dyn Driver>, raw: RawEvent) -> Result<Self> {
        Ok(Self { handle: Owned::new(driver, raw)? })
    }

    pub(crate) fn raw(&self) -> Result<RawEvent> {
        self.handle.get()
    }

    fn driver(&self) -> &dyn Driver {
        self.handle.driver().as_ref()
    }

    pub fn status(&self) -> Result<EventStatus> {
        self.driver().event_status(self.raw()?).context(OperationSnafu { what: "event status query" })
    }

    /// Block until the event is terminal.
    ///
    /// Commands still pending on the owning queue are issued first. A command
    /// that ended in error surfaces as [`crate::ErrorKind::DeviceSideFailure`]
    /// carrying its status code.
    pub fn wait(&self) -> Result<()> {
        Self::wait_all(&[self])
    }

    /// Block until every event is terminal. All events must come from the same driver.
    pub fn wait_all(events: &[&Event]) -> Result<()> {
        let Some(first) = events.first() else {
            return Ok(());
        };
        let raw = wait_list(events)?;
        match first.driver().wait_for_events(&raw) {
            Ok(()) => Ok(()),
            Err(gantry_driver::Error::ExecStatusErrorForEventsInWaitList) => {
                let failure = events.iter().find_map(|event| match event.status() {
                    Ok(EventStatus::Error(code)) => Some(gantry_driver::Error::from_code(code)),
                    _ => None,
                });
                Err(Error::DeviceSide {
                    source: failure.unwrap_or(gantry_driver::Error::ExecStatusErrorForEventsInWaitList),
                })
            }
            Err(source) => Err(Error::from_wait("event wait", source)),
        }
    }

    /// Complete a user event.
    pub fn set_complete(&self) -> Result<()> {
        self.driver()
            .set_user_event_status(self.raw()?, EventStatus::Complete)
            .context(OperationSnafu { what: "user event completion" })
    }

    /// Terminate a user event with a negative status code. Commands that
    /// depend on it fail without running.
    pub fn set_error(&self, code: i32) -> Result<()> {
        self.driver()
            .set_user_event_status(self.raw()?, EventStatus::Error(code))
            .context(OperationSnafu { what: "user event completion" })
    }

    /// Timestamps of the command, available once it completed on a queue
    /// created with `PROFILING_ENABLE`.
    pub fn profiling(&self) -> Result<ProfilingInfo> {
        self.driver().event_profiling_info(self.raw()?).context(OperationSnafu { what: "profiling query" })
    }

    /// Run `callback` once with the terminal status of the event.
    pub fn on_complete<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(EventStatus) + Send + 'static,
    {
        self.driver()
            .set_event_callback(self.raw()?, Box::new(callback))
            .context(OperationSnafu { what: "event callback registration" })
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    pub fn release(&mut self) {
        self.handle.release();
    }
}

/// Native handles of `events`, failing on the first released one.
pub(crate) fn wait_list(events: &[&Event]) -> Result<WaitList> {
    events.iter().map(|event| event.raw()).collect()
}
