//! Error types for the runtime layer.
//!
//! Every failure carries the driver status that caused it (when there is
//! one) and falls into one of the coarse categories of [`ErrorKind`].

use gantry_driver::Error as DriverError;
use snafu::Snafu;

use crate::event::Event;
use crate::memory::MappedMemObject;

/// Result type for runtime operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of a runtime [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The driver rejected the creation of an object.
    CreationFailure,
    /// The driver reported success but handed back a null handle or pointer.
    UnknownFailure,
    /// An enqueue or handle operation was rejected.
    OperationFailure,
    /// The device reported a failure while executing a command.
    DeviceSideFailure,
    /// The handle was already released.
    Released,
}

/// Errors that can occur in the runtime.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Driver refused to create an object.
    #[snafu(display("Failed to create {what}: {source}"))]
    Create { what: &'static str, source: DriverError },

    /// Driver returned a null handle from a successful call.
    ///
    /// Map operations still produce an event; it travels here so the caller
    /// can wait on it or release it.
    #[snafu(display("Driver returned a null {what}"))]
    NullHandle { what: &'static str, event: Option<Event> },

    /// Driver rejected an operation.
    #[snafu(display("{what} failed: {source}"))]
    Operation { what: &'static str, source: DriverError },

    /// Command failed on the device.
    #[snafu(display("Device reported failure: {source}"))]
    DeviceSide { source: DriverError },

    /// Handle used after release.
    #[snafu(display("{what} was already released"))]
    Released { what: &'static str },

    /// An unmap was refused. The mapping is still live and comes back here
    /// so it can be unmapped again.
    #[snafu(display("Unmap failed: {source}"))]
    Unmap { source: Box<Error>, mapped: MappedMemObject },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Create { .. } => ErrorKind::CreationFailure,
            Error::NullHandle { .. } => ErrorKind::UnknownFailure,
            Error::Operation { .. } => ErrorKind::OperationFailure,
            Error::DeviceSide { .. } => ErrorKind::DeviceSideFailure,
            Error::Released { .. } => ErrorKind::Released,
            Error::Unmap { source, .. } => source.kind(),
        }
    }

    /// Driver status behind this error, if any.
    pub fn driver_error(&self) -> Option<DriverError> {
        match self {
            Error::Create { source, .. } | Error::Operation { source, .. } | Error::DeviceSide { source } => {
                Some(*source)
            }
            Error::NullHandle { .. } | Error::Released { .. } => None,
            Error::Unmap { source, .. } => source.driver_error(),
        }
    }

    /// Take the event a partially successful call produced.
    pub fn into_event(self) -> Option<Event> {
        match self {
            Error::NullHandle { event, .. } => event,
            _ => None,
        }
    }

    /// Take back the mapping of a refused unmap.
    pub fn into_mapped(self) -> Option<MappedMemObject> {
        match self {
            Error::Unmap { mapped, .. } => Some(mapped),
            _ => None,
        }
    }

    /// Classify a failure reported while waiting on commands.
    ///
    /// Status codes raised by command execution become
    /// [`ErrorKind::DeviceSideFailure`]; anything else means the call itself
    /// was rejected.
    pub(crate) fn from_wait(what: &'static str, source: DriverError) -> Self {
        match source {
            DriverError::ExecStatusErrorForEventsInWaitList | DriverError::DeviceFailure { .. } => {
                Error::DeviceSide { source }
            }
            source => Error::Operation { what, source },
        }
    }
}
