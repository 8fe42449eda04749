//! Exclusive ownership of one native handle reference.
//!
//! [`Owned`] pairs a raw handle with the driver that minted it and gives the
//! reference back exactly once: on the first [`Owned::release`] call, or on
//! drop if the handle was never released explicitly.

use std::fmt;
use std::sync::Arc;

use gantry_driver::{Driver, RawContext, RawEvent, RawKernel, RawMem, RawQueue};
use snafu::OptionExt;

use crate::error::{NullHandleSnafu, ReleasedSnafu, Result};
use crate::event::Event;

/// A raw handle kind the runtime knows how to release.
pub(crate) trait NativeHandle: Copy + fmt::Display {
    /// Object kind, for logs and errors.
    const KIND: &'static str;

    fn is_null(self) -> bool;

    fn release_with(self, driver: &dyn Driver) -> gantry_driver::Result<()>;
}

macro_rules! native_handle {
    ($raw:ty, $kind:literal, $release:ident) => {
        impl NativeHandle for $raw {
            const KIND: &'static str = $kind;

            fn is_null(self) -> bool {
                <$raw>::is_null(self)
            }

            fn release_with(self, driver: &dyn Driver) -> gantry_driver::Result<()> {
                driver.$release(self)
            }
        }
    };
}

native_handle!(RawContext, "context", release_context);
native_handle!(RawQueue, "command queue", release_command_queue);
native_handle!(RawMem, "memory object", release_mem_object);
native_handle!(RawEvent, "event", release_event);
native_handle!(RawKernel, "kernel", release_kernel);

pub(crate) struct Owned<H: NativeHandle> {
    raw: Option<H>,
    driver: Arc<dyn Driver>,
}

impl<H: NativeHandle> Owned<H> {
    /// Take ownership of a handle returned by a successful driver call.
    ///
    /// A null handle is a broken driver contract and is reported as
    /// [`crate::ErrorKind::UnknownFailure`].
    pub fn new(driver: Arc<dyn Driver>, raw: H) -> Result<Self> {
        snafu::ensure!(!raw.is_null(), NullHandleSnafu { what: H::KIND, event: None::<Event> });
        tracing::debug!(driver = driver.name(), handle = %raw, "{} created", H::KIND);
        Ok(Self { raw: Some(raw), driver })
    }

    /// The live handle, or [`crate::ErrorKind::Released`].
    pub fn get(&self) -> Result<H> {
        self.raw.context(ReleasedSnafu { what: H::KIND })
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn is_released(&self) -> bool {
        self.raw.is_none()
    }

    /// Give the reference back to the driver. Later calls do nothing.
    pub fn release(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };
        match raw.release_with(self.driver.as_ref()) {
            Ok(()) => tracing::debug!(handle = %raw, "{} released", H::KIND),
            Err(err) => tracing::warn!(handle = %raw, %err, "driver failed to release {}", H::KIND),
        }
    }
}

impl<H: NativeHandle> Drop for Owned<H> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<H: NativeHandle> fmt::Debug for Owned<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw {
            Some(raw) => write!(f, "{raw}"),
            None => write!(f, "released {}", H::KIND),
        }
    }
}
