//! Host runtime for gantry compute devices.
//!
//! Wraps the raw handles of a [`Driver`] in owning types: [`Context`],
//! [`CommandQueue`], [`MemObject`], [`MappedMemObject`], [`Event`] and
//! [`Kernel`]. Each wrapper gives its native reference back exactly once,
//! either through an explicit `release()` or when dropped. Operations on a
//! released wrapper fail with [`ErrorKind::Released`] and never reach the
//! driver.
//!
//! # Asynchronous commands
//!
//! Enqueue calls return as soon as the command is recorded. The returned
//! [`Event`] can be waited on, inspected, or passed as a dependency of later
//! commands. Device-side failures surface from [`Event::wait`] and
//! [`CommandQueue::finish`].
//!
//! ```ignore
//! let driver: Arc<dyn Driver> = Arc::new(HostDriver::new());
//! let context = Context::new(Arc::clone(&driver), &devices, None)?;
//! let queue = context.create_command_queue(devices[0], QueueProperties::empty())?;
//! let buffer = context.create_buffer_f32(MemFlags::READ_WRITE, &input)?;
//! let done = queue.enqueue_nd_range_kernel(&kernel, None, &[input.len()], None, &[])?;
//! done.wait()?;
//! queue.read_buffer_f32(&buffer, 0, &mut output)?;
//! ```

pub mod context;
pub mod error;
pub mod event;
mod handle;
pub mod kernel;
pub mod memory;
pub mod queue;

#[cfg(test)]
pub mod test;

pub use context::{Context, MAX_IMAGE_FORMATS};
pub use error::{Error, ErrorKind, Result};
pub use event::Event;
pub use kernel::Kernel;
pub use memory::{MappedMemObject, MemObject};
pub use queue::CommandQueue;

pub use gantry_driver::{
    ContextProperty, DeviceId, Driver, EventStatus, GraphicsResource, ImageDesc, ImageFormat, MapFlags, MemFlags,
    MemObjectType, ProfilingInfo, QueueProperties,
};
