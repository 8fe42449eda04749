//! Command queues: ordered submission to one device.
//!
//! Every `enqueue_*` call takes a dependency list and returns the [`Event`]
//! of the submitted command. A rejected enqueue produces no event.
//!
//! # Ordering
//!
//! On an in-order queue commands run one after another in submission order.
//! With `OUT_OF_ORDER_EXEC_MODE_ENABLE` only the dependency lists order
//! commands. There is never an implicit order between two queues.
//!
//! # Submission
//!
//! Enqueued commands are batched until [`CommandQueue::flush`],
//! [`CommandQueue::finish`], a blocking enqueue or a wait on one of their
//! events issues them to the device.

use std::ptr::NonNull;
use std::sync::Arc;

use gantry_driver::{
    DeviceId, Driver, MapFlags, MappedRegion, MemObjectType, Pitch, QueueProperties, RawEvent, RawQueue,
};
use snafu::ResultExt;

use crate::error::{Error, NullHandleSnafu, OperationSnafu, Result};
use crate::event::{Event, WaitList, wait_list};
use crate::handle::Owned;
use crate::kernel::Kernel;
use crate::memory::{MappedMemObject, MemObject};

/// A submission channel bound to one device of a context.
#[derive(Debug)]
pub struct CommandQueue {
    handle: Owned<RawQueue>,
    device: DeviceId,
    properties: QueueProperties,
}

impl CommandQueue {
    pub(crate) fn new(
        driver: Arc<dyn Driver>,
        raw: RawQueue,
        device: DeviceId,
        properties: QueueProperties,
    ) -> Result<Self> {
        Ok(Self { handle: Owned::new(driver, raw)?, device, properties })
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn properties(&self) -> QueueProperties {
        self.properties
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Give the queue reference back. Commands already enqueued still run.
    pub fn release(&mut self) {
        self.handle.release();
    }

    fn driver(&self) -> &dyn Driver {
        self.handle.driver().as_ref()
    }

    /// Run one enqueue entry point and wrap the event it returns.
    fn submit<F>(&self, what: &'static str, deps: &[&Event], enqueue: F) -> Result<Event>
    where
        F: FnOnce(&dyn Driver, RawQueue, &[RawEvent]) -> gantry_driver::Result<RawEvent>,
    {
        let queue = self.handle.get()?;
        let deps: WaitList = wait_list(deps)?;
        let raw = enqueue(self.driver(), queue, deps.as_slice()).map_err(|source| Error::from_wait(what, source))?;
        tracing::trace!(%queue, event = %raw, "{what} enqueued");
        Event::new(Arc::clone(self.handle.driver()), raw)
    }

    // ============================================================================================
    // Buffer transfers
    // ============================================================================================

    /// Enqueue a copy of `data` into `buffer` at byte `offset`.
    ///
    /// # Safety
    ///
    /// When `blocking` is false, `data` must stay alive and unmodified until
    /// the returned event completes.
    pub unsafe fn enqueue_write_buffer(
        &self,
        buffer: &MemObject,
        blocking: bool,
        offset: usize,
        data: &[u8],
        deps: &[&Event],
    ) -> Result<Event> {
        let mem = buffer.raw()?;
        self.submit("buffer write", deps, |driver, queue, deps| unsafe {
            driver.enqueue_write_buffer(queue, mem, blocking, offset, data.as_ptr(), data.len(), deps)
        })
    }

    /// Enqueue a copy of `buffer` at byte `offset` into `data`.
    ///
    /// # Safety
    ///
    /// When `blocking` is false, `data` must stay alive and must not be
    /// accessed until the returned event completes.
    pub unsafe fn enqueue_read_buffer(
        &self,
        buffer: &MemObject,
        blocking: bool,
        offset: usize,
        data: &mut [u8],
        deps: &[&Event],
    ) -> Result<Event> {
        let mem = buffer.raw()?;
        self.submit("buffer read", deps, |driver, queue, deps| unsafe {
            driver.enqueue_read_buffer(queue, mem, blocking, offset, data.as_mut_ptr(), data.len(), deps)
        })
    }

    /// # Safety
    ///
    /// Same as [`CommandQueue::enqueue_write_buffer`].
    pub unsafe fn enqueue_write_buffer_f32(
        &self,
        buffer: &MemObject,
        blocking: bool,
        offset: usize,
        data: &[f32],
        deps: &[&Event],
    ) -> Result<Event> {
        unsafe { self.enqueue_write_buffer(buffer, blocking, offset, bytemuck::cast_slice(data), deps) }
    }

    /// # Safety
    ///
    /// Same as [`CommandQueue::enqueue_read_buffer`].
    pub unsafe fn enqueue_read_buffer_f32(
        &self,
        buffer: &MemObject,
        blocking: bool,
        offset: usize,
        data: &mut [f32],
        deps: &[&Event],
    ) -> Result<Event> {
        unsafe { self.enqueue_read_buffer(buffer, blocking, offset, bytemuck::cast_slice_mut(data), deps) }
    }

    /// Blocking write of `data` into `buffer` at byte `offset`.
    pub fn write_buffer(&self, buffer: &MemObject, offset: usize, data: &[u8]) -> Result<()> {
        // Blocking: the driver is done with `data` when the call returns.
        unsafe { self.enqueue_write_buffer(buffer, true, offset, data, &[]) }.map(drop)
    }

    /// Blocking read of `buffer` at byte `offset` into `data`.
    pub fn read_buffer(&self, buffer: &MemObject, offset: usize, data: &mut [u8]) -> Result<()> {
        unsafe { self.enqueue_read_buffer(buffer, true, offset, data, &[]) }.map(drop)
    }

    pub fn write_buffer_f32(&self, buffer: &MemObject, offset: usize, data: &[f32]) -> Result<()> {
        self.write_buffer(buffer, offset, bytemuck::cast_slice(data))
    }

    pub fn read_buffer_f32(&self, buffer: &MemObject, offset: usize, data: &mut [f32]) -> Result<()> {
        self.read_buffer(buffer, offset, bytemuck::cast_slice_mut(data))
    }

    pub fn enqueue_copy_buffer(
        &self,
        src: &MemObject,
        dst: &MemObject,
        src_offset: usize,
        dst_offset: usize,
        byte_count: usize,
        deps: &[&Event],
    ) -> Result<Event> {
        let (src, dst) = (src.raw()?, dst.raw()?);
        self.submit("buffer copy", deps, |driver, queue, deps| {
            driver.enqueue_copy_buffer(queue, src, dst, src_offset, dst_offset, byte_count, deps)
        })
    }

    // ============================================================================================
    // Mapping
    // ============================================================================================

    /// Map `size` bytes of `buffer` at `offset` into host memory.
    ///
    /// If the driver produces the map event but no host pointer, the error
    /// is [`crate::ErrorKind::UnknownFailure`] and carries that event.
    pub fn enqueue_map_buffer(
        &self,
        buffer: &MemObject,
        blocking: bool,
        flags: MapFlags,
        offset: usize,
        size: usize,
        deps: &[&Event],
    ) -> Result<(MappedMemObject, Event)> {
        let mem = buffer.raw()?;
        let queue = self.handle.get()?;
        let deps = wait_list(deps)?;
        let region = self
            .driver()
            .enqueue_map_buffer(queue, mem, blocking, flags, offset, size, &deps)
            .map_err(|source| Error::from_wait("buffer map", source))?;
        self.mapped(region, |_| size)
    }

    /// Map a pixel region of `image` into host memory.
    ///
    /// The window is tightly packed; its size is `slice_pitch * region[2]`
    /// for 3D images and `row_pitch * region[1]` for 2D images.
    pub fn enqueue_map_image(
        &self,
        image: &MemObject,
        blocking: bool,
        flags: MapFlags,
        origin: [usize; 3],
        region: [usize; 3],
        deps: &[&Event],
    ) -> Result<(MappedMemObject, Event)> {
        let mem = image.raw()?;
        let queue = self.handle.get()?;
        let deps = wait_list(deps)?;
        let mapped = self
            .driver()
            .enqueue_map_image(queue, mem, blocking, flags, origin, region, &deps)
            .map_err(|source| Error::from_wait("image map", source))?;
        let image_type = image.mem_type();
        self.mapped(mapped, |pitch| mapped_image_size(image_type, pitch, region))
    }

    fn mapped(&self, region: MappedRegion, size: impl FnOnce(Pitch) -> usize) -> Result<(MappedMemObject, Event)> {
        let event = Event::new(Arc::clone(self.handle.driver()), region.event)?;
        let Some(ptr) = NonNull::new(region.ptr) else {
            return NullHandleSnafu { what: "mapped pointer", event: Some(event) }.fail();
        };
        let mapped = MappedMemObject::new(ptr, size(region.pitch), region.pitch);
        Ok((mapped, event))
    }

    /// Unmap `mapped`, writing it back to `buffer` if it was mapped for writing.
    ///
    /// On failure the mapping stays live and the error hands it back through
    /// [`Error::into_mapped`].
    pub fn enqueue_unmap_mem_object(
        &self,
        buffer: &MemObject,
        mapped: MappedMemObject,
        deps: &[&Event],
    ) -> Result<Event> {
        let ptr = mapped.as_ptr();
        let issued = buffer.raw().and_then(|mem| {
            let queue = self.handle.get()?;
            let deps = wait_list(deps)?;
            self.driver()
                .enqueue_unmap_mem_object(queue, mem, ptr, deps.as_slice())
                .map_err(|source| Error::from_wait("unmap", source))
        });
        let raw = issued.map_err(|source: Error| Error::Unmap { source: Box::new(source), mapped })?;
        tracing::trace!(event = %raw, "unmap enqueued");
        Event::new(Arc::clone(self.handle.driver()), raw)
    }

    // ============================================================================================
    // Kernels
    // ============================================================================================

    /// Dispatch `kernel` over a work space of `global_size.len()` dimensions.
    ///
    /// `global_offset` and `local_size`, when present, must have one entry per
    /// dimension. Without `local_size` the driver picks the work-group shape.
    pub fn enqueue_nd_range_kernel(
        &self,
        kernel: &Kernel,
        global_offset: Option<&[usize]>,
        global_size: &[usize],
        local_size: Option<&[usize]>,
        deps: &[&Event],
    ) -> Result<Event> {
        check_work_dims(global_offset, global_size, local_size)?;
        let kernel = kernel.raw()?;
        self.submit("kernel dispatch", deps, |driver, queue, deps| {
            driver.enqueue_nd_range_kernel(queue, kernel, global_offset, global_size, local_size, deps)
        })
    }

    /// Dispatch `kernel` as a single work item.
    pub fn enqueue_task(&self, kernel: &Kernel, deps: &[&Event]) -> Result<Event> {
        let kernel = kernel.raw()?;
        self.submit("task", deps, |driver, queue, deps| driver.enqueue_task(queue, kernel, deps))
    }

    // ============================================================================================
    // Image transfers
    // ============================================================================================

    /// Enqueue a copy of a pixel region of `image` into `data`. Zero pitches
    /// mean tightly packed host rows and slices.
    ///
    /// # Safety
    ///
    /// When `blocking` is false, `data` must stay alive and must not be
    /// accessed until the returned event completes.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_read_image(
        &self,
        image: &MemObject,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        data: &mut [u8],
        deps: &[&Event],
    ) -> Result<Event> {
        let mem = image.raw()?;
        let pitch = Pitch { row_pitch, slice_pitch };
        self.submit("image read", deps, |driver, queue, deps| unsafe {
            driver.enqueue_read_image(queue, mem, blocking, origin, region, pitch, data.as_mut_ptr(), data.len(), deps)
        })
    }

    /// Enqueue a copy of `data` into a pixel region of `image`.
    ///
    /// # Safety
    ///
    /// When `blocking` is false, `data` must stay alive and unmodified until
    /// the returned event completes.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn enqueue_write_image(
        &self,
        image: &MemObject,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        row_pitch: usize,
        slice_pitch: usize,
        data: &[u8],
        deps: &[&Event],
    ) -> Result<Event> {
        let mem = image.raw()?;
        let pitch = Pitch { row_pitch, slice_pitch };
        self.submit("image write", deps, |driver, queue, deps| unsafe {
            driver.enqueue_write_image(queue, mem, blocking, origin, region, pitch, data.as_ptr(), data.len(), deps)
        })
    }

    // ============================================================================================
    // Graphics sharing
    // ============================================================================================

    /// Take `mem` over from the graphics API before device commands use it.
    pub fn enqueue_acquire_graphics_object(&self, mem: &MemObject, deps: &[&Event]) -> Result<Event> {
        let mem = mem.raw()?;
        self.submit("graphics acquire", deps, |driver, queue, deps| {
            driver.enqueue_acquire_graphics_objects(queue, &[mem], deps)
        })
    }

    /// Hand `mem` back to the graphics API.
    pub fn enqueue_release_graphics_object(&self, mem: &MemObject, deps: &[&Event]) -> Result<Event> {
        let mem = mem.raw()?;
        self.submit("graphics release", deps, |driver, queue, deps| {
            driver.enqueue_release_graphics_objects(queue, &[mem], deps)
        })
    }

    // ============================================================================================
    // Synchronization
    // ============================================================================================

    /// Enqueue an event that completes after `deps`, or after every command
    /// enqueued before it when `deps` is empty.
    pub fn enqueue_marker(&self, deps: &[&Event]) -> Result<Event> {
        self.submit("marker", deps, |driver, queue, deps| driver.enqueue_marker(queue, deps))
    }

    /// Issue pending commands to the device without waiting for them.
    pub fn flush(&self) -> Result<()> {
        self.driver().flush(self.handle.get()?).context(OperationSnafu { what: "flush" })
    }

    /// Block until every command enqueued so far has completed.
    ///
    /// A command that failed since the previous `finish` is reported as
    /// [`crate::ErrorKind::DeviceSideFailure`].
    pub fn finish(&self) -> Result<()> {
        self.driver().finish(self.handle.get()?).map_err(|source| Error::from_wait("finish", source))
    }
}

/// Window size of an image map with the pitch the driver reported.
fn mapped_image_size(image_type: MemObjectType, pitch: Pitch, region: [usize; 3]) -> usize {
    match image_type {
        MemObjectType::Image3d if pitch.slice_pitch != 0 => pitch.slice_pitch * region[2],
        _ => pitch.row_pitch * region[1],
    }
}

fn check_work_dims(
    global_offset: Option<&[usize]>,
    global_size: &[usize],
    local_size: Option<&[usize]>,
) -> Result<()> {
    let dims = global_size.len();
    let source = if !(1..=3).contains(&dims) {
        gantry_driver::Error::InvalidWorkDimension
    } else if global_offset.is_some_and(|offset| offset.len() != dims) {
        gantry_driver::Error::InvalidGlobalOffset
    } else if local_size.is_some_and(|local| local.len() != dims) {
        gantry_driver::Error::InvalidWorkGroupSize
    } else {
        return Ok(());
    };
    Err(source).context(OperationSnafu { what: "kernel dispatch" })
}
