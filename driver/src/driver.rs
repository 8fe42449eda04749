//! The native device boundary.
//!
//! [`Driver`] is the surface a device implementation exposes to the runtime:
//! object creation and reference release, command enqueue, and event
//! inspection. It deals exclusively in raw handles and never owns host-side
//! wrappers. Every object returned by a `create_*` or `enqueue_*` call carries
//! one reference that must be given back through the matching `release_*`
//! call exactly once.
//!
//! Creation entry points may report success and still return a null handle
//! (or, for maps, a null pointer); callers treat that as a broken driver
//! contract rather than a rejection.

use std::fmt;

use crate::error::Result;
use crate::handle::{DeviceId, RawContext, RawEvent, RawKernel, RawMem, RawQueue};
use crate::types::{
    ContextProperty, EventStatus, GraphicsResource, ImageDesc, ImageFormat, KernelArg, MapFlags, MappedRegion,
    MemFlags, MemObjectType, Pitch, ProfilingInfo, QueueProperties,
};

/// Callback invoked once an event reaches a terminal status.
pub type EventCallback = Box<dyn FnOnce(EventStatus) + Send + 'static>;

/// Native API of a compute device.
///
/// # Thread Safety
///
/// Implementations must accept concurrent calls from any thread. Concurrent
/// enqueues on one queue are serialized by the implementation.
pub trait Driver: Send + Sync + fmt::Debug {
    /// Human readable driver name (for logs).
    fn name(&self) -> &str;

    // ============================================================================================
    // Contexts
    // ============================================================================================

    fn create_context(&self, devices: &[DeviceId], properties: Option<&[ContextProperty]>) -> Result<RawContext>;

    fn release_context(&self, context: RawContext) -> Result<()>;

    /// Write supported image formats into `formats` and return the total
    /// number the device supports, which may exceed `formats.len()`.
    fn supported_image_formats(
        &self,
        context: RawContext,
        flags: MemFlags,
        image_type: MemObjectType,
        formats: &mut [ImageFormat],
    ) -> Result<usize>;

    // ============================================================================================
    // Command queues
    // ============================================================================================

    fn create_command_queue(
        &self,
        context: RawContext,
        device: DeviceId,
        properties: QueueProperties,
    ) -> Result<RawQueue>;

    fn release_command_queue(&self, queue: RawQueue) -> Result<()>;

    /// Issue every pending command of `queue` to the device. Does not wait.
    fn flush(&self, queue: RawQueue) -> Result<()>;

    /// Block until every command enqueued on `queue` has completed.
    fn finish(&self, queue: RawQueue) -> Result<()>;

    // ============================================================================================
    // Memory objects
    // ============================================================================================

    /// Allocate a linear buffer. When `flags` carry a host pointer mode,
    /// `host_data` must hold at least `size` bytes.
    fn create_buffer(
        &self,
        context: RawContext,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<RawMem>;

    fn create_image(
        &self,
        context: RawContext,
        flags: MemFlags,
        format: ImageFormat,
        desc: ImageDesc,
    ) -> Result<RawMem>;

    /// Wrap a graphics resource. The resource itself stays owned by the graphics API.
    fn create_from_graphics_resource(
        &self,
        context: RawContext,
        flags: MemFlags,
        resource: GraphicsResource,
    ) -> Result<RawMem>;

    fn release_mem_object(&self, mem: RawMem) -> Result<()>;

    // ============================================================================================
    // Kernels
    // ============================================================================================

    /// Look up a compiled kernel by entry point name.
    fn create_kernel(&self, context: RawContext, name: &str) -> Result<RawKernel>;

    fn set_kernel_arg(&self, kernel: RawKernel, index: u32, arg: KernelArg) -> Result<()>;

    fn release_kernel(&self, kernel: RawKernel) -> Result<()>;

    // ============================================================================================
    // Events
    // ============================================================================================

    fn create_user_event(&self, context: RawContext) -> Result<RawEvent>;

    /// Complete a user event with `Complete` or an `Error` status.
    fn set_user_event_status(&self, event: RawEvent, status: EventStatus) -> Result<()>;

    fn event_status(&self, event: RawEvent) -> Result<EventStatus>;

    fn event_profiling_info(&self, event: RawEvent) -> Result<ProfilingInfo>;

    /// Block until all `events` are terminal. Fails with
    /// `ExecStatusErrorForEventsInWaitList` if any of them ended in error.
    fn wait_for_events(&self, events: &[RawEvent]) -> Result<()>;

    fn set_event_callback(&self, event: RawEvent, callback: EventCallback) -> Result<()>;

    fn release_event(&self, event: RawEvent) -> Result<()>;

    // ============================================================================================
    // Enqueue
    // ============================================================================================

    /// Enqueue a host to device transfer.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `len` bytes until the returned event
    /// completes (immediately when `blocking`).
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_write_buffer(
        &self,
        queue: RawQueue,
        mem: RawMem,
        blocking: bool,
        offset: usize,
        src: *const u8,
        len: usize,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent>;

    /// Enqueue a device to host transfer.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `len` bytes, and not otherwise
    /// accessed, until the returned event completes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_read_buffer(
        &self,
        queue: RawQueue,
        mem: RawMem,
        blocking: bool,
        offset: usize,
        dst: *mut u8,
        len: usize,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent>;

    #[allow(clippy::too_many_arguments)]
    fn enqueue_copy_buffer(
        &self,
        queue: RawQueue,
        src: RawMem,
        dst: RawMem,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent>;

    #[allow(clippy::too_many_arguments)]
    fn enqueue_map_buffer(
        &self,
        queue: RawQueue,
        mem: RawMem,
        blocking: bool,
        flags: MapFlags,
        offset: usize,
        size: usize,
        wait_list: &[RawEvent],
    ) -> Result<MappedRegion>;

    /// Map an image region. `origin` and `region` are in pixels.
    #[allow(clippy::too_many_arguments)]
    fn enqueue_map_image(
        &self,
        queue: RawQueue,
        mem: RawMem,
        blocking: bool,
        flags: MapFlags,
        origin: [usize; 3],
        region: [usize; 3],
        wait_list: &[RawEvent],
    ) -> Result<MappedRegion>;

    fn enqueue_unmap_mem_object(
        &self,
        queue: RawQueue,
        mem: RawMem,
        mapped: *mut u8,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent>;

    /// Dispatch `kernel` over a 1 to 3 dimensional work space whose
    /// dimensionality is `global_size.len()`.
    fn enqueue_nd_range_kernel(
        &self,
        queue: RawQueue,
        kernel: RawKernel,
        global_offset: Option<&[usize]>,
        global_size: &[usize],
        local_size: Option<&[usize]>,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent>;

    /// Dispatch `kernel` as a single work item.
    fn enqueue_task(&self, queue: RawQueue, kernel: RawKernel, wait_list: &[RawEvent]) -> Result<RawEvent> {
        self.enqueue_nd_range_kernel(queue, kernel, Some([0].as_slice()), &[1], Some([1].as_slice()), wait_list)
    }

    /// Enqueue an image to host transfer. `origin` and `region` are in pixels;
    /// zero pitches mean tightly packed host rows and slices.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `len` bytes until the returned event
    /// completes, and `len` must cover the region at the given pitch.
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_read_image(
        &self,
        queue: RawQueue,
        mem: RawMem,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        pitch: Pitch,
        dst: *mut u8,
        len: usize,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent>;

    /// Enqueue a host to image transfer.
    ///
    /// # Safety
    ///
    /// `src` must be valid for reads of `len` bytes until the returned event completes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_write_image(
        &self,
        queue: RawQueue,
        mem: RawMem,
        blocking: bool,
        origin: [usize; 3],
        region: [usize; 3],
        pitch: Pitch,
        src: *const u8,
        len: usize,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent>;

    fn enqueue_acquire_graphics_objects(
        &self,
        queue: RawQueue,
        mems: &[RawMem],
        wait_list: &[RawEvent],
    ) -> Result<RawEvent>;

    fn enqueue_release_graphics_objects(
        &self,
        queue: RawQueue,
        mems: &[RawMem],
        wait_list: &[RawEvent],
    ) -> Result<RawEvent>;

    /// Enqueue a command that completes once `wait_list` has (or, when empty,
    /// once every command enqueued before it has).
    fn enqueue_marker(&self, queue: RawQueue, wait_list: &[RawEvent]) -> Result<RawEvent>;
}
