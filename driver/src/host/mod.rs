//! Reference driver that executes on the host CPU.
//!
//! Every handle is an entry in a per-kind reference-counted table. Queues,
//! memory objects, kernels and events retain their context and give that
//! reference back when they are destroyed, so a context outlives everything
//! created from it.
//!
//! Kernels are Rust closures registered by name, either up front through
//! [`HostDriverBuilder::kernel`] or later through [`HostDriver::register_kernel`].

mod config;
mod event;
mod kernel;
mod memory;
mod queue;
mod table;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use strum::IntoEnumIterator;

use crate::driver::{Driver, EventCallback};
use crate::error::{
    Error, InvalidBufferSizeSnafu, InvalidContextSnafu, InvalidDeviceSnafu, InvalidGlObjectSnafu,
    InvalidHostPtrSnafu, InvalidImageFormatDescriptorSnafu, InvalidPropertySnafu, InvalidValueSnafu,
    MemCopyOverlapSnafu, Result,
};
use crate::handle::{DeviceId, RawContext, RawEvent, RawKernel, RawMem, RawQueue};
use crate::types::{
    ChannelOrder, ChannelType, ContextProperty, EventStatus, GraphicsResource, ImageDesc, ImageFormat, KernelArg,
    MapFlags, MappedRegion, MemFlags, MemObjectType, Pitch, ProfilingInfo, QueueProperties,
};

pub use config::{HostConfig, NullHandles};
pub use kernel::{COMMAND_FAULT, KernelFn, NdRange, OUT_OF_BOUNDS_ACCESS, WorkItem};

use event::HostEvent;
use kernel::{BoundArg, HostKernel, KernelEntry};
use memory::{HostAllocator, HostMem, Mapping, MemKind, Rect, StagingBuffer, Storage};
use queue::{Command, HostPtr, HostQueue};
use table::HandleTable;

#[derive(Debug)]
struct HostContext {
    devices: Vec<DeviceId>,
    graphics_sharing: bool,
}

/// Snapshot of the objects a [`HostDriver`] currently tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostStats {
    pub contexts: usize,
    pub queues: usize,
    pub mems: usize,
    pub kernels: usize,
    pub events: usize,
    /// Bytes held by driver-owned memory objects.
    pub memory_in_use: usize,
    /// Release calls that named no live object.
    pub rejected_releases: usize,
}

impl HostStats {
    /// Number of live handles of any kind.
    pub fn live_handles(&self) -> usize {
        self.contexts + self.queues + self.mems + self.kernels + self.events
    }
}

struct Shared {
    config: HostConfig,
    devices: Vec<DeviceId>,
    next_id: AtomicU64,
    allocator: Arc<HostAllocator>,
    image_formats: Vec<ImageFormat>,
    entry_points: papaya::HashMap<String, KernelEntry>,
    graphics: HashMap<GraphicsResource, Arc<Storage>>,
    contexts: HandleTable<HostContext>,
    queues: HandleTable<HostQueue>,
    mems: HandleTable<HostMem>,
    kernels: HandleTable<HostKernel>,
    events: HandleTable<HostEvent>,
    rejected_releases: AtomicUsize,
}

/// Software device driver running every command on host threads.
///
/// Cloning is cheap and yields a handle to the same driver state.
#[derive(Clone)]
pub struct HostDriver {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for HostDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDriver").field("devices", &self.shared.devices).field("stats", &self.stats()).finish()
    }
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`HostDriver`].
#[must_use]
pub struct HostDriverBuilder {
    config: HostConfig,
    entry_points: Vec<(String, KernelEntry)>,
    image_formats: Option<Vec<ImageFormat>>,
    graphics: Vec<(GraphicsResource, usize)>,
}

impl HostDriverBuilder {
    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn devices(mut self, count: usize) -> Self {
        self.config.device_count = count.max(1);
        self
    }

    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config.memory_limit = Some(bytes);
        self
    }

    pub fn null_handles(mut self, sites: NullHandles) -> Self {
        self.config.null_handles = sites;
        self
    }

    /// Register a kernel entry point taking `arity` arguments.
    pub fn kernel<F>(mut self, name: impl Into<String>, arity: u32, func: F) -> Self
    where
        F: Fn(&mut WorkItem<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.entry_points.push((name.into(), KernelEntry { arity, func: Arc::new(func) }));
        self
    }

    /// Replace the supported image formats (every order/type pair by default).
    pub fn image_formats(mut self, formats: impl IntoIterator<Item = ImageFormat>) -> Self {
        self.image_formats = Some(formats.into_iter().collect());
        self
    }

    /// Make a graphics resource of `size` bytes available for sharing.
    pub fn graphics_resource(mut self, resource: GraphicsResource, size: usize) -> Self {
        self.graphics.push((resource, size));
        self
    }

    pub fn build(self) -> HostDriver {
        let devices = (1..=self.config.device_count as u64).map(DeviceId::from_raw).collect();
        let image_formats = self.image_formats.unwrap_or_else(|| {
            ChannelOrder::iter()
                .flat_map(|order| ChannelType::iter().map(move |ty| ImageFormat::new(order, ty)))
                .collect()
        });
        let entry_points = papaya::HashMap::new();
        {
            let guard = entry_points.guard();
            for (name, entry) in self.entry_points {
                entry_points.insert(name, entry, &guard);
            }
        }
        let graphics = self.graphics.into_iter().map(|(resource, size)| (resource, Storage::external(size))).collect();

        tracing::debug!(devices = self.config.device_count, limit = ?self.config.memory_limit, "host driver created");
        HostDriver {
            shared: Arc::new(Shared {
                allocator: Arc::new(HostAllocator::new(self.config.memory_limit)),
                config: self.config,
                devices,
                // Zero is the null handle.
                next_id: AtomicU64::new(1),
                image_formats,
                entry_points,
                graphics,
                contexts: HandleTable::new(Error::InvalidContext),
                queues: HandleTable::new(Error::InvalidCommandQueue),
                mems: HandleTable::new(Error::InvalidMemObject),
                kernels: HandleTable::new(Error::InvalidKernel),
                events: HandleTable::new(Error::InvalidEvent),
                rejected_releases: AtomicUsize::new(0),
            }),
        }
    }
}

impl HostDriver {
    /// Driver configured from the environment, see [`HostConfig::from_env`].
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> HostDriverBuilder {
        HostDriverBuilder {
            config: HostConfig::from_env(),
            entry_points: Vec::new(),
            image_formats: None,
            graphics: Vec::new(),
        }
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.shared.devices
    }

    /// Register (or replace) a kernel entry point at runtime.
    pub fn register_kernel<F>(&self, name: impl Into<String>, arity: u32, func: F)
    where
        F: Fn(&mut WorkItem<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let map = &self.shared.entry_points;
        map.insert(name.into(), KernelEntry { arity, func: Arc::new(func) }, &map.guard());
    }

    pub fn stats(&self) -> HostStats {
        let shared = &self.shared;
        HostStats {
            contexts: shared.contexts.len(),
            queues: shared.queues.len(),
            mems: shared.mems.len(),
            kernels: shared.kernels.len(),
            events: shared.events.len(),
            memory_in_use: shared.allocator.in_use(),
            rejected_releases: shared.rejected_releases.load(Ordering::Acquire),
        }
    }

    /// Whether a graphics-shared memory object is currently acquired by a queue.
    pub fn is_acquired(&self, mem: RawMem) -> Result<bool> {
        Ok(self.shared.mems.get(mem.as_raw())?.is_acquired())
    }
}

impl Shared {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn null(&self, site: NullHandles) -> bool {
        self.config.null_handles.contains(site)
    }

    fn rejected<T>(&self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.rejected_releases.fetch_add(1, Ordering::AcqRel);
        }
        result
    }

    /// Give back a reference a child object held on its context.
    fn release_context_ref(&self, context: RawContext) {
        match self.contexts.release(context.as_raw()) {
            Ok(Some(_)) => tracing::debug!(%context, "context destroyed"),
            Ok(None) => {}
            Err(err) => tracing::warn!(%context, %err, "context reference already gone"),
        }
    }

    fn queue_and_mem(&self, queue: RawQueue, mem: RawMem) -> Result<(Arc<HostQueue>, Arc<HostMem>)> {
        let queue = self.queues.get(queue.as_raw())?;
        let mem = self.mems.get(mem.as_raw())?;
        snafu::ensure!(queue.context == mem.context, InvalidContextSnafu);
        Ok((queue, mem))
    }

    fn wait_events(&self, context: RawContext, wait_list: &[RawEvent]) -> Result<Vec<Arc<HostEvent>>> {
        wait_list
            .iter()
            .map(|raw| {
                let event = self.events.get(raw.as_raw()).map_err(|_| Error::InvalidEventWaitList)?;
                snafu::ensure!(event.context() == context, InvalidContextSnafu);
                Ok(event)
            })
            .collect()
    }

    /// Enqueue `command` and register its event. Blocking submissions wait
    /// for the event and report the command's failure directly.
    fn submit(
        &self,
        queue: &Arc<HostQueue>,
        command: Command,
        wait_list: &[RawEvent],
        blocking: bool,
        barrier: bool,
    ) -> Result<RawEvent> {
        let deps = self.wait_events(queue.context, wait_list)?;
        let id = RawEvent::from_raw(self.next_id());
        let event = queue.enqueue(id, command, deps, barrier)?;
        self.contexts.retain(queue.context.as_raw())?;
        self.events.insert(id.as_raw(), Arc::clone(&event));

        if blocking && let Err(err) = event.wait() {
            self.drop_event(id);
            return Err(err);
        }
        Ok(id)
    }

    fn drop_event(&self, event: RawEvent) {
        if let Ok(Some(event)) = self.events.release(event.as_raw()) {
            self.release_context_ref(event.context());
        }
    }

    fn create_mem(
        &self,
        context: RawContext,
        flags: MemFlags,
        kind: MemKind,
        storage: Arc<Storage>,
        graphics: Option<GraphicsResource>,
    ) -> Result<RawMem> {
        let id = RawMem::from_raw(self.next_id());
        self.contexts.retain(context.as_raw())?;
        let mem = HostMem::new(id, context, flags, kind, storage, graphics);
        tracing::debug!(mem = %id, %context, ty = %mem.mem_type(), size = mem.storage.len(), "memory object created");
        self.mems.insert(id.as_raw(), Arc::new(mem));
        Ok(id)
    }

    fn image_transfer(
        &self,
        mem: &HostMem,
        origin: [usize; 3],
        region: [usize; 3],
        pitch: Pitch,
        len: usize,
    ) -> Result<Rect> {
        let rect = mem.image_rect(origin, region)?;
        let host_pitch = pitch
            .or_packed(rect.region[0], rect.region[1])
            .ok_or(Error::InvalidValue { what: "host pitch overflows" })?;
        let min_slice = host_pitch.row_pitch.checked_mul(rect.region[1]);
        snafu::ensure!(
            host_pitch.row_pitch >= rect.region[0] && min_slice.is_some_and(|min| host_pitch.slice_pitch >= min),
            InvalidValueSnafu { what: "host pitch smaller than region" }
        );
        let rect = rect.with_host_pitch(host_pitch)?;
        snafu::ensure!(len >= rect.host_len(), InvalidValueSnafu { what: "host buffer smaller than region" });
        Ok(rect)
    }

    fn graphics_command(
        &self,
        queue: RawQueue,
        mems: &[RawMem],
        wait_list: &[RawEvent],
        acquire: bool,
    ) -> Result<RawEvent> {
        snafu::ensure!(!mems.is_empty(), InvalidValueSnafu { what: "no graphics objects" });
        let queue = self.queues.get(queue.as_raw())?;
        let mems = mems
            .iter()
            .map(|raw| {
                let (_, mem) = self.queue_and_mem(queue.id, *raw)?;
                snafu::ensure!(mem.graphics.is_some(), InvalidGlObjectSnafu);
                Ok(mem)
            })
            .collect::<Result<Vec<_>>>()?;
        self.submit(&queue, Command::Graphics { mems, acquire }, wait_list, false, false)
    }
}

impl Driver for HostDriver {
    fn name(&self) -> &str {
        "host"
    }

    fn create_context(&self, devices: &[DeviceId], properties: Option<&[ContextProperty]>) -> Result<RawContext> {
        let shared = &self.shared;
        snafu::ensure!(!devices.is_empty(), InvalidValueSnafu { what: "no devices" });
        snafu::ensure!(devices.iter().all(|device| shared.devices.contains(device)), InvalidDeviceSnafu);
        if shared.null(NullHandles::CONTEXT) {
            return Ok(RawContext::NULL);
        }

        let properties = properties.unwrap_or_default();
        let mut graphics_sharing = false;
        for property in properties {
            match property.key {
                ContextProperty::PLATFORM => {}
                _ if property.is_graphics_sharing() => graphics_sharing = true,
                _ => return InvalidPropertySnafu.fail(),
            }
        }

        let id = RawContext::from_raw(shared.next_id());
        shared.contexts.insert(id.as_raw(), Arc::new(HostContext { devices: devices.to_vec(), graphics_sharing }));
        tracing::debug!(context = %id, devices = devices.len(), graphics_sharing, "context created");
        Ok(id)
    }

    fn release_context(&self, context: RawContext) -> Result<()> {
        let shared = &self.shared;
        if shared.rejected(shared.contexts.release(context.as_raw()))?.is_some() {
            tracing::debug!(%context, "context destroyed");
        }
        Ok(())
    }

    fn supported_image_formats(
        &self,
        context: RawContext,
        flags: MemFlags,
        image_type: MemObjectType,
        formats: &mut [ImageFormat],
    ) -> Result<usize> {
        let shared = &self.shared;
        shared.contexts.get(context.as_raw())?;
        flags.validate()?;
        snafu::ensure!(image_type != MemObjectType::Buffer, InvalidValueSnafu { what: "buffer is not an image type" });

        let supported = &shared.image_formats;
        let written = supported.len().min(formats.len());
        formats[..written].copy_from_slice(&supported[..written]);
        Ok(supported.len())
    }

    fn create_command_queue(
        &self,
        context: RawContext,
        device: DeviceId,
        properties: QueueProperties,
    ) -> Result<RawQueue> {
        let shared = &self.shared;
        let ctx = shared.contexts.get(context.as_raw())?;
        snafu::ensure!(ctx.devices.contains(&device), InvalidDeviceSnafu);
        if shared.null(NullHandles::QUEUE) {
            return Ok(RawQueue::NULL);
        }

        let id = RawQueue::from_raw(shared.next_id());
        let queue = HostQueue::new(id, context, device, properties);
        shared.contexts.retain(context.as_raw())?;
        shared.queues.insert(id.as_raw(), queue);
        tracing::debug!(queue = %id, %context, %device, ?properties, "command queue created");
        Ok(id)
    }

    fn release_command_queue(&self, queue: RawQueue) -> Result<()> {
        let shared = &self.shared;
        if let Some(queue) = shared.rejected(shared.queues.release(queue.as_raw()))? {
            queue.shutdown();
            tracing::debug!(queue = %queue.id, "command queue destroyed");
            shared.release_context_ref(queue.context);
        }
        Ok(())
    }

    fn flush(&self, queue: RawQueue) -> Result<()> {
        self.shared.queues.get(queue.as_raw())?.flush();
        Ok(())
    }

    fn finish(&self, queue: RawQueue) -> Result<()> {
        self.shared.queues.get(queue.as_raw())?.finish()
    }

    fn create_buffer(
        &self,
        context: RawContext,
        flags: MemFlags,
        size: usize,
        host_data: Option<&[u8]>,
    ) -> Result<RawMem> {
        let shared = &self.shared;
        shared.contexts.get(context.as_raw())?;
        flags.validate()?;
        snafu::ensure!(size > 0, InvalidBufferSizeSnafu);
        let init = match (flags.takes_host_data(), host_data) {
            (true, Some(data)) if data.len() >= size => Some(data),
            (false, None) => None,
            _ => return InvalidHostPtrSnafu.fail(),
        };
        if shared.null(NullHandles::MEM) {
            return Ok(RawMem::NULL);
        }

        let storage = shared.allocator.alloc(size, init)?;
        shared.create_mem(context, flags, MemKind::Buffer, storage, None)
    }

    fn create_image(
        &self,
        context: RawContext,
        flags: MemFlags,
        format: ImageFormat,
        desc: ImageDesc,
    ) -> Result<RawMem> {
        let shared = &self.shared;
        shared.contexts.get(context.as_raw())?;
        flags.validate()?;
        snafu::ensure!(!flags.takes_host_data(), InvalidHostPtrSnafu);
        snafu::ensure!(shared.image_formats.contains(&format), InvalidImageFormatDescriptorSnafu);
        desc.validate()?;
        let size = desc.size_in_bytes(&format)?;
        if shared.null(NullHandles::MEM) {
            return Ok(RawMem::NULL);
        }

        let storage = shared.allocator.alloc(size, None)?;
        shared.create_mem(context, flags, MemKind::Image { format, desc }, storage, None)
    }

    fn create_from_graphics_resource(
        &self,
        context: RawContext,
        flags: MemFlags,
        resource: GraphicsResource,
    ) -> Result<RawMem> {
        let shared = &self.shared;
        let ctx = shared.contexts.get(context.as_raw())?;
        snafu::ensure!(ctx.graphics_sharing, InvalidContextSnafu);
        flags.validate()?;
        snafu::ensure!(!flags.takes_host_data(), InvalidValueSnafu { what: "graphics memory takes no host data" });
        let storage = shared.graphics.get(&resource).cloned().ok_or(Error::InvalidGlObject)?;
        if shared.null(NullHandles::MEM) {
            return Ok(RawMem::NULL);
        }

        shared.create_mem(context, flags, MemKind::Buffer, storage, Some(resource))
    }

    fn release_mem_object(&self, mem: RawMem) -> Result<()> {
        let shared = &self.shared;
        if let Some(mem) = shared.rejected(shared.mems.release(mem.as_raw()))? {
            tracing::debug!(mem = %mem.id, mapped = mem.mapped_count(), "memory object destroyed");
            shared.release_context_ref(mem.context);
        }
        Ok(())
    }

    fn create_kernel(&self, context: RawContext, name: &str) -> Result<RawKernel> {
        let shared = &self.shared;
        shared.contexts.get(context.as_raw())?;
        let entry = {
            let map = &shared.entry_points;
            map.get(name, &map.guard()).cloned()
        };
        let entry = entry.ok_or(Error::InvalidKernelName)?;
        if shared.null(NullHandles::KERNEL) {
            return Ok(RawKernel::NULL);
        }

        let id = RawKernel::from_raw(shared.next_id());
        shared.contexts.retain(context.as_raw())?;
        shared.kernels.insert(id.as_raw(), Arc::new(HostKernel::new(id, context, name.to_owned(), entry)));
        tracing::debug!(kernel = %id, name, "kernel created");
        Ok(id)
    }

    fn set_kernel_arg(&self, kernel: RawKernel, index: u32, arg: KernelArg) -> Result<()> {
        let shared = &self.shared;
        let kernel = shared.kernels.get(kernel.as_raw())?;
        if let KernelArg::Mem(mem) = &arg {
            let mem = shared.mems.get(mem.as_raw())?;
            snafu::ensure!(mem.context == kernel.context, InvalidContextSnafu);
        }
        kernel.set_arg(index, arg)
    }

    fn release_kernel(&self, kernel: RawKernel) -> Result<()> {
        let shared = &self.shared;
        if let Some(kernel) = shared.rejected(shared.kernels.release(kernel.as_raw()))? {
            tracing::debug!(kernel = %kernel.id, name = %kernel.name, "kernel destroyed");
            shared.release_context_ref(kernel.context);
        }
        Ok(())
    }

    fn create_user_event(&self, context: RawContext) -> Result<RawEvent> {
        let shared = &self.shared;
        shared.contexts.get(context.as_raw())?;
        if shared.null(NullHandles::USER_EVENT) {
            return Ok(RawEvent::NULL);
        }

        let id = RawEvent::from_raw(shared.next_id());
        shared.contexts.retain(context.as_raw())?;
        shared.events.insert(id.as_raw(), Arc::new(HostEvent::new_user(id, context)));
        tracing::debug!(event = %id, %context, "user event created");
        Ok(id)
    }

    fn set_user_event_status(&self, event: RawEvent, status: EventStatus) -> Result<()> {
        if let EventStatus::Error(code) = status {
            snafu::ensure!(code < 0, InvalidValueSnafu { what: "error status must be negative" });
        }
        self.shared.events.get(event.as_raw())?.set_user_status(status)
    }

    fn event_status(&self, event: RawEvent) -> Result<EventStatus> {
        Ok(self.shared.events.get(event.as_raw())?.status())
    }

    fn event_profiling_info(&self, event: RawEvent) -> Result<ProfilingInfo> {
        self.shared.events.get(event.as_raw())?.profiling_info()
    }

    fn wait_for_events(&self, events: &[RawEvent]) -> Result<()> {
        snafu::ensure!(!events.is_empty(), InvalidValueSnafu { what: "empty event list" });
        let events = events.iter().map(|raw| self.shared.events.get(raw.as_raw())).collect::<Result<Vec<_>>>()?;
        event::wait_all(&events)
    }

    fn set_event_callback(&self, event: RawEvent, callback: EventCallback) -> Result<()> {
        self.shared.events.get(event.as_raw())?.on_complete(callback);
        Ok(())
    }

    fn release_event(&self, event: RawEvent) -> Result<()> {
        let shared = &self.shared;
        if let Some(event) = shared.rejected(shared.events.release(event.as_raw()))? {
            tracing::trace!(event = %event.id(), "event destroyed");
            shared.release_context_ref(event.context());
        }
        Ok(())
    }

    unsafe fn enqueue_write_buffer(
        &self,
        queue: RawQueue,
        mem: RawMem,
        blocking: bool,
        offset: usize,
        src: *const u8,
        len: usize,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent> {
        let shared = &self.shared;
        let (queue, mem) = shared.queue_and_mem(queue, mem)?;
        let rect = mem.buffer_range(offset, len)?;
        snafu::ensure!(!src.is_null(), InvalidValueSnafu { what: "null host pointer" });
        let command = Command::Write { storage: Arc::clone(&mem.storage), rect, src: HostPtr(src as *mut u8) };
        shared.submit(&queue, command, wait_list, blocking, false)
    }

    unsafe fn enqueue_read_buffer(
        &self,
        queue: RawQueue,
        mem: RawMem,
        blocking: bool,
        offset: usize,
        dst: *mut u8,
        len: usize,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent> {
        let shared = &self.shared;
        let (queue, mem) = shared.queue_and_mem(queue, mem)?;
        let rect = mem.buffer_range(offset, len)?;
        snafu::ensure!(!dst.is_null(), InvalidValueSnafu { what: "null host pointer" });
        let command = Command::Read { storage: Arc::clone(&mem.storage), rect, dst: HostPtr(dst) };
        shared.submit(&queue, command, wait_list, blocking, false)
    }

    fn enqueue_copy_buffer(
        &self,
        queue: RawQueue,
        src: RawMem,
        dst: RawMem,
        src_offset: usize,
        dst_offset: usize,
        len: usize,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent> {
        let shared = &self.shared;
        let (queue, src) = shared.queue_and_mem(queue, src)?;
        let (_, dst) = shared.queue_and_mem(queue.id, dst)?;
        src.buffer_range(src_offset, len)?;
        dst.buffer_range(dst_offset, len)?;
        if Arc::ptr_eq(&src.storage, &dst.storage) {
            let overlap = src_offset < dst_offset + len && dst_offset < src_offset + len;
            snafu::ensure!(!overlap, MemCopyOverlapSnafu);
        }
        let command = Command::Copy {
            src: Arc::clone(&src.storage),
            dst: Arc::clone(&dst.storage),
            src_offset,
            dst_offset,
            len,
        };
        shared.submit(&queue, command, wait_list, false, false)
    }

    fn enqueue_map_buffer(
        &self,
        queue: RawQueue,
        mem: RawMem,
        blocking: bool,
        flags: MapFlags,
        offset: usize,
        size: usize,
        wait_list: &[RawEvent],
    ) -> Result<MappedRegion> {
        let shared = &self.shared;
        let (queue, mem) = shared.queue_and_mem(queue, mem)?;
        let rect = mem.buffer_range(offset, size)?;
        let pitch = Pitch::linear(size);
        self.map(&queue, &mem, blocking, flags, rect, pitch, wait_list)
    }

    fn enqueue_map_image(
        &self,
        queue: RawQueue,
        mem: RawMem,
        blocking: bool,
        flags: MapFlags,
        origin: [usize; 3],
        region: [usize; 3],
        wait_list: &[RawEvent],
    ) -> Result<MappedRegion> {
        let shared = &self.shared;
        let (queue, mem) = shared.queue_and_mem(queue, mem)?;
        let rect = mem.image_rect(origin, region)?;
        self.map(&queue, &mem, blocking, flags, rect, rect.host_pitch, wait_list)
    }

    fn enqueue_unmap_mem_object(
        &self,
        queue: RawQueue,
        mem: RawMem,
        mapped: *mut u8,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent> {
        let shared = &self.shared;
        let (queue, mem) = shared.queue_and_mem(queue, mem)?;
        let mapping = mem.take_mapping(mapped, queue.id)?;
        let command = Command::Unmap { mem: Arc::clone(&mem), mapping };
        shared.submit(&queue, command, wait_list, false, false)
    }

    fn enqueue_nd_range_kernel(
        &self,
        queue: RawQueue,
        kernel: RawKernel,
        global_offset: Option<&[usize]>,
        global_size: &[usize],
        local_size: Option<&[usize]>,
        wait_list: &[RawEvent],
    ) -> Result<RawEvent> {
        let shared = &self.shared;
        let queue = shared.queues.get(queue.as_raw())?;
        let kernel = shared.kernels.get(kernel.as_raw())?;
        snafu::ensure!(queue.context == kernel.context, InvalidContextSnafu);
        let range = NdRange::new(global_offset, global_size, local_size)?;
        let args = kernel
            .bound_args()?
            .into_iter()
            .map(|arg| match arg {
                KernelArg::Mem(raw) => {
                    let mem = shared.mems.get(raw.as_raw()).map_err(|_| Error::InvalidKernelArgs)?;
                    Ok(BoundArg::Mem(Arc::clone(&mem.storage)))
                }
                KernelArg::Bytes(bytes) => Ok(BoundArg::Bytes(bytes)),
            })
            .collect::<Result<Vec<_>>>()?;

        let command = Command::Kernel { func: Arc::clone(&kernel.entry.func), args, range };
        shared.submit(&queue, command, wait_list, false, false)
    }

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
    ) -> Result<RawEvent> {
        let shared = &self.shared;
        let (queue, mem) = shared.queue_and_mem(queue, mem)?;
        let rect = shared.image_transfer(&mem, origin, region, pitch, len)?;
        snafu::ensure!(!dst.is_null(), InvalidValueSnafu { what: "null host pointer" });
        let command = Command::Read { storage: Arc::clone(&mem.storage), rect, dst: HostPtr(dst) };
        shared.submit(&queue, command, wait_list, blocking, false)
    }

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
    ) -> Result<RawEvent> {
        let shared = &self.shared;
        let (queue, mem) = shared.queue_and_mem(queue, mem)?;
        let rect = shared.image_transfer(&mem, origin, region, pitch, len)?;
        snafu::ensure!(!src.is_null(), InvalidValueSnafu { what: "null host pointer" });
        let command = Command::Write { storage: Arc::clone(&mem.storage), rect, src: HostPtr(src as *mut u8) };
        shared.submit(&queue, command, wait_list, blocking, false)
    }

    fn enqueue_acquire_graphics_objects(
        &self,
        queue: RawQueue,
        mems: &[RawMem],
        wait_list: &[RawEvent],
    ) -> Result<RawEvent> {
        self.shared.graphics_command(queue, mems, wait_list, true)
    }

    fn enqueue_release_graphics_objects(
        &self,
        queue: RawQueue,
        mems: &[RawMem],
        wait_list: &[RawEvent],
    ) -> Result<RawEvent> {
        self.shared.graphics_command(queue, mems, wait_list, false)
    }

    fn enqueue_marker(&self, queue: RawQueue, wait_list: &[RawEvent]) -> Result<RawEvent> {
        let shared = &self.shared;
        let queue = shared.queues.get(queue.as_raw())?;
        shared.submit(&queue, Command::Marker, wait_list, false, true)
    }
}

impl HostDriver {
    #[allow(clippy::too_many_arguments)]
    fn map(
        &self,
        queue: &Arc<HostQueue>,
        mem: &Arc<HostMem>,
        blocking: bool,
        flags: MapFlags,
        rect: Rect,
        pitch: Pitch,
        wait_list: &[RawEvent],
    ) -> Result<MappedRegion> {
        let shared = &self.shared;
        if shared.null(NullHandles::MAP) {
            let event = shared.submit(queue, Command::Marker, wait_list, blocking, false)?;
            return Ok(MappedRegion { ptr: std::ptr::null_mut(), pitch, event });
        }

        let staging = Arc::new(StagingBuffer::new(rect.host_len()));
        let ptr = mem.add_mapping(Mapping { queue: queue.id, flags, rect, staging: Arc::clone(&staging) });
        let command = Command::Map { storage: Arc::clone(&mem.storage), rect, staging, fill: flags.reads_device() };
        match shared.submit(queue, command, wait_list, blocking, false) {
            Ok(event) => Ok(MappedRegion { ptr, pitch, event }),
            Err(err) => {
                if let Err(unmapped) = mem.take_mapping(ptr, queue.id) {
                    tracing::warn!(mem = %mem.id, err = %unmapped, "failed map left no mapping behind");
                }
                Err(err)
            }
        }
    }
}
