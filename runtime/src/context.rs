//! Device contexts: the factory for every other runtime object.

use std::sync::Arc;

use gantry_driver::{
    ChannelOrder, ChannelType, ContextProperty, DeviceId, Driver, GraphicsResource, ImageDesc, ImageFormat, MemFlags,
    MemObjectType, QueueProperties, RawContext,
};
use snafu::ResultExt;

use crate::error::{CreateSnafu, OperationSnafu, Result};
use crate::event::Event;
use crate::handle::Owned;
use crate::kernel::Kernel;
use crate::memory::MemObject;
use crate::queue::CommandQueue;

/// Upper bound on the number of formats [`Context::supported_image_formats`] returns.
pub const MAX_IMAGE_FORMATS: usize = 256;

/// A native context over an ordered set of devices.
///
/// Objects created from a context hold their own reference on the native
/// context, so releasing or dropping the `Context` never invalidates them.
#[derive(Debug)]
pub struct Context {
    handle: Owned<RawContext>,
    devices: Vec<DeviceId>,
}

impl Context {
    /// Create a context for `devices`.
    ///
    /// `properties` is an ordered list of `(key, value)` attributes, for
    /// instance the graphics-sharing attributes of an interop setup.
    pub fn new(
        driver: Arc<dyn Driver>,
        devices: &[DeviceId],
        properties: Option<&[ContextProperty]>,
    ) -> Result<Self> {
        if devices.is_empty() {
            let source = gantry_driver::Error::InvalidValue { what: "empty device list" };
            return Err(source).context(CreateSnafu { what: "context" });
        }
        let raw = driver.create_context(devices, properties).context(CreateSnafu { what: "context" })?;
        Ok(Self { handle: Owned::new(driver, raw)?, devices: devices.to_vec() })
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        self.handle.driver()
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Give the context reference back. Objects created from it stay usable.
    pub fn release(&mut self) {
        self.handle.release();
    }

    fn shared(&self) -> Arc<dyn Driver> {
        Arc::clone(self.handle.driver())
    }

    pub fn create_command_queue(&self, device: DeviceId, properties: QueueProperties) -> Result<CommandQueue> {
        let raw = self
            .driver()
            .create_command_queue(self.handle.get()?, device, properties)
            .context(CreateSnafu { what: "command queue" })?;
        CommandQueue::new(self.shared(), raw, device, properties)
    }

    /// Allocate an uninitialized buffer of `size` bytes.
    pub fn create_empty_buffer(&self, flags: MemFlags, size: usize) -> Result<MemObject> {
        let raw = self
            .driver()
            .create_buffer(self.handle.get()?, flags, size, None)
            .context(CreateSnafu { what: "buffer" })?;
        MemObject::new(self.shared(), raw, size, MemObjectType::Buffer)
    }

    /// Allocate a buffer initialized from `data`.
    ///
    /// `COPY_HOST_PTR` is added unless `flags` already name a host pointer mode.
    pub fn create_buffer(&self, flags: MemFlags, data: &[u8]) -> Result<MemObject> {
        if data.is_empty() {
            return Err(gantry_driver::Error::InvalidBufferSize).context(CreateSnafu { what: "buffer" });
        }
        let flags = if flags.takes_host_data() { flags } else { flags | MemFlags::COPY_HOST_PTR };
        let raw = self
            .driver()
            .create_buffer(self.handle.get()?, flags, data.len(), Some(data))
            .context(CreateSnafu { what: "buffer" })?;
        MemObject::new(self.shared(), raw, data.len(), MemObjectType::Buffer)
    }

    pub fn create_buffer_f32(&self, flags: MemFlags, data: &[f32]) -> Result<MemObject> {
        self.create_buffer(flags, bytemuck::cast_slice(data))
    }

    /// Wrap a render buffer or texture of the graphics API this context shares with.
    ///
    /// `size` is recorded as given. Releasing the memory object never touches
    /// the graphics resource.
    pub fn create_buffer_from_graphics_resource(
        &self,
        flags: MemFlags,
        resource: GraphicsResource,
        size: usize,
    ) -> Result<MemObject> {
        let raw = self
            .driver()
            .create_from_graphics_resource(self.handle.get()?, flags, resource)
            .context(CreateSnafu { what: "graphics memory object" })?;
        MemObject::new(self.shared(), raw, size, MemObjectType::Buffer)
    }

    pub fn create_image(&self, flags: MemFlags, format: ImageFormat, desc: ImageDesc) -> Result<MemObject> {
        let context = self.handle.get()?;
        let size = desc.size_in_bytes(&format).context(CreateSnafu { what: "image" })?;
        let raw = self.driver().create_image(context, flags, format, desc).context(CreateSnafu { what: "image" })?;
        MemObject::new(self.shared(), raw, size, desc.image_type)
    }

    /// Image formats the context supports for `image_type`, in driver order.
    ///
    /// At most [`MAX_IMAGE_FORMATS`] entries are returned; the rest are dropped.
    pub fn supported_image_formats(&self, flags: MemFlags, image_type: MemObjectType) -> Result<Vec<ImageFormat>> {
        let mut formats = vec![ImageFormat::new(ChannelOrder::R, ChannelType::UnormInt8); MAX_IMAGE_FORMATS];
        let total = self
            .driver()
            .supported_image_formats(self.handle.get()?, flags, image_type, &mut formats)
            .context(OperationSnafu { what: "image format query" })?;
        if total > MAX_IMAGE_FORMATS {
            tracing::debug!(total, kept = MAX_IMAGE_FORMATS, "image format list truncated");
        }
        formats.truncate(total);
        Ok(formats)
    }

    /// Create a user event, completed by the host through
    /// [`Event::set_complete`] or [`Event::set_error`].
    pub fn create_user_event(&self) -> Result<Event> {
        let raw = self.driver().create_user_event(self.handle.get()?).context(CreateSnafu { what: "user event" })?;
        Event::new(self.shared(), raw)
    }

    /// Look up a compiled kernel by entry point name.
    pub fn create_kernel(&self, name: &str) -> Result<Kernel> {
        let raw = self.driver().create_kernel(self.handle.get()?, name).context(CreateSnafu { what: "kernel" })?;
        Kernel::new(self.shared(), raw, name)
    }
}
