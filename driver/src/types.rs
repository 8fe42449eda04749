//! Flag sets, enumerations and plain descriptors shared by every driver.

use bitflags::bitflags;
use smallvec::SmallVec;
use strum::{Display, EnumIter};

use crate::error::{Error, InvalidImageSizeSnafu, InvalidValueSnafu, Result};
use crate::handle::RawMem;

bitflags! {
    /// Access and host-pointer mode of a memory object.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MemFlags: u64 {
        const READ_WRITE = 1 << 0;
        const WRITE_ONLY = 1 << 1;
        const READ_ONLY = 1 << 2;
        /// Back the allocation by the host region handed to the creation call.
        const USE_HOST_PTR = 1 << 3;
        const ALLOC_HOST_PTR = 1 << 4;
        /// Initialize the allocation from the host region at creation.
        const COPY_HOST_PTR = 1 << 5;
    }
}

impl MemFlags {
    const ACCESS: MemFlags =
        MemFlags::READ_WRITE.union(MemFlags::WRITE_ONLY).union(MemFlags::READ_ONLY);

    /// Whether the flags ask the driver to read a host region at creation.
    pub fn takes_host_data(self) -> bool {
        self.intersects(MemFlags::USE_HOST_PTR | MemFlags::COPY_HOST_PTR)
    }

    /// Reject mutually exclusive combinations.
    pub fn validate(self) -> Result<()> {
        snafu::ensure!(
            (self & Self::ACCESS).bits().count_ones() <= 1,
            InvalidValueSnafu { what: "conflicting memory access flags" }
        );
        snafu::ensure!(
            !self.contains(MemFlags::USE_HOST_PTR | MemFlags::COPY_HOST_PTR)
                && !self.contains(MemFlags::USE_HOST_PTR | MemFlags::ALLOC_HOST_PTR),
            InvalidValueSnafu { what: "conflicting host pointer flags" }
        );
        Ok(())
    }
}

impl Default for MemFlags {
    fn default() -> Self {
        MemFlags::READ_WRITE
    }
}

bitflags! {
    /// Access requested when mapping device memory into the host.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u64 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Write access whose initial contents are undefined.
        const WRITE_INVALIDATE_REGION = 1 << 2;
    }
}

impl MapFlags {
    /// The mapped region must be filled from the device before the host sees it.
    pub fn reads_device(self) -> bool {
        !self.contains(MapFlags::WRITE_INVALIDATE_REGION)
    }

    /// The mapped region must be written back when unmapped.
    pub fn writes_device(self) -> bool {
        self.intersects(MapFlags::WRITE | MapFlags::WRITE_INVALIDATE_REGION)
    }
}

bitflags! {
    /// Execution properties of a command queue.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct QueueProperties: u64 {
        const OUT_OF_ORDER_EXEC_MODE_ENABLE = 1 << 0;
        const PROFILING_ENABLE = 1 << 1;
    }
}

/// Kind of memory object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum MemObjectType {
    Buffer,
    Image2d,
    Image3d,
}

/// Channel layout of an image element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ChannelOrder {
    R,
    A,
    Rg,
    Ra,
    Rgb,
    Rgba,
    Bgra,
    Argb,
    Intensity,
    Luminance,
}

impl ChannelOrder {
    pub fn channel_count(self) -> usize {
        match self {
            ChannelOrder::R | ChannelOrder::A | ChannelOrder::Intensity | ChannelOrder::Luminance => 1,
            ChannelOrder::Rg | ChannelOrder::Ra => 2,
            ChannelOrder::Rgb => 3,
            ChannelOrder::Rgba | ChannelOrder::Bgra | ChannelOrder::Argb => 4,
        }
    }
}

/// Storage type of each image channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ChannelType {
    SnormInt8,
    SnormInt16,
    UnormInt8,
    UnormInt16,
    SignedInt8,
    SignedInt16,
    SignedInt32,
    UnsignedInt8,
    UnsignedInt16,
    UnsignedInt32,
    HalfFloat,
    Float,
}

impl ChannelType {
    pub fn bytes(self) -> usize {
        match self {
            ChannelType::SnormInt8 | ChannelType::UnormInt8 | ChannelType::SignedInt8 | ChannelType::UnsignedInt8 => 1,
            ChannelType::SnormInt16
            | ChannelType::UnormInt16
            | ChannelType::SignedInt16
            | ChannelType::UnsignedInt16
            | ChannelType::HalfFloat => 2,
            ChannelType::SignedInt32 | ChannelType::UnsignedInt32 | ChannelType::Float => 4,
        }
    }
}

/// A (channel order, channel data type) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageFormat {
    pub channel_order: ChannelOrder,
    pub channel_data_type: ChannelType,
}

impl ImageFormat {
    pub const fn new(channel_order: ChannelOrder, channel_data_type: ChannelType) -> Self {
        Self { channel_order, channel_data_type }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.channel_order.channel_count() * self.channel_data_type.bytes()
    }
}

/// Dimensions of an image allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub image_type: MemObjectType,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl ImageDesc {
    pub fn new_2d(width: usize, height: usize) -> Self {
        Self { image_type: MemObjectType::Image2d, width, height, depth: 1 }
    }

    pub fn new_3d(width: usize, height: usize, depth: usize) -> Self {
        Self { image_type: MemObjectType::Image3d, width, height, depth }
    }

    /// Check the dimensions against the image type.
    pub fn validate(&self) -> Result<()> {
        match self.image_type {
            MemObjectType::Buffer => InvalidValueSnafu { what: "buffer is not an image type" }.fail(),
            MemObjectType::Image2d => {
                snafu::ensure!(self.width > 0 && self.height > 0 && self.depth == 1, InvalidImageSizeSnafu);
                Ok(())
            }
            MemObjectType::Image3d => {
                snafu::ensure!(self.width > 0 && self.height > 0 && self.depth > 0, InvalidImageSizeSnafu);
                Ok(())
            }
        }
    }

    /// Tightly packed layout of this image for the given format.
    pub fn layout(&self, format: &ImageFormat) -> Result<Pitch> {
        self.width
            .checked_mul(format.bytes_per_pixel())
            .and_then(|row_bytes| Pitch::packed(row_bytes, self.height))
            .ok_or(Error::InvalidImageSize)
    }

    pub fn size_in_bytes(&self, format: &ImageFormat) -> Result<usize> {
        self.layout(format)?.slice_pitch.checked_mul(self.depth).ok_or(Error::InvalidImageSize)
    }
}

/// Row and slice pitch of a pitched 3D byte region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pitch {
    pub row_pitch: usize,
    pub slice_pitch: usize,
}

impl Pitch {
    /// Pitch of a single contiguous row of `len` bytes.
    pub fn linear(len: usize) -> Self {
        Self { row_pitch: len, slice_pitch: len }
    }

    /// Pitch of a tightly packed region `row_bytes` wide and `rows` tall.
    pub fn packed(row_bytes: usize, rows: usize) -> Option<Self> {
        Some(Self { row_pitch: row_bytes, slice_pitch: row_bytes.checked_mul(rows)? })
    }

    /// Resolve zero pitches to the tightly packed value.
    pub fn or_packed(self, row_bytes: usize, rows: usize) -> Option<Self> {
        let row_pitch = if self.row_pitch == 0 { row_bytes } else { self.row_pitch };
        let slice_pitch = if self.slice_pitch == 0 { row_pitch.checked_mul(rows)? } else { self.slice_pitch };
        Some(Self { row_pitch, slice_pitch })
    }

    /// Byte offset of `origin` (x already in bytes).
    pub fn offset(&self, origin: [usize; 3]) -> Option<usize> {
        origin[1]
            .checked_mul(self.row_pitch)?
            .checked_add(origin[2].checked_mul(self.slice_pitch)?)?
            .checked_add(origin[0])
    }

    /// Number of bytes spanned by a region `[row_bytes, rows, slices]`.
    pub fn span(&self, region: [usize; 3]) -> Option<usize> {
        if region.contains(&0) {
            return Some(0);
        }
        self.offset([region[0], region[1] - 1, region[2] - 1])
    }
}

/// One `(key, value)` context creation attribute.
///
/// Property lists are passed as ordinary slices; the zero terminator the
/// native API expects is the driver's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextProperty {
    pub key: u64,
    pub value: u64,
}

impl ContextProperty {
    pub const PLATFORM: u64 = 0x1084;
    pub const GL_CONTEXT: u64 = 0x2008;
    pub const EGL_DISPLAY: u64 = 0x2009;
    pub const GLX_DISPLAY: u64 = 0x200A;
    pub const WGL_HDC: u64 = 0x200B;
    pub const CGL_SHAREGROUP: u64 = 0x1000_0000;

    pub const fn new(key: u64, value: u64) -> Self {
        Self { key, value }
    }

    /// Whether this attribute establishes graphics-API sharing.
    pub fn is_graphics_sharing(&self) -> bool {
        matches!(
            self.key,
            Self::GL_CONTEXT | Self::EGL_DISPLAY | Self::GLX_DISPLAY | Self::WGL_HDC | Self::CGL_SHAREGROUP
        )
    }
}

/// A resource owned by an external graphics API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphicsResource {
    RenderBuffer(u32),
    Texture2d(u32),
}

/// Execution state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventStatus {
    Queued,
    Submitted,
    Running,
    Complete,
    /// Terminated with the given (negative) status code.
    Error(i32),
}

impl EventStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Complete | EventStatus::Error(_))
    }
}

/// Device timestamps of a command, in nanoseconds from the driver epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProfilingInfo {
    pub queued: u64,
    pub submit: u64,
    pub start: u64,
    pub end: u64,
}

/// Value bound to a kernel argument slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelArg {
    Mem(RawMem),
    Bytes(SmallVec<[u8; 16]>),
}

impl KernelArg {
    /// Bind a plain value by copying its bytes.
    pub fn value<T: bytemuck::Pod>(value: &T) -> Self {
        KernelArg::Bytes(SmallVec::from_slice(bytemuck::bytes_of(value)))
    }
}

/// Result of a map enqueue: the host window plus the event of the map command.
#[derive(Debug)]
pub struct MappedRegion {
    /// Host address of the window. Null only when the driver misbehaves.
    pub ptr: *mut u8,
    pub pitch: Pitch,
    pub event: crate::handle::RawEvent,
}
