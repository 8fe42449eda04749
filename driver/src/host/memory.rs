//! Device memory of the host driver.
//!
//! Allocations live in host RAM behind a `parking_lot` read/write lock and
//! return their bytes to the [`HostAllocator`] budget when the last reference
//! (table entry or in-flight command) goes away. Maps hand out a separate
//! staging window that the unmap command writes back, so the host never holds
//! a pointer into storage that a command may be locking.

use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{
    Error, InvalidCommandQueueSnafu, InvalidMemObjectSnafu, InvalidValueSnafu, MemObjectAllocationFailureSnafu,
    Result,
};
use crate::handle::{RawContext, RawMem, RawQueue};
use crate::types::{GraphicsResource, ImageDesc, ImageFormat, MapFlags, MemFlags, MemObjectType, Pitch};

/// Byte budget shared by every allocation of one driver.
#[derive(Debug)]
pub(crate) struct HostAllocator {
    limit: Option<usize>,
    in_use: AtomicUsize,
}

impl HostAllocator {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit, in_use: AtomicUsize::new(0) }
    }

    /// Allocate `size` zeroed bytes, optionally initialized from `init`.
    pub fn alloc(self: &Arc<Self>, size: usize, init: Option<&[u8]>) -> Result<Arc<Storage>> {
        let reserved = match self.limit {
            Some(limit) => self
                .in_use
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                    used.checked_add(size).filter(|total| *total <= limit)
                })
                .is_ok(),
            None => {
                self.in_use.fetch_add(size, Ordering::AcqRel);
                true
            }
        };
        snafu::ensure!(reserved, MemObjectAllocationFailureSnafu);

        let mut bytes = vec![0u8; size].into_boxed_slice();
        if let Some(init) = init {
            bytes.copy_from_slice(&init[..size]);
        }
        Ok(Arc::new(Storage { bytes: RwLock::new(bytes), len: size, allocator: Some(Arc::clone(self)) }))
    }

    fn free(&self, size: usize) {
        self.in_use.fetch_sub(size, Ordering::AcqRel);
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

/// Backing bytes of a memory object.
#[derive(Debug)]
pub(crate) struct Storage {
    bytes: RwLock<Box<[u8]>>,
    len: usize,
    /// `None` for memory owned by an external graphics resource.
    allocator: Option<Arc<HostAllocator>>,
}

impl Storage {
    /// Storage owned by something other than the driver budget.
    pub fn external(size: usize) -> Arc<Self> {
        Arc::new(Self { bytes: RwLock::new(vec![0u8; size].into_boxed_slice()), len: size, allocator: None })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.bytes.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.bytes.write()
    }

    /// Non-blocking [`Storage::read`]. Commands use this so a worker never
    /// parks on a lock held further down its own stack.
    pub fn try_read(&self) -> Option<RwLockReadGuard<'_, Box<[u8]>>> {
        self.bytes.try_read()
    }

    pub fn try_write(&self) -> Option<RwLockWriteGuard<'_, Box<[u8]>>> {
        self.bytes.try_write()
    }

    /// Address used to order lock acquisition across storages.
    pub fn address(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        if let Some(allocator) = &self.allocator {
            allocator.free(self.len);
        }
    }
}

/// A pitched 3D byte window on device storage and its host-side counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rect {
    /// Byte offset of the window origin in device storage.
    pub device_start: usize,
    pub device_pitch: Pitch,
    pub host_pitch: Pitch,
    /// Extent as `[bytes per row, rows, slices]`.
    pub region: [usize; 3],
    host_len: usize,
}

impl Rect {
    /// Fails if the host side of the window does not fit in the address space.
    pub fn new(device_start: usize, device_pitch: Pitch, host_pitch: Pitch, region: [usize; 3]) -> Result<Self> {
        let host_len = host_pitch.span(region).ok_or(Error::InvalidValue { what: "region overflows host pitch" })?;
        Ok(Self { device_start, device_pitch, host_pitch, region, host_len })
    }

    /// A contiguous `len` byte range starting at `offset`.
    pub fn linear(offset: usize, len: usize) -> Self {
        let pitch = Pitch::linear(len);
        Self { device_start: offset, device_pitch: pitch, host_pitch: pitch, region: [len, 1, 1], host_len: len }
    }

    /// The same window with a different host layout.
    pub fn with_host_pitch(self, host_pitch: Pitch) -> Result<Self> {
        Self::new(self.device_start, self.device_pitch, host_pitch, self.region)
    }

    /// Number of host bytes the window spans.
    pub fn host_len(&self) -> usize {
        self.host_len
    }

    /// Copy the window from device bytes into a host region.
    pub fn download(&self, device: &[u8], host: &mut [u8]) {
        copy_rect(device, self.device_start, self.device_pitch, host, 0, self.host_pitch, self.region);
    }

    /// Copy the window from a host region into device bytes.
    pub fn upload(&self, host: &[u8], device: &mut [u8]) {
        copy_rect(host, 0, self.host_pitch, device, self.device_start, self.device_pitch, self.region);
    }
}

fn copy_rect(
    src: &[u8],
    src_start: usize,
    src_pitch: Pitch,
    dst: &mut [u8],
    dst_start: usize,
    dst_pitch: Pitch,
    region: [usize; 3],
) {
    let row = region[0];
    for z in 0..region[2] {
        for y in 0..region[1] {
            let s = src_start + z * src_pitch.slice_pitch + y * src_pitch.row_pitch;
            let d = dst_start + z * dst_pitch.slice_pitch + y * dst_pitch.row_pitch;
            dst[d..d + row].copy_from_slice(&src[s..s + row]);
        }
    }
}

/// Host window handed out by a map command.
///
/// The bytes are owned through a raw pointer so the host and the map/unmap
/// commands can address them without borrowing each other.
pub(crate) struct StagingBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the buffer is plain bytes. Access is sequenced by the map/unmap
// events: the map command fills it before its event completes, the host
// touches it only afterwards, and the unmap command reads it after the host
// gave it back.
unsafe impl Send for StagingBuffer {}
unsafe impl Sync for StagingBuffer {}

impl StagingBuffer {
    pub fn new(len: usize) -> Self {
        let bytes = Box::into_raw(vec![0u8; len].into_boxed_slice()) as *mut u8;
        // SAFETY: Box::into_raw never returns null.
        let ptr = unsafe { NonNull::new_unchecked(bytes) };
        Self { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// # Safety
    ///
    /// No other access to the buffer may overlap the returned borrow.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// # Safety
    ///
    /// No other access to the buffer may overlap the returned borrow.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from Box::into_raw of a boxed slice of this length.
        unsafe { drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len))) }
    }
}

impl std::fmt::Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer").field("ptr", &self.ptr).field("len", &self.len).finish()
    }
}

/// An outstanding map of a memory object.
#[derive(Debug)]
pub(crate) struct Mapping {
    pub queue: RawQueue,
    pub flags: MapFlags,
    pub rect: Rect,
    pub staging: Arc<StagingBuffer>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum MemKind {
    Buffer,
    Image { format: ImageFormat, desc: ImageDesc },
}

/// A live memory object.
#[derive(Debug)]
pub(crate) struct HostMem {
    pub id: RawMem,
    pub context: RawContext,
    pub flags: MemFlags,
    pub kind: MemKind,
    pub storage: Arc<Storage>,
    pub graphics: Option<GraphicsResource>,
    acquired: AtomicBool,
    mappings: Mutex<HashMap<usize, Mapping>>,
}

impl HostMem {
    pub fn new(
        id: RawMem,
        context: RawContext,
        flags: MemFlags,
        kind: MemKind,
        storage: Arc<Storage>,
        graphics: Option<GraphicsResource>,
    ) -> Self {
        Self {
            id,
            context,
            flags,
            kind,
            storage,
            graphics,
            acquired: AtomicBool::new(false),
            mappings: Mutex::new(HashMap::new()),
        }
    }

    pub fn mem_type(&self) -> MemObjectType {
        match self.kind {
            MemKind::Buffer => MemObjectType::Buffer,
            MemKind::Image { desc, .. } => desc.image_type,
        }
    }

    /// Validate a non-empty linear byte range of a buffer.
    pub fn buffer_range(&self, offset: usize, len: usize) -> Result<Rect> {
        snafu::ensure!(matches!(self.kind, MemKind::Buffer), InvalidMemObjectSnafu);
        let in_bounds = offset.checked_add(len).is_some_and(|end| end <= self.storage.len());
        snafu::ensure!(len > 0 && in_bounds, InvalidValueSnafu { what: "buffer range out of bounds" });
        Ok(Rect::linear(offset, len))
    }

    /// Validate a pixel region of an image and convert it to a byte window
    /// with a tightly packed host side.
    pub fn image_rect(&self, origin: [usize; 3], region: [usize; 3]) -> Result<Rect> {
        let MemKind::Image { format, desc } = self.kind else {
            return InvalidMemObjectSnafu.fail();
        };
        let extent = [desc.width, desc.height, desc.depth];
        let fits = (0..3).all(|axis| {
            region[axis] > 0 && origin[axis].checked_add(region[axis]).is_some_and(|end| end <= extent[axis])
        });
        snafu::ensure!(fits, InvalidValueSnafu { what: "image region out of bounds" });

        let overflow = || Error::InvalidValue { what: "image region overflows" };
        let bpp = format.bytes_per_pixel();
        let device_pitch = desc.layout(&format)?;
        let row_bytes = region[0].checked_mul(bpp).ok_or_else(overflow)?;
        let start = origin[0].checked_mul(bpp).and_then(|x| device_pitch.offset([x, origin[1], origin[2]]));
        let host_pitch = Pitch::packed(row_bytes, region[1]).ok_or_else(overflow)?;
        Rect::new(start.ok_or_else(overflow)?, device_pitch, host_pitch, [row_bytes, region[1], region[2]])
    }

    pub fn add_mapping(&self, mapping: Mapping) -> *mut u8 {
        let ptr = mapping.staging.as_ptr();
        self.mappings.lock().insert(ptr as usize, mapping);
        ptr
    }

    /// Remove the mapping that handed out `ptr` on `queue`.
    pub fn take_mapping(&self, ptr: *mut u8, queue: RawQueue) -> Result<Mapping> {
        let mut mappings = self.mappings.lock();
        let mapping = mappings
            .get(&(ptr as usize))
            .ok_or(Error::InvalidValue { what: "pointer is not mapped from this memory object" })?;
        snafu::ensure!(mapping.queue == queue, InvalidCommandQueueSnafu);
        mappings.remove(&(ptr as usize)).ok_or(Error::MapFailure)
    }

    pub fn mapped_count(&self) -> usize {
        self.mappings.lock().len()
    }

    pub fn set_acquired(&self, acquired: bool) {
        self.acquired.store(acquired, Ordering::Release);
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }
}
