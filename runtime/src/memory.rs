//! Device allocations and host-visible mappings of them.

use std::ptr::NonNull;
use std::sync::Arc;

use gantry_driver::{Driver, MemObjectType, Pitch, RawMem};

use crate::error::Result;
use crate::handle::Owned;

/// A device allocation: a linear buffer or an image.
///
/// The driver keeps the creating context alive for as long as the memory
/// object exists, so dropping the [`crate::Context`] first is fine.
#[derive(Debug)]
pub struct MemObject {
    handle: Owned<RawMem>,
    size: usize,
    mem_type: MemObjectType,
}

impl MemObject {
    pub(crate) fn new(driver: Arc<dyn Driver>, raw: RawMem, size: usize, mem_type: MemObjectType) -> Result<Self> {
        Ok(Self { handle: Owned::new(driver, raw)?, size, mem_type })
    }

    pub(crate) fn raw(&self) -> Result<RawMem> {
        self.handle.get()
    }

    /// Size in bytes as requested at creation.
    ///
    /// For memory shared with a graphics API this is the size the caller
    /// declared, which the driver does not verify.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn mem_type(&self) -> MemObjectType {
        self.mem_type
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Release the allocation. Releasing while a mapping is outstanding
    /// leaves the mapping dangling.
    pub fn release(&mut self) {
        self.handle.release();
    }
}

/// Host view of a mapped region of a [`MemObject`].
///
/// Produced by [`crate::CommandQueue::enqueue_map_buffer`] and
/// [`crate::CommandQueue::enqueue_map_image`]; consumed by
/// [`crate::CommandQueue::enqueue_unmap_mem_object`], which must be called on
/// the queue that created the mapping. The contents are valid only after the
/// map event completed.
#[derive(Debug)]
pub struct MappedMemObject {
    ptr: NonNull<u8>,
    size: usize,
    pitch: Pitch,
}

// The window is plain host memory owned by the driver until unmapped.
unsafe impl Send for MappedMemObject {}
unsafe impl Sync for MappedMemObject {}

impl MappedMemObject {
    pub(crate) fn new(ptr: NonNull<u8>, size: usize, pitch: Pitch) -> Self {
        Self { ptr, size, pitch }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size of the window in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Distance in bytes between consecutive rows (image maps).
    pub fn row_pitch(&self) -> usize {
        self.pitch.row_pitch
    }

    /// Distance in bytes between consecutive slices (3D image maps).
    pub fn slice_pitch(&self) -> usize {
        self.pitch.slice_pitch
    }

    /// # Safety
    ///
    /// The map event must have completed and no command may be writing the
    /// region concurrently.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.size) }
    }

    /// # Safety
    ///
    /// Same as [`MappedMemObject::as_slice`].
    pub unsafe fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.size) }
    }
}
