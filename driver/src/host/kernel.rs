//! Kernels of the host driver.
//!
//! A kernel is a Rust closure registered under an entry point name with a
//! fixed number of arguments. Dispatch runs the closure once per work item,
//! spreading work-groups over the rayon pool. Every memory argument is
//! write-locked for the duration of the launch and exposed to work items as
//! relaxed atomic bytes, so items of one launch may touch the same memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::error::{
    Error, InvalidArgIndexSnafu, InvalidArgValueSnafu, InvalidGlobalOffsetSnafu, InvalidGlobalWorkSizeSnafu,
    InvalidKernelArgsSnafu, InvalidWorkDimensionSnafu, InvalidWorkGroupSizeSnafu, Result,
};
use crate::handle::{RawContext, RawKernel};
use crate::host::memory::Storage;
use crate::types::KernelArg;

/// Device-side failure code reported for out of bounds accesses in a kernel.
pub const OUT_OF_BOUNDS_ACCESS: i32 = -9001;

/// Device-side failure code reported for a command that panicked.
pub const COMMAND_FAULT: i32 = -9002;

/// Upper bound on the work-group size picked when the caller leaves it open.
const PREFERRED_GROUP_SIZE: usize = 64;

/// Body of a host kernel, invoked once per work item.
pub type KernelFn = Arc<dyn Fn(&mut WorkItem<'_>) -> Result<()> + Send + Sync + 'static>;

/// A registered kernel entry point.
#[derive(Clone)]
pub(crate) struct KernelEntry {
    pub arity: u32,
    pub func: KernelFn,
}

impl std::fmt::Debug for KernelEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelEntry").field("arity", &self.arity).finish_non_exhaustive()
    }
}

/// A kernel object with its current argument bindings.
#[derive(Debug)]
pub(crate) struct HostKernel {
    pub id: RawKernel,
    pub context: RawContext,
    pub name: String,
    pub entry: KernelEntry,
    args: Mutex<Vec<Option<KernelArg>>>,
}

impl HostKernel {
    pub fn new(id: RawKernel, context: RawContext, name: String, entry: KernelEntry) -> Self {
        let args = Mutex::new(vec![None; entry.arity as usize]);
        Self { id, context, name, entry, args }
    }

    pub fn set_arg(&self, index: u32, arg: KernelArg) -> Result<()> {
        snafu::ensure!(index < self.entry.arity, InvalidArgIndexSnafu);
        if let KernelArg::Bytes(bytes) = &arg {
            snafu::ensure!(!bytes.is_empty(), InvalidArgValueSnafu);
        }
        self.args.lock()[index as usize] = Some(arg);
        Ok(())
    }

    /// Snapshot of the bindings. Fails if any argument was never set.
    pub fn bound_args(&self) -> Result<Vec<KernelArg>> {
        self.args.lock().iter().map(|arg| arg.clone().ok_or(Error::InvalidKernelArgs)).collect()
    }
}

/// Argument resolved for execution.
#[derive(Debug, Clone)]
pub(crate) enum BoundArg {
    Mem(Arc<Storage>),
    Bytes(SmallVec<[u8; 16]>),
}

/// Validated launch geometry, padded to three dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    pub dims: usize,
    pub offset: [usize; 3],
    pub global: [usize; 3],
    pub local: [usize; 3],
}

impl NdRange {
    pub fn new(offset: Option<&[usize]>, global: &[usize], local: Option<&[usize]>) -> Result<Self> {
        let dims = global.len();
        snafu::ensure!((1..=3).contains(&dims), InvalidWorkDimensionSnafu);
        snafu::ensure!(offset.is_none_or(|offset| offset.len() == dims), InvalidGlobalOffsetSnafu);
        snafu::ensure!(local.is_none_or(|local| local.len() == dims), InvalidWorkGroupSizeSnafu);
        snafu::ensure!(global.iter().all(|size| *size > 0), InvalidGlobalWorkSizeSnafu);
        let total = global.iter().try_fold(1usize, |total, size| total.checked_mul(*size));
        snafu::ensure!(total.is_some(), InvalidGlobalWorkSizeSnafu);
        let ends_fit = offset.is_none_or(|offset| offset.iter().zip(global).all(|(o, g)| o.checked_add(*g).is_some()));
        snafu::ensure!(ends_fit, InvalidGlobalOffsetSnafu);

        let mut range = Self { dims, offset: [0; 3], global: [1; 3], local: [1; 3] };
        range.global[..dims].copy_from_slice(global);
        if let Some(offset) = offset {
            range.offset[..dims].copy_from_slice(offset);
        }
        match local {
            Some(local) => {
                let divides = local.iter().zip(global).all(|(local, global)| *local > 0 && global % local == 0);
                snafu::ensure!(divides, InvalidWorkGroupSizeSnafu);
                range.local[..dims].copy_from_slice(local);
            }
            None => range.local[0] = preferred_group_size(global[0]),
        }
        Ok(range)
    }

    pub fn work_items(&self) -> usize {
        self.global.iter().product()
    }

    fn groups(&self) -> [usize; 3] {
        [0, 1, 2].map(|dim| self.global[dim] / self.local[dim])
    }
}

/// Largest divisor of `global` not above the preferred group size.
fn preferred_group_size(global: usize) -> usize {
    (1..=PREFERRED_GROUP_SIZE.min(global)).rev().find(|size| global % size == 0).unwrap_or(1)
}

#[derive(Debug, Clone, Copy)]
enum Slot<'a> {
    Mem(usize),
    Bytes(&'a [u8]),
}

/// View of one work item handed to a kernel body.
///
/// Dimensions past the launch's dimensionality report id 0 and size 1.
pub struct WorkItem<'a> {
    range: NdRange,
    global_id: [usize; 3],
    memory: &'a [&'a [AtomicU8]],
    slots: &'a [Slot<'a>],
}

impl WorkItem<'_> {
    pub fn work_dim(&self) -> usize {
        self.range.dims
    }

    pub fn global_id(&self, dim: usize) -> usize {
        self.global_id.get(dim).copied().unwrap_or(0)
    }

    pub fn global_size(&self, dim: usize) -> usize {
        self.range.global.get(dim).copied().unwrap_or(1)
    }

    pub fn global_offset(&self, dim: usize) -> usize {
        self.range.offset.get(dim).copied().unwrap_or(0)
    }

    pub fn local_size(&self, dim: usize) -> usize {
        self.range.local.get(dim).copied().unwrap_or(1)
    }

    pub fn local_id(&self, dim: usize) -> usize {
        (self.global_id(dim) - self.global_offset(dim)) % self.local_size(dim)
    }

    pub fn group_id(&self, dim: usize) -> usize {
        (self.global_id(dim) - self.global_offset(dim)) / self.local_size(dim)
    }

    pub fn num_groups(&self, dim: usize) -> usize {
        self.global_size(dim) / self.local_size(dim)
    }

    fn mem_index(&self, arg: usize) -> Result<usize> {
        match self.slots.get(arg) {
            Some(Slot::Mem(index)) => Ok(*index),
            Some(Slot::Bytes(_)) => InvalidArgValueSnafu.fail(),
            None => InvalidArgIndexSnafu.fail(),
        }
    }

    /// Number of `T` elements that fit in memory argument `arg`.
    pub fn len<T: bytemuck::Pod>(&self, arg: usize) -> Result<usize> {
        let index = self.mem_index(arg)?;
        Ok(self.memory[index].len() / size_of::<T>().max(1))
    }

    /// Read element `index` of memory argument `arg`.
    pub fn load<T: bytemuck::Pod>(&self, arg: usize, index: usize) -> Result<T> {
        let chunk = self.element(arg, index, size_of::<T>())?;
        let mut value = T::zeroed();
        for (byte, cell) in bytemuck::bytes_of_mut(&mut value).iter_mut().zip(chunk) {
            *byte = cell.load(Ordering::Relaxed);
        }
        Ok(value)
    }

    /// Write element `index` of memory argument `arg`.
    pub fn store<T: bytemuck::Pod>(&mut self, arg: usize, index: usize, value: T) -> Result<()> {
        let chunk = self.element(arg, index, size_of::<T>())?;
        for (cell, byte) in chunk.iter().zip(bytemuck::bytes_of(&value)) {
            cell.store(*byte, Ordering::Relaxed);
        }
        Ok(())
    }

    fn element(&self, arg: usize, index: usize, size: usize) -> Result<&[AtomicU8]> {
        let bytes = self.memory[self.mem_index(arg)?];
        let start = index.checked_mul(size).ok_or_else(out_of_bounds)?;
        start.checked_add(size).and_then(|end| bytes.get(start..end)).ok_or_else(out_of_bounds)
    }

    /// Read by-value argument `arg`.
    pub fn scalar<T: bytemuck::Pod>(&self, arg: usize) -> Result<T> {
        match self.slots.get(arg) {
            Some(Slot::Bytes(bytes)) if bytes.len() == size_of::<T>() => Ok(bytemuck::pod_read_unaligned(bytes)),
            Some(_) => InvalidArgValueSnafu.fail(),
            None => InvalidArgIndexSnafu.fail(),
        }
    }
}

fn out_of_bounds() -> Error {
    Error::DeviceFailure { code: OUT_OF_BOUNDS_ACCESS }
}

fn atomic_bytes(bytes: &mut [u8]) -> &[AtomicU8] {
    // SAFETY: `AtomicU8` has the size and alignment of `u8`, and the unique
    // borrow keeps every other access out while the atomic view lives.
    unsafe { &*(bytes as *mut [u8] as *const [AtomicU8]) }
}

/// Run `func` over every work item of `range`, one rayon task per work-group.
///
/// Returns `None` without running anything if a memory argument is locked.
pub(crate) fn dispatch(func: &KernelFn, args: &[BoundArg], range: NdRange) -> Option<Result<()>> {
    // Distinct storages, in address order.
    let mut storages: Vec<&Arc<Storage>> = args
        .iter()
        .filter_map(|arg| match arg {
            BoundArg::Mem(storage) => Some(storage),
            BoundArg::Bytes(_) => None,
        })
        .collect();
    storages.sort_by_key(|storage| storage.address());
    storages.dedup_by_key(|storage| storage.address());

    let slots: Vec<Slot<'_>> = args
        .iter()
        .map(|arg| match arg {
            BoundArg::Mem(storage) => {
                Slot::Mem(storages.partition_point(|candidate| candidate.address() < storage.address()))
            }
            BoundArg::Bytes(bytes) => Slot::Bytes(bytes.as_slice()),
        })
        .collect();

    let mut guards = storages.iter().map(|storage| storage.try_write()).collect::<Option<Vec<_>>>()?;
    let memory: Vec<&[AtomicU8]> = guards.iter_mut().map(|guard| atomic_bytes(guard)).collect();

    let groups = range.groups();
    let result = (0..groups.iter().product::<usize>()).into_par_iter().try_for_each(|group| {
        let group = [group % groups[0], group / groups[0] % groups[1], group / (groups[0] * groups[1])];
        let base = [0, 1, 2].map(|dim| range.offset[dim] + group[dim] * range.local[dim]);
        let mut item = WorkItem { range, global_id: base, memory: &memory, slots: &slots };
        for z in 0..range.local[2] {
            for y in 0..range.local[1] {
                for x in 0..range.local[0] {
                    item.global_id = [base[0] + x, base[1] + y, base[2] + z];
                    (func)(&mut item)?;
                }
            }
        }
        Ok(())
    });
    Some(result)
}
