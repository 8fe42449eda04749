//! Compiled kernels and their argument bindings.

use std::sync::Arc;

use gantry_driver::{Driver, KernelArg, RawKernel};
use snafu::ResultExt;

use crate::error::{OperationSnafu, Result};
use crate::handle::Owned;
use crate::memory::MemObject;

/// A compiled kernel entry point obtained from a [`crate::Context`].
///
/// Arguments are bound by index. The bindings in place when a dispatch is
/// enqueued are the ones that dispatch uses; rebinding afterwards affects only
/// later dispatches.
#[derive(Debug)]
pub struct Kernel {
    handle: Owned<RawKernel>,
    name: String,
}

impl Kernel {
    pub(crate) fn new(driver: Arc<dyn Driver>, raw: RawKernel, name: &str) -> Result<Self> {
        Ok(Self { handle: Owned::new(driver, raw)?, name: name.to_owned() })
    }

    pub(crate) fn raw(&self) -> Result<RawKernel> {
        self.handle.get()
    }

    /// Entry point name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_arg_mem(&self, index: u32, mem: &MemObject) -> Result<()> {
        let arg = KernelArg::Mem(mem.raw()?);
        self.handle
            .driver()
            .set_kernel_arg(self.raw()?, index, arg)
            .context(OperationSnafu { what: "kernel argument binding" })
    }

    /// Bind a plain value argument by copying its bytes.
    pub fn set_arg<T: bytemuck::Pod>(&self, index: u32, value: T) -> Result<()> {
        let arg = KernelArg::value(&value);
        self.handle
            .driver()
            .set_kernel_arg(self.raw()?, index, arg)
            .context(OperationSnafu { what: "kernel argument binding" })
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    pub fn release(&mut self) {
        self.handle.release();
    }
}
