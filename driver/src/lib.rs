//! Native device boundary for gantry.
//!
//! This crate defines the raw side of the runtime: opaque handles, the value
//! types that cross the boundary, the status codes a device reports, and the
//! [`Driver`] trait itself. Everything here is handle-based; ownership and
//! release discipline live one layer up in `gantry-runtime`.
//!
//! # Host driver
//!
//! The [`host`] module provides [`HostDriver`], a complete software device
//! that executes commands on host threads. It serves as the reference
//! implementation of the [`Driver`] contract and as the backend for tests.

pub mod driver;
pub mod error;
pub mod handle;
pub mod host;
pub mod types;


pub use driver::{Driver, EventCallback};
pub use error::{Error, Result};
pub use handle::{DeviceId, RawContext, RawEvent, RawKernel, RawMem, RawQueue};
pub use host::{HostConfig, HostDriver, HostDriverBuilder, HostStats, KernelFn, NdRange, NullHandles, WorkItem};
pub use types::*;
