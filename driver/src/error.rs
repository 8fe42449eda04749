use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Status reported by a driver entry point.
///
/// Each variant maps onto a stable negative status code (see [`Error::code`])
/// so failures can travel through event status words and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// The device could not satisfy an allocation.
    #[snafu(display("memory object allocation failure"))]
    MemObjectAllocationFailure,

    #[snafu(display("out of resources"))]
    OutOfResources,

    /// Profiling timestamps were requested from an event that has none.
    #[snafu(display("profiling info not available"))]
    ProfilingInfoNotAvailable,

    #[snafu(display("source and destination regions overlap"))]
    MemCopyOverlap,

    #[snafu(display("failed to map memory object"))]
    MapFailure,

    /// A command did not run because one of its dependencies failed.
    #[snafu(display("execution status error for events in wait list"))]
    ExecStatusErrorForEventsInWaitList,

    #[snafu(display("invalid value: {what}"))]
    InvalidValue { what: &'static str },

    #[snafu(display("invalid device"))]
    InvalidDevice,

    #[snafu(display("invalid context"))]
    InvalidContext,

    #[snafu(display("invalid queue properties"))]
    InvalidQueueProperties,

    #[snafu(display("invalid command queue"))]
    InvalidCommandQueue,

    #[snafu(display("invalid host pointer"))]
    InvalidHostPtr,

    #[snafu(display("invalid memory object"))]
    InvalidMemObject,

    #[snafu(display("invalid image format descriptor"))]
    InvalidImageFormatDescriptor,

    #[snafu(display("invalid image size"))]
    InvalidImageSize,

    #[snafu(display("invalid kernel name"))]
    InvalidKernelName,

    #[snafu(display("invalid kernel"))]
    InvalidKernel,

    #[snafu(display("invalid kernel argument index"))]
    InvalidArgIndex,

    #[snafu(display("invalid kernel argument value"))]
    InvalidArgValue,

    #[snafu(display("kernel arguments are not all set"))]
    InvalidKernelArgs,

    #[snafu(display("invalid work dimension"))]
    InvalidWorkDimension,

    #[snafu(display("invalid work group size"))]
    InvalidWorkGroupSize,

    #[snafu(display("invalid global offset"))]
    InvalidGlobalOffset,

    #[snafu(display("invalid event wait list"))]
    InvalidEventWaitList,

    #[snafu(display("invalid event"))]
    InvalidEvent,

    #[snafu(display("invalid operation"))]
    InvalidOperation,

    #[snafu(display("invalid graphics object"))]
    InvalidGlObject,

    #[snafu(display("invalid buffer size"))]
    InvalidBufferSize,

    #[snafu(display("invalid global work size"))]
    InvalidGlobalWorkSize,

    #[snafu(display("invalid context property"))]
    InvalidProperty,

    /// Failure raised by the device while executing a command.
    #[snafu(display("device failure (status {code})"))]
    DeviceFailure { code: i32 },
}

impl Error {
    /// Status code of this error. Always negative.
    pub fn code(&self) -> i32 {
        match self {
            Error::MemObjectAllocationFailure => -4,
            Error::OutOfResources => -5,
            Error::ProfilingInfoNotAvailable => -7,
            Error::MemCopyOverlap => -8,
            Error::MapFailure => -12,
            Error::ExecStatusErrorForEventsInWaitList => -14,
            Error::InvalidValue { .. } => -30,
            Error::InvalidDevice => -33,
            Error::InvalidContext => -34,
            Error::InvalidQueueProperties => -35,
            Error::InvalidCommandQueue => -36,
            Error::InvalidHostPtr => -37,
            Error::InvalidMemObject => -38,
            Error::InvalidImageFormatDescriptor => -39,
            Error::InvalidImageSize => -40,
            Error::InvalidKernelName => -46,
            Error::InvalidKernel => -48,
            Error::InvalidArgIndex => -49,
            Error::InvalidArgValue => -50,
            Error::InvalidKernelArgs => -52,
            Error::InvalidWorkDimension => -53,
            Error::InvalidWorkGroupSize => -54,
            Error::InvalidGlobalOffset => -56,
            Error::InvalidEventWaitList => -57,
            Error::InvalidEvent => -58,
            Error::InvalidOperation => -59,
            Error::InvalidGlObject => -60,
            Error::InvalidBufferSize => -61,
            Error::InvalidGlobalWorkSize => -63,
            Error::InvalidProperty => -64,
            Error::DeviceFailure { code } => *code,
        }
    }

    /// Recover an error from a status code carried by an event.
    ///
    /// Codes that do not correspond to a named status come back as
    /// [`Error::DeviceFailure`].
    pub fn from_code(code: i32) -> Self {
        match code {
            -4 => Error::MemObjectAllocationFailure,
            -5 => Error::OutOfResources,
            -7 => Error::ProfilingInfoNotAvailable,
            -8 => Error::MemCopyOverlap,
            -12 => Error::MapFailure,
            -14 => Error::ExecStatusErrorForEventsInWaitList,
            -33 => Error::InvalidDevice,
            -34 => Error::InvalidContext,
            -35 => Error::InvalidQueueProperties,
            -36 => Error::InvalidCommandQueue,
            -37 => Error::InvalidHostPtr,
            -38 => Error::InvalidMemObject,
            -39 => Error::InvalidImageFormatDescriptor,
            -40 => Error::InvalidImageSize,
            -46 => Error::InvalidKernelName,
            -48 => Error::InvalidKernel,
            -49 => Error::InvalidArgIndex,
            -50 => Error::InvalidArgValue,
            -52 => Error::InvalidKernelArgs,
            -53 => Error::InvalidWorkDimension,
            -54 => Error::InvalidWorkGroupSize,
            -56 => Error::InvalidGlobalOffset,
            -57 => Error::InvalidEventWaitList,
            -58 => Error::InvalidEvent,
            -59 => Error::InvalidOperation,
            -60 => Error::InvalidGlObject,
            -61 => Error::InvalidBufferSize,
            -63 => Error::InvalidGlobalWorkSize,
            -64 => Error::InvalidProperty,
            code => Error::DeviceFailure { code },
        }
    }
}
