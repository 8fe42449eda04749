//! Opaque native handles.
//!
//! Every device-side object is addressed by a plain 64-bit identifier handed
//! out by the driver. A handle carries no structure: it is either null or it
//! names a live object inside the driver that minted it.

use std::fmt;

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident => $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// The null handle. Never names a live object.
            pub const NULL: Self = Self(0);

            /// Wrap a raw identifier produced by a driver implementation.
            pub const fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn as_raw(self) -> u64 {
                self.0
            }

            pub const fn is_null(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($label, "#{}"), self.0)
            }
        }
    };
}

raw_handle! {
    /// Identifier of a compute device, produced by device enumeration.
    DeviceId => "device"
}

raw_handle! {
    /// Native context handle.
    RawContext => "context"
}

raw_handle! {
    /// Native command queue handle.
    RawQueue => "queue"
}

raw_handle! {
    /// Native memory object handle (buffer or image).
    RawMem => "mem"
}

raw_handle! {
    /// Native event handle.
    RawEvent => "event"
}

raw_handle! {
    /// Native compiled kernel handle.
    RawKernel => "kernel"
}
