//! Configuration of the host driver.

bitflags::bitflags! {
    /// Entry points that report success with a null handle instead of an object.
    ///
    /// Used to exercise the broken-driver paths of callers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NullHandles: u32 {
        const CONTEXT = 1 << 0;
        const QUEUE = 1 << 1;
        const MEM = 1 << 2;
        const KERNEL = 1 << 3;
        const USER_EVENT = 1 << 4;
        /// Map commands return a null pointer along with a valid event.
        const MAP = 1 << 5;
    }
}

/// Settings of a [`HostDriver`](super::HostDriver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Number of devices exposed.
    pub device_count: usize,
    /// Total bytes that memory objects may hold at once. `None` is unbounded.
    pub memory_limit: Option<usize>,
    pub null_handles: NullHandles,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { device_count: 1, memory_limit: None, null_handles: NullHandles::empty() }
    }
}

impl HostConfig {
    /// Defaults overridden by `GANTRY_HOST_DEVICES` and `GANTRY_HOST_MEMORY_LIMIT`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(count) = env_usize("GANTRY_HOST_DEVICES")
            && count > 0
        {
            config.device_count = count;
        }
        if let Some(limit) = env_usize("GANTRY_HOST_MEMORY_LIMIT") {
            config.memory_limit = Some(limit);
        }
        config
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            tracing::warn!(name, value = %value, %err, "ignoring malformed environment variable");
            None
        }
    }
}
