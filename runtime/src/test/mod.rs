pub mod unit;

use std::sync::Arc;

use gantry_driver::HostDriver;

use crate::{CommandQueue, Context, Driver, QueueProperties};

/// Route log output through the test harness. Filter with `GANTRY_LOG`.
pub(crate) fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("GANTRY_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
}

/// A context and one queue on the first device of `host`.
pub(crate) fn setup(host: &HostDriver, properties: QueueProperties) -> (Context, CommandQueue) {
    init_tracing();
    let driver: Arc<dyn Driver> = Arc::new(host.clone());
    let context = Context::new(driver, host.devices(), None).unwrap();
    let queue = context.create_command_queue(host.devices()[0], properties).unwrap();
    (context, queue)
}

/// Assert every handle went back to the driver, each exactly once.
pub(crate) fn assert_all_released(host: &HostDriver) {
    let stats = host.stats();
    assert_eq!(stats.live_handles(), 0, "leaked handles: {stats:?}");
    assert_eq!(stats.rejected_releases, 0, "double releases: {stats:?}");
}
