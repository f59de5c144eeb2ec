pub mod device;
pub mod fixtures;
pub mod gateway;

pub use device::{HookEvent, RecordingHooks, TEST_CREATOR, TestDevice, test_config};
pub use gateway::{FakeGateway, GatewayCall};

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT_TRACING: Once = Once::new();

/// Install a fmt subscriber once per test binary. `RUST_LOG` overrides the filter.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,fieldsync=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_test_writer()
            .compact()
            .try_init();
    });
}
