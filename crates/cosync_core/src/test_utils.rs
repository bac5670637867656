//! Test utilities for cosync_core
//!
//! Shared setup for unit tests: a connected session on a [`MemoryHost`] and
//! a few document builders.

use std::sync::Arc;

use crate::config::Config;
use crate::session::{MemoryHost, SessionChannel, SessionContext};

/// Workspace id used across unit tests.
pub const TEST_WORKSPACE: &str = "ws-test";

/// Install a test logger once; repeated calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Config pointing at an in-memory host.
pub fn test_config() -> Config {
    let mut config = Config::new("memory://host", TEST_WORKSPACE);
    config.owner_id = "tester".to_string();
    config
}

/// A session connected to `host` with a bearer credential.
pub async fn connect_session(host: &MemoryHost) -> SessionChannel {
    init_logging();
    SessionChannel::connect(host, &SessionContext::with_token("test-token"), test_config())
        .await
        .unwrap()
}

/// Same as [`connect_session`], shared for engine and registry tests.
pub async fn shared_session(host: &MemoryHost) -> Arc<SessionChannel> {
    Arc::new(connect_session(host).await)
}
