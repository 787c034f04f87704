//! Avatar Session Test Harness
//!
//! Provides infrastructure for integration testing of the session controller:
//! - Scripted control API (`MockNegotiationApi`) recording every call
//! - Mock peer transports with live-instance counting and manual event firing
//! - In-memory presentation surface
//!
//! Basic usage pattern:
//!
//! 1. Build a `TestRig` (optionally tweaking the mocks first)
//! 2. Drive `rig.controller` through start/stop
//! 3. Fire transport events through `rig.transports.latest()`
//! 4. Assert on recorded API calls, transport counters and the surface

#![allow(dead_code)]

pub mod mock_api;
pub mod mock_transport;

use parking_lot::Mutex;
use remotemedia_avatar_session::{AvatarSessionConfig, PixelSurface, SessionLifecycleController};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub use mock_api::{ApiCall, MockNegotiationApi};
pub use mock_transport::{MockTransport, MockTransportFactory};

/// Initialize logging for tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("remotemedia_avatar_session=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Controller wired to mocks
pub struct TestRig {
    pub api: Arc<MockNegotiationApi>,
    pub transports: Arc<MockTransportFactory>,
    pub surface: Arc<Mutex<PixelSurface>>,
    pub controller: SessionLifecycleController,
}

impl TestRig {
    /// Transports connect on their own as soon as the answer is created
    pub fn new() -> Self {
        Self::build(AvatarSessionConfig::default(), true)
    }

    /// Transports stay in negotiation until the test fires events
    pub fn manual() -> Self {
        Self::build(AvatarSessionConfig::default(), false)
    }

    pub fn build(config: AvatarSessionConfig, auto_connect: bool) -> Self {
        init_logging();

        let api = Arc::new(MockNegotiationApi::new());
        let transports = Arc::new(MockTransportFactory::new(auto_connect));
        let (surface, shared) = PixelSurface::shared();
        let controller = SessionLifecycleController::new(
            config,
            api.clone(),
            transports.clone(),
            shared,
        )
        .expect("valid test config");
        api.observe(controller.subscribe());

        Self {
            api,
            transports,
            surface,
            controller,
        }
    }

    pub fn frames_drawn(&self) -> u64 {
        self.surface.lock().frames_drawn()
    }
}

/// Poll `condition` until it holds, panicking after five seconds
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
