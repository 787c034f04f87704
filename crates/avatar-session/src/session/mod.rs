//! Session lifecycle
//!
//! [`SessionLifecycleController`] is the only component that creates or
//! tears down sessions. Everything else observes it.

pub mod controller;
pub mod retry;
pub mod state;

pub use controller::SessionLifecycleController;
pub use retry::RetryPolicy;
pub use state::{Session, SessionState};
