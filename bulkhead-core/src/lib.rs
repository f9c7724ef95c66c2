//! Bulkhead Core
//!
//! This crate contains the protocol-agnostic transport building blocks:
//! - Deadline-enforcing socket wrapper (`deadline`)
//! - Fixed-size worker pool with semaphore-gated growth (`pool`)
//! - Adaptive worker pool that scales between bounds (`adaptive`)
//! - One-shot readiness poller (`poller`)
//! - Retry backoff helpers (`retry`)
//! - TCP socket tuning (`tcp`)
//! - Error types (`error`)

// The tcp module needs raw fd access for socket configuration
#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

pub mod adaptive;
pub mod deadline;
pub mod error;
pub mod pool;
pub mod poller;
pub mod retry;
pub mod tcp;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::adaptive::AdaptivePool;
    pub use crate::deadline::DeadlineStream;
    pub use crate::error::{CoreError, Result};
    pub use crate::pool::{FixedPool, Task};
    pub use crate::poller::{Poller, Readiness, Registration};
    pub use crate::retry::RetryBackoff;
    pub use crate::tcp::{configure_tcp_keepalive, enable_tcp_nodelay};
}
