//! Global request throttle
//!
//! Two nested limiters guard a shared downstream resource:
//!
//! - **Sustained window**: at most `max_per_window` requests per `window_ms`
//! - **Burst window**: at most `burst_limit` requests in any `burst_window_ms`
//!
//! Denials are immediate; nothing is queued or retried.
//!
//! # Example
//!
//! ```rust
//! use resilience::throttle::{ThrottleConfig, ThrottleManager};
//!
//! let throttle = ThrottleManager::new(ThrottleConfig::default());
//! if throttle.should_allow_request("load_pages") {
//!     // call the store
//! }
//! println!("{:?}", throttle.stats());
//! ```

pub mod manager;
pub mod types;

pub use manager::ThrottleManager;
pub use types::{ThrottleConfig, ThrottleDecision, ThrottleStats};
