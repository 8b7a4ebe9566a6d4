//! riglib-core: error and event definitions shared by the riglib LAN crates.
//!
//! The session engine, the transport, the test harness, and front ends all
//! depend on these types without pulling in each other.
//!
//! # Key types
//!
//! - [`SessionEvent`] -- asynchronous session lifecycle notifications
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::SessionEvent;
