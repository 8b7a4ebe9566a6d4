//! riglib-test-harness: a fake Icom LAN device for session tests.
//!
//! [`MockRadio`] plays the device side of the control port over loopback
//! UDP, and [`frames`] builds the device's replies and picks apart what
//! the client sent.

pub mod frames;
pub mod mock_radio;

pub use mock_radio::MockRadio;
