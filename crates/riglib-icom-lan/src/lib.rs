//! riglib-icom-lan: session and authentication client for Icom radios'
//! Wi-Fi/LAN remote control port.
//!
//! The device's control port speaks a small UDP protocol: a session ID
//! exchange, a login that yields a six-byte token, periodic
//! re-authentication, and two echo mechanisms used as a liveness check.
//! This crate runs that session in a background task and exposes it
//! through [`IcomLanSession`].
//!
//! The serial (CI-V) and audio streams are only requested here; their
//! payload is not handled.
//!
//! # Example
//!
//! ```no_run
//! use riglib_icom_lan::{Credentials, IcomLanBuilder};
//!
//! # async fn example() -> riglib_core::Result<()> {
//! let session = IcomLanBuilder::new()
//!     .host("192.168.1.50")
//!     .credentials(Credentials::default())
//!     .connect()
//!     .await?;
//!
//! let mut events = session.subscribe();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//! });
//!
//! session.wait().await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod handshake;
pub(crate) mod io;
pub mod packet;
pub mod reauth;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod watchdog;

pub use builder::IcomLanBuilder;
pub use config::{Credentials, SessionConfig, StreamRequest};
pub use session::IcomLanSession;
pub use shutdown::ShutdownHandle;
