//! Transport implementations for riglib.
//!
//! - [`UdpTransport`]: a connected, deadline-bounded UDP socket used for the
//!   Icom LAN control channel.
//!
//! # Example
//!
//! ```no_run
//! use riglib_transport::UdpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> riglib_core::Result<()> {
//! let transport = UdpTransport::connect(0, "192.168.1.50:50001".parse().unwrap()).await?;
//! let mut buf = [0u8; riglib_transport::udp::MAX_DATAGRAM];
//! let n = transport.recv(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod udp;

pub use udp::{MAX_DATAGRAM, UdpTransport};
