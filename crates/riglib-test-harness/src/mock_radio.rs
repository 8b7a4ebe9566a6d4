//! Mock Icom LAN device for session-level testing.
//!
//! [`MockRadio`] binds a UDP socket on localhost and plays the device side
//! of the control port. Unlike a scripted request/response server, the
//! test drives it step by step: receive what the client sent, inspect it
//! with the helpers in [`frames`](crate::frames), and send back a device
//! frame.
//!
//! # Example
//!
//! ```no_run
//! use riglib_test_harness::{MockRadio, frames};
//! use std::time::Duration;
//!
//! # async fn example() -> riglib_core::Result<()> {
//! let radio = MockRadio::bind().await?;
//!
//! // ... point the client at radio.addr() ...
//!
//! let probe = radio
//!     .recv_matching(Duration::from_secs(2), |p| frames::kind(p) == 3)
//!     .await
//!     .expect("no SID probe");
//! let pc_sid = frames::src_sid(&probe);
//! radio.send(&frames::sid_reply(0xaabb_ccdd, pc_sid)).await?;
//! # Ok(())
//! # }
//! ```

use riglib_core::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// A fake device listening on a random localhost port.
///
/// The first datagram received fixes the client address; every
/// [`send`](MockRadio::send) goes there.
pub struct MockRadio {
    socket: UdpSocket,
    addr: SocketAddr,
    client: Mutex<Option<SocketAddr>>,
}

impl MockRadio {
    /// Bind to a random port on 127.0.0.1.
    pub async fn bind() -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock radio: {}", e)))?;
        let addr = socket.local_addr().map_err(Error::Io)?;
        tracing::debug!(addr = %addr, "mock radio listening");

        Ok(Self {
            socket,
            addr,
            client: Mutex::new(None),
        })
    }

    /// Address the client should connect to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Address of the client, once it has sent something.
    pub fn client(&self) -> Option<SocketAddr> {
        *self.client.lock().unwrap()
    }

    /// Receive the next datagram, or `None` if nothing arrives in time.
    pub async fn recv(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut buf = [0u8; 1500];
        match tokio::time::timeout(timeout, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((n, from))) => {
                *self.client.lock().unwrap() = Some(from);
                tracing::trace!(from = %from, bytes = n, "mock radio received datagram");
                Some(buf[..n].to_vec())
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "mock radio receive failed");
                None
            }
            Err(_) => None,
        }
    }

    /// Receive datagrams until one satisfies `pred`, skipping the rest.
    /// Returns `None` if no match arrives within `timeout`.
    pub async fn recv_matching<F>(&self, timeout: Duration, mut pred: F) -> Option<Vec<u8>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let packet = self.recv(remaining).await?;
            if pred(&packet) {
                return Some(packet);
            }
        }
    }

    /// Collect every datagram received during `window`.
    pub async fn drain(&self, window: Duration) -> Vec<Vec<u8>> {
        let deadline = Instant::now() + window;
        let mut packets = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return packets;
            }
            match self.recv(remaining).await {
                Some(packet) => packets.push(packet),
                None => return packets,
            }
        }
    }

    /// Send a datagram to the client.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let client = self.client().ok_or(Error::NotConnected)?;
        self.socket.send_to(data, client).await.map_err(Error::Io)?;
        Ok(())
    }
}
