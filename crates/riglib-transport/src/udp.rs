//! UDP transport for the Icom LAN control channel.
//!
//! This module provides [`UdpTransport`], a connected datagram transport.
//! The control socket is bound to a local port and connected to the
//! device's control address, so the OS filters out datagrams from any
//! other source. Every read is bounded by a deadline; expiry is reported as
//! [`Error::Timeout`] so callers can count it without treating it as a
//! socket failure.
//!
//! # Example
//!
//! ```no_run
//! use riglib_transport::UdpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> riglib_core::Result<()> {
//! let remote = "192.168.1.50:50001".parse().unwrap();
//! let transport = UdpTransport::connect(50001, remote).await?;
//!
//! transport.send(&[0x10, 0x00, 0x00, 0x00, 0x03, 0x00]).await?;
//!
//! let mut buf = [0u8; 1500];
//! let n = transport.recv(&mut buf, Duration::from_secs(1)).await?;
//! println!("Received {} bytes", n);
//! # Ok(())
//! # }
//! ```

use riglib_core::error::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;

/// Largest datagram the device is known to send.
pub const MAX_DATAGRAM: usize = 1500;

/// Connected UDP transport for datagram-based rig communication.
///
/// Wraps a [`tokio::net::UdpSocket`] with error mapping and structured
/// logging consistent with the rest of the riglib transport layer.
#[derive(Debug)]
pub struct UdpTransport {
    /// The underlying UDP socket.
    socket: UdpSocket,
    /// The local address the socket is bound to.
    local_addr: SocketAddr,
    /// The remote address, once connected.
    peer_addr: Option<SocketAddr>,
}

impl UdpTransport {
    /// Bind to a local address.
    ///
    /// Use `"0.0.0.0:0"` to bind to any available port on all interfaces.
    pub async fn bind(addr: &str) -> Result<Self> {
        tracing::debug!(addr = %addr, "Binding UDP socket");

        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "Failed to bind UDP socket");
            Error::Io(e)
        })?;

        let local_addr = socket.local_addr().map_err(|e| {
            tracing::error!(error = %e, "Failed to get local address");
            Error::Io(e)
        })?;

        tracing::debug!(local_addr = %local_addr, "UDP socket bound");

        Ok(Self {
            socket,
            local_addr,
            peer_addr: None,
        })
    }

    /// Bind `local_port` on all interfaces and connect to `remote`.
    ///
    /// The device expects control traffic from the same port number it
    /// listens on, so callers normally pass the control port here. Pass `0`
    /// to let the OS pick a port.
    pub async fn connect(local_port: u16, remote: SocketAddr) -> Result<Self> {
        let bind_addr = if remote.is_ipv4() {
            format!("0.0.0.0:{}", local_port)
        } else {
            format!("[::]:{}", local_port)
        };
        let mut transport = Self::bind(&bind_addr).await?;
        transport.connect_to(remote).await?;
        Ok(transport)
    }

    /// Get the local address this socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Get the remote address, if connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Connect this socket to a specific remote address.
    ///
    /// UDP "connect" does not perform a handshake. It sets the default
    /// destination and makes the OS drop datagrams from other sources.
    pub async fn connect_to(&mut self, addr: SocketAddr) -> Result<()> {
        tracing::debug!(
            local = %self.local_addr,
            remote = %addr,
            "Connecting UDP socket to remote address"
        );

        self.socket.connect(addr).await.map_err(|e| {
            tracing::error!(
                local = %self.local_addr,
                remote = %addr,
                error = %e,
                "Failed to connect UDP socket"
            );
            Error::Io(e)
        })?;

        self.peer_addr = Some(addr);
        Ok(())
    }

    /// Send one datagram to the connected peer.
    ///
    /// A failed send means the local socket is unusable, so the error is
    /// always logged.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        let remote = self.peer_addr.ok_or(Error::NotConnected)?;

        tracing::trace!(
            local = %self.local_addr,
            remote = %remote,
            bytes = data.len(),
            "Sending datagram"
        );

        let n = self.socket.send(data).await.map_err(|e| {
            tracing::error!(
                local = %self.local_addr,
                remote = %remote,
                error = %e,
                "Failed to send datagram"
            );
            Error::Io(e)
        })?;

        if n != data.len() {
            return Err(Error::Transport(format!(
                "short datagram write: {} of {} bytes",
                n,
                data.len()
            )));
        }

        Ok(())
    }

    /// Receive one datagram, waiting at most until `deadline`.
    ///
    /// Returns [`Error::Timeout`] if nothing arrives in time. Receiving is
    /// cancel-safe, so this may be raced against other futures in a
    /// `select!` and re-issued with the same deadline.
    pub async fn recv_until(&self, buf: &mut [u8], deadline: Instant) -> Result<usize> {
        match tokio::time::timeout_at(deadline, self.socket.recv(buf)).await {
            Ok(Ok(n)) => {
                tracing::trace!(local = %self.local_addr, bytes = n, "Received datagram");
                Ok(n)
            }
            Ok(Err(e)) => {
                tracing::debug!(
                    local = %self.local_addr,
                    error = %e,
                    "Failed to receive datagram"
                );
                Err(Error::Io(e))
            }
            Err(_) => {
                tracing::trace!(local = %self.local_addr, "Timeout waiting for datagram");
                Err(Error::Timeout)
            }
        }
    }

    /// Receive one datagram with a relative timeout.
    pub async fn recv(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.recv_until(buf, Instant::now() + timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback_peer() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn bind_and_local_addr() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let addr = transport.local_addr();

        assert_eq!(addr.ip(), std::net::Ipv4Addr::LOCALHOST);
        assert_ne!(addr.port(), 0, "OS should assign a nonzero port");
        assert!(transport.peer_addr().is_none());
    }

    #[tokio::test]
    async fn send_requires_connect() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let result = transport.send(b"ping").await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn connected_send_and_recv() {
        let peer = loopback_peer().await;
        let peer_addr = peer.local_addr().unwrap();

        let transport = UdpTransport::connect(0, peer_addr).await.unwrap();
        assert_eq!(transport.peer_addr(), Some(peer_addr));

        transport.send(b"control").await.unwrap();

        let mut buf = [0u8; 64];
        let (n, src) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"control");
        assert_eq!(src.port(), transport.local_addr().port());

        peer.send_to(b"reply", src).await.unwrap();
        let n = transport
            .recv(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"reply");
    }

    #[tokio::test]
    async fn recv_timeout() {
        let peer = loopback_peer().await;
        let transport = UdpTransport::connect(0, peer.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let result = transport.recv(&mut buf, Duration::from_millis(50)).await;

        assert!(
            matches!(result, Err(Error::Timeout)),
            "expected Timeout, got: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn recv_until_past_deadline_times_out() {
        let peer = loopback_peer().await;
        let transport = UdpTransport::connect(0, peer.local_addr().unwrap())
            .await
            .unwrap();

        let mut buf = [0u8; 64];
        let result = transport.recv_until(&mut buf, Instant::now()).await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn connect_filters_source() {
        let radio = loopback_peer().await;
        let stranger = loopback_peer().await;

        let transport = UdpTransport::connect(0, radio.local_addr().unwrap())
            .await
            .unwrap();
        let dest = format!("127.0.0.1:{}", transport.local_addr().port());

        stranger.send_to(b"from stranger", &dest).await.unwrap();
        radio.send_to(b"from radio", &dest).await.unwrap();

        let mut buf = [0u8; 64];
        let n = transport
            .recv(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"from radio");
    }

    #[tokio::test]
    async fn full_size_datagram() {
        let peer = loopback_peer().await;
        let transport = UdpTransport::connect(0, peer.local_addr().unwrap())
            .await
            .unwrap();

        let data: Vec<u8> = (0..MAX_DATAGRAM).map(|i| (i % 256) as u8).collect();
        transport.send(&data).await.unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, MAX_DATAGRAM);
        assert_eq!(&buf[..n], &data[..]);
    }
}
