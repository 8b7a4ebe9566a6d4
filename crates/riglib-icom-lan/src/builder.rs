//! IcomLanBuilder -- fluent builder for [`IcomLanSession`].
//!
//! Collects the device address, credentials, stream parameters, and timing
//! before the control socket is opened.
//!
//! # Example
//!
//! ```no_run
//! use riglib_icom_lan::IcomLanBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> riglib_core::Result<()> {
//! let session = IcomLanBuilder::new()
//!     .host("192.168.1.50")
//!     .handshake_timeout(Duration::from_secs(30))
//!     .connect()
//!     .await?;
//! session.wait().await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use riglib_core::error::{Error, Result};
use riglib_transport::UdpTransport;

use crate::config::{Credentials, DEFAULT_CONTROL_PORT, SessionConfig, StreamRequest};
use crate::session::IcomLanSession;
use crate::state::local_session_id_from_clock;

/// Fluent builder for [`IcomLanSession`].
///
/// Only the host is required:
///
/// ```ignore
/// let session = IcomLanBuilder::new().host("ic-705.local").connect().await?;
/// ```
#[derive(Debug, Clone)]
pub struct IcomLanBuilder {
    host: Option<String>,
    port: u16,
    local_port: Option<u16>,
    local_session_id: Option<u32>,
    config: SessionConfig,
}

impl IcomLanBuilder {
    pub fn new() -> Self {
        Self {
            host: None,
            port: DEFAULT_CONTROL_PORT,
            local_port: None,
            local_session_id: None,
            config: SessionConfig::default(),
        }
    }

    /// Device hostname or IP address.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Device control port (default 50001).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Local port to bind. Defaults to the device control port, which is
    /// what the device expects; `0` lets the OS choose.
    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = Some(port);
        self
    }

    /// Override the session ID normally derived from the clock.
    pub fn local_session_id(mut self, sid: u32) -> Self {
        self.local_session_id = Some(sid);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = credentials;
        self
    }

    pub fn client_name(mut self, name: &str) -> Self {
        self.config.client_name = name.to_string();
        self
    }

    pub fn stream(mut self, stream: StreamRequest) -> Self {
        self.config.stream = stream;
        self
    }

    /// Device model name sent in the stream request.
    pub fn device_name(mut self, name: &str) -> Self {
        self.config.stream.device_name = name.to_string();
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    pub fn reauth_interval(mut self, interval: Duration) -> Self {
        self.config.reauth_interval = interval;
        self
    }

    pub fn stream_request_delay(mut self, delay: Duration) -> Self {
        self.config.stream_request_delay = delay;
        self
    }

    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.config.status_interval = interval;
        self
    }

    pub fn max_read_errors(mut self, n: u32) -> Self {
        self.config.max_read_errors = n;
        self
    }

    /// Give up if the session ID exchange has not completed in time.
    /// Without this the exchange is retried forever.
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = Some(timeout);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a session on an already connected transport.
    pub fn connect_with_transport(self, transport: UdpTransport) -> Result<IcomLanSession> {
        self.config.validate()?;
        let sid = self
            .local_session_id
            .unwrap_or_else(local_session_id_from_clock);
        IcomLanSession::start(transport, self.config, sid)
    }

    /// Resolve the host, open the control socket, and start the session.
    pub async fn connect(self) -> Result<IcomLanSession> {
        let host = self
            .host
            .as_deref()
            .ok_or_else(|| Error::InvalidParameter("host is required for connect()".into()))?;
        self.config.validate()?;

        let remote = resolve(host, self.port).await?;
        let local_port = self.local_port.unwrap_or(self.port);
        let transport = UdpTransport::connect(local_port, remote).await?;

        self.connect_with_transport(transport)
    }
}

impl Default for IcomLanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::Transport(format!("cannot resolve {}: {}", host, e)))?;
    addrs
        .next()
        .ok_or_else(|| Error::Transport(format!("no address for {}", host)))
}
