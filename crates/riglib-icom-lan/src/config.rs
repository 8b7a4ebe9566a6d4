//! Session configuration: credentials, stream parameters, and timing.
//!
//! [`SessionConfig`] carries everything the session task needs besides the
//! socket. It is normally assembled by [`IcomLanBuilder`](crate::IcomLanBuilder);
//! the defaults reproduce what the vendor's PC software sends.

use std::time::Duration;

use riglib_core::error::{Error, Result};

/// Width of every fixed-size text field in application packets.
pub const FIELD_LEN: usize = 16;

/// Default control port of the device.
pub const DEFAULT_CONTROL_PORT: u16 = 50001;

/// Default per-read deadline.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Default interval between self-originated echo probes.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(100);

/// Default interval between re-authentications.
pub const DEFAULT_REAUTH_INTERVAL: Duration = Duration::from_secs(60);

/// Delay between login success and the stream start request.
pub const DEFAULT_STREAM_REQUEST_DELAY: Duration = Duration::from_secs(3);

/// Interval between "still connected" status lines.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive read failures tolerated before the session is abandoned.
pub const DEFAULT_MAX_READ_ERRORS: u32 = 5;

/// Client name the vendor software reports at login.
pub const DEFAULT_CLIENT_NAME: &str = "icom-pc";

/// Login credentials, already passed through the device's credential
/// obfuscation transform.
///
/// The transform itself is not part of this crate: the obfuscated byte
/// strings go on the wire verbatim, NUL padded to [`FIELD_LEN`] bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    username: Vec<u8>,
    password: Vec<u8>,
}

impl Credentials {
    /// Build credentials from obfuscated username and password bytes.
    ///
    /// Each must fit in a [`FIELD_LEN`]-byte field.
    pub fn from_encoded(username: &[u8], password: &[u8]) -> Result<Self> {
        check_field("username", username)?;
        check_field("password", password)?;
        Ok(Self {
            username: username.to_vec(),
            password: password.to_vec(),
        })
    }

    /// Obfuscated username bytes.
    pub fn username(&self) -> &[u8] {
        &self.username
    }

    /// Obfuscated password bytes.
    pub fn password(&self) -> &[u8] {
        &self.password
    }
}

impl Default for Credentials {
    /// The factory account (`beer` / `beerbeer`) in obfuscated form.
    fn default() -> Self {
        Self {
            username: vec![0x2b, 0x3f, 0x55, 0x5c],
            password: vec![0x2b, 0x3f, 0x55, 0x5c, 0x3f, 0x25, 0x77, 0x58],
        }
    }
}

/// Parameters of the serial/audio stream start request.
///
/// The session only asks the device to start the streams; it never touches
/// their payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Device model name, e.g. `IC-705`.
    pub device_name: String,
    /// Opaque block the device reports about itself. The vendor software
    /// copies it from an earlier device reply; the default matches an IC-705.
    pub capability_block: [u8; 9],
    /// Enable the receive audio stream.
    pub rx_enable: bool,
    /// Enable the transmit audio stream.
    pub tx_enable: bool,
    /// Receive audio codec identifier.
    pub rx_codec: u8,
    /// Transmit audio codec identifier.
    pub tx_codec: u8,
    /// Receive audio sample rate in Hz.
    pub rx_sample_rate: u32,
    /// Transmit audio sample rate in Hz.
    pub tx_sample_rate: u32,
    /// Local port for the CI-V serial stream.
    pub civ_port: u32,
    /// Local port for the audio stream.
    pub audio_port: u32,
    /// Transmit buffer length in milliseconds.
    pub tx_buffer_ms: u32,
    /// Ask the device to convert audio to the requested format.
    pub convert: bool,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            device_name: "IC-705".to_string(),
            capability_block: [0x10, 0x80, 0x00, 0x00, 0x90, 0xc7, 0x0e, 0x86, 0x01],
            rx_enable: true,
            tx_enable: true,
            rx_codec: 0x04,
            tx_codec: 0x04,
            rx_sample_rate: 48_000,
            tx_sample_rate: 48_000,
            civ_port: 50002,
            audio_port: 50003,
            tx_buffer_ms: 100,
            convert: true,
        }
    }
}

/// Everything the session task needs besides its socket.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub credentials: Credentials,
    pub client_name: String,
    pub stream: StreamRequest,
    pub read_timeout: Duration,
    pub keepalive_interval: Duration,
    pub reauth_interval: Duration,
    pub stream_request_delay: Duration,
    pub status_interval: Duration,
    pub max_read_errors: u32,
    /// `None` retries the session ID exchange forever.
    pub handshake_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            stream: StreamRequest::default(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            reauth_interval: DEFAULT_REAUTH_INTERVAL,
            stream_request_delay: DEFAULT_STREAM_REQUEST_DELAY,
            status_interval: DEFAULT_STATUS_INTERVAL,
            max_read_errors: DEFAULT_MAX_READ_ERRORS,
            handshake_timeout: None,
        }
    }
}

impl SessionConfig {
    /// Check field widths and timer values before the session starts.
    pub fn validate(&self) -> Result<()> {
        check_field("client name", self.client_name.as_bytes())?;
        check_field("device name", self.stream.device_name.as_bytes())?;

        for (name, value) in [
            ("read timeout", self.read_timeout),
            ("keepalive interval", self.keepalive_interval),
            ("reauth interval", self.reauth_interval),
            ("status interval", self.status_interval),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidParameter(format!("{} must be nonzero", name)));
            }
        }

        if self.max_read_errors == 0 {
            return Err(Error::InvalidParameter(
                "max read errors must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// Copy `value` into a NUL padded fixed-width field.
pub(crate) fn fixed_field(value: &[u8]) -> [u8; FIELD_LEN] {
    let mut field = [0u8; FIELD_LEN];
    let n = value.len().min(FIELD_LEN);
    field[..n].copy_from_slice(&value[..n]);
    field
}

fn check_field(name: &str, value: &[u8]) -> Result<()> {
    if value.len() > FIELD_LEN {
        return Err(Error::InvalidParameter(format!(
            "{} longer than {} bytes",
            name, FIELD_LEN
        )));
    }
    Ok(())
}
