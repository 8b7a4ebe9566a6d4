//! Error types for riglib.
//!
//! All fallible operations across the LAN session crates return
//! [`Result<T>`], which uses [`Error`] as the error type. Socket failures,
//! timeouts, and session-level rejections are all captured here.

/// The error type for all riglib operations.
///
/// Variants cover the failure modes of a LAN remote session: socket
/// failures, malformed or unexpected datagrams, timeouts, and the two
/// authentication rejections the device can signal.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (socket bind, connect, or send failure).
    #[error("transport error: {0}")]
    Transport(String),

    /// Timed out waiting for a datagram from the device.
    ///
    /// On its own this is transient: the session counts it and retries.
    #[error("timeout waiting for response")]
    Timeout,

    /// The configured handshake timeout elapsed before the device
    /// completed session ID negotiation.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// The device rejected the login credentials.
    #[error("invalid user/password")]
    AuthRejected,

    /// The device rejected a periodic re-authentication.
    #[error("reauth failed")]
    ReauthRejected,

    /// Too many consecutive read failures (timeouts or socket errors).
    #[error("too many consecutive read errors ({0})")]
    TooManyReadErrors(u32),

    /// An invalid parameter was passed to the session builder.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No session is running.
    #[error("not connected")]
    NotConnected,

    /// The session task ended unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for errors that end the session.
    ///
    /// Only [`Error::Timeout`] is transient; every other variant means the
    /// session can no longer continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Timeout)
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
