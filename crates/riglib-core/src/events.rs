//! Asynchronous session event types.
//!
//! Events are emitted by the LAN session task through a
//! [`tokio::sync::broadcast`] channel as the session moves through its
//! lifecycle. Front ends subscribe to these for status display without
//! polling the session.

/// An event emitted by a LAN session.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; slow consumers may miss events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The device assigned (or re-asserted) its session ID.
    SessionIdAssigned {
        /// Our own session ID.
        local: u32,
        /// The device's session ID.
        remote: u32,
    },

    /// Login succeeded and the device issued an auth token.
    Authenticated,

    /// A re-authentication packet was sent.
    ReauthSent {
        /// `true` for the first reauth of the session.
        first: bool,
    },

    /// The serial/audio stream start request was sent.
    StreamRequested,

    /// An echo reply arrived with a sequence gap.
    PacketsLost {
        /// Number of probes estimated lost.
        count: u16,
        /// The sequence we expected the reply to carry.
        expected: u16,
        /// The sequence the reply actually carried.
        got: u16,
    },

    /// The session sent its teardown packets and stopped.
    Disconnected,
}
