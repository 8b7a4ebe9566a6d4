//! Echo/watchdog tracking.
//!
//! Two liveness mechanisms run side by side on the control port:
//!
//! - **Self-originated echo**: every keepalive tick we send an echo probe
//!   and expect the device's reply to carry the tick's sequence number. A
//!   reply with a different sequence means probes were lost in between.
//! - **Peer-originated echo**: the device sends its own probes, which must
//!   be mirrored straight back with the reply flag set and the device's
//!   sequence number.
//!
//! Plain 16-byte pings are answered the same way but carry no id.
//!
//! Loss is only reported. Nothing here retransmits.

use riglib_core::events::SessionEvent;

use crate::packet::{self, EchoPacket, SELF_PROBE_MARKER, SessionIds};

/// Gaps at or beyond this distance are treated as stale or reordered
/// replies and not reported.
pub const LOSS_REPORT_LIMIT: u16 = 1000;

/// Forward distance from `expected` to `got`, modulo 2^16.
pub fn loss_distance(expected: u16, got: u16) -> u16 {
    got.wrapping_sub(expected)
}

/// Number of probes to report as lost, or `None` when the reply is on
/// time or the gap is too large to be plausible.
pub fn lost_probes(expected: u16, got: u16) -> Option<u16> {
    match loss_distance(expected, got) {
        0 => None,
        d if d < LOSS_REPORT_LIMIT => Some(d),
        _ => None,
    }
}

/// Id for a self-originated probe: two random bytes, the session nonce,
/// and a fixed marker.
pub fn self_probe_id(nonce: u8) -> [u8; 4] {
    let [a, b] = rand::random::<[u8; 2]>();
    [a, b, nonce, SELF_PROBE_MARKER]
}

/// Mirror a peer probe: same id and sequence, reply flag set, our IDs as
/// source/destination.
pub fn mirror_peer_probe(probe: &EchoPacket, ids: SessionIds) -> Vec<u8> {
    packet::echo_packet(probe.seq, ids, true, probe.id)
}

/// Answer a plain ping with its own sequence number.
pub fn reflect_ping(seq: u16, ids: SessionIds) -> Vec<u8> {
    packet::ping_reply(seq, ids)
}

/// Check an echo reply against the expected sequence. Logs and returns a
/// [`SessionEvent::PacketsLost`] when a plausible gap is found.
pub fn check_echo_reply(expected: u16, reply: &EchoPacket) -> Option<SessionEvent> {
    let count = lost_probes(expected, reply.seq)?;
    tracing::error!(
        lost = count,
        got = reply.seq,
        expected = expected,
        "lost {} packets",
        count
    );
    Some(SessionEvent::PacketsLost {
        count,
        expected,
        got: reply.seq,
    })
}
