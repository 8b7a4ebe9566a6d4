//! Icom LAN packet encoder/classifier.
//!
//! Every datagram on the control port starts with the same 16-byte outer
//! header. Packets are told apart by exact length plus fixed bytes at fixed
//! offsets, not by a tag field, so inbound classification is an ordered
//! table of shape rules ([`SHAPE_RULES`]) checked most-specific-first.
//!
//! Builders in this module are pure: they take a snapshot of the session
//! identifiers and counters and return the encoded bytes. Advancing
//! counters after a successful send is the caller's job.
//!
//! # Outer header
//!
//! ```text
//! 0..4    total length     u32 LE
//! 4..6    packet type      u16 LE
//! 6..8    sequence         u16 LE
//! 8..12   source SID       u32 BE
//! 12..16  destination SID  u32 BE
//! ```
//!
//! # Application envelope (type 0, longer than 16 bytes)
//!
//! ```text
//! 16..20  inner length     u32 BE (total - 16)
//! 20      direction        1 = request, 2 = reply
//! 21      magic            login / disconnect / reauth / stream start
//! 23..25  inner sequence   u16 LE
//! 26..32  auth token
//! ```

use bytes::{BufMut, BytesMut};

use crate::config::{Credentials, StreamRequest, fixed_field};

/// Outer header length.
pub const HEADER_LEN: usize = 16;

/// Plain control packets (ping, SID probe, teardown) are header-only.
pub const CONTROL_LEN: usize = HEADER_LEN;

/// Echo probe/reply length.
pub const ECHO_LEN: usize = 21;

/// Login request length.
pub const LOGIN_LEN: usize = 128;

/// Reauth and disconnect request length.
pub const AUTH_LEN: usize = 64;

/// Stream start request length.
pub const STREAM_REQUEST_LEN: usize = 144;

/// Login reply length.
pub const LOGIN_REPLY_LEN: usize = 96;

/// Reauth acknowledgement length.
pub const REAUTH_REPLY_LEN: usize = 64;

/// Reauth rejection length.
pub const REAUTH_FAILURE_LEN: usize = 80;

/// Outer packet types.
pub mod kind {
    /// Plain ping/pong and every application packet.
    pub const CONTROL: u16 = 0x00;
    /// Session ID probe.
    pub const SID_PROBE: u16 = 0x03;
    /// Session ID probe reply.
    pub const SID_REPLY: u16 = 0x04;
    /// Disconnect teardown.
    pub const TEARDOWN: u16 = 0x05;
    /// Session ID confirmation (both directions).
    pub const SID_CONFIRM: u16 = 0x06;
    /// Echo probe/reply.
    pub const ECHO: u16 = 0x07;
}

/// Application envelope magic values (byte 21).
pub mod magic {
    pub const LOGIN: u8 = 0x00;
    pub const DISCONNECT: u8 = 0x01;
    pub const REAUTH_FIRST: u8 = 0x02;
    pub const STREAM_START: u8 = 0x03;
    pub const REAUTH_SUBSEQUENT: u8 = 0x05;
}

/// Application envelope direction byte for requests.
pub const DIRECTION_REQUEST: u8 = 0x01;

/// Application envelope direction byte for replies.
pub const DIRECTION_REPLY: u8 = 0x02;

/// The session confirmation always carries sequence 1.
pub const SID_CONFIRM_SEQ: u16 = 1;

/// Last byte of every self-originated echo probe id.
pub const SELF_PROBE_MARKER: u8 = 0x03;

// ---------------------------------------------------------------------------
// Inbound signatures
// ---------------------------------------------------------------------------

/// First 8 bytes of a SID probe reply (type 4, seq 0).
pub const SID_REPLY_SIGNATURE: [u8; 8] = [0x10, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00];

/// First 8 bytes of a SID confirmation reply (type 6, seq 1).
pub const SID_CONFIRM_SIGNATURE: [u8; 8] = [0x10, 0x00, 0x00, 0x00, 0x06, 0x00, 0x01, 0x00];

/// First 8 bytes of a login reply.
pub const LOGIN_REPLY_SIGNATURE: [u8; 8] = [0x60, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00];

/// Bytes 1..6 of an echo packet. Byte 0 is not checked: the device fills
/// the length field with zero on its own probes.
pub const ECHO_SIGNATURE: [u8; 5] = [0x00, 0x00, 0x00, 0x07, 0x00];

/// First 6 bytes of a plain ping.
pub const PING_SIGNATURE: [u8; 6] = [0x10, 0x00, 0x00, 0x00, 0x00, 0x00];

/// First 6 bytes of a reauth acknowledgement.
pub const REAUTH_REPLY_SIGNATURE: [u8; 6] = [0x40, 0x00, 0x00, 0x00, 0x00, 0x00];

/// First 6 bytes of a reauth rejection.
pub const REAUTH_FAILURE_SIGNATURE: [u8; 6] = [0x50, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Offset of both failure sentinels.
pub const SENTINEL_OFFSET: usize = 48;

/// Marks a login reply as "invalid user/password".
pub const LOGIN_FAILURE_SENTINEL: [u8; 4] = [0xff, 0xff, 0xff, 0xfe];

/// Marks a reauth rejection. Not the same value as the login sentinel.
pub const REAUTH_FAILURE_SENTINEL: [u8; 3] = [0xff, 0xff, 0xff];

/// Auth token location in application packets and login replies.
pub const TOKEN_RANGE: std::ops::Range<usize> = 26..32;

/// Session identifiers stamped on every outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIds {
    /// Our session ID (source field).
    pub local: u32,
    /// The device's session ID (destination field).
    pub remote: u32,
}

/// Snapshot of the application-layer counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthSeqs {
    /// Outer sequence for application packets.
    pub seq: u16,
    /// Inner envelope sequence.
    pub inner_seq: u16,
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn put_header(buf: &mut BytesMut, len: usize, kind: u16, seq: u16, ids: SessionIds) {
    buf.put_u32_le(len as u32);
    buf.put_u16_le(kind);
    buf.put_u16_le(seq);
    buf.put_u32(ids.local);
    buf.put_u32(ids.remote);
}

fn put_envelope(buf: &mut BytesMut, len: usize, magic: u8, inner_seq: u16, token: [u8; 6]) {
    buf.put_u32((len - HEADER_LEN) as u32);
    buf.put_u8(DIRECTION_REQUEST);
    buf.put_u8(magic);
    buf.put_u8(0x00);
    buf.put_u16_le(inner_seq);
    buf.put_u8(0x00);
    buf.put_slice(&token);
}

fn finish(mut buf: BytesMut, len: usize) -> Vec<u8> {
    debug_assert!(buf.len() <= len, "packet body overran its length");
    buf.resize(len, 0);
    buf.to_vec()
}

/// Encode a header-only control packet.
pub fn control_packet(kind: u16, seq: u16, ids: SessionIds) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(CONTROL_LEN);
    put_header(&mut buf, CONTROL_LEN, kind, seq, ids);
    buf.to_vec()
}

/// Session ID probe (type 3).
pub fn sid_probe(seq: u16, ids: SessionIds) -> Vec<u8> {
    control_packet(kind::SID_PROBE, seq, ids)
}

/// Session ID confirmation (type 6, sequence fixed at 1).
pub fn sid_confirm(ids: SessionIds) -> Vec<u8> {
    control_packet(kind::SID_CONFIRM, SID_CONFIRM_SEQ, ids)
}

/// Answer to a plain ping: same sequence, our IDs.
pub fn ping_reply(seq: u16, ids: SessionIds) -> Vec<u8> {
    control_packet(kind::CONTROL, seq, ids)
}

/// Outer teardown (type 5, sequence 0).
pub fn teardown(ids: SessionIds) -> Vec<u8> {
    control_packet(kind::TEARDOWN, 0, ids)
}

/// Echo probe (`reply == false`) or echo reply (`reply == true`).
pub fn echo_packet(seq: u16, ids: SessionIds, reply: bool, id: [u8; 4]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(ECHO_LEN);
    put_header(&mut buf, ECHO_LEN, kind::ECHO, seq, ids);
    buf.put_u8(reply as u8);
    buf.put_slice(&id);
    buf.to_vec()
}

/// Login request.
///
/// `request_id` fills the first two bytes of the token slot; the device
/// echoes them back as the start of the issued token.
pub fn login_packet(
    auth: AuthSeqs,
    ids: SessionIds,
    request_id: [u8; 2],
    credentials: &Credentials,
    client_name: &str,
) -> Vec<u8> {
    let mut token = [0u8; 6];
    token[..2].copy_from_slice(&request_id);

    let mut buf = BytesMut::with_capacity(LOGIN_LEN);
    put_header(&mut buf, LOGIN_LEN, kind::CONTROL, auth.seq, ids);
    put_envelope(&mut buf, LOGIN_LEN, magic::LOGIN, auth.inner_seq, token);
    buf.put_bytes(0, 64 - buf.len());
    buf.put_slice(&fixed_field(credentials.username()));
    buf.put_slice(&fixed_field(credentials.password()));
    buf.put_slice(&fixed_field(client_name.as_bytes()));
    finish(buf, LOGIN_LEN)
}

/// Reauth request; `first` selects the first-reauth magic.
pub fn reauth_packet(auth: AuthSeqs, ids: SessionIds, token: [u8; 6], first: bool) -> Vec<u8> {
    let magic = if first {
        magic::REAUTH_FIRST
    } else {
        magic::REAUTH_SUBSEQUENT
    };
    auth_packet(auth, ids, token, magic)
}

/// Explicit disconnect request.
pub fn disconnect_packet(auth: AuthSeqs, ids: SessionIds, token: [u8; 6]) -> Vec<u8> {
    auth_packet(auth, ids, token, magic::DISCONNECT)
}

fn auth_packet(auth: AuthSeqs, ids: SessionIds, token: [u8; 6], magic: u8) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(AUTH_LEN);
    put_header(&mut buf, AUTH_LEN, kind::CONTROL, auth.seq, ids);
    put_envelope(&mut buf, AUTH_LEN, magic, auth.inner_seq, token);
    finish(buf, AUTH_LEN)
}

/// Serial/audio stream start request.
pub fn stream_request_packet(
    auth: AuthSeqs,
    ids: SessionIds,
    token: [u8; 6],
    request: &StreamRequest,
    credentials: &Credentials,
) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(STREAM_REQUEST_LEN);
    put_header(&mut buf, STREAM_REQUEST_LEN, kind::CONTROL, auth.seq, ids);
    put_envelope(
        &mut buf,
        STREAM_REQUEST_LEN,
        magic::STREAM_START,
        auth.inner_seq,
        token,
    );
    buf.put_bytes(0, 39 - buf.len());
    buf.put_slice(&request.capability_block);
    buf.put_bytes(0, 64 - buf.len());
    buf.put_slice(&fixed_field(request.device_name.as_bytes()));
    buf.put_bytes(0, 96 - buf.len());
    buf.put_slice(&fixed_field(credentials.username()));
    buf.put_u8(request.rx_enable as u8);
    buf.put_u8(request.tx_enable as u8);
    buf.put_u8(request.rx_codec);
    buf.put_u8(request.tx_codec);
    buf.put_u32(request.rx_sample_rate);
    buf.put_u32(request.tx_sample_rate);
    buf.put_u32(request.civ_port);
    buf.put_u32(request.audio_port);
    buf.put_u32(request.tx_buffer_ms);
    buf.put_u8(request.convert as u8);
    finish(buf, STREAM_REQUEST_LEN)
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Shape of an inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Login reply carrying the invalid-credentials sentinel.
    LoginRejected,
    /// Login reply without the sentinel; carries the auth token.
    LoginAccepted,
    /// Reauth rejection.
    ReauthRejected,
    /// Reauth acknowledgement.
    ReauthReply,
    /// Echo probe or reply.
    Echo,
    /// SID probe reply.
    SidReply,
    /// SID confirmation reply.
    SidConfirmReply,
    /// Plain ping.
    Ping,
}

/// One entry of the classification table: exact length plus byte runs
/// that must match at fixed offsets.
#[derive(Debug)]
pub struct ShapeRule {
    pub kind: PacketKind,
    pub len: usize,
    pub matches: &'static [(usize, &'static [u8])],
}

impl ShapeRule {
    fn matches(&self, buf: &[u8]) -> bool {
        buf.len() == self.len
            && self
                .matches
                .iter()
                .all(|(offset, bytes)| buf[*offset..*offset + bytes.len()] == **bytes)
    }
}

/// Inbound classification rules, most specific first.
pub const SHAPE_RULES: &[ShapeRule] = &[
    ShapeRule {
        kind: PacketKind::LoginRejected,
        len: LOGIN_REPLY_LEN,
        matches: &[
            (0, &LOGIN_REPLY_SIGNATURE),
            (SENTINEL_OFFSET, &LOGIN_FAILURE_SENTINEL),
        ],
    },
    ShapeRule {
        kind: PacketKind::LoginAccepted,
        len: LOGIN_REPLY_LEN,
        matches: &[(0, &LOGIN_REPLY_SIGNATURE)],
    },
    ShapeRule {
        kind: PacketKind::ReauthRejected,
        len: REAUTH_FAILURE_LEN,
        matches: &[
            (0, &REAUTH_FAILURE_SIGNATURE),
            (SENTINEL_OFFSET, &REAUTH_FAILURE_SENTINEL),
        ],
    },
    ShapeRule {
        kind: PacketKind::ReauthReply,
        len: REAUTH_REPLY_LEN,
        matches: &[(0, &REAUTH_REPLY_SIGNATURE)],
    },
    ShapeRule {
        kind: PacketKind::Echo,
        len: ECHO_LEN,
        matches: &[(1, &ECHO_SIGNATURE)],
    },
    ShapeRule {
        kind: PacketKind::SidReply,
        len: CONTROL_LEN,
        matches: &[(0, &SID_REPLY_SIGNATURE)],
    },
    ShapeRule {
        kind: PacketKind::SidConfirmReply,
        len: CONTROL_LEN,
        matches: &[(0, &SID_CONFIRM_SIGNATURE)],
    },
    ShapeRule {
        kind: PacketKind::Ping,
        len: CONTROL_LEN,
        matches: &[(0, &PING_SIGNATURE)],
    },
];

/// Classify an inbound datagram, or `None` if it matches no known shape.
pub fn classify(buf: &[u8]) -> Option<PacketKind> {
    SHAPE_RULES
        .iter()
        .find(|rule| rule.matches(buf))
        .map(|rule| rule.kind)
}

/// A classified inbound datagram with its fields extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    SidReply { remote_sid: u32 },
    SidConfirmReply { remote_sid: u32 },
    LoginAccepted { token: [u8; 6] },
    LoginRejected,
    ReauthReply,
    ReauthRejected,
    Echo(EchoPacket),
    Ping { seq: u16 },
}

/// Fields of an echo probe or reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoPacket {
    /// Outer sequence number.
    pub seq: u16,
    /// Sender's session ID.
    pub src_sid: u32,
    /// Receiver's session ID.
    pub dst_sid: u32,
    /// `false` for a probe, `true` for a reply.
    pub reply: bool,
    /// Opaque probe id, echoed back verbatim.
    pub id: [u8; 4],
}

/// Classify and decode an inbound datagram.
pub fn parse(buf: &[u8]) -> Option<Inbound> {
    let inbound = match classify(buf)? {
        PacketKind::SidReply => Inbound::SidReply {
            remote_sid: src_sid(buf),
        },
        PacketKind::SidConfirmReply => Inbound::SidConfirmReply {
            remote_sid: src_sid(buf),
        },
        PacketKind::LoginAccepted => {
            let mut token = [0u8; 6];
            token.copy_from_slice(&buf[TOKEN_RANGE]);
            Inbound::LoginAccepted { token }
        }
        PacketKind::LoginRejected => Inbound::LoginRejected,
        PacketKind::ReauthReply => Inbound::ReauthReply,
        PacketKind::ReauthRejected => Inbound::ReauthRejected,
        PacketKind::Echo => Inbound::Echo(EchoPacket {
            seq: seq(buf),
            src_sid: src_sid(buf),
            dst_sid: dst_sid(buf),
            reply: buf[16] != 0,
            id: [buf[17], buf[18], buf[19], buf[20]],
        }),
        PacketKind::Ping => Inbound::Ping { seq: seq(buf) },
    };
    Some(inbound)
}

fn seq(buf: &[u8]) -> u16 {
    u16::from_le_bytes([buf[6], buf[7]])
}

fn src_sid(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]])
}

fn dst_sid(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]])
}
