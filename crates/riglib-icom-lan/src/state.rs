//! Mutable session record.
//!
//! [`SessionState`] is owned by the session task and is the only place
//! session identifiers, counters, and the auth token live. All mutation
//! goes through the transition methods below so the invariants hold in
//! one place:
//!
//! - the auth token is set at most once and never changes afterwards;
//! - `send_seq`, `auth_seq`, and `auth_inner_seq` only move forward
//!   (wrapping at 2^16);
//! - the two auth counters always advance together.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

use crate::packet::{AuthSeqs, SessionIds};

/// Initial outer counter for application packets.
pub const AUTH_SEQ_START: u16 = 1;

/// Initial inner envelope counter.
pub const AUTH_INNER_SEQ_START: u16 = 0x50;

/// Outer counter value once login has been sent.
pub const SEND_SEQ_AFTER_LOGIN: u16 = 5;

/// Derive a session ID from the wall clock (seconds since the epoch).
pub fn local_session_id_from_clock() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct SessionState {
    local_sid: u32,
    remote_sid: u32,
    send_seq: u16,
    auth_seq: u16,
    auth_inner_seq: u16,
    token: Option<[u8; 6]>,
    reauth_issued: bool,
    got_first_reauth_reply: bool,
    expected_echo_reply_seq: u16,
    self_probe_nonce: u8,
    last_reauth_at: Option<Instant>,
    last_status_at: Option<Instant>,
}

impl SessionState {
    pub fn new(local_sid: u32) -> Self {
        Self {
            local_sid,
            remote_sid: 0,
            send_seq: 0,
            auth_seq: 0,
            auth_inner_seq: 0,
            token: None,
            reauth_issued: false,
            got_first_reauth_reply: false,
            expected_echo_reply_seq: 0,
            self_probe_nonce: 0,
            last_reauth_at: None,
            last_status_at: None,
        }
    }

    pub fn ids(&self) -> SessionIds {
        SessionIds {
            local: self.local_sid,
            remote: self.remote_sid,
        }
    }

    pub fn local_sid(&self) -> u32 {
        self.local_sid
    }

    pub fn remote_sid(&self) -> u32 {
        self.remote_sid
    }

    /// Record the device's session ID. Returns `true` if it changed.
    pub fn set_remote_sid(&mut self, sid: u32) -> bool {
        let changed = self.remote_sid != sid;
        self.remote_sid = sid;
        changed
    }

    pub fn send_seq(&self) -> u16 {
        self.send_seq
    }

    /// Force the outer counter. Only the handshake does this, at fixed
    /// points of the bootstrap sequence.
    pub(crate) fn set_send_seq(&mut self, seq: u16) {
        self.send_seq = seq;
    }

    // -- Application counters ------------------------------------------------

    pub fn start_auth_counters(&mut self) {
        self.auth_seq = AUTH_SEQ_START;
        self.auth_inner_seq = AUTH_INNER_SEQ_START;
    }

    pub fn auth_seqs(&self) -> AuthSeqs {
        AuthSeqs {
            seq: self.auth_seq,
            inner_seq: self.auth_inner_seq,
        }
    }

    /// Advance both application counters after an application packet
    /// went out.
    pub fn advance_auth(&mut self) {
        self.auth_seq = self.auth_seq.wrapping_add(1);
        self.auth_inner_seq = self.auth_inner_seq.wrapping_add(1);
    }

    // -- Authentication -------------------------------------------------------

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn token(&self) -> Option<[u8; 6]> {
        self.token
    }

    /// Store the token from the first login success and pick the probe
    /// nonce. Later calls are ignored and return `false`.
    pub fn authenticate(&mut self, token: [u8; 6], nonce: u8) -> bool {
        if self.token.is_some() {
            return false;
        }
        self.token = Some(token);
        self.self_probe_nonce = nonce;
        true
    }

    pub fn self_probe_nonce(&self) -> u8 {
        self.self_probe_nonce
    }

    // -- Reauth ---------------------------------------------------------------

    /// `true` until the first reauth has been sent.
    pub fn next_reauth_is_first(&self) -> bool {
        !self.reauth_issued
    }

    pub fn mark_reauth_sent(&mut self, now: Instant) {
        self.reauth_issued = true;
        self.last_reauth_at = Some(now);
    }

    pub fn last_reauth_at(&self) -> Option<Instant> {
        self.last_reauth_at
    }

    /// Mark a reauth acknowledgement. Returns `true` for the first one.
    pub fn mark_reauth_reply(&mut self) -> bool {
        let first = !self.got_first_reauth_reply;
        self.got_first_reauth_reply = true;
        first
    }

    // -- Keepalive ------------------------------------------------------------

    /// Start a keepalive tick: the echo reply for this tick must carry the
    /// current `send_seq`, which is returned.
    pub fn begin_tick(&mut self) -> u16 {
        self.expected_echo_reply_seq = self.send_seq;
        self.send_seq
    }

    /// Finish a keepalive tick by advancing the outer counter.
    pub fn end_tick(&mut self) {
        self.send_seq = self.send_seq.wrapping_add(1);
    }

    pub fn expected_echo_reply_seq(&self) -> u16 {
        self.expected_echo_reply_seq
    }

    /// Returns `true` (and records `now`) when a status line is due.
    pub fn status_due(&mut self, now: Instant, interval: std::time::Duration) -> bool {
        match self.last_status_at {
            Some(last) if now.duration_since(last) < interval => false,
            _ => {
                self.last_status_at = Some(now);
                true
            }
        }
    }
}
