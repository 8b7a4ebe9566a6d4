//! Session ID exchange, login, and the delayed stream start.
//!
//! The bootstrap runs in three steps, each waiting for one reply shape:
//!
//! 1. SID probe, echo probe, SID probe: the device answers with its
//!    session ID in a SID reply.
//! 2. SID confirmation: the device answers with a confirm reply that
//!    re-asserts its session ID.
//! 3. Login: the answer is handled by the steady-state loop, which stores
//!    the token, sends the first reauth, and arms the stream start timer.
//!
//! Read timeouts during steps 1 and 2 are retried indefinitely unless a
//! handshake timeout is configured.

use tokio::time::Instant;
use tracing::{debug, error, info};

use riglib_core::error::{Error, Result};
use riglib_core::events::SessionEvent;

use crate::io::{Engine, Flow, Inbox, Wake};
use crate::packet::{self, Inbound};
use crate::state::SEND_SEQ_AFTER_LOGIN;
use crate::watchdog;

/// Result of a login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted { token: [u8; 6] },
    Rejected,
}

/// Extract a login outcome from an inbound packet, if it is a login reply.
pub fn login_outcome(inbound: &Inbound) -> Option<LoginOutcome> {
    match *inbound {
        Inbound::LoginAccepted { token } => Some(LoginOutcome::Accepted { token }),
        Inbound::LoginRejected => Some(LoginOutcome::Rejected),
        _ => None,
    }
}

impl Engine {
    /// Step 1: learn the device's session ID.
    pub(crate) async fn negotiate_session_id(
        &mut self,
        inbox: &mut Inbox,
        give_up_at: Option<Instant>,
    ) -> Result<Flow> {
        let ids = self.state.ids();

        self.send(&packet::sid_probe(self.state.send_seq(), ids))
            .await?;

        self.state.set_send_seq(1);
        let id = watchdog::self_probe_id(self.state.self_probe_nonce());
        self.send(&packet::echo_packet(self.state.send_seq(), ids, false, id))
            .await?;

        self.state.set_send_seq(0);
        self.send(&packet::sid_probe(self.state.send_seq(), ids))
            .await?;

        self.await_handshake_reply(inbox, give_up_at, |inbound| match inbound {
            Inbound::SidReply { remote_sid } => Some(remote_sid),
            _ => None,
        })
        .await
    }

    /// Step 2: confirm the session IDs.
    pub(crate) async fn confirm_session_id(
        &mut self,
        inbox: &mut Inbox,
        give_up_at: Option<Instant>,
    ) -> Result<Flow> {
        self.state.start_auth_counters();
        self.send(&packet::sid_confirm(self.state.ids())).await?;

        let flow = self
            .await_handshake_reply(inbox, give_up_at, |inbound| match inbound {
                Inbound::SidConfirmReply { remote_sid } => Some(remote_sid),
                _ => None,
            })
            .await?;

        if flow == Flow::Continue {
            debug!(
                local_sid = format!("{:08x}", self.state.local_sid()),
                remote_sid = format!("{:08x}", self.state.remote_sid()),
                "session ids confirmed"
            );
        }
        Ok(flow)
    }

    /// Step 3: send the login request.
    pub(crate) async fn send_login(&mut self) -> Result<()> {
        let request_id = rand::random::<[u8; 2]>();
        let pkt = packet::login_packet(
            self.state.auth_seqs(),
            self.state.ids(),
            request_id,
            &self.config.credentials,
            &self.config.client_name,
        );
        self.send_app(&pkt).await?;
        self.state.set_send_seq(SEND_SEQ_AFTER_LOGIN);

        debug!(client = %self.config.client_name, "login sent");
        Ok(())
    }

    /// Wait until `accept` picks a session ID out of an inbound packet.
    async fn await_handshake_reply<F>(
        &mut self,
        inbox: &mut Inbox,
        give_up_at: Option<Instant>,
        mut accept: F,
    ) -> Result<Flow>
    where
        F: FnMut(Inbound) -> Option<u32>,
    {
        loop {
            match self.next_wake(inbox, None, None, give_up_at).await {
                Wake::Datagram(n) => {
                    self.note_datagram();
                    if let Some(sid) = packet::parse(self.datagram(n)).and_then(&mut accept) {
                        self.adopt_remote_sid(sid);
                        return Ok(Flow::Continue);
                    }
                }
                Wake::ReadFailed(e) => self.note_read_failure(e, false)?,
                Wake::HandshakeExpired => return Err(Error::HandshakeTimeout),
                Wake::Shutdown(reply) => {
                    self.shutdown(reply).await;
                    return Ok(Flow::Stop);
                }
                Wake::Cancelled => {
                    debug!("session task cancelled during handshake");
                    return Ok(Flow::Stop);
                }
                Wake::Tick | Wake::StreamDue => {}
            }
        }
    }

    /// Handle a datagram while the login answer is still outstanding.
    /// Anything other than a login reply is ignored.
    pub(crate) async fn on_login_reply(
        &mut self,
        inbound: Inbound,
        stream_at: &mut Option<Instant>,
    ) -> Result<()> {
        match login_outcome(&inbound) {
            None => Ok(()),
            Some(LoginOutcome::Rejected) => {
                error!("invalid user/password");
                Err(Error::AuthRejected)
            }
            Some(LoginOutcome::Accepted { token }) => {
                if !self.state.authenticate(token, rand::random::<u8>()) {
                    return Ok(());
                }
                info!("auth ok");
                self.emit(SessionEvent::Authenticated);

                let now = Instant::now();
                self.send_reauth(now).await?;
                *stream_at = Some(now + self.config.stream_request_delay);
                Ok(())
            }
        }
    }

    /// Ask the device to start the serial and audio streams. Only valid
    /// once authenticated.
    pub(crate) async fn send_stream_request(&mut self) -> Result<()> {
        let Some(token) = self.state.token() else {
            debug!("not authenticated, skipping stream request");
            return Ok(());
        };

        info!(device = %self.config.stream.device_name, "requesting serial and audio stream");
        let pkt = packet::stream_request_packet(
            self.state.auth_seqs(),
            self.state.ids(),
            token,
            &self.config.stream,
            &self.config.credentials,
        );
        self.send_app(&pkt).await?;
        self.emit(SessionEvent::StreamRequested);
        Ok(())
    }
}
