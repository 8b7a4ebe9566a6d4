//! Session task: the single owner of the socket and the session state.
//!
//! The task runs the handshake and then the steady-state loop. Everything
//! that touches counters or sends packets happens here, including requests
//! from other tasks (shutdown) and the delayed stream start, so a counter
//! increment and the packet it belongs to are never split across tasks.
//!
//! The loop waits on, in priority order:
//! 1. cancellation,
//! 2. requests from the session handle,
//! 3. the handshake deadline (if one is configured),
//! 4. the keepalive tick (once authenticated),
//! 5. the stream start timer,
//! 6. the next datagram, bounded by the read deadline.

use std::future;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use riglib_core::error::{Error, Result};
use riglib_core::events::SessionEvent;
use riglib_transport::{MAX_DATAGRAM, UdpTransport};

use crate::config::SessionConfig;
use crate::packet::{self, Inbound};
use crate::state::SessionState;
use crate::watchdog;

/// A request sent from the session handle to the session task.
#[derive(Debug)]
pub(crate) enum Request {
    /// Send the disconnect sequence and stop.
    Disconnect {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Handle to the session task.
pub(crate) struct SessionIo {
    pub cmd_tx: mpsc::Sender<Request>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<()>>,
}

/// Receiving side of the handle, owned by the task.
pub(crate) struct Inbox {
    cmd_rx: mpsc::Receiver<Request>,
    cancel: CancellationToken,
}

/// Whether a session phase handed over to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// What woke the session loop.
pub(crate) enum Wake {
    Datagram(usize),
    ReadFailed(Error),
    Shutdown(Option<oneshot::Sender<Result<()>>>),
    Cancelled,
    HandshakeExpired,
    Tick,
    StreamDue,
}

/// Spawn the session task. The transport must already be connected.
pub(crate) fn spawn_session_task(
    transport: UdpTransport,
    state: SessionState,
    config: SessionConfig,
    event_tx: broadcast::Sender<SessionEvent>,
) -> SessionIo {
    let (cmd_tx, cmd_rx) = mpsc::channel::<Request>(8);
    let cancel = CancellationToken::new();
    let inbox = Inbox {
        cmd_rx,
        cancel: cancel.clone(),
    };

    let engine = Engine::new(transport, state, config, event_tx);
    let task = tokio::spawn(engine.run(inbox));

    SessionIo {
        cmd_tx,
        cancel,
        task,
    }
}

/// Session engine. Handshake, reauth, and shutdown steps live in their own
/// modules as further `impl Engine` blocks.
pub(crate) struct Engine {
    pub(crate) transport: UdpTransport,
    pub(crate) state: SessionState,
    pub(crate) config: SessionConfig,
    pub(crate) event_tx: broadcast::Sender<SessionEvent>,
    buf: Vec<u8>,
    read_deadline: Instant,
    read_errors: u32,
}

impl Engine {
    fn new(
        transport: UdpTransport,
        state: SessionState,
        config: SessionConfig,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let read_deadline = Instant::now() + config.read_timeout;
        Self {
            transport,
            state,
            config,
            event_tx,
            buf: vec![0u8; MAX_DATAGRAM],
            read_deadline,
            read_errors: 0,
        }
    }

    async fn run(mut self, mut inbox: Inbox) -> Result<()> {
        debug!(
            local_sid = format!("{:08x}", self.state.local_sid()),
            "using session id"
        );

        let result = self.drive(&mut inbox).await;
        if let Err(e) = &result {
            error!(error = %e, "session failed");
        }
        result
    }

    async fn drive(&mut self, inbox: &mut Inbox) -> Result<()> {
        let give_up_at = self.config.handshake_timeout.map(|t| Instant::now() + t);

        if self.negotiate_session_id(inbox, give_up_at).await? == Flow::Stop {
            return Ok(());
        }
        if self.confirm_session_id(inbox, give_up_at).await? == Flow::Stop {
            return Ok(());
        }
        self.send_login().await?;
        self.steady_state(inbox).await
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Send one datagram. A write failure ends the session.
    pub(crate) async fn send(&self, data: &[u8]) -> Result<()> {
        self.transport.send(data).await
    }

    /// Send an application packet and advance the auth counters.
    pub(crate) async fn send_app(&mut self, data: &[u8]) -> Result<()> {
        self.transport.send(data).await?;
        self.state.advance_auth();
        Ok(())
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn adopt_remote_sid(&mut self, sid: u32) {
        if self.state.set_remote_sid(sid) {
            debug!(remote_sid = format!("{:08x}", sid), "got remote session id");
            self.emit(SessionEvent::SessionIdAssigned {
                local: self.state.local_sid(),
                remote: sid,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Waiting
    // -----------------------------------------------------------------------

    pub(crate) async fn next_wake(
        &mut self,
        inbox: &mut Inbox,
        tick: Option<&mut Interval>,
        stream_at: Option<Instant>,
        give_up_at: Option<Instant>,
    ) -> Wake {
        tokio::select! {
            biased;

            _ = inbox.cancel.cancelled() => Wake::Cancelled,

            req = inbox.cmd_rx.recv() => match req {
                Some(Request::Disconnect { reply }) => Wake::Shutdown(Some(reply)),
                None => {
                    debug!("all session handles dropped, shutting down");
                    Wake::Shutdown(None)
                }
            },

            _ = sleep_until_some(give_up_at) => Wake::HandshakeExpired,

            _ = tick_some(tick) => Wake::Tick,

            _ = sleep_until_some(stream_at) => Wake::StreamDue,

            res = self.transport.recv_until(&mut self.buf, self.read_deadline) => match res {
                Ok(n) => Wake::Datagram(n),
                Err(e) => Wake::ReadFailed(e),
            },
        }
    }

    pub(crate) fn note_datagram(&mut self) {
        self.read_errors = 0;
        self.read_deadline = Instant::now() + self.config.read_timeout;
    }

    /// Count a failed read. Timeouts are only counted when
    /// `count_timeouts` is set; socket errors always are.
    pub(crate) fn note_read_failure(&mut self, err: Error, count_timeouts: bool) -> Result<()> {
        self.read_deadline = Instant::now() + self.config.read_timeout;

        if err.is_fatal() {
            error!(error = %err, "stream break detected");
        } else if count_timeouts {
            trace!(count = self.read_errors + 1, "read deadline expired");
        } else {
            return Ok(());
        }

        self.read_errors += 1;
        if self.read_errors >= self.config.max_read_errors {
            return Err(Error::TooManyReadErrors(self.read_errors));
        }
        Ok(())
    }

    pub(crate) fn datagram(&self, n: usize) -> &[u8] {
        &self.buf[..n]
    }

    // -----------------------------------------------------------------------
    // Steady state
    // -----------------------------------------------------------------------

    async fn steady_state(&mut self, inbox: &mut Inbox) -> Result<()> {
        let mut tick = tokio::time::interval(self.config.keepalive_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stream_at: Option<Instant> = None;

        loop {
            let ticking = self.state.is_authenticated();
            let wake = self
                .next_wake(inbox, ticking.then_some(&mut tick), stream_at, None)
                .await;

            match wake {
                Wake::Datagram(n) => {
                    self.note_datagram();
                    self.dispatch(n, &mut stream_at).await?;
                }
                Wake::ReadFailed(e) => self.note_read_failure(e, true)?,
                Wake::Tick => self.keepalive_tick().await?,
                Wake::StreamDue => {
                    stream_at = None;
                    self.send_stream_request().await?;
                }
                Wake::Shutdown(reply) => {
                    self.shutdown(reply).await;
                    return Ok(());
                }
                Wake::Cancelled => {
                    debug!("session task cancelled");
                    return Ok(());
                }
                Wake::HandshakeExpired => {}
            }
        }
    }

    /// Route one inbound datagram by shape.
    async fn dispatch(&mut self, n: usize, stream_at: &mut Option<Instant>) -> Result<()> {
        let Some(inbound) = packet::parse(self.datagram(n)) else {
            trace!(len = n, "ignoring unrecognized datagram");
            return Ok(());
        };

        if !self.state.is_authenticated() {
            return self.on_login_reply(inbound, stream_at).await;
        }

        match inbound {
            Inbound::Echo(echo) if echo.reply => {
                let expected = self.state.expected_echo_reply_seq();
                if let Some(event) = watchdog::check_echo_reply(expected, &echo) {
                    self.emit(event);
                }
            }
            Inbound::Echo(probe) => {
                let reply = watchdog::mirror_peer_probe(&probe, self.state.ids());
                self.send(&reply).await?;
            }
            Inbound::Ping { seq } => {
                let reply = watchdog::reflect_ping(seq, self.state.ids());
                self.send(&reply).await?;
            }
            Inbound::ReauthReply => self.on_reauth_reply(),
            Inbound::ReauthRejected => return self.on_reauth_rejected().await,
            Inbound::SidReply { remote_sid } | Inbound::SidConfirmReply { remote_sid } => {
                self.adopt_remote_sid(remote_sid);
            }
            Inbound::LoginAccepted { .. } | Inbound::LoginRejected => {
                trace!("ignoring login reply after authentication");
            }
        }
        Ok(())
    }

    /// One keepalive tick: echo probe and SID probe with the same
    /// sequence, then any due reauth and status line.
    async fn keepalive_tick(&mut self) -> Result<()> {
        let now = Instant::now();
        let seq = self.state.begin_tick();
        let ids = self.state.ids();
        let id = watchdog::self_probe_id(self.state.self_probe_nonce());

        self.send(&packet::echo_packet(seq, ids, false, id)).await?;
        self.send(&packet::sid_probe(seq, ids)).await?;
        self.state.end_tick();

        self.reauth_if_due(now).await?;

        if self.state.status_due(now, self.config.status_interval) {
            info!("still connected");
        }
        Ok(())
    }
}

async fn sleep_until_some(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

async fn tick_some(tick: Option<&mut Interval>) {
    match tick {
        Some(tick) => {
            tick.tick().await;
        }
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use riglib_test_harness::frames;
    use std::time::Duration;

    async fn engine() -> (Engine, tokio::net::UdpSocket) {
        let peer = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = UdpTransport::connect(0, peer.local_addr().unwrap())
            .await
            .unwrap();
        let (event_tx, _) = broadcast::channel(16);
        let config = SessionConfig {
            read_timeout: Duration::from_millis(20),
            max_read_errors: 3,
            ..SessionConfig::default()
        };
        let engine = Engine::new(transport, SessionState::new(0x0102_0304), config, event_tx);
        (engine, peer)
    }

    #[tokio::test]
    async fn timeouts_count_only_when_asked() {
        let (mut engine, _peer) = engine().await;
        for _ in 0..10 {
            engine.note_read_failure(Error::Timeout, false).unwrap();
        }
        assert_eq!(engine.read_errors, 0);
    }

    #[tokio::test]
    async fn socket_errors_count_during_handshake() {
        let (mut engine, _peer) = engine().await;
        engine
            .note_read_failure(std::io::Error::other("refused").into(), false)
            .unwrap();
        engine.note_read_failure(Error::Timeout, false).unwrap();
        assert_eq!(engine.read_errors, 1);
    }

    #[tokio::test]
    async fn reauth_acknowledgements_are_absorbed() {
        let (mut engine, peer) = engine().await;
        engine.state.set_remote_sid(0xaabb_ccdd);
        engine.state.authenticate([1, 2, 3, 4, 5, 6], 0x42);

        let ack = frames::reauth_reply(0xaabb_ccdd, 0x0102_0304, [1, 2, 3, 4, 5, 6]);
        for _ in 0..2 {
            engine.buf[..ack.len()].copy_from_slice(&ack);
            engine.dispatch(ack.len(), &mut None).await.unwrap();
        }

        assert!(!engine.state.mark_reauth_reply());
        let mut buf = [0u8; 64];
        let sent = tokio::time::timeout(Duration::from_millis(100), peer.recv_from(&mut buf)).await;
        assert!(sent.is_err(), "reauth acknowledgement must not be answered");
    }

    #[tokio::test]
    async fn consecutive_failures_become_fatal() {
        let (mut engine, _peer) = engine().await;
        engine.note_read_failure(Error::Timeout, true).unwrap();
        engine
            .note_read_failure(std::io::Error::other("boom").into(), true)
            .unwrap();
        let result = engine.note_read_failure(Error::Timeout, true);
        assert!(matches!(result, Err(Error::TooManyReadErrors(3))));
    }

    #[tokio::test]
    async fn datagram_resets_failure_count() {
        let (mut engine, _peer) = engine().await;
        engine.note_read_failure(Error::Timeout, true).unwrap();
        engine.note_read_failure(Error::Timeout, true).unwrap();
        engine.note_datagram();
        engine.note_read_failure(Error::Timeout, true).unwrap();
        engine.note_read_failure(Error::Timeout, true).unwrap();
        assert_eq!(engine.read_errors, 2);
    }

    #[tokio::test]
    async fn send_app_advances_counters_once() {
        let (mut engine, peer) = engine().await;
        engine.state.start_auth_counters();
        engine.send_app(&[0u8; 64]).await.unwrap();

        let seqs = engine.state.auth_seqs();
        assert_eq!(seqs.seq, 2);
        assert_eq!(seqs.inner_seq, 0x51);

        let mut buf = [0u8; 128];
        let (n, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, 64);
    }

    #[tokio::test]
    async fn keepalive_tick_sends_echo_then_sid_probe() {
        let (mut engine, peer) = engine().await;
        engine.state.set_remote_sid(0xaabb_ccdd);
        engine.state.set_send_seq(5);

        engine.keepalive_tick().await.unwrap();
        assert_eq!(engine.state.send_seq(), 6);
        assert_eq!(engine.state.expected_echo_reply_seq(), 5);

        let mut buf = [0u8; 64];
        let (n, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, packet::ECHO_LEN);
        assert_eq!(&buf[4..8], &[0x07, 0x00, 0x05, 0x00]);
        assert_eq!(buf[16], 0);

        let (n, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(n, packet::CONTROL_LEN);
        assert_eq!(&buf[4..8], &[0x03, 0x00, 0x05, 0x00]);
    }
}
