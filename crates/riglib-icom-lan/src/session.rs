//! IcomLanSession -- handle to a running control-port session.
//!
//! The session itself runs in a background task (see the `io` module).
//! This handle observes it through [`SessionEvent`]s, asks it to
//! disconnect, or waits for it to end.

use std::net::SocketAddr;

use tokio::sync::broadcast;

use riglib_core::error::{Error, Result};
use riglib_core::events::SessionEvent;
use riglib_transport::UdpTransport;

use crate::config::SessionConfig;
use crate::io::{self, SessionIo};
use crate::shutdown::ShutdownHandle;
use crate::state::SessionState;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A live Wi-Fi remote session with an Icom device.
///
/// Dropping the handle (and every [`ShutdownHandle`] cloned from it) makes
/// the session disconnect and stop.
pub struct IcomLanSession {
    io: SessionIo,
    event_tx: broadcast::Sender<SessionEvent>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    local_session_id: u32,
}

impl IcomLanSession {
    /// Start the session task on a connected transport.
    pub(crate) fn start(
        transport: UdpTransport,
        config: SessionConfig,
        local_session_id: u32,
    ) -> Result<Self> {
        let remote_addr = transport.peer_addr().ok_or(Error::NotConnected)?;
        let local_addr = transport.local_addr();
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(
            local = %local_addr,
            remote = %remote_addr,
            local_sid = format!("{:08x}", local_session_id),
            "starting session"
        );

        let io = io::spawn_session_task(
            transport,
            SessionState::new(local_session_id),
            config,
            event_tx.clone(),
        );

        Ok(Self {
            io,
            event_tx,
            local_addr,
            remote_addr,
            local_session_id,
        })
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Handle that can ask the session to disconnect from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.io.cmd_tx.clone())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Our session ID, chosen when the session started.
    pub fn local_session_id(&self) -> u32 {
        self.local_session_id
    }

    /// `true` while the session task is still running.
    pub fn is_running(&self) -> bool {
        !self.io.task.is_finished()
    }

    /// Disconnect gracefully and wait for the session task to finish.
    pub async fn disconnect(self) -> Result<()> {
        let result = self.shutdown_handle().disconnect().await;
        let _ = self.wait().await;
        result
    }

    /// Stop the session task without telling the device.
    pub fn abort(&self) {
        self.io.cancel.cancel();
    }

    /// Wait for the session to end.
    ///
    /// Returns `Ok(())` after a requested disconnect or abort, and the
    /// fatal error otherwise.
    pub async fn wait(self) -> Result<()> {
        match self.io.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Transport(format!("session task failed: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IcomLanBuilder;
    use riglib_test_harness::{MockRadio, frames};
    use std::time::Duration;
    use tokio::time::Instant;

    const RADIO_SID: u32 = 0xaabb_ccdd;
    const PC_SID: u32 = 0x6512_3456;
    const TOKEN: [u8; 6] = [0x5d, 0x37, 0x12, 0x82, 0x3b, 0xde];
    const WAIT: Duration = Duration::from_secs(2);

    fn builder(radio: &MockRadio) -> IcomLanBuilder {
        IcomLanBuilder::new()
            .host("127.0.0.1")
            .port(radio.port())
            .local_port(0)
            .local_session_id(PC_SID)
    }

    async fn recv_kind(radio: &MockRadio, kind: u16) -> Vec<u8> {
        radio
            .recv_matching(WAIT, |p| frames::kind(p) == kind && !frames::is_app(p))
            .await
            .unwrap_or_else(|| panic!("no packet of type {}", kind))
    }

    async fn recv_app(radio: &MockRadio, magic: u8) -> Vec<u8> {
        radio
            .recv_matching(WAIT, |p| frames::is_app(p) && frames::magic(p) == magic)
            .await
            .unwrap_or_else(|| panic!("no application packet with magic {}", magic))
    }

    /// Drive the device side through SID exchange and return the login.
    async fn handshake(radio: &MockRadio) -> Vec<u8> {
        let probe = recv_kind(radio, 0x03).await;
        assert_eq!(frames::src_sid(&probe), PC_SID);
        assert_eq!(frames::dst_sid(&probe), 0);
        radio
            .send(&frames::sid_reply(RADIO_SID, PC_SID))
            .await
            .unwrap();

        let confirm = recv_kind(radio, 0x06).await;
        assert_eq!(frames::seq(&confirm), 1);
        assert_eq!(frames::src_sid(&confirm), PC_SID);
        assert_eq!(frames::dst_sid(&confirm), RADIO_SID);
        radio
            .send(&frames::sid_confirm_reply(RADIO_SID, PC_SID))
            .await
            .unwrap();

        recv_app(radio, 0x00).await
    }

    /// Handshake plus accepted login.
    async fn authenticate(radio: &MockRadio) {
        handshake(radio).await;
        radio
            .send(&frames::login_reply(RADIO_SID, PC_SID, TOKEN, false))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn handshake_sends_login_with_auth_counters() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio).connect().await.unwrap();
        let mut events = session.subscribe();

        let login = handshake(&radio).await;
        assert_eq!(login.len(), 128);
        assert_eq!(frames::seq(&login), 1);
        assert_eq!(frames::inner_seq(&login), 0x50);
        assert_eq!(frames::dst_sid(&login), RADIO_SID);
        assert_eq!(&login[96..103], b"icom-pc");

        let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
        assert_eq!(
            event,
            SessionEvent::SessionIdAssigned {
                local: PC_SID,
                remote: RADIO_SID
            }
        );

        session.abort();
        session.wait().await.unwrap();
    }

    #[tokio::test]
    async fn login_success_sends_reauth_then_one_stream_request() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio).connect().await.unwrap();

        authenticate(&radio).await;
        let replied_at = Instant::now();

        let reauth = recv_app(&radio, 0x02).await;
        assert_eq!(reauth.len(), 64);
        assert_eq!(frames::inner_seq(&reauth), 0x51);
        assert_eq!(frames::token(&reauth), TOKEN);

        let stream = radio
            .recv_matching(Duration::from_secs(4), |p| {
                frames::is_app(p) && frames::magic(p) == 0x03
            })
            .await
            .expect("no stream request");
        let elapsed = replied_at.elapsed();
        assert_eq!(stream.len(), 144);
        assert_eq!(frames::inner_seq(&stream), 0x52);
        assert!(
            elapsed >= Duration::from_millis(2900) && elapsed <= Duration::from_millis(3100),
            "stream request after {:?}",
            elapsed
        );

        let again = radio
            .recv_matching(Duration::from_millis(500), |p| {
                frames::is_app(p) && frames::magic(p) == 0x03
            })
            .await;
        assert!(again.is_none(), "stream request sent twice");

        session.abort();
        session.wait().await.unwrap();
    }

    #[tokio::test]
    async fn login_rejected_ends_session_without_more_packets() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio).connect().await.unwrap();

        handshake(&radio).await;
        radio
            .send(&frames::login_reply(RADIO_SID, PC_SID, [0; 6], true))
            .await
            .unwrap();

        let result = tokio::time::timeout(WAIT, session.wait()).await.unwrap();
        assert!(matches!(result, Err(Error::AuthRejected)));
        assert!(radio.drain(Duration::from_millis(200)).await.is_empty());
    }

    #[tokio::test]
    async fn reauth_rejected_disconnects_then_fails() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio).connect().await.unwrap();

        authenticate(&radio).await;
        recv_app(&radio, 0x02).await;
        radio
            .send(&frames::reauth_failure(RADIO_SID, PC_SID))
            .await
            .unwrap();

        let disconnect = recv_app(&radio, 0x01).await;
        assert_eq!(frames::token(&disconnect), TOKEN);
        let teardown = recv_kind(&radio, 0x05).await;
        assert_eq!(frames::seq(&teardown), 0);

        let result = tokio::time::timeout(WAIT, session.wait()).await.unwrap();
        assert!(matches!(result, Err(Error::ReauthRejected)));
    }

    #[tokio::test]
    async fn keepalive_probes_follow_login() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio).connect().await.unwrap();

        authenticate(&radio).await;

        let probe = radio
            .recv_matching(WAIT, |p| frames::kind(p) == 0x07 && p[16] == 0)
            .await
            .expect("no echo probe");
        assert_eq!(frames::seq(&probe), 5);
        assert_eq!(probe[20], 0x03);

        let sid_probe = recv_kind(&radio, 0x03).await;
        assert_eq!(frames::seq(&sid_probe), 5);

        session.abort();
        session.wait().await.unwrap();
    }

    #[tokio::test]
    async fn peer_echo_is_mirrored_and_ping_reflected() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio).connect().await.unwrap();
        authenticate(&radio).await;

        let id = [0x57, 0x2b, 0x12, 0x00];
        radio
            .send(&frames::echo(0x0e1c, RADIO_SID, PC_SID, false, id))
            .await
            .unwrap();
        let mirrored = radio
            .recv_matching(WAIT, |p| frames::kind(p) == 0x07 && p[16] == 1)
            .await
            .expect("peer probe not mirrored");
        assert_eq!(frames::seq(&mirrored), 0x0e1c);
        assert_eq!(&mirrored[17..21], &id);
        assert_eq!(frames::src_sid(&mirrored), PC_SID);
        assert_eq!(frames::dst_sid(&mirrored), RADIO_SID);

        radio
            .send(&frames::ping(0x0013, RADIO_SID, PC_SID))
            .await
            .unwrap();
        let pong = radio
            .recv_matching(WAIT, |p| p.len() == 16 && frames::kind(p) == 0x00)
            .await
            .expect("ping not reflected");
        assert_eq!(frames::seq(&pong), 0x0013);

        session.abort();
        session.wait().await.unwrap();
    }

    #[tokio::test]
    async fn lost_probes_are_reported() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio)
            .keepalive_interval(Duration::from_secs(30))
            .connect()
            .await
            .unwrap();
        let mut events = session.subscribe();
        authenticate(&radio).await;

        // First tick fires immediately with seq 5.
        let probe = radio
            .recv_matching(WAIT, |p| frames::kind(p) == 0x07 && p[16] == 0)
            .await
            .expect("no echo probe");
        let expected = frames::seq(&probe);
        let id = [probe[17], probe[18], probe[19], probe[20]];
        radio
            .send(&frames::echo(expected + 3, RADIO_SID, PC_SID, true, id))
            .await
            .unwrap();

        let lost = tokio::time::timeout(WAIT, async {
            loop {
                if let Ok(SessionEvent::PacketsLost { count, .. }) = events.recv().await {
                    return count;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(lost, 3);

        session.abort();
        session.wait().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_sends_disconnect_and_teardown() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio).connect().await.unwrap();
        authenticate(&radio).await;
        recv_app(&radio, 0x02).await;

        let shutdown = session.shutdown_handle();
        let (result, disconnect) = tokio::join!(shutdown.disconnect(), recv_app(&radio, 0x01));
        result.unwrap();
        assert_eq!(disconnect.len(), 64);
        assert_eq!(frames::token(&disconnect), TOKEN);
        // login 1/0x50, reauth 2/0x51, disconnect next
        assert_eq!(frames::seq(&disconnect), 3);
        assert_eq!(frames::inner_seq(&disconnect), 0x52);
        assert_eq!(frames::seq(&recv_kind(&radio, 0x05).await), 0);

        tokio::time::timeout(WAIT, session.wait())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn reauth_replies_keep_session_running_silently() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio)
            .keepalive_interval(Duration::from_secs(30))
            .connect()
            .await
            .unwrap();
        authenticate(&radio).await;
        recv_app(&radio, 0x02).await;
        // Immediate first keepalive tick: echo probe then SID probe.
        recv_kind(&radio, 0x03).await;

        for _ in 0..2 {
            radio
                .send(&frames::reauth_reply(RADIO_SID, PC_SID, TOKEN))
                .await
                .unwrap();
        }

        let sent = radio.drain(Duration::from_millis(300)).await;
        assert!(sent.is_empty(), "unexpected packets: {:?}", sent);
        assert!(session.is_running());

        session.abort();
        session.wait().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_before_login_sends_teardown_only() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio).connect().await.unwrap();
        recv_kind(&radio, 0x03).await;

        session.disconnect().await.unwrap();

        let packets = radio.drain(Duration::from_millis(200)).await;
        assert!(packets.iter().any(|p| frames::kind(p) == 0x05));
        assert!(!packets.iter().any(|p| frames::is_app(p)));
    }

    #[tokio::test]
    async fn repeated_login_reply_keeps_first_token() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio)
            .reauth_interval(Duration::from_millis(300))
            .connect()
            .await
            .unwrap();
        authenticate(&radio).await;
        recv_app(&radio, 0x02).await;

        radio
            .send(&frames::login_reply(
                RADIO_SID,
                PC_SID,
                [9, 9, 9, 9, 9, 9],
                false,
            ))
            .await
            .unwrap();

        let reauth = recv_app(&radio, 0x05).await;
        assert_eq!(frames::token(&reauth), TOKEN);

        session.abort();
        session.wait().await.unwrap();
    }

    #[tokio::test]
    async fn silence_after_login_is_fatal() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio)
            .read_timeout(Duration::from_millis(50))
            .connect()
            .await
            .unwrap();
        authenticate(&radio).await;

        let result = tokio::time::timeout(Duration::from_secs(3), session.wait())
            .await
            .unwrap();
        assert!(matches!(result, Err(Error::TooManyReadErrors(5))));
    }

    #[tokio::test]
    async fn silent_device_hits_handshake_timeout() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio)
            .read_timeout(Duration::from_millis(50))
            .handshake_timeout(Duration::from_millis(300))
            .connect()
            .await
            .unwrap();

        let result = tokio::time::timeout(WAIT, session.wait()).await.unwrap();
        assert!(matches!(result, Err(Error::HandshakeTimeout)));
        assert!(!radio.drain(Duration::from_millis(50)).await.is_empty());
    }

    #[tokio::test]
    async fn dropped_handle_disconnects() {
        let radio = MockRadio::bind().await.unwrap();
        let session = builder(&radio).connect().await.unwrap();
        recv_kind(&radio, 0x03).await;

        drop(session);
        recv_kind(&radio, 0x05).await;
    }
}
