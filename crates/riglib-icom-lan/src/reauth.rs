//! Periodic re-authentication.
//!
//! The device drops a session whose token has not been refreshed for a
//! while. The first refresh goes out right after login succeeds and uses
//! the "first" magic; every later one uses the "subsequent" magic and is
//! sent from the keepalive tick once the reauth interval has elapsed.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error};

use riglib_core::error::{Error, Result};
use riglib_core::events::SessionEvent;

use crate::io::Engine;
use crate::packet;

/// `true` when a reauth sent at `last` is older than `interval`.
///
/// With no previous reauth nothing is due: the first one is sent
/// explicitly when login succeeds.
pub fn reauth_due(last: Option<Instant>, now: Instant, interval: Duration) -> bool {
    match last {
        Some(last) => now.saturating_duration_since(last) >= interval,
        None => false,
    }
}

impl Engine {
    /// Send a reauth request with the session token.
    pub(crate) async fn send_reauth(&mut self, now: Instant) -> Result<()> {
        let Some(token) = self.state.token() else {
            return Ok(());
        };

        let first = self.state.next_reauth_is_first();
        let pkt = packet::reauth_packet(self.state.auth_seqs(), self.state.ids(), token, first);
        self.send_app(&pkt).await?;
        self.state.mark_reauth_sent(now);

        debug!(first, "reauth sent");
        self.emit(SessionEvent::ReauthSent { first });
        Ok(())
    }

    pub(crate) async fn reauth_if_due(&mut self, now: Instant) -> Result<()> {
        if reauth_due(self.state.last_reauth_at(), now, self.config.reauth_interval) {
            self.send_reauth(now).await?;
        }
        Ok(())
    }

    pub(crate) fn on_reauth_reply(&mut self) {
        if self.state.mark_reauth_reply() {
            debug!("first reauth reply received");
        }
    }

    /// The device refused the token. Leave cleanly and end the session.
    pub(crate) async fn on_reauth_rejected(&mut self) -> Result<()> {
        error!("reauth failed");
        if let Err(e) = self.send_disconnect_sequence().await {
            debug!(error = %e, "disconnect after failed reauth incomplete");
        }
        Err(Error::ReauthRejected)
    }
}
