//! Graceful disconnect.
//!
//! Leaving a session tells the device twice: an application-level
//! disconnect carrying the token (only once authenticated), then an outer
//! teardown packet. Both are attempted even if one fails.

use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use riglib_core::error::{Error, Result};
use riglib_core::events::SessionEvent;

use crate::io::{Engine, Request};
use crate::packet;

/// Cloneable handle that asks a running session to disconnect.
///
/// Obtained from [`IcomLanSession::shutdown_handle`](crate::IcomLanSession::shutdown_handle)
/// so a signal handler can end the session while another task waits on it.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    cmd_tx: mpsc::Sender<Request>,
}

impl ShutdownHandle {
    pub(crate) fn new(cmd_tx: mpsc::Sender<Request>) -> Self {
        Self { cmd_tx }
    }

    /// Send the disconnect sequence and stop the session.
    ///
    /// Resolves once the packets have been sent. Returns
    /// [`Error::NotConnected`] if the session has already ended.
    pub async fn disconnect(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Request::Disconnect { reply: reply_tx })
            .await
            .map_err(|_| Error::NotConnected)?;
        reply_rx.await.map_err(|_| Error::ConnectionLost)?
    }
}

impl Engine {
    /// Send the application disconnect (if authenticated) and the teardown.
    pub(crate) async fn send_disconnect_sequence(&mut self) -> Result<()> {
        let mut result = Ok(());

        if let Some(token) = self.state.token() {
            let pkt = packet::disconnect_packet(self.state.auth_seqs(), self.state.ids(), token);
            if let Err(e) = self.send_app(&pkt).await {
                result = Err(e);
            }
        }

        if let Err(e) = self.send(&packet::teardown(self.state.ids())).await {
            if result.is_ok() {
                result = Err(e);
            }
        }

        self.emit(SessionEvent::Disconnected);
        result
    }

    /// Handle a disconnect request, replying to the requester if any.
    pub(crate) async fn shutdown(&mut self, reply: Option<oneshot::Sender<Result<()>>>) {
        info!("disconnecting");
        let result = self.send_disconnect_sequence().await;
        if let Err(e) = &result {
            warn!(error = %e, "disconnect sequence incomplete");
        }
        if let Some(reply) = reply {
            let _ = reply.send(result);
        }
    }
}
