//! Session management

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::RwLock;
use uuid::Uuid;

use supla_core::{Frame, Message, ACTIVITY_TIMEOUT_MAX, ACTIVITY_TIMEOUT_MIN};
use supla_transport::TransportSender;

use crate::error::Result;

/// Session identifier
pub type SessionId = String;

/// A connected peer (device or client), before and after registration.
pub struct Session {
    /// Unique session ID
    pub id: SessionId,
    /// Peer address, for logging
    pub peer: SocketAddr,
    /// Transport sender for this session
    sender: Arc<dyn TransportSender>,
    /// Frame sequence counter
    rr_id: AtomicU32,
    /// Session creation time
    pub created_at: Instant,
    /// Last inbound activity
    last_activity: RwLock<Instant>,
    /// Negotiated activity timeout
    activity_timeout: RwLock<Duration>,
}

impl Session {
    pub fn new(
        sender: Arc<dyn TransportSender>,
        peer: SocketAddr,
        activity_timeout_secs: u8,
    ) -> Self {
        let now = Instant::now();
        Self {
            id: Uuid::new_v4().to_string(),
            peer,
            sender,
            rr_id: AtomicU32::new(1),
            created_at: now,
            last_activity: RwLock::new(now),
            activity_timeout: RwLock::new(Duration::from_secs(activity_timeout_secs as u64)),
        }
    }

    fn next_frame(&self, message: &Message) -> Result<Bytes> {
        let rr_id = self.rr_id.fetch_add(1, Ordering::Relaxed);
        let payload = message.encode()?;
        Ok(Frame::new(rr_id, message.call(), payload).encode()?)
    }

    /// Send a message, waiting for queue space.
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        let frame = self.next_frame(message)?;
        self.sender.send(frame).await?;
        Ok(())
    }

    /// Queue a message without waiting. Propagates
    /// [`supla_transport::TransportError::BufferFull`] so the caller
    /// can disconnect a peer that is not draining.
    pub fn try_send_message(&self, message: &Message) -> Result<()> {
        let frame = self.next_frame(message)?;
        self.sender.try_send(frame)?;
        Ok(())
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected()
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    pub fn idle(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    /// Negotiate a new activity timeout; out-of-range requests clamp.
    pub fn set_activity_timeout(&self, seconds: u8) -> u8 {
        let clamped = seconds.clamp(ACTIVITY_TIMEOUT_MIN, ACTIVITY_TIMEOUT_MAX);
        *self.activity_timeout.write() = Duration::from_secs(clamped as u64);
        clamped
    }

    pub fn activity_timeout(&self) -> Duration {
        *self.activity_timeout.read()
    }

    /// Time budget for the next read before the heartbeat check fires.
    pub fn read_deadline(&self) -> Duration {
        let timeout = self.activity_timeout();
        timeout.saturating_sub(self.idle()).max(Duration::from_millis(10))
    }

    pub fn timed_out(&self) -> bool {
        self.idle() >= self.activity_timeout()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}
