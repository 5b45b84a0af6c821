//! Shared connection IO loop.
//!
//! TCP and TLS connections differ only in the stream type; both feed
//! the same reader/writer task. Message boundaries come from the
//! protocol's own framing (`SUPLA` tags plus a declared payload size),
//! so the loop scans the read buffer with [`Frame::check`] and emits
//! one [`TransportEvent::Frame`] per complete frame. A malformed
//! prefix tears the connection down; there is no way to resynchronize
//! mid-stream.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error};

use async_trait::async_trait;
use supla_core::Frame;

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender};

/// Outbound queue depth per connection. A peer that stops draining
/// hits this limit and gets disconnected by the session layer.
pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 256;

const READ_BUFFER_SIZE: usize = 8192;

/// Sender half of an accepted or dialed connection.
pub struct FrameSender {
    tx: mpsc::Sender<Bytes>,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
}

#[async_trait]
impl TransportSender for FrameSender {
    async fn send(&self, frame: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(frame)
            .await
            .map_err(|_| TransportError::SendFailed("channel closed".into()))
    }

    fn try_send(&self, frame: Bytes) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }

        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        *self.connected.lock() = false;
        // Stored permit, so the IO task wakes even if it has not
        // reached its select yet.
        self.shutdown.notify_one();
        Ok(())
    }
}

/// Receiver half of an accepted or dialed connection.
pub struct FrameReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for FrameReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Wrap a connected stream in channel-backed halves and spawn its IO task.
pub(crate) fn spawn_io<S>(stream: S) -> (FrameSender, FrameReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let connected = Arc::new(Mutex::new(true));
    let shutdown = Arc::new(Notify::new());
    let (outgoing_tx, outgoing_rx) = mpsc::channel::<Bytes>(DEFAULT_CHANNEL_BUFFER_SIZE);
    let (incoming_tx, incoming_rx) = mpsc::channel::<TransportEvent>(DEFAULT_CHANNEL_BUFFER_SIZE);

    let sender = FrameSender {
        tx: outgoing_tx,
        connected: connected.clone(),
        shutdown: shutdown.clone(),
    };
    let receiver = FrameReceiver { rx: incoming_rx };

    tokio::spawn(async move {
        run_io_loop(stream, outgoing_rx, incoming_tx, connected, shutdown).await;
    });

    (sender, receiver)
}

async fn run_io_loop<S>(
    stream: S,
    mut outgoing_rx: mpsc::Receiver<Bytes>,
    incoming_tx: mpsc::Sender<TransportEvent>,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut read_buf = BytesMut::with_capacity(READ_BUFFER_SIZE);

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                // Flush anything queued before the close was requested.
                while let Ok(frame) = outgoing_rx.try_recv() {
                    if writer.write_all(&frame).await.is_err() {
                        break;
                    }
                }
                debug!("connection closed locally");
                break;
            }

            outgoing = outgoing_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if let Err(e) = writer.write_all(&frame).await {
                            error!("write error: {}", e);
                            let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    // All senders dropped: the session is done with us.
                    None => break,
                }
            }

            result = reader.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        debug!("connection closed by peer");
                        let _ = incoming_tx.send(TransportEvent::Disconnected { reason: None }).await;
                        break;
                    }
                    Ok(_) => {
                        if !drain_frames(&mut read_buf, &incoming_tx).await {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("read error: {}", e);
                        let _ = incoming_tx.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
        }
    }

    *connected.lock() = false;
}

/// Emit every complete frame buffered so far. Returns false when the
/// stream is corrupt or the receiver is gone.
async fn drain_frames(read_buf: &mut BytesMut, incoming_tx: &mpsc::Sender<TransportEvent>) -> bool {
    loop {
        match Frame::check(read_buf) {
            Ok(Some(size)) => {
                let frame = read_buf.split_to(size).freeze();
                if incoming_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                    return false;
                }
            }
            Ok(None) => return true,
            Err(e) => {
                error!("malformed stream: {}", e);
                let _ = incoming_tx
                    .send(TransportEvent::Disconnected {
                        reason: Some(e.to_string()),
                    })
                    .await;
                return false;
            }
        }
    }
}
