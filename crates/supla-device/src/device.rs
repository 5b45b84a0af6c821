//! Device connection and background tasks.
//!
//! [`Device::connect_with`] dials the server, performs the
//! registration handshake and negotiates the activity timeout, then
//! spawns two tasks: a reader that executes incoming channel commands
//! and a heartbeat that pings at half the negotiated timeout. After
//! that the handle is cheap to clone and the device reports values
//! with [`Device::report`].

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use supla_core::proto::{
    ChannelNewValueResult, DeviceChannelValue, RegisterDevice, SetActivityTimeout, TimeVal,
};
use supla_core::{
    ChannelType, ChannelValue, Frame, Guid, Message, ResultCode, ACTIVITY_TIMEOUT_MAX,
    ACTIVITY_TIMEOUT_MIN,
};
use supla_transport::{
    FrameReceiver, FrameSender, TcpTransport, TransportEvent, TransportReceiver, TransportSender,
};

#[cfg(feature = "tls")]
use supla_transport::TlsTransport;

use crate::builder::DeviceBuilder;
use crate::error::{DeviceError, Result};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Command handler: channel number and requested value in, success out.
pub type CommandCallback = Box<dyn Fn(u8, ChannelValue) -> bool + Send + Sync>;

struct ChannelSlot {
    channel_type: ChannelType,
    value: RwLock<[u8; 8]>,
}

struct Inner {
    sender: FrameSender,
    rr_id: AtomicU32,
    connected: RwLock<bool>,
    channels: Vec<ChannelSlot>,
    callback: RwLock<Option<CommandCallback>>,
}

impl Inner {
    fn frame(&self, message: &Message) -> Result<Bytes> {
        let rr_id = self.rr_id.fetch_add(1, Ordering::Relaxed);
        let payload = message.encode()?;
        Ok(Frame::new(rr_id, message.call(), payload).encode()?)
    }

    async fn send_message(&self, message: &Message) -> Result<()> {
        if !*self.connected.read() {
            return Err(DeviceError::NotConnected);
        }
        let frame = self.frame(message)?;
        self.sender.send(frame).await?;
        Ok(())
    }
}

/// A registered SUPLA device
pub struct Device {
    inner: Arc<Inner>,
    guid: Guid,
    /// Timeout granted by the server
    activity_timeout: u8,
}

impl Device {
    /// Create a builder
    pub fn builder(addr: &str, email: &str, guid: Guid) -> DeviceBuilder {
        DeviceBuilder::new(addr, email, guid)
    }

    pub(crate) async fn connect_with(builder: DeviceBuilder) -> Result<Device> {
        info!("connecting to {}", builder.addr);

        let (sender, mut receiver) = if builder.tls {
            #[cfg(feature = "tls")]
            {
                TlsTransport::new_insecure().connect(&builder.addr).await?
            }
            #[cfg(not(feature = "tls"))]
            {
                return Err(DeviceError::Other("tls support not compiled in".into()))
            }
        } else {
            TcpTransport::new().connect(&builder.addr).await?
        };

        let inner = Arc::new(Inner {
            sender,
            rr_id: AtomicU32::new(1),
            connected: RwLock::new(true),
            channels: builder
                .channels
                .iter()
                .map(|c| ChannelSlot {
                    channel_type: c.channel_type,
                    value: RwLock::new(c.initial.encode()),
                })
                .collect(),
            callback: RwLock::new(None),
        });

        // Register
        let register = Message::RegisterDevice(RegisterDevice {
            email: builder.email.clone(),
            guid: builder.guid,
            name: builder.name.clone(),
            soft_ver: builder.soft_ver.clone(),
            manufacturer_id: builder.manufacturer_id,
            product_id: builder.product_id,
            channels: builder
                .channels
                .iter()
                .enumerate()
                .map(|(n, c)| c.to_def(n as u8))
                .collect(),
        });
        inner.send_message(&register).await?;

        let result = match expect_message(&mut receiver, HANDSHAKE_TIMEOUT, |m| match m {
            Message::RegisterDeviceResult(r) => Some(r),
            _ => None,
        })
        .await?
        {
            r if r.result_code == ResultCode::True as i32 => r,
            r => return Err(DeviceError::RegistrationRejected(r.result_code)),
        };
        info!("registered, server timeout {}s", result.activity_timeout);

        // Negotiate our preferred activity timeout
        let wanted = builder
            .activity_timeout
            .clamp(ACTIVITY_TIMEOUT_MIN, ACTIVITY_TIMEOUT_MAX);
        inner
            .send_message(&Message::SetActivityTimeout(SetActivityTimeout {
                activity_timeout: wanted,
            }))
            .await?;
        let granted = expect_message(&mut receiver, HANDSHAKE_TIMEOUT, |m| match m {
            Message::SetActivityTimeoutResult(r) => Some(r.activity_timeout),
            _ => None,
        })
        .await?;
        debug!("activity timeout granted: {}s", granted);

        let device = Device {
            inner: inner.clone(),
            guid: builder.guid,
            activity_timeout: granted,
        };

        // Reader task
        let reader_inner = inner.clone();
        tokio::spawn(async move {
            run_reader(reader_inner, receiver).await;
        });

        // Heartbeat task
        let ping_inner = inner.clone();
        let interval = Duration::from_secs((granted as u64 / 2).max(5));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if !*ping_inner.connected.read() {
                    break;
                }
                if ping_inner
                    .send_message(&Message::PingServer(TimeVal::now()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(device)
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// Timeout the server granted, in seconds.
    pub fn activity_timeout(&self) -> u8 {
        self.activity_timeout
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.connected.read()
    }

    /// Install the handler for server-issued channel commands.
    ///
    /// The handler returns whether the command was applied; on success
    /// the library acks it and reports the new value automatically.
    /// Without a handler every command is acked as failed.
    pub fn on_command<F>(&self, callback: F)
    where
        F: Fn(u8, ChannelValue) -> bool + Send + Sync + 'static,
    {
        *self.inner.callback.write() = Some(Box::new(callback));
    }

    /// Report a channel value change to the server.
    pub async fn report(&self, channel_number: u8, value: ChannelValue) -> Result<()> {
        let slot = self
            .inner
            .channels
            .get(channel_number as usize)
            .ok_or(DeviceError::UnknownChannel(channel_number))?;
        let encoded = value.encode();
        *slot.value.write() = encoded;
        self.inner
            .send_message(&Message::ChannelValueChanged(DeviceChannelValue {
                channel_number,
                value: encoded,
            }))
            .await
    }

    /// Current local value of a channel.
    pub fn value(&self, channel_number: u8) -> Option<ChannelValue> {
        let slot = self.inner.channels.get(channel_number as usize)?;
        Some(ChannelValue::decode(slot.channel_type, *slot.value.read()))
    }

    pub async fn disconnect(&self) {
        *self.inner.connected.write() = false;
        let _ = self.inner.sender.close().await;
    }
}

/// Wait for the next frame the predicate accepts, skipping heartbeat
/// traffic, within `deadline`.
async fn expect_message<T>(
    receiver: &mut FrameReceiver,
    deadline: Duration,
    mut pick: impl FnMut(Message) -> Option<T>,
) -> Result<T> {
    let wait = tokio::time::sleep(deadline);
    tokio::pin!(wait);

    loop {
        tokio::select! {
            _ = &mut wait => return Err(DeviceError::Timeout),
            event = receiver.recv() => match event {
                Some(TransportEvent::Frame(data)) => {
                    let message = decode_frame(&data)?;
                    if let Some(value) = pick(message) {
                        return Ok(value);
                    }
                }
                Some(TransportEvent::Disconnected { reason }) => {
                    return Err(DeviceError::ConnectionFailed(
                        reason.unwrap_or_else(|| "disconnected".to_string()),
                    ));
                }
                Some(TransportEvent::Error(e)) => {
                    return Err(DeviceError::ConnectionFailed(e));
                }
                Some(TransportEvent::Connected) => {}
                None => {
                    return Err(DeviceError::ConnectionFailed("connection closed".to_string()));
                }
            },
        }
    }
}

fn decode_frame(data: &Bytes) -> Result<Message> {
    let mut buf = BytesMut::from(data.as_ref());
    let frame = Frame::decode(&mut buf)?;
    Ok(Message::decode(frame.call()?, frame.data)?)
}

async fn run_reader(inner: Arc<Inner>, mut receiver: FrameReceiver) {
    while let Some(event) = receiver.recv().await {
        match event {
            TransportEvent::Frame(data) => {
                let message = match decode_frame(&data) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!("bad frame from server: {}", e);
                        break;
                    }
                };
                if !handle_server_message(&inner, message).await {
                    break;
                }
            }
            TransportEvent::Disconnected { reason } => {
                info!("disconnected: {:?}", reason);
                break;
            }
            TransportEvent::Error(e) => {
                warn!("transport error: {}", e);
                break;
            }
            TransportEvent::Connected => {}
        }
    }
    *inner.connected.write() = false;
}

async fn handle_server_message(inner: &Arc<Inner>, message: Message) -> bool {
    match message {
        Message::ChannelSetValue(cmd) => {
            let success = match inner.channels.get(cmd.channel_number as usize) {
                Some(slot) => {
                    let value = ChannelValue::decode(slot.channel_type, cmd.value);
                    let applied = inner
                        .callback
                        .read()
                        .as_ref()
                        .map(|cb| cb(cmd.channel_number, value))
                        .unwrap_or(false);
                    if applied {
                        *slot.value.write() = cmd.value;
                    }
                    applied
                }
                None => {
                    warn!("command for unknown channel {}", cmd.channel_number);
                    false
                }
            };

            let ack = Message::ChannelSetValueResult(ChannelNewValueResult {
                channel_number: cmd.channel_number,
                sender_id: cmd.sender_id,
                success,
            });
            if inner.send_message(&ack).await.is_err() {
                return false;
            }

            // Applied commands surface as a value change, the same
            // path a local toggle would take.
            if success {
                let report = Message::ChannelValueChanged(DeviceChannelValue {
                    channel_number: cmd.channel_number,
                    value: cmd.value,
                });
                if inner.send_message(&report).await.is_err() {
                    return false;
                }
            }
            true
        }

        Message::PingServerResult(_) => true,
        Message::SetActivityTimeoutResult(r) => {
            debug!("activity timeout now {}s", r.activity_timeout);
            true
        }

        other => {
            debug!("ignoring server message: {:?}", other.call());
            true
        }
    }
}
