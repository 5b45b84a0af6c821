//! Server core: acceptor, connection classification and routing.
//!
//! The server is transport-agnostic; it accepts connections from any
//! [`TransportServer`] (plain TCP on 2015, TLS on 2016) and both
//! listeners share one registry and session table, so a device on TLS
//! serves clients on plain TCP.
//!
//! A connection's first frame decides its role: `DsRegisterDevice`
//! makes it a device session, `CsRegisterClient` a client session,
//! anything else gets the connection dropped. After that every frame
//! steps the role's state machine and the returned effects are
//! executed here: replies, registry fan-out, and command routing
//! between sessions.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use supla_core::proto::SetChannelResult;
use supla_core::{Frame, Guid, Message, ResultCode};
use supla_transport::{
    TransportEvent, TransportReceiver, TransportSender, TransportServer, TransportError,
};

use crate::client::{ClientEffect, ClientMachine, ClientState};
use crate::config::ServerConfig;
use crate::device::{DeviceEffect, DeviceMachine};
use crate::error::Result;
use crate::registry::ChannelRegistry;
use crate::session::{Session, SessionId};

/// SUPLA server
pub struct Server {
    config: ServerConfig,
    registry: Arc<ChannelRegistry>,
    /// Every live session, device or client, keyed by session id
    sessions: Arc<DashMap<SessionId, Arc<Session>>>,
    /// Registered clients, for value fan-out
    clients: Arc<DashMap<SessionId, Arc<Session>>>,
    /// client_id -> session id, for routing device acks
    client_ids: Arc<DashMap<i32, SessionId>>,
    next_client_id: Arc<AtomicI32>,
    running: Arc<RwLock<bool>>,
    /// Wakes every parked accept loop when `stop` is called
    shutdown: Arc<Notify>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(ChannelRegistry::from_config(&config)?);
        Ok(Self {
            config,
            registry,
            sessions: Arc::new(DashMap::new()),
            clients: Arc::new(DashMap::new()),
            client_ids: Arc::new(DashMap::new()),
            next_client_id: Arc::new(AtomicI32::new(1)),
            running: Arc::new(RwLock::new(false)),
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Stop accepting and close every live session. Each connection's
    /// queued writes drain before its socket goes down.
    pub async fn stop(&self) {
        *self.running.write() = false;
        self.shutdown.notify_waiters();

        let sessions: Vec<_> = self.sessions.iter().map(|e| e.value().clone()).collect();
        for session in sessions {
            session.close().await;
        }
    }

    /// Shared-state clone for running several listeners at once.
    pub fn handle(&self) -> Self {
        Self {
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
            sessions: Arc::clone(&self.sessions),
            clients: Arc::clone(&self.clients),
            client_ids: Arc::clone(&self.client_ids),
            next_client_id: Arc::clone(&self.next_client_id),
            running: Arc::clone(&self.running),
            shutdown: Arc::clone(&self.shutdown),
        }
    }

    /// Serve using any TransportServer implementation.
    pub async fn serve_on<S>(&self, mut server: S) -> Result<()>
    where
        S: TransportServer + 'static,
    {
        info!("accepting connections");
        *self.running.write() = true;

        while *self.running.read() {
            tokio::select! {
                accepted = server.accept() => match accepted {
                    Ok((sender, receiver, addr)) => {
                        debug!("new connection from {}", addr);
                        self.handle_connection(Arc::new(sender), receiver, addr);
                    }
                    Err(e) => {
                        error!("accept error: {}", e);
                    }
                },
                _ = self.shutdown.notified() => break,
            }
        }

        Ok(())
    }

    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        mut receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
    ) {
        let server = self.handle();

        tokio::spawn(async move {
            let session = Arc::new(Session::new(sender, addr, server.config.activity_timeout));
            server.sessions.insert(session.id.clone(), session.clone());

            let mut role: Option<Role> = None;

            loop {
                let event = match timeout(session.read_deadline(), receiver.recv()).await {
                    Ok(event) => event,
                    Err(_) => {
                        if session.timed_out() {
                            info!("session {} timed out ({:?} idle)", session.id, session.idle());
                            break;
                        }
                        continue;
                    }
                };

                match event {
                    Some(TransportEvent::Frame(data)) => {
                        session.touch();
                        let mut buf = BytesMut::from(data.as_ref());
                        let message = match Frame::decode(&mut buf)
                            .and_then(|frame| Message::decode(frame.call()?, frame.data))
                        {
                            Ok(message) => message,
                            Err(e) => {
                                warn!("bad frame from {}: {}", addr, e);
                                break;
                            }
                        };

                        if role.is_none() {
                            role = server.classify(&session, &message);
                            if role.is_none() {
                                warn!("unclassifiable first frame from {}", addr);
                                break;
                            }
                        }

                        let keep_going = match role.as_mut() {
                            Some(Role::Device(machine)) => {
                                let effects = machine.handle(message);
                                server.run_device_effects(&session, effects).await
                            }
                            Some(Role::Client(machine)) => {
                                let was_online = machine.state() == ClientState::Online;
                                let mut effects = machine.handle(message);
                                if !was_online && machine.state() == ClientState::Online {
                                    // Join the fan-out map before the
                                    // snapshot is taken; an update landing
                                    // mid-registration then arrives as a
                                    // push instead of vanishing. A
                                    // duplicate push is harmless.
                                    server.add_client(machine.client_id(), &session);
                                    effects.extend(machine.snapshot_effects());
                                }
                                server.run_client_effects(&session, effects).await
                            }
                            None => false,
                        };
                        if !keep_going {
                            break;
                        }
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        debug!("{} disconnected: {:?}", addr, reason);
                        break;
                    }
                    Some(TransportEvent::Error(e)) => {
                        warn!("transport error from {}: {}", addr, e);
                        break;
                    }
                    Some(TransportEvent::Connected) => {}
                    None => break,
                }
            }

            server.cleanup(&session, role.as_ref()).await;
        });
    }

    /// First-frame classification.
    fn classify(&self, session: &Arc<Session>, message: &Message) -> Option<Role> {
        match message {
            Message::RegisterDevice(_) => Some(Role::Device(DeviceMachine::new(
                session.id.clone(),
                Arc::clone(&self.registry),
                self.config.email.clone(),
                self.config.activity_timeout,
            ))),
            Message::RegisterClient(_) => Some(Role::Client(ClientMachine::new(
                Arc::clone(&self.registry),
                self.config.email.clone(),
                self.config.password.clone(),
                self.next_client_id.fetch_add(1, Ordering::Relaxed),
                self.config.activity_timeout,
            ))),
            _ => None,
        }
    }

    fn add_client(&self, client_id: i32, session: &Arc<Session>) {
        self.clients.insert(session.id.clone(), session.clone());
        self.client_ids.insert(client_id, session.id.clone());
    }

    /// Returns false when the session must close.
    async fn run_device_effects(
        &self,
        session: &Arc<Session>,
        effects: Vec<DeviceEffect>,
    ) -> bool {
        for effect in effects {
            match effect {
                DeviceEffect::Reply(message) => {
                    if let Err(e) = session.send_message(&message).await {
                        warn!("reply to {} failed: {}", session.id, e);
                        return false;
                    }
                }
                DeviceEffect::Broadcast(item) => {
                    self.broadcast_update(item);
                }
                DeviceEffect::AckClient {
                    client_id,
                    guid,
                    channel_number,
                    success,
                } => {
                    self.ack_client(client_id, guid, channel_number, success);
                }
                DeviceEffect::SetActivityTimeout(seconds) => {
                    session.set_activity_timeout(seconds);
                }
                DeviceEffect::Close => return false,
            }
        }
        true
    }

    async fn run_client_effects(
        &self,
        session: &Arc<Session>,
        effects: Vec<ClientEffect>,
    ) -> bool {
        for effect in effects {
            match effect {
                ClientEffect::Reply(message) => {
                    if let Err(e) = session.send_message(&message).await {
                        warn!("reply to {} failed: {}", session.id, e);
                        return false;
                    }
                }
                ClientEffect::ForwardToDevice {
                    device_session,
                    guid,
                    command,
                } => {
                    let channel_number = command.channel_number;
                    let forwarded = self
                        .sessions
                        .get(&device_session)
                        .map(|target| {
                            target
                                .try_send_message(&Message::ChannelSetValue(command))
                                .is_ok()
                        })
                        .unwrap_or(false);

                    // Device vanished between lookup and send; ack the
                    // client as unavailable instead of going silent.
                    if !forwarded {
                        let ack = Message::SetChannelResult(SetChannelResult {
                            guid,
                            channel_number,
                            result_code: ResultCode::DeviceUnavailable as i32,
                        });
                        if session.send_message(&ack).await.is_err() {
                            return false;
                        }
                    }
                }
                ClientEffect::SetActivityTimeout(seconds) => {
                    session.set_activity_timeout(seconds);
                }
                ClientEffect::Close => return false,
            }
        }
        true
    }

    /// Push one state item to every registered client. A client whose
    /// queue is full is disconnected rather than allowed to stall the
    /// fan-out.
    fn broadcast_update(&self, item: supla_core::proto::ChannelStateItem) {
        let message = Message::ChannelValueUpdate(item);
        let mut stalled = Vec::new();
        for entry in self.clients.iter() {
            match entry.value().try_send_message(&message) {
                Ok(()) => {}
                Err(crate::error::ServerError::Transport(TransportError::BufferFull)) => {
                    warn!("client {} not draining, disconnecting", entry.key());
                    stalled.push(entry.key().clone());
                }
                Err(e) => {
                    debug!("update to {} failed: {}", entry.key(), e);
                    stalled.push(entry.key().clone());
                }
            }
        }
        for id in stalled {
            if let Some((_, client)) = self.clients.remove(&id) {
                tokio::spawn(async move { client.close().await });
            }
        }
    }

    fn ack_client(&self, client_id: i32, guid: Guid, channel_number: u8, success: bool) {
        let Some(session_id) = self.client_ids.get(&client_id).map(|e| e.value().clone()) else {
            debug!("ack for departed client {}", client_id);
            return;
        };
        if let Some(client) = self.clients.get(&session_id) {
            let ack = Message::SetChannelResult(SetChannelResult {
                guid,
                channel_number,
                result_code: if success {
                    ResultCode::True as i32
                } else {
                    ResultCode::False as i32
                },
            });
            if let Err(e) = client.value().try_send_message(&ack) {
                debug!("ack to client {} failed: {}", client_id, e);
            }
        }
    }

    async fn cleanup(&self, session: &Arc<Session>, role: Option<&Role>) {
        self.sessions.remove(&session.id);
        self.clients.remove(&session.id);
        session.close().await;

        match role {
            Some(Role::Device(machine)) => {
                if let Some(guid) = machine.guid() {
                    if let Some(items) = self.registry.mark_offline(guid, &session.id) {
                        for item in items {
                            self.broadcast_update(item);
                        }
                    }
                }
            }
            Some(Role::Client(machine)) => {
                self.client_ids.remove(&machine.client_id());
            }
            None => {}
        }
        debug!("session {} removed", session.id);
    }
}

enum Role {
    Device(DeviceMachine),
    Client(ClientMachine),
}
