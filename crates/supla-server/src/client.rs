//! Client session state machine.
//!
//! Mirrors the device machine: decoded messages in, effects out.
//! Clients authenticate with email and password, receive the full
//! channel snapshot, then watch value updates and issue channel
//! commands that get routed to the owning device session.

use std::sync::Arc;

use tracing::{debug, warn};

use supla_core::proto::{
    ChannelNewValue, ChannelSnapshot, RegisterClientResult, SetActivityTimeoutResult,
    SetChannelResult, TimeVal, SNAPSHOT_PACK_MAXCOUNT,
};
use supla_core::{
    Guid, Message, ResultCode, ACTIVITY_TIMEOUT_MAX, ACTIVITY_TIMEOUT_MIN, PROTO_VERSION,
    PROTO_VERSION_MIN,
};

use crate::registry::ChannelRegistry;
use crate::session::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    AwaitingRegister,
    Online,
}

#[derive(Debug)]
pub enum ClientEffect {
    /// Send to this client
    Reply(Message),
    /// Route a command to the device session owning the channel
    ForwardToDevice {
        device_session: SessionId,
        guid: Guid,
        command: ChannelNewValue,
    },
    /// Apply a negotiated activity timeout to the session
    SetActivityTimeout(u8),
    /// Tear the connection down after flushing queued replies
    Close,
}

pub struct ClientMachine {
    state: ClientState,
    registry: Arc<ChannelRegistry>,
    email: String,
    password: String,
    /// Server-assigned id, echoed as `sender_id` in forwarded commands
    client_id: i32,
    activity_timeout: u8,
}

impl ClientMachine {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        email: String,
        password: String,
        client_id: i32,
        activity_timeout: u8,
    ) -> Self {
        Self {
            state: ClientState::AwaitingRegister,
            registry,
            email,
            password,
            client_id,
            activity_timeout,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    pub fn handle(&mut self, message: Message) -> Vec<ClientEffect> {
        match self.state {
            ClientState::AwaitingRegister => self.handle_awaiting(message),
            ClientState::Online => self.handle_online(message),
        }
    }

    fn handle_awaiting(&mut self, message: Message) -> Vec<ClientEffect> {
        match message {
            Message::RegisterClient(reg) => {
                if reg.email != self.email || reg.password != self.password {
                    warn!("client auth failed for '{}'", reg.name);
                    return vec![
                        ClientEffect::Reply(self.register_result(ResultCode::AuthFailed, 0)),
                        ClientEffect::Close,
                    ];
                }

                self.state = ClientState::Online;
                debug!("client '{}' registered as {}", reg.name, self.client_id);

                let channel_count = self.registry.channel_count();
                vec![ClientEffect::Reply(
                    self.register_result(ResultCode::True, channel_count as i32),
                )]
            }
            other => {
                warn!("client message before registration: {:?}", other.call());
                vec![ClientEffect::Close]
            }
        }
    }

    fn handle_online(&mut self, message: Message) -> Vec<ClientEffect> {
        match message {
            Message::PingServer(_) => {
                vec![ClientEffect::Reply(Message::PingServerResult(TimeVal::now()))]
            }

            Message::SetActivityTimeout(req) => {
                let clamped = req
                    .activity_timeout
                    .clamp(ACTIVITY_TIMEOUT_MIN, ACTIVITY_TIMEOUT_MAX);
                vec![
                    ClientEffect::SetActivityTimeout(clamped),
                    ClientEffect::Reply(Message::SetActivityTimeoutResult(
                        SetActivityTimeoutResult {
                            activity_timeout: clamped,
                            min: ACTIVITY_TIMEOUT_MIN,
                            max: ACTIVITY_TIMEOUT_MAX,
                        },
                    )),
                ]
            }

            Message::SetChannelValue(cmd) => self.handle_command(cmd.guid, cmd),

            Message::RegisterClient(_) => {
                warn!("client {} re-registered mid-session", self.client_id);
                vec![ClientEffect::Close]
            }

            other => {
                warn!("unexpected client message: {:?}", other.call());
                vec![ClientEffect::Close]
            }
        }
    }

    fn handle_command(
        &self,
        guid: Guid,
        cmd: supla_core::proto::SetChannelValue,
    ) -> Vec<ClientEffect> {
        if self.registry.channel_type(guid, cmd.channel_number).is_none() {
            debug!("command for unknown channel {}#{}", guid, cmd.channel_number);
            return vec![ClientEffect::Reply(self.set_result(
                guid,
                cmd.channel_number,
                ResultCode::ChannelUnknown,
            ))];
        }

        match self.registry.device_session(guid) {
            Some(device_session) => vec![ClientEffect::ForwardToDevice {
                device_session,
                guid,
                command: ChannelNewValue {
                    sender_id: self.client_id,
                    channel_number: cmd.channel_number,
                    duration_ms: 0,
                    value: cmd.value,
                },
            }],
            None => {
                debug!("command for offline device {}", guid);
                vec![ClientEffect::Reply(self.set_result(
                    guid,
                    cmd.channel_number,
                    ResultCode::DeviceUnavailable,
                ))]
            }
        }
    }

    /// Snapshot batches, newest registry state, chunked to the pack
    /// limit with a running remainder count.
    ///
    /// Called after the session has joined the fan-out map, so a value
    /// committed while registration is in flight reaches the client
    /// either here or as a pushed update, never neither.
    pub fn snapshot_effects(&self) -> Vec<ClientEffect> {
        let items = self.registry.snapshot();
        let total = items.len();
        let mut effects = Vec::new();
        let mut sent = 0usize;
        for chunk in items.chunks(SNAPSHOT_PACK_MAXCOUNT) {
            sent += chunk.len();
            effects.push(ClientEffect::Reply(Message::ChannelSnapshot(
                ChannelSnapshot {
                    total_left: (total - sent) as i32,
                    items: chunk.to_vec(),
                },
            )));
        }
        effects
    }

    fn register_result(&self, code: ResultCode, channel_count: i32) -> Message {
        Message::RegisterClientResult(RegisterClientResult {
            result_code: code as i32,
            client_id: self.client_id,
            channel_count,
            activity_timeout: self.activity_timeout,
            version: PROTO_VERSION,
            version_min: PROTO_VERSION_MIN,
        })
    }

    fn set_result(&self, guid: Guid, channel_number: u8, code: ResultCode) -> Message {
        Message::SetChannelResult(SetChannelResult {
            guid,
            channel_number,
            result_code: code as i32,
        })
    }
}
