//! Device session state machine.
//!
//! Pure message-in/effects-out: the connection loop feeds decoded
//! messages and executes the returned effects (replies to this
//! device, fan-out to clients, acks routed back to a commanding
//! client, or teardown). Registry mutation happens here; IO does not.

use std::sync::Arc;

use tracing::{debug, warn};

use supla_core::proto::{
    ChannelStateItem, RegisterDeviceResult, SetActivityTimeoutResult, TimeVal,
};
use supla_core::{
    Error, Guid, Message, ResultCode, ACTIVITY_TIMEOUT_MAX, ACTIVITY_TIMEOUT_MIN, PROTO_VERSION,
    PROTO_VERSION_MIN,
};

use crate::registry::ChannelRegistry;
use crate::session::SessionId;

/// Where a device session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Connected, first frame said "device", registration pending
    AwaitingRegister,
    /// Registered and owning its registry entry
    Online(Guid),
}

/// What the connection loop must do after a message.
#[derive(Debug)]
pub enum DeviceEffect {
    /// Send to this device
    Reply(Message),
    /// Fan out to every registered client
    Broadcast(ChannelStateItem),
    /// Route a command ack to the client that issued it
    AckClient {
        client_id: i32,
        guid: Guid,
        channel_number: u8,
        success: bool,
    },
    /// Apply a negotiated activity timeout to the session
    SetActivityTimeout(u8),
    /// Tear the connection down after flushing queued replies
    Close,
}

pub struct DeviceMachine {
    state: DeviceState,
    session: SessionId,
    registry: Arc<ChannelRegistry>,
    /// Account email devices must present
    email: String,
    activity_timeout: u8,
}

impl DeviceMachine {
    pub fn new(
        session: SessionId,
        registry: Arc<ChannelRegistry>,
        email: String,
        activity_timeout: u8,
    ) -> Self {
        Self {
            state: DeviceState::AwaitingRegister,
            session,
            registry,
            email,
            activity_timeout,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn guid(&self) -> Option<Guid> {
        match self.state {
            DeviceState::Online(guid) => Some(guid),
            DeviceState::AwaitingRegister => None,
        }
    }

    /// Step the machine with one inbound message.
    pub fn handle(&mut self, message: Message) -> Vec<DeviceEffect> {
        match self.state {
            DeviceState::AwaitingRegister => self.handle_awaiting(message),
            DeviceState::Online(guid) => self.handle_online(guid, message),
        }
    }

    fn handle_awaiting(&mut self, message: Message) -> Vec<DeviceEffect> {
        match message {
            Message::RegisterDevice(reg) => {
                if reg.email != self.email {
                    warn!("device {} presented wrong email", reg.guid);
                    return vec![
                        DeviceEffect::Reply(register_result(ResultCode::AuthFailed, self.activity_timeout)),
                        DeviceEffect::Close,
                    ];
                }

                match self.registry.register_device(
                    reg.guid,
                    self.session.clone(),
                    &reg.name,
                    &reg.soft_ver,
                    &reg.channels,
                ) {
                    Ok(()) => {
                        self.state = DeviceState::Online(reg.guid);
                        let mut effects = vec![DeviceEffect::Reply(register_result(
                            ResultCode::True,
                            self.activity_timeout,
                        ))];
                        // Channels just came online; tell every client.
                        for (n, _) in reg.channels.iter().enumerate() {
                            if let Ok(item) = self.registry.update_channel(
                                reg.guid,
                                n as u8,
                                reg.channels[n].value,
                            ) {
                                effects.push(DeviceEffect::Broadcast(item));
                            }
                        }
                        effects
                    }
                    Err(Error::DuplicateDevice(guid)) => {
                        warn!("duplicate registration for {}", guid);
                        vec![
                            DeviceEffect::Reply(register_result(
                                ResultCode::DeviceDuplicate,
                                self.activity_timeout,
                            )),
                            DeviceEffect::Close,
                        ]
                    }
                    Err(e) => {
                        warn!("registration rejected: {}", e);
                        vec![
                            DeviceEffect::Reply(register_result(
                                ResultCode::AuthFailed,
                                self.activity_timeout,
                            )),
                            DeviceEffect::Close,
                        ]
                    }
                }
            }
            other => {
                warn!("message before registration: {:?}", other.call());
                vec![DeviceEffect::Close]
            }
        }
    }

    fn handle_online(&mut self, guid: Guid, message: Message) -> Vec<DeviceEffect> {
        match message {
            Message::PingServer(_) => {
                vec![DeviceEffect::Reply(Message::PingServerResult(TimeVal::now()))]
            }

            Message::SetActivityTimeout(req) => {
                let clamped = req
                    .activity_timeout
                    .clamp(ACTIVITY_TIMEOUT_MIN, ACTIVITY_TIMEOUT_MAX);
                vec![
                    DeviceEffect::SetActivityTimeout(clamped),
                    DeviceEffect::Reply(Message::SetActivityTimeoutResult(
                        SetActivityTimeoutResult {
                            activity_timeout: clamped,
                            min: ACTIVITY_TIMEOUT_MIN,
                            max: ACTIVITY_TIMEOUT_MAX,
                        },
                    )),
                ]
            }

            Message::ChannelValueChanged(change) => {
                match self
                    .registry
                    .update_channel(guid, change.channel_number, change.value)
                {
                    Ok(item) => vec![DeviceEffect::Broadcast(item)],
                    Err(e) => {
                        warn!("value change rejected for {}: {}", guid, e);
                        vec![DeviceEffect::Close]
                    }
                }
            }

            Message::ChannelSetValueResult(ack) => {
                debug!(
                    "device {} acked channel {} for client {}",
                    guid, ack.channel_number, ack.sender_id
                );
                vec![DeviceEffect::AckClient {
                    client_id: ack.sender_id,
                    guid,
                    channel_number: ack.channel_number,
                    success: ack.success,
                }]
            }

            // A second registration on a live session is a protocol
            // violation; the device must reconnect instead.
            Message::RegisterDevice(_) => {
                warn!("device {} re-registered mid-session", guid);
                vec![DeviceEffect::Close]
            }

            other => {
                warn!("unexpected device message: {:?}", other.call());
                vec![DeviceEffect::Close]
            }
        }
    }
}

fn register_result(code: ResultCode, activity_timeout: u8) -> Message {
    Message::RegisterDeviceResult(RegisterDeviceResult {
        result_code: code as i32,
        activity_timeout,
        version: PROTO_VERSION,
        version_min: PROTO_VERSION_MIN,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use supla_core::proto::{DeviceChannelDef, DeviceChannelValue, RegisterDevice};
    use supla_core::ChannelType;

    fn registry() -> Arc<ChannelRegistry> {
        let config: ServerConfig = toml::from_str(
            r#"
            email = "owner@example.com"
            password = "secret"

            [[devices]]
            guid = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
            channels = [{ type = "relay" }]
            "#,
        )
        .unwrap();
        Arc::new(ChannelRegistry::from_config(&config).unwrap())
    }

    fn machine(registry: &Arc<ChannelRegistry>, session: &str) -> DeviceMachine {
        DeviceMachine::new(
            session.to_string(),
            registry.clone(),
            "owner@example.com".to_string(),
            120,
        )
    }

    fn register_msg(email: &str) -> Message {
        Message::RegisterDevice(RegisterDevice {
            email: email.to_string(),
            guid: Guid([0xaa; 16]),
            name: "dev".into(),
            soft_ver: "1.0".into(),
            manufacturer_id: 0,
            product_id: 0,
            channels: vec![DeviceChannelDef {
                number: 0,
                channel_type: ChannelType::Relay as i32,
                action_caps: 0,
                default_func: 0,
                flags: 0,
                value: [0; 8],
            }],
        })
    }

    fn result_code(effects: &[DeviceEffect]) -> i32 {
        match &effects[0] {
            DeviceEffect::Reply(Message::RegisterDeviceResult(r)) => r.result_code,
            other => panic!("expected RegisterDeviceResult, got {other:?}"),
        }
    }

    #[test]
    fn successful_registration_goes_online() {
        let registry = registry();
        let mut machine = machine(&registry, "s1");
        let effects = machine.handle(register_msg("owner@example.com"));
        assert_eq!(result_code(&effects), ResultCode::True as i32);
        assert_eq!(machine.state(), DeviceState::Online(Guid([0xaa; 16])));
        assert!(effects
            .iter()
            .any(|e| matches!(e, DeviceEffect::Broadcast(_))));
    }

    #[test]
    fn wrong_email_closes() {
        let registry = registry();
        let mut machine = machine(&registry, "s1");
        let effects = machine.handle(register_msg("intruder@example.com"));
        assert_eq!(result_code(&effects), ResultCode::AuthFailed as i32);
        assert!(matches!(effects.last(), Some(DeviceEffect::Close)));
        assert_eq!(machine.state(), DeviceState::AwaitingRegister);
    }

    #[test]
    fn duplicate_while_online_closes_second() {
        let registry = registry();
        let mut first = machine(&registry, "s1");
        first.handle(register_msg("owner@example.com"));

        let mut second = machine(&registry, "s2");
        let effects = second.handle(register_msg("owner@example.com"));
        assert_eq!(result_code(&effects), ResultCode::DeviceDuplicate as i32);
        assert!(matches!(effects.last(), Some(DeviceEffect::Close)));
    }

    #[test]
    fn value_change_broadcasts() {
        let registry = registry();
        let mut machine = machine(&registry, "s1");
        machine.handle(register_msg("owner@example.com"));

        let effects = machine.handle(Message::ChannelValueChanged(DeviceChannelValue {
            channel_number: 0,
            value: [1, 0, 0, 0, 0, 0, 0, 0],
        }));
        match &effects[0] {
            DeviceEffect::Broadcast(item) => {
                assert_eq!(item.channel_number, 0);
                assert!(item.online);
            }
            other => panic!("expected Broadcast, got {other:?}"),
        }
    }

    #[test]
    fn unknown_channel_is_fatal() {
        let registry = registry();
        let mut machine = machine(&registry, "s1");
        machine.handle(register_msg("owner@example.com"));

        let effects = machine.handle(Message::ChannelValueChanged(DeviceChannelValue {
            channel_number: 7,
            value: [0; 8],
        }));
        assert!(matches!(effects.last(), Some(DeviceEffect::Close)));

        // The rest of the registry is untouched; the entry can come
        // back once the session is reaped.
        assert!(registry.device_session(Guid([0xaa; 16])).is_some());
    }

    #[test]
    fn ping_before_register_closes() {
        let registry = registry();
        let mut machine = machine(&registry, "s1");
        let effects = machine.handle(Message::PingServer(TimeVal::now()));
        assert!(matches!(effects.last(), Some(DeviceEffect::Close)));
    }

    #[test]
    fn activity_timeout_clamped() {
        let registry = registry();
        let mut machine = machine(&registry, "s1");
        machine.handle(register_msg("owner@example.com"));

        let effects = machine.handle(Message::SetActivityTimeout(
            supla_core::proto::SetActivityTimeout { activity_timeout: 5 },
        ));
        assert!(matches!(
            effects[0],
            DeviceEffect::SetActivityTimeout(ACTIVITY_TIMEOUT_MIN)
        ));
        match &effects[1] {
            DeviceEffect::Reply(Message::SetActivityTimeoutResult(r)) => {
                assert_eq!(r.activity_timeout, ACTIVITY_TIMEOUT_MIN);
            }
            other => panic!("expected SetActivityTimeoutResult, got {other:?}"),
        }
    }
}
