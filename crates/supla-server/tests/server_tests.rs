//! End-to-end server tests over localhost TCP.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::time::timeout;

use supla_core::proto::{
    ChannelStateItem, DeviceChannelDef, RegisterClient, RegisterDevice, SetChannelValue, TimeVal,
};
use supla_core::{ChannelType, ChannelValue, Frame, Guid, Message, ResultCode, PROTO_VERSION};
use supla_device::{Channel, Device};
use supla_server::{Server, ServerConfig};
use supla_transport::{
    FrameReceiver, FrameSender, TcpServer, TcpTransport, TransportEvent, TransportReceiver,
    TransportSender, TransportServer,
};

const DEVICE_GUID: &str = "eeeeeeeee534d1a706ac5f416719899e";
const EMAIL: &str = "owner@example.com";
const PASSWORD: &str = "secret";
const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> String {
    format!(
        r#"
        email = "{EMAIL}"
        password = "{PASSWORD}"

        [[devices]]
        guid = "{DEVICE_GUID}"
        name = "patio"
        channels = [{{ type = "relay", func = "light_switch" }}, {{ type = "thermometer" }}]
        "#
    )
}

async fn start_server(config_text: &str) -> (Server, SocketAddr) {
    let config: ServerConfig = toml::from_str(config_text).unwrap();
    let server = Server::new(config).unwrap();
    let listener = TcpServer::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = server.handle();
    tokio::spawn(async move {
        let _ = handle.serve_on(listener).await;
    });
    (server, addr)
}

async fn connect_device(addr: SocketAddr) -> Device {
    Device::builder(&addr.to_string(), EMAIL, Guid::from_hex(DEVICE_GUID).unwrap())
        .plain_tcp()
        .name("patio")
        .channel(Channel::light_switch(false))
        .channel(Channel::thermometer())
        .connect()
        .await
        .expect("device connect failed")
}

/// Bare client speaking raw frames, for asserting on exact replies.
struct TestClient {
    sender: FrameSender,
    receiver: FrameReceiver,
    rr_id: u32,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let (sender, receiver) = TcpTransport::new()
            .connect(&addr.to_string())
            .await
            .expect("client connect failed");
        Self {
            sender,
            receiver,
            rr_id: 1,
        }
    }

    async fn send(&mut self, message: Message) {
        let frame = Frame::new(self.rr_id, message.call(), message.encode().unwrap())
            .encode()
            .unwrap();
        self.rr_id += 1;
        self.sender.send(frame).await.expect("send failed");
    }

    async fn recv(&mut self) -> Option<Message> {
        match timeout(WAIT, self.receiver.recv()).await.expect("recv timed out") {
            Some(TransportEvent::Frame(data)) => {
                let mut buf = BytesMut::from(data.as_ref());
                let frame = Frame::decode(&mut buf).expect("bad frame");
                assert_eq!(frame.version, PROTO_VERSION);
                Some(Message::decode(frame.call().unwrap(), frame.data).unwrap())
            }
            _ => None,
        }
    }

    async fn recv_until<T>(&mut self, mut pick: impl FnMut(Message) -> Option<T>) -> T {
        loop {
            let message = self.recv().await.expect("connection closed while waiting");
            if let Some(value) = pick(message) {
                return value;
            }
        }
    }

    /// Register and drain the initial snapshot.
    async fn register(&mut self, password: &str) -> (i32, Vec<ChannelStateItem>) {
        self.send(Message::RegisterClient(RegisterClient {
            email: EMAIL.into(),
            password: password.into(),
            guid: Guid([0x11; 16]),
            name: "test panel".into(),
            soft_ver: "1.0".into(),
        }))
        .await;

        let result = self
            .recv_until(|m| match m {
                Message::RegisterClientResult(r) => Some(r),
                _ => None,
            })
            .await;
        assert_eq!(result.result_code, ResultCode::True as i32);

        let mut items = Vec::new();
        while (items.len() as i32) < result.channel_count {
            let snap = self
                .recv_until(|m| match m {
                    Message::ChannelSnapshot(s) => Some(s),
                    _ => None,
                })
                .await;
            items.extend(snap.items);
        }
        (result.client_id, items)
    }
}

#[tokio::test]
async fn client_snapshot_reflects_device_state() {
    let (_server, addr) = start_server(&test_config()).await;

    // Before any device: everything offline
    let mut client = TestClient::connect(addr).await;
    let (_, items) = client.register(PASSWORD).await;
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| !i.online));
    assert!(items.last().unwrap().eol);

    // With the device online a fresh client sees it
    let device = connect_device(addr).await;
    let mut second = TestClient::connect(addr).await;
    let (_, items) = second.register(PASSWORD).await;
    assert!(items.iter().all(|i| i.online));

    device.disconnect().await;
}

#[tokio::test]
async fn value_change_fans_out_to_clients() {
    let (server, addr) = start_server(&test_config()).await;
    let device = connect_device(addr).await;

    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = TestClient::connect(addr).await;
        client.register(PASSWORD).await;
        clients.push(client);
    }

    device
        .report(1, ChannelValue::Temperature(Some(23.5)))
        .await
        .unwrap();

    // Every registered client gets the same update
    for client in &mut clients {
        let update = client
            .recv_until(|m| match m {
                Message::ChannelValueUpdate(item) if item.channel_number == 1 => Some(item),
                _ => None,
            })
            .await;
        assert!(update.online);
        assert_eq!(update.guid, Guid::from_hex(DEVICE_GUID).unwrap());
        assert_eq!(
            update.value,
            ChannelValue::Temperature(Some(23.5)).encode()
        );
    }

    // And the registry agrees with what was pushed
    let snapshot = server.registry().snapshot();
    let item = snapshot.iter().find(|i| i.channel_number == 1).unwrap();
    assert_eq!(item.value, ChannelValue::Temperature(Some(23.5)).encode());
}

#[tokio::test]
async fn command_round_trip_toggles_relay() {
    let (_server, addr) = start_server(&test_config()).await;
    let device = connect_device(addr).await;
    device.on_command(|_, _| true);

    let mut client = TestClient::connect(addr).await;
    client.register(PASSWORD).await;

    client
        .send(Message::SetChannelValue(SetChannelValue {
            guid: Guid::from_hex(DEVICE_GUID).unwrap(),
            channel_number: 0,
            value: ChannelValue::Relay(true).encode(),
        }))
        .await;

    // Ack routed back from the device
    let result = client
        .recv_until(|m| match m {
            Message::SetChannelResult(r) => Some(r),
            _ => None,
        })
        .await;
    assert_eq!(result.result_code, ResultCode::True as i32);
    assert_eq!(result.channel_number, 0);

    // And the resulting value change fans out
    let update = client
        .recv_until(|m| match m {
            Message::ChannelValueUpdate(item) if item.channel_number == 0 => Some(item),
            _ => None,
        })
        .await;
    assert_eq!(update.value, ChannelValue::Relay(true).encode());

    // The device's local cache agrees
    assert_eq!(device.value(0), Some(ChannelValue::Relay(true)));
}

#[tokio::test]
async fn rejected_command_acked_as_failed() {
    let (_server, addr) = start_server(&test_config()).await;
    let device = connect_device(addr).await;
    device.on_command(|_, _| false);

    let mut client = TestClient::connect(addr).await;
    client.register(PASSWORD).await;

    client
        .send(Message::SetChannelValue(SetChannelValue {
            guid: Guid::from_hex(DEVICE_GUID).unwrap(),
            channel_number: 0,
            value: ChannelValue::Relay(true).encode(),
        }))
        .await;

    let result = client
        .recv_until(|m| match m {
            Message::SetChannelResult(r) => Some(r),
            _ => None,
        })
        .await;
    assert_eq!(result.result_code, ResultCode::False as i32);
}

#[tokio::test]
async fn command_to_offline_device_unavailable() {
    let (_server, addr) = start_server(&test_config()).await;

    let mut client = TestClient::connect(addr).await;
    client.register(PASSWORD).await;

    client
        .send(Message::SetChannelValue(SetChannelValue {
            guid: Guid::from_hex(DEVICE_GUID).unwrap(),
            channel_number: 0,
            value: ChannelValue::Relay(true).encode(),
        }))
        .await;

    let result = client
        .recv_until(|m| match m {
            Message::SetChannelResult(r) => Some(r),
            _ => None,
        })
        .await;
    assert_eq!(result.result_code, ResultCode::DeviceUnavailable as i32);
}

#[tokio::test]
async fn duplicate_device_rejected() {
    let (_server, addr) = start_server(&test_config()).await;
    let _device = connect_device(addr).await;

    let result = Device::builder(&addr.to_string(), EMAIL, Guid::from_hex(DEVICE_GUID).unwrap())
        .plain_tcp()
        .channel(Channel::light_switch(false))
        .channel(Channel::thermometer())
        .connect()
        .await;

    match result {
        Err(supla_device::DeviceError::RegistrationRejected(code)) => {
            assert_eq!(code, ResultCode::DeviceDuplicate as i32);
        }
        Err(other) => panic!("expected RegistrationRejected, got {other}"),
        Ok(_) => panic!("duplicate registration accepted"),
    }
}

#[tokio::test]
async fn device_disconnect_pushes_offline_updates() {
    let (_server, addr) = start_server(&test_config()).await;
    let device = connect_device(addr).await;

    let mut client = TestClient::connect(addr).await;
    let (_, items) = client.register(PASSWORD).await;
    assert!(items.iter().all(|i| i.online));

    device.disconnect().await;

    let update = client
        .recv_until(|m| match m {
            Message::ChannelValueUpdate(item) if !item.online => Some(item),
            _ => None,
        })
        .await;
    assert_eq!(update.guid, Guid::from_hex(DEVICE_GUID).unwrap());
}

#[tokio::test]
async fn bad_password_rejected() {
    let (_server, addr) = start_server(&test_config()).await;

    let mut client = TestClient::connect(addr).await;
    client
        .send(Message::RegisterClient(RegisterClient {
            email: EMAIL.into(),
            password: "wrong".into(),
            guid: Guid([0x11; 16]),
            name: "test panel".into(),
            soft_ver: "1.0".into(),
        }))
        .await;

    let result = client
        .recv_until(|m| match m {
            Message::RegisterClientResult(r) => Some(r),
            _ => None,
        })
        .await;
    assert_eq!(result.result_code, ResultCode::AuthFailed as i32);

    // Server hangs up after the rejection
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn unknown_device_guid_rejected() {
    let (_server, addr) = start_server(&test_config()).await;

    let result = Device::builder(&addr.to_string(), EMAIL, Guid([0x42; 16]))
        .plain_tcp()
        .channel(Channel::light_switch(false))
        .connect()
        .await;

    match result {
        Err(supla_device::DeviceError::RegistrationRejected(code)) => {
            assert_eq!(code, ResultCode::AuthFailed as i32);
        }
        Err(other) => panic!("expected RegistrationRejected, got {other}"),
        Ok(_) => panic!("unknown GUID accepted"),
    }
}

#[tokio::test]
async fn first_frame_must_register() {
    let (_server, addr) = start_server(&test_config()).await;

    let mut client = TestClient::connect(addr).await;
    client.send(Message::PingServer(TimeVal::now())).await;

    // Connection dropped without a reply
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn silent_device_times_out_and_goes_offline() {
    // Short timeout so the test completes quickly. The protocol clamp
    // only applies to negotiated values, not the configured default.
    let config = format!(
        r#"
        email = "{EMAIL}"
        password = "{PASSWORD}"
        activity_timeout = 2

        [[devices]]
        guid = "{DEVICE_GUID}"
        channels = [{{ type = "relay" }}, {{ type = "thermometer" }}]
        "#
    );
    let (_server, addr) = start_server(&config).await;

    // A raw device that registers and then never speaks again. The
    // library device would keep pinging, which is exactly what we
    // don't want here.
    let mut device = TestClient::connect(addr).await;
    device
        .send(Message::RegisterDevice(RegisterDevice {
            email: EMAIL.into(),
            guid: Guid::from_hex(DEVICE_GUID).unwrap(),
            name: "mute".into(),
            soft_ver: "1.0".into(),
            manufacturer_id: 0,
            product_id: 0,
            channels: vec![
                DeviceChannelDef {
                    number: 0,
                    channel_type: ChannelType::Relay as i32,
                    action_caps: 0,
                    default_func: 0,
                    flags: 0,
                    value: [0; 8],
                },
                DeviceChannelDef {
                    number: 1,
                    channel_type: ChannelType::Thermometer as i32,
                    action_caps: 0,
                    default_func: 0,
                    flags: 0,
                    value: ChannelValue::Temperature(None).encode(),
                },
            ],
        }))
        .await;
    let result = device
        .recv_until(|m| match m {
            Message::RegisterDeviceResult(r) => Some(r),
            _ => None,
        })
        .await;
    assert_eq!(result.result_code, ResultCode::True as i32);

    let mut client = TestClient::connect(addr).await;
    client.register(PASSWORD).await;

    // Keep the watching client's own deadline ahead of the device's
    tokio::time::sleep(Duration::from_secs(1)).await;
    client.send(Message::PingServer(TimeVal::now())).await;

    let update = client
        .recv_until(|m| match m {
            Message::ChannelValueUpdate(item) if !item.online => Some(item),
            _ => None,
        })
        .await;
    assert_eq!(update.guid, Guid::from_hex(DEVICE_GUID).unwrap());
}

#[tokio::test]
async fn offline_device_can_reregister() {
    let (server, addr) = start_server(&test_config()).await;

    let device = connect_device(addr).await;
    device.disconnect().await;

    // Give the server a moment to reap the session
    tokio::time::sleep(Duration::from_millis(100)).await;

    let device = connect_device(addr).await;
    assert!(device.is_connected());
    assert_eq!(server.client_count(), 0);
}

#[tokio::test]
async fn stop_closes_live_sessions() {
    let (server, addr) = start_server(&test_config()).await;
    let _device = connect_device(addr).await;

    let mut client = TestClient::connect(addr).await;
    client.register(PASSWORD).await;
    assert_eq!(server.session_count(), 2);

    server.stop().await;

    // The socket goes down without the client asking for it
    assert!(client.recv().await.is_none());

    // And every session gets reaped
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.session_count(), 0);
}
