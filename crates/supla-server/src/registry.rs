//! In-memory channel registry.
//!
//! Seeded from [`ServerConfig`] at startup with every declared device
//! offline and its channels at their initial values. Devices come and
//! go; the registry entries never do, so clients always see the full
//! channel table with online flags.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use supla_core::proto::{ChannelStateItem, DeviceChannelDef};
use supla_core::{ChannelFunc, ChannelType, ChannelValue, Error, Guid};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::session::SessionId;

/// One channel's live state.
#[derive(Debug, Clone)]
pub struct ChannelState {
    pub channel_type: ChannelType,
    pub func: ChannelFunc,
    pub value: [u8; 8],
}

/// A declared device and its channels.
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub guid: Guid,
    pub name: String,
    pub soft_ver: String,
    /// Session currently registered for this GUID, if online.
    pub session: Option<SessionId>,
    pub channels: Vec<ChannelState>,
}

impl DeviceEntry {
    pub fn online(&self) -> bool {
        self.session.is_some()
    }

    fn state_item(&self, number: u8, eol: bool) -> ChannelStateItem {
        let channel = &self.channels[number as usize];
        ChannelStateItem {
            eol,
            guid: self.guid,
            channel_number: number,
            channel_type: channel.channel_type as i32,
            online: self.online(),
            value: channel.value,
        }
    }
}

/// The registry proper. All mutation goes through `&self` methods;
/// snapshots are taken under the read lock so they are internally
/// consistent.
pub struct ChannelRegistry {
    devices: RwLock<BTreeMap<Guid, DeviceEntry>>,
}

impl ChannelRegistry {
    /// Seed from config; every device starts offline.
    pub fn from_config(config: &ServerConfig) -> Result<Self> {
        let mut devices = BTreeMap::new();
        for device in &config.devices {
            let guid = device.guid()?;
            let mut channels = Vec::with_capacity(device.channels.len());
            for channel in &device.channels {
                let channel_type = channel.parsed_type()?;
                channels.push(ChannelState {
                    channel_type,
                    func: channel.parsed_func(channel_type)?,
                    value: ChannelValue::initial(channel_type).encode(),
                });
            }
            devices.insert(
                guid,
                DeviceEntry {
                    guid,
                    name: device.name.clone().unwrap_or_default(),
                    soft_ver: String::new(),
                    session: None,
                    channels,
                },
            );
        }
        Ok(Self {
            devices: RwLock::new(devices),
        })
    }

    /// Register a device session for a declared GUID.
    ///
    /// Fails with [`Error::AuthenticationFailure`] for unknown GUIDs or
    /// channel tables that do not match the declaration, and with
    /// [`Error::DuplicateDevice`] when the GUID is already online. An
    /// offline entry re-registers freely; a device that dropped without
    /// a clean disconnect reclaims its slot once the stale session is
    /// reaped.
    pub fn register_device(
        &self,
        guid: Guid,
        session: SessionId,
        name: &str,
        soft_ver: &str,
        declared: &[DeviceChannelDef],
    ) -> std::result::Result<(), Error> {
        let mut devices = self.devices.write();
        let entry = devices.get_mut(&guid).ok_or(Error::AuthenticationFailure)?;

        if entry.online() {
            warn!("device {} already online, rejecting registration", guid);
            return Err(Error::DuplicateDevice(guid));
        }

        if declared.len() != entry.channels.len() {
            warn!(
                "device {} declared {} channels, config has {}",
                guid,
                declared.len(),
                entry.channels.len()
            );
            return Err(Error::AuthenticationFailure);
        }
        for (number, def) in declared.iter().enumerate() {
            let expected = &entry.channels[number];
            if def.number as usize != number || def.channel_type != expected.channel_type as i32 {
                warn!(
                    "device {} channel {} type mismatch ({} != {})",
                    guid, number, def.channel_type, expected.channel_type as i32
                );
                return Err(Error::AuthenticationFailure);
            }
        }

        entry.session = Some(session);
        entry.name = name.to_string();
        entry.soft_ver = soft_ver.to_string();
        for (number, def) in declared.iter().enumerate() {
            entry.channels[number].value = def.value;
        }

        info!("device {} registered ({} channels)", guid, declared.len());
        Ok(())
    }

    /// Mark a device offline if `session` still owns it. Returns the
    /// state items to push to clients, or `None` when the session had
    /// already been superseded.
    pub fn mark_offline(&self, guid: Guid, session: &SessionId) -> Option<Vec<ChannelStateItem>> {
        let mut devices = self.devices.write();
        let entry = devices.get_mut(&guid)?;
        if entry.session.as_ref() != Some(session) {
            return None;
        }
        entry.session = None;
        info!("device {} offline", guid);

        let count = entry.channels.len();
        Some(
            (0..count)
                .map(|n| entry.state_item(n as u8, n + 1 == count))
                .collect(),
        )
    }

    /// Apply a reported value change. Returns the state item to fan
    /// out to clients.
    pub fn update_channel(
        &self,
        guid: Guid,
        number: u8,
        value: [u8; 8],
    ) -> std::result::Result<ChannelStateItem, Error> {
        let mut devices = self.devices.write();
        let entry = devices
            .get_mut(&guid)
            .ok_or(Error::AuthenticationFailure)?;
        let channel = entry
            .channels
            .get_mut(number as usize)
            .ok_or(Error::UnknownChannel { guid, index: number })?;
        channel.value = value;
        debug!("channel {}#{} updated", guid, number);
        Ok(entry.state_item(number, true))
    }

    /// Session owning a device, for command forwarding.
    pub fn device_session(&self, guid: Guid) -> Option<SessionId> {
        self.devices.read().get(&guid)?.session.clone()
    }

    /// Channel type lookup, for validating client commands.
    pub fn channel_type(&self, guid: Guid, number: u8) -> Option<ChannelType> {
        Some(
            self.devices
                .read()
                .get(&guid)?
                .channels
                .get(number as usize)?
                .channel_type,
        )
    }

    /// Consistent snapshot of every channel, ordered by GUID then
    /// channel number. The last item carries `eol`.
    pub fn snapshot(&self) -> Vec<ChannelStateItem> {
        let devices = self.devices.read();
        let mut items: Vec<ChannelStateItem> = devices
            .values()
            .flat_map(|entry| {
                (0..entry.channels.len()).map(move |n| entry.state_item(n as u8, false))
            })
            .collect();
        if let Some(last) = items.last_mut() {
            last.eol = true;
        }
        items
    }

    pub fn channel_count(&self) -> usize {
        self.devices
            .read()
            .values()
            .map(|entry| entry.channels.len())
            .sum()
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }
}
