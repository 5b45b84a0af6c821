//! The supported call table.
//!
//! Call ids partition by direction: `Ds`/`Sd` device↔server, `Cs`/`Sc`
//! client↔server, `Dcs`/`Sdc` either peer↔server. Ids follow SUPLA
//! numbering for one protocol revision; anything outside this table is
//! rejected at the frame layer.

/// Recognized protocol calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Call {
    /// Heartbeat from device or client
    DcsPingServer = 40,
    SdcPingServerResult = 50,

    /// Device registration handshake
    DsRegisterDevice = 69,
    SdRegisterDeviceResult = 70,

    /// Client registration handshake
    CsRegisterClient = 87,
    ScRegisterClientResult = 96,

    /// Device reports a channel value
    DsChannelValueChanged = 103,

    /// Server commands a device channel
    SdChannelSetValue = 110,
    DsChannelSetValueResult = 120,

    /// Registry snapshot pushed to a freshly registered client
    ScChannelSnapshot = 160,

    /// Asynchronous channel update pushed to clients
    ScChannelValueUpdate = 181,

    /// Client commands a device channel
    CsSetChannelValue = 205,

    /// Activity timeout negotiation
    DcsSetActivityTimeout = 230,
    SdcSetActivityTimeoutResult = 240,

    /// Ack for a client command (success or device-unavailable)
    ScSetChannelResult = 620,
}

impl Call {
    pub fn from_u32(id: u32) -> Option<Self> {
        match id {
            40 => Some(Call::DcsPingServer),
            50 => Some(Call::SdcPingServerResult),
            69 => Some(Call::DsRegisterDevice),
            70 => Some(Call::SdRegisterDeviceResult),
            87 => Some(Call::CsRegisterClient),
            96 => Some(Call::ScRegisterClientResult),
            103 => Some(Call::DsChannelValueChanged),
            110 => Some(Call::SdChannelSetValue),
            120 => Some(Call::DsChannelSetValueResult),
            160 => Some(Call::ScChannelSnapshot),
            181 => Some(Call::ScChannelValueUpdate),
            205 => Some(Call::CsSetChannelValue),
            230 => Some(Call::DcsSetActivityTimeout),
            240 => Some(Call::SdcSetActivityTimeoutResult),
            620 => Some(Call::ScSetChannelResult),
            _ => None,
        }
    }
}
