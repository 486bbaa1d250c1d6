//https://www.avsforum.com/attachments/hdmi-cec-v1-3a-specifications-pdf.2579760/

use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::time::Duration;

/// Serial baud rate of the USB adapter.
pub const CEC_SERIAL_BAUD_RATE: u32 = 38_400;

/// Physical address used until the topology is known: input 1 of the root device (1.0.0.0).
pub const CEC_DEFAULT_PHYSICAL_ADDRESS: u16 = 0x1000;

/// How long a remote control button stays pressed without a release
/// before the driver reports a key-up on its own.
pub const CEC_BUTTON_TIMEOUT: Duration = Duration::from_millis(500);

/// How long the adapter firmware gets to acknowledge a command.
pub const CEC_ACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default time to wait for the adapter to answer a ping while opening.
pub const CEC_DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval of the two background threads. Also bounds how long
/// `close` has to wait for them.
pub(crate) const CEC_FRAME_READ_TIMEOUT: Duration = Duration::from_millis(50);

/**
 * The logical addresses defined by CEC 1.3a.
 *
 * A device claims exactly one of these. [Free](CecLogicalAddress::Free)
 * is the address of a device that could not claim anything else,
 * [Broadcast](CecLogicalAddress::Broadcast) addresses every device on the bus.
 */
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum CecLogicalAddress {
    Tv = 0,
    Recording1 = 1,
    Recording2 = 2,
    Tuner1 = 3,
    Playback1 = 4,
    AudioSystem = 5,
    Tuner2 = 6,
    Tuner3 = 7,
    Playback2 = 8,
    Recording3 = 9,
    Tuner4 = 10,
    Playback3 = 11,
    Reserved1 = 12,
    Reserved2 = 13,
    /// unregistered, as initiator address
    Free = 14,
    /// as destination address
    Broadcast = 15,
}

bitflags! {
    /// Bitmask of the logical addresses the adapter should acknowledge
    /// on the bus. Bit *n* stands for logical address *n*.
    ///
    /// Sent to the firmware as an opaque 16-bit value, low byte first.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CecAckMask: u16 {
        const TV            = (1 << 0);
        const RECORDING1    = (1 << 1);
        const RECORDING2    = (1 << 2);
        const TUNER1        = (1 << 3);
        const PLAYBACK1     = (1 << 4);
        const AUDIO_SYSTEM  = (1 << 5);
        const TUNER2        = (1 << 6);
        const TUNER3        = (1 << 7);
        const PLAYBACK2     = (1 << 8);
        const RECORDING3    = (1 << 9);
        const TUNER4        = (1 << 10);
        const PLAYBACK3     = (1 << 11);
    }
}
impl From<CecLogicalAddress> for CecAckMask {
    fn from(address: CecLogicalAddress) -> Self {
        CecAckMask::from_bits_retain(1 << u8::from(address))
    }
}

/// The subset of CEC opcodes this device speaks, plus their close neighbours.
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum CecOpcode {
    /* One Touch Play Feature */
    /// Used by a new source to indicate that it has started to transmit a stream OR used in response to a [CecOpcode::RequestActiveSource]
    /// __Parameters:__ 2byte - physical address of active source
    ActiveSource = 0x82,
    /// Sent by a source device to the TV whenever it enters the active state (alternatively it may send [CecOpcode::TextViewOn]).
    /// The TV should then turn on (if not on).
    ImageViewOn = 0x04,
    /// As [CecOpcode::ImageViewOn], but should also remove any text, menus and PIP windows from the TV’s display.
    TextViewOn = 0x0d,

    /* Routing Control Feature */
    /// Used by the currently active source to inform the TV that it has no video to be presented, or is going into standby.
    /// __Parameters:__ 2byte - physical address of active source
    InactiveSource = 0x9d,
    /// Used by a new device to discover the status of the system.
    RequestActiveSource = 0x85,
    /// Sent by a CEC Switch when it is manually switched to inform all other devices on the network that the active route below the switch has changed.
    /// __Parameters:__
    /// - 2byte - old physical address
    /// - 2byte - new physical address
    RoutingChange = 0x80,
    /// Used by the TV to request a streaming path from the specified physical address.
    /// __Parameters:__ 2byte - physical address
    SetStreamPath = 0x86,

    /* Standby Feature */
    /// Turn off remote device. Can be used as a broadcast. No Payload
    Standby = 0x36,

    /* System Information Feature */
    /// Used to indicate the supported CEC version, in response to a [CecOpcode::GetCecVersion]
    /// __Parameters:__ [CecVersion]
    CecVersion = 0x9e,
    /// Requests a [CecOpcode::CecVersion] from a device.
    GetCecVersion = 0x9f,
    /// Requests a [CecOpcode::ReportPhysicalAddr].
    GivePhysicalAddr = 0x83,
    /// Requests a [CecOpcode::SetMenuLanguage].
    GetMenuLanguage = 0x91,
    /// Used to inform all other devices of the mapping between physical and logical address of the initiator.
    /// __Parameters:__
    /// - 2b physical address
    /// - 1b [CecDeviceType]
    ReportPhysicalAddr = 0x84,
    /// Used by a TV or another device to indicate the menu language.
    /// __Parameters:__ 3 byte ISO 639-2 language code
    SetMenuLanguage = 0x32,

    /* Deck Control Feature */
    /// Used to control a device’s media functions.
    DeckControl = 0x42,
    /// Used to provide a deck’s status to the initiator of the [CecOpcode::GiveDeckStatus] message.
    DeckStatus = 0x1b,
    /// Used to request the status of a device, regardless of whether or not it is the current active source.
    GiveDeckStatus = 0x1a,
    /// Used to control the playback behaviour of a source device.
    Play = 0x41,

    /* Vendor Specific Commands Feature */
    /// Reports the vendor ID of this device.
    /// __Parameters:__ 3 byte IEEE OUI
    DeviceVendorId = 0x87,
    /// Requests a [CecOpcode::DeviceVendorId].
    GiveDeviceVendorId = 0x8c,
    /// Allows vendor specific commands to be sent between two devices.
    /// __Parameters:__ vendor specific
    VendorCommand = 0x89,
    /// Indicates that a remote control button has been depressed.
    /// __Parameters:__ Vendor Specific RC Code
    VendorRemoteButtonDown = 0x8a,
    /// The last button pressed indicated by the [CecOpcode::VendorRemoteButtonDown] message has been released.
    VendorRemoteButtonUp = 0x8b,

    /* OSD Display Feature */
    /// Used to send a text message to output on a TV.
    SetOsdString = 0x64,
    /* Device OSD Transfer Feature */
    /// No payload. Requests a [CecOpcode::SetOsdName].
    GiveOsdName = 0x46,
    /// answer to [CecOpcode::GiveOsdName].
    /// __Parameters:__ the name of the device (used in menus). not terminated or prefixed by anything
    SetOsdName = 0x47,

    /* Device Menu Control Feature */
    /// A request from the TV for a device to show/remove a menu or to query if a device is currently showing a menu.
    MenuRequest = 0x8d,
    /// Used to indicate to the TV that the device is showing/has removed a menu and requests the remote control keys to be passed though.
    /// __Parameters:__ 1 byte Activated(0)/Deactivated(1)
    MenuStatus = 0x8e,
    /// Used to indicate that the user pressed a remote control button or switched from one remote control button to another.
    /// __Parameters:__ 1 byte [CecUserControlCode]
    UserControlPressed = 0x44,
    /// The last button pressed indicated by the [CecOpcode::UserControlPressed] message has been released.
    UserControlReleased = 0x45,

    /* Power Status Feature */
    /// request [CecOpcode::ReportPowerStatus]
    GiveDevicePowerStatus = 0x8f,
    /// Answer to [CecOpcode::GiveDevicePowerStatus]
    ///
    /// __Parameters:__ 1 byte [CecPowerStatus]
    ReportPowerStatus = 0x90,

    /* General Protocol Messages */
    /**
     * It is used to allow devices to indicate if they do not
     * support an opcode that has been directly sent to them, if it is unable to deal with the message at present, or if there
     * was something wrong with the transmitted frame at the high-level protocol layer.
     *
     * __Parameters:__
     * - 1 byte opcode that was aborted
     * - 1 byte [CecAbortReason]
     */
    FeatureAbort = 0x00,
    /// Sent to test whether a device answers with a [CecOpcode::FeatureAbort].
    Abort = 0xff,

    /* System Audio Control Feature */
    /// Requests an amplifier to send its volume and mute status via [CecOpcode::ReportAudioStatus]
    GiveAudioStatus = 0x71,
    /// Used to indicate the current audio volume status of a device.
    /// __Parameters:__ 1 byte, the highest bit (`&0x80`) indicates mute
    ReportAudioStatus = 0x7a,
    /// Turns the System Audio Mode On or Off.
    /// __Parameters:__ 1 byte On(1)/Off(0)
    SetSystemAudioMode = 0x72,
    /// Requests to use System Audio Mode to the amplifier.
    SystemAudioModeRequest = 0x70,
}

/// parameter for [CecOpcode::UserControlPressed]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum CecUserControlCode {
    Select = 0x00,
    Up = 0x01,
    Down = 0x02,
    Left = 0x03,
    Right = 0x04,
    RootMenu = 0x09,
    SetupMenu = 0x0a,
    ContentsMenu = 0x0b,
    FavoriteMenu = 0x0c,
    Exit = 0x0d,
    Number0 = 0x20,
    Number1 = 0x21,
    Number2 = 0x22,
    Number3 = 0x23,
    Number4 = 0x24,
    Number5 = 0x25,
    Number6 = 0x26,
    Number7 = 0x27,
    Number8 = 0x28,
    Number9 = 0x29,
    Dot = 0x2a,
    Enter = 0x2b,
    Clear = 0x2c,
    ChannelUp = 0x30,
    ChannelDown = 0x31,
    PreviousChannel = 0x32,
    SoundSelect = 0x33,
    InputSelect = 0x34,
    DisplayInformation = 0x35,
    PageUp = 0x37,
    PageDown = 0x38,
    // reserved: 0x39 ... 0x3F
    Power = 0x40,
    VolumeUp = 0x41,
    VolumeDown = 0x42,
    Mute = 0x43,
    Play = 0x44,
    Stop = 0x45,
    Pause = 0x46,
    Record = 0x47,
    Rewind = 0x48,
    FastForward = 0x49,
    Eject = 0x4a,
    Forward = 0x4b,
    Backward = 0x4c,
    Angle = 0x50,
    SubPicture = 0x51,
    ElectronicProgramGuide = 0x53,
    F1Blue = 0x71,
    F2Red = 0x72,
    F3Green = 0x73,
    F4Yellow = 0x74,
    F5 = 0x75,
    // reserved: 0x76 ... 0xFF
}

/// used by [CecOpcode::FeatureAbort]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum CecAbortReason {
    /// Not in correct mode to respond
    WrongMode = 1,
    /// Cannot provide source
    NoSource = 2,
    /// Invalid operand
    InvalidOperand = 3,
    /// Unrecognized opcode
    Unrecognized = 4,
    Refused = 5,
}

/// Payload of [CecOpcode::ReportPowerStatus]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Clone, Copy)]
#[repr(u8)]
pub enum CecPowerStatus {
    On = 0,
    Standby = 1,
    InTransitionStandbyToOn = 2,
    InTransitionOnToStandby = 3,
}

/// CEC Version Operand for [CecOpcode::CecVersion]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Copy, Clone)]
#[repr(u8)]
pub enum CecVersion {
    V1_3A = 4,
    V1_4 = 5,
    V2_0 = 6,
}

/// Device Type Operand of [CecOpcode::ReportPhysicalAddr]
#[derive(Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Copy, Clone)]
#[repr(u8)]
pub enum CecDeviceType {
    Tv = 0,
    RecordingDevice = 1,
    Tuner = 3,
    PlaybackDevice = 4,
    AudioSystem = 5,
}

impl CecLogicalAddress {
    /// The device type a device on this address presents to the bus.
    pub fn device_type(self) -> CecDeviceType {
        match self {
            CecLogicalAddress::Recording1
            | CecLogicalAddress::Recording2
            | CecLogicalAddress::Recording3 => CecDeviceType::RecordingDevice,
            CecLogicalAddress::Tuner1
            | CecLogicalAddress::Tuner2
            | CecLogicalAddress::Tuner3
            | CecLogicalAddress::Tuner4 => CecDeviceType::Tuner,
            CecLogicalAddress::Playback1
            | CecLogicalAddress::Playback2
            | CecLogicalAddress::Playback3 => CecDeviceType::PlaybackDevice,
            CecLogicalAddress::AudioSystem => CecDeviceType::AudioSystem,
            _ => CecDeviceType::Tv,
        }
    }
}

/// Longest OSD name a device may carry.
const OSD_NAME_LEN: usize = 13;

/**
 * The name other devices show in their menus for us, at most 13 ASCII bytes.
 *
 * Create it from a string slice (non-ASCII bytes and everything past the
 * 13th byte are dropped):
 * ```
 * # use cec_usb::OsdName;
 * let name = OsdName::from("living room pi");
 * assert_eq!(name.as_bytes(), b"living room p");
 * ```
 */
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct OsdName([u8; OSD_NAME_LEN]);

impl OsdName {
    /// The name without the padding, as sent in [CecOpcode::SetOsdName].
    pub fn as_bytes(&self) -> &[u8] {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(OSD_NAME_LEN);
        &self.0[..len]
    }
}
impl From<&str> for OsdName {
    fn from(value: &str) -> Self {
        let mut osd = OsdName::default();
        let mut len = 0;
        for b in value.bytes().filter(|b| b.is_ascii() && *b != 0) {
            if len == OSD_NAME_LEN {
                break;
            }
            osd.0[len] = b;
            len += 1;
        }
        osd
    }
}
impl Default for OsdName {
    fn default() -> Self {
        Self([0; OSD_NAME_LEN])
    }
}
impl std::fmt::Display for OsdName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(std::str::from_utf8(self.as_bytes()).unwrap_or_default())
    }
}
impl std::fmt::Debug for OsdName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", std::str::from_utf8(self.as_bytes()).unwrap_or_default())
    }
}

/// A CEC message received from the bus, with the header pre-parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CecMessage {
    pub source: CecLogicalAddress,
    pub destination: CecLogicalAddress,
    /// Raw opcode byte. Not every device sticks to [CecOpcode].
    pub opcode: u8,
    pub parameters: Vec<u8>,
}

impl CecMessage {
    /// Parse a raw CEC frame. `None` if the frame is too short to carry
    /// an opcode (a poll, or garbage).
    pub fn parse(frame: &[u8]) -> Option<CecMessage> {
        if frame.len() < 2 {
            return None;
        }
        Some(CecMessage {
            source: (frame[0] >> 4).try_into().unwrap(), // all values have a variant
            destination: (frame[0] & 0xf).try_into().unwrap(),
            opcode: frame[1],
            parameters: frame[2..].to_vec(),
        })
    }
    /// return true if this message addresses every device on the bus
    pub fn is_broadcast(&self) -> bool {
        self.destination == CecLogicalAddress::Broadcast
    }
}

/**
 * An outgoing CEC message.
 *
 * With `source` left as `None` the driver fills in its own logical
 * address right before the bytes hit the wire, so a request can be built
 * once and stays valid across [set_logical_address](crate::CecAdapter::set_logical_address).
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitRequest {
    /// `None`: transmit from the local logical address.
    pub source: Option<CecLogicalAddress>,
    pub destination: CecLogicalAddress,
    pub opcode: CecOpcode,
    pub parameters: Vec<u8>,
}

impl TransmitRequest {
    pub fn new(destination: CecLogicalAddress, opcode: CecOpcode) -> TransmitRequest {
        TransmitRequest {
            source: None,
            destination,
            opcode,
            parameters: Vec::new(),
        }
    }
    pub fn with_parameters(
        destination: CecLogicalAddress,
        opcode: CecOpcode,
        parameters: Vec<u8>,
    ) -> TransmitRequest {
        TransmitRequest {
            source: None,
            destination,
            opcode,
            parameters,
        }
    }
    /// Raw frame bytes, with `fallback` as the initiator if no source is set.
    pub(crate) fn encode(&self, fallback: CecLogicalAddress) -> Vec<u8> {
        let source = self.source.unwrap_or(fallback);
        let mut frame = Vec::with_capacity(2 + self.parameters.len());
        frame.push(u8::from(source) << 4 | u8::from(self.destination));
        frame.push(self.opcode.into());
        frame.extend_from_slice(&self.parameters);
        frame
    }
}
