//! Plain data types exchanged with the native library
use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{
    address::{LogicalAddress, PhysicalAddress},
    CecError,
};

/// CEC protocol version implemented by a device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
pub enum CecVersion {
    #[strum(serialize = "1.2")]
    #[serde(rename = "1.2")]
    V1_2,
    #[strum(serialize = "1.2a")]
    #[serde(rename = "1.2a")]
    V1_2a,
    #[strum(serialize = "1.3")]
    #[serde(rename = "1.3")]
    V1_3,
    #[strum(serialize = "1.3a")]
    #[serde(rename = "1.3a")]
    V1_3a,
    #[strum(serialize = "1.4")]
    #[serde(rename = "1.4")]
    V1_4,
    #[strum(serialize = "2.0")]
    #[serde(rename = "2.0")]
    V2_0,
    Unknown,
}

impl CecVersion {
    /// Maps libcec's `cec_version` values
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0x01 => CecVersion::V1_2,
            0x02 => CecVersion::V1_2a,
            0x03 => CecVersion::V1_3,
            0x04 => CecVersion::V1_3a,
            0x05 => CecVersion::V1_4,
            0x06 => CecVersion::V2_0,
            _ => CecVersion::Unknown,
        }
    }
}

/// Power state as reported by a device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerStatus {
    On,
    Standby,
    InTransitionStandbyToOn,
    InTransitionOnToStandby,
    Unknown,
}

impl PowerStatus {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0x00 => PowerStatus::On,
            0x01 => PowerStatus::Standby,
            0x02 => PowerStatus::InTransitionStandbyToOn,
            0x03 => PowerStatus::InTransitionOnToStandby,
            _ => PowerStatus::Unknown,
        }
    }

    /// Collapses the status into on/off. A device going to standby still counts as on,
    /// one waking up still counts as off.
    pub fn is_on(self) -> Result<bool, CecError> {
        match self {
            PowerStatus::On | PowerStatus::InTransitionOnToStandby => Ok(true),
            PowerStatus::Standby | PowerStatus::InTransitionStandbyToOn => Ok(false),
            PowerStatus::Unknown => Err(CecError::PowerStatusUnknown),
        }
    }
}

/// IEEE OUI of a device's vendor, displayed as 6 hex digits
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct VendorId(pub u32);

impl fmt::Display for VendorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}", self.0 & 0xFF_FFFF)
    }
}

impl Serialize for VendorId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VendorId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        u32::from_str_radix(&s, 16)
            .map(VendorId)
            .map_err(serde::de::Error::custom)
    }
}

/// Device types the local adapter can register as
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceType {
    Tv,
    RecordingDevice,
    Reserved,
    Tuner,
    PlaybackDevice,
    AudioSystem,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterType {
    Unknown,
    P8External,
    P8DaughterBoard,
    Rpi,
    Tda995x,
    Exynos,
    Linux,
    Aocec,
    Imx,
}

impl AdapterType {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0x1 => AdapterType::P8External,
            0x2 => AdapterType::P8DaughterBoard,
            0x100 => AdapterType::Rpi,
            0x200 => AdapterType::Tda995x,
            0x300 => AdapterType::Exynos,
            0x400 => AdapterType::Linux,
            0x500 => AdapterType::Aocec,
            0x600 => AdapterType::Imx,
            _ => AdapterType::Unknown,
        }
    }
}

/// A physically attached CEC adapter, as enumerated by the native library
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// Port name accepted by `Cec::open`
    pub port: String,
    /// Device path (sysfs or usb path)
    pub path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub firmware_version: u16,
    pub firmware_build_date: u32,
    pub physical_address: PhysicalAddress,
    pub adapter_type: AdapterType,
}

impl AdapterDescriptor {
    /// A descriptor carrying nothing but the port, for libraries without extended metadata
    pub fn from_port(port: impl Into<String>) -> Self {
        AdapterDescriptor {
            port: port.into(),
            path: String::new(),
            vendor_id: 0,
            product_id: 0,
            firmware_version: 0,
            firmware_build_date: 0,
            physical_address: PhysicalAddress::INVALID,
            adapter_type: AdapterType::Unknown,
        }
    }
}

impl fmt::Display for AdapterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.port)?;
        if !self.path.is_empty() {
            write!(
                f,
                " ({}, {:04x}:{:04x}, firmware {})",
                self.path, self.vendor_id, self.product_id, self.firmware_version
            )?;
        }
        Ok(())
    }
}

/// Severity of a message emitted by the native library
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 1,
    Warning = 2,
    Notice = 4,
    Traffic = 8,
    Debug = 16,
}

impl LogLevel {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => LogLevel::Error,
            2 => LogLevel::Warning,
            4 => LogLevel::Notice,
            8 => LogLevel::Traffic,
            _ => LogLevel::Debug,
        }
    }

    pub fn to_log_level(self) -> log::Level {
        match self {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Notice => log::Level::Info,
            LogLevel::Traffic => log::Level::Debug,
            LogLevel::Debug => log::Level::Trace,
        }
    }
}

/// A remote control key press forwarded by the bus
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keypress {
    /// CEC user control code
    pub keycode: u8,
    /// Duration the key was held, zero while it is still pressed
    pub duration: Duration,
}

pub mod opcode {
    pub const ACTIVE_SOURCE: u8 = 0x82;
    pub const IMAGE_VIEW_ON: u8 = 0x04;
    pub const TEXT_VIEW_ON: u8 = 0x0D;
    pub const STANDBY: u8 = 0x36;
    pub const USER_CONTROL_PRESSED: u8 = 0x44;
    pub const USER_CONTROL_RELEASE: u8 = 0x45;
    pub const GIVE_OSD_NAME: u8 = 0x46;
    pub const SET_OSD_NAME: u8 = 0x47;
    pub const REPORT_AUDIO_STATUS: u8 = 0x7A;
    pub const GIVE_DEVICE_POWER_STATUS: u8 = 0x8F;
    pub const REPORT_POWER_STATUS: u8 = 0x90;
    pub const GIVE_DEVICE_VENDOR_ID: u8 = 0x8C;
    pub const DEVICE_VENDOR_ID: u8 = 0x87;
    pub const SET_STREAM_PATH: u8 = 0x86;
}

/// User control codes used as `USER_CONTROL_PRESSED` operands
pub mod user_control {
    pub const SELECT_AV_INPUT: u8 = 0x69;
    pub const SELECT_AUDIO_INPUT: u8 = 0x6A;
}

/// A raw CEC frame
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub initiator: LogicalAddress,
    pub destination: LogicalAddress,
    pub ack: bool,
    pub eom: bool,
    /// `None` for polling messages
    pub opcode: Option<u8>,
    pub parameters: Vec<u8>,
    pub transmit_timeout: Duration,
}

impl Command {
    pub const MAX_PARAMETERS: usize = 64;

    pub fn new(initiator: LogicalAddress, destination: LogicalAddress, opcode: u8) -> Self {
        Command {
            initiator,
            destination,
            ack: false,
            eom: true,
            opcode: Some(opcode),
            parameters: Vec::new(),
            transmit_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_parameters(mut self, parameters: &[u8]) -> Self {
        self.parameters.extend_from_slice(parameters);
        self
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}{:x}", self.initiator.value(), self.destination.value())?;
        if let Some(opcode) = self.opcode {
            write!(f, ":{:02x}", opcode)?;
        }
        for p in &self.parameters {
            write!(f, ":{:02x}", p)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    ServiceDevice,
    ConnectionLost,
    PermissionError,
    PortBusy,
    PhysicalAddressError,
    TvPollFailed,
}

impl Alert {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            0 => Alert::ServiceDevice,
            1 => Alert::ConnectionLost,
            2 => Alert::PermissionError,
            3 => Alert::PortBusy,
            4 => Alert::PhysicalAddressError,
            5 => Alert::TvPollFailed,
            _ => return None,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuState {
    Activated,
    Deactivated,
}

/// Audio status byte returned by the amplifier: bit 7 is the mute flag, the rest the volume
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioStatus {
    pub muted: bool,
    /// Volume in percent, `None` when the amplifier doesn't report it
    pub volume: Option<u8>,
}

impl AudioStatus {
    pub const VOLUME_UNKNOWN: u8 = 0x7F;

    pub fn to_byte(self) -> u8 {
        let mut b = self.volume.unwrap_or(Self::VOLUME_UNKNOWN) & 0x7F;
        if self.muted {
            b |= 1 << 7;
        }
        b
    }
}

impl From<u8> for AudioStatus {
    fn from(b: u8) -> Self {
        let volume = b & 0x7F;
        AudioStatus {
            muted: b & 0x80 != 0,
            volume: if volume == Self::VOLUME_UNKNOWN {
                None
            } else {
                Some(volume)
            },
        }
    }
}

impl fmt::Display for AudioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.volume {
            Some(volume) => write!(f, "volume: {}%", volume)?,
            None => write!(f, "volume: unknown")?,
        }
        if self.muted {
            write!(f, " (muted)")?;
        }
        Ok(())
    }
}

/// Target of a stream path change: either a device or a position in the HDMI topology
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamPath {
    Logical(LogicalAddress),
    Physical(PhysicalAddress),
}

impl FromStr for StreamPath {
    type Err = CecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('.') {
            Ok(StreamPath::Physical(s.parse()?))
        } else {
            Ok(StreamPath::Logical(s.parse()?))
        }
    }
}
