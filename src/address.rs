//! Logical and physical CEC addresses
use std::{convert::TryFrom, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::CecError;

/// A 4-bit logical address on the CEC bus (0 to 15 inclusively)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct LogicalAddress(u8);

impl LogicalAddress {
    pub const TV: LogicalAddress = LogicalAddress(0);
    pub const RECORDING_DEVICE_1: LogicalAddress = LogicalAddress(1);
    pub const RECORDING_DEVICE_2: LogicalAddress = LogicalAddress(2);
    pub const TUNER_1: LogicalAddress = LogicalAddress(3);
    pub const PLAYBACK_DEVICE_1: LogicalAddress = LogicalAddress(4);
    pub const AUDIO_SYSTEM: LogicalAddress = LogicalAddress(5);
    pub const TUNER_2: LogicalAddress = LogicalAddress(6);
    pub const TUNER_3: LogicalAddress = LogicalAddress(7);
    pub const PLAYBACK_DEVICE_2: LogicalAddress = LogicalAddress(8);
    pub const RECORDING_DEVICE_3: LogicalAddress = LogicalAddress(9);
    pub const TUNER_4: LogicalAddress = LogicalAddress(10);
    pub const PLAYBACK_DEVICE_3: LogicalAddress = LogicalAddress(11);
    pub const RESERVED_1: LogicalAddress = LogicalAddress(12);
    pub const RESERVED_2: LogicalAddress = LogicalAddress(13);
    pub const FREE_USE: LogicalAddress = LogicalAddress(14);
    pub const UNREGISTERED: LogicalAddress = LogicalAddress(15);
    /// Same value as `UNREGISTERED`, used as a destination
    pub const BROADCAST: LogicalAddress = LogicalAddress(15);

    pub const MAX: u8 = 15;

    pub fn new(value: i64) -> Result<Self, CecError> {
        if (0..=Self::MAX as i64).contains(&value) {
            Ok(LogicalAddress(value as u8))
        } else {
            Err(CecError::InvalidLogicalAddress(value))
        }
    }

    /// Iterates over every valid logical address
    pub fn all() -> impl Iterator<Item = LogicalAddress> {
        (0..=Self::MAX).map(LogicalAddress)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Human readable role associated with this address
    pub fn role(self) -> &'static str {
        match self.0 {
            0 => "TV",
            1 => "Recorder 1",
            2 => "Recorder 2",
            3 => "Tuner 1",
            4 => "Playback 1",
            5 => "Audio",
            6 => "Tuner 2",
            7 => "Tuner 3",
            8 => "Playback 2",
            9 => "Recorder 3",
            10 => "Tuner 4",
            11 => "Playback 3",
            12 => "Reserved 1",
            13 => "Reserved 2",
            14 => "Free use",
            _ => "Broadcast",
        }
    }
}

impl TryFrom<u8> for LogicalAddress {
    type Error = CecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value as i64)
    }
}

impl From<LogicalAddress> for u8 {
    fn from(addr: LogicalAddress) -> Self {
        addr.0
    }
}

impl FromStr for LogicalAddress {
    type Err = CecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s
            .trim()
            .parse()
            .map_err(|_| CecError::UnparsableLogicalAddress(s.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A physical (HDMI topology) address, written as `a.b.c.d` with one hex digit per level
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PhysicalAddress(pub u16);

impl PhysicalAddress {
    /// Value reported by libcec when a device's address is unknown
    pub const INVALID: PhysicalAddress = PhysicalAddress(0xFFFF);

    pub fn nibbles(self) -> [u8; 4] {
        let v = self.0;
        [
            ((v >> 12) & 0xF) as u8,
            ((v >> 8) & 0xF) as u8,
            ((v >> 4) & 0xF) as u8,
            (v & 0xF) as u8,
        ]
    }
}

impl FromStr for PhysicalAddress {
    type Err = CecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CecError::InvalidPhysicalAddress(s.to_string());

        let parts: Vec<_> = s.split('.').collect();
        if parts.len() != 4 {
            return Err(invalid());
        }

        let mut value: u16 = 0;
        for part in parts {
            let part = part.trim();
            // from_str_radix accepts a leading sign, which isn't a valid address part
            if part.is_empty() || part.starts_with('+') || part.starts_with('-') {
                return Err(invalid());
            }
            let nibble = u16::from_str_radix(part, 16).map_err(|_| invalid())?;
            if nibble > 0xF {
                return Err(invalid());
            }
            value = (value << 4) | nibble;
        }

        Ok(PhysicalAddress(value))
    }
}

impl TryFrom<String> for PhysicalAddress {
    type Error = CecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PhysicalAddress> for String {
    fn from(addr: PhysicalAddress) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.nibbles();
        write!(f, "{:x}.{:x}.{:x}.{:x}", a, b, c, d)
    }
}
