//! Session configuration, loadable from a TOML file
use std::{fs, path::Path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    address::{LogicalAddress, PhysicalAddress},
    model::{CecVersion, DeviceType, PowerStatus, VendorId},
    CecError,
};

/// Main configuration file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name announced on the bus (at most 13 characters)
    pub device_name: String,

    /// Device types the adapter registers as, at most 5
    pub device_types: Vec<DeviceType>,

    /// Make this adapter the active source once opened
    pub activate_source: bool,

    /// How long libcec may take to open the adapter
    pub open_timeout_ms: u64,

    /// Adapter to open instead of the first detected one
    pub port: Option<String>,

    /// Time given to a device to change its power state in the power test
    pub settle_secs: u64,

    /// Simulated bus used by `--mock`
    pub mock: Option<MockConfig>,
}

impl Config {
    pub const MAX_DEVICE_NAME_LEN: usize = 13;
    pub const MAX_DEVICE_TYPES: usize = 5;

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CecError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        text.parse()
            .map_err(|e: CecError| CecError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<(), CecError> {
        if self.device_name.is_empty()
            || self.device_name.len() > Self::MAX_DEVICE_NAME_LEN
            || !self.device_name.is_ascii()
        {
            return Err(CecError::InvalidDeviceName(self.device_name.clone()));
        }
        if self.device_types.is_empty() || self.device_types.len() > Self::MAX_DEVICE_TYPES {
            return Err(CecError::Config(format!(
                "between 1 and {} device types are required",
                Self::MAX_DEVICE_TYPES
            )));
        }
        Ok(())
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn settle_time(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_name: "cec-rs".to_string(),
            device_types: vec![DeviceType::RecordingDevice],
            activate_source: false,
            open_timeout_ms: 10_000,
            port: None,
            settle_secs: 30,
            mock: None,
        }
    }
}

impl FromStr for Config {
    type Err = CecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s).map_err(|e| CecError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Describes the simulated bus
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Ports reported by adapter detection
    pub adapters: Vec<String>,

    /// How long a simulated device takes to settle after a power request
    pub transition_ms: u64,

    #[serde(rename = "device")]
    pub devices: Vec<MockDeviceConfig>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            adapters: vec!["MOCK0".to_string()],
            transition_ms: 0,
            devices: vec![
                MockDeviceConfig {
                    address: LogicalAddress::TV,
                    physical_address: PhysicalAddress(0x0000),
                    vendor: VendorId(0x00_F0_00),
                    osd_name: "TV".to_string(),
                    cec_version: CecVersion::V1_4,
                    language: "eng".to_string(),
                    power: PowerStatus::Standby,
                },
                MockDeviceConfig {
                    address: LogicalAddress::AUDIO_SYSTEM,
                    physical_address: PhysicalAddress(0x1000),
                    vendor: VendorId(0x00_80_45),
                    osd_name: "Receiver".to_string(),
                    cec_version: CecVersion::V1_4,
                    language: "eng".to_string(),
                    power: PowerStatus::On,
                },
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MockDeviceConfig {
    pub address: LogicalAddress,
    pub physical_address: PhysicalAddress,
    pub vendor: VendorId,
    pub osd_name: String,
    pub cec_version: CecVersion,
    pub language: String,
    pub power: PowerStatus,
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.device_types, vec![DeviceType::RecordingDevice]);
        assert!(!config.activate_source);
    }

    #[test]
    fn test_parse() {
        let config: Config = r#"
            device_name = "living-room"
            device_types = ["playback_device", "audio_system"]
            port = "/dev/ttyACM0"
            settle_secs = 5

            [mock]
            adapters = ["A", "B"]

            [[mock.device]]
            address = 0
            physical_address = "0.0.0.0"
            vendor = "00903E"
            osd_name = "Panel"
            cec_version = "1.3a"
            language = "fre"
            power = "standby"
        "#
        .parse()
        .unwrap();

        assert_eq!(config.device_name, "living-room");
        assert_eq!(config.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.settle_time(), Duration::from_secs(5));
        let mock = config.mock.unwrap();
        assert_eq!(mock.adapters, vec!["A", "B"]);
        assert_eq!(mock.devices[0].vendor, VendorId(0x00903E));
        assert_eq!(mock.devices[0].cec_version, CecVersion::V1_3a);
    }

    #[test]
    fn test_invalid_device_name() {
        let res: Result<Config, _> = r#"device_name = "a-name-that-is-too-long""#.parse();
        assert!(matches!(res, Err(CecError::InvalidDeviceName(_))));
    }

    #[test]
    fn test_invalid_logical_address() {
        let res: Result<Config, _> = r#"
            [[mock.device]]
            address = 16
            physical_address = "0.0.0.0"
            vendor = "000000"
            osd_name = "x"
            cec_version = "1.4"
            language = "eng"
            power = "on"
        "#
        .parse();
        assert!(matches!(res, Err(CecError::Config(_))));
    }

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "activate_source = true").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!(config.activate_source);

        assert!(Config::load("/nonexistent/cec.toml").is_err());
    }
}
