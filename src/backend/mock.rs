//! In-process simulation of a CEC bus, used by tests and `--mock`
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, RwLock},
    time::{Duration, Instant},
};

use log::debug;

use super::{Backend, CecError};
use crate::{
    address::{LogicalAddress, PhysicalAddress},
    config::{Config, MockConfig, MockDeviceConfig},
    events::{Event, EventSink},
    model::{
        opcode, AdapterDescriptor, AdapterType, AudioStatus, CecVersion, Command, DeviceType,
        LogLevel, PowerStatus, VendorId,
    },
};

/// A simulated device on the bus
#[derive(Clone, Debug)]
pub struct MockDevice {
    pub physical_address: PhysicalAddress,
    pub vendor: VendorId,
    pub osd_name: String,
    pub cec_version: CecVersion,
    pub language: String,
    power: PowerStatus,
    // Power state reached once the deadline passes
    pending: Option<(PowerStatus, Instant)>,
}

impl MockDevice {
    fn settle(&mut self, now: Instant) {
        if let Some((target, due)) = self.pending {
            if now >= due {
                self.power = target;
                self.pending = None;
            }
        }
    }

    fn request(&mut self, target: PowerStatus, transition: Duration, now: Instant) {
        self.settle(now);
        if self.power == target && self.pending.is_none() {
            return;
        }

        self.power = match target {
            PowerStatus::On => PowerStatus::InTransitionStandbyToOn,
            _ => PowerStatus::InTransitionOnToStandby,
        };
        self.pending = Some((target, now + transition));
        self.settle(now);
    }
}

impl From<&MockDeviceConfig> for MockDevice {
    fn from(cfg: &MockDeviceConfig) -> Self {
        MockDevice {
            physical_address: cfg.physical_address,
            vendor: cfg.vendor,
            osd_name: cfg.osd_name.clone(),
            cec_version: cfg.cec_version,
            language: cfg.language.clone(),
            power: cfg.power,
            pending: None,
        }
    }
}

struct MockState {
    adapters: Vec<String>,
    open: Option<String>,
    fail_open: bool,
    can_persist: bool,
    config_unavailable: bool,
    primary: LogicalAddress,
    physical_address: PhysicalAddress,
    devices: BTreeMap<LogicalAddress, MockDevice>,
    transition: Duration,
    audio: AudioStatus,
    stream_path: Option<PhysicalAddress>,
    hdmi_port: Option<(LogicalAddress, u8)>,
    transmitted: Vec<Command>,
}

pub struct MockBackend {
    state: Mutex<MockState>,
    sink: RwLock<Option<EventSink>>,
    epoch: Instant,
}

fn primary_for(device_type: Option<&DeviceType>) -> LogicalAddress {
    match device_type {
        Some(DeviceType::Tv) => LogicalAddress::TV,
        Some(DeviceType::Tuner) => LogicalAddress::TUNER_1,
        Some(DeviceType::PlaybackDevice) => LogicalAddress::PLAYBACK_DEVICE_1,
        Some(DeviceType::AudioSystem) => LogicalAddress::AUDIO_SYSTEM,
        Some(DeviceType::RecordingDevice) | Some(DeviceType::Reserved) | None => {
            LogicalAddress::RECORDING_DEVICE_1
        }
    }
}

impl MockBackend {
    pub fn new(mock: &MockConfig, config: &Config) -> Self {
        let devices = mock
            .devices
            .iter()
            .map(|d| (d.address, MockDevice::from(d)))
            .collect();

        MockBackend {
            state: Mutex::new(MockState {
                adapters: mock.adapters.clone(),
                open: None,
                fail_open: false,
                can_persist: true,
                config_unavailable: false,
                primary: primary_for(config.device_types.first()),
                physical_address: PhysicalAddress(0x1100),
                devices,
                transition: Duration::from_millis(mock.transition_ms),
                audio: AudioStatus {
                    muted: false,
                    volume: Some(30),
                },
                stream_path: None,
                hdmi_port: None,
                transmitted: Vec::new(),
            }),
            sink: RwLock::new(None),
            epoch: Instant::now(),
        }
    }

    /// Uses the `[mock]` section of `config`, or the default simulated bus
    pub fn from_config(config: &Config) -> Self {
        let mock = config.mock.clone().unwrap_or_default();
        Self::new(&mock, config)
    }

    /// A bus without any adapter attached
    pub fn without_adapters() -> Self {
        let mock = MockConfig {
            adapters: Vec::new(),
            ..Default::default()
        };
        Self::new(&mock, &Config::default())
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn opened(&self) -> Result<MutexGuard<'_, MockState>, CecError> {
        let state = self.lock();
        if state.open.is_none() {
            return Err(CecError::NotInitialized);
        }
        Ok(state)
    }

    /// Delivers an event as if it came from the bus
    pub fn inject(&self, event: Event) {
        let sink = self
            .sink
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    fn emit_all(&self, events: Vec<Event>) {
        for event in events {
            self.inject(event);
        }
    }

    fn log(&self, level: LogLevel, message: String) -> Event {
        Event::log(level, self.epoch.elapsed(), message)
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.lock().fail_open = fail;
    }

    pub fn set_can_persist(&self, can_persist: bool) {
        self.lock().can_persist = can_persist;
    }

    /// Makes reading back the adapter configuration fail when persisting it
    pub fn set_config_unavailable(&self, unavailable: bool) {
        self.lock().config_unavailable = unavailable;
    }

    pub fn set_transition(&self, transition: Duration) {
        self.lock().transition = transition;
    }

    pub fn add_device(&self, addr: LogicalAddress, device: MockDevice) {
        self.lock().devices.insert(addr, device);
    }

    /// Commands sent through `transmit`, oldest first
    pub fn transmitted(&self) -> Vec<Command> {
        self.lock().transmitted.clone()
    }

    pub fn stream_path(&self) -> Option<PhysicalAddress> {
        self.lock().stream_path
    }

    pub fn hdmi_port(&self) -> Option<(LogicalAddress, u8)> {
        self.lock().hdmi_port
    }

    fn request_power(&self, addr: LogicalAddress, target: PowerStatus) -> Result<bool, CecError> {
        let mut state = self.opened()?;
        let primary = state.primary;
        let transition = state.transition;
        let op = match target {
            PowerStatus::On => opcode::IMAGE_VIEW_ON,
            _ => opcode::STANDBY,
        };
        let request = Command::new(primary, addr, op);

        let reply = state.devices.get_mut(&addr).map(|device| {
            device.request(target, transition, Instant::now());
            Command::new(addr, primary, opcode::REPORT_POWER_STATUS)
                .with_parameters(&[device.power as u8])
        });
        drop(state);

        let reply = match reply {
            Some(reply) => reply,
            None => {
                let nack = self.log(LogLevel::Traffic, format!("<< {} (nack)", request));
                self.inject(nack);
                return Ok(false);
            }
        };

        debug!("power request {} -> {}", request, reply);
        self.emit_all(vec![
            self.log(LogLevel::Traffic, format!("<< {}", request)),
            self.log(LogLevel::Traffic, format!(">> {}", reply)),
            Event::Command(reply),
        ]);
        Ok(true)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl Backend for MockBackend {
    fn detect_adapters(&self) -> Result<Vec<AdapterDescriptor>, CecError> {
        let state = self.lock();
        Ok(state
            .adapters
            .iter()
            .enumerate()
            .map(|(i, port)| AdapterDescriptor {
                port: port.clone(),
                path: format!("/sys/devices/mock/{}", i),
                vendor_id: 0x2548,
                product_id: 0x1002,
                firmware_version: 12,
                firmware_build_date: 0,
                physical_address: state.physical_address,
                adapter_type: AdapterType::P8External,
            })
            .collect())
    }

    fn set_event_sink(&self, sink: EventSink) {
        *self.sink.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    fn open(&self, port: &str, _timeout: Duration) -> Result<(), CecError> {
        let mut state = self.lock();
        if state.open.is_some() {
            return Err(CecError::AlreadyOpen);
        }
        if state.fail_open || !state.adapters.iter().any(|p| p == port) {
            return Err(CecError::OpenFailed(port.to_string()));
        }
        state.open = Some(port.to_string());
        let primary = state.primary;
        drop(state);

        self.emit_all(vec![
            self.log(LogLevel::Notice, format!("connection opened on {}", port)),
            self.log(
                LogLevel::Notice,
                format!("logical address {} claimed", primary),
            ),
        ]);
        Ok(())
    }

    fn close(&self) {
        if self.lock().open.take().is_some() {
            let event = self.log(LogLevel::Notice, "connection closed".to_string());
            self.inject(event);
        }
    }

    fn active_devices(&self) -> Result<Vec<LogicalAddress>, CecError> {
        let state = self.opened()?;
        let mut addrs: Vec<_> = state.devices.keys().copied().collect();
        if !addrs.contains(&state.primary) {
            addrs.push(state.primary);
            addrs.sort();
        }
        Ok(addrs)
    }

    fn primary_address(&self) -> Result<LogicalAddress, CecError> {
        Ok(self.opened()?.primary)
    }

    fn vendor_id(&self, addr: LogicalAddress) -> Result<VendorId, CecError> {
        let state = self.opened()?;
        Ok(state.devices.get(&addr).map(|d| d.vendor).unwrap_or_default())
    }

    fn physical_address(&self, addr: LogicalAddress) -> Result<PhysicalAddress, CecError> {
        let state = self.opened()?;
        if addr == state.primary {
            return Ok(state.physical_address);
        }
        Ok(state
            .devices
            .get(&addr)
            .map(|d| d.physical_address)
            .unwrap_or(PhysicalAddress::INVALID))
    }

    fn cec_version(&self, addr: LogicalAddress) -> Result<CecVersion, CecError> {
        let state = self.opened()?;
        Ok(state
            .devices
            .get(&addr)
            .map(|d| d.cec_version)
            .unwrap_or(CecVersion::Unknown))
    }

    fn osd_name(&self, addr: LogicalAddress) -> Result<String, CecError> {
        let state = self.opened()?;
        Ok(state
            .devices
            .get(&addr)
            .map(|d| d.osd_name.clone())
            .unwrap_or_default())
    }

    fn menu_language(&self, addr: LogicalAddress) -> Result<String, CecError> {
        let state = self.opened()?;
        Ok(state
            .devices
            .get(&addr)
            .map(|d| d.language.clone())
            .unwrap_or_else(|| "???".to_string()))
    }

    fn power_status(&self, addr: LogicalAddress) -> Result<PowerStatus, CecError> {
        let mut state = self.opened()?;
        let now = Instant::now();
        Ok(match state.devices.get_mut(&addr) {
            Some(device) => {
                device.settle(now);
                device.power
            }
            None => PowerStatus::Unknown,
        })
    }

    fn power_on(&self, addr: LogicalAddress) -> Result<bool, CecError> {
        self.request_power(addr, PowerStatus::On)
    }

    fn standby(&self, addr: LogicalAddress) -> Result<bool, CecError> {
        self.request_power(addr, PowerStatus::Standby)
    }

    fn transmit(&self, command: &Command) -> Result<bool, CecError> {
        let mut state = self.opened()?;
        if command.parameters.len() > Command::MAX_PARAMETERS {
            return Err(CecError::TransmitFailed);
        }
        state.transmitted.push(command.clone());
        let acked = command.destination == LogicalAddress::BROADCAST
            || state.devices.contains_key(&command.destination);
        drop(state);

        let event = self.log(LogLevel::Traffic, format!("<< {}", command));
        self.inject(event);
        Ok(acked)
    }

    fn volume_up(&self) -> Result<u8, CecError> {
        let mut state = self.opened()?;
        let volume = state.audio.volume.unwrap_or(0);
        state.audio.volume = Some((volume + 1).min(100));
        Ok(state.audio.to_byte())
    }

    fn volume_down(&self) -> Result<u8, CecError> {
        let mut state = self.opened()?;
        let volume = state.audio.volume.unwrap_or(0);
        state.audio.volume = Some(volume.saturating_sub(1));
        Ok(state.audio.to_byte())
    }

    fn toggle_mute(&self) -> Result<u8, CecError> {
        let mut state = self.opened()?;
        state.audio.muted = !state.audio.muted;
        Ok(state.audio.to_byte())
    }

    fn set_stream_path_logical(&self, addr: LogicalAddress) -> Result<bool, CecError> {
        let mut state = self.opened()?;
        let physical = match state.devices.get(&addr) {
            Some(device) => device.physical_address,
            None => return Ok(false),
        };
        state.stream_path = Some(physical);
        Ok(true)
    }

    fn set_stream_path_physical(&self, addr: PhysicalAddress) -> Result<bool, CecError> {
        self.opened()?.stream_path = Some(addr);
        Ok(true)
    }

    fn set_physical_address(&self, addr: PhysicalAddress) -> Result<bool, CecError> {
        self.opened()?.physical_address = addr;
        Ok(true)
    }

    fn set_hdmi_port(&self, base_device: LogicalAddress, port: u8) -> Result<bool, CecError> {
        let mut state = self.opened()?;
        state.hdmi_port = Some((base_device, port));
        if let Some(base) = state.devices.get(&base_device) {
            // The adapter takes the next level below its base device
            let base = base.physical_address.0;
            let shift = (0..4).find(|n| (base >> (n * 4)) & 0xF != 0).unwrap_or(4);
            if shift > 0 {
                state.physical_address = PhysicalAddress(base | ((port as u16) << ((shift - 1) * 4)));
            }
        }
        Ok(true)
    }

    fn can_persist_configuration(&self) -> Result<bool, CecError> {
        Ok(self.opened()?.can_persist)
    }

    fn persist_configuration(&self) -> Result<bool, CecError> {
        let state = self.opened()?;
        if state.config_unavailable {
            return Err(CecError::ConfigurationUnavailable);
        }
        Ok(state.can_persist)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn opened() -> MockBackend {
        let backend = MockBackend::default();
        backend.open("MOCK0", Duration::from_secs(1)).unwrap();
        backend
    }

    #[test]
    fn test_power_transition() {
        let backend = opened();
        backend.set_transition(Duration::from_secs(3600));

        assert_eq!(
            backend.power_status(LogicalAddress::TV).unwrap(),
            PowerStatus::Standby
        );
        assert!(backend.power_on(LogicalAddress::TV).unwrap());
        assert_eq!(
            backend.power_status(LogicalAddress::TV).unwrap(),
            PowerStatus::InTransitionStandbyToOn
        );
    }

    #[test]
    fn test_power_immediate() {
        let backend = opened();
        assert!(backend.power_on(LogicalAddress::TV).unwrap());
        assert_eq!(
            backend.power_status(LogicalAddress::TV).unwrap(),
            PowerStatus::On
        );
        assert!(backend.standby(LogicalAddress::TV).unwrap());
        assert_eq!(
            backend.power_status(LogicalAddress::TV).unwrap(),
            PowerStatus::Standby
        );
    }

    #[test]
    fn test_absent_device() {
        let backend = opened();
        let addr = LogicalAddress::TUNER_4;
        assert_eq!(backend.power_status(addr).unwrap(), PowerStatus::Unknown);
        assert!(!backend.power_on(addr).unwrap());
        assert_eq!(
            backend.physical_address(addr).unwrap(),
            PhysicalAddress::INVALID
        );
        assert_eq!(backend.cec_version(addr).unwrap(), CecVersion::Unknown);
    }

    #[test]
    fn test_requires_open() {
        let backend = MockBackend::default();
        assert!(matches!(
            backend.power_status(LogicalAddress::TV),
            Err(CecError::NotInitialized)
        ));
        assert!(backend.open("nope", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_set_hdmi_port() {
        let backend = opened();
        // The audio system sits at 1.0.0.0
        backend
            .set_hdmi_port(LogicalAddress::AUDIO_SYSTEM, 2)
            .unwrap();
        assert_eq!(
            backend.physical_address(LogicalAddress::RECORDING_DEVICE_1).unwrap(),
            PhysicalAddress(0x1200)
        );
        assert_eq!(
            backend.hdmi_port(),
            Some((LogicalAddress::AUDIO_SYSTEM, 2))
        );
    }
}
