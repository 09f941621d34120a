//! Handle on a single device of the bus
use std::fmt;

use log::debug;
use serde::Serialize;

use crate::{
    address::{LogicalAddress, PhysicalAddress},
    model::{opcode, user_control, CecVersion, Command, PowerStatus, VendorId},
    Cec, Result,
};

/// A device addressed by its logical address.
///
/// Attributes are read from the bus once, when the handle is created. The handle keeps the
/// session alive but owns nothing else.
#[derive(Clone, Serialize)]
pub struct Device {
    #[serde(skip)]
    cec: Cec,

    address: LogicalAddress,
    physical_address: PhysicalAddress,
    vendor: VendorId,
    osd_string: String,
    cec_version: CecVersion,
    language: String,
}

impl Device {
    /// Queries the device at `address`. The session must be open.
    pub fn new(cec: &Cec, address: LogicalAddress) -> Result<Self> {
        cec.ensure_open()?;
        let backend = cec.backend();

        let device = Device {
            cec: cec.clone(),
            address,
            vendor: backend.vendor_id(address)?,
            physical_address: backend.physical_address(address)?,
            cec_version: backend.cec_version(address)?,
            osd_string: backend.osd_name(address)?,
            language: backend.menu_language(address)?,
        };
        debug!(
            "device {}: vendor={} physical={} version={} osd={:?}",
            address, device.vendor, device.physical_address, device.cec_version, device.osd_string
        );

        Ok(device)
    }

    pub fn address(&self) -> LogicalAddress {
        self.address
    }

    pub fn physical_address(&self) -> PhysicalAddress {
        self.physical_address
    }

    pub fn vendor(&self) -> VendorId {
        self.vendor
    }

    /// Name the device reports for on-screen display
    pub fn osd_string(&self) -> &str {
        &self.osd_string
    }

    pub fn cec_version(&self) -> CecVersion {
        self.cec_version
    }

    /// Menu language, as an ISO 639-2 code
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn power_status(&self) -> Result<PowerStatus> {
        self.cec.ensure_open()?;
        self.cec.backend().power_status(self.address)
    }

    /// Get device power status. Fails if the device didn't report it.
    pub fn is_on(&self) -> Result<bool> {
        self.power_status()?.is_on()
    }

    /// Power on this device. Only sends the request, poll `is_on` to see it take effect.
    pub fn power_on(&self) -> Result<bool> {
        self.cec.ensure_open()?;
        self.cec.backend().power_on(self.address)
    }

    /// Put this device into standby. Only sends the request, poll `is_on` to see it take effect.
    pub fn standby(&self) -> Result<bool> {
        self.cec.ensure_open()?;
        self.cec.backend().standby(self.address)
    }

    /// Select AV input
    pub fn set_av_input(&self, input: u8) -> Result<bool> {
        self.user_control(user_control::SELECT_AV_INPUT, input)
    }

    /// Select audio input
    pub fn set_audio_input(&self, input: u8) -> Result<bool> {
        self.user_control(user_control::SELECT_AUDIO_INPUT, input)
    }

    fn user_control(&self, code: u8, operand: u8) -> Result<bool> {
        self.cec.ensure_open()?;
        let backend = self.cec.backend();
        let command = Command::new(
            backend.primary_address()?,
            self.address,
            opcode::USER_CONTROL_PRESSED,
        )
        .with_parameters(&[code, operand]);

        backend.transmit(&command)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CEC Device {}", self.address)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device({})", self.address)
    }
}
