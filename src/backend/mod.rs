//! Backend base trait for talking to the native CEC library
//!
//! Everything that touches the bus goes through [`Backend`]. [`libcec::LibCec`] drives a real
//! adapter through libcec, [`mock::MockBackend`] simulates a small bus in-process.
use std::{sync::Arc, time::Duration};

use thiserror::Error;

use crate::{
    address::{LogicalAddress, PhysicalAddress},
    events::EventSink,
    model::{AdapterDescriptor, CecVersion, Command, PowerStatus, VendorId},
};

#[cfg(feature = "libcec")]
pub mod libcec;
pub mod mock;

#[derive(Error, Debug)]
pub enum CecError {
    #[error("CEC isn't initialized, call init() or open() first")]
    NotInitialized,

    #[error("No default adapter found")]
    NoAdapterFound,

    #[error("An adapter is already open")]
    AlreadyOpen,

    #[error("CEC failed to open {0}")]
    OpenFailed(String),

    #[error("Failed to initialize libcec")]
    LibInitFailed,

    #[error("Logical address should be between 0 and 15, got {0}")]
    InvalidLogicalAddress(i64),

    #[error("Invalid logical address: {0:?}")]
    UnparsableLogicalAddress(String),

    #[error("Invalid physical address: {0:?}")]
    InvalidPhysicalAddress(String),

    #[error("Invalid port: {0}")]
    InvalidPort(u8),

    #[error("A callback must be registered for at least one event kind")]
    InvalidEventMask,

    #[error("Invalid device name: {0:?}")]
    InvalidDeviceName(String),

    #[error("Power status not found")]
    PowerStatusUnknown,

    #[error("Cannot persist configuration")]
    CannotPersist,

    #[error("Could not get configuration")]
    ConfigurationUnavailable,

    #[error("Transmit failed")]
    TransmitFailed,

    #[error("Opcode {0:#04x} cannot be sent through this backend")]
    UnsupportedOpcode(u8),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

/// Operations provided by the native library.
///
/// Calls block until the library answers. Implementations deliver bus events to the sink
/// given to [`Backend::set_event_sink`], from whatever thread they receive them on.
pub trait Backend: Send + Sync {
    /// Enumerates attached adapters, may be empty
    fn detect_adapters(&self) -> Result<Vec<AdapterDescriptor>, CecError>;

    /// Whether adapter descriptors carry more than the port name
    fn has_adapter_descriptors(&self) -> bool {
        true
    }

    fn set_event_sink(&self, sink: EventSink);

    fn open(&self, port: &str, timeout: Duration) -> Result<(), CecError>;
    fn close(&self);

    /// Addresses currently answering on the bus
    fn active_devices(&self) -> Result<Vec<LogicalAddress>, CecError>;
    /// Primary logical address claimed by the local adapter
    fn primary_address(&self) -> Result<LogicalAddress, CecError>;

    fn vendor_id(&self, addr: LogicalAddress) -> Result<VendorId, CecError>;
    fn physical_address(&self, addr: LogicalAddress) -> Result<PhysicalAddress, CecError>;
    fn cec_version(&self, addr: LogicalAddress) -> Result<CecVersion, CecError>;
    fn osd_name(&self, addr: LogicalAddress) -> Result<String, CecError>;
    fn menu_language(&self, addr: LogicalAddress) -> Result<String, CecError>;
    fn power_status(&self, addr: LogicalAddress) -> Result<PowerStatus, CecError>;

    /// Requests power on, returns whether the request was sent
    fn power_on(&self, addr: LogicalAddress) -> Result<bool, CecError>;
    /// Requests standby, returns whether the request was sent
    fn standby(&self, addr: LogicalAddress) -> Result<bool, CecError>;
    fn transmit(&self, command: &Command) -> Result<bool, CecError>;

    /// These return the raw audio status byte
    fn volume_up(&self) -> Result<u8, CecError>;
    fn volume_down(&self) -> Result<u8, CecError>;
    fn toggle_mute(&self) -> Result<u8, CecError>;

    fn set_stream_path_logical(&self, addr: LogicalAddress) -> Result<bool, CecError>;
    fn set_stream_path_physical(&self, addr: PhysicalAddress) -> Result<bool, CecError>;
    fn set_physical_address(&self, addr: PhysicalAddress) -> Result<bool, CecError>;
    fn set_hdmi_port(&self, base_device: LogicalAddress, port: u8) -> Result<bool, CecError>;

    fn can_persist_configuration(&self) -> Result<bool, CecError>;
    fn persist_configuration(&self) -> Result<bool, CecError>;
}

/// Lets a caller keep a handle on the backend it gave to a session
impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn detect_adapters(&self) -> Result<Vec<AdapterDescriptor>, CecError> {
        (**self).detect_adapters()
    }
    fn has_adapter_descriptors(&self) -> bool {
        (**self).has_adapter_descriptors()
    }
    fn set_event_sink(&self, sink: EventSink) {
        (**self).set_event_sink(sink)
    }
    fn open(&self, port: &str, timeout: Duration) -> Result<(), CecError> {
        (**self).open(port, timeout)
    }
    fn close(&self) {
        (**self).close()
    }
    fn active_devices(&self) -> Result<Vec<LogicalAddress>, CecError> {
        (**self).active_devices()
    }
    fn primary_address(&self) -> Result<LogicalAddress, CecError> {
        (**self).primary_address()
    }
    fn vendor_id(&self, addr: LogicalAddress) -> Result<VendorId, CecError> {
        (**self).vendor_id(addr)
    }
    fn physical_address(&self, addr: LogicalAddress) -> Result<PhysicalAddress, CecError> {
        (**self).physical_address(addr)
    }
    fn cec_version(&self, addr: LogicalAddress) -> Result<CecVersion, CecError> {
        (**self).cec_version(addr)
    }
    fn osd_name(&self, addr: LogicalAddress) -> Result<String, CecError> {
        (**self).osd_name(addr)
    }
    fn menu_language(&self, addr: LogicalAddress) -> Result<String, CecError> {
        (**self).menu_language(addr)
    }
    fn power_status(&self, addr: LogicalAddress) -> Result<PowerStatus, CecError> {
        (**self).power_status(addr)
    }
    fn power_on(&self, addr: LogicalAddress) -> Result<bool, CecError> {
        (**self).power_on(addr)
    }
    fn standby(&self, addr: LogicalAddress) -> Result<bool, CecError> {
        (**self).standby(addr)
    }
    fn transmit(&self, command: &Command) -> Result<bool, CecError> {
        (**self).transmit(command)
    }
    fn volume_up(&self) -> Result<u8, CecError> {
        (**self).volume_up()
    }
    fn volume_down(&self) -> Result<u8, CecError> {
        (**self).volume_down()
    }
    fn toggle_mute(&self) -> Result<u8, CecError> {
        (**self).toggle_mute()
    }
    fn set_stream_path_logical(&self, addr: LogicalAddress) -> Result<bool, CecError> {
        (**self).set_stream_path_logical(addr)
    }
    fn set_stream_path_physical(&self, addr: PhysicalAddress) -> Result<bool, CecError> {
        (**self).set_stream_path_physical(addr)
    }
    fn set_physical_address(&self, addr: PhysicalAddress) -> Result<bool, CecError> {
        (**self).set_physical_address(addr)
    }
    fn set_hdmi_port(&self, base_device: LogicalAddress, port: u8) -> Result<bool, CecError> {
        (**self).set_hdmi_port(base_device, port)
    }
    fn can_persist_configuration(&self) -> Result<bool, CecError> {
        (**self).can_persist_configuration()
    }
    fn persist_configuration(&self) -> Result<bool, CecError> {
        (**self).persist_configuration()
    }
}
