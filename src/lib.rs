//! This crate provides a thin, safe layer over libcec for controlling HDMI-CEC devices.
//! Start by creating a [`Cec`] session around a backend: [`backend::libcec::LibCec`] (feature
//! `libcec`) talks to a real adapter, [`backend::mock::MockBackend`] simulates a bus.
//!
//! ```no_run
//! use cec::{backend::mock::MockBackend, Cec, Config, Event, EventMask, LogicalAddress};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let cec = Cec::new(MockBackend::default(), config);
//!
//!     // Callbacks may be registered before the adapter is opened
//!     cec.add_callback(EventMask::ALL - EventMask::LOG, |event: &Event| {
//!         println!("Got event {}", event);
//!     })?;
//!
//!     if cec.list_adapters()?.is_empty() {
//!         return Ok(());
//!     }
//!     cec.init()?;
//!
//!     let tv = cec.device(LogicalAddress::TV)?;
//!     println!("{} is on: {}", tv.osd_string(), tv.is_on()?);
//!     tv.power_on()?;
//!     Ok(())
//! }
//! ```

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, info};
use tokio::sync::broadcast;

pub mod address;
pub mod backend;
pub mod config;
pub mod device;
pub mod events;
pub mod model;

pub use address::{LogicalAddress, PhysicalAddress};
use backend::Backend;
pub use backend::CecError;
pub use config::Config;
pub use device::Device;
pub use events::{CallbackId, CallbackRegistry, Event, EventMask};
pub use model::{AdapterDescriptor, AudioStatus, CecVersion, PowerStatus, StreamPath, VendorId};

pub type Result<T, E = CecError> = core::result::Result<T, E>;

/// Whether this build's libcec enumerates adapters with their full descriptors
pub const HAVE_ADAPTER_DESCRIPTOR: bool = cfg!(any(not(feature = "libcec"), cec_adapter_descriptor));

/// Version of the libcec this crate was built against
pub const CEC_LIB_VERSION: Option<&str> = option_env!("CEC_LIB_VERSION");

pub const EVENT_LOG: EventMask = EventMask::LOG;
pub const EVENT_KEYPRESS: EventMask = EventMask::KEYPRESS;
pub const EVENT_COMMAND: EventMask = EventMask::COMMAND;
pub const EVENT_CONFIG_CHANGE: EventMask = EventMask::CONFIG_CHANGE;
pub const EVENT_ALERT: EventMask = EventMask::ALERT;
pub const EVENT_MENU_CHANGED: EventMask = EventMask::MENU_CHANGED;
pub const EVENT_ACTIVATED: EventMask = EventMask::ACTIVATED;
pub const EVENT_ALL: EventMask = EventMask::ALL;

// Never held across a backend call: backends deliver events while opening
#[derive(Clone, Debug, PartialEq, Eq)]
enum PortState {
    Closed,
    Opening(String),
    Open(String),
}

struct Inner {
    backend: Box<dyn Backend>,
    config: Config,
    callbacks: Arc<CallbackRegistry>,
    port: Mutex<PortState>,
}

/// A libcec session. Clones share the same session.
#[derive(Clone)]
pub struct Cec {
    inner: Arc<Inner>,
}

impl Cec {
    pub fn new(backend: impl Backend + 'static, config: Config) -> Self {
        Self::from_boxed(Box::new(backend), config)
    }

    pub fn from_boxed(backend: Box<dyn Backend>, config: Config) -> Self {
        let callbacks = Arc::new(CallbackRegistry::new());
        backend.set_event_sink(callbacks.sink());

        Cec {
            inner: Arc::new(Inner {
                backend,
                config,
                callbacks,
                port: Mutex::new(PortState::Closed),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub(crate) fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    fn port_lock(&self) -> MutexGuard<'_, PortState> {
        self.inner.port.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lists the attached adapters. Doesn't require an open session.
    pub fn list_adapters(&self) -> Result<Vec<AdapterDescriptor>> {
        let adapters = self.backend().detect_adapters()?;
        debug!("found {} adapter(s)", adapters.len());
        Ok(adapters)
    }

    pub fn has_adapter_descriptors(&self) -> bool {
        self.backend().has_adapter_descriptors()
    }

    /// Opens the configured adapter, or the first one detected
    pub fn init(&self) -> Result<()> {
        let port = match &self.inner.config.port {
            Some(port) => port.clone(),
            None => self
                .list_adapters()?
                .into_iter()
                .next()
                .map(|adapter| adapter.port)
                .ok_or(CecError::NoAdapterFound)?,
        };

        self.open(&port)
    }

    /// Opens the adapter on the given port
    ///
    /// Callbacks may use the session while the adapter is being opened, it reports as closed
    /// until the backend is done.
    pub fn open(&self, port: &str) -> Result<()> {
        {
            let mut state = self.port_lock();
            if *state != PortState::Closed {
                return Err(CecError::AlreadyOpen);
            }
            *state = PortState::Opening(port.to_string());
        }

        let result = self.backend().open(port, self.inner.config.open_timeout());

        let mut state = self.port_lock();
        match result {
            Ok(()) => {
                info!("opened CEC adapter {}", port);
                *state = PortState::Open(port.to_string());
                Ok(())
            }
            Err(e) => {
                debug!("opening {} failed: {}", port, e);
                *state = PortState::Closed;
                Err(CecError::OpenFailed(port.to_string()))
            }
        }
    }

    /// Does nothing unless an adapter is open
    pub fn close(&self) {
        let port = {
            let mut state = self.port_lock();
            match &*state {
                PortState::Open(port) => {
                    let port = port.clone();
                    *state = PortState::Closed;
                    port
                }
                _ => return,
            }
        };
        self.backend().close();
        info!("closed CEC adapter {}", port);
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.port_lock(), PortState::Open(_))
    }

    /// Port of the currently open adapter
    pub fn port(&self) -> Option<String> {
        match &*self.port_lock() {
            PortState::Open(port) => Some(port.clone()),
            _ => None,
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CecError::NotInitialized)
        }
    }

    /// Registers a callback invoked for every event whose kind is in `mask`.
    /// Callbacks run on the thread delivering the event.
    pub fn add_callback(
        &self,
        mask: EventMask,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<CallbackId> {
        self.inner.callbacks.add(mask, callback)
    }

    /// Returns false when no such callback was registered
    pub fn remove_callback(&self, id: CallbackId) -> bool {
        self.inner.callbacks.remove(id)
    }

    /// Receives every event, regardless of registered callbacks
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.callbacks.subscribe()
    }

    /// Creates a handle on the device at `addr`, see [`Device::new`]
    pub fn device(&self, addr: LogicalAddress) -> Result<Device> {
        Device::new(self, addr)
    }

    /// Returns a handle for every active device on the bus
    pub fn list_devices(&self) -> Result<BTreeMap<LogicalAddress, Device>> {
        self.ensure_open()?;
        self.backend()
            .active_devices()?
            .into_iter()
            .map(|addr| Ok((addr, Device::new(self, addr)?)))
            .collect()
    }

    pub fn volume_up(&self) -> Result<AudioStatus> {
        self.ensure_open()?;
        Ok(self.backend().volume_up()?.into())
    }

    pub fn volume_down(&self) -> Result<AudioStatus> {
        self.ensure_open()?;
        Ok(self.backend().volume_down()?.into())
    }

    pub fn toggle_mute(&self) -> Result<AudioStatus> {
        self.ensure_open()?;
        Ok(self.backend().toggle_mute()?.into())
    }

    /// Switches the active stream to a device or HDMI input
    pub fn set_stream_path(&self, path: StreamPath) -> Result<bool> {
        self.ensure_open()?;
        match path {
            StreamPath::Logical(addr) => self.backend().set_stream_path_logical(addr),
            StreamPath::Physical(addr) => self.backend().set_stream_path_physical(addr),
        }
    }

    pub fn set_physical_address(&self, addr: PhysicalAddress) -> Result<bool> {
        self.ensure_open()?;
        self.backend().set_physical_address(addr)
    }

    /// Sets the HDMI port the adapter is connected to on `device`
    pub fn set_port(&self, device: LogicalAddress, port: u8) -> Result<bool> {
        if port > 15 {
            return Err(CecError::InvalidPort(port));
        }
        self.ensure_open()?;
        self.backend().set_hdmi_port(device, port)
    }

    /// Returns true if the current adapter can persist the CEC configuration
    pub fn can_persist_config(&self) -> Result<bool> {
        self.ensure_open()?;
        self.backend().can_persist_configuration()
    }

    /// Persists the current configuration to the adapter
    pub fn persist_config(&self) -> Result<bool> {
        if !self.can_persist_config()? {
            return Err(CecError::CannotPersist);
        }
        self.backend().persist_configuration()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.port.get_mut().unwrap_or_else(|e| e.into_inner());
        if let PortState::Open(_) = state {
            self.backend.close();
        }
    }
}
