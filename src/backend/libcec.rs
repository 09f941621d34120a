//! Backend driving a real adapter through libcec
use std::{
    ffi::{CStr, CString},
    mem,
    os::raw::{c_char, c_int, c_void},
    panic::{self, AssertUnwindSafe},
    ptr,
    sync::{Mutex, RwLock},
    time::Duration,
};

use libcec_sys::{
    cec_adapter_descriptor, cec_alert, cec_command, cec_datapacket, cec_device_type,
    cec_device_type_list, cec_keypress, cec_log_message, cec_logical_address, cec_menu_state,
    cec_opcode, cec_parameter, libcec_audio_toggle_mute, libcec_can_persist_configuration,
    libcec_clear_configuration, libcec_close, libcec_configuration, libcec_connection_t,
    libcec_destroy, libcec_detect_adapters, libcec_get_active_devices,
    libcec_get_device_cec_version, libcec_get_device_menu_language,
    libcec_get_device_osd_name, libcec_get_device_physical_address,
    libcec_get_current_configuration, libcec_get_device_power_status,
    libcec_get_device_vendor_id, libcec_get_logical_addresses,
    libcec_init_video_standalone, libcec_initialise, libcec_open, libcec_persist_configuration,
    libcec_power_on_devices, libcec_set_hdmi_port, libcec_set_physical_address,
    libcec_set_stream_path_logical, libcec_set_stream_path_physical, libcec_standby_devices,
    libcec_transmit, libcec_volume_down, libcec_volume_up, ICECCallbacks,
};
use log::{debug, warn};

use super::{Backend, CecError};
use crate::{
    address::{LogicalAddress, PhysicalAddress},
    config::Config,
    events::{Event, EventSink},
    model::{
        opcode, AdapterDescriptor, AdapterType, Alert, CecVersion, Command, DeviceType,
        Keypress, LogLevel, MenuState, PowerStatus, VendorId,
    },
};

// Upper bound on the number of adapters enumerated in one call
const MAX_ADAPTERS: usize = 10;
// cec_osd_name and cec_menu_language sizes in libcec 4
const OSD_NAME_SIZE: usize = 15;
const MENU_LANGUAGE_SIZE: usize = 4;

/// State reachable from the libcec callbacks through `callbackParam`
struct CallbackContext {
    sink: RwLock<Option<EventSink>>,
}

impl CallbackContext {
    fn emit(&self, event: Event) {
        let sink = self
            .sink
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }
}

/// Runs `f` against the context, never letting a panic unwind into libcec
unsafe fn with_context(param: *mut c_void, f: impl FnOnce(&CallbackContext)) {
    if param.is_null() {
        return;
    }
    let context = &*(param as *const CallbackContext);
    if panic::catch_unwind(AssertUnwindSafe(|| f(context))).is_err() {
        warn!("panic while delivering a libcec callback");
    }
}

unsafe extern "C" fn on_log_message(param: *mut c_void, message: *const cec_log_message) {
    if message.is_null() {
        return;
    }
    let message = &*message;
    let text = if message.message.is_null() {
        String::new()
    } else {
        CStr::from_ptr(message.message).to_string_lossy().into_owned()
    };
    let event = Event::log(
        LogLevel::from_raw(message.level as i32),
        Duration::from_millis(message.time.max(0) as u64),
        text,
    );
    with_context(param, |ctx| ctx.emit(event));
}

unsafe extern "C" fn on_key_press(param: *mut c_void, key: *const cec_keypress) {
    if key.is_null() {
        return;
    }
    let key = &*key;
    let event = Event::KeyPress(Keypress {
        keycode: key.keycode as i32 as u8,
        duration: Duration::from_millis(key.duration as u64),
    });
    with_context(param, |ctx| ctx.emit(event));
}

unsafe extern "C" fn on_command_received(param: *mut c_void, command: *const cec_command) {
    if command.is_null() {
        return;
    }
    if let Some(command) = command_from_ffi(&*command) {
        with_context(param, |ctx| ctx.emit(Event::Command(command)));
    }
}

unsafe extern "C" fn on_configuration_changed(
    param: *mut c_void,
    _config: *const libcec_configuration,
) {
    with_context(param, |ctx| ctx.emit(Event::ConfigChange))
}

// The alert parameter isn't decoded, libcec only fills it for a few alerts
unsafe extern "C" fn on_alert(param: *mut c_void, alert: cec_alert, _data: cec_parameter) {
    if let Some(alert) = Alert::from_raw(alert as i32) {
        with_context(param, |ctx| ctx.emit(Event::Alert { alert, param: None }))
    }
}

unsafe extern "C" fn on_menu_state_changed(param: *mut c_void, state: cec_menu_state) -> c_int {
    let state = if state as i32 == 0 {
        MenuState::Activated
    } else {
        MenuState::Deactivated
    };
    with_context(param, |ctx| ctx.emit(Event::MenuChanged { state }));
    1
}

unsafe extern "C" fn on_source_activated(
    param: *mut c_void,
    addr: cec_logical_address,
    activated: u8,
) {
    if let Ok(address) = LogicalAddress::new(addr as i64) {
        with_context(param, |ctx| {
            ctx.emit(Event::Activated {
                address,
                activated: activated != 0,
            })
        })
    }
}

fn logical_to_ffi(addr: LogicalAddress) -> cec_logical_address {
    match addr.value() {
        0 => cec_logical_address::CECDEVICE_TV,
        1 => cec_logical_address::CECDEVICE_RECORDINGDEVICE1,
        2 => cec_logical_address::CECDEVICE_RECORDINGDEVICE2,
        3 => cec_logical_address::CECDEVICE_TUNER1,
        4 => cec_logical_address::CECDEVICE_PLAYBACKDEVICE1,
        5 => cec_logical_address::CECDEVICE_AUDIOSYSTEM,
        6 => cec_logical_address::CECDEVICE_TUNER2,
        7 => cec_logical_address::CECDEVICE_TUNER3,
        8 => cec_logical_address::CECDEVICE_PLAYBACKDEVICE2,
        9 => cec_logical_address::CECDEVICE_RECORDINGDEVICE3,
        10 => cec_logical_address::CECDEVICE_TUNER4,
        11 => cec_logical_address::CECDEVICE_PLAYBACKDEVICE3,
        12 => cec_logical_address::CECDEVICE_RESERVED1,
        13 => cec_logical_address::CECDEVICE_RESERVED2,
        14 => cec_logical_address::CECDEVICE_FREEUSE,
        _ => cec_logical_address::CECDEVICE_UNREGISTERED,
    }
}

fn logical_from_ffi(addr: cec_logical_address) -> Option<LogicalAddress> {
    LogicalAddress::new(addr as i64).ok()
}

fn device_type_to_ffi(device_type: DeviceType) -> cec_device_type {
    match device_type {
        DeviceType::Tv => cec_device_type::TV,
        DeviceType::RecordingDevice => cec_device_type::RECORDING_DEVICE,
        DeviceType::Reserved => cec_device_type::RESERVED,
        DeviceType::Tuner => cec_device_type::TUNER,
        DeviceType::PlaybackDevice => cec_device_type::PLAYBACK_DEVICE,
        DeviceType::AudioSystem => cec_device_type::AUDIO_SYSTEM,
    }
}

fn opcode_to_ffi(op: u8) -> Result<cec_opcode, CecError> {
    Ok(match op {
        opcode::ACTIVE_SOURCE => cec_opcode::ACTIVE_SOURCE,
        opcode::IMAGE_VIEW_ON => cec_opcode::IMAGE_VIEW_ON,
        opcode::TEXT_VIEW_ON => cec_opcode::TEXT_VIEW_ON,
        opcode::STANDBY => cec_opcode::STANDBY,
        opcode::USER_CONTROL_PRESSED => cec_opcode::USER_CONTROL_PRESSED,
        opcode::USER_CONTROL_RELEASE => cec_opcode::USER_CONTROL_RELEASE,
        opcode::GIVE_OSD_NAME => cec_opcode::GIVE_OSD_NAME,
        opcode::SET_OSD_NAME => cec_opcode::SET_OSD_NAME,
        opcode::REPORT_AUDIO_STATUS => cec_opcode::REPORT_AUDIO_STATUS,
        opcode::GIVE_DEVICE_POWER_STATUS => cec_opcode::GIVE_DEVICE_POWER_STATUS,
        opcode::REPORT_POWER_STATUS => cec_opcode::REPORT_POWER_STATUS,
        opcode::GIVE_DEVICE_VENDOR_ID => cec_opcode::GIVE_DEVICE_VENDOR_ID,
        opcode::DEVICE_VENDOR_ID => cec_opcode::DEVICE_VENDOR_ID,
        opcode::SET_STREAM_PATH => cec_opcode::SET_STREAM_PATH,
        other => return Err(CecError::UnsupportedOpcode(other)),
    })
}

fn command_to_ffi(command: &Command) -> Result<cec_command, CecError> {
    if command.parameters.len() > Command::MAX_PARAMETERS {
        return Err(CecError::TransmitFailed);
    }
    let mut parameters = cec_datapacket {
        data: [0; 64],
        size: command.parameters.len() as u8,
    };
    parameters.data[..command.parameters.len()].copy_from_slice(&command.parameters);

    Ok(cec_command {
        initiator: logical_to_ffi(command.initiator),
        destination: logical_to_ffi(command.destination),
        ack: command.ack as i8,
        eom: command.eom as i8,
        opcode: match command.opcode {
            Some(op) => opcode_to_ffi(op)?,
            None => cec_opcode::NONE,
        },
        parameters,
        opcode_set: command.opcode.is_some() as i8,
        transmit_timeout: command.transmit_timeout.as_millis().min(i32::MAX as u128) as i32,
    })
}

fn command_from_ffi(command: &cec_command) -> Option<Command> {
    let size = (command.parameters.size as usize).min(command.parameters.data.len());
    Some(Command {
        initiator: logical_from_ffi(command.initiator)?,
        destination: logical_from_ffi(command.destination)?,
        ack: command.ack != 0,
        eom: command.eom != 0,
        opcode: if command.opcode_set != 0 {
            Some(command.opcode as i32 as u8)
        } else {
            None
        },
        parameters: command.parameters.data[..size].to_vec(),
        transmit_timeout: Duration::from_millis(command.transmit_timeout.max(0) as u64),
    })
}

fn c_chars_to_string(chars: &[c_char]) -> String {
    let bytes: Vec<u8> = chars
        .iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// A libcec connection
pub struct LibCec {
    conn: libcec_connection_t,
    // libcec keeps pointers to these for the lifetime of the connection
    _config: Box<libcec_configuration>,
    _callbacks: Box<ICECCallbacks>,
    context: Box<CallbackContext>,
    // libcec isn't reentrant for open/close
    open_lock: Mutex<()>,
}

// libcec serializes access to the adapter internally
unsafe impl Send for LibCec {}
unsafe impl Sync for LibCec {}

impl LibCec {
    pub fn new(config: &Config) -> Result<Self, CecError> {
        config.validate()?;

        let context = Box::new(CallbackContext {
            sink: RwLock::new(None),
        });

        let mut callbacks: Box<ICECCallbacks> = Box::new(unsafe { mem::zeroed() });
        callbacks.logMessage = Some(on_log_message);
        callbacks.keyPress = Some(on_key_press);
        callbacks.commandReceived = Some(on_command_received);
        callbacks.configurationChanged = Some(on_configuration_changed);
        callbacks.alert = Some(on_alert);
        callbacks.menuStateChanged = Some(on_menu_state_changed);
        callbacks.sourceActivated = Some(on_source_activated);

        let mut cfg: Box<libcec_configuration> = Box::new(unsafe { mem::zeroed() });
        unsafe { libcec_clear_configuration(cfg.as_mut()) };

        let name = config.device_name.as_bytes();
        for (dst, src) in cfg.strDeviceName.iter_mut().zip(name.iter()) {
            *dst = *src as c_char;
        }
        cfg.strDeviceName[name.len().min(cfg.strDeviceName.len() - 1)] = 0;

        let mut types = cec_device_type_list {
            types: [cec_device_type::RESERVED; 5],
        };
        for (slot, device_type) in types.types.iter_mut().zip(config.device_types.iter()) {
            *slot = device_type_to_ffi(*device_type);
        }
        cfg.deviceTypes = types;
        cfg.bActivateSource = config.activate_source as u8;
        cfg.callbackParam = context.as_ref() as *const CallbackContext as *mut c_void;
        cfg.callbacks = callbacks.as_mut();

        let conn = unsafe { libcec_initialise(cfg.as_mut()) };
        if conn.is_null() {
            return Err(CecError::LibInitFailed);
        }
        unsafe { libcec_init_video_standalone(conn) };
        debug!("libcec initialised as {:?}", config.device_name);

        Ok(LibCec {
            conn,
            _config: cfg,
            _callbacks: callbacks,
            context,
            open_lock: Mutex::new(()),
        })
    }

    fn check(&self, ret: c_int) -> bool {
        ret != 0
    }
}

impl Drop for LibCec {
    fn drop(&mut self) {
        unsafe {
            libcec_close(self.conn);
            libcec_destroy(self.conn);
        }
    }
}

impl Backend for LibCec {
    fn detect_adapters(&self) -> Result<Vec<AdapterDescriptor>, CecError> {
        let mut list: Vec<cec_adapter_descriptor> =
            (0..MAX_ADAPTERS).map(|_| unsafe { mem::zeroed() }).collect();
        let count = unsafe {
            libcec_detect_adapters(
                self.conn,
                list.as_mut_ptr(),
                MAX_ADAPTERS as u8,
                ptr::null(),
                1,
            )
        };
        if count < 0 {
            return Ok(Vec::new());
        }

        Ok(list
            .iter()
            .take((count as usize).min(MAX_ADAPTERS))
            .map(|d| {
                if !crate::HAVE_ADAPTER_DESCRIPTOR {
                    return AdapterDescriptor::from_port(c_chars_to_string(&d.strComName));
                }
                AdapterDescriptor {
                    port: c_chars_to_string(&d.strComName),
                    path: c_chars_to_string(&d.strComPath),
                    vendor_id: d.iVendorId,
                    product_id: d.iProductId,
                    firmware_version: d.iFirmwareVersion,
                    firmware_build_date: d.iFirmwareBuildDate,
                    physical_address: PhysicalAddress(d.iPhysicalAddress),
                    adapter_type: AdapterType::from_raw(d.adapterType as i32),
                }
            })
            .collect())
    }

    fn has_adapter_descriptors(&self) -> bool {
        crate::HAVE_ADAPTER_DESCRIPTOR
    }

    fn set_event_sink(&self, sink: EventSink) {
        *self
            .context
            .sink
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(sink);
    }

    fn open(&self, port: &str, timeout: Duration) -> Result<(), CecError> {
        let _guard = self.open_lock.lock().unwrap_or_else(|e| e.into_inner());
        let c_port = CString::new(port).map_err(|_| CecError::OpenFailed(port.to_string()))?;
        let ret = unsafe { libcec_open(self.conn, c_port.as_ptr(), timeout.as_millis() as u32) };
        if !self.check(ret) {
            return Err(CecError::OpenFailed(port.to_string()));
        }
        Ok(())
    }

    fn close(&self) {
        let _guard = self.open_lock.lock().unwrap_or_else(|e| e.into_inner());
        unsafe { libcec_close(self.conn) };
    }

    fn active_devices(&self) -> Result<Vec<LogicalAddress>, CecError> {
        let addresses = unsafe { libcec_get_active_devices(self.conn) };
        Ok(LogicalAddress::all()
            .filter(|addr| addresses.addresses[addr.value() as usize] != 0)
            .collect())
    }

    fn primary_address(&self) -> Result<LogicalAddress, CecError> {
        let addresses = unsafe { libcec_get_logical_addresses(self.conn) };
        logical_from_ffi(addresses.primary).ok_or(CecError::NotInitialized)
    }

    fn vendor_id(&self, addr: LogicalAddress) -> Result<VendorId, CecError> {
        let vendor = unsafe { libcec_get_device_vendor_id(self.conn, logical_to_ffi(addr)) };
        Ok(VendorId(vendor as u32))
    }

    fn physical_address(&self, addr: LogicalAddress) -> Result<PhysicalAddress, CecError> {
        let pa = unsafe { libcec_get_device_physical_address(self.conn, logical_to_ffi(addr)) };
        Ok(PhysicalAddress(pa))
    }

    fn cec_version(&self, addr: LogicalAddress) -> Result<CecVersion, CecError> {
        let version = unsafe { libcec_get_device_cec_version(self.conn, logical_to_ffi(addr)) };
        Ok(CecVersion::from_raw(version as i32))
    }

    fn osd_name(&self, addr: LogicalAddress) -> Result<String, CecError> {
        let mut name = [0 as c_char; OSD_NAME_SIZE];
        unsafe {
            libcec_get_device_osd_name(self.conn, logical_to_ffi(addr), name.as_mut_ptr());
        }
        Ok(c_chars_to_string(&name))
    }

    fn menu_language(&self, addr: LogicalAddress) -> Result<String, CecError> {
        let mut language = [0 as c_char; MENU_LANGUAGE_SIZE];
        unsafe {
            libcec_get_device_menu_language(self.conn, logical_to_ffi(addr), language.as_mut_ptr());
        }
        Ok(c_chars_to_string(&language))
    }

    fn power_status(&self, addr: LogicalAddress) -> Result<PowerStatus, CecError> {
        let status = unsafe { libcec_get_device_power_status(self.conn, logical_to_ffi(addr)) };
        Ok(PowerStatus::from_raw(status as i32))
    }

    fn power_on(&self, addr: LogicalAddress) -> Result<bool, CecError> {
        Ok(self.check(unsafe { libcec_power_on_devices(self.conn, logical_to_ffi(addr)) }))
    }

    fn standby(&self, addr: LogicalAddress) -> Result<bool, CecError> {
        Ok(self.check(unsafe { libcec_standby_devices(self.conn, logical_to_ffi(addr)) }))
    }

    fn transmit(&self, command: &Command) -> Result<bool, CecError> {
        let command = command_to_ffi(command)?;
        Ok(self.check(unsafe { libcec_transmit(self.conn, &command) }))
    }

    fn volume_up(&self) -> Result<u8, CecError> {
        Ok(unsafe { libcec_volume_up(self.conn, 1) })
    }

    fn volume_down(&self) -> Result<u8, CecError> {
        Ok(unsafe { libcec_volume_down(self.conn, 1) })
    }

    fn toggle_mute(&self) -> Result<u8, CecError> {
        Ok(unsafe { libcec_audio_toggle_mute(self.conn) })
    }

    fn set_stream_path_logical(&self, addr: LogicalAddress) -> Result<bool, CecError> {
        Ok(self.check(unsafe { libcec_set_stream_path_logical(self.conn, logical_to_ffi(addr)) }))
    }

    fn set_stream_path_physical(&self, addr: PhysicalAddress) -> Result<bool, CecError> {
        Ok(self.check(unsafe { libcec_set_stream_path_physical(self.conn, addr.0) }))
    }

    fn set_physical_address(&self, addr: PhysicalAddress) -> Result<bool, CecError> {
        Ok(self.check(unsafe { libcec_set_physical_address(self.conn, addr.0) }))
    }

    fn set_hdmi_port(&self, base_device: LogicalAddress, port: u8) -> Result<bool, CecError> {
        Ok(self.check(unsafe {
            libcec_set_hdmi_port(self.conn, logical_to_ffi(base_device), port)
        }))
    }

    fn can_persist_configuration(&self) -> Result<bool, CecError> {
        Ok(self.check(unsafe { libcec_can_persist_configuration(self.conn) }))
    }

    fn persist_configuration(&self) -> Result<bool, CecError> {
        let mut current: libcec_configuration = unsafe { mem::zeroed() };
        unsafe { libcec_clear_configuration(&mut current) };
        if !self.check(unsafe { libcec_get_current_configuration(self.conn, &mut current) }) {
            return Err(CecError::ConfigurationUnavailable);
        }
        Ok(self.check(unsafe { libcec_persist_configuration(self.conn, &mut current) }))
    }
}
