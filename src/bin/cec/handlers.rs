use std::{
    fmt,
    io::{self, Write},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{bail, Result};
use cec::{
    AdapterDescriptor, Cec, CecVersion, Device, Event, EventMask, LogicalAddress,
    PhysicalAddress, PowerStatus, VendorId,
};
use log::warn;
use serde::Serialize;
use tokio::time::sleep;

use super::{OutputFormat, PowerCommand, SubCommand, VolumeCommand};

pub(crate) async fn run_command(
    cec: &Cec,
    cmd: Option<SubCommand>,
    output: OutputFormat,
) -> Result<()> {
    match cmd {
        None | Some(SubCommand::Adapters) => {
            let adapters = AdapterList(cec.list_adapters()?);
            println!("{}", output.format(&adapters)?);
        }
        Some(SubCommand::Info {
            address,
            power_test,
            settle,
        }) => {
            let settle = settle
                .map(Duration::from_secs)
                .unwrap_or_else(|| cec.config().settle_time());
            run_info(cec, &mut io::stdout(), address, power_test, settle, output).await?
        }
        Some(SubCommand::Callbacks {
            wait,
            delay,
            with_log,
        }) => {
            run_callbacks(
                cec,
                Arc::new(Mutex::new(io::stdout())),
                Duration::from_secs(wait),
                Duration::from_secs(delay),
                with_log,
                output,
            )
            .await?
        }
        Some(SubCommand::Devices) => {
            cec.init()?;
            let devices = cec
                .list_devices()?
                .values()
                .map(DeviceReport::new)
                .collect::<Result<Vec<_>>>()?;
            println!("{}", output.format(&DeviceList(devices))?);
        }
        Some(SubCommand::Power { cmd }) => {
            cec.init()?;
            run_power(cec, cmd, output)?
        }
        Some(SubCommand::Volume { cmd }) => {
            cec.init()?;
            let status = match cmd {
                VolumeCommand::Up => cec.volume_up()?,
                VolumeCommand::Down => cec.volume_down()?,
                VolumeCommand::Mute => cec.toggle_mute()?,
            };
            println!("{}", output.format(&status)?);
        }
        Some(SubCommand::StreamPath { target }) => {
            cec.init()?;
            expect_ack(cec.set_stream_path(target)?, "stream path change")?
        }
        Some(SubCommand::PhysicalAddress { address }) => {
            cec.init()?;
            expect_ack(cec.set_physical_address(address)?, "physical address change")?
        }
        Some(SubCommand::Port { device, port }) => {
            cec.init()?;
            expect_ack(cec.set_port(device, port)?, "HDMI port change")?
        }
        Some(SubCommand::PersistConfig) => {
            cec.init()?;
            expect_ack(cec.persist_config()?, "configuration persistence")?
        }
    };

    Ok(())
}

fn expect_ack(acked: bool, what: &str) -> Result<()> {
    if !acked {
        bail!("{} was rejected by the adapter", what);
    }
    println!("ok");
    Ok(())
}

/// Lists adapters, opens the first one and prints a device's attributes.
/// Nothing is opened when no adapter is attached.
pub(crate) async fn run_info<W: Write>(
    cec: &Cec,
    out: &mut W,
    address: LogicalAddress,
    power_test: bool,
    settle: Duration,
    output: OutputFormat,
) -> Result<()> {
    let text = output == OutputFormat::Text;
    let adapters = cec.list_adapters()?;
    if text {
        writeln!(out, "{}", AdapterList(adapters.clone()))?;
    }
    let adapter = match adapters.first() {
        Some(adapter) => adapter,
        None => {
            if text {
                writeln!(out, "No adapters found")?;
            }
            return Ok(());
        }
    };

    if text {
        let port = cec.config().port.as_deref().unwrap_or(&adapter.port);
        writeln!(out, "Using Adapter {}", port)?;
    }
    cec.init()?;

    let device = cec.device(address)?;
    writeln!(out, "{}", output.format(&DeviceReport::new(&device)?)?)?;

    if power_test {
        writeln!(out, "Powering device on")?;
        writeln!(out, "{}", device.power_on()?)?;
        writeln!(out, "Sleeping to allow device to power on")?;
        sleep(settle).await;
        writeln!(out, "{}", device.is_on()?)?;

        writeln!(out, "Powering device off")?;
        writeln!(out, "{}", device.standby()?)?;
        writeln!(out, "Sleeping to allow device to power off")?;
        sleep(settle).await;
        writeln!(out, "{}", device.is_on()?)?;
    }

    if text {
        writeln!(out, "Success!")?;
    }
    Ok(())
}

/// Prints every event received until `wait` elapses or the user interrupts.
/// Events are written from the thread delivering them.
pub(crate) async fn run_callbacks<W: Write + Send + 'static>(
    cec: &Cec,
    out: Arc<Mutex<W>>,
    wait: Duration,
    delay: Duration,
    with_log: bool,
    output: OutputFormat,
) -> Result<()> {
    let events_out = out.clone();
    let print_event = move |event: &Event| {
        let line = match output.format(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("couldn't format event {:?}: {}", event, e);
                return;
            }
        };
        let mut out = events_out.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = writeln!(out, "Got event {}", line) {
            warn!("couldn't print event: {}", e);
        }
    };

    if with_log {
        cec.add_callback(EventMask::ALL, print_event)?;
    } else {
        cec.add_callback(EventMask::ALL - EventMask::LOG, print_event)?;
    }
    say(&out, "Callback added")?;
    sleep(delay).await;

    cec.init()?;
    say(&out, &format!("CEC initialized. Waiting {} seconds", wait.as_secs()))?;

    tokio::select! {
        _ = sleep(wait) => {}
        _ = tokio::signal::ctrl_c() => say(&out, "Interrupted")?,
    }
    Ok(())
}

fn say<W: Write>(out: &Mutex<W>, line: &str) -> io::Result<()> {
    writeln!(out.lock().unwrap_or_else(|e| e.into_inner()), "{}", line)
}

fn run_power(cec: &Cec, cmd: PowerCommand, output: OutputFormat) -> Result<()> {
    match cmd {
        PowerCommand::On { address } => {
            expect_ack(cec.device(address)?.power_on()?, "power on request")?
        }
        PowerCommand::Standby { address } => {
            expect_ack(cec.device(address)?.standby()?, "standby request")?
        }
        PowerCommand::Status { address } => {
            let status = PowerReport {
                address,
                power: cec.device(address)?.power_status()?,
            };
            println!("{}", output.format(&status)?);
        }
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(transparent)]
struct AdapterList(Vec<AdapterDescriptor>);

impl fmt::Display for AdapterList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "No adapters detected");
        }
        let strs: Vec<String> = self.0.iter().map(|a| a.to_string()).collect();
        write!(f, "Adapters: {}", strs.join(", "))
    }
}

#[derive(Serialize)]
struct DeviceReport {
    address: LogicalAddress,
    physical_address: PhysicalAddress,
    vendor: VendorId,
    osd: String,
    cec_version: CecVersion,
    language: String,
    power: PowerStatus,
    /// `None` when the device didn't report its power status
    on: Option<bool>,
}

impl DeviceReport {
    fn new(device: &Device) -> Result<Self> {
        let power = device.power_status()?;
        Ok(DeviceReport {
            address: device.address(),
            physical_address: device.physical_address(),
            vendor: device.vendor(),
            osd: device.osd_string().to_string(),
            cec_version: device.cec_version(),
            language: device.language().to_string(),
            power,
            on: power.is_on().ok(),
        })
    }
}

impl fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Address: {}", self.address)?;
        writeln!(f, "Physical Address: {}", self.physical_address)?;
        writeln!(f, "Vendor ID: {}", self.vendor)?;
        writeln!(f, "OSD: {}", self.osd)?;
        writeln!(f, "CEC Version: {}", self.cec_version)?;
        writeln!(f, "Language: {}", self.language)?;
        match self.on {
            Some(on) => write!(f, "ON: {}", on),
            None => write!(f, "ON: unknown"),
        }
    }
}

#[derive(Serialize)]
#[serde(transparent)]
struct DeviceList(Vec<DeviceReport>);

impl fmt::Display for DeviceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strs: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "{}", strs.join("\n\n"))
    }
}

#[derive(Serialize)]
struct PowerReport {
    address: LogicalAddress,
    power: PowerStatus,
}

impl fmt::Display for PowerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.address, self.power)
    }
}
