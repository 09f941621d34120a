mod test_utils;
use test_utils::{session, session_with};

use std::{thread, time::Duration};

use cec::{
    backend::mock::MockBackend, model::opcode, Cec, CecError, CecVersion, Config,
    LogicalAddress, PhysicalAddress, PowerStatus, StreamPath, VendorId,
};

#[test]
fn test_no_adapters() {
    let cec = Cec::new(MockBackend::without_adapters(), Config::default());
    assert!(cec.list_adapters().unwrap().is_empty());
    assert!(matches!(cec.init(), Err(CecError::NoAdapterFound)));
    assert!(!cec.is_open());
}

#[test]
fn test_list_adapters_before_init() {
    let (_, cec) = session();
    let adapters = cec.list_adapters().unwrap();
    assert_eq!(adapters.len(), 1);
    assert_eq!(adapters[0].port, "MOCK0");
    assert!(cec.has_adapter_descriptors());
}

#[test]
fn test_device_attributes() -> anyhow::Result<()> {
    let (_, cec) = session();
    cec.init()?;
    assert_eq!(cec.port().as_deref(), Some("MOCK0"));

    let tv = cec.device(LogicalAddress::TV)?;
    assert_eq!(tv.address(), LogicalAddress::TV);
    assert_eq!(tv.physical_address(), PhysicalAddress(0x0000));
    assert_eq!(tv.physical_address().to_string(), "0.0.0.0");
    assert_eq!(tv.vendor(), VendorId(0x00F000));
    assert_eq!(tv.vendor().to_string(), "00F000");
    assert_eq!(tv.osd_string(), "TV");
    assert_eq!(tv.cec_version(), CecVersion::V1_4);
    assert_eq!(tv.cec_version().to_string(), "1.4");
    assert_eq!(tv.language(), "eng");
    assert!(!tv.is_on()?);

    assert_eq!(tv.to_string(), "CEC Device 0");
    assert_eq!(format!("{:?}", tv), "Device(0)");
    Ok(())
}

#[test]
fn test_absent_device() -> anyhow::Result<()> {
    let (_, cec) = session();
    cec.init()?;

    let dev = cec.device(LogicalAddress::new(10)?)?;
    assert_eq!(dev.physical_address(), PhysicalAddress::INVALID);
    assert_eq!(dev.power_status()?, PowerStatus::Unknown);
    assert!(matches!(dev.is_on(), Err(CecError::PowerStatusUnknown)));
    assert!(!dev.power_on()?);
    Ok(())
}

#[test]
fn test_power_toggle() -> anyhow::Result<()> {
    let (backend, cec) = session();
    cec.init()?;
    backend.set_transition(Duration::from_millis(50));

    let tv = cec.device(LogicalAddress::TV)?;
    assert!(!tv.is_on()?);

    assert!(tv.power_on()?);
    assert_eq!(tv.power_status()?, PowerStatus::InTransitionStandbyToOn);
    assert!(!tv.is_on()?);
    thread::sleep(Duration::from_millis(200));
    assert!(tv.is_on()?);

    assert!(tv.standby()?);
    assert_eq!(tv.power_status()?, PowerStatus::InTransitionOnToStandby);
    assert!(tv.is_on()?);
    thread::sleep(Duration::from_millis(200));
    assert!(!tv.is_on()?);
    Ok(())
}

#[test]
fn test_requires_init() {
    let (_, cec) = session();
    assert!(matches!(
        cec.device(LogicalAddress::TV),
        Err(CecError::NotInitialized)
    ));
    assert!(matches!(cec.list_devices(), Err(CecError::NotInitialized)));
    assert!(matches!(cec.volume_up(), Err(CecError::NotInitialized)));
    assert!(matches!(cec.toggle_mute(), Err(CecError::NotInitialized)));
    assert!(matches!(
        cec.set_stream_path(StreamPath::Logical(LogicalAddress::TV)),
        Err(CecError::NotInitialized)
    ));
    assert!(matches!(
        cec.set_physical_address(PhysicalAddress(0x1000)),
        Err(CecError::NotInitialized)
    ));
    assert!(matches!(
        cec.set_port(LogicalAddress::TV, 1),
        Err(CecError::NotInitialized)
    ));
    assert!(matches!(
        cec.persist_config(),
        Err(CecError::NotInitialized)
    ));
}

#[test]
fn test_device_outlives_close() -> anyhow::Result<()> {
    let (_, cec) = session();
    cec.init()?;
    let tv = cec.device(LogicalAddress::TV)?;

    cec.close();
    assert!(!cec.is_open());
    assert!(matches!(tv.power_on(), Err(CecError::NotInitialized)));
    // Attributes stay readable
    assert_eq!(tv.osd_string(), "TV");

    cec.init()?;
    assert!(tv.power_on()?);
    Ok(())
}

#[test]
fn test_already_open() -> anyhow::Result<()> {
    let (_, cec) = session();
    cec.init()?;
    assert!(matches!(cec.init(), Err(CecError::AlreadyOpen)));
    assert!(matches!(cec.open("MOCK0"), Err(CecError::AlreadyOpen)));

    // Clones share the session
    let other = cec.clone();
    assert!(other.is_open());
    Ok(())
}

#[test]
fn test_open_failed() {
    let (backend, cec) = session();
    backend.set_fail_open(true);
    match cec.init() {
        Err(CecError::OpenFailed(port)) => assert_eq!(port, "MOCK0"),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!cec.is_open());

    let config = Config {
        port: Some("/dev/missing".to_string()),
        ..Default::default()
    };
    let (_, cec) = session_with(config);
    assert!(matches!(cec.init(), Err(CecError::OpenFailed(port)) if port == "/dev/missing"));
}

#[test]
fn test_list_devices() -> anyhow::Result<()> {
    let (_, cec) = session();
    cec.init()?;

    let devices = cec.list_devices()?;
    let addrs: Vec<u8> = devices.keys().map(|a| a.value()).collect();
    assert_eq!(addrs, vec![0, 1, 5]);

    // The adapter itself
    let own = &devices[&LogicalAddress::RECORDING_DEVICE_1];
    assert_eq!(own.physical_address().to_string(), "1.1.0.0");
    assert_eq!(devices[&LogicalAddress::AUDIO_SYSTEM].osd_string(), "Receiver");
    Ok(())
}

#[test]
fn test_inputs() -> anyhow::Result<()> {
    let (backend, cec) = session();
    cec.init()?;

    let tv = cec.device(LogicalAddress::TV)?;
    assert!(tv.set_av_input(3)?);
    assert!(tv.set_audio_input(1)?);

    let sent = backend.transmitted();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].initiator, LogicalAddress::RECORDING_DEVICE_1);
    assert_eq!(sent[0].destination, LogicalAddress::TV);
    assert_eq!(sent[0].opcode, Some(opcode::USER_CONTROL_PRESSED));
    assert_eq!(sent[0].parameters, vec![0x69, 3]);
    assert_eq!(sent[1].parameters, vec![0x6A, 1]);
    assert_eq!(sent[0].to_string(), "10:44:69:03");
    Ok(())
}

#[test]
fn test_volume() -> anyhow::Result<()> {
    let (_, cec) = session();
    cec.init()?;

    let status = cec.volume_up()?;
    assert_eq!(status.volume, Some(31));
    assert!(!status.muted);
    assert_eq!(cec.volume_down()?.volume, Some(30));

    let status = cec.toggle_mute()?;
    assert!(status.muted);
    assert_eq!(status.to_string(), "volume: 30% (muted)");
    assert!(!cec.toggle_mute()?.muted);
    Ok(())
}

#[test]
fn test_stream_path() -> anyhow::Result<()> {
    let (backend, cec) = session();
    cec.init()?;

    assert!(cec.set_stream_path("5".parse()?)?);
    assert_eq!(backend.stream_path(), Some(PhysicalAddress(0x1000)));

    assert!(cec.set_stream_path("2.0.0.0".parse()?)?);
    assert_eq!(backend.stream_path(), Some(PhysicalAddress(0x2000)));

    // Nobody at that address
    assert!(!cec.set_stream_path("9".parse()?)?);
    assert!("16".parse::<StreamPath>().is_err());
    Ok(())
}

#[test]
fn test_physical_address_and_port() -> anyhow::Result<()> {
    let (backend, cec) = session();
    assert!(matches!(
        cec.set_port(LogicalAddress::TV, 16),
        Err(CecError::InvalidPort(16))
    ));

    cec.init()?;
    assert!(cec.set_physical_address("3.0.0.0".parse()?)?);
    let own = cec.device(LogicalAddress::RECORDING_DEVICE_1)?;
    assert_eq!(own.physical_address(), PhysicalAddress(0x3000));

    assert!(cec.set_port(LogicalAddress::TV, 2)?);
    assert_eq!(backend.hdmi_port(), Some((LogicalAddress::TV, 2)));
    let own = cec.device(LogicalAddress::RECORDING_DEVICE_1)?;
    assert_eq!(own.physical_address().to_string(), "2.0.0.0");
    Ok(())
}

#[test]
fn test_persist_config() -> anyhow::Result<()> {
    let (backend, cec) = session();
    cec.init()?;

    assert!(cec.can_persist_config()?);
    assert!(cec.persist_config()?);

    backend.set_config_unavailable(true);
    assert!(cec.can_persist_config()?);
    assert!(matches!(
        cec.persist_config(),
        Err(CecError::ConfigurationUnavailable)
    ));
    backend.set_config_unavailable(false);

    backend.set_can_persist(false);
    assert!(!cec.can_persist_config()?);
    assert!(matches!(cec.persist_config(), Err(CecError::CannotPersist)));
    Ok(())
}
