mod test_utils;
use test_utils::{session, Recorder};

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, Mutex,
    },
    thread,
    time::Duration,
};

use cec::{
    model::{opcode, Keypress, LogLevel},
    CecError, Event, EventMask, LogicalAddress, EVENT_ALL, EVENT_LOG,
};

#[test]
fn test_log_filtering() -> anyhow::Result<()> {
    let (_, cec) = session();
    let without_log = Recorder::new();
    let only_log = Recorder::new();
    cec.add_callback(EVENT_ALL - EVENT_LOG, without_log.callback())?;
    cec.add_callback(EVENT_LOG, only_log.callback())?;

    cec.init()?;
    assert!(cec.device(LogicalAddress::TV)?.power_on()?);

    let events = without_log.events();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.kind() != EventMask::LOG));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::Command(c) if c.opcode == Some(opcode::REPORT_POWER_STATUS)
            && c.initiator == LogicalAddress::TV
    )));

    let logs = only_log.events();
    assert!(!logs.is_empty());
    assert!(logs.iter().all(|e| matches!(e, Event::Log { .. })));
    Ok(())
}

#[test]
fn test_registered_before_init() -> anyhow::Result<()> {
    let (_, cec) = session();
    let recorder = Recorder::new();
    cec.add_callback(EventMask::LOG, recorder.callback())?;
    assert!(recorder.events().is_empty());

    cec.init()?;
    let opened = recorder.events().into_iter().any(|e| match e {
        Event::Log { level, message, .. } => {
            level == LogLevel::Notice && message.contains("MOCK0")
        }
        _ => false,
    });
    assert!(opened);
    Ok(())
}

#[test]
fn test_callback_uses_session_during_init() -> anyhow::Result<()> {
    let (_, cec) = session();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let session = cec.clone();
    let states = seen.clone();
    cec.add_callback(EventMask::LOG, move |_: &Event| {
        let state = (session.is_open(), session.port());
        states.lock().unwrap().push(state);
    })?;

    let (done_tx, done_rx) = mpsc::channel();
    let opener = cec.clone();
    thread::spawn(move || {
        let _ = done_tx.send(opener.init());
    });
    done_rx.recv_timeout(Duration::from_secs(3))??;

    assert!(cec.is_open());
    let seen = seen.lock().unwrap();
    assert!(!seen.is_empty());
    // The adapter only counts as open once the backend returned
    assert!(seen.iter().all(|(open, port)| !open && port.is_none()));
    Ok(())
}

#[test]
fn test_injected_events() -> anyhow::Result<()> {
    let (backend, cec) = session();
    let keys = Recorder::new();
    let activations = Recorder::new();
    cec.add_callback(EventMask::KEYPRESS, keys.callback())?;
    cec.add_callback(
        EventMask::ACTIVATED | EventMask::MENU_CHANGED,
        activations.callback(),
    )?;

    let keypress = Keypress {
        keycode: 0x41,
        duration: Duration::from_millis(500),
    };
    backend.inject(Event::KeyPress(keypress));
    backend.inject(Event::ConfigChange);
    backend.inject(Event::Activated {
        address: LogicalAddress::RECORDING_DEVICE_1,
        activated: true,
    });

    assert_eq!(keys.events(), vec![Event::KeyPress(keypress)]);
    assert_eq!(activations.events().len(), 1);
    assert_eq!(activations.events()[0].kind(), EventMask::ACTIVATED);
    Ok(())
}

#[test]
fn test_registration_order() -> anyhow::Result<()> {
    let (backend, cec) = session();
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    for n in 0..3 {
        let counter = counter.clone();
        let seen = seen.clone();
        cec.add_callback(EventMask::CONFIG_CHANGE, move |_: &Event| {
            counter.fetch_add(1, Ordering::SeqCst);
            seen.lock().unwrap().push(n);
        })?;
    }
    backend.inject(Event::ConfigChange);

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    Ok(())
}

#[test]
fn test_remove_callback() -> anyhow::Result<()> {
    let (backend, cec) = session();
    let recorder = Recorder::new();
    let id = cec.add_callback(EventMask::ALL, recorder.callback())?;

    backend.inject(Event::ConfigChange);
    assert!(cec.remove_callback(id));
    assert!(!cec.remove_callback(id));
    backend.inject(Event::ConfigChange);

    assert_eq!(recorder.events().len(), 1);
    Ok(())
}

#[test]
fn test_panicking_callback() -> anyhow::Result<()> {
    let (backend, cec) = session();
    cec.add_callback(EventMask::ALL, |_: &Event| panic!("boom"))?;
    let recorder = Recorder::new();
    cec.add_callback(EventMask::ALL, recorder.callback())?;

    backend.inject(Event::ConfigChange);
    backend.inject(Event::ConfigChange);
    assert_eq!(recorder.events().len(), 2);
    Ok(())
}

#[test]
fn test_empty_mask() {
    let (_, cec) = session();
    let res = cec.add_callback(EventMask::LOG - EventMask::LOG, |_: &Event| {});
    assert!(matches!(res, Err(CecError::InvalidEventMask)));
}

#[tokio::test]
async fn test_subscribe() -> anyhow::Result<()> {
    let (_, cec) = session();
    let mut rx = cec.subscribe();

    cec.init()?;
    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await??;
    assert_eq!(event.kind(), EventMask::LOG);
    Ok(())
}
