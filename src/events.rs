//! Bus events and callback registration
//!
//! The native library delivers events on its own thread(s). Every event goes through
//! [`CallbackRegistry::dispatch`], which invokes the callbacks whose mask matches the event kind
//! and forwards a copy to the async subscribers.
use std::{
    fmt,
    ops::{BitOr, BitOrAssign, Sub},
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
    time::Duration,
};

use log::{trace, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{
    address::LogicalAddress,
    model::{Alert, Command, Keypress, LogLevel, MenuState},
    CecError,
};

/// Bitmask of event kinds a callback is interested in
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventMask(u32);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);
    pub const LOG: EventMask = EventMask(0x0001);
    pub const KEYPRESS: EventMask = EventMask(0x0002);
    pub const COMMAND: EventMask = EventMask(0x0004);
    pub const CONFIG_CHANGE: EventMask = EventMask(0x0008);
    pub const ALERT: EventMask = EventMask(0x0010);
    pub const MENU_CHANGED: EventMask = EventMask(0x0020);
    pub const ACTIVATED: EventMask = EventMask(0x0040);
    pub const ALL: EventMask = EventMask(0xFFFF);

    pub const fn from_bits(bits: u32) -> Self {
        EventMask(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True when every bit of `other` is set in this mask
    pub const fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: EventMask) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for EventMask {
    type Output = EventMask;

    fn bitor(self, rhs: Self) -> Self::Output {
        EventMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for EventMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0
    }
}

/// Removes the bits of `rhs`, e.g. `EventMask::ALL - EventMask::LOG`
impl Sub for EventMask {
    type Output = EventMask;

    fn sub(self, rhs: Self) -> Self::Output {
        EventMask(self.0 & !rhs.0)
    }
}

impl fmt::Debug for EventMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventMask({:#06x})", self.0)
    }
}

/// Something that happened on the bus or inside the native library
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log {
        level: LogLevel,
        /// Time since the library was initialised
        time: Duration,
        message: String,
    },
    KeyPress(Keypress),
    Command(Command),
    /// The adapter or library configuration changed
    ConfigChange,
    Alert {
        alert: Alert,
        param: Option<i64>,
    },
    MenuChanged {
        state: MenuState,
    },
    Activated {
        address: LogicalAddress,
        activated: bool,
    },
}

impl Event {
    /// The single kind bit this event is delivered under
    pub fn kind(&self) -> EventMask {
        match self {
            Event::Log { .. } => EventMask::LOG,
            Event::KeyPress(_) => EventMask::KEYPRESS,
            Event::Command(_) => EventMask::COMMAND,
            Event::ConfigChange => EventMask::CONFIG_CHANGE,
            Event::Alert { .. } => EventMask::ALERT,
            Event::MenuChanged { .. } => EventMask::MENU_CHANGED,
            Event::Activated { .. } => EventMask::ACTIVATED,
        }
    }

    pub fn log(level: LogLevel, time: Duration, message: impl Into<String>) -> Self {
        Event::Log {
            level,
            time,
            message: message.into(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Log {
                level,
                time,
                message,
            } => write!(f, "log {} {}ms {}", level, time.as_millis(), message),
            Event::KeyPress(key) => write!(
                f,
                "keypress {:#04x} ({}ms)",
                key.keycode,
                key.duration.as_millis()
            ),
            Event::Command(cmd) => write!(f, "command {}", cmd),
            Event::ConfigChange => write!(f, "configuration changed"),
            Event::Alert { alert, param } => match param {
                Some(param) => write!(f, "alert {} ({})", alert, param),
                None => write!(f, "alert {}", alert),
            },
            Event::MenuChanged { state } => write!(f, "menu {}", state),
            Event::Activated { address, activated } => write!(
                f,
                "source {} {}",
                address,
                if *activated { "activated" } else { "deactivated" }
            ),
        }
    }
}

pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Where backends push the events they receive
pub type EventSink = Arc<dyn Fn(Event) + Send + Sync>;

/// Identifies a registration, used to remove it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

struct Registration {
    id: CallbackId,
    mask: EventMask,
    callback: Callback,
}

/// Ordered list of callbacks, safe to share with the thread delivering events
pub struct CallbackRegistry {
    registrations: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    events_tx: broadcast::Sender<Event>,
}

impl CallbackRegistry {
    // Slow subscribers lose the oldest events rather than blocking the native thread
    const BROADCAST_CAPACITY: usize = 64;

    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(Self::BROADCAST_CAPACITY);
        CallbackRegistry {
            registrations: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            events_tx,
        }
    }

    pub fn add(
        &self,
        mask: EventMask,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<CallbackId, CecError> {
        if mask.is_empty() {
            return Err(CecError::InvalidEventMask);
        }

        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(|e| e.into_inner());
        registrations.push(Registration {
            id,
            mask,
            callback: Arc::new(callback),
        });

        Ok(id)
    }

    pub fn remove(&self, id: CallbackId) -> bool {
        let mut registrations = self
            .registrations
            .write()
            .unwrap_or_else(|e| e.into_inner());
        let before = registrations.len();
        registrations.retain(|r| r.id != id);
        registrations.len() != before
    }

    pub fn len(&self) -> usize {
        self.registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// Invokes every matching callback in registration order
    pub fn dispatch(&self, event: &Event) {
        let kind = event.kind();
        trace!("dispatching {}", event);

        // The lock is released before calling out so callbacks can (un)register others
        let matching: Vec<Callback> = self
            .registrations
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.mask.intersects(kind))
            .map(|r| r.callback.clone())
            .collect();

        for callback in matching {
            let result = panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
            if result.is_err() {
                warn!("a callback panicked while handling {}", event);
            }
        }

        // No subscribers is not an error
        let _ = self.events_tx.send(event.clone());
    }

    /// Builds a sink suitable for `Backend::set_event_sink`
    pub fn sink(self: &Arc<Self>) -> EventSink {
        let registry = Arc::downgrade(self);
        Arc::new(move |event: Event| {
            if let Some(registry) = registry.upgrade() {
                registry.dispatch(&event);
            }
        })
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwards log events to the `log` facade under the `libcec` target
pub fn forward_to_log(event: &Event) {
    if let Event::Log { level, message, .. } = event {
        log::log!(target: "libcec", level.to_log_level(), "{}", message);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    fn log_event() -> Event {
        Event::log(LogLevel::Notice, Duration::from_millis(5), "hello")
    }

    fn alert_event() -> Event {
        Event::Alert {
            alert: Alert::ConnectionLost,
            param: None,
        }
    }

    #[test]
    fn test_mask_algebra() {
        let mask = EventMask::ALL - EventMask::LOG;
        assert!(!mask.contains(EventMask::LOG));
        assert!(mask.contains(EventMask::COMMAND));
        assert!(mask.contains(EventMask::KEYPRESS | EventMask::ALERT));
        assert_eq!((EventMask::LOG | EventMask::KEYPRESS).bits(), 0x3);
        assert_eq!(EventMask::ALL.bits(), 0xFFFF);
        assert!((EventMask::LOG - EventMask::LOG).is_empty());
    }

    #[test]
    fn test_dispatch_filters_by_mask() {
        let registry = CallbackRegistry::new();
        let no_logs = Arc::new(Mutex::new(Vec::new()));
        let logs = Arc::new(Mutex::new(Vec::new()));

        let sink = no_logs.clone();
        registry
            .add(EventMask::ALL - EventMask::LOG, move |e| {
                sink.lock().unwrap().push(e.clone())
            })
            .unwrap();
        let sink = logs.clone();
        registry
            .add(EventMask::LOG, move |e| sink.lock().unwrap().push(e.clone()))
            .unwrap();

        registry.dispatch(&log_event());
        registry.dispatch(&alert_event());

        assert_eq!(*no_logs.lock().unwrap(), vec![alert_event()]);
        assert_eq!(*logs.lock().unwrap(), vec![log_event()]);
    }

    #[test]
    fn test_empty_mask_rejected() {
        let registry = CallbackRegistry::new();
        assert!(matches!(
            registry.add(EventMask::NONE, |_| {}),
            Err(CecError::InvalidEventMask)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove() {
        let registry = CallbackRegistry::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = registry
            .add(EventMask::ALL, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        registry.dispatch(&alert_event());
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        registry.dispatch(&alert_event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let registry = CallbackRegistry::new();
        let count = Arc::new(AtomicU64::new(0));
        registry.add(EventMask::ALL, |_| panic!("boom")).unwrap();
        let c = count.clone();
        registry
            .add(EventMask::ALL, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        registry.dispatch(&alert_event());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_can_register_from_dispatch() {
        let registry = Arc::new(CallbackRegistry::new());
        let r = registry.clone();
        registry
            .add(EventMask::ALERT, move |_| {
                r.add(EventMask::LOG, |_| {}).unwrap();
            })
            .unwrap();

        registry.dispatch(&alert_event());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_subscribe() {
        let registry = Arc::new(CallbackRegistry::new());
        let mut rx = registry.subscribe();
        let sink = registry.sink();
        sink(log_event());
        assert_eq!(rx.recv().await.unwrap(), log_event());
    }
}
