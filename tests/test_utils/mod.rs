use std::sync::{Arc, Mutex};

use cec::{backend::mock::MockBackend, Cec, Config, Event};

/// A session over the default simulated bus, along with a handle on the bus
#[allow(dead_code)]
pub fn session() -> (Arc<MockBackend>, Cec) {
    session_with(Config::default())
}

#[allow(dead_code)]
pub fn session_with(config: Config) -> (Arc<MockBackend>, Cec) {
    let backend = Arc::new(MockBackend::from_config(&config));
    let cec = Cec::new(backend.clone(), config);
    (backend, cec)
}

/// Collects the events delivered to a callback
#[allow(dead_code)]
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(&Event) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event: &Event| events.lock().unwrap().push(event.clone())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}
