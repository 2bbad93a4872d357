// src/callbacks.rs
//! Client notification delivery.
//!
//! Notifications are never dropped: delivery blocks until the registered
//! sink accepts, waking on every registration and re-polling at a fixed
//! interval in between.

use crate::display::Connection;
use crate::error::HwcError;
use crate::session::ClientId;
use log::*;
use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// The client side of hotplug and refresh notifications.
///
/// Duplicate refresh notifications must be harmless to the client.
pub trait ClientSink: Send + Sync {
    fn notify_connected(&self, id: ClientId) -> Result<(), HwcError>;
    fn notify_disconnected(&self, id: ClientId) -> Result<(), HwcError>;
    fn notify_refresh_needed(&self, id: ClientId) -> Result<(), HwcError>;
}

pub struct Callbacks {
    sink: Mutex<Option<Arc<dyn ClientSink>>>,
    registered: Condvar,
    refresh_requested: Mutex<BTreeSet<ClientId>>,
    retry_interval: Duration,
}

impl Callbacks {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            sink: Mutex::new(None),
            registered: Condvar::new(),
            refresh_requested: Mutex::new(BTreeSet::new()),
            retry_interval,
        }
    }

    /// Installs the sink and wakes every blocked delivery.
    pub fn register(&self, sink: Arc<dyn ClientSink>) {
        *self.sink.lock().unwrap() = Some(sink);
        self.registered.notify_all();
        debug!("Callbacks: sink registered");
    }

    /// Delivers a hotplug notification, blocking until the sink accepts it.
    pub fn hotplug(&self, id: ClientId, connection: Connection) {
        debug!("Callbacks: hotplug {} {:?}", id, connection);
        self.deliver(|sink| match connection {
            Connection::Connected => sink.notify_connected(id),
            Connection::Disconnected => sink.notify_disconnected(id),
        });
    }

    /// Requests a new frame on `id`, blocking until the sink accepts.
    pub fn refresh(&self, id: ClientId) {
        self.refresh_requested.lock().unwrap().insert(id);
        self.deliver(|sink| sink.notify_refresh_needed(id));
    }

    /// Consumes the "refresh requested" mark of one display.
    pub fn take_refresh_request(&self, id: ClientId) -> bool {
        self.refresh_requested.lock().unwrap().remove(&id)
    }

    fn deliver<F>(&self, notify: F)
    where
        F: Fn(&dyn ClientSink) -> Result<(), HwcError>,
    {
        let mut sink = self.sink.lock().unwrap();
        loop {
            if let Some(current) = sink.as_ref() {
                match notify(current.as_ref()) {
                    Ok(()) => return,
                    Err(e) => trace!("Callbacks: sink refused notification: {}", e),
                }
            }
            sink = self
                .registered
                .wait_timeout(sink, self.retry_interval)
                .unwrap()
                .0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::DisplayType;
    use crate::headless::{Notification, RecordingSink};
    use crate::session::SlotRegistry;
    use test_log::test;

    fn ids() -> (ClientId, ClientId) {
        let registry = SlotRegistry::with_capacities(DisplayType::BuiltIn, 0, 1, 0);
        (ClientId::PRIMARY, registry.pluggable_ids()[0])
    }

    #[test]
    fn it_should_retry_until_the_sink_accepts() {
        let (primary, _) = ids();
        let callbacks = Callbacks::new(Duration::from_millis(1));
        let sink = Arc::new(RecordingSink::rejecting(3));
        callbacks.register(sink.clone());

        callbacks.hotplug(primary, Connection::Connected);

        assert_eq!(sink.notifications(), vec![Notification::Connected(primary)]);
        assert_eq!(sink.rejected(), 3);
    }

    #[test]
    fn it_should_block_delivery_until_a_sink_registers() {
        let (_, external) = ids();
        let callbacks = Arc::new(Callbacks::new(Duration::from_secs(60)));
        let sink = Arc::new(RecordingSink::new());

        let delivering = Arc::clone(&callbacks);
        let handle =
            std::thread::spawn(move || delivering.hotplug(external, Connection::Disconnected));

        std::thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        callbacks.register(sink.clone());
        handle.join().expect("delivery thread panicked");

        assert_eq!(
            sink.notifications(),
            vec![Notification::Disconnected(external)]
        );
    }

    #[test]
    fn it_should_track_refresh_requests_per_display() {
        let (primary, external) = ids();
        let callbacks = Callbacks::new(Duration::from_millis(1));
        callbacks.register(Arc::new(RecordingSink::new()));

        callbacks.refresh(primary);

        assert!(!callbacks.take_refresh_request(external));
        assert!(callbacks.take_refresh_request(primary));
        assert!(!callbacks.take_refresh_request(primary));
    }
}
