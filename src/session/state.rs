// src/session/state.rs
//! Session-wide flags shared by client threads and the hotplug dispatcher.

use crate::display::TestPattern;
use crate::session::slot::ClientId;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct SessionState {
    primary_ready: AtomicBool,
    client_connected: AtomicBool,
    pluggable_is_primary: AtomicBool,
    null_display_active: AtomicBool,
    primary_connected: AtomicBool,
    reset_panel: AtomicBool,
    hotplug_test_pattern: Mutex<Option<TestPattern>>,
    pending_refresh: Mutex<BTreeSet<ClientId>>,
}

impl SessionState {
    /// Set once the primary has presented its first frame.
    pub fn primary_ready(&self) -> bool {
        self.primary_ready.load(Ordering::SeqCst)
    }

    /// Marks the primary ready. Returns true for the first caller only.
    pub fn mark_primary_ready(&self) -> bool {
        !self.primary_ready.swap(true, Ordering::SeqCst)
    }

    pub fn client_connected(&self) -> bool {
        self.client_connected.load(Ordering::SeqCst)
    }

    pub fn set_client_connected(&self) {
        self.client_connected.store(true, Ordering::SeqCst);
    }

    pub fn pluggable_is_primary(&self) -> bool {
        self.pluggable_is_primary.load(Ordering::SeqCst)
    }

    pub fn set_pluggable_is_primary(&self, value: bool) {
        self.pluggable_is_primary.store(value, Ordering::SeqCst);
    }

    /// True while the primary slot holds a placeholder display.
    pub fn null_display_active(&self) -> bool {
        self.null_display_active.load(Ordering::SeqCst)
    }

    pub fn set_null_display_active(&self, value: bool) {
        self.null_display_active.store(value, Ordering::SeqCst);
    }

    /// Cable state of a pluggable primary.
    pub fn primary_connected(&self) -> bool {
        self.primary_connected.load(Ordering::SeqCst)
    }

    pub fn set_primary_connected(&self, value: bool) {
        self.primary_connected.store(value, Ordering::SeqCst);
    }

    pub fn request_panel_reset(&self) {
        self.reset_panel.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending panel reset request.
    pub fn take_panel_reset(&self) -> bool {
        self.reset_panel.swap(false, Ordering::SeqCst)
    }

    /// Test-pattern parameters of the most recent hotplug event.
    pub fn hotplug_test_pattern(&self) -> Option<TestPattern> {
        *self.hotplug_test_pattern.lock().unwrap()
    }

    pub fn set_hotplug_test_pattern(&self, pattern: Option<TestPattern>) {
        *self.hotplug_test_pattern.lock().unwrap() = pattern;
    }

    pub fn set_pending_refresh(&self, id: ClientId, pending: bool) {
        let mut set = self.pending_refresh.lock().unwrap();
        if pending {
            set.insert(id);
        } else {
            set.remove(&id);
        }
    }

    /// Clears every pending refresh and returns the lowest id that had one.
    pub fn take_pending_refresh(&self) -> Option<ClientId> {
        let mut set = self.pending_refresh.lock().unwrap();
        let first = set.iter().next().copied();
        set.clear();
        first
    }
}
