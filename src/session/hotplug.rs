// src/session/hotplug.rs
//! Reconciles the engine's endpoint snapshot against the slot registry.
//!
//! Every pass starts from a fresh snapshot; nothing is diffed incrementally.
//! Replaying an identical snapshot is a no-op, so bursts of events are safe.

use crate::callbacks::Callbacks;
use crate::config::SessionConfig;
use crate::display::{
    CompositionEngine, Connection, CreateRequest, DisplayType, EndpointInfo,
};
use crate::error::HwcError;
use crate::session::concurrency::ConcurrencyArbiter;
use crate::session::slot::{ClientId, SlotRegistry};
use crate::session::state::SessionState;
use crate::session::vsync_period_ns;
use log::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugError {
    /// The engine could not report its endpoints.
    Status(HwcError),
    /// A display object could not be created for a slot.
    Create { id: ClientId, error: HwcError },
    /// A pluggable primary connected while its placeholder is bound.
    PrimaryReplaced,
}

impl HotplugError {
    /// Fatal errors leave the process in a state it cannot continue from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HotplugError::PrimaryReplaced)
    }
}

impl std::fmt::Display for HotplugError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HotplugError::Status(e) => write!(f, "failed to get display status: {}", e),
            HotplugError::Create { id, error } => {
                write!(f, "failed to create display {}: {}", id, error)
            }
            HotplugError::PrimaryReplaced => {
                write!(f, "primary pluggable display connected while placeholder is active")
            }
        }
    }
}

impl std::error::Error for HotplugError {}

pub struct HotplugCoordinator<'a> {
    pub(crate) registry: &'a SlotRegistry,
    pub(crate) engine: &'a dyn CompositionEngine,
    pub(crate) callbacks: &'a Callbacks,
    pub(crate) state: &'a SessionState,
    pub(crate) config: &'a SessionConfig,
}

impl HotplugCoordinator<'_> {
    /// Runs one reconciliation pass. With `delay`, waits for hardware to
    /// settle before notifying the client.
    pub fn create_pluggable_displays(&self, delay: bool) -> Result<(), HotplugError> {
        if !self.state.primary_ready() {
            info!("HotplugCoordinator: Primary not ready, deferring hotplug");
            return Ok(());
        }

        let endpoints = self
            .engine
            .displays_status()
            .map_err(HotplugError::Status)?;

        if self.state.null_display_active()
            && endpoints.iter().any(|info| info.is_primary && info.is_connected)
        {
            error!("HotplugCoordinator: Primary pluggable display connected over placeholder");
            return Err(HotplugError::PrimaryReplaced);
        }

        self.handle_disconnected(&endpoints, delay);
        self.handle_connected(&endpoints, delay)
    }

    /// Tears down every bound pluggable slot whose endpoint is gone or disconnected.
    pub fn handle_disconnected(&self, endpoints: &[EndpointInfo], delay: bool) {
        let is_live = |backing_id: i32| {
            endpoints
                .iter()
                .any(|info| info.backing_id == backing_id && info.is_connected)
        };

        for id in self.registry.pluggable_with_primary() {
            let backing_id = self.registry.slot(id).lock().backing_id();
            let Some(backing_id) = backing_id else {
                continue;
            };
            if is_live(backing_id) {
                continue;
            }
            if id == ClientId::PRIMARY {
                self.disconnect_primary(delay);
            } else {
                self.destroy_pluggable(id, delay);
            }
        }
    }

    fn disconnect_primary(&self, delay: bool) {
        if !self.state.primary_connected() {
            return;
        }
        info!("HotplugCoordinator: Primary pluggable display disconnected");
        self.callbacks.refresh(ClientId::PRIMARY);
        if delay {
            self.settle();
        }
        let mut slot = self.registry.primary().lock();
        if let Some(display) = slot.display_mut() {
            display.ops_mut().set_connected(false);
        }
        self.state.set_primary_connected(false);
    }

    fn destroy_pluggable(&self, id: ClientId, delay: bool) {
        info!("HotplugCoordinator: Notify hotplug disconnected: client id = {}", id);
        self.callbacks.hotplug(id, Connection::Disconnected);
        self.callbacks.refresh(ClientId::PRIMARY);
        if delay {
            self.settle();
        }

        let display = self.registry.slot(id).lock().unbind();
        let Some(display) = display else {
            return;
        };
        debug!("HotplugCoordinator: Destroying {:?} in slot {}", display, id);
        self.engine.destroy_display(display);
        self.arbitrate(id);
    }

    /// Binds every connected pluggable endpoint that has no slot yet.
    pub fn handle_connected(
        &self,
        endpoints: &[EndpointInfo],
        delay: bool,
    ) -> Result<(), HotplugError> {
        if self.state.pluggable_is_primary() {
            self.connect_primary(endpoints);
        }

        let mut pending_hotplugs = Vec::new();
        let mut failure = None;

        for info in endpoints {
            if info.is_primary || info.display_type != DisplayType::Pluggable || !info.is_connected
            {
                continue;
            }
            if self.is_bound(info.backing_id) {
                continue;
            }

            match self.bind_pluggable(info) {
                Ok(Some(id)) => {
                    pending_hotplugs.push(id);
                    self.arbitrate(id);
                }
                Ok(None) => {
                    warn!(
                        "HotplugCoordinator: No free pluggable slot for backing id {}",
                        info.backing_id
                    );
                    break;
                }
                Err(e) => {
                    error!("HotplugCoordinator: {}", e);
                    failure = Some(e);
                    break;
                }
            }
        }

        if !pending_hotplugs.is_empty() {
            // Primary output can depend on how many displays are attached.
            if let Some(display) = self.registry.primary().lock().display_mut() {
                display.ops_mut().reset_validation();
            }
            self.callbacks.refresh(ClientId::PRIMARY);

            if delay {
                self.settle();
            }

            for id in pending_hotplugs {
                info!("HotplugCoordinator: Notify hotplug connected: client id = {}", id);
                self.callbacks.hotplug(id, Connection::Connected);
                self.arbitrate(id);
            }
        }

        failure.map_or(Ok(()), Err)
    }

    fn connect_primary(&self, endpoints: &[EndpointInfo]) {
        if self.state.primary_connected() || self.state.null_display_active() {
            return;
        }
        let reconnected = endpoints.iter().any(|info| {
            info.is_primary && info.display_type == DisplayType::Pluggable && info.is_connected
        });
        if !reconnected {
            return;
        }

        info!("HotplugCoordinator: Primary pluggable display connected");
        {
            let mut slot = self.registry.primary().lock();
            let hdr_supported = slot.display_mut().map(|display| {
                let ops = display.ops_mut();
                ops.set_connected(true);
                ops.reset_validation();
                ops.hdr_capabilities().is_supported()
            });
            slot.hdr_supported = hdr_supported.unwrap_or(false);
        }
        self.state.set_primary_connected(true);
        self.callbacks.refresh(ClientId::PRIMARY);
    }

    /// Binds the first free pluggable slot. `Ok(None)` when every slot is taken.
    fn bind_pluggable(&self, info: &EndpointInfo) -> Result<Option<ClientId>, HotplugError> {
        for &id in self.registry.pluggable_ids() {
            let mut slot = self.registry.slot(id).lock();
            if slot.is_bound() {
                continue;
            }

            let test_pattern = self.state.hotplug_test_pattern();
            let request = CreateRequest::Pluggable {
                client_id: id.raw(),
                backing_id: info.backing_id,
                test_pattern,
            };
            let display = self
                .engine
                .create_display(&request)
                .map_err(|error| HotplugError::Create { id, error })?;
            slot.bind(Some(info.backing_id), display);
            slot.test_pattern = test_pattern;
            info!(
                "HotplugCoordinator: Created pluggable display: backing id = {}, client id = {}",
                info.backing_id, id
            );
            return Ok(Some(id));
        }
        Ok(None)
    }

    fn is_bound(&self, backing_id: i32) -> bool {
        self.registry
            .all_displayed()
            .any(|(_, slot)| slot.lock().backing_id() == Some(backing_id))
    }

    fn arbitrate(&self, id: ClientId) {
        ConcurrencyArbiter::new(self.registry).handle_concurrency(id, self.state.primary_ready());
    }

    /// Sleeps for a few primary vsync periods so freed hardware becomes available.
    fn settle(&self) {
        let period = {
            let slot = self.registry.primary().lock();
            vsync_period_ns(&slot, self.config.default_vsync_period_ns)
        };
        let delay = self.config.settle_delay(period);
        trace!("HotplugCoordinator: Settling for {:?}", delay);
        std::thread::sleep(delay);
    }
}
