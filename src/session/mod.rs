// src/session/mod.rs
//! Client-facing composition session.
//!
//! The session owns the slot registry, the composition engine, client
//! callbacks and the power-hint worker. Every entry point takes a raw client
//! display id and validates it before touching a slot:
//!
//! - validate/present run inside the slot's sequence (`SlotLock`)
//! - configuration calls take the slot's plain lock only
//! - power-mode, virtual-display and hotplug changes re-run arbitration
//!   after every slot lock is released

pub mod concurrency;
pub mod hotplug;
pub mod slot;
pub mod slot_lock;
pub mod state;

pub use concurrency::ConcurrencyArbiter;
pub use hotplug::{HotplugCoordinator, HotplugError};
pub use slot::{ClientId, DisplaySlot, LegacyDisplay, SlotClass, SlotRegistry};
pub use slot_lock::{SequencePhase, SlotLock};
pub use state::SessionState;

use crate::callbacks::{Callbacks, ClientSink};
use crate::config::{Config, SessionConfig};
use crate::display::{
    Attribute, CompositionEngine, Connection, CreateRequest, DisplayCapabilities, DisplayKind,
    DisplayOps, DisplayType, EndpointInfo, HdrCapabilities, PowerMode, SessionCapabilities,
    TestPattern, Validation, ValidationState, Vsync,
};
use crate::error::HwcError;
use crate::power_hint::{PowerHintWorker, PowerServiceConnector};
use anyhow::{Context, Result};
use log::*;
use std::sync::Arc;

/// Vsync period of the slot's active config, or `default` when unknown.
pub(crate) fn vsync_period_ns(slot: &DisplaySlot, default: u64) -> u64 {
    slot.display()
        .and_then(|display| {
            let ops = display.ops();
            let config = ops.active_config().ok()?;
            ops.attribute(config, Attribute::VsyncPeriod).ok()
        })
        .filter(|period| *period > 0)
        .map(|period| period as u64)
        .unwrap_or(default)
}

pub struct Session {
    registry: SlotRegistry,
    engine: Arc<dyn CompositionEngine>,
    callbacks: Callbacks,
    state: SessionState,
    power_hint: PowerHintWorker,
    config: SessionConfig,
}

impl Session {
    /// Builds the slot table and creates the primary display.
    ///
    /// Fails when the engine cannot report its capabilities or the primary
    /// display cannot be created; there is no recovery from either.
    pub fn new(
        engine: Arc<dyn CompositionEngine>,
        power_connector: Arc<dyn PowerServiceConnector>,
        config: &Config,
    ) -> Result<Self> {
        let registry = SlotRegistry::init(engine.as_ref())
            .context("Failed to initialize display slots")?;
        let power_hint = PowerHintWorker::spawn(power_connector, &config.power_hint)?;

        let session = Self {
            registry,
            engine,
            callbacks: Callbacks::new(config.session.notify_retry_interval()),
            state: SessionState::default(),
            power_hint,
            config: config.session.clone(),
        };
        session.create_primary_display()?;
        Ok(session)
    }

    fn create_primary_display(&self) -> Result<()> {
        let endpoints = self
            .engine
            .displays_status()
            .context("Failed to get connected display list")?;
        let info = endpoints
            .iter()
            .find(|info| info.is_primary)
            .context("No primary display reported")?;

        let request = match (info.display_type, info.is_connected) {
            (DisplayType::BuiltIn, _) => CreateRequest::BuiltIn {
                client_id: ClientId::PRIMARY.raw(),
                backing_id: info.backing_id,
            },
            (DisplayType::Pluggable, true) => {
                info!("Session: Pluggable display is primary and is connected");
                self.state.set_pluggable_is_primary(true);
                self.state.set_primary_connected(true);
                CreateRequest::Pluggable {
                    client_id: ClientId::PRIMARY.raw(),
                    backing_id: info.backing_id,
                    test_pattern: None,
                }
            }
            (DisplayType::Pluggable, false) => {
                info!("Session: Pluggable display is primary but not connected");
                self.state.set_pluggable_is_primary(true);
                self.state.set_null_display_active(true);
                CreateRequest::Placeholder {
                    client_id: ClientId::PRIMARY.raw(),
                }
            }
            (DisplayType::Virtual, _) => {
                anyhow::bail!("Spurious primary display type {:?}", info.display_type)
            }
        };

        let display = self
            .engine
            .create_display(&request)
            .context("Primary display creation failed")?;
        info!(
            "Session: Primary display created: {:?}, backing id = {:?}",
            display,
            request.backing_id()
        );
        self.registry
            .primary()
            .lock()
            .bind(request.backing_id(), display);
        Ok(())
    }

    /// Registers the client sink.
    ///
    /// The first registration creates the remaining built-in displays and
    /// announces every bound slot as connected.
    pub fn register_sink(&self, sink: Arc<dyn ClientSink>) {
        self.callbacks.register(sink);

        if !self.state.client_connected() {
            self.handle_builtin_displays();
        }
        for (id, slot) in self.registry.all_displayed() {
            if slot.lock().is_bound() {
                self.callbacks.hotplug(id, Connection::Connected);
            }
        }
        self.state.set_client_connected();
    }

    fn handle_builtin_displays(&self) {
        let endpoints = match self.engine.displays_status() {
            Ok(endpoints) => endpoints,
            Err(e) => {
                error!("Session: Failed to get connected display list: {}", e);
                return;
            }
        };

        for info in endpoints.iter().filter(|info| {
            !info.is_primary && info.display_type == DisplayType::BuiltIn && info.is_connected
        }) {
            let free = self
                .registry
                .builtin_ids()
                .iter()
                .copied()
                .find(|id| !self.registry.slot(*id).lock().is_bound());
            let Some(id) = free else {
                warn!("Session: Insufficient built-in display slots");
                return;
            };

            let request = CreateRequest::BuiltIn {
                client_id: id.raw(),
                backing_id: info.backing_id,
            };
            match self.engine.create_display(&request) {
                Ok(display) => {
                    self.registry
                        .slot(id)
                        .lock()
                        .bind(Some(info.backing_id), display);
                    info!(
                        "Session: Built-in display created: client id = {}, backing id = {}",
                        id, info.backing_id
                    );
                }
                Err(e) => {
                    error!("Session: Built-in display creation failed: {}", e);
                    return;
                }
            }
        }
    }

    fn coordinator(&self) -> HotplugCoordinator<'_> {
        HotplugCoordinator {
            registry: &self.registry,
            engine: self.engine.as_ref(),
            callbacks: &self.callbacks,
            state: &self.state,
            config: &self.config,
        }
    }

    /// Reconciles slots against a fresh endpoint snapshot.
    pub fn handle_hotplug(&self, delay: bool) -> Result<(), HotplugError> {
        self.coordinator().create_pluggable_displays(delay)
    }

    /// Records test-pattern parameters for the next pluggable display.
    pub fn set_hotplug_params(&self, test_pattern: Option<TestPattern>) {
        self.state.set_hotplug_test_pattern(test_pattern);
    }

    /// Refreshes the primary and resets its panel on the next validate.
    pub fn request_panel_reset(&self) {
        self.callbacks.refresh(ClientId::PRIMARY);
        self.state.request_panel_reset();
    }

    fn arbitrate(&self, id: ClientId) {
        ConcurrencyArbiter::new(&self.registry).handle_concurrency(id, self.state.primary_ready());
    }

    fn with_display<R>(
        &self,
        id: ClientId,
        f: impl FnOnce(&mut DisplayKind) -> Result<R, HwcError>,
    ) -> Result<R, HwcError> {
        let mut slot = self.registry.slot(id).lock();
        match slot.display_mut() {
            Some(display) => f(display),
            None => Err(HwcError::BadDisplay),
        }
    }

    // --- Frame sequence ---

    /// Validates the next frame and opens the slot's sequence.
    pub fn validate_display(&self, display: u64) -> Result<Validation, HwcError> {
        let id = self.registry.resolve(display)?;
        let slot_lock = self.registry.slot(id);

        let result = {
            let mut slot = slot_lock.enter_sequence();
            match slot.display_mut() {
                Some(display) => self.validate_internal(id, display.ops_mut()),
                None => Err(HwcError::BadDisplay),
            }
        };

        if result.is_err() {
            slot_lock.cancel_sequence();
        }
        result
    }

    fn validate_internal(
        &self,
        id: ClientId,
        ops: &mut dyn DisplayOps,
    ) -> Result<Validation, HwcError> {
        if ops.validation_state() == ValidationState::InternalValidated {
            let output = ops.validate_output();
            ops.set_validation_state(ValidationState::Normal);
            return output;
        }

        if id == ClientId::PRIMARY && self.state.take_panel_reset() {
            warn!("Session: Panel is in bad state, resetting the panel");
            reset_panel(ops);
        }

        ops.validate()
    }

    /// Presents the validated frame and closes the slot's sequence.
    ///
    /// Returns `NotValidated` when a skipped validate turned out to need
    /// client composition; the client must validate and present again.
    pub fn present_display(&self, display: u64) -> Result<i32, HwcError> {
        let id = self.registry.resolve(display)?;
        let slot_lock = self.registry.slot(id);

        let result = {
            let mut slot = slot_lock.wait_sequence();
            match slot.display_mut() {
                Some(display) => {
                    let ops = display.ops_mut();
                    if self.callbacks.take_refresh_request(id) {
                        ops.set_pending_refresh();
                    }
                    self.present_internal(id, ops)
                }
                None => Err(HwcError::BadDisplay),
            }
        };

        match result {
            Ok(_) => self.power_hint.signal_idle(),
            Err(HwcError::NotValidated) => {}
            Err(_) => slot_lock.cancel_sequence(),
        }

        if id == ClientId::PRIMARY && self.state.mark_primary_ready() {
            info!("Session: Primary display is ready");
            if !self.state.pluggable_is_primary() {
                if let Err(e) = self.handle_hotplug(false) {
                    error!("Session: Could not handle pending hotplug: {}", e);
                }
            }
        }

        self.handle_pending_refresh();
        result
    }

    fn present_internal(&self, id: ClientId, ops: &mut dyn DisplayOps) -> Result<i32, HwcError> {
        let can_skip = !self.config.disable_skip_validate && ops.can_skip_validate();
        if ops.validation_state() == ValidationState::SkipValidate && !can_skip {
            let validated = self.validate_internal(id, ops);
            if validated.is_err() || ops.has_client_composition() {
                ops.set_validation_state(ValidationState::InternalValidated);
                return Err(HwcError::NotValidated);
            }
        }
        ops.present()
    }

    fn handle_pending_refresh(&self) {
        // One refresh covers every display.
        if let Some(id) = self.state.take_pending_refresh() {
            self.callbacks.refresh(id);
        }
    }

    // --- Power and configuration ---

    pub fn set_power_mode(&self, display: u64, mode: i32) -> Result<(), HwcError> {
        let id = self.registry.resolve(display)?;
        let mode = PowerMode::try_from(mode)?;
        if mode.is_doze() && !self.get_doze_support(display)? {
            return Err(HwcError::Unsupported);
        }

        self.with_display(id, |display| display.ops_mut().set_power_mode(mode))?;
        info!("Session: Display {} power mode {:?}", id, mode);

        self.arbitrate(id);

        if mode == PowerMode::Doze {
            // A second refresh lets post-processing catch up with doze.
            self.callbacks.refresh(id);
            self.state.set_pending_refresh(id, true);
        } else {
            self.state.set_pending_refresh(id, false);
        }

        self.update_refresh_rate_hint();
        Ok(())
    }

    fn update_refresh_rate_hint(&self) {
        let (power_mode, period) = {
            let slot = self.registry.primary().lock();
            (
                slot.last_power_mode(),
                vsync_period_ns(&slot, self.config.default_vsync_period_ns),
            )
        };
        if period != 0 {
            self.power_hint.signal_refresh_rate(power_mode, period);
        }
    }

    pub fn get_doze_support(&self, display: u64) -> Result<bool, HwcError> {
        let id = self.registry.resolve(display)?;
        Ok(id == ClientId::PRIMARY || self.registry.first_bound_builtin() == Some(id))
    }

    pub fn set_active_config(&self, display: u64, config: u32) -> Result<(), HwcError> {
        let id = self.registry.resolve(display)?;
        self.with_display(id, |display| display.ops_mut().set_active_config(config))?;
        self.update_refresh_rate_hint();
        Ok(())
    }

    pub fn get_active_config(&self, display: u64) -> Result<u32, HwcError> {
        let id = self.registry.resolve(display)?;
        self.with_display(id, |display| display.ops().active_config())
    }

    pub fn set_vsync_enabled(&self, display: u64, enabled: i32) -> Result<(), HwcError> {
        let id = self.registry.resolve(display)?;
        let vsync = Vsync::try_from(enabled)?;
        self.with_display(id, |display| display.ops_mut().set_vsync_enabled(vsync))
    }

    pub fn get_display_attribute(
        &self,
        display: u64,
        config: u32,
        attribute: i32,
    ) -> Result<i32, HwcError> {
        let id = self.registry.resolve(display)?;
        let attribute = Attribute::try_from(attribute)?;
        self.with_display(id, |display| display.ops().attribute(config, attribute))
    }

    /// Vsync period of the active config, 60 Hz when the display cannot say.
    pub fn get_vsync_period(&self, display: u64) -> Result<u64, HwcError> {
        let id = self.registry.resolve(display)?;
        let slot = self.registry.slot(id).lock();
        Ok(vsync_period_ns(&slot, self.config.default_vsync_period_ns))
    }

    // --- Layers and display queries ---

    pub fn create_layer(&self, display: u64) -> Result<u64, HwcError> {
        let id = self.registry.resolve(display)?;
        self.with_display(id, |display| display.ops_mut().create_layer())
    }

    pub fn destroy_layer(&self, display: u64, layer: u64) -> Result<(), HwcError> {
        let id = self.registry.resolve(display)?;
        self.with_display(id, |display| display.ops_mut().destroy_layer(layer))
    }

    pub fn set_layer_z_order(&self, display: u64, layer: u64, z: u32) -> Result<(), HwcError> {
        let id = self.registry.resolve(display)?;
        self.with_display(id, |display| display.ops_mut().set_layer_z_order(layer, z))
    }

    pub fn get_hdr_capabilities(&self, display: u64) -> Result<HdrCapabilities, HwcError> {
        let id = self.registry.resolve(display)?;
        self.with_display(id, |display| Ok(display.ops().hdr_capabilities()))
    }

    pub fn get_display_capabilities(&self, display: u64) -> Result<DisplayCapabilities, HwcError> {
        let id = self.registry.resolve(display)?;
        self.with_display(id, |display| {
            Ok(if display.is_builtin() {
                DisplayCapabilities::SKIP_CLIENT_COLOR_TRANSFORM
                    | DisplayCapabilities::DOZE
                    | DisplayCapabilities::BRIGHTNESS
            } else {
                DisplayCapabilities::empty()
            })
        })
    }

    pub fn get_display_brightness_support(&self, display: u64) -> Result<bool, HwcError> {
        let id = self.registry.resolve(display)?;
        self.with_display(id, |display| Ok(display.is_builtin()))
    }

    pub fn set_display_brightness(&self, display: u64, level: f32) -> Result<(), HwcError> {
        let id = self.registry.resolve(display)?;
        self.with_display(id, |display| display.ops_mut().set_brightness(level))
    }

    /// HDR support cached when the display was bound.
    pub fn is_hdr_display(&self, display: u64) -> bool {
        self.registry
            .resolve(display)
            .map(|id| self.registry.slot(id).lock().hdr_supported)
            .unwrap_or(false)
    }

    // --- Virtual displays ---

    /// Binds the first free virtual slot to a virtual endpoint.
    pub fn create_virtual_display(&self, width: u32, height: u32) -> Result<ClientId, HwcError> {
        if width == 0 || height == 0 {
            return Err(HwcError::BadParameter);
        }
        if !self.state.client_connected() {
            error!("Session: Client is not ready yet");
            return Err(HwcError::BadDisplay);
        }

        let endpoints = self.engine.displays_status().map_err(|e| {
            error!("Session: Failed to get connected display list: {}", e);
            HwcError::BadDisplay
        })?;
        let created = self.bind_virtual(&endpoints, width, height)?;

        {
            let mut primary = self.registry.primary().lock_settled();
            if primary.was_cancelled() {
                debug!("Session: Primary sequence was cancelled");
            }
            if let Some(display) = primary.display_mut() {
                display.ops_mut().reset_validation();
            }
        }

        let Some(id) = created else {
            warn!("Session: No virtual display could be created");
            return Err(HwcError::NoResources);
        };
        self.arbitrate(id);
        Ok(id)
    }

    fn bind_virtual(
        &self,
        endpoints: &[EndpointInfo],
        width: u32,
        height: u32,
    ) -> Result<Option<ClientId>, HwcError> {
        for info in endpoints
            .iter()
            .filter(|info| info.display_type == DisplayType::Virtual)
        {
            let already_bound = self
                .registry
                .all_displayed()
                .any(|(_, slot)| slot.lock().backing_id() == Some(info.backing_id));
            if already_bound {
                continue;
            }

            for &id in self.registry.virtual_ids() {
                let mut slot = self.registry.slot(id).lock();
                if slot.is_bound() {
                    continue;
                }
                let request = CreateRequest::Virtual {
                    client_id: id.raw(),
                    backing_id: info.backing_id,
                    width,
                    height,
                };
                let display = self.engine.create_display(&request).map_err(|e| {
                    error!("Session: Virtual display creation failed: {}", e);
                    HwcError::BadDisplay
                })?;
                slot.bind(Some(info.backing_id), display);
                info!(
                    "Session: Created virtual display id {} with res: {}x{}",
                    id, width, height
                );
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    pub fn destroy_virtual_display(&self, display: u64) -> Result<(), HwcError> {
        let id = self.registry.resolve(display)?;
        if self.registry.class_of(id) != SlotClass::Virtual {
            return Err(HwcError::BadDisplay);
        }

        let display = self.registry.slot(id).lock().unbind();
        if let Some(display) = display {
            info!("Session: Destroying virtual display id {}", id);
            self.engine.destroy_display(display);
        }
        self.arbitrate(id);
        Ok(())
    }

    // --- Session queries ---

    pub fn capabilities(&self) -> SessionCapabilities {
        let mut capabilities = SessionCapabilities::SKIP_CLIENT_COLOR_TRANSFORM;
        if !self.config.disable_skip_validate {
            capabilities |= SessionCapabilities::SKIP_VALIDATE;
        }
        capabilities
    }

    /// Concatenated dumps of every bound display, truncated to the configured size.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for (_, slot) in self.registry.all_displayed() {
            if let Some(display) = slot.lock().display() {
                out.push_str(&display.ops().dump());
            }
        }

        let max = self.config.max_dump_bytes;
        if out.len() > max {
            let mut end = max;
            while !out.is_char_boundary(end) {
                end -= 1;
            }
            out.truncate(end);
        }
        out
    }

    /// First primary or built-in display that is not powered off.
    pub fn active_builtin_display(&self) -> Option<ClientId> {
        std::iter::once(ClientId::PRIMARY)
            .chain(self.registry.builtin_ids().iter().copied())
            .find(|id| {
                let slot = self.registry.slot(*id).lock();
                slot.is_bound() && slot.last_power_mode() != PowerMode::Off
            })
    }

    pub fn display_index(&self, legacy: LegacyDisplay) -> Option<ClientId> {
        self.registry.lookup(legacy)
    }

    /// Ids of every slot that currently has a display bound.
    pub fn bound_displays(&self) -> Vec<ClientId> {
        self.registry
            .all_displayed()
            .filter(|(_, slot)| slot.lock().is_bound())
            .map(|(id, _)| id)
            .collect()
    }
}

/// Power-cycles the primary panel and re-enables vsync.
fn reset_panel(ops: &mut dyn DisplayOps) {
    let mode = ops.last_power_mode();

    info!("Session: Powering off primary");
    if let Err(e) = ops.set_power_mode(PowerMode::Off) {
        error!("Session: Power-off on primary failed: {}", e);
    }

    info!("Session: Restoring power mode {:?} on primary", mode);
    if let Err(e) = ops.set_power_mode(mode) {
        error!("Session: Setting power mode {:?} on primary failed: {}", mode, e);
    }

    if let Err(e) = ops.set_vsync_enabled(Vsync::Enable) {
        error!("Session: Enabling vsync failed for primary: {}", e);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        debug!("Session dropped");
        for (id, slot) in self.registry.all_displayed() {
            let display = slot.lock().unbind();
            if let Some(display) = display {
                debug!("Session: Destroying display {}", id);
                self.engine.destroy_display(display);
            }
        }
    }
}

#[cfg(test)]
mod tests;
