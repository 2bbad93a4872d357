// src/headless/mod.rs
//! In-process stand-ins for the external collaborators.
//!
//! `HeadlessEngine` keeps an endpoint table and one [`DisplayRecord`] per
//! created display. Records outlive their display objects so callers can
//! inspect what happened after teardown.

pub mod power;
pub mod sink;
pub mod transport;

pub use power::{HeadlessPowerService, PowerCall};
pub use sink::{Notification, RecordingSink};
pub use transport::HeadlessUeventTransport;

use crate::display::{
    Attribute, CompositionEngine, CreateRequest, DisplayKind, DisplayOps, DisplayType,
    EndpointInfo, HdrCapabilities, PowerMode, Validation, ValidationState, Vsync,
};
use crate::error::HwcError;
use anyhow::Result;
use log::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

const DEFAULT_WIDTH: i32 = 1920;
const DEFAULT_HEIGHT: i32 = 1080;
const DEFAULT_DPI: i32 = 160;
const DEFAULT_VSYNC_PERIOD_NS: i32 = 16_666_666;

/// One call made on a headless display object.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayCall {
    Validate,
    Present,
    SetPowerMode(PowerMode),
    SetVsync(Vsync),
    Activate(bool),
    ResetValidation,
    SetConnected(bool),
    SetPendingRefresh,
}

/// Observable and scriptable state of one headless display.
#[derive(Debug, Clone)]
pub struct DisplayRecord {
    pub client_id: u64,
    pub display_type: Option<DisplayType>,
    pub backing_id: Option<i32>,
    pub width: i32,
    pub height: i32,
    pub power_mode: PowerMode,
    pub activated: bool,
    pub connected: bool,
    pub destroyed: bool,
    pub vsync: Option<Vsync>,
    pub validation_state: ValidationState,
    pub needs_validate: bool,
    pub last_validation: Option<Result<Validation, HwcError>>,
    /// Layers left for client composition by the next validate.
    pub client_composition: bool,
    pub can_skip_validate: bool,
    pub fail_validate: Option<HwcError>,
    pub fail_present: Option<HwcError>,
    /// Vsync period of each config, indexed by config id.
    pub configs: Vec<i32>,
    pub active_config: u32,
    pub hdr: HdrCapabilities,
    pub brightness: Option<f32>,
    pub layers: BTreeMap<u64, u32>,
    pub next_layer: u64,
    pub next_fence: i32,
    pub dump_text: Option<String>,
    pub calls: Vec<DisplayCall>,
}

impl DisplayRecord {
    fn new(
        request: &CreateRequest,
        display_type: Option<DisplayType>,
        hdr: HdrCapabilities,
    ) -> Self {
        let (width, height) = match request {
            CreateRequest::Virtual { width, height, .. } => (*width as i32, *height as i32),
            _ => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
        };
        Self {
            client_id: request.client_id(),
            display_type,
            backing_id: request.backing_id(),
            width,
            height,
            // Built-in panels wait for the client to power them on.
            power_mode: match display_type {
                Some(DisplayType::BuiltIn) => PowerMode::Off,
                _ => PowerMode::On,
            },
            activated: true,
            connected: display_type.is_some(),
            destroyed: false,
            vsync: None,
            validation_state: ValidationState::Normal,
            needs_validate: true,
            last_validation: None,
            client_composition: false,
            can_skip_validate: true,
            fail_validate: None,
            fail_present: None,
            configs: vec![DEFAULT_VSYNC_PERIOD_NS],
            active_config: 0,
            hdr,
            brightness: None,
            layers: BTreeMap::new(),
            next_layer: 1,
            next_fence: 0,
            dump_text: None,
            calls: Vec::new(),
        }
    }

    pub fn count(&self, call: &DisplayCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }
}

/// Display object handed to the session; every call lands in its record.
pub struct HeadlessDisplay {
    record: Arc<Mutex<DisplayRecord>>,
}

impl HeadlessDisplay {
    fn with<R>(&self, f: impl FnOnce(&DisplayRecord) -> R) -> R {
        f(&self.record.lock().unwrap())
    }

    fn with_mut<R>(&mut self, f: impl FnOnce(&mut DisplayRecord) -> R) -> R {
        f(&mut self.record.lock().unwrap())
    }
}

impl DisplayOps for HeadlessDisplay {
    fn display_id(&self) -> u64 {
        self.with(|r| r.client_id)
    }

    fn validate(&mut self) -> Result<Validation, HwcError> {
        self.with_mut(|r| {
            r.calls.push(DisplayCall::Validate);
            let result = match r.fail_validate {
                Some(error) => Err(error),
                None => Ok(Validation {
                    num_types: u32::from(r.client_composition),
                    num_requests: 0,
                }),
            };
            r.needs_validate = result.is_err();
            r.validation_state = ValidationState::Normal;
            r.last_validation = Some(result);
            result
        })
    }

    fn validate_output(&self) -> Result<Validation, HwcError> {
        self.with(|r| r.last_validation.unwrap_or(Err(HwcError::NotValidated)))
    }

    fn validation_state(&self) -> ValidationState {
        self.with(|r| r.validation_state)
    }

    fn set_validation_state(&mut self, state: ValidationState) {
        self.with_mut(|r| r.validation_state = state);
    }

    fn can_skip_validate(&self) -> bool {
        self.with(|r| r.can_skip_validate && !r.needs_validate)
    }

    fn has_client_composition(&self) -> bool {
        self.with(|r| r.client_composition)
    }

    fn reset_validation(&mut self) {
        self.with_mut(|r| {
            r.calls.push(DisplayCall::ResetValidation);
            r.needs_validate = true;
        });
    }

    fn present(&mut self) -> Result<i32, HwcError> {
        self.with_mut(|r| {
            r.calls.push(DisplayCall::Present);
            if let Some(error) = r.fail_present {
                return Err(error);
            }
            // The next frame may go straight to present.
            r.validation_state = ValidationState::SkipValidate;
            r.next_fence += 1;
            Ok(r.next_fence)
        })
    }

    fn set_pending_refresh(&mut self) {
        self.with_mut(|r| r.calls.push(DisplayCall::SetPendingRefresh));
    }

    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), HwcError> {
        self.with_mut(|r| {
            r.calls.push(DisplayCall::SetPowerMode(mode));
            r.power_mode = mode;
        });
        Ok(())
    }

    fn last_power_mode(&self) -> PowerMode {
        self.with(|r| r.power_mode)
    }

    fn set_vsync_enabled(&mut self, vsync: Vsync) -> Result<(), HwcError> {
        self.with_mut(|r| {
            r.calls.push(DisplayCall::SetVsync(vsync));
            r.vsync = Some(vsync);
        });
        Ok(())
    }

    fn activate(&mut self, enable: bool) -> Result<(), HwcError> {
        self.with_mut(|r| {
            r.calls.push(DisplayCall::Activate(enable));
            r.activated = enable;
        });
        Ok(())
    }

    fn is_activated(&self) -> bool {
        self.with(|r| r.activated)
    }

    fn set_connected(&mut self, connected: bool) {
        self.with_mut(|r| {
            r.calls.push(DisplayCall::SetConnected(connected));
            r.connected = connected;
        });
    }

    fn hdr_capabilities(&self) -> HdrCapabilities {
        self.with(|r| r.hdr.clone())
    }

    fn attribute(&self, config: u32, attribute: Attribute) -> Result<i32, HwcError> {
        self.with(|r| {
            let period = *r.configs.get(config as usize).ok_or(HwcError::BadConfig)?;
            Ok(match attribute {
                Attribute::Width => r.width,
                Attribute::Height => r.height,
                Attribute::VsyncPeriod => period,
                Attribute::DpiX | Attribute::DpiY => DEFAULT_DPI,
            })
        })
    }

    fn active_config(&self) -> Result<u32, HwcError> {
        self.with(|r| Ok(r.active_config))
    }

    fn set_active_config(&mut self, config: u32) -> Result<(), HwcError> {
        self.with_mut(|r| {
            if config as usize >= r.configs.len() {
                return Err(HwcError::BadConfig);
            }
            r.active_config = config;
            r.needs_validate = true;
            Ok(())
        })
    }

    fn create_layer(&mut self) -> Result<u64, HwcError> {
        self.with_mut(|r| {
            let layer = r.next_layer;
            r.next_layer += 1;
            r.layers.insert(layer, 0);
            r.needs_validate = true;
            Ok(layer)
        })
    }

    fn destroy_layer(&mut self, layer: u64) -> Result<(), HwcError> {
        self.with_mut(|r| {
            r.layers.remove(&layer).ok_or(HwcError::BadLayer)?;
            r.needs_validate = true;
            Ok(())
        })
    }

    fn set_layer_z_order(&mut self, layer: u64, z: u32) -> Result<(), HwcError> {
        self.with_mut(|r| {
            let order = r.layers.get_mut(&layer).ok_or(HwcError::BadLayer)?;
            *order = z;
            r.needs_validate = true;
            Ok(())
        })
    }

    fn set_brightness(&mut self, level: f32) -> Result<(), HwcError> {
        self.with_mut(|r| {
            if r.display_type != Some(DisplayType::BuiltIn) {
                return Err(HwcError::Unsupported);
            }
            if !(0.0..=1.0).contains(&level) && level != -1.0 {
                return Err(HwcError::BadParameter);
            }
            r.brightness = Some(level);
            Ok(())
        })
    }

    fn dump(&self) -> String {
        self.with(|r| match &r.dump_text {
            Some(text) => text.clone(),
            None => format!(
                "display {} {:?} backing={:?} {}x{} power={:?} active={} layers={}\n",
                r.client_id,
                r.display_type,
                r.backing_id,
                r.width,
                r.height,
                r.power_mode,
                r.activated,
                r.layers.len()
            ),
        })
    }
}

#[derive(Default)]
struct EngineState {
    first_display_type: Option<DisplayType>,
    max_displays: HashMap<DisplayType, usize>,
    endpoints: Vec<EndpointInfo>,
    hdr: HashMap<i32, HdrCapabilities>,
    records: BTreeMap<u64, Arc<Mutex<DisplayRecord>>>,
    created: Vec<CreateRequest>,
    destroyed: Vec<u64>,
    fail_capability_queries: bool,
    fail_status: bool,
    fail_next_create: Option<HwcError>,
}

/// Deterministic composition engine. Clones share the same state.
#[derive(Clone, Default)]
pub struct HeadlessEngine {
    state: Arc<Mutex<EngineState>>,
}

impl HeadlessEngine {
    /// An engine whose primary endpoint is of `primary_type`, with room for
    /// four endpoints of every class.
    pub fn new(primary_type: DisplayType) -> Self {
        let engine = Self::default();
        {
            let mut state = engine.state.lock().unwrap();
            state.first_display_type = Some(primary_type);
            for display_type in [
                DisplayType::BuiltIn,
                DisplayType::Pluggable,
                DisplayType::Virtual,
            ] {
                state.max_displays.insert(display_type, 4);
            }
        }
        engine
    }

    pub fn add_endpoint(
        &self,
        backing_id: i32,
        display_type: DisplayType,
        is_primary: bool,
        is_connected: bool,
    ) {
        self.state.lock().unwrap().endpoints.push(EndpointInfo {
            backing_id,
            display_type,
            is_primary,
            is_connected,
        });
    }

    /// Flips the cable state of an endpoint. Returns false for unknown ids.
    pub fn set_connected(&self, backing_id: i32, connected: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        match state
            .endpoints
            .iter_mut()
            .find(|info| info.backing_id == backing_id)
        {
            Some(info) => {
                info.is_connected = connected;
                true
            }
            None => false,
        }
    }

    /// Backing ids of every non-primary pluggable endpoint.
    pub fn pluggable_endpoints(&self) -> Vec<i32> {
        self.state
            .lock()
            .unwrap()
            .endpoints
            .iter()
            .filter(|info| !info.is_primary && info.display_type == DisplayType::Pluggable)
            .map(|info| info.backing_id)
            .collect()
    }

    pub fn set_max_displays(&self, display_type: DisplayType, max: usize) {
        self.state
            .lock()
            .unwrap()
            .max_displays
            .insert(display_type, max);
    }

    /// HDR capabilities reported by displays later created on `backing_id`.
    pub fn set_hdr(&self, backing_id: i32, hdr: HdrCapabilities) {
        self.state.lock().unwrap().hdr.insert(backing_id, hdr);
    }

    pub fn fail_capability_queries(&self, fail: bool) {
        self.state.lock().unwrap().fail_capability_queries = fail;
    }

    pub fn fail_status(&self, fail: bool) {
        self.state.lock().unwrap().fail_status = fail;
    }

    pub fn fail_next_create(&self, error: HwcError) {
        self.state.lock().unwrap().fail_next_create = Some(error);
    }

    /// Shared record of the display most recently created for `client_id`.
    pub fn record(&self, client_id: u64) -> Option<Arc<Mutex<DisplayRecord>>> {
        self.state.lock().unwrap().records.get(&client_id).cloned()
    }

    /// Runs `f` on the display record of `client_id`.
    pub fn with_record<R>(
        &self,
        client_id: u64,
        f: impl FnOnce(&mut DisplayRecord) -> R,
    ) -> Option<R> {
        let record = self.record(client_id)?;
        let mut record = record.lock().unwrap();
        Some(f(&mut record))
    }

    pub fn created(&self) -> Vec<CreateRequest> {
        self.state.lock().unwrap().created.clone()
    }

    /// Client ids of destroyed displays, in teardown order.
    pub fn destroyed(&self) -> Vec<u64> {
        self.state.lock().unwrap().destroyed.clone()
    }
}

impl CompositionEngine for HeadlessEngine {
    fn first_display_type(&self) -> Result<DisplayType> {
        let state = self.state.lock().unwrap();
        if state.fail_capability_queries {
            anyhow::bail!("HeadlessEngine: capability query failed");
        }
        state
            .first_display_type
            .ok_or_else(|| anyhow::anyhow!("HeadlessEngine: no primary display type"))
    }

    fn max_displays(&self, display_type: DisplayType) -> Result<usize> {
        let state = self.state.lock().unwrap();
        if state.fail_capability_queries {
            anyhow::bail!("HeadlessEngine: capability query failed");
        }
        Ok(state.max_displays.get(&display_type).copied().unwrap_or(0))
    }

    fn displays_status(&self) -> Result<Vec<EndpointInfo>, HwcError> {
        let state = self.state.lock().unwrap();
        if state.fail_status {
            return Err(HwcError::NoResources);
        }
        Ok(state.endpoints.clone())
    }

    fn create_display(&self, request: &CreateRequest) -> Result<DisplayKind, HwcError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.fail_next_create.take() {
            warn!("HeadlessEngine: Failing create for {:?}", request);
            return Err(error);
        }

        let display_type = match request {
            CreateRequest::BuiltIn { .. } => Some(DisplayType::BuiltIn),
            CreateRequest::Pluggable { .. } => Some(DisplayType::Pluggable),
            CreateRequest::Virtual { .. } => Some(DisplayType::Virtual),
            CreateRequest::Placeholder { .. } => None,
        };
        let hdr = request
            .backing_id()
            .and_then(|id| state.hdr.get(&id).cloned())
            .unwrap_or_default();
        let record = Arc::new(Mutex::new(DisplayRecord::new(request, display_type, hdr)));
        state.records.insert(request.client_id(), Arc::clone(&record));
        state.created.push(request.clone());
        debug!("HeadlessEngine: Created {:?}", request);

        let display: Box<dyn DisplayOps> = Box::new(HeadlessDisplay { record });
        Ok(match request {
            CreateRequest::BuiltIn { .. } => DisplayKind::BuiltIn(display),
            CreateRequest::Pluggable { test_pattern, .. } => DisplayKind::Pluggable {
                display,
                test_pattern: test_pattern.is_some(),
            },
            CreateRequest::Virtual { .. } => DisplayKind::Virtual(display),
            CreateRequest::Placeholder { .. } => DisplayKind::Placeholder(display),
        })
    }

    fn destroy_display(&self, display: DisplayKind) {
        let client_id = display.ops().display_id();
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.records.get(&client_id) {
            record.lock().unwrap().destroyed = true;
        }
        state.destroyed.push(client_id);
        debug!("HeadlessEngine: Destroyed {:?} for client id {}", display, client_id);
    }
}

/// Polls `condition` until it holds or two seconds pass.
#[cfg(test)]
pub(crate) fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while std::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    condition()
}
