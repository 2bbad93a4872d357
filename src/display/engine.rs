// src/display/engine.rs
//! Composition-engine boundary.
//!
//! The session never composes pixels itself. It asks a [`CompositionEngine`]
//! for endpoint snapshots and display objects, and drives each display object
//! through [`DisplayOps`]. Every call here is treated as a blocking RPC.

use crate::display::types::{
    Attribute, DisplayType, HdrCapabilities, PowerMode, Validation, ValidationState, Vsync,
};
use crate::error::HwcError;

/// Per-display object owned by a bound slot.
pub trait DisplayOps: Send {
    /// Client id the object was created for.
    fn display_id(&self) -> u64;

    /// Validates the current layer stack.
    fn validate(&mut self) -> Result<Validation, HwcError>;

    /// Returns the result of the last validate without recomputing it.
    fn validate_output(&self) -> Result<Validation, HwcError>;

    fn validation_state(&self) -> ValidationState;
    fn set_validation_state(&mut self, state: ValidationState);

    /// True when the layer stack is unchanged enough to present without validating.
    fn can_skip_validate(&self) -> bool;

    /// True when the last validate left layers for the client to compose.
    fn has_client_composition(&self) -> bool;

    /// Forces the next frame through a full validate.
    fn reset_validation(&mut self);

    /// Presents the validated frame and returns the retire fence.
    fn present(&mut self) -> Result<i32, HwcError>;

    /// Marks that the next present was triggered by a session refresh.
    fn set_pending_refresh(&mut self);

    fn set_power_mode(&mut self, mode: PowerMode) -> Result<(), HwcError>;
    fn last_power_mode(&self) -> PowerMode;
    fn set_vsync_enabled(&mut self, vsync: Vsync) -> Result<(), HwcError>;

    /// Allows or stops rendering on shared composition hardware.
    fn activate(&mut self, enable: bool) -> Result<(), HwcError>;
    fn is_activated(&self) -> bool;

    /// Records the cable state of a pluggable primary without destroying it.
    fn set_connected(&mut self, _connected: bool) {}

    fn hdr_capabilities(&self) -> HdrCapabilities;
    fn attribute(&self, config: u32, attribute: Attribute) -> Result<i32, HwcError>;
    fn active_config(&self) -> Result<u32, HwcError>;
    fn set_active_config(&mut self, config: u32) -> Result<(), HwcError>;

    fn create_layer(&mut self) -> Result<u64, HwcError>;
    fn destroy_layer(&mut self, layer: u64) -> Result<(), HwcError>;
    fn set_layer_z_order(&mut self, layer: u64, z: u32) -> Result<(), HwcError>;

    fn set_brightness(&mut self, _level: f32) -> Result<(), HwcError> {
        Err(HwcError::Unsupported)
    }

    fn dump(&self) -> String;
}

/// A live display object tagged with the class it was created as.
pub enum DisplayKind {
    BuiltIn(Box<dyn DisplayOps>),
    Pluggable {
        display: Box<dyn DisplayOps>,
        test_pattern: bool,
    },
    Virtual(Box<dyn DisplayOps>),
    /// Stands in for a pluggable primary that is not connected yet.
    Placeholder(Box<dyn DisplayOps>),
}

impl DisplayKind {
    pub fn ops(&self) -> &dyn DisplayOps {
        match self {
            DisplayKind::BuiltIn(display)
            | DisplayKind::Pluggable { display, .. }
            | DisplayKind::Virtual(display)
            | DisplayKind::Placeholder(display) => display.as_ref(),
        }
    }

    pub fn ops_mut(&mut self) -> &mut dyn DisplayOps {
        match self {
            DisplayKind::BuiltIn(display)
            | DisplayKind::Pluggable { display, .. }
            | DisplayKind::Virtual(display)
            | DisplayKind::Placeholder(display) => display.as_mut(),
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, DisplayKind::BuiltIn(_))
    }
}

impl std::fmt::Debug for DisplayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayKind::BuiltIn(_) => write!(f, "BuiltIn"),
            DisplayKind::Pluggable { test_pattern, .. } => {
                write!(f, "Pluggable {{ test_pattern: {} }}", test_pattern)
            }
            DisplayKind::Virtual(_) => write!(f, "Virtual"),
            DisplayKind::Placeholder(_) => write!(f, "Placeholder"),
        }
    }
}

/// Colour depth and pattern requested for a pluggable test-pattern display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestPattern {
    pub bpp: u32,
    pub pattern: u32,
}

/// What the session asks the engine to create for a slot.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateRequest {
    BuiltIn {
        client_id: u64,
        backing_id: i32,
    },
    Pluggable {
        client_id: u64,
        backing_id: i32,
        test_pattern: Option<TestPattern>,
    },
    Virtual {
        client_id: u64,
        backing_id: i32,
        width: u32,
        height: u32,
    },
    Placeholder {
        client_id: u64,
    },
}

impl CreateRequest {
    pub fn client_id(&self) -> u64 {
        match self {
            CreateRequest::BuiltIn { client_id, .. }
            | CreateRequest::Pluggable { client_id, .. }
            | CreateRequest::Virtual { client_id, .. }
            | CreateRequest::Placeholder { client_id } => *client_id,
        }
    }

    /// Engine handle for the endpoint, `None` for a placeholder.
    pub fn backing_id(&self) -> Option<i32> {
        match self {
            CreateRequest::BuiltIn { backing_id, .. }
            | CreateRequest::Pluggable { backing_id, .. }
            | CreateRequest::Virtual { backing_id, .. } => Some(*backing_id),
            CreateRequest::Placeholder { .. } => None,
        }
    }
}

/// One row of the engine's endpoint snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub backing_id: i32,
    pub display_type: DisplayType,
    pub is_primary: bool,
    pub is_connected: bool,
}

/// The external composition engine.
pub trait CompositionEngine: Send + Sync {
    /// Class of the endpoint that drives the primary slot.
    fn first_display_type(&self) -> anyhow::Result<DisplayType>;

    /// Platform maximum of concurrently bound endpoints of one class.
    fn max_displays(&self, display_type: DisplayType) -> anyhow::Result<usize>;

    /// Fresh snapshot of every endpoint the engine knows about.
    fn displays_status(&self) -> Result<Vec<EndpointInfo>, HwcError>;

    fn create_display(&self, request: &CreateRequest) -> Result<DisplayKind, HwcError>;

    /// Tears down a display object and releases its buffers and fences.
    fn destroy_display(&self, display: DisplayKind);
}
