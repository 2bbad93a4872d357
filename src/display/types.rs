// src/display/types.rs
//! Value types shared between the session and the composition engine.

use crate::error::HwcError;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Display power state as requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PowerMode {
    Off,
    Doze,
    On,
    DozeSuspend,
}

impl PowerMode {
    pub fn is_doze(&self) -> bool {
        matches!(self, PowerMode::Doze | PowerMode::DozeSuspend)
    }
}

impl TryFrom<i32> for PowerMode {
    type Error = HwcError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(PowerMode::Off),
            1 => Ok(PowerMode::Doze),
            2 => Ok(PowerMode::On),
            3 => Ok(PowerMode::DozeSuspend),
            _ => Err(HwcError::BadParameter),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Connected,
    Disconnected,
}

impl TryFrom<i32> for Connection {
    type Error = HwcError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(Connection::Connected),
            2 => Ok(Connection::Disconnected),
            _ => Err(HwcError::BadParameter),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vsync {
    Enable,
    Disable,
}

impl TryFrom<i32> for Vsync {
    type Error = HwcError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(Vsync::Enable),
            2 => Ok(Vsync::Disable),
            _ => Err(HwcError::BadParameter),
        }
    }
}

/// Per-config display attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    Width,
    Height,
    VsyncPeriod,
    DpiX,
    DpiY,
}

impl TryFrom<i32> for Attribute {
    type Error = HwcError;

    fn try_from(raw: i32) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(Attribute::Width),
            2 => Ok(Attribute::Height),
            3 => Ok(Attribute::VsyncPeriod),
            4 => Ok(Attribute::DpiX),
            5 => Ok(Attribute::DpiY),
            _ => Err(HwcError::BadParameter),
        }
    }
}

/// Hardware class of an endpoint reported by the composition engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayType {
    BuiltIn,
    Pluggable,
    Virtual,
}

/// Outcome of a successful validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Validation {
    /// Layers whose composition type the client must change.
    pub num_types: u32,
    /// Layers carrying a composition request.
    pub num_requests: u32,
}

impl Validation {
    /// True when the client has to accept changes before presenting.
    pub fn has_changes(&self) -> bool {
        self.num_types > 0
    }
}

/// How the current frame reached the present stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationState {
    /// The client called validate for this frame.
    #[default]
    Normal,
    /// The client skipped validate and the display may present directly.
    SkipValidate,
    /// The session validated internally on the client's behalf.
    InternalValidated,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HdrCapabilities {
    pub types: Vec<i32>,
    pub max_luminance: f32,
    pub max_average_luminance: f32,
    pub min_luminance: f32,
}

impl HdrCapabilities {
    pub fn is_supported(&self) -> bool {
        !self.types.is_empty()
    }
}

bitflags! {
    /// Capabilities advertised for one display.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct DisplayCapabilities: u32 {
        const SKIP_CLIENT_COLOR_TRANSFORM = 1 << 0;
        const DOZE = 1 << 1;
        const BRIGHTNESS = 1 << 2;
    }
}

bitflags! {
    /// Capabilities advertised for the whole session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SessionCapabilities: u32 {
        const SKIP_CLIENT_COLOR_TRANSFORM = 1 << 0;
        const SKIP_VALIDATE = 1 << 1;
    }
}
