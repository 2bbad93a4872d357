// src/display/mod.rs
//! Display model shared by the session and the composition engine.
//!
//! - `types`: enums, validation results, capability flags
//! - `engine`: the `CompositionEngine` and `DisplayOps` collaborator traits

pub mod engine;
pub mod types;

pub use engine::{
    CompositionEngine, CreateRequest, DisplayKind, DisplayOps, EndpointInfo, TestPattern,
};
pub use types::{
    Attribute, Connection, DisplayCapabilities, DisplayType, HdrCapabilities, PowerMode,
    SessionCapabilities, Validation, ValidationState, Vsync,
};
