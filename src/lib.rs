// src/lib.rs
//! Composition-session coordinator.
//!
//! Maps stable client display ids onto displays created by an external
//! composition engine, serializes each display's validate/present sequence,
//! arbitrates shared composition hardware between secondary displays,
//! reconciles hotplug events and feeds refresh-rate and idle hints to a
//! power service.

pub mod callbacks;
pub mod config;
pub mod display;
pub mod error;
pub mod headless;
pub mod power_hint;
pub mod session;
pub mod uevent;

pub use error::HwcError;
pub use session::{ClientId, Session};
