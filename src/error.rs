// src/error.rs
//! Client-facing error type for slot operations.
//!
//! Every entry point of the session returns `Result<_, HwcError>`. The numeric
//! codes match the composer client ABI so a transport layer can forward them
//! unchanged.

/// Error returned by a display-slot operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwcError {
    /// The requested display configuration does not exist.
    BadConfig,
    /// The display id is out of range or the slot is not bound.
    BadDisplay,
    /// The layer id is unknown on this display.
    BadLayer,
    /// An argument was missing or out of range.
    BadParameter,
    /// The engine could not provide the resources (slots, planes) required.
    NoResources,
    /// Present was attempted without a usable validation.
    NotValidated,
    /// The operation is not supported by this display.
    Unsupported,
}

impl HwcError {
    /// Numeric code forwarded to composer clients.
    pub fn code(&self) -> i32 {
        match self {
            HwcError::BadConfig => 1,
            HwcError::BadDisplay => 2,
            HwcError::BadLayer => 3,
            HwcError::BadParameter => 4,
            HwcError::NoResources => 6,
            HwcError::NotValidated => 7,
            HwcError::Unsupported => 8,
        }
    }
}

impl std::fmt::Display for HwcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HwcError::BadConfig => write!(f, "bad display config"),
            HwcError::BadDisplay => write!(f, "bad display"),
            HwcError::BadLayer => write!(f, "bad layer"),
            HwcError::BadParameter => write!(f, "bad parameter"),
            HwcError::NoResources => write!(f, "no resources"),
            HwcError::NotValidated => write!(f, "display not validated"),
            HwcError::Unsupported => write!(f, "unsupported"),
        }
    }
}

impl std::error::Error for HwcError {}
