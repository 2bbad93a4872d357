// src/power_hint/service.rs
//! Power-service collaborator interface.

use std::sync::Arc;

/// Why a power-service call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HintError {
    /// The connection to the service broke. The handle must be re-resolved.
    Transport,
    /// The service does not know the hint.
    Unsupported,
    /// Any other failure reported by the service.
    Other(String),
}

impl std::fmt::Display for HintError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HintError::Transport => write!(f, "power service transport failure"),
            HintError::Unsupported => write!(f, "hint not supported"),
            HintError::Other(reason) => write!(f, "power service error: {}", reason),
        }
    }
}

impl std::error::Error for HintError {}

/// Advisory hint RPCs. Calls may block.
pub trait PowerService: Send + Sync {
    fn is_mode_supported(&self, mode: &str) -> Result<bool, HintError>;
    fn set_mode(&self, mode: &str, enabled: bool) -> Result<(), HintError>;
}

/// Resolves a fresh service handle. `None` when the service is unreachable.
pub trait PowerServiceConnector: Send + Sync {
    fn connect(&self) -> Option<Arc<dyn PowerService>>;
}
