//! Error types for fleet operations

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    /// The bridge binary could not be launched at all.
    #[error("Bridge tool unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Command timed out.")]
    Timeout,

    /// The bridge ran but exited nonzero; carries its diagnostic text.
    #[error("Command rejected (exit {code:?}): {diagnostic}")]
    Rejected {
        code: Option<i32>,
        diagnostic: String,
    },

    #[error("cancelled")]
    Cancelled,

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No devices detected.")]
    NoDevices,

    #[error("Device not in the current scan: {0}")]
    UnknownDevice(String),

    #[error("Operation not confirmed: {0}")]
    Confirmation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    /// Cancellation ends loops silently instead of being retried or reported.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FleetError::Cancelled)
    }

    /// Failures that the scroll-and-retry fallback of the element locator handles.
    pub fn is_locate_miss(&self) -> bool {
        matches!(self, FleetError::ElementNotFound(_) | FleetError::Parse(_))
    }
}

pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_messages() {
        assert_eq!(FleetError::Timeout.to_string(), "Command timed out.");
        assert_eq!(FleetError::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_locate_miss_classification() {
        assert!(FleetError::ElementNotFound("Target".into()).is_locate_miss());
        assert!(FleetError::Parse("bad bounds".into()).is_locate_miss());
        assert!(!FleetError::Timeout.is_locate_miss());
        assert!(FleetError::Cancelled.is_cancelled());
    }
}
