//! Error types for the camera abstraction layer.
//!
//! All fallible operations in this crate return [`CamResult`]. Per-command
//! errors are reported only to the caller of that command and never abort
//! the controller loop; construction-time errors during camera open cause a
//! full teardown and are returned from `open` itself.

use thiserror::Error;

use crate::control::{ControlId, ControlType};

/// Convenience alias for results using the camera error type.
pub type CamResult<T> = std::result::Result<T, CameraError>;

/// Errors reported by the camera core and by device backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    /// The control id is not recognised by this camera, or a read-only
    /// control was used in a set command.
    #[error("Unrecognised or unsettable control: {0:?}")]
    InvalidControl(ControlId),

    /// The supplied value's tag does not match the control's declared type.
    #[error("Invalid value type {found:?} for control {control:?} (expected {expected:?})")]
    InvalidControlType {
        /// The control being set.
        control: ControlId,
        /// The type the control declares.
        expected: ControlType,
        /// The type that was supplied.
        found: ControlType,
    },

    /// The value lies outside the control's min/max constraints, or a
    /// requested geometry exceeds the sensor limits.
    #[error("Value {value} out of range [{min}, {max}] for {what}")]
    OutOfRange {
        /// Description of the constrained quantity.
        what: String,
        /// The offending value.
        value: i64,
        /// Lower bound.
        min: i64,
        /// Upper bound.
        max: i64,
    },

    /// The command is not valid in the current streaming state, e.g.
    /// starting a stream that is already running.
    #[error("Command not valid in the current streaming state")]
    InvalidCommand,

    /// A device backend call failed.
    #[error("Device backend failure: {0}")]
    SystemError(String),

    /// Buffer or queue allocation failed during device open.
    #[error("Buffer allocation failed: {0}")]
    MemAlloc(String),

    /// The camera has already been closed.
    #[error("Camera is not connected")]
    NotConnected,
}

impl CameraError {
    /// Shorthand for a backend failure carrying a description.
    pub fn system(msg: impl Into<String>) -> Self {
        CameraError::SystemError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_strings_are_descriptive() {
        let err = CameraError::OutOfRange {
            what: "gain".to_string(),
            value: 900,
            min: 0,
            max: 600,
        };
        assert!(err.to_string().contains("900"));
        assert!(err.to_string().contains("gain"));
    }
}
