//! Camera controls and their typed values.
//!
//! Every camera parameter the application can query or set is identified by
//! a [`ControlId`]. Each control declares exactly one [`ControlType`]; a
//! [`ControlValue`] carries both the tag and the payload, and the tag must
//! match the declared type before the payload is interpreted. Validation
//! happens on the submitting thread, before a command is queued, so the
//! controller thread only ever sees well-typed values.

use crate::error::{CamResult, CameraError};

/// Identifies one camera control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlId {
    /// Sensor brightness / black level offset.
    Brightness,
    /// Sensor analogue gain.
    Gain,
    /// Gamma correction.
    Gamma,
    /// Absolute exposure time in microseconds.
    Exposure,
    /// Red channel white-balance weight.
    RedBalance,
    /// Blue channel white-balance weight.
    BlueBalance,
    /// N×N pixel binning factor.
    Binning,
    /// Output bit depth (8, 12 or 16).
    BitDepth,
    /// Raw (undemosaiced) output toggle for colour sensors.
    ColourMode,
    /// Horizontal mirroring.
    HFlip,
    /// Vertical mirroring.
    VFlip,
    /// Thermoelectric cooler on/off.
    Cooler,
    /// Cooler target temperature, millidegrees C.
    TempSetpoint,
    /// Cooler drive power, percent.
    CoolerPower,
    /// Frames dropped because no buffer was free (read-only).
    DroppedFrames,
    /// Resets the dropped-frame counter to zero.
    DroppedFramesReset,
}

impl ControlId {
    /// Every control the abstraction layer knows about, for iterating
    /// backend capabilities at open time.
    pub const ALL: [ControlId; 16] = [
        ControlId::Brightness,
        ControlId::Gain,
        ControlId::Gamma,
        ControlId::Exposure,
        ControlId::RedBalance,
        ControlId::BlueBalance,
        ControlId::Binning,
        ControlId::BitDepth,
        ControlId::ColourMode,
        ControlId::HFlip,
        ControlId::VFlip,
        ControlId::Cooler,
        ControlId::TempSetpoint,
        ControlId::CoolerPower,
        ControlId::DroppedFrames,
        ControlId::DroppedFramesReset,
    ];

    /// The value type this control declares.
    pub fn declared_type(self) -> ControlType {
        match self {
            ControlId::Brightness
            | ControlId::Gain
            | ControlId::Gamma
            | ControlId::RedBalance
            | ControlId::BlueBalance
            | ControlId::TempSetpoint
            | ControlId::CoolerPower => ControlType::Int32,
            ControlId::Exposure => ControlType::Int64,
            ControlId::Binning | ControlId::BitDepth => ControlType::Discrete,
            ControlId::ColourMode
            | ControlId::HFlip
            | ControlId::VFlip
            | ControlId::Cooler
            | ControlId::DroppedFramesReset => ControlType::Boolean,
            ControlId::DroppedFrames => ControlType::Readonly,
        }
    }
}

/// The declared type of a control's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    /// Signed 32-bit integer.
    Int32,
    /// Signed 64-bit integer.
    Int64,
    /// On/off.
    Boolean,
    /// One value out of a small fixed set (e.g. bin modes, bit depths).
    Discrete,
    /// Index into a backend-defined menu of options.
    Menu,
    /// Value can be read but never set.
    Readonly,
}

/// A tagged control value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlValue {
    /// 32-bit integer payload.
    Int32(i32),
    /// 64-bit integer payload.
    Int64(i64),
    /// Boolean payload.
    Boolean(bool),
    /// Discrete selection payload.
    Discrete(u32),
    /// Menu index payload.
    Menu(u32),
}

impl ControlValue {
    /// The tag of this value.
    pub fn control_type(&self) -> ControlType {
        match self {
            ControlValue::Int32(_) => ControlType::Int32,
            ControlValue::Int64(_) => ControlType::Int64,
            ControlValue::Boolean(_) => ControlType::Boolean,
            ControlValue::Discrete(_) => ControlType::Discrete,
            ControlValue::Menu(_) => ControlType::Menu,
        }
    }

    /// Checks the tag against `control`'s declared type.
    ///
    /// Read-only controls reject every set attempt with `InvalidControl`.
    pub fn check_type(&self, control: ControlId) -> CamResult<()> {
        let expected = control.declared_type();
        if expected == ControlType::Readonly {
            return Err(CameraError::InvalidControl(control));
        }
        let found = self.control_type();
        if found == expected {
            Ok(())
        } else {
            Err(CameraError::InvalidControlType {
                control,
                expected,
                found,
            })
        }
    }

    /// The payload widened to i64, for range checks and caching.
    pub fn as_i64(&self) -> i64 {
        match *self {
            ControlValue::Int32(v) => i64::from(v),
            ControlValue::Int64(v) => v,
            ControlValue::Boolean(v) => i64::from(v),
            ControlValue::Discrete(v) | ControlValue::Menu(v) => i64::from(v),
        }
    }
}

/// Min/max/step/default constraints a backend reports for a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRange {
    /// Smallest accepted value.
    pub min: i64,
    /// Largest accepted value.
    pub max: i64,
    /// Granularity; 0 means unconstrained.
    pub step: i64,
    /// Value the device starts out with.
    pub default: i64,
}

impl ControlRange {
    /// Validates `value` against this range for error reporting on `control`.
    pub fn check(&self, control: ControlId, value: &ControlValue) -> CamResult<()> {
        let v = value.as_i64();
        if v < self.min || v > self.max {
            return Err(CameraError::OutOfRange {
                what: format!("{control:?}"),
                value: v,
                min: self.min,
                max: self.max,
            });
        }
        if self.step > 1 && (v - self.min) % self.step != 0 {
            return Err(CameraError::OutOfRange {
                what: format!("{control:?} (step {})", self.step),
                value: v,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_must_match_declared_type() {
        let val = ControlValue::Boolean(true);
        assert!(val.check_type(ControlId::HFlip).is_ok());
        match val.check_type(ControlId::Gain) {
            Err(CameraError::InvalidControlType {
                control, expected, ..
            }) => {
                assert_eq!(control, ControlId::Gain);
                assert_eq!(expected, ControlType::Int32);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn readonly_controls_reject_sets() {
        let val = ControlValue::Int64(0);
        assert_eq!(
            val.check_type(ControlId::DroppedFrames),
            Err(CameraError::InvalidControl(ControlId::DroppedFrames))
        );
    }

    #[test]
    fn range_check_enforces_bounds_and_step() {
        let range = ControlRange {
            min: 0,
            max: 100,
            step: 10,
            default: 50,
        };
        assert!(range.check(ControlId::Gain, &ControlValue::Int32(50)).is_ok());
        assert!(range.check(ControlId::Gain, &ControlValue::Int32(101)).is_err());
        assert!(range.check(ControlId::Gain, &ControlValue::Int32(55)).is_err());
    }
}
