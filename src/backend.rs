//! The device backend capability consumed by the streaming core.
//!
//! One implementation exists per camera vendor; it owns the SDK binding or
//! wire protocol for that hardware and exposes the small surface the
//! controller needs. The backend is resolved at configuration time and
//! handed to the core as a boxed trait object; after open it is driven
//! exclusively by the controller thread, so implementations need no
//! internal locking for the `&mut self` methods.

use std::time::Duration;

use crate::control::{ControlId, ControlRange, ControlValue};
use crate::error::CamResult;
use crate::videomode::VideoMode;

/// Static facts about the connected sensor, read once at open time.
#[derive(Debug, Clone, Copy)]
pub struct SensorInfo {
    /// Full sensor width in pixels.
    pub max_width: u32,
    /// Full sensor height in pixels.
    pub max_height: u32,
    /// Whether the sensor has a colour filter array.
    pub is_colour: bool,
    /// Deepest raw readout the hardware supports (8 or 16).
    pub max_bit_depth: u32,
    /// The video mode the camera negotiates at connect time.
    pub default_mode: VideoMode,
}

impl SensorInfo {
    /// Worst-case bytes per pixel across every mode this sensor can
    /// produce, used to size the pre-allocated frame buffers once.
    pub fn worst_case_bytes_per_pixel(&self) -> usize {
        let raw = (self.max_bit_depth as usize).div_ceil(8);
        if self.is_colour {
            raw.max(VideoMode::Rgb24.bytes_per_pixel())
        } else {
            raw
        }
    }
}

/// Readout geometry and format programmed into the device together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Readout width in (binned) pixels.
    pub width: u32,
    /// Readout height in (binned) pixels.
    pub height: u32,
    /// Binning factor (1 = none).
    pub bin_mode: u32,
    /// Pixel encoding to stream.
    pub video_mode: VideoMode,
    /// ROI origin, when the readout window is smaller than the sensor.
    /// `None` means full frame / driver default placement.
    pub origin: Option<(u32, u32)>,
}

/// Vendor-specific device access, one implementation per camera family.
///
/// `get_frame` must honour its timeout so that a pending stop request is
/// never starved for longer than one bounded wait.
pub trait DeviceBackend: Send {
    /// Human-readable camera identification for logs.
    fn camera_name(&self) -> &str;

    /// Sensor capabilities, stable for the life of the connection.
    fn sensor_info(&self) -> SensorInfo;

    /// Reports the constraint range for a control, or `InvalidControl`
    /// if this hardware does not implement it.
    fn control_range(&self, id: ControlId) -> CamResult<ControlRange>;

    /// Writes one control value to the hardware.
    fn set_control(&mut self, id: ControlId, value: &ControlValue) -> CamResult<()>;

    /// Reads one control value back from the hardware.
    fn get_control(&mut self, id: ControlId) -> CamResult<ControlValue>;

    /// Programs readout geometry and video mode in one operation.
    fn set_geometry(&mut self, geometry: &Geometry) -> CamResult<()>;

    /// Constrains the frame rate to `numerator / denominator` seconds per
    /// frame, for hardware with fixed frame-interval tables.
    fn set_frame_interval(&mut self, numerator: u32, denominator: u32) -> CamResult<()>;

    /// Begins continuous capture into the device's internal pipeline.
    fn start_capture(&mut self) -> CamResult<()>;

    /// Halts continuous capture.
    fn stop_capture(&mut self) -> CamResult<()>;

    /// Copies the next available frame into `buf`, waiting at most
    /// `timeout`. Returns `Ok(Some(len))` with the frame length on
    /// success and `Ok(None)` when the wait elapsed without a frame.
    fn get_frame(&mut self, buf: &mut [u8], timeout: Duration) -> CamResult<Option<usize>>;

    /// Releases the device handle. Called exactly once, after both core
    /// threads have exited.
    fn close(&mut self);
}
