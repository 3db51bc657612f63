//! Mock device backend for tests and hardware-free development.
//!
//! Serves synthetic frames at a configurable pace and records every call
//! it receives in a shared [`MockState`], so tests can drive the full
//! streaming core through the public [`Camera`](crate::Camera) API and
//! then assert on what reached the "hardware". Error injection flags
//! allow exercising the failure paths without a flaky device.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::backend::{DeviceBackend, Geometry, SensorInfo};
use crate::control::{ControlId, ControlRange, ControlValue};
use crate::error::{CamResult, CameraError};
use crate::videomode::VideoMode;

/// Everything the mock records, shared with the test through an
/// `Arc<Mutex<_>>` handle returned by the constructors.
#[derive(Debug, Default)]
pub struct MockState {
    /// Every `set_control` call, in order.
    pub controls_applied: Vec<(ControlId, ControlValue)>,
    /// Every geometry programmed, in order.
    pub geometry_history: Vec<Geometry>,
    /// Frame interval constraints applied, in order.
    pub intervals_applied: Vec<(u32, u32)>,
    /// Whether continuous capture is currently armed.
    pub capture_running: bool,
    /// Number of `start_capture` calls.
    pub start_count: u32,
    /// Number of `stop_capture` calls.
    pub stop_count: u32,
    /// Whether `close` has been called.
    pub closed: bool,
    /// Total frames served by `get_frame`.
    pub frames_served: u64,
    /// When set, the next `start_capture` fails and clears the flag.
    pub fail_next_start: bool,
    /// When set, the next `set_control` fails and clears the flag.
    pub fail_next_set_control: bool,
    /// When set, the next `get_frame` fails and clears the flag.
    pub fail_next_frame: bool,
}

/// A simulated camera implementing [`DeviceBackend`].
pub struct MockBackend {
    name: String,
    sensor: SensorInfo,
    state: Arc<Mutex<MockState>>,
    /// Synthetic inter-frame time; a frame becomes available once per
    /// period while capture is armed.
    frame_period: Duration,
    geometry: Geometry,
}

impl MockBackend {
    /// A 1280x960 colour camera with 16-bit raw support, defaulting to
    /// demosaiced RGB24. Returns the backend and the shared state handle.
    pub fn colour(name: &str) -> (Self, Arc<Mutex<MockState>>) {
        Self::build(
            name,
            SensorInfo {
                max_width: 1280,
                max_height: 960,
                is_colour: true,
                max_bit_depth: 16,
                default_mode: VideoMode::Rgb24,
            },
        )
    }

    /// A 1280x960 mono camera with 16-bit support, defaulting to RAW8.
    pub fn mono(name: &str) -> (Self, Arc<Mutex<MockState>>) {
        Self::build(
            name,
            SensorInfo {
                max_width: 1280,
                max_height: 960,
                is_colour: false,
                max_bit_depth: 16,
                default_mode: VideoMode::Raw8,
            },
        )
    }

    fn build(name: &str, sensor: SensorInfo) -> (Self, Arc<Mutex<MockState>>) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let backend = MockBackend {
            name: name.to_string(),
            sensor,
            state: Arc::clone(&state),
            frame_period: Duration::from_millis(5),
            geometry: Geometry {
                width: sensor.max_width,
                height: sensor.max_height,
                bin_mode: 1,
                video_mode: sensor.default_mode,
                origin: None,
            },
        };
        (backend, state)
    }

    /// Overrides the synthetic inter-frame time.
    pub fn set_frame_period(&mut self, period: Duration) {
        self.frame_period = period;
    }

    fn range_for(&self, id: ControlId) -> Option<ControlRange> {
        let range = match id {
            ControlId::Brightness => ControlRange {
                min: 0,
                max: 255,
                step: 1,
                default: 8,
            },
            ControlId::Gain => ControlRange {
                min: 0,
                max: 600,
                step: 1,
                default: 100,
            },
            ControlId::Gamma => ControlRange {
                min: 1,
                max: 100,
                step: 1,
                default: 50,
            },
            ControlId::Exposure => ControlRange {
                min: 32,
                max: 10_000_000,
                step: 0,
                default: 100_000,
            },
            ControlId::RedBalance | ControlId::BlueBalance => {
                if !self.sensor.is_colour {
                    return None;
                }
                ControlRange {
                    min: 1,
                    max: 99,
                    step: 1,
                    default: 50,
                }
            }
            ControlId::Binning => ControlRange {
                min: 1,
                max: 4,
                step: 1,
                default: 1,
            },
            ControlId::BitDepth => ControlRange {
                min: 8,
                max: i64::from(self.sensor.max_bit_depth),
                step: 0,
                default: i64::from(self.sensor.default_mode.bit_depth()),
            },
            ControlId::ColourMode => {
                if !self.sensor.is_colour {
                    return None;
                }
                ControlRange {
                    min: 0,
                    max: 1,
                    step: 1,
                    default: 0,
                }
            }
            ControlId::HFlip | ControlId::VFlip | ControlId::Cooler => ControlRange {
                min: 0,
                max: 1,
                step: 1,
                default: 0,
            },
            ControlId::TempSetpoint => ControlRange {
                min: -40_000,
                max: 20_000,
                step: 1,
                default: 0,
            },
            ControlId::CoolerPower => ControlRange {
                min: 0,
                max: 100,
                step: 1,
                default: 0,
            },
            ControlId::DroppedFrames | ControlId::DroppedFramesReset => return None,
        };
        Some(range)
    }
}

impl DeviceBackend for MockBackend {
    fn camera_name(&self) -> &str {
        &self.name
    }

    fn sensor_info(&self) -> SensorInfo {
        self.sensor
    }

    fn control_range(&self, id: ControlId) -> CamResult<ControlRange> {
        self.range_for(id).ok_or(CameraError::InvalidControl(id))
    }

    fn set_control(&mut self, id: ControlId, value: &ControlValue) -> CamResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_set_control {
            state.fail_next_set_control = false;
            return Err(CameraError::system("injected set_control failure"));
        }
        if self.range_for(id).is_none() {
            return Err(CameraError::InvalidControl(id));
        }
        state.controls_applied.push((id, *value));
        Ok(())
    }

    fn get_control(&mut self, id: ControlId) -> CamResult<ControlValue> {
        let state = self.state.lock().unwrap();
        if let Some((_, value)) = state
            .controls_applied
            .iter()
            .rev()
            .find(|(applied, _)| *applied == id)
        {
            return Ok(*value);
        }
        drop(state);
        let range = self.range_for(id).ok_or(CameraError::InvalidControl(id))?;
        Ok(ControlValue::Int64(range.default))
    }

    fn set_geometry(&mut self, geometry: &Geometry) -> CamResult<()> {
        self.geometry = *geometry;
        self.state.lock().unwrap().geometry_history.push(*geometry);
        Ok(())
    }

    fn set_frame_interval(&mut self, numerator: u32, denominator: u32) -> CamResult<()> {
        self.state
            .lock()
            .unwrap()
            .intervals_applied
            .push((numerator, denominator));
        Ok(())
    }

    fn start_capture(&mut self) -> CamResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_start {
            state.fail_next_start = false;
            return Err(CameraError::system("injected start_capture failure"));
        }
        state.capture_running = true;
        state.start_count += 1;
        Ok(())
    }

    fn stop_capture(&mut self) -> CamResult<()> {
        let mut state = self.state.lock().unwrap();
        state.capture_running = false;
        state.stop_count += 1;
        Ok(())
    }

    fn get_frame(&mut self, buf: &mut [u8], timeout: Duration) -> CamResult<Option<usize>> {
        {
            let mut state = self.state.lock().unwrap();
            if state.fail_next_frame {
                state.fail_next_frame = false;
                return Err(CameraError::system("injected frame failure"));
            }
            if !state.capture_running {
                return Err(CameraError::system("capture is not armed"));
            }
        }

        if self.frame_period > timeout {
            thread::sleep(timeout);
            return Ok(None);
        }
        thread::sleep(self.frame_period);

        let frame_len = self.geometry.width as usize
            * self.geometry.height as usize
            * self.geometry.video_mode.bytes_per_pixel();
        let length = frame_len.min(buf.len());

        let mut state = self.state.lock().unwrap();
        let serial = state.frames_served;
        state.frames_served += 1;
        drop(state);

        // Frame serial in the first bytes, pseudo-noise after, so tests
        // can identify a frame and the data still looks like a sensor's.
        let header = serial.to_le_bytes();
        let noise: u8 = rand::thread_rng().gen();
        for (i, byte) in buf[..length].iter_mut().enumerate() {
            *byte = match header.get(i) {
                Some(&h) => h,
                None => (i as u8).wrapping_mul(31).wrapping_add(noise),
            };
        }
        Ok(Some(length))
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closed = true;
    }
}
