//! The per-device controller thread.
//!
//! A single thread owns the device backend and serializes every mutation:
//! it drains the command queue fully, then, while streaming, pulls at
//! most one frame per iteration into a free buffer and hands it to the
//! dispatch thread. The loop blocks only when idle and not streaming;
//! while streaming it never waits longer than the bounded frame timeout,
//! so a stop request is always observed promptly.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;

use crate::backend::{DeviceBackend, Geometry, SensorInfo};
use crate::command::{Command, CommandKind};
use crate::config::CameraConfig;
use crate::control::{ControlId, ControlValue};
use crate::dispatch::CallbackEvent;
use crate::error::{CamResult, CameraError};
use crate::frame::FrameCallback;
use crate::state::Shared;
use crate::videomode::{transition, ModeEvent, VideoMode};

/// Interval between free-count polls while draining pending deliveries
/// during stop-streaming.
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Owns the backend between `Camera::open` handing it over and the
/// controller thread returning it at exit. The backend lives in an
/// `Option` so that a `Controller` dropped without ever running, which
/// happens when thread spawning fails, still closes the device via
/// [`Drop`].
pub(crate) struct Controller {
    shared: Arc<Shared>,
    backend: Option<Box<dyn DeviceBackend + Send>>,
    sensor: SensorInfo,
    config: CameraConfig,
    name: String,
    sequence: u64,
}

impl Controller {
    pub fn new(
        shared: Arc<Shared>,
        backend: Box<dyn DeviceBackend + Send>,
        config: CameraConfig,
    ) -> Self {
        let sensor = backend.sensor_info();
        let name = backend.camera_name().to_string();
        Controller {
            shared,
            backend: Some(backend),
            sensor,
            config,
            name,
            sequence: 0,
        }
    }

    /// Main loop. Returns the backend to the closing thread so the device
    /// handle is released only after both threads have been joined.
    pub fn run(mut self) -> Option<Box<dyn DeviceBackend + Send>> {
        log::debug!("controller thread started for {}", self.name);
        loop {
            if self.shared.stop_controller.load(Ordering::Acquire) {
                break;
            }

            // The only true idle wait: nothing queued and not streaming.
            let streaming = self.shared.stream.lock().unwrap().is_streaming;
            if !streaming && self.shared.command_queue.is_empty() {
                self.shared
                    .command_queue
                    .wait_nonempty(|| !self.shared.stop_controller.load(Ordering::Acquire));
            }

            while let Some(command) = self.shared.command_queue.try_pop() {
                let Command {
                    kind,
                    completion,
                    on_complete,
                } = command;
                let result = self.process(kind);
                if let Some(callback) = on_complete {
                    self.shared.callback_queue.push(CallbackEvent::CommandComplete {
                        callback,
                        result,
                    });
                } else if let Some(completion) = completion {
                    completion.complete(result);
                }
            }

            let streaming = self.shared.stream.lock().unwrap().is_streaming;
            if streaming {
                self.acquire_frame();
            }
        }
        log::debug!("controller thread exiting for {}", self.name);
        self.backend.take()
    }

    fn process(&mut self, kind: CommandKind) -> CamResult<()> {
        match kind {
            CommandKind::SetControl { id, value } => self.process_set_control(id, value),
            CommandKind::SetResolution { x, y } | CommandKind::SetRoi { x, y } => {
                self.process_set_geometry(x, y)
            }
            CommandKind::SetFrameInterval {
                numerator,
                denominator,
            } => self.process_set_frame_interval(numerator, denominator),
            CommandKind::StartStreaming { callback } => self.process_start_streaming(callback),
            CommandKind::StopStreaming => self.process_stop_streaming(),
        }
    }

    fn process_set_control(&mut self, id: ControlId, value: ControlValue) -> CamResult<()> {
        match id {
            ControlId::Brightness
            | ControlId::Gain
            | ControlId::Gamma
            | ControlId::RedBalance
            | ControlId::BlueBalance
            | ControlId::TempSetpoint
            | ControlId::CoolerPower
            | ControlId::Cooler
            | ControlId::HFlip
            | ControlId::VFlip => {
                // Cached state is updated only after the hardware accepted
                // the value.
                let backend = self.backend.as_mut().ok_or(CameraError::NotConnected)?;
                backend.set_control(id, &value)?;
                self.shared.cache_control(id, value);
                Ok(())
            }

            ControlId::Exposure => {
                let backend = self.backend.as_mut().ok_or(CameraError::NotConnected)?;
                backend.set_control(id, &value)?;
                self.shared.stream.lock().unwrap().exposure_us = value.as_i64();
                self.shared.cache_control(id, value);
                Ok(())
            }

            ControlId::Binning => {
                let ControlValue::Discrete(bin) = value else {
                    return Err(CameraError::InvalidControl(id));
                };
                if bin == 0 {
                    return Err(CameraError::OutOfRange {
                        what: "bin mode".to_string(),
                        value: 0,
                        min: 1,
                        max: 8,
                    });
                }
                self.shared.stream.lock().unwrap().bin_mode = bin;
                self.reconfigure()?;
                self.shared.cache_control(id, value);
                Ok(())
            }

            ControlId::BitDepth => self.process_bit_depth(value),

            ControlId::ColourMode => self.process_colour_mode(value),

            ControlId::DroppedFramesReset => {
                self.shared.dropped_frames.store(0, Ordering::Relaxed);
                Ok(())
            }

            ControlId::DroppedFrames => Err(CameraError::InvalidControl(id)),
        }
    }

    /// Bit-depth changes on colour cameras run through the mode FSM since
    /// the two toggles share one hardware mode register; mono cameras map
    /// the depth straight to a raw mode.
    fn process_bit_depth(&mut self, value: ControlValue) -> CamResult<()> {
        let depth = match value {
            ControlValue::Discrete(16) | ControlValue::Discrete(12) => 16,
            ControlValue::Discrete(8) => 8,
            other => {
                return Err(CameraError::OutOfRange {
                    what: "bit depth".to_string(),
                    value: other.as_i64(),
                    min: 8,
                    max: 16,
                })
            }
        };
        {
            let mut stream = self.shared.stream.lock().unwrap();
            if self.sensor.is_colour {
                let (next, mode) = transition(stream.fsm, ModeEvent::BitDepthToggled);
                stream.fsm = next;
                stream.video_mode = mode;
            } else {
                stream.video_mode = if depth == 16 {
                    VideoMode::Raw16
                } else {
                    VideoMode::Raw8
                };
            }
            stream.bit_depth = depth;
        }
        self.reconfigure()?;
        self.shared
            .cache_control(ControlId::BitDepth, ControlValue::Discrete(depth));
        Ok(())
    }

    /// The raw/demosaic toggle only exists on colour sensors. The
    /// resulting bit depth is dictated by the mode the FSM lands on.
    fn process_colour_mode(&mut self, value: ControlValue) -> CamResult<()> {
        if !self.sensor.is_colour {
            return Err(CameraError::InvalidControl(ControlId::ColourMode));
        }
        let raw_now;
        {
            let mut stream = self.shared.stream.lock().unwrap();
            let (next, mode) = transition(stream.fsm, ModeEvent::RawModeToggled);
            stream.fsm = next;
            stream.video_mode = mode;
            stream.bit_depth = mode.bit_depth();
            raw_now = mode != VideoMode::Rgb24;
        }
        self.reconfigure()?;
        self.shared
            .cache_control(ControlId::ColourMode, ControlValue::Boolean(raw_now));
        let _ = value; // toggle semantics: the requested payload is not consulted
        Ok(())
    }

    fn process_set_geometry(&mut self, x: u32, y: u32) -> CamResult<()> {
        if x == 0 || y == 0 || x > self.sensor.max_width || y > self.sensor.max_height {
            return Err(CameraError::OutOfRange {
                what: "resolution".to_string(),
                value: i64::from(x.max(y)),
                min: 1,
                max: i64::from(self.sensor.max_width.max(self.sensor.max_height)),
            });
        }
        {
            let mut stream = self.shared.stream.lock().unwrap();
            stream.x_size = x;
            stream.y_size = y;
        }
        self.reconfigure()
    }

    fn process_set_frame_interval(&mut self, numerator: u32, denominator: u32) -> CamResult<()> {
        if denominator == 0 {
            return Err(CameraError::OutOfRange {
                what: "frame interval denominator".to_string(),
                value: 0,
                min: 1,
                max: i64::from(u32::MAX),
            });
        }
        let backend = self.backend.as_mut().ok_or(CameraError::NotConnected)?;
        backend.set_frame_interval(numerator, denominator)?;
        self.shared.stream.lock().unwrap().frame_interval = Some((numerator, denominator));
        Ok(())
    }

    fn process_start_streaming(&mut self, callback: FrameCallback) -> CamResult<()> {
        {
            let mut stream = self.shared.stream.lock().unwrap();
            if stream.is_streaming {
                return Err(CameraError::InvalidCommand);
            }
            stream.callback = Some(callback);
        }
        let backend = self.backend.as_mut().ok_or(CameraError::NotConnected)?;
        if let Err(e) = backend.start_capture() {
            self.shared.stream.lock().unwrap().callback = None;
            return Err(e);
        }
        self.sequence = 0;
        self.shared.stream.lock().unwrap().is_streaming = true;
        log::info!("{}: streaming started", self.name);
        Ok(())
    }

    fn process_stop_streaming(&mut self) -> CamResult<()> {
        {
            let mut stream = self.shared.stream.lock().unwrap();
            if !stream.is_streaming {
                return Err(CameraError::InvalidCommand);
            }
            stream.is_streaming = false;
            stream.callback = None;
        }
        let backend = self.backend.as_mut().ok_or(CameraError::NotConnected)?;
        if let Err(e) = backend.stop_capture() {
            log::warn!("{}: stop_capture failed: {e}", self.name);
        }

        // Wait for the callback queue to drain; a later close could
        // otherwise free a buffer out from under an executing callback.
        while self.shared.pool.free_count() != self.shared.pool.count() {
            thread::sleep(DRAIN_POLL);
        }
        log::info!("{}: streaming stopped", self.name);
        Ok(())
    }

    /// Pauses capture if active, reprograms geometry and mode, recomputes
    /// the frame length, then re-arms. Runs entirely on the controller
    /// thread, so no command can observe a half-reconfigured device.
    fn reconfigure(&mut self) -> CamResult<()> {
        let backend = self.backend.as_mut().ok_or(CameraError::NotConnected)?;
        let restart = {
            let mut stream = self.shared.stream.lock().unwrap();
            if stream.is_streaming {
                stream.is_streaming = false;
                true
            } else {
                false
            }
        };
        if restart {
            if let Err(e) = backend.stop_capture() {
                log::warn!("{}: stop_capture failed: {e}", self.name);
            }
        }

        let (x, y, bin, mode) = {
            let stream = self.shared.stream.lock().unwrap();
            (stream.x_size, stream.y_size, stream.bin_mode, stream.video_mode)
        };
        let mut actual_x = x;
        let mut actual_y = y;
        if actual_x * bin > self.sensor.max_width {
            actual_x = self.sensor.max_width / bin;
        }
        if actual_y * bin > self.sensor.max_height {
            actual_y = self.sensor.max_height / bin;
        }
        // Centre an un-binned window that is smaller than the sensor.
        let origin = if bin == 1
            && (actual_x < self.sensor.max_width || actual_y < self.sensor.max_height)
        {
            Some((
                (self.sensor.max_width - actual_x) / 2,
                (self.sensor.max_height - actual_y) / 2,
            ))
        } else {
            None
        };
        backend.set_geometry(&Geometry {
            width: actual_x,
            height: actual_y,
            bin_mode: bin,
            video_mode: mode,
            origin,
        })?;

        let mut stream = self.shared.stream.lock().unwrap();
        stream.x_size = actual_x;
        stream.y_size = actual_y;
        stream.image_buffer_length =
            actual_x as usize * actual_y as usize * mode.bytes_per_pixel();
        if restart {
            thread::sleep(Duration::from_millis(self.config.settle_time_ms));
            backend.start_capture()?;
            stream.is_streaming = true;
        }
        log::debug!(
            "{}: reconfigured to {}x{} bin {} {:?} ({} bytes/frame)",
            self.name,
            actual_x,
            actual_y,
            bin,
            mode,
            stream.image_buffer_length
        );
        Ok(())
    }

    /// One bounded-wait acquisition attempt. The wait is derived from the
    /// exposure and clamped so a stop request is never starved for more
    /// than `max_frame_wait_ms`.
    fn acquire_frame(&mut self) {
        let Some(backend) = self.backend.as_mut() else {
            return;
        };
        let (length, wait, callback) = {
            let stream = self.shared.stream.lock().unwrap();
            if !stream.is_streaming {
                return;
            }
            let Some(callback) = stream.callback.clone() else {
                return;
            };
            let wait_ms = (stream.exposure_us / 1000).clamp(1, self.config.max_frame_wait_ms as i64);
            (
                stream.image_buffer_length,
                Duration::from_millis(wait_ms as u64),
                callback,
            )
        };

        let Some((index, mut buffer)) = self.shared.pool.acquire() else {
            // Backpressure: every buffer is out for delivery, so this
            // hardware frame is dropped rather than blocking the command
            // path. The sleep stands in for the frame interval that
            // elapses on the wire.
            self.shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
            thread::sleep(wait);
            return;
        };

        let result = backend.get_frame(&mut buffer.as_mut_slice()[..length], wait);
        let stopping = self.shared.stop_controller.load(Ordering::Acquire);
        match result {
            Ok(Some(received)) if !stopping => {
                let event = CallbackEvent::NewFrame {
                    buffer_index: index,
                    buffer,
                    length: received.min(length),
                    sequence: self.sequence,
                    timestamp: Utc::now(),
                    callback,
                };
                self.sequence += 1;
                self.shared.callback_queue.push(event);
            }
            Ok(_) => {
                // Timeout, or a frame that arrived mid-shutdown.
                self.shared.pool.release(index, buffer);
            }
            Err(e) => {
                log::warn!("{}: frame acquisition failed: {e}", self.name);
                self.shared.dropped_frames.fetch_add(1, Ordering::Relaxed);
                self.shared.pool.release(index, buffer);
            }
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        // Reached with the backend still present only when the controller
        // never ran, e.g. when thread spawning failed during open.
        if let Some(mut backend) = self.backend.take() {
            backend.close();
        }
    }
}
