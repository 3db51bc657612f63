//! The public per-device handle.
//!
//! [`Camera::open`] takes a [`DeviceBackend`], allocates the frame buffer
//! pool, and spawns the two core threads: the controller (which owns the
//! backend from then on) and the callback dispatcher. Every mutating call
//! on `Camera` is queued to the controller and executed in submission
//! order; reads are answered from shared state without touching the
//! device. The handle is `Send + Sync`, so any number of application
//! threads may submit commands concurrently.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::backend::{DeviceBackend, SensorInfo};
use crate::buffer::BufferPool;
use crate::command::{Command, CommandCallback, CommandKind, Completion};
use crate::config::CameraConfig;
use crate::control::{ControlId, ControlRange, ControlType, ControlValue};
use crate::controller::Controller;
use crate::dispatch;
use crate::error::{CamResult, CameraError};
use crate::frame::{FrameCallback, FrameView};
use crate::queue::NotifyQueue;
use crate::state::{Shared, StreamState};
use crate::videomode::initial_state;

/// An open, streaming-capable camera.
///
/// Dropping the handle closes the device; [`Camera::close`] does the same
/// explicitly and is idempotent.
pub struct Camera {
    shared: Arc<Shared>,
    controller: Option<JoinHandle<Option<Box<dyn DeviceBackend + Send>>>>,
    dispatch: Option<JoinHandle<()>>,
    name: String,
    sensor: SensorInfo,
    /// Constraint ranges snapshotted from the backend at open time. A
    /// control absent here is not implemented by this hardware.
    ranges: HashMap<ControlId, ControlRange>,
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("name", &self.name)
            .field("sensor", &self.sensor)
            .finish_non_exhaustive()
    }
}

impl Camera {
    /// Connects the streaming core to `backend`.
    ///
    /// Allocates `config.buffer_count` frame buffers sized for the worst
    /// case frame this sensor can produce, then starts the controller and
    /// dispatch threads. On any failure everything already constructed is
    /// torn down in reverse order before the error is returned; a partial
    /// handle is never produced.
    pub fn open(
        mut backend: Box<dyn DeviceBackend + Send>,
        config: CameraConfig,
    ) -> CamResult<Camera> {
        if let Err(e) = config.validate() {
            backend.close();
            return Err(e);
        }

        let sensor = backend.sensor_info();
        let name = backend.camera_name().to_string();

        let mut ranges = HashMap::new();
        for id in ControlId::ALL {
            if let Ok(range) = backend.control_range(id) {
                ranges.insert(id, range);
            }
        }

        let capacity = sensor.max_width as usize
            * sensor.max_height as usize
            * sensor.worst_case_bytes_per_pixel();
        let pool = match BufferPool::new(config.buffer_count, capacity) {
            Ok(pool) => pool,
            Err(e) => {
                backend.close();
                return Err(e);
            }
        };

        let default_mode = sensor.default_mode;
        let exposure_us = ranges
            .get(&ControlId::Exposure)
            .map_or(100_000, |range| range.default);
        let shared = Arc::new(Shared {
            command_queue: NotifyQueue::new(),
            callback_queue: NotifyQueue::new(),
            pool,
            stream: std::sync::Mutex::new(StreamState {
                is_streaming: false,
                x_size: sensor.max_width,
                y_size: sensor.max_height,
                bin_mode: 1,
                image_buffer_length: sensor.max_width as usize
                    * sensor.max_height as usize
                    * default_mode.bytes_per_pixel(),
                exposure_us,
                video_mode: default_mode,
                bit_depth: default_mode.bit_depth(),
                fsm: initial_state(default_mode),
                callback: None,
                frame_interval: None,
            }),
            controls: std::sync::Mutex::new(HashMap::new()),
            stop_controller: std::sync::atomic::AtomicBool::new(false),
            stop_dispatch: std::sync::atomic::AtomicBool::new(false),
            dropped_frames: std::sync::atomic::AtomicU64::new(0),
        });

        let controller = Controller::new(Arc::clone(&shared), backend, config);
        let controller_handle = thread::Builder::new()
            .name(format!("{name}-controller"))
            .spawn(move || controller.run())
            .map_err(|e| CameraError::system(format!("spawning controller thread: {e}")))?;

        let dispatch_handle = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("{name}-dispatch"))
                .spawn(move || dispatch::run(shared))
        };
        let dispatch_handle = match dispatch_handle {
            Ok(handle) => handle,
            Err(e) => {
                shared.stop_controller.store(true, Ordering::Release);
                shared.command_queue.notify_all();
                if let Ok(Some(mut backend)) = controller_handle.join() {
                    backend.close();
                }
                return Err(CameraError::system(format!(
                    "spawning dispatch thread: {e}"
                )));
            }
        };

        log::info!(
            "{name}: opened, {}x{} sensor, {:?} default mode",
            sensor.max_width,
            sensor.max_height,
            default_mode
        );
        Ok(Camera {
            shared,
            controller: Some(controller_handle),
            dispatch: Some(dispatch_handle),
            name,
            sensor,
            ranges,
        })
    }

    /// Human-readable camera identification.
    pub fn camera_name(&self) -> &str {
        &self.name
    }

    /// Static sensor capabilities.
    pub fn sensor_info(&self) -> SensorInfo {
        self.sensor
    }

    /// The constraint range for `id`, or `InvalidControl` if this camera
    /// does not implement it.
    pub fn control_range(&self, id: ControlId) -> CamResult<ControlRange> {
        self.ranges
            .get(&id)
            .copied()
            .ok_or(CameraError::InvalidControl(id))
    }

    /// Applies a control value, blocking until the controller has
    /// executed it. Type and range validation happens here, on the
    /// calling thread, so invalid requests never enter the queue.
    pub fn set_control(&self, id: ControlId, value: ControlValue) -> CamResult<()> {
        self.validate_set(id, &value)?;
        self.submit_sync(CommandKind::SetControl { id, value })
    }

    /// Fire-and-forget variant of [`set_control`](Self::set_control):
    /// validates and queues, then returns immediately. `on_complete` runs
    /// on the dispatch thread once the controller has executed the
    /// command. Every accepted submission hears back exactly once: if the
    /// camera is closed before the command executes, `on_complete` is
    /// invoked with `NotConnected` during close.
    pub fn set_control_async(
        &self,
        id: ControlId,
        value: ControlValue,
        on_complete: impl FnOnce(CamResult<()>) + Send + 'static,
    ) -> CamResult<()> {
        self.validate_set(id, &value)?;
        self.submit_async(
            CommandKind::SetControl { id, value },
            Box::new(on_complete),
        )
    }

    /// Reads a control without touching the device: the dropped-frame
    /// counter comes from the live counter, everything else from the
    /// last value the controller successfully applied (falling back to
    /// the backend's reported default).
    pub fn read_control(&self, id: ControlId) -> CamResult<ControlValue> {
        if id == ControlId::DroppedFrames {
            let dropped = i64::try_from(self.shared.dropped())
                .map_err(|_| CameraError::system("dropped-frame counter overflow"))?;
            return Ok(ControlValue::Int64(dropped));
        }
        if let Some(value) = self.shared.cached_control(id) {
            return Ok(value);
        }
        let range = self
            .ranges
            .get(&id)
            .ok_or(CameraError::InvalidControl(id))?;
        Ok(match id.declared_type() {
            ControlType::Int32 => ControlValue::Int32(range.default as i32),
            ControlType::Int64 => ControlValue::Int64(range.default),
            ControlType::Boolean => ControlValue::Boolean(range.default != 0),
            ControlType::Discrete => ControlValue::Discrete(range.default as u32),
            ControlType::Menu => ControlValue::Menu(range.default as u32),
            ControlType::Readonly => return Err(CameraError::InvalidControl(id)),
        })
    }

    /// Changes the readout resolution. Oversized requests are clamped to
    /// the sensor; the applied geometry is visible through
    /// [`current_geometry`](Self::current_geometry) afterwards.
    pub fn set_resolution(&self, x: u32, y: u32) -> CamResult<()> {
        self.submit_sync(CommandKind::SetResolution { x, y })
    }

    /// Selects a centred region-of-interest window.
    pub fn set_roi(&self, x: u32, y: u32) -> CamResult<()> {
        self.submit_sync(CommandKind::SetRoi { x, y })
    }

    /// Constrains the frame rate to `numerator / denominator` seconds per
    /// frame.
    pub fn set_frame_interval(&self, numerator: u32, denominator: u32) -> CamResult<()> {
        self.submit_sync(CommandKind::SetFrameInterval {
            numerator,
            denominator,
        })
    }

    /// Begins continuous capture. Frames arrive on the dispatch thread as
    /// [`FrameView`]s passed to `callback`. Fails with `InvalidCommand`
    /// if streaming is already active.
    ///
    /// The callback must not call [`stop_streaming`](Self::stop_streaming)
    /// or [`close`](Self::close): both wait for every in-flight buffer to
    /// return to the pool, and the buffer backing the callback's frame
    /// cannot return until the callback does, so the wait never ends.
    /// Hand the stop request to another thread instead.
    pub fn start_streaming(
        &self,
        callback: impl Fn(FrameView<'_>) + Send + Sync + 'static,
    ) -> CamResult<()> {
        let callback: FrameCallback = Arc::new(callback);
        self.submit_sync(CommandKind::StartStreaming { callback })
    }

    /// Ends continuous capture, returning only after every frame already
    /// handed to the dispatch thread has been delivered and its buffer
    /// returned. Fails with `InvalidCommand` if not streaming.
    pub fn stop_streaming(&self) -> CamResult<()> {
        self.submit_sync(CommandKind::StopStreaming)
    }

    /// Whether continuous capture is active right now. Reads shared state
    /// directly rather than queueing, so it is exact only between
    /// commands.
    pub fn is_streaming(&self) -> bool {
        self.shared.stream.lock().unwrap().is_streaming
    }

    /// Frames dropped so far because no buffer was free or the backend
    /// failed mid-acquisition.
    pub fn dropped_frames(&self) -> u64 {
        self.shared.dropped()
    }

    /// The readout geometry currently in effect: width, height and bytes
    /// per frame after any clamping the controller applied.
    pub fn current_geometry(&self) -> (u32, u32, usize) {
        let stream = self.shared.stream.lock().unwrap();
        (stream.x_size, stream.y_size, stream.image_buffer_length)
    }

    /// Shuts the camera down: stops streaming if active, stops and joins
    /// the controller thread, then the dispatch thread, then closes the
    /// device. Idempotent; commands submitted after close fail with
    /// `NotConnected`.
    pub fn close(&mut self) {
        if self.controller.is_none() {
            return;
        }
        if self.is_streaming() {
            if let Err(e) = self.submit_sync(CommandKind::StopStreaming) {
                log::warn!("{}: stop during close failed: {e}", self.name);
            }
        }
        let Some(controller) = self.controller.take() else {
            return;
        };

        self.shared.stop_controller.store(true, Ordering::Release);
        self.shared.command_queue.notify_all();
        let backend = controller.join();

        // Commands still queued when the controller exited must not leave
        // their submitters parked forever, and accepted fire-and-forget
        // callbacks must still hear back.
        while let Some(command) = self.shared.command_queue.try_pop() {
            if let Some(completion) = command.completion {
                completion.complete(Err(CameraError::NotConnected));
            }
            if let Some(on_complete) = command.on_complete {
                on_complete(Err(CameraError::NotConnected));
            }
        }

        self.shared.stop_dispatch.store(true, Ordering::Release);
        self.shared.callback_queue.notify_all();
        if let Some(dispatch) = self.dispatch.take() {
            if dispatch.join().is_err() {
                log::error!("{}: dispatch thread panicked", self.name);
            }
        }

        match backend {
            Ok(Some(mut backend)) => backend.close(),
            Ok(None) => {}
            Err(_) => log::error!("{}: controller thread panicked", self.name),
        }
        log::info!("{}: closed", self.name);
    }

    fn validate_set(&self, id: ControlId, value: &ControlValue) -> CamResult<()> {
        value.check_type(id)?;
        // The reset pseudo-control is handled by the core itself and
        // needs no backend support.
        if id == ControlId::DroppedFramesReset {
            return Ok(());
        }
        let range = self
            .ranges
            .get(&id)
            .ok_or(CameraError::InvalidControl(id))?;
        range.check(id, value)
    }

    fn submit_sync(&self, kind: CommandKind) -> CamResult<()> {
        if self.controller.is_none() {
            return Err(CameraError::NotConnected);
        }
        let completion = Arc::new(Completion::new());
        self.shared.command_queue.push(Command {
            kind,
            completion: Some(Arc::clone(&completion)),
            on_complete: None,
        });
        completion.wait()
    }

    fn submit_async(&self, kind: CommandKind, on_complete: CommandCallback) -> CamResult<()> {
        if self.controller.is_none() {
            return Err(CameraError::NotConnected);
        }
        self.shared.command_queue.push(Command {
            kind,
            completion: None,
            on_complete: Some(on_complete),
        });
        Ok(())
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.close();
    }
}
