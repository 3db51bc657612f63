//! Hardware abstraction layer for streaming astronomy cameras.
//!
//! Each open device gets a [`Camera`] handle backed by two dedicated
//! threads: a controller thread that owns the vendor backend and executes
//! every mutation serially from a command queue, and a dispatch thread
//! that delivers captured frames to the application callback. Frames move
//! through a fixed pool of pre-allocated buffers; when the application
//! cannot keep up, frames are dropped and counted rather than queued
//! without bound.
//!
//! ```no_run
//! use astrocam::{Camera, CameraConfig, ControlId, ControlValue};
//! use astrocam::mock::MockBackend;
//!
//! # fn main() -> astrocam::CamResult<()> {
//! let (backend, _state) = MockBackend::colour("demo");
//! let camera = Camera::open(Box::new(backend), CameraConfig::default())?;
//!
//! camera.set_control(ControlId::Gain, ControlValue::Int32(150))?;
//! camera.start_streaming(|frame| {
//!     println!("frame {} ({} bytes)", frame.sequence, frame.data.len());
//! })?;
//! std::thread::sleep(std::time::Duration::from_millis(100));
//! camera.stop_streaming()?;
//! # Ok(())
//! # }
//! ```
//!
//! Vendor support is added by implementing [`DeviceBackend`]; the
//! streaming core never talks to hardware directly. [`mock::MockBackend`]
//! is a complete simulated implementation used by this crate's own tests.

pub mod backend;
mod buffer;
mod camera;
mod command;
pub mod config;
pub mod control;
mod controller;
mod dispatch;
pub mod error;
mod frame;
pub mod mock;
mod queue;
mod state;
pub mod videomode;

pub use backend::{DeviceBackend, Geometry, SensorInfo};
pub use buffer::{BufferPool, FrameBuffer};
pub use camera::Camera;
pub use config::CameraConfig;
pub use control::{ControlId, ControlRange, ControlType, ControlValue};
pub use error::{CamResult, CameraError};
pub use frame::{FrameCallback, FrameView};
pub use videomode::{ModeEvent, ModeState, VideoMode};
