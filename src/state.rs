//! Shared state between the application threads, the controller thread
//! and the callback dispatch thread.
//!
//! Lock inventory: the command queue and callback queue each own a lock
//! (inside [`NotifyQueue`]); the buffer pool owns its free-count lock; the
//! streaming state and the control cache each sit behind their own mutex.
//! No thread ever holds two of these at once except the controller, which
//! only nests in the fixed order stream-state → none (every queue push and
//! pool call happens with the stream lock released).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::buffer::BufferPool;
use crate::command::Command;
use crate::control::{ControlId, ControlValue};
use crate::dispatch::CallbackEvent;
use crate::frame::FrameCallback;
use crate::queue::NotifyQueue;
use crate::videomode::{ModeState, VideoMode};

/// Mutable streaming state, guarded by one mutex.
pub(crate) struct StreamState {
    /// Whether continuous capture is active.
    pub is_streaming: bool,
    /// Current readout width (binned pixels).
    pub x_size: u32,
    /// Current readout height (binned pixels).
    pub y_size: u32,
    /// Current binning factor.
    pub bin_mode: u32,
    /// Bytes per frame for the current geometry and video mode.
    pub image_buffer_length: usize,
    /// Cached absolute exposure in microseconds, used to derive the
    /// bounded frame wait.
    pub exposure_us: i64,
    /// Video mode currently programmed into the device.
    pub video_mode: VideoMode,
    /// Bit depth implied by the current mode selection.
    pub bit_depth: u32,
    /// Video-mode FSM position (colour cameras only).
    pub fsm: ModeState,
    /// Registered frame callback while streaming.
    pub callback: Option<FrameCallback>,
    /// Frame interval constraint, if one was set.
    pub frame_interval: Option<(u32, u32)>,
}

/// Everything shared across the three thread roles for one open device.
pub(crate) struct Shared {
    /// Application → controller FIFO.
    pub command_queue: NotifyQueue<Command>,
    /// Controller → dispatch FIFO.
    pub callback_queue: NotifyQueue<CallbackEvent>,
    /// Pre-allocated frame buffers.
    pub pool: BufferPool,
    /// Streaming flags and geometry.
    pub stream: Mutex<StreamState>,
    /// Last successfully applied value per control, for `read_control`.
    pub controls: Mutex<HashMap<ControlId, ControlValue>>,
    /// Tells the controller thread to exit.
    pub stop_controller: AtomicBool,
    /// Tells the dispatch thread to exit.
    pub stop_dispatch: AtomicBool,
    /// Frames dropped for want of a free buffer (or backend error).
    pub dropped_frames: AtomicU64,
}

impl Shared {
    /// Records a control value after the backend accepted it.
    pub fn cache_control(&self, id: ControlId, value: ControlValue) {
        self.controls.lock().unwrap().insert(id, value);
    }

    /// Reads back the last applied value, if any.
    pub fn cached_control(&self, id: ControlId) -> Option<ControlValue> {
        self.controls.lock().unwrap().get(&id).copied()
    }

    /// Current dropped-frame count.
    pub fn dropped(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}
