//! Queued mutating requests and their completion plumbing.
//!
//! Every device mutation travels through the command queue and executes on
//! the controller thread, one at a time, in submission order. A
//! synchronous caller parks on the command's [`Completion`] cell until the
//! controller records a result; a fire-and-forget caller attaches an
//! `on_complete` closure instead, which the controller routes through the
//! callback queue so it runs on the dispatch thread.

use std::sync::{Condvar, Mutex};

use crate::control::{ControlId, ControlValue};
use crate::error::CamResult;
use crate::frame::FrameCallback;

/// What a queued command asks the controller to do.
pub enum CommandKind {
    /// Apply one control value to the device.
    SetControl {
        /// Target control.
        id: ControlId,
        /// Pre-validated value.
        value: ControlValue,
    },
    /// Change the readout resolution (full-sensor addressing).
    SetResolution {
        /// New width in pixels.
        x: u32,
        /// New height in pixels.
        y: u32,
    },
    /// Change the region-of-interest window.
    SetRoi {
        /// ROI width in pixels.
        x: u32,
        /// ROI height in pixels.
        y: u32,
    },
    /// Constrain the frame rate to `numerator / denominator` seconds.
    SetFrameInterval {
        /// Interval numerator.
        numerator: u32,
        /// Interval denominator.
        denominator: u32,
    },
    /// Begin continuous capture, delivering frames to `callback`.
    StartStreaming {
        /// Per-frame application callback.
        callback: FrameCallback,
    },
    /// End continuous capture and drain pending deliveries.
    StopStreaming,
}

impl std::fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::SetControl { id, value } => f
                .debug_struct("SetControl")
                .field("id", id)
                .field("value", value)
                .finish(),
            CommandKind::SetResolution { x, y } => {
                f.debug_struct("SetResolution").field("x", x).field("y", y).finish()
            }
            CommandKind::SetRoi { x, y } => {
                f.debug_struct("SetRoi").field("x", x).field("y", y).finish()
            }
            CommandKind::SetFrameInterval {
                numerator,
                denominator,
            } => f
                .debug_struct("SetFrameInterval")
                .field("numerator", numerator)
                .field("denominator", denominator)
                .finish(),
            CommandKind::StartStreaming { .. } => f.write_str("StartStreaming"),
            CommandKind::StopStreaming => f.write_str("StopStreaming"),
        }
    }
}

/// Invoked on the dispatch thread when a fire-and-forget command finishes.
pub type CommandCallback = Box<dyn FnOnce(CamResult<()>) + Send>;

/// One queued request. Exactly one of `completion` / `on_complete` is set:
/// synchronous submissions carry a completion cell, asynchronous ones a
/// callback.
pub struct Command {
    /// The requested operation.
    pub kind: CommandKind,
    /// Cell the submitting thread waits on, for synchronous submissions.
    pub completion: Option<std::sync::Arc<Completion>>,
    /// Completion callback, for fire-and-forget submissions.
    pub on_complete: Option<CommandCallback>,
}

/// A one-shot result slot with a condition variable, shared between the
/// submitting thread and the controller.
pub struct Completion {
    result: Mutex<Option<CamResult<()>>>,
    done: Condvar,
}

impl Completion {
    /// Creates an unfilled completion cell.
    pub fn new() -> Self {
        Completion {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    /// Records the command's result and wakes the waiting submitter.
    pub fn complete(&self, result: CamResult<()>) {
        let mut slot = self.result.lock().unwrap();
        *slot = Some(result);
        self.done.notify_all();
    }

    /// Blocks until the controller records a result, then returns it.
    pub fn wait(&self) -> CamResult<()> {
        let mut slot = self.result.lock().unwrap();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            slot = self.done.wait(slot).unwrap();
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CameraError;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_the_recorded_result() {
        let completion = Arc::new(Completion::new());
        let worker = {
            let completion = Arc::clone(&completion);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                completion.complete(Err(CameraError::InvalidCommand));
            })
        };
        assert_eq!(completion.wait(), Err(CameraError::InvalidCommand));
        worker.join().unwrap();
    }

    #[test]
    fn complete_before_wait_does_not_block() {
        let completion = Completion::new();
        completion.complete(Ok(()));
        assert_eq!(completion.wait(), Ok(()));
    }
}
