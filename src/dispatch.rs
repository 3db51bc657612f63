//! Callback dispatch thread.
//!
//! Decouples frame delivery from acquisition timing: the controller
//! pushes ready events onto the callback queue and goes straight back to
//! the device, while this thread invokes the application callback at the
//! application's pace. Its only coupling to the controller is the
//! callback queue and the buffer pool; it never touches the command queue
//! or the device backend.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::buffer::FrameBuffer;
use crate::command::CommandCallback;
use crate::error::CamResult;
use crate::frame::{FrameCallback, FrameView};
use crate::state::Shared;

/// One ready-to-deliver event, consumed exactly once.
pub(crate) enum CallbackEvent {
    /// A captured frame, carrying its buffer out of the pool.
    NewFrame {
        /// Pool slot the buffer must return to.
        buffer_index: usize,
        /// The buffer itself, moved out of the pool.
        buffer: FrameBuffer,
        /// Valid bytes in the buffer.
        length: usize,
        /// Delivery sequence number.
        sequence: u64,
        /// Acquisition-completion timestamp.
        timestamp: DateTime<Utc>,
        /// The application's frame handler.
        callback: FrameCallback,
    },
    /// A fire-and-forget command finished.
    CommandComplete {
        /// The submitter's completion callback.
        callback: CommandCallback,
        /// The command's result.
        result: CamResult<()>,
    },
}

/// Dispatch thread main loop. Runs until the dispatch stop flag is set.
/// Events still queued at that point are not silently discarded: pending
/// frames return their buffers to the pool undelivered, and pending
/// command completions are still invoked with their recorded result, so
/// no fire-and-forget submitter is left without an answer.
pub(crate) fn run(shared: Arc<Shared>) {
    log::debug!("callback dispatch thread started");
    loop {
        if shared.stop_dispatch.load(Ordering::Acquire) {
            break;
        }
        shared
            .callback_queue
            .wait_nonempty(|| !shared.stop_dispatch.load(Ordering::Acquire));

        while let Some(event) = shared.callback_queue.try_pop() {
            match event {
                CallbackEvent::NewFrame {
                    buffer_index,
                    buffer,
                    length,
                    sequence,
                    timestamp,
                    callback,
                } => {
                    callback(FrameView {
                        data: &buffer.as_slice()[..length],
                        sequence,
                        timestamp,
                    });
                    // The callback has returned; only now may the buffer
                    // be reused for acquisition.
                    shared.pool.release(buffer_index, buffer);
                }
                CallbackEvent::CommandComplete { callback, result } => {
                    callback(result);
                }
            }
        }
    }

    while let Some(event) = shared.callback_queue.try_pop() {
        match event {
            CallbackEvent::NewFrame {
                buffer_index,
                buffer,
                ..
            } => {
                shared.pool.release(buffer_index, buffer);
            }
            CallbackEvent::CommandComplete { callback, result } => {
                callback(result);
            }
        }
    }
    log::debug!("callback dispatch thread exiting");
}
