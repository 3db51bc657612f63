//! Frame delivery types handed to the application callback.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A borrowed view of one delivered frame. Valid only for the duration of
/// the callback; the underlying buffer returns to the pool afterwards.
#[derive(Debug)]
pub struct FrameView<'a> {
    /// Pixel data, exactly `image_buffer_length` bytes for the geometry
    /// and video mode in effect when the frame was acquired.
    pub data: &'a [u8],
    /// Monotonic delivery sequence number, starting at 0 per stream.
    pub sequence: u64,
    /// Software timestamp taken when acquisition completed.
    pub timestamp: DateTime<Utc>,
}

/// Application-registered handler invoked on the dispatch thread for each
/// delivered frame.
pub type FrameCallback = Arc<dyn Fn(FrameView<'_>) + Send + Sync>;
