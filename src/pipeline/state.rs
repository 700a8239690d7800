//! Per-pipeline mutable state
//!
//! Owned exclusively by the capture thread running the pipeline.

use crate::source::{Size, WindowId};

/// Frame, resize and restart bookkeeping for one capture pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    /// Content size of the last processed frame (item size before the first)
    pub content_size: Size,

    /// Texture size of the last processed frame (empty before the first)
    pub texture_size: Size,

    /// Size last announced to consumers; `None` = announced as unknown
    pub notified_size: Option<Size>,

    /// Frames left during which secondary consumers re-establish sharing
    pub propagation_remaining: u8,

    /// Pool recreation scheduled for the end of the current frame
    pub pending_resize: Option<Size>,

    /// Drift detected; restart once propagation settles
    pub restart_pending: bool,

    /// Aggregate pause (every consumer paused)
    pub paused: bool,

    /// Cursor visibility requested globally
    pub cursor_visible: bool,

    /// Cursor capture currently applied to the session
    pub cursor_capture: bool,

    /// Window frame bounds seen by the last drift check
    pub last_window_bounds: Option<(WindowId, Size)>,
}

impl PipelineState {
    pub fn new(item_size: Size, cursor_visible: bool) -> Self {
        Self {
            content_size: item_size,
            cursor_visible,
            cursor_capture: cursor_visible,
            ..Default::default()
        }
    }

    /// Restart the propagation countdown
    pub fn arm_propagation(&mut self, cycles: u8) {
        self.propagation_remaining = cycles;
    }

    pub fn is_propagating(&self) -> bool {
        self.propagation_remaining > 0
    }

    /// Count down one propagation cycle
    pub fn tick_propagation(&mut self) {
        self.propagation_remaining = self.propagation_remaining.saturating_sub(1);
    }

    /// Whether a pending restart may run now
    pub fn restart_due(&self) -> bool {
        self.restart_pending && !self.is_propagating()
    }
}
