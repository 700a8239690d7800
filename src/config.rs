//! Capture configuration

use std::time::Duration;

/// Shared-texture propagation cycles armed after a resize or consumer change
pub const DEFAULT_PROPAGATION_CYCLES: u8 = 2;

/// Frame pool buffer count
pub const DEFAULT_FRAME_POOL_BUFFERS: u32 = 2;

/// Capture configuration options
///
/// Applies to every capture thread started by one registry.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Times shared texture handles are re-established after a resize
    pub propagation_cycles: u8,

    /// Buffers requested for the capture frame pool
    pub frame_pool_buffers: u32,

    /// Ask the OS to draw its capture border around the source
    pub border_required: bool,

    /// Sleep after closing a session (works around crashes when many
    /// sessions stop at once; zero disables it)
    pub session_close_delay: Duration,

    /// Hide the captured cursor while the source window has focus
    pub auto_hide_cursor: bool,

    /// Restart window captures whose frame bounds drift from the texture size
    pub restart_on_drift: bool,

    /// Name prefix for capture threads
    pub thread_name_prefix: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            propagation_cycles: DEFAULT_PROPAGATION_CYCLES,
            frame_pool_buffers: DEFAULT_FRAME_POOL_BUFFERS,
            border_required: false,
            session_close_delay: Duration::from_millis(50),
            auto_hide_cursor: true,
            restart_on_drift: true,
            thread_name_prefix: "overlay-capture".to_owned(),
        }
    }
}

impl CaptureConfig {
    /// Set the number of propagation cycles (at least 1)
    pub fn propagation_cycles(mut self, cycles: u8) -> Self {
        self.propagation_cycles = cycles.max(1);
        self
    }

    /// Set the frame pool buffer count (at least 1)
    pub fn frame_pool_buffers(mut self, buffers: u32) -> Self {
        self.frame_pool_buffers = buffers.max(1);
        self
    }

    /// Require the capture border
    pub fn border_required(mut self, required: bool) -> Self {
        self.border_required = required;
        self
    }

    /// Set the post-close sleep
    pub fn session_close_delay(mut self, delay: Duration) -> Self {
        self.session_close_delay = delay;
        self
    }

    /// Disable cursor auto-hide
    pub fn disable_auto_hide_cursor(mut self) -> Self {
        self.auto_hide_cursor = false;
        self
    }

    /// Disable the drift restart heuristic
    pub fn disable_restart_on_drift(mut self) -> Self {
        self.restart_on_drift = false;
        self
    }

    /// Set the capture thread name prefix
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}
