//! Platform capture backends
//!
//! A backend owns the OS side of capturing: creating capture sessions for a
//! [`CaptureSource`], answering window-manager queries used by the pipeline
//! heuristics, and running the interactive source picker.
//!
//! ```text
//!   CaptureBackend (Arc, shared by all capture threads)
//!        │ open_session(source, options, signal)
//!        ▼
//!   CaptureSession (owned by one capture thread)
//!        │ platform callback
//!        ▼
//!   CaptureSignal::frame_arrived() ──► capture thread queue ──► try_next_frame()
//! ```
//!
//! Sessions are created and dropped on their capture thread, so they need not
//! be `Send`. Platform callbacks only ever touch the [`CaptureSignal`].

pub mod simulated;
#[cfg(windows)]
pub mod wgc;

pub use simulated::SimulatedBackend;
#[cfg(windows)]
pub use wgc::WgcBackend;

use std::any::Any;

use tokio::sync::mpsc;

use crate::error::{CaptureError, Result};
use crate::source::{CaptureSource, Size, WindowId};
use crate::thread::message::ThreadMessage;

/// What the running platform supports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Any capture at all
    pub capture: bool,
    /// Capturing individual windows
    pub window_capture: bool,
    /// Capturing all monitors as one surface
    pub combined_desktop: bool,
    /// Toggling whether the cursor is drawn into captured frames
    pub cursor_control: bool,
    /// The interactive source picker
    pub picker: bool,
}

impl Capabilities {
    /// Everything supported
    pub const fn all() -> Self {
        Self {
            capture: true,
            window_capture: true,
            combined_desktop: true,
            cursor_control: true,
            picker: true,
        }
    }

    /// Nothing supported
    pub const fn none() -> Self {
        Self {
            capture: false,
            window_capture: false,
            combined_desktop: false,
            cursor_control: false,
            picker: false,
        }
    }

    /// Whether a source can be captured at all on this platform
    pub fn supports(&self, source: &CaptureSource) -> bool {
        self.capture
            && match source {
                CaptureSource::Window(_) => self.window_capture,
                CaptureSource::Monitor(_) => true,
                CaptureSource::CombinedDesktop => self.combined_desktop,
            }
    }
}

/// Opaque GPU texture handle
///
/// The handle is only valid while the frame it came from is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Texture {
    pub handle: u64,
    pub size: Size,
}

/// One frame pulled from a capture session
pub struct CapturedFrame {
    /// Captured texture (its size is the frame pool buffer size)
    pub texture: Texture,
    /// Size of the content inside the texture as reported by the OS
    pub content_size: Size,
    _guard: Option<Box<dyn Any>>,
}

impl CapturedFrame {
    pub fn new(texture: Texture, content_size: Size) -> Self {
        Self {
            texture,
            content_size,
            _guard: None,
        }
    }

    /// Keep a platform object alive for as long as the frame is used
    pub fn with_guard(mut self, guard: Box<dyn Any>) -> Self {
        self._guard = Some(guard);
        self
    }
}

impl std::fmt::Debug for CapturedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedFrame")
            .field("texture", &self.texture)
            .field("content_size", &self.content_size)
            .finish()
    }
}

/// Options applied when opening a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub pool_buffers: u32,
    pub border_required: bool,
    pub cursor_capture: bool,
}

/// Handle the platform uses to wake a capture thread
///
/// Cloneable and thread-safe; posting to a thread that already exited is a
/// no-op.
#[derive(Debug, Clone)]
pub struct CaptureSignal {
    tx: mpsc::UnboundedSender<ThreadMessage>,
}

impl CaptureSignal {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ThreadMessage>) -> Self {
        Self { tx }
    }

    /// A new frame is ready in the session's frame pool
    pub fn frame_arrived(&self) {
        let _ = self.tx.send(ThreadMessage::FrameArrived);
    }

    /// The captured item went away
    pub fn source_closed(&self) {
        let _ = self.tx.send(ThreadMessage::SourceClosed);
    }

    /// The picker finished; `None` means the user cancelled
    pub fn pick_resolved(&self, source: Option<CaptureSource>) {
        let _ = self.tx.send(ThreadMessage::PickResolved(source));
    }
}

/// In-flight picker operation
pub trait PendingPick {
    /// Abort the selection; no result will be delivered afterwards
    fn cancel(&mut self);
}

/// Platform capture implementation
pub trait CaptureBackend: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Prepare thread-local OS infrastructure on a new capture thread
    fn init_thread(&self) -> Result<()> {
        Ok(())
    }

    /// Release what `init_thread` acquired
    fn exit_thread(&self) {}

    /// Open a capture session on the calling thread
    ///
    /// The frame pool starts at the source's current content size. The
    /// session reports new frames and source closure through `signal`.
    fn open_session(
        &self,
        source: &CaptureSource,
        options: &SessionOptions,
        signal: CaptureSignal,
    ) -> Result<Box<dyn CaptureSession>>;

    /// Current outer frame bounds of a window as the window manager reports them
    fn window_frame_bounds(&self, window: WindowId) -> Option<Size>;

    /// The window that currently has input focus
    fn foreground_window(&self) -> Option<WindowId>;

    /// Show the source picker; the result arrives via `signal.pick_resolved`
    fn begin_pick(&self, signal: CaptureSignal) -> Result<Box<dyn PendingPick>> {
        let _ = signal;
        Err(CaptureError::Unsupported("source picker"))
    }
}

/// One live OS capture session
pub trait CaptureSession {
    /// Size of the captured item when the session was opened
    fn item_size(&self) -> Size;

    /// Take the next frame from the frame pool, if one is ready
    fn try_next_frame(&mut self) -> Result<Option<CapturedFrame>>;

    /// Recreate the frame pool buffers at a new size
    fn recreate_pool(&mut self, size: Size) -> Result<()>;

    /// Include or exclude the system cursor in captured frames
    fn set_cursor_capture(&mut self, enabled: bool) -> Result<()>;

    /// Pause or resume frame production
    fn set_paused(&mut self, paused: bool) -> Result<()> {
        let _ = paused;
        Ok(())
    }

    /// Stop the session and release its pool
    fn close(&mut self);
}
