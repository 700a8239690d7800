//! Identifier and geometry types shared across the crate
//!
//! All handles crossing the public API are opaque 64-bit values supplied by
//! the caller or the platform.

use std::fmt;

/// Opaque identifier of an overlay consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Native window handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

/// Native monitor handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorId(pub u64);

/// What a capture thread captures
///
/// Two requests with equal sources share one capture thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureSource {
    /// A single top-level window
    Window(WindowId),
    /// A single monitor
    Monitor(MonitorId),
    /// Every monitor as one surface
    CombinedDesktop,
}

impl CaptureSource {
    /// Build a source from an optional monitor handle (`None` = combined desktop)
    pub fn from_monitor(monitor: Option<MonitorId>) -> Self {
        match monitor {
            Some(id) => CaptureSource::Monitor(id),
            None => CaptureSource::CombinedDesktop,
        }
    }

    /// The window handle, if this is a window source
    pub fn window(&self) -> Option<WindowId> {
        match self {
            CaptureSource::Window(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_window(&self) -> bool {
        matches!(self, CaptureSource::Window(_))
    }
}

impl fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureSource::Window(id) => write!(f, "window:{:#x}", id.0),
            CaptureSource::Monitor(id) => write!(f, "monitor:{:#x}", id.0),
            CaptureSource::CombinedDesktop => write!(f, "desktop"),
        }
    }
}

/// Pixel dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Crop rectangle for over/under stereo conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StereoCrop {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl StereoCrop {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}
