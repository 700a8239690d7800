//! In-process virtual desktop backend
//!
//! Models windows, monitors, a foreground window and per-session frame pools
//! without touching the OS. The handle is cheap to clone: keep one to drive
//! the desktop (resize windows, push frames, inject failures, answer the
//! picker) while capture threads use another.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    Capabilities, CaptureBackend, CaptureSession, CaptureSignal, CapturedFrame, PendingPick,
    SessionOptions, Texture,
};
use crate::error::{CaptureError, Result};
use crate::source::{CaptureSource, MonitorId, Size, WindowId};

#[derive(Debug, Clone, Copy)]
struct SimWindow {
    content: Size,
    frame_bounds: Size,
}

struct SimSession {
    source: CaptureSource,
    signal: CaptureSignal,
    pool_size: Size,
    pending_frames: u32,
    cursor_capture: bool,
    paused: bool,
    pause_transitions: u32,
    pool_recreations: u32,
    fail_next: Option<i32>,
}

struct SimPick {
    id: u64,
    signal: CaptureSignal,
}

struct Desktop {
    capabilities: Capabilities,
    windows: HashMap<WindowId, SimWindow>,
    monitors: Vec<(MonitorId, Size)>,
    foreground: Option<WindowId>,
    /// Open sessions only; closing removes the entry and its signal
    sessions: HashMap<u64, SimSession>,
    opened: HashMap<CaptureSource, usize>,
    next_session: u64,
    next_texture: u64,
    pick: Option<SimPick>,
    next_pick: u64,
    picks_cancelled: u32,
    thread_inits: u32,
}

impl Desktop {
    fn content_size(&self, source: &CaptureSource) -> Option<Size> {
        match source {
            CaptureSource::Window(id) => self.windows.get(id).map(|w| w.content),
            CaptureSource::Monitor(id) => self
                .monitors
                .iter()
                .find(|(m, _)| m == id)
                .map(|(_, size)| *size),
            CaptureSource::CombinedDesktop => {
                if self.monitors.is_empty() {
                    return None;
                }
                let width = self.monitors.iter().map(|(_, s)| s.width).sum();
                let height = self.monitors.iter().map(|(_, s)| s.height).max().unwrap_or(0);
                Some(Size::new(width, height))
            }
        }
    }

    fn live_sessions<'a>(
        &'a mut self,
        source: &'a CaptureSource,
    ) -> impl Iterator<Item = &'a mut SimSession> + 'a {
        self.sessions
            .values_mut()
            .filter(move |s| s.source == *source)
    }
}

/// Observable state of the newest live session on a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub pool_size: Size,
    pub cursor_capture: bool,
    pub paused: bool,
    pub pause_transitions: u32,
    pub pool_recreations: u32,
}

/// Virtual desktop implementing [`CaptureBackend`]
#[derive(Clone)]
pub struct SimulatedBackend {
    desktop: Arc<Mutex<Desktop>>,
}

impl SimulatedBackend {
    /// Empty desktop supporting every capability
    pub fn new() -> Self {
        Self::with_capabilities(Capabilities::all())
    }

    /// Empty desktop with a restricted capability set
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            desktop: Arc::new(Mutex::new(Desktop {
                capabilities,
                windows: HashMap::new(),
                monitors: Vec::new(),
                foreground: None,
                sessions: HashMap::new(),
                opened: HashMap::new(),
                next_session: 1,
                next_texture: 1,
                pick: None,
                next_pick: 1,
                picks_cancelled: 0,
                thread_inits: 0,
            })),
        }
    }

    pub fn add_window(&self, window: WindowId, size: Size) {
        self.desktop.lock().windows.insert(
            window,
            SimWindow {
                content: size,
                frame_bounds: size,
            },
        );
    }

    pub fn add_monitor(&self, monitor: MonitorId, size: Size) {
        let mut desktop = self.desktop.lock();
        desktop.monitors.retain(|(m, _)| *m != monitor);
        desktop.monitors.push((monitor, size));
    }

    /// Resize a window's content and frame together
    pub fn resize_window(&self, window: WindowId, size: Size) {
        if let Some(w) = self.desktop.lock().windows.get_mut(&window) {
            w.content = size;
            w.frame_bounds = size;
        }
    }

    /// Move only the reported frame bounds (simulates capture offset drift)
    pub fn set_frame_bounds(&self, window: WindowId, bounds: Size) {
        if let Some(w) = self.desktop.lock().windows.get_mut(&window) {
            w.frame_bounds = bounds;
        }
    }

    pub fn resize_monitor(&self, monitor: MonitorId, size: Size) {
        let mut desktop = self.desktop.lock();
        if let Some(entry) = desktop.monitors.iter_mut().find(|(m, _)| *m == monitor) {
            entry.1 = size;
        }
    }

    pub fn set_foreground(&self, window: Option<WindowId>) {
        self.desktop.lock().foreground = window;
    }

    /// Destroy a window; live sessions on it report closure
    pub fn close_window(&self, window: WindowId) {
        let mut desktop = self.desktop.lock();
        desktop.windows.remove(&window);
        let source = CaptureSource::Window(window);
        for session in desktop.live_sessions(&source) {
            session.signal.source_closed();
        }
    }

    /// Produce one frame on every live session of `source`
    ///
    /// Returns how many sessions were signalled.
    pub fn push_frame(&self, source: &CaptureSource) -> usize {
        let mut desktop = self.desktop.lock();
        let mut signalled = 0;
        for session in desktop.live_sessions(source) {
            session.pending_frames += 1;
            session.signal.frame_arrived();
            signalled += 1;
        }
        signalled
    }

    /// Make the next frame fetch on `source` fail with a platform code
    pub fn fail_next_frame(&self, source: &CaptureSource, code: i32) {
        let mut desktop = self.desktop.lock();
        for session in desktop.live_sessions(source) {
            session.fail_next = Some(code);
        }
    }

    /// Number of sessions currently open on `source`
    pub fn live_session_count(&self, source: &CaptureSource) -> usize {
        let mut desktop = self.desktop.lock();
        desktop.live_sessions(source).count()
    }

    /// Number of sessions ever opened on `source`
    pub fn sessions_opened(&self, source: &CaptureSource) -> usize {
        self.desktop
            .lock()
            .opened
            .get(source)
            .copied()
            .unwrap_or(0)
    }

    /// State of the newest live session on `source`
    pub fn session_info(&self, source: &CaptureSource) -> Option<SessionInfo> {
        let desktop = self.desktop.lock();
        desktop
            .sessions
            .iter()
            .filter(|(_, s)| s.source == *source)
            .max_by_key(|(id, _)| **id)
            .map(|(_, s)| SessionInfo {
                pool_size: s.pool_size,
                cursor_capture: s.cursor_capture,
                paused: s.paused,
                pause_transitions: s.pause_transitions,
                pool_recreations: s.pool_recreations,
            })
    }

    /// Whether a picker is waiting for a selection
    pub fn has_pending_pick(&self) -> bool {
        self.desktop.lock().pick.is_some()
    }

    /// Complete the pending picker; `None` simulates the user cancelling
    pub fn resolve_pick(&self, source: Option<CaptureSource>) -> bool {
        match self.desktop.lock().pick.take() {
            Some(pick) => {
                pick.signal.pick_resolved(source);
                true
            }
            None => false,
        }
    }

    /// How many picker operations were cancelled by their owner
    pub fn picks_cancelled(&self) -> u32 {
        self.desktop.lock().picks_cancelled
    }

    /// How many capture threads initialised platform state
    pub fn thread_inits(&self) -> u32 {
        self.desktop.lock().thread_inits
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for SimulatedBackend {
    fn capabilities(&self) -> Capabilities {
        self.desktop.lock().capabilities
    }

    fn init_thread(&self) -> Result<()> {
        self.desktop.lock().thread_inits += 1;
        Ok(())
    }

    fn open_session(
        &self,
        source: &CaptureSource,
        options: &SessionOptions,
        signal: CaptureSignal,
    ) -> Result<Box<dyn CaptureSession>> {
        let mut desktop = self.desktop.lock();
        if !desktop.capabilities.supports(source) {
            return Err(CaptureError::Unsupported("capture source kind"));
        }
        let size = desktop
            .content_size(source)
            .ok_or(CaptureError::SourceClosed)?;

        let id = desktop.next_session;
        desktop.next_session += 1;
        desktop.sessions.insert(
            id,
            SimSession {
                source: *source,
                signal,
                pool_size: size,
                pending_frames: 0,
                cursor_capture: options.cursor_capture,
                paused: false,
                pause_transitions: 0,
                pool_recreations: 0,
                fail_next: None,
            },
        );
        *desktop.opened.entry(*source).or_insert(0) += 1;

        tracing::debug!(session = id, source = %source, size = %size, "Simulated session opened");

        Ok(Box::new(SimulatedSession {
            id,
            item_size: size,
            desktop: Arc::clone(&self.desktop),
        }))
    }

    fn window_frame_bounds(&self, window: WindowId) -> Option<Size> {
        self.desktop
            .lock()
            .windows
            .get(&window)
            .map(|w| w.frame_bounds)
    }

    fn foreground_window(&self) -> Option<WindowId> {
        self.desktop.lock().foreground
    }

    fn begin_pick(&self, signal: CaptureSignal) -> Result<Box<dyn PendingPick>> {
        let mut desktop = self.desktop.lock();
        if !desktop.capabilities.picker {
            return Err(CaptureError::Unsupported("source picker"));
        }
        let id = desktop.next_pick;
        desktop.next_pick += 1;
        desktop.pick = Some(SimPick { id, signal });

        Ok(Box::new(SimulatedPick {
            id,
            desktop: Arc::clone(&self.desktop),
        }))
    }
}

struct SimulatedSession {
    id: u64,
    item_size: Size,
    desktop: Arc<Mutex<Desktop>>,
}

impl SimulatedSession {
    fn with_session<T>(&self, f: impl FnOnce(&mut SimSession) -> T) -> Option<T> {
        self.desktop.lock().sessions.get_mut(&self.id).map(f)
    }
}

impl CaptureSession for SimulatedSession {
    fn item_size(&self) -> Size {
        self.item_size
    }

    fn try_next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        let mut desktop = self.desktop.lock();
        let Some(session) = desktop.sessions.get(&self.id) else {
            return Ok(None);
        };
        let source = session.source;
        let content = desktop
            .content_size(&source)
            .ok_or(CaptureError::SourceClosed)?;

        let handle = desktop.next_texture;
        let Some(session) = desktop.sessions.get_mut(&self.id) else {
            return Ok(None);
        };
        if let Some(code) = session.fail_next.take() {
            return Err(CaptureError::platform("TryGetNextFrame", code));
        }
        if session.pending_frames == 0 {
            return Ok(None);
        }
        session.pending_frames -= 1;
        let texture = Texture {
            handle,
            size: session.pool_size,
        };
        desktop.next_texture += 1;

        Ok(Some(CapturedFrame::new(texture, content)))
    }

    fn recreate_pool(&mut self, size: Size) -> Result<()> {
        self.with_session(|s| {
            s.pool_size = size;
            s.pending_frames = 0;
            s.pool_recreations += 1;
        });
        Ok(())
    }

    fn set_cursor_capture(&mut self, enabled: bool) -> Result<()> {
        self.with_session(|s| s.cursor_capture = enabled);
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        self.with_session(|s| {
            if s.paused != paused {
                s.paused = paused;
                s.pause_transitions += 1;
            }
        });
        Ok(())
    }

    fn close(&mut self) {
        if self.desktop.lock().sessions.remove(&self.id).is_some() {
            tracing::debug!(session = self.id, "Simulated session closed");
        }
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.close();
    }
}

struct SimulatedPick {
    id: u64,
    desktop: Arc<Mutex<Desktop>>,
}

impl PendingPick for SimulatedPick {
    fn cancel(&mut self) {
        let mut desktop = self.desktop.lock();
        if desktop.pick.as_ref().map(|p| p.id) == Some(self.id) {
            desktop.pick = None;
            desktop.picks_cancelled += 1;
        }
    }
}
