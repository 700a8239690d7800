//! Capture statistics
//!
//! Counters are written by a capture thread and read by the registry without
//! taking any lock.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Lifecycle phase of a capture thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPhase {
    /// Acquiring OS resources (or waiting on the picker)
    Starting,
    /// Pumping messages and frames
    Running,
    /// Releasing the session
    Draining,
    /// Thread function returned
    Terminated,
}

impl ThreadPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ThreadPhase::Starting,
            1 => ThreadPhase::Running,
            2 => ThreadPhase::Draining,
            _ => ThreadPhase::Terminated,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ThreadPhase::Starting => 0,
            ThreadPhase::Running => 1,
            ThreadPhase::Draining => 2,
            ThreadPhase::Terminated => 3,
        }
    }
}

/// Live counters for one capture thread
#[derive(Debug, Default)]
pub struct CaptureStats {
    phase: AtomicU8,
    frames_received: AtomicU64,
    frames_delivered: AtomicU64,
    dropped_by_limiter: AtomicU64,
    dropped_while_paused: AtomicU64,
    resizes: AtomicU64,
    restarts: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ThreadPhase {
        ThreadPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub(crate) fn set_phase(&self, phase: ThreadPhase) {
        self.phase.store(phase.as_u8(), Ordering::Release);
    }

    pub(crate) fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn frame_delivered(&self) {
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped_by_limiter(&self) {
        self.dropped_by_limiter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn dropped_while_paused(&self) {
        self.dropped_while_paused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn resized(&self) {
        self.resizes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn restarted(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current values
    pub fn snapshot(&self) -> CaptureStatsSnapshot {
        CaptureStatsSnapshot {
            phase: self.phase(),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            dropped_by_limiter: self.dropped_by_limiter.load(Ordering::Relaxed),
            dropped_while_paused: self.dropped_while_paused.load(Ordering::Relaxed),
            resizes: self.resizes.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CaptureStats`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureStatsSnapshot {
    pub phase: ThreadPhase,
    /// Frames pulled from the session
    pub frames_received: u64,
    /// Frames fanned out to at least one consumer
    pub frames_delivered: u64,
    pub dropped_by_limiter: u64,
    pub dropped_while_paused: u64,
    pub resizes: u64,
    pub restarts: u64,
}

impl CaptureStatsSnapshot {
    /// Fraction of received frames that were delivered
    pub fn delivery_ratio(&self) -> f64 {
        if self.frames_received > 0 {
            self.frames_delivered as f64 / self.frames_received as f64
        } else {
            0.0
        }
    }
}
