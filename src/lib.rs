//! Window and monitor capture fanned out to VR overlay consumers
//!
//! A [`CaptureRegistry`] maps overlay consumers to capture threads. Each
//! thread runs one [`CapturePipeline`] around one OS capture session and
//! delivers every accepted frame to all consumers attached to it, honouring
//! each consumer's pause flag, frame interval and stereo crop.
//!
//! ```text
//!   application ──start/stop/settings──► CaptureRegistry
//!        ▲                                    │ one thread per source
//!        │ Notification                       ▼
//!        └──────────────────────────── capture thread ──► CapturePipeline
//!                                                              │
//!                                   CaptureBackend (OS session) ┘ └ OverlayCompositor
//! ```
//!
//! The OS side sits behind [`CaptureBackend`]: [`SimulatedBackend`] models a
//! virtual desktop in-process and `WgcBackend` (Windows only) drives
//! Windows.Graphics.Capture.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use overlay_capture::{
//!     CaptureConfig, CaptureRegistry, ConsumerId, MonitorId, OverlayCompositor,
//!     SimulatedBackend, Size,
//! };
//!
//! # fn run(compositor: Arc<dyn OverlayCompositor>) -> Result<(), overlay_capture::RegistryError> {
//! let backend = SimulatedBackend::new();
//! backend.add_monitor(MonitorId(1), Size::new(1920, 1080));
//!
//! let (registry, mut notifications) =
//!     CaptureRegistry::new(Arc::new(backend), compositor, CaptureConfig::default());
//! registry.start_from_source(ConsumerId(1), Some(MonitorId(1)))?;
//!
//! while let Some(notification) = notifications.blocking_recv() {
//!     println!("{:?}", notification);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod compositor;
pub mod config;
pub mod error;
pub mod limiter;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod stats;
pub mod thread;

#[cfg(test)]
mod testing;

pub use backend::{
    Capabilities, CaptureBackend, CaptureSession, CaptureSignal, CapturedFrame, PendingPick,
    SessionOptions, SimulatedBackend, Texture,
};
#[cfg(windows)]
pub use backend::WgcBackend;
pub use compositor::{OverlayCompositor, StereoConverter};
pub use config::CaptureConfig;
pub use error::{CaptureError, Result};
pub use limiter::UpdateLimiter;
pub use notify::{CaptureThreadId, Notification, NotificationReceiver};
pub use pipeline::{CapturePipeline, PipelineContext};
pub use registry::{CaptureRegistry, ConsumerRegistration, RegistryError};
pub use source::{CaptureSource, ConsumerId, MonitorId, Size, StereoCrop, WindowId};
pub use stats::{CaptureStats, CaptureStatsSnapshot, ThreadPhase};
