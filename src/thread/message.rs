//! Capture thread queue messages

use crate::source::{CaptureSource, ConsumerId};

/// Message delivered to a capture thread, in send order
///
/// Control messages come from the registry; the rest are posted by the
/// platform through a [`CaptureSignal`](crate::backend::CaptureSignal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadMessage {
    /// Re-read the consumer list from the registry
    ///
    /// Carries no delta, so several queued updates are equivalent to one.
    UpdateData,

    /// One consumer's pause flag changed
    SetPaused { consumer: ConsumerId, paused: bool },

    /// Global cursor visibility changed
    SetCursorVisible(bool),

    /// The session has a new frame ready
    FrameArrived,

    /// The captured item disappeared
    SourceClosed,

    /// The picker finished (`None` = cancelled by the user)
    PickResolved(Option<CaptureSource>),

    /// Leave the message loop and release the session
    Quit,
}
