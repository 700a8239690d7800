//! Outbound notifications
//!
//! Capture threads never call back into the owning application directly.
//! Everything they need to report is posted here and consumed on the
//! caller's side at its own pace.

use tokio::sync::mpsc;

use crate::source::{ConsumerId, Size};

/// Identifier of a capture thread, used for diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureThreadId(pub u64);

impl std::fmt::Display for CaptureThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Message posted to the owning application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Captured content size changed; `None` until the first real frame
    SizeChanged {
        consumer: ConsumerId,
        size: Option<Size>,
    },

    /// Capture ended for this consumer; the owner should call `stop`
    CaptureLost { consumer: ConsumerId },

    /// A capture thread failed unexpectedly (diagnostic only)
    ThreadError { thread: CaptureThreadId, code: i32 },
}

impl Notification {
    /// Consumer the notification is addressed to, if any
    pub fn consumer(&self) -> Option<ConsumerId> {
        match self {
            Notification::SizeChanged { consumer, .. } => Some(*consumer),
            Notification::CaptureLost { consumer } => Some(*consumer),
            Notification::ThreadError { .. } => None,
        }
    }
}

/// Receiving half handed to the owner of a registry
pub type NotificationReceiver = mpsc::UnboundedReceiver<Notification>;

/// Sending half cloned into every capture thread
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationSender {
    /// Create a connected sender/receiver pair
    pub fn channel() -> (Self, NotificationReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Post a notification, ignoring a closed receiver
    pub fn post(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("Notification receiver dropped");
        }
    }

    pub fn size_changed(&self, consumer: ConsumerId, size: Option<Size>) {
        self.post(Notification::SizeChanged { consumer, size });
    }

    pub fn capture_lost(&self, consumer: ConsumerId) {
        self.post(Notification::CaptureLost { consumer });
    }

    pub fn thread_error(&self, thread: CaptureThreadId, code: i32) {
        self.post(Notification::ThreadError { thread, code });
    }
}
