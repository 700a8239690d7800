//! Consumer registrations and per-thread table entries

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::notify::CaptureThreadId;
use crate::source::{CaptureSource, ConsumerId, StereoCrop};
use crate::stats::CaptureStats;
use crate::thread::message::ThreadMessage;

/// One overlay consumer attached to a capture thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRegistration {
    /// Routing identity
    pub consumer: ConsumerId,

    /// Paused consumers get no frames and do not keep the session running
    pub paused: bool,

    /// Minimum time between frames (zero = unlimited)
    pub min_frame_interval: Duration,

    /// Whether the consumer receives an over/under converted texture
    pub stereo_enabled: bool,

    /// Region fed to the stereo converter
    pub stereo_crop: StereoCrop,
}

impl ConsumerRegistration {
    /// Fresh registration with default settings
    pub fn new(consumer: ConsumerId) -> Self {
        Self {
            consumer,
            paused: false,
            min_frame_interval: Duration::ZERO,
            stereo_enabled: false,
            stereo_crop: StereoCrop::default(),
        }
    }

    /// Copy of this registration under another consumer id
    pub fn duplicate_as(&self, consumer: ConsumerId) -> Self {
        Self {
            consumer,
            ..self.clone()
        }
    }

    /// Crop rectangle if stereo conversion is on
    pub fn stereo(&self) -> Option<StereoCrop> {
        self.stereo_enabled.then_some(self.stereo_crop)
    }
}

/// Registry bookkeeping for one capture thread
pub(crate) struct ThreadEntry {
    pub id: CaptureThreadId,

    /// `None` while a picker is still choosing
    pub source: Option<CaptureSource>,

    /// Picker threads never take part in source deduplication
    pub from_picker: bool,

    /// Authoritative consumer list; the thread re-reads it on `UpdateData`
    pub consumers: Vec<ConsumerRegistration>,

    pub inbox: mpsc::UnboundedSender<ThreadMessage>,

    /// `None` until the OS thread has been spawned
    pub handle: Option<JoinHandle<()>>,

    pub stats: Arc<CaptureStats>,

    /// Set by the thread once it has reported loss; it takes no new consumers
    pub retired: bool,
}

impl ThreadEntry {
    pub fn new(
        id: CaptureThreadId,
        source: Option<CaptureSource>,
        first: ConsumerRegistration,
        inbox: mpsc::UnboundedSender<ThreadMessage>,
    ) -> Self {
        Self {
            id,
            from_picker: source.is_none(),
            source,
            consumers: vec![first],
            inbox,
            handle: None,
            stats: Arc::new(CaptureStats::new()),
            retired: false,
        }
    }

    /// Whether a new request for `source` may join this thread
    pub fn serves(&self, source: &CaptureSource) -> bool {
        !self.from_picker && !self.retired && self.source.as_ref() == Some(source)
    }

    pub fn has_consumer(&self, consumer: ConsumerId) -> bool {
        self.consumers.iter().any(|r| r.consumer == consumer)
    }

    pub fn consumer(&self, consumer: ConsumerId) -> Option<&ConsumerRegistration> {
        self.consumers.iter().find(|r| r.consumer == consumer)
    }

    pub fn consumer_mut(&mut self, consumer: ConsumerId) -> Option<&mut ConsumerRegistration> {
        self.consumers.iter_mut().find(|r| r.consumer == consumer)
    }

    /// Remove a registration, returning whether it existed
    pub fn remove_consumer(&mut self, consumer: ConsumerId) -> bool {
        let before = self.consumers.len();
        self.consumers.retain(|r| r.consumer != consumer);
        self.consumers.len() != before
    }

    /// Post to the thread; a thread that already exited is ignored
    pub fn post(&self, message: ThreadMessage) {
        if self.inbox.send(message).is_err() {
            tracing::trace!(thread = %self.id, "Capture thread already exited");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::WindowId;

    #[test]
    fn test_registration_defaults() {
        let reg = ConsumerRegistration::new(ConsumerId(1));

        assert!(!reg.paused);
        assert_eq!(reg.min_frame_interval, Duration::ZERO);
        assert_eq!(reg.stereo(), None);
    }

    #[test]
    fn test_duplicate_keeps_settings() {
        let mut reg = ConsumerRegistration::new(ConsumerId(1));
        reg.paused = true;
        reg.min_frame_interval = Duration::from_millis(33);
        reg.stereo_enabled = true;
        reg.stereo_crop = StereoCrop::new(0, 0, 100, 50);

        let copy = reg.duplicate_as(ConsumerId(2));
        assert_eq!(copy.consumer, ConsumerId(2));
        assert!(copy.paused);
        assert_eq!(copy.min_frame_interval, Duration::from_millis(33));
        assert_eq!(copy.stereo(), Some(StereoCrop::new(0, 0, 100, 50)));
    }

    #[test]
    fn test_entry_serves() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let window = CaptureSource::Window(WindowId(5));
        let entry = ThreadEntry::new(
            CaptureThreadId(1),
            Some(window),
            ConsumerRegistration::new(ConsumerId(1)),
            tx.clone(),
        );
        assert!(entry.serves(&window));
        assert!(!entry.serves(&CaptureSource::CombinedDesktop));

        let mut dead = ThreadEntry::new(
            CaptureThreadId(3),
            Some(window),
            ConsumerRegistration::new(ConsumerId(3)),
            tx.clone(),
        );
        dead.retired = true;
        assert!(!dead.serves(&window));

        let mut picker = ThreadEntry::new(
            CaptureThreadId(2),
            None,
            ConsumerRegistration::new(ConsumerId(2)),
            tx,
        );
        assert!(picker.from_picker);
        picker.source = Some(window);
        // Resolved picker threads stay dedicated
        assert!(!picker.serves(&window));
    }

    #[test]
    fn test_entry_remove_consumer() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut entry = ThreadEntry::new(
            CaptureThreadId(1),
            Some(CaptureSource::CombinedDesktop),
            ConsumerRegistration::new(ConsumerId(1)),
            tx,
        );
        entry.consumers.push(ConsumerRegistration::new(ConsumerId(2)));

        assert!(entry.remove_consumer(ConsumerId(1)));
        assert!(!entry.remove_consumer(ConsumerId(1)));
        assert!(!entry.has_consumer(ConsumerId(1)));
        assert!(entry.has_consumer(ConsumerId(2)));
    }
}
