//! Capture registry implementation
//!
//! The central table mapping consumers to the capture threads that serve
//! them, with source deduplication and thread lifecycle control.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::entry::{ConsumerRegistration, ThreadEntry};
use super::error::RegistryError;
use crate::backend::{Capabilities, CaptureBackend, CaptureSignal};
use crate::compositor::OverlayCompositor;
use crate::config::CaptureConfig;
use crate::notify::{CaptureThreadId, NotificationReceiver, NotificationSender};
use crate::pipeline::PipelineContext;
use crate::source::{CaptureSource, ConsumerId, MonitorId, StereoCrop, WindowId};
use crate::stats::CaptureStatsSnapshot;
use crate::thread::message::ThreadMessage;
use crate::thread::{self, RegistryView, ThreadParams};

/// Thread table guarded by the registry mutex
pub(crate) struct ThreadTable {
    threads: HashMap<CaptureThreadId, ThreadEntry>,
    next_id: u64,
    cursor_visible: bool,
}

impl ThreadTable {
    fn new() -> Self {
        Self {
            threads: HashMap::new(),
            next_id: 1,
            cursor_visible: true,
        }
    }

    fn allocate_id(&mut self) -> CaptureThreadId {
        let id = CaptureThreadId(self.next_id);
        self.next_id += 1;
        id
    }

    fn thread_of(&self, consumer: ConsumerId) -> Option<CaptureThreadId> {
        self.threads
            .values()
            .find(|entry| entry.has_consumer(consumer))
            .map(|entry| entry.id)
    }

    fn entry_of(&self, consumer: ConsumerId) -> Option<&ThreadEntry> {
        self.threads
            .values()
            .find(|entry| entry.has_consumer(consumer))
    }

    fn entry_of_mut(&mut self, consumer: ConsumerId) -> Option<&mut ThreadEntry> {
        self.threads
            .values_mut()
            .find(|entry| entry.has_consumer(consumer))
    }

    /// Remove a consumer from its thread
    ///
    /// Returns the thread's entry, already taken out of the table, when the
    /// consumer was its last one. The caller stops it after unlocking.
    fn detach(&mut self, consumer: ConsumerId) -> Result<Option<ThreadEntry>, RegistryError> {
        let id = self
            .thread_of(consumer)
            .ok_or(RegistryError::ConsumerNotFound(consumer))?;
        let Some(entry) = self.threads.get_mut(&id) else {
            return Err(RegistryError::ConsumerNotFound(consumer));
        };

        entry.remove_consumer(consumer);
        if !entry.consumers.is_empty() {
            entry.post(ThreadMessage::UpdateData);
            tracing::debug!(
                consumer = %consumer,
                thread = %id,
                remaining = entry.consumers.len(),
                "Consumer detached"
            );
            return Ok(None);
        }
        Ok(self.threads.remove(&id))
    }

    /// Detach `consumer` if it is registered anywhere
    fn detach_if_capturing(
        &mut self,
        consumer: ConsumerId,
    ) -> Result<Option<ThreadEntry>, RegistryError> {
        if self.thread_of(consumer).is_none() {
            return Ok(None);
        }
        self.detach(consumer)
    }
}

impl RegistryView for Mutex<ThreadTable> {
    fn consumers(&self, thread: CaptureThreadId) -> Option<Vec<ConsumerRegistration>> {
        self.lock()
            .threads
            .get(&thread)
            .map(|entry| entry.consumers.clone())
    }

    fn resolve_source(&self, thread: CaptureThreadId, source: CaptureSource) {
        if let Some(entry) = self.lock().threads.get_mut(&thread) {
            entry.source = Some(source);
        }
    }

    fn retire(&self, thread: CaptureThreadId) -> Option<Vec<ConsumerRegistration>> {
        let mut table = self.lock();
        let entry = table.threads.get_mut(&thread)?;
        entry.retired = true;
        Some(entry.consumers.clone())
    }
}

/// Process-wide table of capture threads
///
/// All operations are safe to call from any thread. The table mutex is held
/// for lookups, mutations and message posts, never across spawning or
/// joining a capture thread.
pub struct CaptureRegistry {
    table: Arc<Mutex<ThreadTable>>,
    backend: Arc<dyn CaptureBackend>,
    compositor: Arc<dyn OverlayCompositor>,
    notifier: NotificationSender,
    config: Arc<CaptureConfig>,
}

impl CaptureRegistry {
    /// Create a registry and the receiver for its outbound notifications
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        compositor: Arc<dyn OverlayCompositor>,
        config: CaptureConfig,
    ) -> (Self, NotificationReceiver) {
        let (notifier, notifications) = NotificationSender::channel();
        let registry = Self {
            table: Arc::new(Mutex::new(ThreadTable::new())),
            backend,
            compositor,
            notifier,
            config: Arc::new(config),
        };
        (registry, notifications)
    }

    /// Get the registry configuration
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture a single window
    pub fn start_from_window(
        &self,
        consumer: ConsumerId,
        window: WindowId,
    ) -> Result<(), RegistryError> {
        let caps = self.capabilities();
        if !caps.capture || !caps.window_capture {
            return Err(RegistryError::Unsupported("window capture"));
        }
        self.start(consumer, Some(CaptureSource::Window(window)))
    }

    /// Capture a monitor, or the combined desktop when `monitor` is `None`
    pub fn start_from_source(
        &self,
        consumer: ConsumerId,
        monitor: Option<MonitorId>,
    ) -> Result<(), RegistryError> {
        let source = CaptureSource::from_monitor(monitor);
        let caps = self.capabilities();
        if !caps.supports(&source) {
            return Err(RegistryError::Unsupported(match source {
                CaptureSource::CombinedDesktop => "combined desktop capture",
                _ => "monitor capture",
            }));
        }
        self.start(consumer, Some(source))
    }

    /// Capture whatever the user selects in the source picker
    ///
    /// Always starts a dedicated thread; the source is filled in once the
    /// picker resolves.
    pub fn start_from_picker(&self, consumer: ConsumerId) -> Result<(), RegistryError> {
        let caps = self.capabilities();
        if !caps.capture || !caps.picker {
            return Err(RegistryError::Unsupported("source picker"));
        }
        self.start(consumer, None)
    }

    /// Attach `consumer` to the thread serving `existing`, copying its settings
    pub fn start_from_existing_consumer(
        &self,
        consumer: ConsumerId,
        existing: ConsumerId,
    ) -> Result<(), RegistryError> {
        let mut table = self.table.lock();
        let registration = table
            .entry_of(existing)
            .and_then(|entry| entry.consumer(existing))
            .map(|reg| reg.duplicate_as(consumer))
            .ok_or(RegistryError::ConsumerNotFound(existing))?;
        if consumer == existing {
            return Ok(());
        }

        let emptied = table.detach_if_capturing(consumer)?;
        let entry = table
            .entry_of_mut(existing)
            .ok_or(RegistryError::ConsumerNotFound(existing))?;
        entry.consumers.push(registration);
        if entry.retired {
            // The thread already reported its consumers lost
            self.notifier.capture_lost(consumer);
        } else {
            entry.post(ThreadMessage::UpdateData);
        }

        tracing::info!(
            consumer = %consumer,
            existing = %existing,
            thread = %entry.id,
            retired = entry.retired,
            "Consumer attached to existing capture"
        );
        drop(table);

        if let Some(entry) = emptied {
            stop_thread(entry);
        }
        Ok(())
    }

    /// Pause or resume delivery to one consumer
    pub fn set_paused(&self, consumer: ConsumerId, paused: bool) -> Result<(), RegistryError> {
        let mut table = self.table.lock();
        let entry = table
            .entry_of_mut(consumer)
            .ok_or(RegistryError::ConsumerNotFound(consumer))?;
        let Some(reg) = entry.consumer_mut(consumer) else {
            return Err(RegistryError::ConsumerNotFound(consumer));
        };
        if reg.paused == paused {
            return Ok(());
        }
        reg.paused = paused;
        entry.post(ThreadMessage::SetPaused { consumer, paused });

        tracing::debug!(consumer = %consumer, thread = %entry.id, paused, "Consumer pause changed");
        Ok(())
    }

    /// Set the minimum time between frames for one consumer (zero = unlimited)
    pub fn set_limiter_interval(
        &self,
        consumer: ConsumerId,
        interval: Duration,
    ) -> Result<(), RegistryError> {
        self.update_registration(consumer, |reg| {
            if reg.min_frame_interval == interval {
                return false;
            }
            reg.min_frame_interval = interval;
            true
        })
    }

    /// Enable or disable over/under conversion for one consumer
    pub fn set_stereo_crop(
        &self,
        consumer: ConsumerId,
        enabled: bool,
        crop: StereoCrop,
    ) -> Result<(), RegistryError> {
        self.update_registration(consumer, |reg| {
            if reg.stereo_enabled == enabled && reg.stereo_crop == crop {
                return false;
            }
            reg.stereo_enabled = enabled;
            reg.stereo_crop = crop;
            true
        })
    }

    /// Exchange which consumer id each of two registrations belongs to
    ///
    /// Works across threads. Only threads holding either id are told to refresh.
    pub fn swap_consumers(&self, a: ConsumerId, b: ConsumerId) -> Result<(), RegistryError> {
        let mut table = self.table.lock();
        if table.thread_of(a).is_none() && table.thread_of(b).is_none() {
            return Err(RegistryError::ConsumerNotFound(a));
        }
        if a == b {
            return Ok(());
        }

        for entry in table.threads.values_mut() {
            let mut touched = false;
            for reg in entry.consumers.iter_mut() {
                if reg.consumer == a {
                    reg.consumer = b;
                    touched = true;
                } else if reg.consumer == b {
                    reg.consumer = a;
                    touched = true;
                }
            }
            if touched {
                entry.post(ThreadMessage::UpdateData);
            }
        }

        tracing::debug!(a = %a, b = %b, "Consumers swapped");
        Ok(())
    }

    /// Detach a consumer; the last consumer of a thread stops it
    ///
    /// Blocks until the thread has released its session when it is stopped.
    pub fn stop(&self, consumer: ConsumerId) -> Result<(), RegistryError> {
        let emptied = self.table.lock().detach(consumer)?;
        if let Some(entry) = emptied {
            tracing::debug!(consumer = %consumer, thread = %entry.id, "Last consumer stopped");
            stop_thread(entry);
        }
        Ok(())
    }

    /// Show or hide the cursor in every capture
    pub fn set_global_cursor_visible(&self, visible: bool) {
        let mut table = self.table.lock();
        table.cursor_visible = visible;
        for entry in table.threads.values() {
            entry.post(ThreadMessage::SetCursorVisible(visible));
        }
        tracing::debug!(visible, threads = table.threads.len(), "Global cursor visibility changed");
    }

    pub fn is_capture_supported(&self) -> bool {
        self.capabilities().capture
    }

    pub fn is_capture_from_window_supported(&self) -> bool {
        let caps = self.capabilities();
        caps.capture && caps.window_capture
    }

    pub fn is_combined_desktop_supported(&self) -> bool {
        let caps = self.capabilities();
        caps.capture && caps.combined_desktop
    }

    pub fn is_cursor_visibility_control_supported(&self) -> bool {
        let caps = self.capabilities();
        caps.capture && caps.cursor_control
    }

    /// Whether a consumer is attached to a capture thread
    pub fn is_capturing(&self, consumer: ConsumerId) -> bool {
        self.table.lock().thread_of(consumer).is_some()
    }

    /// Current settings of a consumer
    pub fn registration(&self, consumer: ConsumerId) -> Option<ConsumerRegistration> {
        self.table
            .lock()
            .entry_of(consumer)
            .and_then(|entry| entry.consumer(consumer))
            .cloned()
    }

    /// Thread serving a consumer
    pub fn thread_id(&self, consumer: ConsumerId) -> Option<CaptureThreadId> {
        self.table.lock().thread_of(consumer)
    }

    /// Source captured for a consumer (`None` while its picker is open)
    pub fn source(&self, consumer: ConsumerId) -> Option<CaptureSource> {
        self.table
            .lock()
            .entry_of(consumer)
            .and_then(|entry| entry.source)
    }

    /// Number of live capture threads
    pub fn thread_count(&self) -> usize {
        self.table.lock().threads.len()
    }

    /// Number of consumers attached to a thread
    pub fn consumer_count(&self, thread: CaptureThreadId) -> usize {
        self.table
            .lock()
            .threads
            .get(&thread)
            .map_or(0, |entry| entry.consumers.len())
    }

    /// Statistics of the thread serving a consumer
    pub fn stats(&self, consumer: ConsumerId) -> Option<CaptureStatsSnapshot> {
        self.table
            .lock()
            .entry_of(consumer)
            .map(|entry| entry.stats.snapshot())
    }

    /// Stop every capture thread and wait for them to exit
    pub fn shutdown(&self) {
        let entries: Vec<ThreadEntry> = {
            let mut table = self.table.lock();
            table.threads.drain().map(|(_, entry)| entry).collect()
        };
        if entries.is_empty() {
            return;
        }

        for entry in &entries {
            entry.post(ThreadMessage::Quit);
        }
        let count = entries.len();
        for entry in entries {
            join(entry.id, entry.handle);
        }
        tracing::info!(threads = count, "Capture registry shut down");
    }

    fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    fn update_registration(
        &self,
        consumer: ConsumerId,
        apply: impl FnOnce(&mut ConsumerRegistration) -> bool,
    ) -> Result<(), RegistryError> {
        let mut table = self.table.lock();
        let entry = table
            .entry_of_mut(consumer)
            .ok_or(RegistryError::ConsumerNotFound(consumer))?;
        let Some(reg) = entry.consumer_mut(consumer) else {
            return Err(RegistryError::ConsumerNotFound(consumer));
        };
        if apply(reg) {
            entry.post(ThreadMessage::UpdateData);
        }
        Ok(())
    }

    fn start(&self, consumer: ConsumerId, source: Option<CaptureSource>) -> Result<(), RegistryError> {
        let registration = ConsumerRegistration::new(consumer);

        let mut table = self.table.lock();
        // Restarting always begins from a fresh registration
        let emptied = table.detach_if_capturing(consumer)?;
        if let Some(source) = source {
            if let Some(entry) = table.threads.values_mut().find(|entry| entry.serves(&source)) {
                entry.consumers.push(registration);
                entry.post(ThreadMessage::UpdateData);
                tracing::info!(
                    consumer = %consumer,
                    thread = %entry.id,
                    source = %source,
                    consumers = entry.consumers.len(),
                    "Consumer joined capture thread"
                );
                drop(table);
                if let Some(entry) = emptied {
                    stop_thread(entry);
                }
                return Ok(());
            }
        }

        let id = table.allocate_id();
        let (tx, inbox) = mpsc::unbounded_channel();
        let entry = ThreadEntry::new(id, source, registration.clone(), tx.clone());
        let stats = Arc::clone(&entry.stats);
        let cursor_visible = table.cursor_visible;
        table.threads.insert(id, entry);
        drop(table);

        if let Some(entry) = emptied {
            stop_thread(entry);
        }

        let params = ThreadParams {
            id,
            source,
            consumers: vec![registration],
            cursor_visible,
            inbox,
            signal: CaptureSignal::new(tx),
            ctx: PipelineContext {
                backend: Arc::clone(&self.backend),
                compositor: Arc::clone(&self.compositor),
                notifier: self.notifier.clone(),
                config: Arc::clone(&self.config),
                stats,
            },
            view: self.table.clone(),
        };

        let handle = match thread::spawn(params) {
            Ok(handle) => handle,
            Err(err) => {
                self.table.lock().threads.remove(&id);
                tracing::error!(consumer = %consumer, error = %err, "Failed to spawn capture thread");
                return Err(RegistryError::ThreadSpawn(err.to_string()));
            }
        };

        let mut table = self.table.lock();
        match table.threads.get_mut(&id) {
            Some(entry) => entry.handle = Some(handle),
            None => {
                // Stopped before the handle was stored
                drop(table);
                join(id, Some(handle));
            }
        }

        tracing::info!(
            consumer = %consumer,
            thread = %id,
            source = ?source,
            "Capture thread spawned"
        );

        Ok(())
    }
}

impl Drop for CaptureRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Quit a thread whose entry has left the table and wait for it
fn stop_thread(entry: ThreadEntry) {
    entry.post(ThreadMessage::Quit);
    let id = entry.id;
    join(id, entry.handle);
    tracing::info!(thread = %id, "Capture thread stopped");
}

fn join(id: CaptureThreadId, handle: Option<JoinHandle<()>>) {
    let Some(handle) = handle else {
        return;
    };
    if handle.thread().id() == std::thread::current().id() {
        tracing::warn!(thread = %id, "Capture thread cannot join itself");
        return;
    }
    if handle.join().is_err() {
        tracing::warn!(thread = %id, "Capture thread terminated abnormally");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::notify::Notification;
    use crate::source::Size;
    use crate::testing::{collect_until, drain, wait_until, CompositorCall, RecordingCompositor};

    struct Fixture {
        backend: SimulatedBackend,
        compositor: Arc<RecordingCompositor>,
        registry: CaptureRegistry,
        notifications: NotificationReceiver,
    }

    fn fixture_with(backend: SimulatedBackend) -> Fixture {
        let compositor = RecordingCompositor::new();
        let config = CaptureConfig::default().session_close_delay(Duration::ZERO);
        let (registry, notifications) =
            CaptureRegistry::new(Arc::new(backend.clone()), compositor.clone(), config);
        Fixture {
            backend,
            compositor,
            registry,
            notifications,
        }
    }

    fn fixture() -> Fixture {
        let backend = SimulatedBackend::new();
        backend.add_window(WindowId(10), Size::new(800, 600));
        backend.add_monitor(MonitorId(1), Size::new(1920, 1080));
        backend.add_monitor(MonitorId(2), Size::new(2560, 1440));
        fixture_with(backend)
    }

    const WINDOW: CaptureSource = CaptureSource::Window(WindowId(10));
    const MONITOR: CaptureSource = CaptureSource::Monitor(MonitorId(1));

    #[test]
    fn test_identical_sources_share_one_thread() {
        let f = fixture();

        for id in 1..=4 {
            f.registry
                .start_from_source(ConsumerId(id), Some(MonitorId(1)))
                .unwrap();
        }

        assert_eq!(f.registry.thread_count(), 1);
        let thread = f.registry.thread_id(ConsumerId(1)).unwrap();
        assert_eq!(f.registry.consumer_count(thread), 4);
        assert_eq!(f.registry.thread_id(ConsumerId(4)), Some(thread));

        f.registry
            .start_from_source(ConsumerId(5), Some(MonitorId(2)))
            .unwrap();
        f.registry.start_from_source(ConsumerId(6), None).unwrap();
        assert_eq!(f.registry.thread_count(), 3);
    }

    #[test]
    fn test_window_share_and_stop_scenario() {
        let f = fixture();
        let (a, b) = (ConsumerId(1), ConsumerId(2));

        f.registry.start_from_window(a, WindowId(10)).unwrap();
        f.registry.start_from_window(b, WindowId(10)).unwrap();
        let thread = f.registry.thread_id(a).unwrap();
        assert_eq!(f.registry.thread_count(), 1);
        assert_eq!(f.registry.consumer_count(thread), 2);

        f.registry.stop(a).unwrap();
        assert_eq!(f.registry.thread_count(), 1);
        assert_eq!(f.registry.consumer_count(thread), 1);
        assert!(!f.registry.is_capturing(a));

        f.registry.stop(b).unwrap();
        assert_eq!(f.registry.thread_count(), 0);
        assert_eq!(f.registry.thread_id(b), None);
        assert_eq!(f.backend.live_session_count(&WINDOW), 0);
        assert_eq!(f.registry.stop(b), Err(RegistryError::ConsumerNotFound(b)));
    }

    #[test]
    fn test_restart_uses_fresh_registration() {
        let f = fixture();
        let id = ConsumerId(1);

        f.registry.start_from_source(id, Some(MonitorId(1))).unwrap();
        f.registry.set_paused(id, true).unwrap();
        f.registry
            .set_limiter_interval(id, Duration::from_millis(33))
            .unwrap();
        f.registry
            .set_stereo_crop(id, true, StereoCrop::new(0, 0, 960, 540))
            .unwrap();
        assert_ne!(f.registry.registration(id), Some(ConsumerRegistration::new(id)));

        f.registry.stop(id).unwrap();
        f.registry.start_from_source(id, Some(MonitorId(1))).unwrap();
        assert_eq!(f.registry.registration(id), Some(ConsumerRegistration::new(id)));

        // Starting again while capturing also resets
        f.registry.set_paused(id, true).unwrap();
        f.registry.start_from_source(id, Some(MonitorId(1))).unwrap();
        assert_eq!(f.registry.registration(id), Some(ConsumerRegistration::new(id)));
        assert_eq!(f.registry.thread_count(), 1);
    }

    #[test]
    fn test_repeated_pause_sends_one_transition() {
        let f = fixture();
        let id = ConsumerId(1);
        f.registry.start_from_source(id, Some(MonitorId(1))).unwrap();
        assert!(wait_until(|| f.backend.live_session_count(&MONITOR) == 1));

        f.registry.set_paused(id, true).unwrap();
        f.registry.set_paused(id, true).unwrap();

        // A frame queued behind the pause messages marks them as processed
        f.backend.push_frame(&MONITOR);
        assert!(wait_until(|| f
            .registry
            .stats(id)
            .is_some_and(|s| s.dropped_while_paused == 1)));

        let info = f.backend.session_info(&MONITOR).unwrap();
        assert!(info.paused);
        assert_eq!(info.pause_transitions, 1);
    }

    #[test]
    fn test_aggregate_pause_law() {
        let f = fixture();
        let (a, b) = (ConsumerId(1), ConsumerId(2));
        f.registry.start_from_window(a, WindowId(10)).unwrap();
        f.registry.start_from_window(b, WindowId(10)).unwrap();
        assert!(wait_until(|| f.backend.live_session_count(&WINDOW) == 1));

        f.registry.set_paused(a, true).unwrap();
        f.registry.set_paused(b, true).unwrap();
        assert!(wait_until(|| f
            .backend
            .session_info(&WINDOW)
            .is_some_and(|i| i.paused)));

        f.registry.set_paused(a, false).unwrap();
        assert!(wait_until(|| f
            .backend
            .session_info(&WINDOW)
            .is_some_and(|i| !i.paused)));
        assert_eq!(f.backend.session_info(&WINDOW).unwrap().pause_transitions, 2);
    }

    #[test]
    fn test_unchanged_settings_are_noops() {
        let f = fixture();
        let id = ConsumerId(1);
        f.registry.start_from_source(id, Some(MonitorId(1))).unwrap();

        assert_eq!(f.registry.set_paused(id, false), Ok(()));
        assert_eq!(f.registry.set_limiter_interval(id, Duration::ZERO), Ok(()));
        assert_eq!(
            f.registry.set_stereo_crop(id, false, StereoCrop::default()),
            Ok(())
        );
        assert_eq!(
            f.registry.set_paused(ConsumerId(99), true),
            Err(RegistryError::ConsumerNotFound(ConsumerId(99)))
        );
    }

    #[test]
    fn test_start_from_existing_consumer() {
        let f = fixture();
        let (a, b) = (ConsumerId(1), ConsumerId(2));
        f.registry.start_from_window(a, WindowId(10)).unwrap();
        f.registry
            .set_limiter_interval(a, Duration::from_millis(16))
            .unwrap();
        f.registry.set_paused(a, true).unwrap();

        f.registry.start_from_existing_consumer(b, a).unwrap();
        assert_eq!(f.registry.thread_id(b), f.registry.thread_id(a));
        let copy = f.registry.registration(b).unwrap();
        assert!(copy.paused);
        assert_eq!(copy.min_frame_interval, Duration::from_millis(16));
        assert_eq!(f.registry.thread_count(), 1);

        assert_eq!(
            f.registry
                .start_from_existing_consumer(ConsumerId(3), ConsumerId(42)),
            Err(RegistryError::ConsumerNotFound(ConsumerId(42)))
        );
    }

    #[test]
    fn test_swap_consumers_across_threads() {
        let f = fixture();
        let (a, b) = (ConsumerId(1), ConsumerId(2));
        f.registry.start_from_source(a, Some(MonitorId(1))).unwrap();
        f.registry.start_from_source(b, Some(MonitorId(2))).unwrap();
        f.registry.set_paused(a, true).unwrap();
        let (ta, tb) = (f.registry.thread_id(a), f.registry.thread_id(b));

        f.registry.swap_consumers(a, b).unwrap();
        assert_eq!(f.registry.thread_id(a), tb);
        assert_eq!(f.registry.thread_id(b), ta);
        assert!(f.registry.registration(b).unwrap().paused);
        assert!(!f.registry.registration(a).unwrap().paused);

        assert_eq!(
            f.registry.swap_consumers(ConsumerId(8), ConsumerId(9)),
            Err(RegistryError::ConsumerNotFound(ConsumerId(8)))
        );
    }

    #[test]
    fn test_unsupported_capabilities() {
        let backend = SimulatedBackend::with_capabilities(Capabilities {
            window_capture: false,
            combined_desktop: false,
            picker: false,
            ..Capabilities::all()
        });
        let f = fixture_with(backend);

        assert!(matches!(
            f.registry.start_from_window(ConsumerId(1), WindowId(1)),
            Err(RegistryError::Unsupported(_))
        ));
        assert!(matches!(
            f.registry.start_from_source(ConsumerId(1), None),
            Err(RegistryError::Unsupported(_))
        ));
        assert!(matches!(
            f.registry.start_from_picker(ConsumerId(1)),
            Err(RegistryError::Unsupported(_))
        ));
        assert_eq!(f.registry.thread_count(), 0);

        assert!(f.registry.is_capture_supported());
        assert!(!f.registry.is_capture_from_window_supported());
        assert!(!f.registry.is_combined_desktop_supported());
        assert!(f.registry.is_cursor_visibility_control_supported());
    }

    #[test]
    fn test_injected_failure_is_isolated() {
        let mut f = fixture();
        let (a, b, c) = (ConsumerId(1), ConsumerId(2), ConsumerId(3));
        f.registry.start_from_window(a, WindowId(10)).unwrap();
        f.registry.start_from_window(b, WindowId(10)).unwrap();
        f.registry.start_from_source(c, Some(MonitorId(1))).unwrap();
        assert!(wait_until(|| f.backend.live_session_count(&WINDOW) == 1
            && f.backend.live_session_count(&MONITOR) == 1));
        let failed = f.registry.thread_id(a).unwrap();

        let code = 0x887A_0005_u32 as i32;
        f.backend.fail_next_frame(&WINDOW, code);
        f.backend.push_frame(&WINDOW);

        let notes = collect_until(&mut f.notifications, |notes| {
            notes
                .iter()
                .filter(|n| matches!(n, Notification::CaptureLost { .. }))
                .count()
                == 2
        });
        let errors: Vec<_> = notes
            .iter()
            .filter(|n| matches!(n, Notification::ThreadError { .. }))
            .collect();
        assert_eq!(
            errors,
            vec![&Notification::ThreadError {
                thread: failed,
                code
            }]
        );
        assert!(notes.contains(&Notification::CaptureLost { consumer: a }));
        assert!(notes.contains(&Notification::CaptureLost { consumer: b }));
        assert!(!notes.contains(&Notification::CaptureLost { consumer: c }));

        // The monitor thread keeps delivering
        f.backend.push_frame(&MONITOR);
        assert!(wait_until(|| f.compositor.textures_for(c) == 1));

        // Consumers clean up through normal stops
        f.registry.stop(a).unwrap();
        f.registry.stop(b).unwrap();
        assert_eq!(f.registry.thread_count(), 1);
    }

    #[test]
    fn test_start_after_failure_spawns_fresh_thread() {
        let mut f = fixture();
        let (a, b, c) = (ConsumerId(1), ConsumerId(2), ConsumerId(3));
        f.registry.start_from_source(a, Some(MonitorId(1))).unwrap();
        assert!(wait_until(|| f.backend.live_session_count(&MONITOR) == 1));
        let failed = f.registry.thread_id(a).unwrap();

        f.backend.fail_next_frame(&MONITOR, -1);
        f.backend.push_frame(&MONITOR);
        collect_until(&mut f.notifications, |notes| {
            notes.contains(&Notification::CaptureLost { consumer: a })
        });

        // The failed thread keeps its entry until `a` stops, but takes no one new
        f.registry.start_from_source(b, Some(MonitorId(1))).unwrap();
        assert_eq!(f.registry.thread_count(), 2);
        assert_ne!(f.registry.thread_id(b), Some(failed));

        assert!(wait_until(|| f.backend.sessions_opened(&MONITOR) == 2));
        f.backend.push_frame(&MONITOR);
        assert!(wait_until(|| f.compositor.textures_for(b) == 1));

        // Copying a consumer of the failed thread reports the copy lost at once
        f.registry.start_from_existing_consumer(c, a).unwrap();
        assert_eq!(f.registry.thread_id(c), Some(failed));
        let notes = collect_until(&mut f.notifications, |notes| {
            notes.contains(&Notification::CaptureLost { consumer: c })
        });
        assert!(!notes.contains(&Notification::CaptureLost { consumer: b }));

        f.registry.stop(a).unwrap();
        f.registry.stop(c).unwrap();
        assert_eq!(f.registry.thread_count(), 1);
        assert!(f.registry.is_capturing(b));
    }

    #[test]
    fn test_concurrent_starts_register_consumer_once() {
        let f = fixture();
        let id = ConsumerId(1);
        let registry = &f.registry;

        std::thread::scope(|scope| {
            for monitor in [1, 2, 1, 2, 1, 2] {
                scope.spawn(move || {
                    registry
                        .start_from_source(id, Some(MonitorId(monitor)))
                        .unwrap();
                });
            }
        });

        assert_eq!(f.registry.thread_count(), 1);
        let thread = f.registry.thread_id(id).unwrap();
        assert_eq!(f.registry.consumer_count(thread), 1);

        f.registry.stop(id).unwrap();
        assert!(!f.registry.is_capturing(id));
        assert_eq!(f.registry.thread_count(), 0);
    }

    #[test]
    fn test_stereo_crop_change_reaches_converter() {
        let f = fixture();
        let id = ConsumerId(1);
        let left = StereoCrop::new(0, 0, 960, 1080);
        let right = StereoCrop::new(960, 0, 960, 1080);

        f.registry.start_from_source(id, Some(MonitorId(1))).unwrap();
        f.registry.set_stereo_crop(id, true, left).unwrap();
        assert!(wait_until(|| f.backend.live_session_count(&MONITOR) == 1));
        f.backend.push_frame(&MONITOR);
        assert!(wait_until(|| f.compositor.converts() == 1));

        // Same stereo count, new rectangle
        f.registry.set_stereo_crop(id, true, right).unwrap();
        f.backend.push_frame(&MONITOR);
        assert!(wait_until(|| f.compositor.converts() == 2));

        let crops: Vec<StereoCrop> = f
            .compositor
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                CompositorCall::Convert { crop, .. } => Some(crop),
                _ => None,
            })
            .collect();
        assert_eq!(crops, vec![left, right]);
        assert_eq!(f.compositor.converters_created(), 1);
    }

    #[test]
    fn test_closed_window_reports_capture_lost() {
        let mut f = fixture();
        f.registry.start_from_window(ConsumerId(1), WindowId(10)).unwrap();
        assert!(wait_until(|| f.backend.live_session_count(&WINDOW) == 1));

        f.backend.close_window(WindowId(10));
        let notes = collect_until(&mut f.notifications, |notes| {
            notes.contains(&Notification::CaptureLost {
                consumer: ConsumerId(1),
            })
        });
        assert!(!notes
            .iter()
            .any(|n| matches!(n, Notification::ThreadError { .. })));
        assert_eq!(f.registry.stop(ConsumerId(1)), Ok(()));
    }

    #[test]
    fn test_picker_threads_are_dedicated() {
        let f = fixture();
        let a = ConsumerId(1);

        f.registry.start_from_picker(a).unwrap();
        assert!(wait_until(|| f.backend.has_pending_pick()));
        assert_eq!(f.registry.source(a), None);

        f.backend.resolve_pick(Some(MONITOR));
        assert!(wait_until(|| f.registry.source(a) == Some(MONITOR)));

        f.registry
            .start_from_source(ConsumerId(2), Some(MonitorId(1)))
            .unwrap();
        assert_eq!(f.registry.thread_count(), 2);
        assert_ne!(f.registry.thread_id(a), f.registry.thread_id(ConsumerId(2)));
    }

    #[test]
    fn test_stop_cancels_pending_pick() {
        let mut f = fixture();
        let a = ConsumerId(1);

        f.registry.start_from_picker(a).unwrap();
        assert!(wait_until(|| f.backend.has_pending_pick()));

        f.registry.stop(a).unwrap();
        assert_eq!(f.backend.picks_cancelled(), 1);
        assert!(drain(&mut f.notifications).is_empty());
    }

    #[test]
    fn test_picker_cancelled_by_user() {
        let mut f = fixture();
        f.registry.start_from_picker(ConsumerId(1)).unwrap();
        assert!(wait_until(|| f.backend.has_pending_pick()));

        f.backend.resolve_pick(None);
        let notes = collect_until(&mut f.notifications, |notes| !notes.is_empty());
        assert_eq!(
            notes,
            vec![Notification::CaptureLost {
                consumer: ConsumerId(1)
            }]
        );
    }

    #[test]
    fn test_global_cursor_visibility() {
        let f = fixture();
        f.registry
            .start_from_source(ConsumerId(1), Some(MonitorId(1)))
            .unwrap();
        assert!(wait_until(|| f.backend.live_session_count(&MONITOR) == 1));

        f.registry.set_global_cursor_visible(false);
        assert!(wait_until(|| f
            .backend
            .session_info(&MONITOR)
            .is_some_and(|i| !i.cursor_capture)));

        // New threads start with the current visibility
        f.registry
            .start_from_source(ConsumerId(2), Some(MonitorId(2)))
            .unwrap();
        let second = CaptureSource::Monitor(MonitorId(2));
        assert!(wait_until(|| f.backend.live_session_count(&second) == 1));
        assert!(!f.backend.session_info(&second).unwrap().cursor_capture);
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let f = fixture();
        f.registry.start_from_window(ConsumerId(1), WindowId(10)).unwrap();
        f.registry
            .start_from_source(ConsumerId(2), Some(MonitorId(1)))
            .unwrap();
        assert!(wait_until(|| f.backend.live_session_count(&WINDOW) == 1));

        f.registry.shutdown();
        assert_eq!(f.registry.thread_count(), 0);
        assert_eq!(f.backend.live_session_count(&WINDOW), 0);
        assert_eq!(f.backend.live_session_count(&MONITOR), 0);
        assert!(!f.registry.is_capturing(ConsumerId(2)));
    }

    #[tokio::test]
    async fn test_first_frame_size_notification() {
        let mut f = fixture();
        let id = ConsumerId(1);
        f.registry.start_from_window(id, WindowId(10)).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), f.notifications.recv())
            .await
            .unwrap();
        assert_eq!(
            first,
            Some(Notification::SizeChanged {
                consumer: id,
                size: None
            })
        );

        assert!(wait_until(|| f.backend.live_session_count(&WINDOW) == 1));
        f.backend.push_frame(&WINDOW);
        let second = tokio::time::timeout(Duration::from_secs(2), f.notifications.recv())
            .await
            .unwrap();
        assert_eq!(
            second,
            Some(Notification::SizeChanged {
                consumer: id,
                size: Some(Size::new(800, 600))
            })
        );

        let stats = f.registry.stats(id).unwrap();
        assert_eq!(stats.frames_received, 1);
        assert_eq!(stats.frames_delivered, 1);
    }
}
