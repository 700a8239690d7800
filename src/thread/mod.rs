//! Capture threads
//!
//! One OS thread per capture pipeline. The thread owns a single queue that
//! receives both registry control messages and platform frame signals, so the
//! pump blocks on "next message or next frame" in one place:
//!
//! ```text
//!   Starting ──► Running ──► Draining ──► Terminated
//!      │  (picker wait)  │ Quit / source lost / failure
//!      └─────────────────┘
//! ```
//!
//! Nothing escapes the thread as an error or a panic. Failures become
//! [`Notification`](crate::Notification)s: `CaptureLost` for every consumer,
//! plus a `ThreadError` for anything other than the source going away.

pub mod message;

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;

use crate::backend::{CaptureSignal, PendingPick};
use crate::error::{CaptureError, CODE_FAILURE};
use crate::notify::CaptureThreadId;
use crate::pipeline::{CapturePipeline, PipelineContext};
use crate::registry::ConsumerRegistration;
use crate::source::CaptureSource;
use crate::stats::ThreadPhase;

use self::message::ThreadMessage;

/// Registry state a capture thread is allowed to read back
pub(crate) trait RegistryView: Send + Sync {
    /// Authoritative consumer list; `None` once the thread's entry is gone
    fn consumers(&self, thread: CaptureThreadId) -> Option<Vec<ConsumerRegistration>>;

    /// Record the source a picker resolved to
    fn resolve_source(&self, thread: CaptureThreadId, source: CaptureSource);

    /// Stop the entry from taking new consumers and return the ones it has
    ///
    /// Called once before reporting loss. Consumers attached afterwards are
    /// the registry's to notify.
    fn retire(&self, thread: CaptureThreadId) -> Option<Vec<ConsumerRegistration>>;
}

/// Everything a capture thread starts with; copied, never shared
pub(crate) struct ThreadParams {
    pub id: CaptureThreadId,
    pub source: Option<CaptureSource>,
    pub consumers: Vec<ConsumerRegistration>,
    pub cursor_visible: bool,
    pub inbox: mpsc::UnboundedReceiver<ThreadMessage>,
    pub signal: CaptureSignal,
    pub ctx: PipelineContext,
    pub view: Arc<dyn RegistryView>,
}

/// Spawn a named capture thread
pub(crate) fn spawn(params: ThreadParams) -> io::Result<JoinHandle<()>> {
    let name = format!("{}-{}", params.ctx.config.thread_name_prefix, params.id.0);
    std::thread::Builder::new()
        .name(name)
        .spawn(move || CaptureThread::new(params).run())
}

/// Why the message loop ended
#[derive(Debug)]
enum Exit {
    /// Asked to quit by the registry
    Quit,
    /// Source went away (or the user cancelled the picker)
    SourceLost,
    /// Unexpected platform failure
    Failed(CaptureError),
    /// A panic escaped the pipeline
    Panicked(String),
}

impl From<CaptureError> for Exit {
    fn from(err: CaptureError) -> Self {
        if err.is_source_gone() {
            Exit::SourceLost
        } else {
            Exit::Failed(err)
        }
    }
}

struct CaptureThread {
    id: CaptureThreadId,
    source: Option<CaptureSource>,
    consumers: Vec<ConsumerRegistration>,
    cursor_visible: bool,
    inbox: mpsc::UnboundedReceiver<ThreadMessage>,
    signal: CaptureSignal,
    ctx: PipelineContext,
    view: Arc<dyn RegistryView>,
    pipeline: Option<CapturePipeline>,
    initialized: bool,
}

impl CaptureThread {
    fn new(params: ThreadParams) -> Self {
        Self {
            id: params.id,
            source: params.source,
            consumers: params.consumers,
            cursor_visible: params.cursor_visible,
            inbox: params.inbox,
            signal: params.signal,
            ctx: params.ctx,
            view: params.view,
            pipeline: None,
            initialized: false,
        }
    }

    fn run(mut self) {
        self.ctx.stats.set_phase(ThreadPhase::Starting);
        tracing::info!(
            thread = %self.id,
            source = ?self.source,
            consumers = self.consumers.len(),
            "Capture thread started"
        );

        let exit = panic::catch_unwind(AssertUnwindSafe(|| self.serve()))
            .unwrap_or_else(|payload| Exit::Panicked(panic_message(payload.as_ref())));

        self.ctx.stats.set_phase(ThreadPhase::Draining);
        self.report(&exit);
        self.drain();

        if self.initialized {
            self.ctx.backend.exit_thread();
        }
        self.ctx.stats.set_phase(ThreadPhase::Terminated);
        tracing::info!(thread = %self.id, exit = ?exit, "Capture thread stopped");
    }

    fn serve(&mut self) -> Exit {
        if let Err(err) = self.ctx.backend.init_thread() {
            return Exit::from(err);
        }
        self.initialized = true;

        let source = match self.source {
            Some(source) => source,
            None => match self.await_pick() {
                Ok(source) => source,
                Err(exit) => return exit,
            },
        };

        let pipeline = CapturePipeline::new(
            source,
            self.consumers.clone(),
            self.cursor_visible,
            self.signal.clone(),
            self.ctx.clone(),
        );
        match pipeline {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(err) => return Exit::from(err),
        }
        self.ctx.stats.set_phase(ThreadPhase::Running);

        while let Some(message) = self.inbox.blocking_recv() {
            match self.handle(message) {
                Ok(None) => {}
                Ok(Some(exit)) => return exit,
                Err(err) => return Exit::from(err),
            }
        }
        Exit::Quit
    }

    fn handle(&mut self, message: ThreadMessage) -> crate::error::Result<Option<Exit>> {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Ok(Some(Exit::Quit));
        };

        match message {
            ThreadMessage::FrameArrived => pipeline.on_frame_arrived()?,
            ThreadMessage::UpdateData => {
                if let Some(consumers) = self.view.consumers(self.id) {
                    self.consumers = consumers.clone();
                    pipeline.on_overlay_data_refresh(consumers)?;
                }
            }
            ThreadMessage::SetPaused { consumer, paused } => {
                if let Some(reg) = self.consumers.iter_mut().find(|r| r.consumer == consumer) {
                    reg.paused = paused;
                }
                pipeline.set_consumer_paused(consumer, paused)?;
            }
            ThreadMessage::SetCursorVisible(visible) => {
                self.cursor_visible = visible;
                pipeline.set_cursor_visible(visible)?;
            }
            ThreadMessage::SourceClosed => return Ok(Some(Exit::SourceLost)),
            ThreadMessage::PickResolved(_) => {
                tracing::trace!(thread = %self.id, "Ignoring late picker result");
            }
            ThreadMessage::Quit => return Ok(Some(Exit::Quit)),
        }
        Ok(None)
    }

    /// Wait for the picker; control messages received meanwhile only update the snapshot
    fn await_pick(&mut self) -> Result<CaptureSource, Exit> {
        let mut pick: Box<dyn PendingPick> = self.ctx.backend.begin_pick(self.signal.clone())?;
        tracing::info!(thread = %self.id, "Waiting for source picker");

        while let Some(message) = self.inbox.blocking_recv() {
            match message {
                ThreadMessage::PickResolved(Some(source)) => {
                    self.view.resolve_source(self.id, source);
                    self.source = Some(source);
                    tracing::info!(thread = %self.id, source = %source, "Source picker resolved");
                    return Ok(source);
                }
                ThreadMessage::PickResolved(None) => {
                    tracing::info!(thread = %self.id, "Source picker cancelled by user");
                    return Err(Exit::SourceLost);
                }
                ThreadMessage::Quit => {
                    pick.cancel();
                    return Err(Exit::Quit);
                }
                ThreadMessage::UpdateData => {
                    if let Some(consumers) = self.view.consumers(self.id) {
                        self.consumers = consumers;
                    }
                }
                ThreadMessage::SetPaused { consumer, paused } => {
                    if let Some(reg) = self.consumers.iter_mut().find(|r| r.consumer == consumer) {
                        reg.paused = paused;
                    }
                }
                ThreadMessage::SetCursorVisible(visible) => self.cursor_visible = visible,
                ThreadMessage::FrameArrived | ThreadMessage::SourceClosed => {}
            }
        }

        pick.cancel();
        Err(Exit::Quit)
    }

    fn report(&self, exit: &Exit) {
        let code = match exit {
            Exit::Quit => return,
            Exit::SourceLost => None,
            Exit::Failed(err) => {
                tracing::warn!(thread = %self.id, error = %err, "Capture pipeline failed");
                Some(err.code())
            }
            Exit::Panicked(message) => {
                tracing::error!(thread = %self.id, panic = %message, "Capture pipeline panicked");
                Some(CODE_FAILURE)
            }
        };

        if let Some(code) = code {
            self.ctx.notifier.thread_error(self.id, code);
        }

        let consumers = self
            .view
            .retire(self.id)
            .unwrap_or_else(|| self.consumers.clone());
        for reg in &consumers {
            self.ctx.notifier.capture_lost(reg.consumer);
        }
    }

    fn drain(&mut self) {
        let Some(mut pipeline) = self.pipeline.take() else {
            return;
        };
        pipeline.close();
        drop(pipeline);

        let delay = self.ctx.config.session_close_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
