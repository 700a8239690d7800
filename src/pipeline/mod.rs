//! Capture pipeline
//!
//! Drives one OS capture session and fans every accepted frame out to the
//! consumers attached to it. Each arriving frame goes through:
//!
//! 1. the rate gate (one [`UpdateLimiter`] per pipeline),
//! 2. resize detection against the cached content and texture sizes,
//! 3. fan-out (raw texture to the first plain consumer, sharing for the
//!    others while propagation is armed, one converter per stereo consumer),
//! 4. the window drift check and any deferred restart,
//! 5. cursor auto-hide,
//! 6. propagation countdown and the deferred pool recreation.
//!
//! Resizes arm a propagation countdown because sharing handles handed to
//! secondary consumers are only guaranteed valid after being re-established
//! twice following a buffer recreation.

pub mod state;

pub use state::PipelineState;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use crate::backend::{
    Capabilities, CaptureBackend, CaptureSession, CaptureSignal, SessionOptions, Texture,
};
use crate::compositor::{OverlayCompositor, StereoConverter};
use crate::config::CaptureConfig;
use crate::error::Result;
use crate::limiter::UpdateLimiter;
use crate::notify::NotificationSender;
use crate::registry::ConsumerRegistration;
use crate::source::{CaptureSource, ConsumerId, Size};
use crate::stats::CaptureStats;

/// Collaborators a pipeline needs besides its source and consumers
#[derive(Clone)]
pub struct PipelineContext {
    pub backend: Arc<dyn CaptureBackend>,
    pub compositor: Arc<dyn OverlayCompositor>,
    pub notifier: NotificationSender,
    pub config: Arc<CaptureConfig>,
    pub stats: Arc<CaptureStats>,
}

/// One capture source feeding N consumers
pub struct CapturePipeline {
    source: CaptureSource,
    ctx: PipelineContext,
    capabilities: Capabilities,
    signal: CaptureSignal,
    session: Option<Box<dyn CaptureSession>>,
    consumers: Vec<ConsumerRegistration>,
    converters: Vec<Box<dyn StereoConverter>>,
    limiter: UpdateLimiter,
    state: PipelineState,
}

impl CapturePipeline {
    /// Open the session and announce an unknown size to every consumer
    pub fn new(
        source: CaptureSource,
        consumers: Vec<ConsumerRegistration>,
        cursor_visible: bool,
        signal: CaptureSignal,
        ctx: PipelineContext,
    ) -> Result<Self> {
        let capabilities = ctx.backend.capabilities();
        let options = SessionOptions {
            pool_buffers: ctx.config.frame_pool_buffers,
            border_required: ctx.config.border_required,
            cursor_capture: cursor_visible,
        };
        let session = ctx.backend.open_session(&source, &options, signal.clone())?;
        let item_size = session.item_size();

        let mut pipeline = Self {
            source,
            capabilities,
            signal,
            session: Some(session),
            consumers: Vec::new(),
            converters: Vec::new(),
            limiter: UpdateLimiter::default(),
            state: PipelineState::new(item_size, cursor_visible),
            ctx,
        };

        for reg in &consumers {
            pipeline.ctx.notifier.size_changed(reg.consumer, None);
            pipeline
                .ctx
                .compositor
                .set_mouse_scale(reg.consumer, item_size)?;
        }
        pipeline.consumers = consumers;
        pipeline.apply_consumer_settings()?;
        pipeline
            .state
            .arm_propagation(pipeline.ctx.config.propagation_cycles);

        tracing::info!(
            source = %pipeline.source,
            size = %item_size,
            consumers = pipeline.consumers.len(),
            "Capture pipeline started"
        );

        Ok(pipeline)
    }

    pub fn source(&self) -> &CaptureSource {
        &self.source
    }

    pub fn consumers(&self) -> &[ConsumerRegistration] {
        &self.consumers
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Combined limiter interval currently applied
    pub fn limiter(&self) -> &UpdateLimiter {
        &self.limiter
    }

    /// Number of cached stereo converters
    pub fn converter_count(&self) -> usize {
        self.converters.len()
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    /// Consumers that get a sharing handle while propagation is armed
    pub fn propagation_targets(&self) -> Vec<ConsumerId> {
        self.consumers
            .iter()
            .filter(|r| !r.paused && !r.stereo_enabled)
            .skip(1)
            .map(|r| r.consumer)
            .collect()
    }

    /// Handle one frame-arrival notification
    pub fn on_frame_arrived(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let Some(frame) = session.try_next_frame()? else {
            return Ok(());
        };
        self.ctx.stats.frame_received();

        if self.state.paused {
            self.ctx.stats.dropped_while_paused();
            return Ok(());
        }

        if !self.limiter.should_process(Instant::now()) {
            self.ctx.stats.dropped_by_limiter();
            tracing::trace!(source = %self.source, "Frame dropped by limiter");
            return Ok(());
        }

        let resized = self.detect_resize(frame.content_size, frame.texture.size);

        self.fan_out(&frame.texture)?;

        if !resized {
            self.check_drift();
        }
        if self.state.restart_due() {
            self.restart()?;
        }

        self.update_cursor()?;

        self.state.tick_propagation();
        if resized {
            self.finish_resize()?;
        }

        Ok(())
    }

    /// Take a new authoritative consumer list
    ///
    /// Safe to call repeatedly with the same list.
    pub fn on_overlay_data_refresh(&mut self, consumers: Vec<ConsumerRegistration>) -> Result<()> {
        let previous: HashSet<ConsumerId> = self.consumers.iter().map(|r| r.consumer).collect();
        self.consumers = consumers;

        let scale = self.state.notified_size.unwrap_or(self.state.content_size);
        for reg in self
            .consumers
            .iter()
            .filter(|r| !previous.contains(&r.consumer))
        {
            self.ctx
                .notifier
                .size_changed(reg.consumer, self.state.notified_size);
            self.ctx.compositor.set_mouse_scale(reg.consumer, scale)?;
        }

        self.apply_consumer_settings()?;
        self.state.arm_propagation(self.ctx.config.propagation_cycles);

        tracing::debug!(
            source = %self.source,
            consumers = self.consumers.len(),
            interval_us = self.limiter.interval().as_micros() as u64,
            stereo = self.converters.len(),
            "Consumer data refreshed"
        );

        Ok(())
    }

    /// Apply one consumer's pause flag; returns whether the aggregate changed
    pub fn set_consumer_paused(&mut self, consumer: ConsumerId, paused: bool) -> Result<bool> {
        let Some(reg) = self.consumers.iter_mut().find(|r| r.consumer == consumer) else {
            return Ok(false);
        };
        if reg.paused == paused {
            return Ok(false);
        }
        reg.paused = paused;

        let was_paused = self.state.paused;
        self.apply_consumer_settings()?;
        // The primary consumer may have changed
        self.state.arm_propagation(self.ctx.config.propagation_cycles);

        Ok(was_paused != self.state.paused)
    }

    /// Pause or resume the session; only acts on a change
    pub fn pause_capture(&mut self, paused: bool) -> Result<()> {
        if self.state.paused == paused {
            return Ok(());
        }
        self.state.paused = paused;
        if let Some(session) = self.session.as_mut() {
            session.set_paused(paused)?;
        }

        tracing::debug!(source = %self.source, paused, "Capture pause changed");
        Ok(())
    }

    /// Apply the global cursor visibility
    pub fn set_cursor_visible(&mut self, visible: bool) -> Result<()> {
        self.state.cursor_visible = visible;
        self.update_cursor()
    }

    /// Stop the session and release its resources
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
            tracing::info!(source = %self.source, "Capture pipeline closed");
        }
        self.converters.clear();
    }

    fn apply_consumer_settings(&mut self) -> Result<()> {
        let interval = UpdateLimiter::combined_interval(
            self.consumers
                .iter()
                .filter(|r| !r.paused)
                .map(|r| r.min_frame_interval),
        );
        self.limiter.set_interval(interval);

        let stereo = self.consumers.iter().filter(|r| r.stereo_enabled).count();
        self.converters.truncate(stereo);
        while self.converters.len() < stereo {
            self.converters
                .push(self.ctx.compositor.create_stereo_converter()?);
        }

        let all_paused = !self.consumers.is_empty() && self.consumers.iter().all(|r| r.paused);
        self.pause_capture(all_paused)
    }

    fn detect_resize(&mut self, content_size: Size, texture_size: Size) -> bool {
        let content_changed = content_size != self.state.content_size;
        let texture_changed = texture_size != self.state.texture_size;
        if !content_changed && !texture_changed {
            return false;
        }

        if content_changed {
            tracing::debug!(
                source = %self.source,
                from = %self.state.content_size,
                to = %content_size,
                "Capture content resized"
            );
            self.state.content_size = content_size;
            self.state.pending_resize = Some(content_size);
            self.ctx.stats.resized();
        }
        self.state.texture_size = texture_size;
        self.state.arm_propagation(self.ctx.config.propagation_cycles);
        true
    }

    fn fan_out(&mut self, texture: &Texture) -> Result<()> {
        let propagate = self.state.is_propagating();
        let mut primary: Option<ConsumerId> = None;
        let mut delivered = false;
        let mut stereo_index = 0;

        for reg in &self.consumers {
            if reg.stereo_enabled {
                let index = stereo_index;
                stereo_index += 1;
                if reg.paused {
                    continue;
                }
                if let Some(converter) = self.converters.get_mut(index) {
                    let converted = converter.convert(texture, reg.stereo_crop)?;
                    self.ctx.compositor.set_texture(reg.consumer, &converted)?;
                    delivered = true;
                }
                continue;
            }
            if reg.paused {
                continue;
            }

            match primary {
                None => {
                    self.ctx.compositor.set_texture(reg.consumer, texture)?;
                    primary = Some(reg.consumer);
                    delivered = true;
                }
                Some(primary) if propagate => {
                    self.ctx.compositor.share_texture(primary, reg.consumer)?;
                }
                Some(_) => {}
            }
        }

        if delivered {
            self.ctx.stats.frame_delivered();
        }
        Ok(())
    }

    fn check_drift(&mut self) {
        if !self.ctx.config.restart_on_drift || !self.capabilities.window_capture {
            return;
        }
        let Some(window) = self.source.window() else {
            return;
        };
        let Some(bounds) = self.ctx.backend.window_frame_bounds(window) else {
            return;
        };

        // A mismatch that survived a restart is not retried until the bounds move again
        let seen_before = self.state.last_window_bounds == Some((window, bounds));
        if bounds != self.state.texture_size && !seen_before && !self.state.restart_pending {
            tracing::debug!(
                source = %self.source,
                bounds = %bounds,
                texture = %self.state.texture_size,
                "Window bounds drifted from capture, restart pending"
            );
            self.state.restart_pending = true;
        }
        self.state.last_window_bounds = Some((window, bounds));
    }

    fn restart(&mut self) -> Result<()> {
        tracing::info!(source = %self.source, size = %self.state.content_size, "Restarting capture session");

        if let Some(mut session) = self.session.take() {
            session.close();
        }

        let options = SessionOptions {
            pool_buffers: self.ctx.config.frame_pool_buffers,
            border_required: self.ctx.config.border_required,
            cursor_capture: self.state.cursor_capture,
        };
        let mut session = self
            .ctx
            .backend
            .open_session(&self.source, &options, self.signal.clone())?;
        let size = self.state.content_size;
        if !size.is_empty() && session.item_size() != size {
            session.recreate_pool(size)?;
        }
        if self.state.paused {
            session.set_paused(true)?;
        }
        self.session = Some(session);

        self.state.restart_pending = false;
        self.state.texture_size = Size::default();
        self.state.arm_propagation(self.ctx.config.propagation_cycles);
        self.ctx.stats.restarted();
        Ok(())
    }

    fn update_cursor(&mut self) -> Result<()> {
        if !self.capabilities.cursor_control {
            return Ok(());
        }

        let wanted = match self.source.window() {
            _ if !self.state.cursor_visible => false,
            Some(window) if self.ctx.config.auto_hide_cursor => {
                self.ctx.backend.foreground_window() != Some(window)
            }
            _ => true,
        };
        if wanted == self.state.cursor_capture {
            return Ok(());
        }

        if let Some(session) = self.session.as_mut() {
            session.set_cursor_capture(wanted)?;
        }
        self.state.cursor_capture = wanted;
        tracing::debug!(source = %self.source, visible = wanted, "Cursor capture changed");
        Ok(())
    }

    fn finish_resize(&mut self) -> Result<()> {
        if let Some(size) = self.state.pending_resize.take() {
            if let Some(session) = self.session.as_mut() {
                session.recreate_pool(size)?;
            }
        }

        let size = self.state.content_size;
        if self.state.notified_size == Some(size) {
            return Ok(());
        }
        self.state.notified_size = Some(size);
        for reg in &self.consumers {
            self.ctx.notifier.size_changed(reg.consumer, Some(size));
            self.ctx.compositor.set_mouse_scale(reg.consumer, size)?;
        }
        Ok(())
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.close();
    }
}
