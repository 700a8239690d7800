//! Test doubles shared by unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::backend::Texture;
use crate::compositor::{OverlayCompositor, StereoConverter};
use crate::error::Result;
use crate::notify::{Notification, NotificationReceiver};
use crate::source::{ConsumerId, Size, StereoCrop};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositorCall {
    SetTexture { consumer: ConsumerId, texture: Texture },
    Share { primary: ConsumerId, secondary: ConsumerId },
    MouseScale { consumer: ConsumerId, size: Size },
    Convert { converter: usize, crop: StereoCrop },
}

/// Compositor that records every call
#[derive(Default)]
pub struct RecordingCompositor {
    calls: Arc<Mutex<Vec<CompositorCall>>>,
    converters: AtomicUsize,
}

impl RecordingCompositor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<CompositorCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn converters_created(&self) -> usize {
        self.converters.load(Ordering::SeqCst)
    }

    pub fn textures_for(&self, consumer: ConsumerId) -> usize {
        self.count(|c| matches!(c, CompositorCall::SetTexture { consumer: id, .. } if *id == consumer))
    }

    pub fn shares(&self) -> usize {
        self.count(|c| matches!(c, CompositorCall::Share { .. }))
    }

    pub fn converts(&self) -> usize {
        self.count(|c| matches!(c, CompositorCall::Convert { .. }))
    }

    pub fn count(&self, pred: impl Fn(&CompositorCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }
}

impl OverlayCompositor for RecordingCompositor {
    fn set_texture(&self, consumer: ConsumerId, texture: &Texture) -> Result<()> {
        self.calls.lock().push(CompositorCall::SetTexture {
            consumer,
            texture: *texture,
        });
        Ok(())
    }

    fn share_texture(&self, primary: ConsumerId, secondary: ConsumerId) -> Result<()> {
        self.calls
            .lock()
            .push(CompositorCall::Share { primary, secondary });
        Ok(())
    }

    fn set_mouse_scale(&self, consumer: ConsumerId, size: Size) -> Result<()> {
        self.calls
            .lock()
            .push(CompositorCall::MouseScale { consumer, size });
        Ok(())
    }

    fn create_stereo_converter(&self) -> Result<Box<dyn StereoConverter>> {
        let index = self.converters.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingConverter {
            index,
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct RecordingConverter {
    index: usize,
    calls: Arc<Mutex<Vec<CompositorCall>>>,
}

impl StereoConverter for RecordingConverter {
    fn convert(&mut self, input: &Texture, crop: StereoCrop) -> Result<Texture> {
        self.calls.lock().push(CompositorCall::Convert {
            converter: self.index,
            crop,
        });
        Ok(Texture {
            handle: input.handle | 0x8000_0000,
            size: Size::new(input.size.width, input.size.height * 2),
        })
    }
}

/// Poll `cond` until it holds or two seconds pass
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Collect notifications until `done` holds over what was collected, or time out
pub fn collect_until(
    rx: &mut NotificationReceiver,
    mut done: impl FnMut(&[Notification]) -> bool,
) -> Vec<Notification> {
    let mut seen = Vec::new();
    wait_until(|| {
        while let Ok(n) = rx.try_recv() {
            seen.push(n);
        }
        done(&seen)
    });
    seen
}

/// Everything currently queued
pub fn drain(rx: &mut NotificationReceiver) -> Vec<Notification> {
    let mut seen = Vec::new();
    while let Ok(n) = rx.try_recv() {
        seen.push(n);
    }
    seen
}
