//! Simulated overlays - drives the capture registry against a virtual desktop
//!
//! Run with: cargo run --example simulated_overlays [FRAMES]
//!
//! This example demonstrates:
//! - Two overlays sharing one window capture, a third on a monitor
//! - A stereo overlay getting its own converted texture
//! - A window resize producing one size notification per overlay
//! - Closing the captured window and reacting to `CaptureLost`
//!
//! # Layout
//!
//! ```text
//!   window 0x10 (1280x720) ──► thread #1 ──► overlay 1 (primary)
//!                                        ├─► overlay 2 (shared)
//!                                        └─► overlay 3 (stereo)
//!   monitor 0x1 (1920x1080) ─► thread #2 ──► overlay 4 (30 fps)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use overlay_capture::{
    CaptureConfig, CaptureError, CaptureRegistry, CaptureSource, ConsumerId, MonitorId,
    Notification, OverlayCompositor, SimulatedBackend, Size, StereoConverter, StereoCrop,
    Texture, UpdateLimiter, WindowId,
};

/// Compositor that logs what each overlay would display
#[derive(Default)]
struct ConsoleCompositor {
    textures: AtomicU64,
    shares: AtomicU64,
    converted: Arc<AtomicU64>,
}

impl ConsoleCompositor {
    fn print_stats(&self) {
        println!(
            "Compositor: textures={} shares={} stereo={}",
            self.textures.load(Ordering::Relaxed),
            self.shares.load(Ordering::Relaxed),
            self.converted.load(Ordering::Relaxed),
        );
    }
}

impl OverlayCompositor for ConsoleCompositor {
    fn set_texture(&self, consumer: ConsumerId, texture: &Texture) -> overlay_capture::Result<()> {
        self.textures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(consumer = %consumer, size = %texture.size, "Overlay texture set");
        Ok(())
    }

    fn share_texture(
        &self,
        primary: ConsumerId,
        secondary: ConsumerId,
    ) -> overlay_capture::Result<()> {
        self.shares.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(primary = %primary, secondary = %secondary, "Overlay texture shared");
        Ok(())
    }

    fn set_mouse_scale(&self, consumer: ConsumerId, size: Size) -> overlay_capture::Result<()> {
        tracing::debug!(consumer = %consumer, size = %size, "Mouse scale set");
        Ok(())
    }

    fn create_stereo_converter(&self) -> overlay_capture::Result<Box<dyn StereoConverter>> {
        Ok(Box::new(OverUnder {
            converted: Arc::clone(&self.converted),
        }))
    }
}

/// Stacks the cropped halves vertically
struct OverUnder {
    converted: Arc<AtomicU64>,
}

impl StereoConverter for OverUnder {
    fn convert(&mut self, input: &Texture, crop: StereoCrop) -> overlay_capture::Result<Texture> {
        if crop.width <= 0 || crop.height <= 0 {
            return Err(CaptureError::Conversion(format!(
                "empty crop {}x{}",
                crop.width, crop.height
            )));
        }
        self.converted.fetch_add(1, Ordering::Relaxed);
        Ok(Texture {
            handle: input.handle,
            size: Size::new(crop.width as u32 / 2, crop.height as u32 * 2),
        })
    }
}

fn pump(backend: &SimulatedBackend, sources: &[CaptureSource], frames: u32) {
    for _ in 0..frames {
        for source in sources {
            backend.push_frame(source);
        }
        std::thread::sleep(Duration::from_millis(16));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let frames: u32 = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => 30,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("overlay_capture=debug".parse()?)
                .add_directive("simulated_overlays=debug".parse()?),
        )
        .init();

    let window = WindowId(0x10);
    let monitor = MonitorId(1);
    let window_source = CaptureSource::Window(window);
    let monitor_source = CaptureSource::Monitor(monitor);

    let backend = SimulatedBackend::new();
    backend.add_window(window, Size::new(1280, 720));
    backend.add_monitor(monitor, Size::new(1920, 1080));

    let compositor = Arc::new(ConsoleCompositor::default());
    let config = CaptureConfig::default().thread_name_prefix("demo-capture");
    let (registry, mut notifications) =
        CaptureRegistry::new(Arc::new(backend.clone()), compositor.clone(), config);

    registry.start_from_window(ConsumerId(1), window)?;
    registry.start_from_window(ConsumerId(2), window)?;
    registry.start_from_existing_consumer(ConsumerId(3), ConsumerId(1))?;
    registry.set_stereo_crop(ConsumerId(3), true, StereoCrop::new(0, 0, 1280, 720))?;
    registry.start_from_source(ConsumerId(4), Some(monitor))?;
    registry.set_limiter_interval(ConsumerId(4), UpdateLimiter::interval_for_fps(30.0))?;

    println!("Capture threads: {}", registry.thread_count());

    // Give the threads a moment to open their sessions
    tokio::time::sleep(Duration::from_millis(50)).await;
    pump(&backend, &[window_source, monitor_source], frames);

    println!("Resizing window to 1920x1080");
    backend.resize_window(window, Size::new(1920, 1080));
    pump(&backend, &[window_source, monitor_source], frames);

    println!("Closing window");
    backend.close_window(window);

    let mut lost = 0;
    while lost < 3 {
        let next = tokio::time::timeout(Duration::from_secs(2), notifications.recv()).await;
        let Ok(Some(notification)) = next else {
            break;
        };
        match notification {
            Notification::SizeChanged { consumer, size } => match size {
                Some(size) => println!("[{}] size {}", consumer, size),
                None => println!("[{}] size unknown", consumer),
            },
            Notification::CaptureLost { consumer } => {
                println!("[{}] capture lost, stopping", consumer);
                registry.stop(consumer)?;
                lost += 1;
            }
            Notification::ThreadError { thread, code } => {
                println!("Thread {} failed with {:#010x}", thread, code);
            }
        }
    }

    if let Some(stats) = registry.stats(ConsumerId(4)) {
        println!(
            "Monitor capture: received={} delivered={} limited={} ({:.0}% delivered)",
            stats.frames_received,
            stats.frames_delivered,
            stats.dropped_by_limiter,
            stats.delivery_ratio() * 100.0
        );
    }
    compositor.print_stats();

    registry.shutdown();
    Ok(())
}
