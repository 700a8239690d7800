//! Consumer-side collaborators
//!
//! The VR compositor that displays overlays and the over/under stereo
//! converter are owned by the application. The pipeline only invokes them.

use crate::backend::Texture;
use crate::error::Result;
use crate::source::{ConsumerId, Size, StereoCrop};

/// Host compositor receiving captured textures
///
/// Called from capture threads; implementations must be thread-safe.
pub trait OverlayCompositor: Send + Sync {
    /// Hand a texture to a consumer's overlay
    fn set_texture(&self, consumer: ConsumerId, texture: &Texture) -> Result<()>;

    /// Point `secondary` at the texture currently shown by `primary`
    ///
    /// Sharing handles are only valid once re-established after the
    /// underlying buffer was recreated, so the pipeline calls this for a few
    /// frames after every resize or consumer change.
    fn share_texture(&self, primary: ConsumerId, secondary: ConsumerId) -> Result<()>;

    /// Update the consumer's mouse/coordinate scale to the captured size
    fn set_mouse_scale(&self, consumer: ConsumerId, size: Size) -> Result<()>;

    /// Create a stereo converter instance for one consumer
    fn create_stereo_converter(&self) -> Result<Box<dyn StereoConverter>>;
}

/// Over/under stereo converter
///
/// Instances are cached per stereo consumer and reused across frames.
pub trait StereoConverter: Send {
    /// Convert the cropped region of `input` into a stacked stereo texture
    fn convert(&mut self, input: &Texture, crop: StereoCrop) -> Result<Texture>;
}
