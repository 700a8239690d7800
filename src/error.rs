//! Error types for capture sessions and pipelines
//!
//! Nothing here crosses a capture thread boundary as an error value: the
//! thread converts failures into [`Notification`](crate::Notification)s.

use thiserror::Error;

/// Code reported for a source that vanished (matches `E_ABORT`-style platform aborts)
pub const CODE_SOURCE_CLOSED: i32 = 0x8000_4004_u32 as i32;
/// Code reported for an unsupported operation (`E_NOTIMPL`)
pub const CODE_UNSUPPORTED: i32 = 0x8000_4001_u32 as i32;
/// Code reported for failures with no platform code (`E_FAIL`)
pub const CODE_FAILURE: i32 = 0x8000_4005_u32 as i32;

/// Errors raised by capture backends, compositors and the pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("not supported: {0}")]
    Unsupported(&'static str),

    #[error("capture source is no longer available")]
    SourceClosed,

    #[error("{context} failed with code {code:#010x}")]
    Platform { context: String, code: i32 },

    #[error("stereo conversion failed: {0}")]
    Conversion(String),

    #[error("compositor rejected request: {0}")]
    Compositor(String),
}

impl CaptureError {
    /// Build a platform error from a call site description and code
    pub fn platform(context: impl Into<String>, code: i32) -> Self {
        CaptureError::Platform {
            context: context.into(),
            code,
        }
    }

    /// Platform code carried in thread-error notifications
    pub fn code(&self) -> i32 {
        match self {
            CaptureError::Platform { code, .. } => *code,
            CaptureError::SourceClosed => CODE_SOURCE_CLOSED,
            CaptureError::Unsupported(_) => CODE_UNSUPPORTED,
            CaptureError::Conversion(_) | CaptureError::Compositor(_) => CODE_FAILURE,
        }
    }

    /// Whether the error means the source is gone rather than a failure
    pub fn is_source_gone(&self) -> bool {
        matches!(self, CaptureError::SourceClosed)
    }
}

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_code_passthrough() {
        let err = CaptureError::platform("TryGetNextFrame", 0x887A_0005_u32 as i32);
        assert_eq!(err.code(), 0x887A_0005_u32 as i32);
        assert!(!err.is_source_gone());
        assert_eq!(err.to_string(), "TryGetNextFrame failed with code 0x887a0005");
    }

    #[test]
    fn test_fixed_codes() {
        assert_eq!(CaptureError::SourceClosed.code(), CODE_SOURCE_CLOSED);
        assert!(CaptureError::SourceClosed.is_source_gone());
        assert_eq!(CaptureError::Unsupported("picker").code(), CODE_UNSUPPORTED);
        assert_eq!(CaptureError::Conversion("x".into()).code(), CODE_FAILURE);
    }
}
