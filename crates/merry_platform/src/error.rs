//! Platform Error Types

use thiserror::Error;

/// Errors from the hardware-handle layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("{call} failed with result code {code:#010x}")]
    CallFailed { call: &'static str, code: u32 },

    #[error("Handle {0:#x} is not open")]
    InvalidHandle(u32),

    #[error("Timed out waiting on handle {0:#x}")]
    Timeout(u32),

    #[error("DSP address {0:#07x} is not mapped into this process")]
    UnmappedAddress(u32),

    #[error("Pipe {channel} is not supported by this backend")]
    UnsupportedChannel { channel: u32 },

    #[error("Coprocessor component is not loaded")]
    ComponentNotLoaded,

    #[error("Backend disconnected: {0}")]
    Disconnected(String),
}

impl PlatformError {
    /// Whether this error is an expired wait rather than a failed call
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlatformError::CallFailed {
            call: "DSP_GetSemaphoreHandle",
            code: 0xD8E0_6406,
        };
        let text = err.to_string();
        assert!(text.contains("DSP_GetSemaphoreHandle"));
        assert!(text.contains("0xd8e06406"));

        let err = PlatformError::UnmappedAddress(0x1_8400);
        assert!(err.to_string().contains("0x18400"));
    }

    #[test]
    fn test_timeout_classification() {
        assert!(PlatformError::Timeout(3).is_timeout());
        assert!(!PlatformError::InvalidHandle(3).is_timeout());
    }
}
