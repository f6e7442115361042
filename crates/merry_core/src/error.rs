//! Synchronization Error Types

use std::path::PathBuf;

use merry_platform::PlatformError;
use thiserror::Error;

use crate::bootstrap::BootStep;
use crate::frame::FrameOp;

/// Errors that can occur while booting or driving the coprocessor
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Firmware not found at {}: {reason}", .path.display())]
    NotFound { path: PathBuf, reason: String },

    #[error("Hardware call failed during {step}: {source}")]
    HardwareError {
        step: BootStep,
        #[source]
        source: PlatformError,
    },

    #[error("Protocol mismatch in {what}: expected {expected}, got {got} (wrong firmware version?)")]
    ProtocolMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Coprocessor fault during {operation}: {source}")]
    CoprocessorFault {
        operation: FrameOp,
        #[source]
        source: PlatformError,
    },

    #[error("{operation} called out of order at frame {frame_id}")]
    OutOfOrder { operation: FrameOp, frame_id: u16 },

    #[error("Coprocessor session is not booted")]
    NotBooted,

    #[error("Coprocessor session is already booted")]
    AlreadyBooted,

    #[error("Resources from a failed boot are still held; shut the session down before booting again")]
    ResourcesHeld,

    #[error("Invalid source index: {0} (must be below {max})", max = merry_platform::layout::NUM_SOURCES)]
    InvalidSourceIndex(usize),

    #[error("Invalid buffer queue slot: {0}")]
    InvalidQueueSlot(usize),

    #[error("Invalid mix index: {0}")]
    InvalidMixIndex(usize),

    #[error("Invalid channel: {channel} (must be below {max})")]
    InvalidChannel { channel: usize, max: usize },

    #[error("Invalid sample index: {0} (must be below {max})", max = merry_platform::layout::SAMPLES_PER_FRAME)]
    InvalidSampleIndex(usize),

    #[error("{count} words at offset {offset} exceed {region} ({len} words)")]
    WordRangeOutOfBounds {
        region: &'static str,
        offset: usize,
        count: usize,
        len: usize,
    },

    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    #[error("Failed to read or write configuration file: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether this is a frame wait that ran past its deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::CoprocessorFault { source, .. } if source.is_timeout())
    }

    /// Whether the frame loop must stop after this error
    pub fn is_fatal_to_frame_loop(&self) -> bool {
        matches!(
            self,
            Self::CoprocessorFault { .. } | Self::OutOfOrder { .. } | Self::NotBooted
        )
    }
}

/// Result type alias for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::NotFound {
            path: PathBuf::from("/missing/dspfirm.cdc"),
            reason: "No such file".into(),
        };
        assert!(err.to_string().contains("dspfirm.cdc"));

        let err = SyncError::ProtocolMismatch {
            what: "address table count",
            expected: 15,
            got: 12,
        };
        let text = err.to_string();
        assert!(text.contains("15"));
        assert!(text.contains("12"));

        let err = SyncError::InvalidSourceIndex(30);
        assert!(err.to_string().contains("30"));
        assert!(err.to_string().contains("24"));
    }

    #[test]
    fn test_hardware_error_names_step() {
        let err = SyncError::HardwareError {
            step: BootStep::AcquireSemaphore,
            source: PlatformError::CallFailed {
                call: "DSP_GetSemaphoreHandle",
                code: 1,
            },
        };
        assert!(err.to_string().contains("notify semaphore"));
    }

    #[test]
    fn test_timeout_classification() {
        let err = SyncError::CoprocessorFault {
            operation: FrameOp::Wait,
            source: PlatformError::Timeout(0x21),
        };
        assert!(err.is_timeout());
        assert!(err.is_fatal_to_frame_loop());

        let err = SyncError::InvalidMixIndex(4);
        assert!(!err.is_timeout());
        assert!(!err.is_fatal_to_frame_loop());
    }
}
