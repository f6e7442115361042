//! Merry Core - Coprocessor Synchronization
//!
//! This crate drives the double-buffered shared memory between the host and
//! the audio coprocessor:
//! - Firmware hand-off and the address-table handshake
//! - Two parallel sets of named shared regions ("slots")
//! - Frame counter parity deciding which slot each side owns
//! - Dirty-flagged configuration and volatile status accessors
//! - Symmetric, idempotent teardown
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Host thread                           │
//! │  CoprocessorSession ── FrameSync (frame_id, wake, notify)   │
//! │        │                                                    │
//! │        ├── WriteView (slot frame_id % 2) ── config + dirty  │
//! │        └── SlotView  (other slot)        ── status, samples │
//! └─────────────────────────────────────────────────────────────┘
//!                 │ publish: counter + semaphore   ▲ wake event
//!                 ▼                                │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Coprocessor (firmware)                    │
//! │   reads published slot, clears dirty bits, writes status    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Hardware access goes through [`merry_platform::CoprocessorBackend`].

mod bootstrap;
mod config;
mod directory;
mod dsp;
mod error;
mod firmware;
mod frame;
mod region;
mod session;
mod shutdown;
mod source;
mod view;

pub use bootstrap::BootStep;
pub use config::{default_firmware_path, SessionConfig, FIRMWARE_FILE_NAME};
pub use directory::{AuxiliaryRegion, RegionDirectory, SharedRegionSet};
pub use dsp::{
    DspConfig, DspStatus, DspStatusSnapshot, FinalSamples, IntermediateSamples, OpaqueRegion,
    OpaqueRegionMut, MASTER_VOLUMES,
};
pub use error::{SyncError, SyncResult};
pub use firmware::FirmwareImage;
pub use frame::{FrameOp, FramePhase, FrameState, FrameSync, Slot};
pub use region::MappedRegion;
pub use session::{CoprocessorSession, FrameContext};
pub use shutdown::{ResourceLedger, TeardownReport, TeardownStep};
pub use source::{
    AdpcmState, BiquadCoefficients, BufferQueueEntry, EmbeddedPlayback, QueueCursor, QueuePosition,
    SourceConfig, SourceStatus, SourceStatusSnapshot,
};
pub use view::{SlotView, WriteView};

// Re-export the layout contract for convenience
pub use merry_platform::layout::{
    ChannelLayout, DspConfigDirty, InterpolationMode, OutputFormat, RegionId, SampleFormat,
    SourceDirty, NUM_SOURCES,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_exports() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(Slot::for_write(3), Slot::One);
        assert_eq!(NUM_SOURCES, 24);
    }
}
